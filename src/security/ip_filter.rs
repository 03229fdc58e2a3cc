//! IP reputation filtering.
//!
//! # Responsibilities
//! - Deny callers on the route's static blocked list or the dynamic one
//! - Enforce an allow list when either the static or dynamic one is non-empty
//! - Maintain the dynamic lists shared through the store
//!
//! # Design Decisions
//! - Blocked list is checked before the allow list
//! - The dynamic list is only fetched when the static list did not decide
//! - Each entry carries its own expiry key next to the list, so a short
//!   block lapses on time even when the list holds longer-lived entries
//! - An entry's expiry is only ever pushed out, so re-adding it with a
//!   shorter TTL never cuts an existing block short

use std::sync::Arc;
use std::time::Duration;

use crate::security::cidr::{any_match, IpRule};
use crate::security::decision::DenialCode;
use crate::security::options::RoutePolicy;
use crate::security::penalty::{self, TemporaryBlock};
use crate::store::{self, keys, SharedStore, StoreError};

/// Lifetime of a dynamic list entry added without an explicit expiry.
pub const DEFAULT_LIST_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Outcome of the reputation check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpCheck {
    pub allowed: bool,
    pub reason: Option<DenialCode>,
}

impl IpCheck {
    pub const ALLOWED: IpCheck = IpCheck {
        allowed: true,
        reason: None,
    };

    fn denied(code: DenialCode) -> Self {
        Self {
            allowed: false,
            reason: Some(code),
        }
    }
}

/// Checks callers against static and dynamic IP lists.
#[derive(Clone)]
pub struct IpReputationFilter {
    lists: DynamicLists,
}

impl IpReputationFilter {
    pub fn new(store: Arc<dyn SharedStore>) -> Self {
        Self {
            lists: DynamicLists::new(store),
        }
    }

    pub async fn is_allowed(&self, ip: &str, policy: &RoutePolicy) -> Result<IpCheck, StoreError> {
        if policy.options.skip_ip_filter {
            return Ok(IpCheck::ALLOWED);
        }

        if any_match(&policy.blocked, ip) || self.lists.matches_live(keys::BLOCKED_IPS, ip).await? {
            tracing::debug!(ip = %ip, route = %policy.route, "IP on blocked list");
            return Ok(IpCheck::denied(DenialCode::IpBlocked));
        }

        if any_match(&policy.allowed, ip) {
            return Ok(IpCheck::ALLOWED);
        }
        if self.lists.matches_live(keys::ALLOWED_IPS, ip).await? {
            return Ok(IpCheck::ALLOWED);
        }
        if !policy.allowed.is_empty() || self.lists.has_live(keys::ALLOWED_IPS).await? {
            tracing::debug!(ip = %ip, route = %policy.route, "IP not on allow list");
            return Ok(IpCheck::denied(DenialCode::IpNotWhitelisted));
        }

        Ok(IpCheck::ALLOWED)
    }

    pub fn lists(&self) -> &DynamicLists {
        &self.lists
    }
}

/// Everything the shared store holds about one caller.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientStanding {
    pub ip: String,
    pub penalty_level: u64,
    pub penalty_expires_in_secs: Option<u64>,
    pub temporary_block: Option<TemporaryBlock>,
    pub blocked: bool,
    pub allowed: bool,
}

/// The store-backed blocked and allowed lists.
#[derive(Clone)]
pub struct DynamicLists {
    store: Arc<dyn SharedStore>,
}

impl DynamicLists {
    pub fn new(store: Arc<dyn SharedStore>) -> Self {
        Self { store }
    }

    /// Blocked entries whose expiry has not passed.
    pub async fn blocked(&self) -> Result<Vec<String>, StoreError> {
        self.live_entries(keys::BLOCKED_IPS).await
    }

    pub async fn allowed(&self) -> Result<Vec<String>, StoreError> {
        self.live_entries(keys::ALLOWED_IPS).await
    }

    /// Add `entry` to the blocked list for at least `ttl`.
    pub async fn block(&self, entry: &str, ttl: Duration) -> Result<(), StoreError> {
        self.add(keys::BLOCKED_IPS, entry, ttl).await
    }

    pub async fn unblock(&self, entry: &str) -> Result<bool, StoreError> {
        self.remove(keys::BLOCKED_IPS, entry).await
    }

    pub async fn allow(&self, entry: &str, ttl: Duration) -> Result<(), StoreError> {
        self.add(keys::ALLOWED_IPS, entry, ttl).await
    }

    pub async fn disallow(&self, entry: &str) -> Result<bool, StoreError> {
        self.remove(keys::ALLOWED_IPS, entry).await
    }

    /// Penalty, temporary block and list membership for `ip`.
    pub async fn inspect(&self, ip: &str) -> Result<ClientStanding, StoreError> {
        let store = self.store.as_ref();
        let penalty_level = penalty::read_level(store, ip).await?;
        let penalty_expires_in_secs = if penalty_level > 0 {
            store.ttl(&keys::penalty(ip)).await?.map(|d| d.as_secs())
        } else {
            None
        };

        Ok(ClientStanding {
            ip: ip.to_string(),
            penalty_level,
            penalty_expires_in_secs,
            temporary_block: penalty::read_temp_block(store, ip).await?,
            blocked: self.matches_live(keys::BLOCKED_IPS, ip).await?,
            allowed: self.matches_live(keys::ALLOWED_IPS, ip).await?,
        })
    }

    /// True if a live entry of list `key` covers `ip`. Only entries that
    /// match are checked for expiry.
    async fn matches_live(&self, key: &str, ip: &str) -> Result<bool, StoreError> {
        for entry in store::read_list(self.store.as_ref(), key).await? {
            if parse_dynamic(key, &entry).matches(ip) && self.is_live(key, &entry).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn has_live(&self, key: &str) -> Result<bool, StoreError> {
        for entry in store::read_list(self.store.as_ref(), key).await? {
            if self.is_live(key, &entry).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn is_live(&self, key: &str, entry: &str) -> Result<bool, StoreError> {
        Ok(self.store.get(&keys::list_entry(key, entry)).await?.is_some())
    }

    async fn live_entries(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let mut live = Vec::new();
        for entry in store::read_list(self.store.as_ref(), key).await? {
            if self.is_live(key, &entry).await? {
                live.push(entry);
            }
        }
        Ok(live)
    }

    async fn add(&self, key: &str, entry: &str, ttl: Duration) -> Result<(), StoreError> {
        let store = self.store.as_ref();
        let expiry_key = keys::list_entry(key, entry);
        let entry_remaining = store.ttl(&expiry_key).await?.unwrap_or_default();
        store.set_ex(&expiry_key, "1", entry_remaining.max(ttl)).await?;

        // Lapsed entries are dropped whenever the list is rewritten.
        let mut entries = self.live_entries(key).await?;
        if !entries.iter().any(|e| e == entry) {
            entries.push(entry.to_string());
        }
        let remaining = store.ttl(key).await?.unwrap_or_default();
        store::write_list(store, key, &entries, remaining.max(ttl)).await
    }

    async fn remove(&self, key: &str, entry: &str) -> Result<bool, StoreError> {
        let store = self.store.as_ref();
        let mut entries = self.live_entries(key).await?;
        let before = entries.len();
        entries.retain(|e| e != entry);
        store.delete(&keys::list_entry(key, entry)).await?;
        if entries.len() == before {
            return Ok(false);
        }

        if entries.is_empty() {
            store.delete(key).await?;
        } else {
            let remaining = store.ttl(key).await?.unwrap_or(DEFAULT_LIST_TTL);
            store::write_list(store, key, &entries, remaining).await?;
        }
        Ok(true)
    }
}

fn parse_dynamic(key: &str, entry: &str) -> IpRule {
    let rule = IpRule::parse(entry);
    if rule.is_malformed() {
        tracing::warn!(list = key, entry = %entry, "Malformed CIDR entry in dynamic list will never match");
    }
    rule
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::options::SecurityOptions;
    use crate::store::MemoryStore;

    fn filter() -> (IpReputationFilter, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (IpReputationFilter::new(store.clone()), store)
    }

    fn policy(allowed: &[&str], blocked: &[&str]) -> RoutePolicy {
        RoutePolicy::resolve(
            "test",
            SecurityOptions {
                allowed_ips: allowed.iter().map(|s| s.to_string()).collect(),
                blocked_ips: blocked.iter().map(|s| s.to_string()).collect(),
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn test_no_lists_allows_everyone() {
        let (filter, _) = filter();
        let check = filter.is_allowed("198.51.100.4", &policy(&[], &[])).await.unwrap();
        assert_eq!(check, IpCheck::ALLOWED);
    }

    #[tokio::test]
    async fn test_static_blocked_cidr() {
        let (filter, _) = filter();
        let p = policy(&[], &["10.0.0.0/24"]);
        let check = filter.is_allowed("10.0.0.5", &p).await.unwrap();
        assert_eq!(check.reason, Some(DenialCode::IpBlocked));
        assert!(filter.is_allowed("10.0.1.5", &p).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_allow_list_restricts() {
        let (filter, _) = filter();
        let p = policy(&["192.168.0.0/16"], &[]);
        assert!(filter.is_allowed("192.168.3.4", &p).await.unwrap().allowed);
        let check = filter.is_allowed("8.8.8.8", &p).await.unwrap();
        assert_eq!(check.reason, Some(DenialCode::IpNotWhitelisted));
    }

    #[tokio::test]
    async fn test_blocked_wins_over_allowed() {
        let (filter, _) = filter();
        let p = policy(&["10.0.0.0/8"], &["10.0.0.9"]);
        let check = filter.is_allowed("10.0.0.9", &p).await.unwrap();
        assert_eq!(check.reason, Some(DenialCode::IpBlocked));
    }

    #[tokio::test]
    async fn test_dynamic_lists() {
        let (filter, _) = filter();
        let p = policy(&[], &[]);
        filter.lists().block("203.0.113.7", Duration::from_secs(60)).await.unwrap();
        assert_eq!(
            filter.is_allowed("203.0.113.7", &p).await.unwrap().reason,
            Some(DenialCode::IpBlocked)
        );

        filter.lists().allow("2001:db8::/32", Duration::from_secs(60)).await.unwrap();
        assert!(filter.is_allowed("2001:db8::5", &p).await.unwrap().allowed);
        assert_eq!(
            filter.is_allowed("198.51.100.1", &p).await.unwrap().reason,
            Some(DenialCode::IpNotWhitelisted)
        );

        assert!(filter.lists().unblock("203.0.113.7").await.unwrap());
        assert!(!filter.lists().unblock("203.0.113.7").await.unwrap());
        assert!(filter.lists().disallow("2001:db8::/32").await.unwrap());
        assert!(filter.is_allowed("203.0.113.7", &p).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_inspect_reports_standing() {
        let (filter, store) = filter();
        let lists = filter.lists();
        let clean = lists.inspect("7.7.7.7").await.unwrap();
        assert_eq!(clean.penalty_level, 0);
        assert!(clean.temporary_block.is_none());
        assert!(!clean.blocked);

        let escalator = crate::security::penalty::PenaltyEscalator::new(store.clone(), None);
        escalator.escalate("7.7.7.7").await.unwrap();
        lists.block("7.7.0.0/16", Duration::from_secs(60)).await.unwrap();

        let standing = lists.inspect("7.7.7.7").await.unwrap();
        assert_eq!(standing.penalty_level, 1);
        assert!(standing.penalty_expires_in_secs.is_some());
        assert!(standing.blocked);
        assert!(!standing.allowed);
    }

    #[tokio::test]
    async fn test_skip_ip_filter() {
        let (filter, _) = filter();
        let mut p = policy(&[], &["0.0.0.0/0"]);
        p.options.skip_ip_filter = true;
        assert!(filter.is_allowed("1.2.3.4", &p).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_verdict_is_idempotent() {
        let (filter, _) = filter();
        let p = policy(&["10.0.0.0/8"], &["10.9.0.0/16", "bogus/77"]);
        for ip in ["10.1.1.1", "10.9.9.9", "172.16.0.1", "unknown"] {
            let first = filter.is_allowed(ip, &p).await.unwrap();
            for _ in 0..5 {
                assert_eq!(filter.is_allowed(ip, &p).await.unwrap(), first, "{ip}");
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire_independently() {
        let (filter, store) = filter();
        let lists = filter.lists();
        let p = policy(&[], &[]);
        lists.block("1.1.1.1", Duration::from_secs(900)).await.unwrap();
        lists.block("2.2.2.2", Duration::from_secs(60)).await.unwrap();
        let ttl = store.ttl(keys::BLOCKED_IPS).await.unwrap().unwrap();
        assert_eq!(ttl, Duration::from_secs(900));
        assert_eq!(lists.blocked().await.unwrap(), vec!["1.1.1.1", "2.2.2.2"]);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(lists.blocked().await.unwrap(), vec!["1.1.1.1"]);
        assert!(filter.is_allowed("2.2.2.2", &p).await.unwrap().allowed);
        assert!(!filter.is_allowed("1.1.1.1", &p).await.unwrap().allowed);

        tokio::time::advance(Duration::from_secs(840)).await;
        assert!(lists.blocked().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expiry_only_extends() {
        let (filter, store) = filter();
        let lists = filter.lists();
        lists.block("3.3.3.3", Duration::from_secs(900)).await.unwrap();
        lists.block("3.3.3.3", Duration::from_secs(60)).await.unwrap();
        let marker = keys::list_entry(keys::BLOCKED_IPS, "3.3.3.3");
        assert_eq!(store.ttl(&marker).await.unwrap(), Some(Duration::from_secs(900)));

        tokio::time::advance(Duration::from_secs(120)).await;
        assert_eq!(lists.blocked().await.unwrap(), vec!["3.3.3.3"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lapsed_allow_entry_stops_restricting() {
        let (filter, _) = filter();
        let p = policy(&[], &[]);
        filter.lists().allow("10.0.0.0/8", Duration::from_secs(30)).await.unwrap();
        assert!(!filter.is_allowed("8.8.8.8", &p).await.unwrap().allowed);

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(filter.is_allowed("8.8.8.8", &p).await.unwrap().allowed);
        assert!(!filter.lists().disallow("10.0.0.0/8").await.unwrap());
    }

    #[tokio::test]
    async fn test_corrupt_list_surfaces_error() {
        let (filter, store) = filter();
        store.set_ex(keys::BLOCKED_IPS, "not json", Duration::from_secs(60)).await.unwrap();
        let err = filter.is_allowed("1.2.3.4", &policy(&[], &[])).await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }
}
