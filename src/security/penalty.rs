//! Penalty escalation and threat-triggered temporary blocks.
//!
//! Repeat rate-limit offenders climb a penalty ladder whose record lives for
//! `min(level² × 60, 86400)` seconds, so a quiet caller decays back to zero.
//! Once the level reaches the configured lockout level the caller is also
//! mirrored into the dynamic blocked list for that duration.
//!
//! Threat detections skip the ladder and write a fixed 15 minute block.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::security::context::now_millis;
use crate::security::ip_filter::DynamicLists;
use crate::security::threats::ThreatKind;
use crate::store::{keys, SharedStore, StoreError};

/// Upper bound on a single penalty, one day.
pub const MAX_PENALTY: Duration = Duration::from_secs(86_400);

/// Lifetime of a threat-triggered block.
pub const TEMP_BLOCK_TTL: Duration = Duration::from_secs(900);

/// Penalty duration for `level`.
pub fn penalty_duration(level: u64) -> Duration {
    let secs = level.saturating_mul(level).saturating_mul(60);
    Duration::from_secs(secs).min(MAX_PENALTY)
}

/// Result of one escalation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Penalty {
    pub level: u64,
    pub duration: Duration,
    /// The caller was added to the blocked list.
    pub locked_out: bool,
}

/// Stored record of a threat-triggered block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemporaryBlock {
    pub threats: Vec<ThreatKind>,
    /// Milliseconds since the Unix epoch.
    pub blocked_at: u64,
}

#[derive(Clone)]
pub struct PenaltyEscalator {
    store: Arc<dyn SharedStore>,
    lists: DynamicLists,
    block_level: Option<u64>,
}

impl PenaltyEscalator {
    /// `block_level` of `None` disables the blocked-list lockout.
    pub fn new(store: Arc<dyn SharedStore>, block_level: Option<u64>) -> Self {
        Self {
            lists: DynamicLists::new(store.clone()),
            store,
            block_level,
        }
    }

    pub async fn escalate(&self, ip: &str) -> Result<Penalty, StoreError> {
        let key = keys::penalty(ip);
        let level = read_level(self.store.as_ref(), ip).await?.saturating_add(1);
        let duration = penalty_duration(level);
        self.store.set_ex(&key, &level.to_string(), duration).await?;

        let locked_out = self.block_level.is_some_and(|threshold| level >= threshold);
        if locked_out {
            self.lists.block(ip, duration).await?;
        }

        tracing::info!(ip = %ip, level, duration_secs = duration.as_secs(), locked_out, "Penalty escalated");
        Ok(Penalty {
            level,
            duration,
            locked_out,
        })
    }

    /// Record a 15 minute block for `ip` and mirror it into the blocked list.
    pub async fn temp_block(&self, ip: &str, threats: &[ThreatKind]) -> Result<TemporaryBlock, StoreError> {
        let key = keys::temp_block(ip);
        let record = TemporaryBlock {
            threats: threats.to_vec(),
            blocked_at: now_millis(),
        };
        let raw = serde_json::to_string(&record).map_err(|e| StoreError::Corrupt {
            key: key.clone(),
            reason: e.to_string(),
        })?;
        self.store.set_ex(&key, &raw, TEMP_BLOCK_TTL).await?;
        self.lists.block(ip, TEMP_BLOCK_TTL).await?;

        tracing::warn!(ip = %ip, threats = ?threats, "Temporary block applied");
        Ok(record)
    }
}

/// Current penalty level for `ip`, 0 when none is active.
pub async fn read_level(store: &dyn SharedStore, ip: &str) -> Result<u64, StoreError> {
    let key = keys::penalty(ip);
    match store.get(&key).await? {
        Some(raw) => raw.parse().map_err(|_| StoreError::Corrupt {
            key,
            reason: format!("not a penalty level: {:?}", raw),
        }),
        None => Ok(0),
    }
}

pub async fn read_temp_block(store: &dyn SharedStore, ip: &str) -> Result<Option<TemporaryBlock>, StoreError> {
    let key = keys::temp_block(ip);
    match store.get(&key).await? {
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| StoreError::Corrupt {
                key,
                reason: e.to_string(),
            }),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn test_penalty_ladder() {
        assert_eq!(penalty_duration(0), Duration::ZERO);
        assert_eq!(penalty_duration(1), Duration::from_secs(60));
        assert_eq!(penalty_duration(2), Duration::from_secs(240));
        assert_eq!(penalty_duration(3), Duration::from_secs(540));
        assert_eq!(penalty_duration(37), Duration::from_secs(82_140));
        assert_eq!(penalty_duration(38), MAX_PENALTY);
        assert_eq!(penalty_duration(u64::MAX), MAX_PENALTY);
    }

    #[tokio::test(start_paused = true)]
    async fn test_escalation_persists_and_decays() {
        let store = Arc::new(MemoryStore::new());
        let escalator = PenaltyEscalator::new(store.clone(), None);

        assert_eq!(escalator.escalate("1.2.3.4").await.unwrap().level, 1);
        let second = escalator.escalate("1.2.3.4").await.unwrap();
        assert_eq!(second.level, 2);
        assert_eq!(second.duration, Duration::from_secs(240));
        assert!(!second.locked_out);
        assert_eq!(
            store.ttl(&keys::penalty("1.2.3.4")).await.unwrap(),
            Some(Duration::from_secs(240))
        );

        tokio::time::advance(Duration::from_secs(241)).await;
        assert_eq!(read_level(store.as_ref(), "1.2.3.4").await.unwrap(), 0);
        assert_eq!(escalator.escalate("1.2.3.4").await.unwrap().level, 1);
    }

    #[tokio::test]
    async fn test_lockout_at_block_level() {
        let store = Arc::new(MemoryStore::new());
        let escalator = PenaltyEscalator::new(store.clone(), Some(3));
        let lists = DynamicLists::new(store.clone());

        for _ in 0..2 {
            assert!(!escalator.escalate("5.6.7.8").await.unwrap().locked_out);
        }
        assert!(lists.blocked().await.unwrap().is_empty());

        let third = escalator.escalate("5.6.7.8").await.unwrap();
        assert!(third.locked_out);
        assert_eq!(lists.blocked().await.unwrap(), vec!["5.6.7.8"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_temp_block_record_and_mirror() {
        let store = Arc::new(MemoryStore::new());
        let escalator = PenaltyEscalator::new(store.clone(), None);
        escalator
            .temp_block("9.9.9.9", &[ThreatKind::Xss, ThreatKind::BotDetected])
            .await
            .unwrap();

        let record = read_temp_block(store.as_ref(), "9.9.9.9").await.unwrap().unwrap();
        assert_eq!(record.threats, vec![ThreatKind::Xss, ThreatKind::BotDetected]);
        assert_eq!(store.ttl(&keys::temp_block("9.9.9.9")).await.unwrap(), Some(TEMP_BLOCK_TTL));
        assert_eq!(
            DynamicLists::new(store.clone()).blocked().await.unwrap(),
            vec!["9.9.9.9"]
        );

        let raw = store.get(&keys::temp_block("9.9.9.9")).await.unwrap().unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(json["threats"], serde_json::json!(["XSS", "BOT_DETECTED"]));
        assert!(json["blockedAt"].is_u64());
    }

    #[tokio::test(start_paused = true)]
    async fn test_mirrored_block_lapses_with_longer_entries_present() {
        use crate::security::decision::DenialCode;
        use crate::security::ip_filter::{IpReputationFilter, DEFAULT_LIST_TTL};
        use crate::security::options::{RoutePolicy, SecurityOptions};

        let store = Arc::new(MemoryStore::new());
        let filter = IpReputationFilter::new(store.clone());
        let policy = RoutePolicy::resolve("test", SecurityOptions::default());
        filter.lists().block("198.51.100.1", DEFAULT_LIST_TTL).await.unwrap();

        let escalator = PenaltyEscalator::new(store.clone(), None);
        escalator.temp_block("9.9.9.9", &[ThreatKind::SqlInjection]).await.unwrap();
        assert!(!filter.is_allowed("9.9.9.9", &policy).await.unwrap().allowed);

        tokio::time::advance(Duration::from_secs(3600)).await;
        assert!(read_temp_block(store.as_ref(), "9.9.9.9").await.unwrap().is_none());
        assert!(filter.is_allowed("9.9.9.9", &policy).await.unwrap().allowed);
        assert_eq!(
            filter.is_allowed("198.51.100.1", &policy).await.unwrap().reason,
            Some(DenialCode::IpBlocked)
        );
        assert_eq!(filter.lists().blocked().await.unwrap(), vec!["198.51.100.1"]);
    }
}
