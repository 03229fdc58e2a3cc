//! Per-route security options.
//!
//! Options are plain data read from configuration. `RoutePolicy::resolve`
//! parses the IP rules once when a route is mounted; the request path only
//! ever sees the resolved, immutable policy.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::security::cidr::IpRule;

/// Default request budget window: 15 minutes.
pub const DEFAULT_WINDOW_MS: u64 = 15 * 60 * 1000;

/// Default requests per window.
pub const DEFAULT_MAX_REQUESTS: u64 = 1000;

/// Default request body ceiling: 10 MiB.
pub const DEFAULT_MAX_REQUEST_SIZE: u64 = 10 * 1024 * 1024;

/// A fixed-window request budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct RateWindow {
    /// Window length in milliseconds.
    pub window_ms: u64,
    /// Requests admitted per window.
    pub max_requests: u64,
}

impl RateWindow {
    /// Window length rounded up to whole seconds.
    pub fn window_secs(&self) -> u64 {
        self.window_ms.div_ceil(1000)
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.window_secs().max(1))
    }

    /// Index of the window containing `now_ms`.
    pub fn index_at(&self, now_ms: u64) -> u64 {
        now_ms / self.window_ms.max(1)
    }
}

impl Default for RateWindow {
    fn default() -> Self {
        Self {
            window_ms: DEFAULT_WINDOW_MS,
            max_requests: DEFAULT_MAX_REQUESTS,
        }
    }
}

/// Security options attached to a route.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityOptions {
    pub skip_rate_limit: bool,
    pub skip_ip_filter: bool,
    pub skip_threat_detection: bool,
    /// Overrides the default 15 minute / 1000 request budget.
    pub custom_rate_limit: Option<RateWindow>,
    /// Bare IPs, IP prefixes or `network/prefix` CIDR ranges.
    pub allowed_ips: Vec<String>,
    pub blocked_ips: Vec<String>,
    pub require_https: bool,
    /// Byte ceiling checked against `Content-Length`.
    pub max_request_size: u64,
}

impl Default for SecurityOptions {
    fn default() -> Self {
        Self {
            skip_rate_limit: false,
            skip_ip_filter: false,
            skip_threat_detection: false,
            custom_rate_limit: None,
            allowed_ips: Vec::new(),
            blocked_ips: Vec::new(),
            require_https: false,
            max_request_size: DEFAULT_MAX_REQUEST_SIZE,
        }
    }
}

/// What a stage does when the shared store cannot be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Let the request through and log the degraded check.
    FailOpen,
    /// Deny the request.
    FailClosed,
}

/// Store-failure policy per pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct FailurePolicies {
    pub ip_filter: FailurePolicy,
    pub rate_limit: FailurePolicy,
}

impl Default for FailurePolicies {
    fn default() -> Self {
        Self {
            ip_filter: FailurePolicy::FailClosed,
            rate_limit: FailurePolicy::FailOpen,
        }
    }
}

/// Options resolved at route registration.
#[derive(Debug, Clone)]
pub struct RoutePolicy {
    /// Route name, used in logs and metrics.
    pub route: String,
    pub options: SecurityOptions,
    pub allowed: Vec<IpRule>,
    pub blocked: Vec<IpRule>,
    pub window: RateWindow,
}

impl RoutePolicy {
    pub fn resolve(route: impl Into<String>, options: SecurityOptions) -> Self {
        let route = route.into();
        let allowed = parse_rules(&route, "allowed_ips", &options.allowed_ips);
        let blocked = parse_rules(&route, "blocked_ips", &options.blocked_ips);
        let window = options.custom_rate_limit.unwrap_or_default();
        Self {
            route,
            options,
            allowed,
            blocked,
            window,
        }
    }
}

fn parse_rules(route: &str, list: &str, entries: &[String]) -> Vec<IpRule> {
    entries
        .iter()
        .map(|entry| {
            let rule = IpRule::parse(entry);
            if let IpRule::Malformed(raw) = &rule {
                tracing::warn!(route = %route, list, entry = %raw, "Malformed CIDR entry will never match");
            }
            rule
        })
        .collect()
}
