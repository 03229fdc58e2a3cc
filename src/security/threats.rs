//! Pattern-based threat scanning.
//!
//! # Responsibilities
//! - Detect SQL injection and cross-site scripting in query, body and headers
//! - Detect path traversal in the path and query
//! - Flag scanning tools and bots by user agent and header heuristics
//!
//! # Design Decisions
//! - Patterns are compiled once and evaluated in a fixed order
//! - Detectors are independent; every finding is reported, not just the first
//! - Query parameters and headers are serialized as JSON before matching, so
//!   `key=value` syntax never reaches the `on*=` handler pattern

use axum::extract::Query;
use axum::http::{HeaderMap, Uri};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::security::bot::BotDetector;
use crate::security::context::ClientContext;

/// A tagged detection result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ThreatKind {
    SqlInjection,
    Xss,
    PathTraversal,
    SuspiciousUserAgent,
    BotDetected,
}

impl ThreatKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreatKind::SqlInjection => "SQL_INJECTION",
            ThreatKind::Xss => "XSS",
            ThreatKind::PathTraversal => "PATH_TRAVERSAL",
            ThreatKind::SuspiciousUserAgent => "SUSPICIOUS_USER_AGENT",
            ThreatKind::BotDetected => "BOT_DETECTED",
        }
    }
}

impl std::fmt::Display for ThreatKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

const SQL_INJECTION_PATTERNS: &[&str] = &[
    r"(?i)\b(SELECT|INSERT|UPDATE|DELETE|DROP|CREATE|ALTER|EXEC|UNION)\b",
    r"\b\d+\s*=\s*\d+\b",
    r"'|;|--|/\*|\*/",
    r"(?is)\bUNION\b.*\bSELECT\b",
];

const XSS_PATTERNS: &[&str] = &[
    r"(?is)<script[^>]*>.*?</script>",
    r"(?i)javascript:",
    r"(?i)\bon\w+\s*=",
    r"(?i)<(iframe|object|embed)\b",
];

const PATH_TRAVERSAL_PATTERNS: &[&str] = &[
    r"\.\./",
    r"\.\.\\",
    r"(?i)%2e%2e%2f",
    r"(?i)%2e%2e/",
    r"(?i)\.\.%2f",
    r"(?i)%2e%2e%5c",
    r"(?i)\.\.%5c",
];

const SCANNER_USER_AGENT_PATTERNS: &[&str] = &[
    r"(?i)sqlmap",
    r"(?i)nikto",
    r"(?i)nessus",
    r"(?i)burp",
    r"(?i)nmap",
    r"(?i)masscan",
    r"(?i)zap",
    r"(?i)curl",
    r"(?i)wget",
    r"(?i)python-requests",
];

/// Compile a static pattern list. Patterns that fail to compile are logged
/// and skipped.
pub(crate) fn compile(category: &str, patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|pattern| match Regex::new(pattern) {
            Ok(regex) => Some(regex),
            Err(e) => {
                tracing::error!(category, pattern = %pattern, error = %e, "Invalid detector pattern");
                None
            }
        })
        .collect()
}

fn any_hit(patterns: &[Regex], haystack: &str) -> bool {
    patterns.iter().any(|p| p.is_match(haystack))
}

/// The parts of a request the scanner looks at.
#[derive(Debug, Clone, Copy)]
pub struct ScanTarget<'a> {
    pub uri: &'a Uri,
    pub headers: &'a HeaderMap,
    pub body: &'a [u8],
}

impl ScanTarget<'_> {
    /// Query parameters as a JSON array of `[name, value]` pairs, decoded.
    fn query_json(&self) -> String {
        let Some(raw) = self.uri.query() else {
            return "[]".to_string();
        };
        match Query::<Vec<(String, String)>>::try_from_uri(self.uri) {
            Ok(Query(pairs)) => serde_json::to_string(&pairs).unwrap_or_default(),
            // Undecodable queries are matched as sent.
            Err(_) => serde_json::to_string(raw).unwrap_or_default(),
        }
    }

    /// Headers as a JSON object, repeated names joined with `, `.
    fn headers_json(&self) -> String {
        let mut map = serde_json::Map::new();
        for name in self.headers.keys() {
            let joined = self
                .headers
                .get_all(name)
                .iter()
                .filter_map(|v| v.to_str().ok())
                .collect::<Vec<_>>()
                .join(", ");
            map.insert(name.as_str().to_string(), serde_json::Value::String(joined));
        }
        serde_json::Value::Object(map).to_string()
    }

    fn body_text(&self) -> String {
        String::from_utf8_lossy(self.body).into_owned()
    }
}

/// Runs every detector against a request.
#[derive(Debug, Clone)]
pub struct ThreatScanner {
    sql_injection: Vec<Regex>,
    xss: Vec<Regex>,
    path_traversal: Vec<Regex>,
    scanner_agents: Vec<Regex>,
    bots: BotDetector,
}

impl Default for ThreatScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreatScanner {
    pub fn new() -> Self {
        Self {
            sql_injection: compile("sql_injection", SQL_INJECTION_PATTERNS),
            xss: compile("xss", XSS_PATTERNS),
            path_traversal: compile("path_traversal", PATH_TRAVERSAL_PATTERNS),
            scanner_agents: compile("scanner_user_agent", SCANNER_USER_AGENT_PATTERNS),
            bots: BotDetector::new(),
        }
    }

    /// All findings for the request, in detector order.
    pub fn scan(&self, target: &ScanTarget<'_>, ctx: &ClientContext) -> Vec<ThreatKind> {
        let query = target.query_json();
        let body = target.body_text();
        let mut findings = Vec::new();

        if self.detect_sql_injection(&query, &body) {
            findings.push(ThreatKind::SqlInjection);
        }
        if self.detect_xss(&query, &body, &target.headers_json()) {
            findings.push(ThreatKind::Xss);
        }
        if self.detect_path_traversal(target.uri.path(), &query) {
            findings.push(ThreatKind::PathTraversal);
        }
        if self.is_scanner_user_agent(&ctx.user_agent) {
            findings.push(ThreatKind::SuspiciousUserAgent);
        }
        let bot = self.bots.assess(&ctx.user_agent, target.headers);
        if bot.is_bot() {
            tracing::debug!(ip = %ctx.ip, score = bot.score, known = bot.known_bot, indicators = ?bot.indicators, "Bot heuristics tripped");
            findings.push(ThreatKind::BotDetected);
        }

        findings
    }

    pub fn detect_sql_injection(&self, query: &str, body: &str) -> bool {
        any_hit(&self.sql_injection, query) || any_hit(&self.sql_injection, body)
    }

    pub fn detect_xss(&self, query: &str, body: &str, headers: &str) -> bool {
        [query, body, headers]
            .iter()
            .any(|haystack| any_hit(&self.xss, haystack))
    }

    pub fn detect_path_traversal(&self, path: &str, query: &str) -> bool {
        any_hit(&self.path_traversal, &format!("{}{}", path, query))
    }

    pub fn is_scanner_user_agent(&self, user_agent: &str) -> bool {
        any_hit(&self.scanner_agents, user_agent)
    }
}
