//! Automated-client heuristics.
//!
//! A user agent naming a known crawler or automation framework is flagged
//! outright. Otherwise requests are scored: each missing browser trait adds
//! one point, each proxy or header anomaly adds half a point, and a total of
//! [`BOT_SCORE_THRESHOLD`] or more flags the request.

use axum::http::{header, HeaderMap};
use regex::Regex;

use crate::security::context::X_FORWARDED_FOR;
use crate::security::threats::compile;

pub const BOT_SCORE_THRESHOLD: f32 = 3.0;

const BEHAVIOR_WEIGHT: f32 = 1.0;
const HEADER_WEIGHT: f32 = 0.5;

/// More forwarded hops than this is treated as a proxy chain.
const MAX_FORWARDED_HOPS: usize = 5;

const KNOWN_BOT_PATTERNS: &[&str] = &[
    r"(?i)googlebot",
    r"(?i)bingbot",
    r"(?i)slurp",
    r"(?i)duckduckbot",
    r"(?i)baiduspider",
    r"(?i)yandexbot",
    r"(?i)facebookexternalhit",
    r"(?i)bot",
    r"(?i)crawler",
    r"(?i)spider",
    r"(?i)scraper",
    r"(?i)headlesschrome",
    r"(?i)phantomjs",
    r"(?i)selenium",
    r"(?i)puppeteer",
    r"(?i)playwright",
];

const BROWSER_ENGINES: &[&str] = &["Chrome", "Firefox", "Safari", "Edge"];

/// Score breakdown for one request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BotAssessment {
    pub known_bot: bool,
    pub score: f32,
    /// Names of the indicators that fired.
    pub indicators: Vec<&'static str>,
}

impl BotAssessment {
    pub fn is_bot(&self) -> bool {
        self.known_bot || self.score >= BOT_SCORE_THRESHOLD
    }

    fn add(&mut self, fired: bool, weight: f32, name: &'static str) {
        if fired {
            self.score += weight;
            self.indicators.push(name);
        }
    }
}

#[derive(Debug, Clone)]
pub struct BotDetector {
    known: Vec<Regex>,
}

impl Default for BotDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl BotDetector {
    pub fn new() -> Self {
        Self {
            known: compile("known_bot", KNOWN_BOT_PATTERNS),
        }
    }

    pub fn assess(&self, user_agent: &str, headers: &HeaderMap) -> BotAssessment {
        let mut assessment = BotAssessment::default();
        if self.known.iter().any(|p| p.is_match(user_agent)) {
            assessment.known_bot = true;
            assessment.indicators.push("known_bot_user_agent");
            return assessment;
        }

        let has = |name: &str| headers.contains_key(name);
        let accept_len = headers
            .get(header::ACCEPT)
            .and_then(|v| v.to_str().ok())
            .map_or(0, str::len);

        assessment.add(accept_len < 3, BEHAVIOR_WEIGHT, "missing_accept");
        assessment.add(!has(header::ACCEPT_LANGUAGE.as_str()), BEHAVIOR_WEIGHT, "missing_accept_language");
        assessment.add(!has(header::ACCEPT_ENCODING.as_str()), BEHAVIOR_WEIGHT, "missing_accept_encoding");
        assessment.add(
            user_agent.len() < 10 || user_agent.len() > 500,
            BEHAVIOR_WEIGHT,
            "user_agent_length",
        );
        assessment.add(!has(header::CONNECTION.as_str()), BEHAVIOR_WEIGHT, "missing_connection");
        assessment.add(!has(header::CACHE_CONTROL.as_str()), BEHAVIOR_WEIGHT, "missing_cache_control");
        assessment.add(is_generic_user_agent(user_agent), BEHAVIOR_WEIGHT, "generic_user_agent");

        let hops = headers
            .get(X_FORWARDED_FOR)
            .and_then(|v| v.to_str().ok())
            .map_or(0, |chain| chain.split(',').count());
        assessment.add(hops > MAX_FORWARDED_HOPS, HEADER_WEIGHT, "long_forwarded_chain");
        assessment.add(has(header::VIA.as_str()), HEADER_WEIGHT, "via_header");
        assessment.add(!has("sec-fetch-site"), HEADER_WEIGHT, "missing_sec_fetch_site");
        assessment.add(!has("sec-fetch-mode"), HEADER_WEIGHT, "missing_sec_fetch_mode");
        assessment.add(has("x-real-ip"), HEADER_WEIGHT, "real_ip_header");

        assessment
    }
}

fn is_generic_user_agent(user_agent: &str) -> bool {
    if user_agent == "Mozilla/5.0" {
        return true;
    }
    !user_agent.contains("Mozilla") && !BROWSER_ENGINES.iter().any(|e| user_agent.contains(e))
}
