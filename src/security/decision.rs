//! Verdicts and the denial response shape.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::security::threats::ThreatKind;

/// Why a request was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DenialCode {
    HttpsRequired,
    RequestTooLarge,
    IpBlocked,
    IpNotWhitelisted,
    RateLimitExceeded,
    ThreatDetected,
}

impl DenialCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenialCode::HttpsRequired => "HTTPS_REQUIRED",
            DenialCode::RequestTooLarge => "REQUEST_TOO_LARGE",
            DenialCode::IpBlocked => "IP_BLOCKED",
            DenialCode::IpNotWhitelisted => "IP_NOT_WHITELISTED",
            DenialCode::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            DenialCode::ThreatDetected => "THREAT_DETECTED",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            DenialCode::RequestTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            DenialCode::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            _ => StatusCode::FORBIDDEN,
        }
    }

    fn default_message(&self) -> &'static str {
        match self {
            DenialCode::HttpsRequired => "HTTPS is required for this endpoint",
            DenialCode::RequestTooLarge => "Request entity too large",
            DenialCode::IpBlocked => "Access denied: IP address is blocked",
            DenialCode::IpNotWhitelisted => "Access denied: IP address is not whitelisted",
            DenialCode::RateLimitExceeded => "Too many requests, please try again later",
            DenialCode::ThreatDetected => "Request blocked: suspicious activity detected",
        }
    }
}

impl std::fmt::Display for DenialCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A structured denial. Serializes to the response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Denial {
    pub success: bool,
    pub message: String,
    pub code: DenialCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threats: Option<Vec<ThreatKind>>,
}

impl Denial {
    pub fn new(code: DenialCode) -> Self {
        Self {
            success: false,
            message: code.default_message().to_string(),
            code,
            retry_after: None,
            threats: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn with_retry_after(mut self, secs: u64) -> Self {
        self.retry_after = Some(secs);
        self
    }

    pub fn with_threats(mut self, threats: Vec<ThreatKind>) -> Self {
        self.threats = Some(threats);
        self
    }
}

impl IntoResponse for Denial {
    fn into_response(self) -> Response {
        let status = self.code.status();
        let retry_after = self.retry_after;
        let mut response = (status, Json(self)).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

/// Terminal state of the decision pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Deny(Denial),
}

impl Verdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Verdict::Allow)
    }

    pub fn denial(&self) -> Option<&Denial> {
        match self {
            Verdict::Allow => None,
            Verdict::Deny(denial) => Some(denial),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_denial_body_shape() {
        let denial = Denial::new(DenialCode::ThreatDetected)
            .with_threats(vec![ThreatKind::SqlInjection, ThreatKind::BotDetected]);
        let body = serde_json::to_value(&denial).unwrap();
        assert_eq!(body["success"], false);
        assert_eq!(body["code"], "THREAT_DETECTED");
        assert_eq!(body["threats"], serde_json::json!(["SQL_INJECTION", "BOT_DETECTED"]));
        assert!(body.get("retryAfter").is_none());
    }

    #[test]
    fn test_rate_limit_response_headers() {
        let response = Denial::new(DenialCode::RateLimitExceeded)
            .with_retry_after(900)
            .into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "900");
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(DenialCode::RequestTooLarge.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(DenialCode::RateLimitExceeded.status(), StatusCode::TOO_MANY_REQUESTS);
        for code in [
            DenialCode::HttpsRequired,
            DenialCode::IpBlocked,
            DenialCode::IpNotWhitelisted,
            DenialCode::ThreatDetected,
        ] {
            assert_eq!(code.status(), StatusCode::FORBIDDEN, "{code}");
        }
    }
}
