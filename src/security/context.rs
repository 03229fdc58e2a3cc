//! Client context extraction.
//!
//! # Responsibilities
//! - Resolve the caller IP from forwarding headers or the transport peer
//! - Capture user agent, referer, origin, method, path and arrival time
//!
//! # Design Decisions
//! - Extraction never fails; missing pieces degrade to placeholders
//! - The IP stays a string so unparseable header values are still matchable
//!   by the exact/prefix rules of the IP filter

use axum::extract::ConnectInfo;
use axum::http::{header, HeaderMap, Request};
use serde::Serialize;
use std::net::SocketAddr;
use std::time::{SystemTime, UNIX_EPOCH};

pub const X_FORWARDED_FOR: &str = "x-forwarded-for";
pub const X_REAL_IP: &str = "x-real-ip";

/// IP placeholder when nothing identifies the caller.
pub const UNKNOWN_IP: &str = "unknown";

/// User agent placeholder when the header is absent.
pub const UNKNOWN_USER_AGENT: &str = "Unknown";

/// Normalized description of the caller, built once per request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientContext {
    pub ip: String,
    pub user_agent: String,
    pub referer: String,
    pub origin: String,
    pub method: String,
    pub path: String,
    /// Arrival time in milliseconds since the Unix epoch.
    pub timestamp: u64,
}

impl ClientContext {
    /// Build the context for an incoming request.
    pub fn from_request<B>(request: &Request<B>) -> Self {
        let peer = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);

        Self::from_parts(
            request.headers(),
            peer,
            request.method().as_str(),
            request.uri().path(),
        )
    }

    pub fn from_parts(
        headers: &HeaderMap,
        peer: Option<SocketAddr>,
        method: &str,
        path: &str,
    ) -> Self {
        Self {
            ip: resolve_ip(headers, peer),
            user_agent: header_str(headers, header::USER_AGENT.as_str())
                .filter(|ua| !ua.is_empty())
                .unwrap_or(UNKNOWN_USER_AGENT)
                .to_string(),
            referer: header_str(headers, header::REFERER.as_str())
                .unwrap_or_default()
                .to_string(),
            origin: header_str(headers, header::ORIGIN.as_str())
                .unwrap_or_default()
                .to_string(),
            method: method.to_string(),
            path: path.to_string(),
            timestamp: now_millis(),
        }
    }
}

/// Forwarded-for (first hop), then real-IP, then the transport peer.
pub fn resolve_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    if let Some(first) = header_str(headers, X_FORWARDED_FOR)
        .and_then(|chain| chain.split(',').next())
        .map(str::trim)
        .filter(|hop| !hop.is_empty())
    {
        return first.to_string();
    }

    if let Some(real) = header_str(headers, X_REAL_IP)
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
    {
        return real.to_string();
    }

    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_IP.to_string())
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
