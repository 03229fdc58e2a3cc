//! Security audit events.
//!
//! The decision engine emits exactly one event per request through an
//! [`AuditSink`]. The default sink writes tracing events under the
//! `request_shield::audit` target so they can be routed separately.

use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::security::context::ClientContext;
use crate::security::decision::DenialCode;
use crate::security::threats::ThreatKind;

pub const AUDIT_TARGET: &str = "request_shield::audit";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    Allowed,
    Denied,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub action: AuditAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<DenialCode>,
    pub route: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub threats: Vec<ThreatKind>,
    #[serde(flatten)]
    pub client: ClientContext,
}

impl AuditEvent {
    pub fn allowed(route: &str, client: &ClientContext) -> Self {
        Self {
            action: AuditAction::Allowed,
            code: None,
            route: route.to_string(),
            threats: Vec::new(),
            client: client.clone(),
        }
    }

    pub fn denied(route: &str, client: &ClientContext, code: DenialCode, threats: &[ThreatKind]) -> Self {
        Self {
            action: AuditAction::Denied,
            code: Some(code),
            route: route.to_string(),
            threats: threats.to_vec(),
            client: client.clone(),
        }
    }
}

/// Destination for audit events.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: &AuditEvent);
}

/// Writes audit events as tracing events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: &AuditEvent) {
        let c = &event.client;
        match event.action {
            AuditAction::Allowed => tracing::info!(
                target: AUDIT_TARGET,
                action = "ALLOWED",
                route = %event.route,
                ip = %c.ip,
                method = %c.method,
                path = %c.path,
                user_agent = %c.user_agent,
                timestamp = c.timestamp,
                "Request allowed"
            ),
            AuditAction::Denied => tracing::warn!(
                target: AUDIT_TARGET,
                action = "DENIED",
                code = event.code.map(|c| c.as_str()).unwrap_or_default(),
                threats = ?event.threats,
                route = %event.route,
                ip = %c.ip,
                method = %c.method,
                path = %c.path,
                user_agent = %c.user_agent,
                referer = %c.referer,
                origin = %c.origin,
                timestamp = c.timestamp,
                "Request denied"
            ),
        }
    }
}

/// Keeps events in memory for inspection in tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryAuditSink {
    events: Arc<Mutex<Vec<AuditEvent>>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().map(|events| events.clone()).unwrap_or_default()
    }

    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: &AuditEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}
