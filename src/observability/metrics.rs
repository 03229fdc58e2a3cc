//! Metrics collection and exposition.
//!
//! # Metrics
//! - `shield_decisions_total` (counter): verdicts by `action` and `code`
//! - `shield_threats_total` (counter): findings by `kind`
//! - `shield_store_errors_total` (counter): degraded store calls by `stage`
//! - `shield_penalty_escalations_total` (counter)
//! - `shield_decision_duration_seconds` (histogram): pipeline latency
//!
//! Without an installed recorder every call here is a no-op, so library
//! users and tests pay nothing.

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

use crate::security::decision::DenialCode;
use crate::security::threats::ThreatKind;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_decision(code: Option<DenialCode>, started: Instant) {
    let (action, code) = match code {
        Some(code) => ("denied", code.as_str()),
        None => ("allowed", "NONE"),
    };
    metrics::counter!("shield_decisions_total", "action" => action, "code" => code).increment(1);
    metrics::histogram!("shield_decision_duration_seconds").record(started.elapsed().as_secs_f64());
}

pub fn record_threats(threats: &[ThreatKind]) {
    for threat in threats {
        metrics::counter!("shield_threats_total", "kind" => threat.as_str()).increment(1);
    }
}

pub fn record_store_error(stage: &'static str) {
    metrics::counter!("shield_store_errors_total", "stage" => stage).increment(1);
}

pub fn record_penalty_escalation() {
    metrics::counter!("shield_penalty_escalations_total").increment(1);
}
