//! Security decision engine.
//!
//! # Data Flow
//! ```text
//! preflight (headers only):
//!     HTTPS requirement → payload size → IP reputation → rate limit
//! inspect (buffered body):
//!     threat scan → temporary block
//! ```
//!
//! The first failing check ends the pipeline. Every request produces exactly
//! one audit event: a denial in either phase, or `ALLOWED` once `inspect`
//! clears it.
//!
//! # Design Decisions
//! - The engine holds no per-request mutable state; everything shared
//!   lives in the store
//! - Store failures are resolved per stage by `FailurePolicies`
//! - `preflight` hands out a [`Cleared`] token that `inspect` consumes, so
//!   the body phase cannot run for a request the header phase rejected

use std::sync::Arc;
use std::time::Instant;

use axum::http::{HeaderMap, Uri};

use crate::observability::audit::{AuditEvent, AuditSink, TracingAuditSink};
use crate::observability::metrics;
use crate::security::context::ClientContext;
use crate::security::decision::{Denial, DenialCode, Verdict};
use crate::security::ip_filter::{DynamicLists, IpReputationFilter};
use crate::security::options::{FailurePolicies, FailurePolicy, RoutePolicy};
use crate::security::penalty::PenaltyEscalator;
use crate::security::rate_limit::RateLimiter;
use crate::security::threats::{ScanTarget, ThreatKind, ThreatScanner};
use crate::store::SharedStore;

/// Forwarded-protocol header set by TLS-terminating proxies.
pub const X_FORWARDED_PROTO: &str = "x-forwarded-proto";

/// Request line and headers, available before the body is read.
#[derive(Debug, Clone, Copy)]
pub struct RequestHead<'a> {
    pub uri: &'a Uri,
    pub headers: &'a HeaderMap,
    /// The request arrived over TLS.
    pub secure: bool,
}

impl RequestHead<'_> {
    fn is_https(&self) -> bool {
        self.secure
            || self
                .headers
                .get(X_FORWARDED_PROTO)
                .and_then(|v| v.to_str().ok())
                .is_some_and(|proto| proto.trim().eq_ignore_ascii_case("https"))
    }

    fn content_length(&self) -> Option<u64> {
        self.headers
            .get(axum::http::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok())
    }
}

/// Proof that a request passed the header phase.
#[derive(Debug)]
#[must_use = "a cleared request must be finished with `inspect` or `reject`"]
pub struct Cleared {
    started: Instant,
}

/// Engine construction parameters.
#[derive(Debug, Clone, Copy, Default)]
pub struct EngineSettings {
    pub failure: FailurePolicies,
    /// Penalty level at which the caller is added to the blocked list.
    pub penalty_block_level: Option<u64>,
}

/// Runs the ordered security pipeline.
#[derive(Clone)]
pub struct SecurityEngine {
    ip_filter: IpReputationFilter,
    rate_limiter: RateLimiter,
    scanner: Arc<ThreatScanner>,
    penalties: PenaltyEscalator,
    failure: FailurePolicies,
    audit: Arc<dyn AuditSink>,
}

impl SecurityEngine {
    pub fn new(store: Arc<dyn SharedStore>, settings: EngineSettings) -> Self {
        Self {
            ip_filter: IpReputationFilter::new(store.clone()),
            rate_limiter: RateLimiter::new(store.clone()),
            scanner: Arc::new(ThreatScanner::new()),
            penalties: PenaltyEscalator::new(store, settings.penalty_block_level),
            failure: settings.failure,
            audit: Arc::new(TracingAuditSink),
        }
    }

    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = sink;
        self
    }

    pub fn lists(&self) -> &DynamicLists {
        self.ip_filter.lists()
    }

    /// Header phase: HTTPS, size, IP reputation and rate limit.
    pub async fn preflight(
        &self,
        ctx: &ClientContext,
        head: &RequestHead<'_>,
        policy: &RoutePolicy,
    ) -> Result<Cleared, Denial> {
        let started = Instant::now();
        let opts = &policy.options;

        if opts.require_https && !head.is_https() {
            return Err(self.deny(started, ctx, policy, Denial::new(DenialCode::HttpsRequired), &[]));
        }

        if head.content_length().is_some_and(|len| len > opts.max_request_size) {
            return Err(self.deny(started, ctx, policy, Denial::new(DenialCode::RequestTooLarge), &[]));
        }

        match self.ip_filter.is_allowed(&ctx.ip, policy).await {
            Ok(check) => {
                if let Some(code) = check.reason {
                    return Err(self.deny(started, ctx, policy, Denial::new(code), &[]));
                }
            }
            Err(e) => {
                metrics::record_store_error("ip_filter");
                tracing::warn!(ip = %ctx.ip, route = %policy.route, error = %e, policy = ?self.failure.ip_filter, "IP reputation check degraded");
                if self.failure.ip_filter == FailurePolicy::FailClosed {
                    return Err(self.deny(started, ctx, policy, Denial::new(DenialCode::IpBlocked), &[]));
                }
            }
        }

        match self.rate_limiter.check_and_increment(&ctx.ip, policy).await {
            Ok(decision) if !decision.allowed => {
                self.escalate(&ctx.ip).await;
                let denial = Denial::new(DenialCode::RateLimitExceeded)
                    .with_retry_after(decision.retry_after_secs);
                return Err(self.deny(started, ctx, policy, denial, &[]));
            }
            Ok(_) => {}
            Err(e) => {
                metrics::record_store_error("rate_limit");
                tracing::warn!(ip = %ctx.ip, route = %policy.route, error = %e, policy = ?self.failure.rate_limit, "Rate limit check degraded");
                if self.failure.rate_limit == FailurePolicy::FailClosed {
                    let denial = Denial::new(DenialCode::RateLimitExceeded)
                        .with_retry_after(policy.window.window_secs());
                    return Err(self.deny(started, ctx, policy, denial, &[]));
                }
            }
        }

        Ok(Cleared { started })
    }

    /// Body phase: threat scan, then the final verdict.
    pub async fn inspect(
        &self,
        cleared: Cleared,
        ctx: &ClientContext,
        target: &ScanTarget<'_>,
        policy: &RoutePolicy,
    ) -> Verdict {
        if !policy.options.skip_threat_detection {
            let threats = self.scanner.scan(target, ctx);
            if !threats.is_empty() {
                metrics::record_threats(&threats);
                if let Err(e) = self.penalties.temp_block(&ctx.ip, &threats).await {
                    metrics::record_store_error("threat_scan");
                    tracing::error!(ip = %ctx.ip, threats = ?threats, error = %e, "Failed to persist temporary block");
                }
                let denial = Denial::new(DenialCode::ThreatDetected).with_threats(threats.clone());
                return Verdict::Deny(self.deny(cleared.started, ctx, policy, denial, &threats));
            }
        }

        self.audit.record(&AuditEvent::allowed(&policy.route, ctx));
        metrics::record_decision(None, cleared.started);
        Verdict::Allow
    }

    /// End a cleared request with a denial decided outside the engine,
    /// such as a body that overran the size limit while streaming.
    pub fn reject(&self, cleared: Cleared, ctx: &ClientContext, policy: &RoutePolicy, denial: Denial) -> Denial {
        self.deny(cleared.started, ctx, policy, denial, &[])
    }

    /// Both phases over a fully buffered request.
    pub async fn evaluate(
        &self,
        ctx: &ClientContext,
        head: &RequestHead<'_>,
        body: &[u8],
        policy: &RoutePolicy,
    ) -> Verdict {
        match self.preflight(ctx, head, policy).await {
            Ok(cleared) => {
                let target = ScanTarget {
                    uri: head.uri,
                    headers: head.headers,
                    body,
                };
                self.inspect(cleared, ctx, &target, policy).await
            }
            Err(denial) => Verdict::Deny(denial),
        }
    }

    async fn escalate(&self, ip: &str) {
        match self.penalties.escalate(ip).await {
            Ok(_) => metrics::record_penalty_escalation(),
            Err(e) => {
                metrics::record_store_error("penalty");
                tracing::warn!(ip = %ip, error = %e, "Penalty escalation failed");
            }
        }
    }

    fn deny(
        &self,
        started: Instant,
        ctx: &ClientContext,
        policy: &RoutePolicy,
        denial: Denial,
        threats: &[ThreatKind],
    ) -> Denial {
        self.audit
            .record(&AuditEvent::denied(&policy.route, ctx, denial.code, threats));
        metrics::record_decision(Some(denial.code), started);
        denial
    }
}
