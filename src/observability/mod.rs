//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Security decision engine produces:
//!     → audit.rs (one ALLOWED / DENIED event per request)
//!     → metrics.rs (decision, threat and store-error counters)
//!     → logging.rs (structured tracing events from every stage)
//!
//! Consumers:
//!     → Log aggregation (stdout, pretty or JSON)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Audit events go through a sink trait so tests can capture them
//! - Metrics are cheap (atomic increments)

pub mod audit;
pub mod logging;
pub mod metrics;

pub use audit::{AuditEvent, AuditSink, MemoryAuditSink, TracingAuditSink};
