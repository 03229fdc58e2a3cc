//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → context.rs (caller IP, user agent, origin)
//!     → engine.rs preflight
//!         → HTTPS requirement, payload size
//!         → ip_filter.rs (static + dynamic lists, cidr.rs matching)
//!         → rate_limit.rs (fixed window counter, penalty.rs on violation)
//!     → body buffered by the HTTP middleware
//!     → engine.rs inspect
//!         → threats.rs + bot.rs (pattern and heuristic detectors)
//!         → penalty.rs temporary block on any finding
//!     → decision.rs (allow, or structured denial)
//! ```
//!
//! # Design Decisions
//! - Defense in depth: multiple layers of protection
//! - Route options are resolved once into a `RoutePolicy`
//! - No trust in client input

pub mod bot;
pub mod cidr;
pub mod context;
pub mod decision;
pub mod engine;
pub mod ip_filter;
pub mod options;
pub mod penalty;
pub mod rate_limit;
pub mod threats;

pub use context::ClientContext;
pub use decision::{Denial, DenialCode, Verdict};
pub use engine::{Cleared, EngineSettings, RequestHead, SecurityEngine};
pub use ip_filter::{ClientStanding, DynamicLists, IpReputationFilter};
pub use options::{FailurePolicies, FailurePolicy, RateWindow, RoutePolicy, SecurityOptions};
pub use threats::{ScanTarget, ThreatKind, ThreatScanner};
