//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting → Drain connections → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup in `main`: config, store, engine, then listeners
//! - One broadcast channel stops every long-running task

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
