//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (Axum setup, request ID, timeout, trace)
//!     → route table lookup by path prefix (hot-swappable)
//!     → middleware/security.rs (decision engine)
//!     → forward.rs (upstream request, streamed response)
//!     → Send to client
//! ```

pub mod forward;
pub mod middleware;
pub mod server;

pub use server::{AppState, GatewayError, GatewayServer};

/// How the connection reached the gateway. Inserted by the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Plain,
    Tls,
}
