//! Adaptive request-security gateway library

pub mod admin;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod security;
pub mod store;

pub use config::schema::ShieldConfig;
pub use http::GatewayServer;
pub use lifecycle::Shutdown;
pub use security::SecurityEngine;
