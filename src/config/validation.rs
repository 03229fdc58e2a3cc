//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, addresses parse)
//! - Detect conflicting routes
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ShieldConfig → Result<(), Vec<ValidationError>>
//! - Malformed CIDR list entries are not errors; they are logged when the
//!   route policy is resolved and never match

use std::collections::HashSet;
use std::net::SocketAddr;

use axum::http::Uri;
use thiserror::Error;

use crate::config::schema::{ShieldConfig, StoreBackend};
use crate::security::options::SecurityOptions;

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field}: invalid socket address {value:?}")]
    InvalidAddress { field: String, value: String },

    #[error("{field} must be greater than zero")]
    Zero { field: String },

    #[error("{field} must not be empty")]
    Empty { field: String },

    #[error("duplicate route {kind} {value:?}")]
    DuplicateRoute { kind: &'static str, value: String },

    #[error("route {route:?}: path prefix {prefix:?} must start with '/'")]
    InvalidPrefix { route: String, prefix: String },

    #[error("route {route:?}: upstream {upstream:?} must be an http:// URL with a host")]
    InvalidUpstream { route: String, upstream: String },

    #[error("store backend redis is not compiled in; rebuild with the `redis` feature")]
    RedisUnavailable,

    #[error("unknown log level {0:?}")]
    InvalidLogLevel(String),
}

/// Check a parsed configuration, collecting every problem.
pub fn validate_config(config: &ShieldConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_address(&mut errors, "listener.bind_address", &config.listener.bind_address);
    if let Some(tls) = &config.listener.tls {
        check_address(&mut errors, "listener.tls.bind_address", &tls.bind_address);
        check_non_empty(&mut errors, "listener.tls.cert_path", &tls.cert_path);
        check_non_empty(&mut errors, "listener.tls.key_path", &tls.key_path);
    }

    check_positive(&mut errors, "timeouts.request_secs", config.timeouts.request_secs);
    check_positive(&mut errors, "timeouts.connect_secs", config.timeouts.connect_secs);
    check_positive(&mut errors, "store.op_timeout_ms", config.store.op_timeout_ms);
    if config.store.backend == StoreBackend::Redis {
        check_non_empty(&mut errors, "store.redis_url", &config.store.redis_url);
        if !cfg!(feature = "redis") {
            errors.push(ValidationError::RedisUnavailable);
        }
    }

    check_options(&mut errors, "security.defaults", &config.security.defaults);

    let mut names = HashSet::new();
    let mut prefixes = HashSet::new();
    for (i, route) in config.routes.iter().enumerate() {
        if route.name.trim().is_empty() {
            errors.push(ValidationError::Empty {
                field: format!("routes[{}].name", i),
            });
        } else if !names.insert(route.name.as_str()) {
            errors.push(ValidationError::DuplicateRoute {
                kind: "name",
                value: route.name.clone(),
            });
        }

        if !route.path_prefix.starts_with('/') {
            errors.push(ValidationError::InvalidPrefix {
                route: route.name.clone(),
                prefix: route.path_prefix.clone(),
            });
        } else if !prefixes.insert(normalize_prefix(&route.path_prefix)) {
            errors.push(ValidationError::DuplicateRoute {
                kind: "path prefix",
                value: route.path_prefix.clone(),
            });
        }

        if !is_http_upstream(&route.upstream) {
            errors.push(ValidationError::InvalidUpstream {
                route: route.name.clone(),
                upstream: route.upstream.clone(),
            });
        }

        if let Some(options) = &route.security {
            check_options(&mut errors, &format!("routes[{}].security", i), options);
        }
    }

    if config.admin.enabled {
        check_address(&mut errors, "admin.bind_address", &config.admin.bind_address);
        check_non_empty(&mut errors, "admin.api_key", &config.admin.api_key);
    }

    if config.observability.metrics_enabled {
        check_address(
            &mut errors,
            "observability.metrics_address",
            &config.observability.metrics_address,
        );
    }
    if !LOG_LEVELS.contains(&config.observability.log_level.to_ascii_lowercase().as_str()) {
        errors.push(ValidationError::InvalidLogLevel(
            config.observability.log_level.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// `/api/` and `/api` mount the same routes.
pub fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

fn is_http_upstream(upstream: &str) -> bool {
    upstream
        .parse::<Uri>()
        .is_ok_and(|uri| uri.scheme_str() == Some("http") && uri.authority().is_some())
}

fn check_options(errors: &mut Vec<ValidationError>, field: &str, options: &SecurityOptions) {
    check_positive(errors, &format!("{}.max_request_size", field), options.max_request_size);
    if let Some(window) = options.custom_rate_limit {
        check_positive(errors, &format!("{}.custom_rate_limit.window_ms", field), window.window_ms);
        check_positive(
            errors,
            &format!("{}.custom_rate_limit.max_requests", field),
            window.max_requests,
        );
    }
}

fn check_address(errors: &mut Vec<ValidationError>, field: &str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field: field.to_string(),
            value: value.to_string(),
        });
    }
}

fn check_positive(errors: &mut Vec<ValidationError>, field: &str, value: u64) {
    if value == 0 {
        errors.push(ValidationError::Zero {
            field: field.to_string(),
        });
    }
}

fn check_non_empty(errors: &mut Vec<ValidationError>, field: &str, value: &str) {
    if value.trim().is_empty() {
        errors.push(ValidationError::Empty {
            field: field.to_string(),
        });
    }
}
