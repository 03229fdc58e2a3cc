use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::schema::StoreBackend;
use crate::http::server::AppState;
use crate::security::cidr::IpRule;
use crate::security::ip_filter::{ClientStanding, DEFAULT_LIST_TTL};
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum AdminError {
    #[error("invalid list entry {0:?}: expected an IP address or CIDR range")]
    InvalidEntry(String),

    #[error("entry {0:?} is not in the list")]
    NotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let status = match &self {
            AdminError::InvalidEntry(_) => StatusCode::BAD_REQUEST,
            AdminError::NotFound(_) => StatusCode::NOT_FOUND,
            AdminError::Store(e) => {
                tracing::error!(error = %e, "Admin request failed on store");
                StatusCode::SERVICE_UNAVAILABLE
            }
        };
        (
            status,
            Json(serde_json::json!({ "success": false, "message": self.to_string() })),
        )
            .into_response()
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub uptime_secs: u64,
    pub routes: Vec<String>,
    pub store_backend: StoreBackend,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListEntry {
    pub entry: String,
    /// Minimum lifetime of the list; a year when omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_secs: Option<u64>,
}

#[derive(Serialize)]
pub struct ListResponse {
    pub entries: Vec<String>,
}

pub async fn get_status(State(state): State<AppState>) -> Json<SystemStatus> {
    let inner = state.inner.load();
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        uptime_secs: state.started_at.elapsed().as_secs(),
        routes: inner.mounted.clone(),
        store_backend: inner.config.store.backend,
    })
}

pub async fn list_blocked(State(state): State<AppState>) -> Result<Json<ListResponse>, AdminError> {
    let entries = state.engine.lists().blocked().await?;
    Ok(Json(ListResponse { entries }))
}

pub async fn add_blocked(
    State(state): State<AppState>,
    Json(body): Json<ListEntry>,
) -> Result<(StatusCode, Json<ListEntry>), AdminError> {
    let entry = validate_entry(&body.entry)?;
    state.engine.lists().block(&entry, entry_ttl(body.ttl_secs)).await?;
    tracing::info!(entry = %entry, "Entry added to blocked list");
    Ok((StatusCode::CREATED, Json(ListEntry { entry, ttl_secs: body.ttl_secs })))
}

pub async fn remove_blocked(
    State(state): State<AppState>,
    Path(entry): Path<String>,
) -> Result<StatusCode, AdminError> {
    if state.engine.lists().unblock(&entry).await? {
        tracing::info!(entry = %entry, "Entry removed from blocked list");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AdminError::NotFound(entry))
    }
}

pub async fn list_allowed(State(state): State<AppState>) -> Result<Json<ListResponse>, AdminError> {
    let entries = state.engine.lists().allowed().await?;
    Ok(Json(ListResponse { entries }))
}

pub async fn add_allowed(
    State(state): State<AppState>,
    Json(body): Json<ListEntry>,
) -> Result<(StatusCode, Json<ListEntry>), AdminError> {
    let entry = validate_entry(&body.entry)?;
    state.engine.lists().allow(&entry, entry_ttl(body.ttl_secs)).await?;
    tracing::info!(entry = %entry, "Entry added to allowed list");
    Ok((StatusCode::CREATED, Json(ListEntry { entry, ttl_secs: body.ttl_secs })))
}

pub async fn remove_allowed(
    State(state): State<AppState>,
    Path(entry): Path<String>,
) -> Result<StatusCode, AdminError> {
    if state.engine.lists().disallow(&entry).await? {
        tracing::info!(entry = %entry, "Entry removed from allowed list");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AdminError::NotFound(entry))
    }
}

pub async fn inspect_client(
    State(state): State<AppState>,
    Path(ip): Path<String>,
) -> Result<Json<ClientStanding>, AdminError> {
    Ok(Json(state.engine.lists().inspect(&ip).await?))
}

/// Accept a single address or a well-formed CIDR range.
fn validate_entry(raw: &str) -> Result<String, AdminError> {
    let entry = raw.trim();
    match IpRule::parse(entry) {
        IpRule::Range(_) => Ok(entry.to_string()),
        IpRule::Literal(ip) if ip.parse::<std::net::IpAddr>().is_ok() => Ok(ip),
        _ => Err(AdminError::InvalidEntry(raw.to_string())),
    }
}

fn entry_ttl(ttl_secs: Option<u64>) -> Duration {
    ttl_secs
        .filter(|secs| *secs > 0)
        .map_or(DEFAULT_LIST_TTL, Duration::from_secs)
}
