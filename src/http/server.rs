//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router with health, request ID, timeout and trace layers
//! - Mount each configured route behind the security middleware
//! - Rebuild and atomically swap the route table on config reload
//! - Serve plain HTTP and, when configured, a TLS listener
//!
//! # Design Decisions
//! - The outer router is fixed; a fallback dispatches into the current
//!   route table so reloads never restart listeners
//! - Route options are resolved into a `RoutePolicy` once per table build
//! - Listener, store and failure-policy changes apply on restart

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode, Uri},
    middleware,
    response::{IntoResponse, Response},
    routing::{any, get},
    Extension, Json, Router,
};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower::ServiceExt;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::schema::ShieldConfig;
use crate::config::validation::normalize_prefix;
use crate::http::forward::{build_client, forward, HttpClient, Upstream};
use crate::http::middleware::{security_middleware, RouteGuard};
use crate::http::Transport;
use crate::lifecycle::shutdown;
use crate::security::{RoutePolicy, SecurityEngine};

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TLS configuration: {0}")]
    Tls(#[source] std::io::Error),

    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),
}

/// Configuration and the route table built from it. Swapped as a unit.
pub struct GatewayInner {
    pub config: ShieldConfig,
    pub routes: Router,
    /// Names of the mounted routes.
    pub mounted: Vec<String>,
}

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub inner: Arc<ArcSwap<GatewayInner>>,
    pub engine: SecurityEngine,
    pub client: HttpClient,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: ShieldConfig, engine: SecurityEngine) -> Self {
        let client = build_client(Duration::from_secs(config.timeouts.connect_secs));
        let inner = build_inner(config, &engine, &client);
        Self {
            inner: Arc::new(ArcSwap::from_pointee(inner)),
            engine,
            client,
            started_at: Instant::now(),
        }
    }

    /// Rebuild the route table from `config` and swap it in.
    pub fn reload(&self, config: ShieldConfig) {
        let inner = build_inner(config, &self.engine, &self.client);
        tracing::info!(routes = ?inner.mounted, "Route table reloaded");
        self.inner.store(Arc::new(inner));
    }
}

fn build_inner(config: ShieldConfig, engine: &SecurityEngine, client: &HttpClient) -> GatewayInner {
    let (routes, mounted) = build_routes(&config, engine, client);
    GatewayInner {
        config,
        routes,
        mounted,
    }
}

/// Mount every configured route under its prefix.
pub fn build_routes(
    config: &ShieldConfig,
    engine: &SecurityEngine,
    client: &HttpClient,
) -> (Router, Vec<String>) {
    let mut router = Router::new();
    let mut mounted = Vec::new();

    for route in &config.routes {
        let base = match route.upstream.parse::<Uri>() {
            Ok(uri) => uri,
            Err(e) => {
                tracing::error!(route = %route.name, upstream = %route.upstream, error = %e, "Skipping route with invalid upstream");
                continue;
            }
        };

        let options = route
            .security
            .clone()
            .unwrap_or_else(|| config.security.defaults.clone());
        let guard = RouteGuard {
            engine: engine.clone(),
            policy: Arc::new(RoutePolicy::resolve(route.name.clone(), options)),
        };
        let upstream = Upstream::new(&route.name, base, client.clone());

        let prefix = normalize_prefix(&route.path_prefix);
        let wildcard = if prefix == "/" {
            "/{*rest}".to_string()
        } else {
            format!("{}/{{*rest}}", prefix)
        };

        let mut mount = Router::new()
            .route(&wildcard, any(forward))
            .route(&prefix, any(forward));
        // The catch-all does not match an empty tail.
        if prefix != "/" {
            mount = mount.route(&format!("{}/", prefix), any(forward));
        }
        let mount = mount
            .route_layer(middleware::from_fn_with_state(guard, security_middleware))
            .with_state(upstream);

        tracing::info!(route = %route.name, prefix = %prefix, upstream = %route.upstream, "Route mounted");
        router = router.merge(mount);
        mounted.push(route.name.clone());
    }

    (router.fallback(no_route), mounted)
}

async fn no_route() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({ "success": false, "message": "No matching route" })),
    )
        .into_response()
}

async fn healthz() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Hand the request to the current route table.
async fn dispatch(State(state): State<AppState>, request: Request<Body>) -> Response {
    let routes = state.inner.load().routes.clone();
    match routes.oneshot(request).await {
        Ok(response) => response,
        Err(never) => match never {},
    }
}

/// HTTP server for the security gateway.
pub struct GatewayServer {
    state: AppState,
}

impl GatewayServer {
    pub fn new(config: ShieldConfig, engine: SecurityEngine) -> Self {
        Self {
            state: AppState::new(config, engine),
        }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    pub fn router(&self, transport: Transport) -> Router {
        let request_secs = self.state.inner.load().config.timeouts.request_secs;
        Router::new()
            .route("/healthz", get(healthz))
            .fallback(dispatch)
            .with_state(self.state.clone())
            .layer(Extension(transport))
            .layer(TimeoutLayer::new(Duration::from_secs(request_secs)))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    /// Serve until `shutdown` fires, applying config updates as they arrive.
    pub async fn run(
        self,
        listener: TcpListener,
        mut config_updates: mpsc::UnboundedReceiver<ShieldConfig>,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<(), GatewayError> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let reload_state = self.state.clone();
        tokio::spawn(async move {
            while let Some(config) = config_updates.recv().await {
                reload_state.reload(config);
            }
        });

        let tls = self.state.inner.load().config.listener.tls.clone();
        if let Some(tls) = tls {
            let tls_addr: SocketAddr = tls.bind_address.parse().map_err(|_| GatewayError::Bind {
                addr: tls.bind_address.clone(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "invalid socket address"),
            })?;
            let rustls = axum_server::tls_rustls::RustlsConfig::from_pem_file(&tls.cert_path, &tls.key_path)
                .await
                .map_err(GatewayError::Tls)?;

            let handle = axum_server::Handle::new();
            let tls_app = self.router(Transport::Tls);
            let stop = handle.clone();
            let tls_shutdown = shutdown.resubscribe();
            tokio::spawn(async move {
                shutdown::wait(tls_shutdown).await;
                stop.graceful_shutdown(Some(Duration::from_secs(10)));
            });
            tokio::spawn(async move {
                tracing::info!(address = %tls_addr, "TLS listener starting");
                if let Err(e) = axum_server::bind_rustls(tls_addr, rustls)
                    .handle(handle)
                    .serve(tls_app.into_make_service_with_connect_info::<SocketAddr>())
                    .await
                {
                    tracing::error!(address = %tls_addr, error = %e, "TLS listener failed");
                }
            });
        }

        let app = self.router(Transport::Plain);
        axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(shutdown::wait(shutdown))
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}
