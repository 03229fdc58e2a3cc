//! request-shield: adaptive request-security gateway
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ──────────────▶ http server ──▶ route table (by path prefix)
//!                                          │
//!                                          ▼
//!                                 security middleware
//!                       HTTPS ▸ size ▸ IP reputation ▸ rate limit
//!                       ▸ body buffering ▸ threat scan ▸ bot score
//!                                          │
//!                          denied ◀────────┴────────▶ allowed
//!                     (JSON 4xx, audit,              forward to
//!                      penalty/temp block)            upstream
//!
//!     Shared store (memory | redis): dynamic IP lists, rate windows,
//!     penalty levels and temporary blocks.
//! ```
//!
//! Startup order: config, logging, metrics, store, engine, listeners.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;

use request_shield::admin::setup_admin_router;
use request_shield::config::{load_or_default, ConfigWatcher, StoreBackend, StoreConfig};
use request_shield::http::GatewayError;
use request_shield::lifecycle::{shutdown, signals, Shutdown};
use request_shield::observability::{logging, metrics};
use request_shield::security::{EngineSettings, SecurityEngine};
use request_shield::store::{MemoryStore, SharedStore, TimeoutStore};
use request_shield::GatewayServer;

#[derive(Parser)]
#[command(name = "request-shield")]
#[command(about = "Adaptive request-security gateway", long_about = None)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "shield.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = load_or_default(&args.config)?;

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), config = %args.config.display(), "request-shield starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let shutdown = Shutdown::new();
    let store = open_store(&config.store, &shutdown).await?;

    let engine = SecurityEngine::new(
        store,
        EngineSettings {
            failure: config.security.failure,
            penalty_block_level: config.security.penalty_lockout(),
        },
    );

    let bind_address = config.listener.bind_address.clone();
    let listener = TcpListener::bind(&bind_address)
        .await
        .map_err(|source| GatewayError::Bind {
            addr: bind_address.clone(),
            source,
        })?;
    tracing::info!(address = %listener.local_addr()?, routes = config.routes.len(), "Listening for connections");

    let (watcher, config_updates) = ConfigWatcher::new(&args.config);
    let _watcher = match watcher.run() {
        Ok(w) => Some(w),
        Err(e) => {
            tracing::warn!(error = %e, "Config hot reload disabled");
            None
        }
    };

    let admin = config.admin.clone();
    let server = GatewayServer::new(config, engine);

    if admin.enabled {
        let admin_listener = TcpListener::bind(&admin.bind_address)
            .await
            .map_err(|source| GatewayError::Bind {
                addr: admin.bind_address.clone(),
                source,
            })?;
        let app = setup_admin_router(server.state().clone());
        let admin_shutdown = shutdown.subscribe();
        tokio::spawn(async move {
            tracing::info!(address = %admin.bind_address, "Admin API starting");
            if let Err(e) = axum::serve(admin_listener, app)
                .with_graceful_shutdown(shutdown::wait(admin_shutdown))
                .await
            {
                tracing::error!(error = %e, "Admin API failed");
            }
        });
    }

    tokio::spawn(signals::shutdown_on_signal(shutdown.clone()));

    server.run(listener, config_updates, shutdown.subscribe()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn open_store(
    config: &StoreConfig,
    shutdown: &Shutdown,
) -> Result<Arc<dyn SharedStore>, Box<dyn std::error::Error>> {
    let backend: Arc<dyn SharedStore> = match config.backend {
        StoreBackend::Memory => {
            let store = MemoryStore::new();
            if config.sweep_interval_secs > 0 {
                store.spawn_sweeper(
                    Duration::from_secs(config.sweep_interval_secs),
                    shutdown.subscribe(),
                );
            }
            Arc::new(store)
        }
        #[cfg(feature = "redis")]
        StoreBackend::Redis => {
            Arc::new(request_shield::store::RedisStore::connect(&config.redis_url).await?)
        }
        #[cfg(not(feature = "redis"))]
        StoreBackend::Redis => {
            return Err("store backend redis requires the `redis` feature".into());
        }
    };
    tracing::info!(backend = ?config.backend, op_timeout_ms = config.op_timeout_ms, "Shared store ready");

    Ok(Arc::new(TimeoutStore::new(
        backend,
        Duration::from_millis(config.op_timeout_ms),
    )))
}
