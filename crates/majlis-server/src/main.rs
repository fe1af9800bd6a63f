//! # majlis-server
//!
//! HTTP front end for the Majlis room economy.
//!
//! This binary provides:
//! - **REST API** (axum) over every seat, gift, wallet and moderation
//!   operation, with the caller identified by the `x-user-uid` header
//! - **Server-sent events** streaming room and profile snapshots
//! - **Admin API** behind a bearer token for platform tooling
//! - **Credit worker** settling recipient coin credits after each gift,
//!   resuming from the persisted outbox on startup

mod api;
mod config;
mod error;

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use majlis_core::{run_credit_worker, CreditQueue, EconomyConfig, Majlis, RetryPolicy};
use majlis_shared::SystemClock;
use majlis_store::{DocumentStore, MemoryStore, SqliteStore};

use crate::api::AppState;
use crate::config::{ServerConfig, StoreBackend};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                EnvFilter::new("info,majlis_server=debug,majlis_core=debug")
            }),
        )
        .init();

    info!("Starting Majlis server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(
        instance = %config.instance_name,
        addr = %config.http_addr,
        backend = ?config.backend,
        admin_enabled = config.admin_token.is_some(),
        "Loaded configuration"
    );

    // -----------------------------------------------------------------------
    // 3. Open the document store
    // -----------------------------------------------------------------------
    match config.backend.clone() {
        StoreBackend::Memory => {
            warn!("Using the in-memory store; all data is lost on exit");
            let store = MemoryStore::with_transaction_attempts(config.tx_max_attempts);
            serve_with(Arc::new(store), config).await
        }
        StoreBackend::Sqlite(path) => {
            let store = match path {
                Some(path) => SqliteStore::open_at(&path)?,
                None => SqliteStore::new()?,
            }
            .with_transaction_attempts(config.tx_max_attempts);
            info!(path = ?store.path(), "Opened SQLite store");
            serve_with(Arc::new(store), config).await
        }
    }
}

async fn serve_with<S: DocumentStore + 'static>(
    store: Arc<S>,
    config: ServerConfig,
) -> anyhow::Result<()> {
    let economy = EconomyConfig {
        max_accounts_per_device: config.max_accounts_per_device,
        ..EconomyConfig::default()
    };
    let majlis = Majlis::with_config(store, SystemClock, economy);

    // -----------------------------------------------------------------------
    // 4. Spawn the credit worker
    // -----------------------------------------------------------------------
    let (credits, rx) = CreditQueue::channel();
    let worker = tokio::spawn(run_credit_worker(
        majlis.clone(),
        rx,
        RetryPolicy::default(),
    ));

    // -----------------------------------------------------------------------
    // 5. Run the HTTP API server (blocks until shutdown)
    // -----------------------------------------------------------------------
    let http_addr = config.http_addr;
    let app_state = AppState::new(majlis, credits, config);

    let result = tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(ref e) = result {
                tracing::error!(error = %e, "HTTP server failed");
            }
            result
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
            Ok(())
        }
    };

    // The router (and with it the last queue sender) is gone, so the worker
    // drains what is left and exits. Anything unsettled stays in the outbox.
    if tokio::time::timeout(Duration::from_secs(5), worker)
        .await
        .is_err()
    {
        warn!("Credit worker did not finish in time; unsettled credits stay in the outbox");
    }

    result
}
