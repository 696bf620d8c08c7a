//! The octopoid server: HTTP API, state machine core, and lease coordinator.
//!
//! The server is the single source of truth for queue membership. Queue
//! transitions only happen through the lifecycle endpoints, which route
//! through [`transitions::Transitions`]; raw updates to `queue` are
//! rejected at the API layer.

pub mod error;
pub mod lease;
pub mod routes;
pub mod transitions;

use std::net::SocketAddr;

use anyhow::Result;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

/// Server behaviour knobs.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Default lease window handed out on claim, in seconds.
    pub lease_seconds: i64,
    /// Rejections after which a task routes to `failed` instead of
    /// returning to `incoming`.
    pub rejection_budget: i32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            lease_seconds: 900,
            rejection_budget: 3,
        }
    }
}

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: ServerConfig,
}

/// Serve the API and the lease coordinator until ctrl-c.
pub async fn run_serve(
    pool: PgPool,
    config: ServerConfig,
    coordinator: lease::LeaseCoordinatorConfig,
    bind: &str,
    port: u16,
) -> Result<()> {
    let cancel = CancellationToken::new();

    let coordinator_handle = tokio::spawn(lease::run_coordinator(
        pool.clone(),
        coordinator,
        cancel.clone(),
    ));

    let app = routes::build_router(AppState { pool, config });
    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    tracing::info!("octopoid serve listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    cancel.cancel();
    let _ = coordinator_handle.await;
    tracing::info!("octopoid serve shut down");
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install Ctrl+C handler");
}
