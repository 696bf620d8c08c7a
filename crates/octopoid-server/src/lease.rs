//! Lease coordinator: server-side housekeeping loop.
//!
//! Two scans per pass, both idempotent:
//! 1. Tasks whose lease is overdue are returned to their re-entry queue.
//!    Contention with a concurrent submit is benign (the submit's version
//!    guard wins or loses cleanly).
//! 2. Orchestrators that have not heartbeated within the offline window are
//!    marked offline. Their claimed tasks are reached by scan 1 naturally.

use std::time::Duration;

use anyhow::Result;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

use octopoid_db::queries::orchestrators;

use crate::transitions::Transitions;

/// Coordinator timing configuration.
#[derive(Debug, Clone)]
pub struct LeaseCoordinatorConfig {
    /// How often the scans run.
    pub interval: Duration,
    /// Heartbeat age after which an orchestrator is considered offline.
    pub offline_window: Duration,
}

impl Default for LeaseCoordinatorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            offline_window: Duration::from_secs(300),
        }
    }
}

/// Run one coordinator pass: expire overdue leases, then mark stale
/// orchestrators offline. Returns `(expired_tasks, offlined_orchestrators)`.
pub async fn run_pass(pool: &PgPool, config: &LeaseCoordinatorConfig) -> Result<(usize, usize)> {
    let expired = Transitions::expire_overdue(pool).await?;

    let offlined =
        orchestrators::mark_stale_offline(pool, config.offline_window.as_secs() as i64).await?;
    for orch in &offlined {
        tracing::warn!(
            orchestrator = %orch.id,
            last_heartbeat_at = %orch.last_heartbeat_at,
            "orchestrator marked offline"
        );
    }

    Ok((expired.len(), offlined.len()))
}

/// Run the coordinator until cancelled. A failed pass is logged and retried
/// on the next interval; it never takes the server down.
pub async fn run_coordinator(
    pool: PgPool,
    config: LeaseCoordinatorConfig,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(config.interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match run_pass(&pool, &config).await {
                    Ok((expired, offlined)) => {
                        if expired > 0 || offlined > 0 {
                            tracing::info!(expired, offlined, "lease coordinator pass");
                        }
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "lease coordinator pass failed");
                    }
                }
            }
            _ = cancel.cancelled() => {
                tracing::info!("lease coordinator shutting down");
                return;
            }
        }
    }
}
