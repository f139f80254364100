//! Background sweep that ends abandoned `waiting` sessions.

use std::sync::Arc;

use tokio::sync::broadcast;

use handoff_core::config::MaintenanceConfig;
use handoff_core::Clock;

use super::lifecycle::SessionManager;

/// Run one sweep. Returns the number of sessions ended.
pub async fn run_maintenance_cycle(
    manager: &SessionManager,
    clock: &dyn Clock,
    config: &MaintenanceConfig,
) -> handoff_core::Result<usize> {
    let timeout_ms = (config.waiting_timeout_minutes * 60 * 1000) as i64;
    let before = clock.now_millis() - timeout_ms;
    manager.expire_waiting(before).await
}

pub async fn run_maintenance_loop(
    manager: Arc<SessionManager>,
    clock: Arc<dyn Clock>,
    config: MaintenanceConfig,
    mut shutdown: broadcast::Receiver<()>,
) {
    let interval = tokio::time::Duration::from_secs(config.interval_secs.max(1));
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    tracing::info!(
        interval_secs = config.interval_secs,
        waiting_timeout_minutes = config.waiting_timeout_minutes,
        "Maintenance loop started"
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match run_maintenance_cycle(&manager, clock.as_ref(), &config).await {
                    Ok(0) => tracing::debug!("Maintenance cycle: nothing to expire"),
                    Ok(n) => tracing::info!(expired = n, "Maintenance cycle ended stale waiting sessions"),
                    Err(e) => tracing::error!(error = %e, "Maintenance cycle failed"),
                }
            }
            _ = shutdown.recv() => {
                tracing::info!("Maintenance loop shutting down");
                break;
            }
        }
    }
}
