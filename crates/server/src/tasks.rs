//! Periodic background tasks: liveness sweep and dataset reaper.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{error, info};

use elytra_catalog::DatasetCatalog;
use elytra_control::ConnectionRegistry;

/// Spawn the ping/pong sweep that evicts silent connections every `period`.
pub fn spawn_liveness_ticker(
    registry: Arc<ConnectionRegistry>,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            let evicted = registry.sweep();
            if !evicted.is_empty() {
                info!(evicted = evicted.len(), "liveness sweep evicted connections");
            }
        }
    })
}

/// Spawn the reaper that deletes datasets older than `max_age` every `period`.
pub fn spawn_dataset_reaper(
    catalog: Arc<DatasetCatalog>,
    period: Duration,
    max_age: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            match catalog.evict_older_than(max_age) {
                Ok((0, _)) => {}
                Ok((evicted, reclaimed_bytes)) => {
                    info!(evicted, reclaimed_bytes, "dataset reaper sweep complete");
                }
                Err(e) => error!(error = %e, "dataset reaper sweep failed"),
            }
        }
    })
}
