use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use elytra_catalog::DatasetCatalog;
use elytra_common::ServerConfig;
use elytra_server::{build_router, build_state, tasks};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = ServerConfig::from_env();
    std::fs::create_dir_all(&config.data_root)?;

    let catalog = Arc::new(DatasetCatalog::new(&config.data_root));
    let restored = catalog.restore_from_disk()?;

    let state = build_state(Arc::clone(&catalog), config.job_deadline);
    tasks::spawn_liveness_ticker(Arc::clone(&state.registry), config.liveness_period);
    tasks::spawn_dataset_reaper(
        Arc::clone(&catalog),
        config.reaper_period,
        config.dataset_max_age,
    );

    let listener = TcpListener::bind(&config.bind).await?;
    info!(
        bind = %config.bind,
        data_root = %config.data_root.display(),
        restored_datasets = restored,
        dataset_max_age_secs = config.dataset_max_age.as_secs(),
        reaper_period_secs = config.reaper_period.as_secs(),
        liveness_period_secs = config.liveness_period.as_secs(),
        job_deadline_secs = config.job_deadline.map(|d| d.as_secs()).unwrap_or(0),
        storage_credentials = config.storage_access_key_id.is_some()
            && config.storage_secret_access_key.is_some(),
        "elytra control plane listening"
    );

    axum::serve(listener, build_router(state)).await?;
    Ok(())
}
