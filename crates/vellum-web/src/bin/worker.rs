//! Dedicated worker process.
//!
//! Runs the pool against the shared data directory without serving
//! HTTP; pair with an API process started with `worker.workers = 0`.

use std::path::Path;
use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use vellum_config::Settings;
use vellum_ingestion::jobs::JobStore;
use vellum_ingestion::pipeline::Pipeline;
use vellum_ingestion::worker::WorkerPool;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut settings = Settings::load()?;
    if settings.worker.workers == 0 {
        settings.worker.workers = 1;
    }
    info!(workers = settings.worker.workers, "starting vellum worker process");

    std::fs::create_dir_all(&settings.storage.shared_temp_dir)?;
    let store = Arc::new(JobStore::open(Path::new(&settings.storage.data_dir))?);
    let pipeline = Arc::new(Pipeline::from_settings(&settings)?);

    let pool = WorkerPool::spawn(store, pipeline, &settings.worker);
    pool.join().await;

    Ok(())
}
