//! Vellum API server.
//!
//! Run with: cargo run -p vellum-web
//!
//! Serves the HTTP front door and, when `worker.workers > 0`, an
//! in-process worker pool. For separate scaling run the API with
//! `workers = 0` and start `cargo run -p vellum-web --bin worker`
//! processes against the same data directory.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use vellum_config::Settings;
use vellum_ingestion::pipeline::Pipeline;
use vellum_ingestion::worker::WorkerPool;
use vellum_web::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = Settings::load()?;
    info!(
        qdrant = %settings.qdrant.url,
        converter = %settings.converter.url,
        workers = settings.worker.workers,
        "starting vellum api server"
    );

    let state = Arc::new(AppState::new(settings.clone())?);
    state.store.ensure_collection().await?;

    let _pool = if settings.worker.workers > 0 {
        let pipeline = Arc::new(Pipeline::from_settings(&settings)?);
        Some(WorkerPool::spawn(
            state.jobs.clone(),
            pipeline,
            &settings.worker,
        ))
    } else {
        info!("in-process workers disabled, run the worker bin separately");
        None
    };

    let app = vellum_web::router::build_router(state);

    let addr: SocketAddr = format!("{}:{}", settings.api.host, settings.api.port).parse()?;
    info!(%addr, "server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
