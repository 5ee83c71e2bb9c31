//! End-to-end queue flow: jobs enqueued through the store, claimed and
//! disposed by a worker running the real pipeline. External services
//! are unreachable here, so these paths exercise retry accounting and
//! cleanup; the ignored test at the bottom runs the happy path against
//! live services.

use std::sync::Arc;

use serde_json::Map;

use vellum_config::{Settings, WorkerConfig};
use vellum_ingestion::jobs::{Job, JobState, JobStore};
use vellum_ingestion::models::SourceKind;
use vellum_ingestion::pipeline::Pipeline;
use vellum_ingestion::worker::{Processed, Worker};

fn offline_settings(shared_dir: &std::path::Path) -> Settings {
    let mut settings = Settings::default();
    settings.storage.shared_temp_dir = shared_dir.to_string_lossy().to_string();
    settings.converter.url = "http://127.0.0.1:1".to_string();
    settings.embedding.base_url = "http://127.0.0.1:1".to_string();
    settings.qdrant.url = "http://127.0.0.1:1".to_string();
    settings
}

fn no_delay_config() -> WorkerConfig {
    WorkerConfig {
        ingest_base_delay_secs: 0,
        delete_delay_secs: 0,
        ..Default::default()
    }
}

#[tokio::test]
async fn ingest_job_exhausts_retries_and_cleans_up() {
    let shared = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();
    let upload = shared.path().join("report.pdf");
    std::fs::write(&upload, b"%PDF-1.4").unwrap();

    let store = Arc::new(JobStore::open(data.path()).unwrap());
    let pipeline = Arc::new(Pipeline::from_settings(&offline_settings(shared.path())).unwrap());
    let worker = Worker::new(0, store.clone(), pipeline, no_delay_config());

    let job = Job::new_ingest(
        upload.to_string_lossy().to_string(),
        SourceKind::File,
        Map::new(),
        1,
    );
    store.enqueue(&job).unwrap();

    // First attempt plus one retry.
    assert_eq!(worker.process_next().await.unwrap(), Processed::Job);
    assert!(
        !upload.exists(),
        "first failing attempt must already remove the upload"
    );
    assert_eq!(worker.process_next().await.unwrap(), Processed::Job);
    assert_eq!(worker.process_next().await.unwrap(), Processed::Idle);

    let stored = store.get(&job.job_id).unwrap().unwrap();
    assert_eq!(stored.state, JobState::Failed);
    assert_eq!(stored.attempts, 2);
    // Second attempt re-resolves the source, which is gone by then.
    assert!(stored.last_error.unwrap().contains("file not found"));
}

#[tokio::test]
async fn delete_job_fails_terminally_when_store_is_down() {
    let shared = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();

    let store = Arc::new(JobStore::open(data.path()).unwrap());
    let pipeline = Arc::new(Pipeline::from_settings(&offline_settings(shared.path())).unwrap());
    let worker = Worker::new(0, store.clone(), pipeline, no_delay_config());

    let job = Job::new_delete("https://example.com/gone.pdf", 2);
    store.enqueue(&job).unwrap();

    for _ in 0..3 {
        assert_eq!(worker.process_next().await.unwrap(), Processed::Job);
    }

    let stored = store.get(&job.job_id).unwrap().unwrap();
    assert_eq!(stored.state, JobState::Failed);
    assert_eq!(stored.attempts, 3);
}

#[tokio::test]
#[ignore = "Hits live converter, embedder, and Qdrant services"]
async fn ingest_url_end_to_end_against_live_services() {
    let data = tempfile::tempdir().unwrap();
    let settings = Settings::default();

    let store = Arc::new(JobStore::open(data.path()).unwrap());
    let pipeline = Arc::new(Pipeline::from_settings(&settings).unwrap());
    let worker = Worker::new(0, store.clone(), pipeline, settings.worker.clone());

    let job = Job::new_ingest(
        "https://www.rfc-editor.org/rfc/rfc2616.txt".to_string(),
        SourceKind::Url,
        Map::new(),
        0,
    );
    store.enqueue(&job).unwrap();
    assert_eq!(worker.process_next().await.unwrap(), Processed::Job);

    let stored = store.get(&job.job_id).unwrap().unwrap();
    assert_eq!(stored.state, JobState::Succeeded);
    assert!(stored.chunk_count.unwrap() > 0);
}
