//! Worker loop — claims jobs, enforces attempt time limits, and applies
//! the per-kind retry policy.
//!
//! Each worker runs in bounded generations of `max_jobs_per_worker`
//! jobs; the generation boundary gives a periodic throughput log line
//! and a natural point to back off after job-store errors.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use vellum_common::PipelineError;
use vellum_config::WorkerConfig;

use crate::jobs::{Job, JobKind, JobStore, JobStoreError};
use crate::pipeline::DocumentProcessor;

/// Upper bound on a single retry delay, jitter excluded.
const MAX_BACKOFF_SECS: u64 = 900;
/// How often the terminal-job TTL sweep runs.
const PURGE_INTERVAL: Duration = Duration::from_secs(60);

/// Delay before the next attempt of a job that just failed attempt
/// number `attempts`.
///
/// Ingest jobs back off exponentially from the configured base with
/// ±10% jitter so a burst of failures does not retry in lockstep.
/// Delete jobs use a fixed delay; they are cheap and their failure mode
/// is almost always the store being down.
pub fn retry_delay_ms(kind: JobKind, attempts: u32, cfg: &WorkerConfig) -> i64 {
    match kind {
        JobKind::Ingest => {
            let exponent = attempts.saturating_sub(1).min(16);
            let secs = cfg
                .ingest_base_delay_secs
                .saturating_mul(1_u64 << exponent)
                .min(MAX_BACKOFF_SECS);
            let jitter = rand::thread_rng().gen_range(0.9..=1.1);
            ((secs * 1000) as f64 * jitter) as i64
        }
        JobKind::Delete => (cfg.delete_delay_secs * 1000) as i64,
    }
}

/// One claim-process-dispose cycle's outcome, for loop accounting.
#[derive(Debug, PartialEq, Eq)]
pub enum Processed {
    /// No runnable job was in the queue.
    Idle,
    /// A job was claimed and disposed (completed, requeued, or failed).
    Job,
}

pub struct Worker {
    id: usize,
    store: Arc<JobStore>,
    processor: Arc<dyn DocumentProcessor>,
    config: WorkerConfig,
}

impl Worker {
    pub fn new(
        id: usize,
        store: Arc<JobStore>,
        processor: Arc<dyn DocumentProcessor>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            id,
            store,
            processor,
            config,
        }
    }

    /// Claim and fully dispose of at most one job.
    pub async fn process_next(&self) -> Result<Processed, JobStoreError> {
        let Some(job) = self.store.claim_next()? else {
            return Ok(Processed::Idle);
        };
        info!(
            worker = self.id,
            job_id = %job.job_id,
            kind = ?job.kind,
            attempt = job.attempts,
            "job claimed"
        );

        let outcome = self.run_attempt(&job).await;
        match outcome {
            Ok(chunk_count) => {
                self.store.complete(&job.job_id, chunk_count)?;
                info!(worker = self.id, job_id = %job.job_id, ?chunk_count, "job succeeded");
            }
            Err(err) if err.is_retryable() && !job.attempts_exhausted() => {
                let delay_ms = retry_delay_ms(job.kind, job.attempts, &self.config);
                self.store.requeue(&job.job_id, &err.to_string(), delay_ms)?;
                warn!(
                    worker = self.id,
                    job_id = %job.job_id,
                    attempt = job.attempts,
                    delay_ms,
                    error = %err,
                    "attempt failed, retry scheduled"
                );
            }
            Err(err) => {
                self.store.fail(&job.job_id, &err.to_string())?;
                error!(
                    worker = self.id,
                    job_id = %job.job_id,
                    attempts = job.attempts,
                    error = %err,
                    "job failed terminally"
                );
            }
        }
        Ok(Processed::Job)
    }

    /// Run one attempt under the soft and hard time limits. Crossing
    /// the soft limit only logs; crossing the hard limit drops the
    /// attempt future, which releases its temp-file guards, and counts
    /// as a retryable failure.
    async fn run_attempt(&self, job: &Job) -> Result<Option<u32>, PipelineError> {
        let work = async {
            match job.kind {
                JobKind::Ingest => self.processor.ingest(job).await.map(Some),
                JobKind::Delete => self.processor.delete(&job.source).await.map(|()| None),
            }
        };

        let soft = Duration::from_secs(self.config.soft_time_limit_secs);
        let hard = Duration::from_secs(self.config.hard_time_limit_secs);
        let guarded = async {
            tokio::pin!(work);
            tokio::select! {
                result = &mut work => result,
                () = tokio::time::sleep(soft) => {
                    warn!(job_id = %job.job_id, limit_secs = soft.as_secs(), "soft time limit exceeded");
                    work.await
                }
            }
        };

        match tokio::time::timeout(hard, guarded).await {
            Ok(result) => result,
            Err(_) => Err(PipelineError::Other(anyhow::anyhow!(
                "hard time limit of {}s exceeded",
                hard.as_secs()
            ))),
        }
    }

    /// Run until `max_jobs_per_worker` jobs have been disposed, then
    /// return to the pool loop.
    async fn run_generation(&self) -> Result<(), JobStoreError> {
        let mut handled = 0_usize;
        while handled < self.config.max_jobs_per_worker {
            match self.process_next().await? {
                Processed::Job => handled += 1,
                Processed::Idle => {
                    tokio::time::sleep(Duration::from_millis(self.config.poll_interval_ms)).await;
                }
            }
        }
        info!(worker = self.id, jobs = handled, "worker generation complete");
        Ok(())
    }
}

/// Supervises the configured number of workers plus the TTL sweep.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn spawn(
        store: Arc<JobStore>,
        processor: Arc<dyn DocumentProcessor>,
        config: &WorkerConfig,
    ) -> Self {
        let mut handles = Vec::with_capacity(config.workers + 1);

        for id in 0..config.workers {
            let worker = Worker::new(id, store.clone(), processor.clone(), config.clone());
            handles.push(tokio::spawn(async move {
                loop {
                    if let Err(e) = worker.run_generation().await {
                        error!(worker = worker.id, error = %e, "worker loop hit store error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }));
        }

        let ttl_ms = (config.job_ttl_secs as i64).saturating_mul(1000);
        let sweep_store = store.clone();
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(PURGE_INTERVAL);
            loop {
                ticker.tick().await;
                match sweep_store.purge_terminal(ttl_ms) {
                    Ok(0) => {}
                    Ok(n) => info!(purged = n, "expired terminal jobs purged"),
                    Err(e) => warn!(error = %e, "terminal job purge failed"),
                }
            }
        }));

        Self { handles }
    }

    pub async fn join(self) {
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::JobState;
    use crate::models::SourceKind;
    use async_trait::async_trait;
    use serde_json::Map;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::TempDir;

    enum Script {
        Succeed(u32),
        FailRetryable,
        NoContent,
        Hang,
    }

    struct StubProcessor {
        script: Script,
        calls: AtomicU32,
    }

    impl StubProcessor {
        fn new(script: Script) -> Arc<Self> {
            Arc::new(Self {
                script,
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl DocumentProcessor for StubProcessor {
        async fn ingest(&self, _job: &Job) -> Result<u32, PipelineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.script {
                Script::Succeed(n) => Ok(n),
                Script::FailRetryable => {
                    Err(PipelineError::ConversionFailed("converter down".to_string()))
                }
                Script::NoContent => Err(PipelineError::NoContent),
                Script::Hang => {
                    std::future::pending::<()>().await;
                    unreachable!()
                }
            }
        }

        async fn delete(&self, _source: &str) -> Result<(), PipelineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn fast_config() -> WorkerConfig {
        WorkerConfig {
            ingest_base_delay_secs: 0,
            delete_delay_secs: 0,
            ..Default::default()
        }
    }

    fn setup(script: Script) -> (TempDir, Arc<JobStore>, Arc<StubProcessor>, Worker) {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(JobStore::open(temp.path()).unwrap());
        let processor = StubProcessor::new(script);
        let worker = Worker::new(0, store.clone(), processor.clone(), fast_config());
        (temp, store, processor, worker)
    }

    fn ingest_job(max_retries: u32) -> Job {
        Job::new_ingest("doc.pdf", SourceKind::File, Map::new(), max_retries)
    }

    #[test]
    fn ingest_backoff_doubles_with_attempts() {
        let cfg = WorkerConfig::default();
        for attempts in 1..=3_u32 {
            let expected = 60_000_i64 * (1 << (attempts - 1));
            let delay = retry_delay_ms(JobKind::Ingest, attempts, &cfg);
            let lo = expected * 9 / 10;
            let hi = expected * 11 / 10;
            assert!(
                (lo..=hi).contains(&delay),
                "attempt {attempts}: delay {delay} outside [{lo}, {hi}]"
            );
        }
    }

    #[test]
    fn ingest_backoff_is_capped() {
        let cfg = WorkerConfig::default();
        let delay = retry_delay_ms(JobKind::Ingest, 30, &cfg);
        assert!(delay <= (MAX_BACKOFF_SECS as i64) * 1000 * 11 / 10);
    }

    #[test]
    fn delete_delay_is_fixed_and_unjittered() {
        let cfg = WorkerConfig::default();
        assert_eq!(retry_delay_ms(JobKind::Delete, 1, &cfg), 30_000);
        assert_eq!(retry_delay_ms(JobKind::Delete, 2, &cfg), 30_000);
    }

    #[tokio::test]
    async fn successful_job_records_chunk_count() {
        let (_temp, store, processor, worker) = setup(Script::Succeed(12));
        let job = ingest_job(3);
        store.enqueue(&job).unwrap();

        assert_eq!(worker.process_next().await.unwrap(), Processed::Job);
        assert_eq!(processor.calls(), 1);

        let stored = store.get(&job.job_id).unwrap().unwrap();
        assert_eq!(stored.state, JobState::Succeeded);
        assert_eq!(stored.chunk_count, Some(12));
    }

    #[tokio::test]
    async fn retryable_failure_exhausts_then_fails() {
        let (_temp, store, processor, worker) = setup(Script::FailRetryable);
        let job = ingest_job(3);
        store.enqueue(&job).unwrap();

        // First attempt plus three retries.
        for _ in 0..4 {
            assert_eq!(worker.process_next().await.unwrap(), Processed::Job);
        }
        assert_eq!(processor.calls(), 4);

        let stored = store.get(&job.job_id).unwrap().unwrap();
        assert_eq!(stored.state, JobState::Failed);
        assert_eq!(stored.attempts, 4);
        assert!(stored.last_error.unwrap().contains("converter down"));

        // Terminal: nothing left to claim.
        assert_eq!(worker.process_next().await.unwrap(), Processed::Idle);
    }

    #[tokio::test]
    async fn no_content_is_terminal_on_first_attempt() {
        let (_temp, store, processor, worker) = setup(Script::NoContent);
        let job = ingest_job(3);
        store.enqueue(&job).unwrap();

        assert_eq!(worker.process_next().await.unwrap(), Processed::Job);
        assert_eq!(processor.calls(), 1, "no-content jobs must not be retried");

        let stored = store.get(&job.job_id).unwrap().unwrap();
        assert_eq!(stored.state, JobState::Failed);
    }

    #[tokio::test]
    async fn delete_job_is_dispatched_to_delete() {
        let (_temp, store, processor, worker) = setup(Script::Succeed(0));
        let job = Job::new_delete("doc.pdf", 2);
        store.enqueue(&job).unwrap();

        assert_eq!(worker.process_next().await.unwrap(), Processed::Job);
        assert_eq!(processor.calls(), 1);

        let stored = store.get(&job.job_id).unwrap().unwrap();
        assert_eq!(stored.state, JobState::Succeeded);
        assert_eq!(stored.chunk_count, None);
    }

    #[tokio::test(start_paused = true)]
    async fn hard_time_limit_aborts_and_requeues() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(JobStore::open(temp.path()).unwrap());
        let processor = StubProcessor::new(Script::Hang);
        let config = WorkerConfig {
            soft_time_limit_secs: 1,
            hard_time_limit_secs: 2,
            ingest_base_delay_secs: 0,
            ..Default::default()
        };
        let worker = Worker::new(0, store.clone(), processor.clone(), config);

        let job = ingest_job(3);
        store.enqueue(&job).unwrap();
        assert_eq!(worker.process_next().await.unwrap(), Processed::Job);

        let stored = store.get(&job.job_id).unwrap().unwrap();
        assert_eq!(stored.state, JobState::Pending, "timed-out attempt must be retried");
        assert!(stored.last_error.unwrap().contains("hard time limit"));
    }
}
