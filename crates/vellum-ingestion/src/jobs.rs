//! Durable job queue — LMDB-backed persistence for ingestion and
//! deletion jobs.
//!
//! A claim flips a job from `Pending` to `Running` inside a single
//! write transaction, so a claimed job is invisible to every other
//! worker until it is completed, requeued, or failed. Retries keep the
//! same job ID and increment the attempt count.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use heed::types::{Bytes, Str};
use heed::{Database, Env, EnvOpenOptions};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::models::SourceKind;

const JOB_ENV_MAP_SIZE_BYTES: usize = 1 << 28; // 256 MiB

/// Lifecycle state of a pipeline job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending   => "pending",
            JobState::Running   => "running",
            JobState::Succeeded => "succeeded",
            JobState::Failed    => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Ingest,
    Delete,
}

/// One queued unit of pipeline work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub kind: JobKind,
    pub source: String,
    pub source_kind: SourceKind,
    /// Caller-supplied metadata attached to every stored chunk.
    pub metadata: Map<String, Value>,
    pub state: JobState,
    /// Attempts started so far; incremented on claim.
    pub attempts: u32,
    pub max_retries: u32,
    pub last_error: Option<String>,
    /// Result summary for succeeded ingest jobs.
    pub chunk_count: Option<u32>,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
    /// Earliest wall-clock time the next attempt may be claimed.
    pub next_attempt_at_ms: Option<i64>,
}

impl Job {
    pub fn new_ingest(
        source: impl Into<String>,
        source_kind: SourceKind,
        metadata: Map<String, Value>,
        max_retries: u32,
    ) -> Self {
        Self::new(JobKind::Ingest, source.into(), source_kind, metadata, max_retries)
    }

    pub fn new_delete(source: impl Into<String>, max_retries: u32) -> Self {
        Self::new(
            JobKind::Delete,
            source.into(),
            // Deletion is keyed by the stored source value; the kind is
            // irrelevant and never resolved.
            SourceKind::Url,
            Map::new(),
            max_retries,
        )
    }

    fn new(
        kind: JobKind,
        source: String,
        source_kind: SourceKind,
        metadata: Map<String, Value>,
        max_retries: u32,
    ) -> Self {
        let now_ms = current_timestamp_ms();
        Self {
            job_id: Uuid::new_v4().to_string(),
            kind,
            source,
            source_kind,
            metadata,
            state: JobState::Pending,
            attempts: 0,
            max_retries,
            last_error: None,
            chunk_count: None,
            created_at_ms: now_ms,
            updated_at_ms: now_ms,
            next_attempt_at_ms: None,
        }
    }

    /// Total attempts allowed: the first one plus `max_retries`.
    pub fn attempts_exhausted(&self) -> bool {
        self.attempts >= self.max_retries + 1
    }
}

pub(crate) fn current_timestamp_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[derive(Debug, Error)]
pub enum JobStoreError {
    #[error(transparent)]
    Heed(#[from] heed::Error),
    // Jobs carry arbitrary JSON metadata, so the record codec is JSON;
    // a binary serde codec cannot round-trip `serde_json::Value`.
    #[error(transparent)]
    Codec(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("job `{0}` already exists")]
    Duplicate(String),
    #[error("job `{0}` not found")]
    NotFound(String),
}

/// LMDB-backed persistence for pipeline jobs.
#[derive(Debug)]
pub struct JobStore {
    env: Env,
    jobs: Database<Str, Bytes>,
}

impl JobStore {
    pub fn open(data_dir: &Path) -> Result<Self, JobStoreError> {
        let path = data_dir.join("jobs");
        std::fs::create_dir_all(&path)?;

        let mut options = EnvOpenOptions::new();
        options.max_dbs(4);
        options.map_size(JOB_ENV_MAP_SIZE_BYTES);
        let env = unsafe {
            // SAFETY: LMDB requires callers to uphold environment lifetime invariants.
            options.open(&path)?
        };
        let jobs = {
            let rtxn = env.read_txn()?;
            let opened = env.open_database::<Str, Bytes>(&rtxn, Some("jobs"))?;
            drop(rtxn);
            match opened {
                Some(existing) => existing,
                None => {
                    let mut wtxn = env.write_txn()?;
                    let db = env.create_database::<Str, Bytes>(&mut wtxn, Some("jobs"))?;
                    wtxn.commit()?;
                    db
                }
            }
        };
        Ok(Self { env, jobs })
    }

    pub fn enqueue(&self, job: &Job) -> Result<(), JobStoreError> {
        debug_assert!(job.state == JobState::Pending);
        let mut wtxn = self.env.write_txn()?;
        if self.jobs.get(&wtxn, job.job_id.as_str())?.is_some() {
            return Err(JobStoreError::Duplicate(job.job_id.clone()));
        }
        let encoded = serde_json::to_vec(job)?;
        self.jobs.put(&mut wtxn, job.job_id.as_str(), encoded.as_slice())?;
        wtxn.commit()?;
        Ok(())
    }

    pub fn get(&self, job_id: &str) -> Result<Option<Job>, JobStoreError> {
        let rtxn = self.env.read_txn()?;
        let value = self.jobs.get(&rtxn, job_id)?;
        if let Some(raw) = value {
            let job: Job = serde_json::from_slice(raw)?;
            Ok(Some(job))
        } else {
            Ok(None)
        }
    }

    /// Claim the next runnable job: the oldest `Pending` job whose
    /// retry schedule allows it. The pending→running transition and the
    /// attempt increment happen in one write transaction, so no two
    /// workers can claim the same attempt.
    pub fn claim_next(&self) -> Result<Option<Job>, JobStoreError> {
        let now_ms = current_timestamp_ms();
        let mut wtxn = self.env.write_txn()?;

        let mut candidate: Option<Job> = None;
        {
            let iter = self.jobs.iter(&wtxn)?;
            for entry in iter {
                let (_, raw) = entry?;
                let job: Job = serde_json::from_slice(raw)?;
                if job.state != JobState::Pending {
                    continue;
                }
                if let Some(at) = job.next_attempt_at_ms {
                    if at > now_ms {
                        continue;
                    }
                }
                match candidate {
                    Some(ref best) if best.created_at_ms <= job.created_at_ms => {}
                    _ => candidate = Some(job),
                }
            }
        }

        let Some(mut job) = candidate else {
            return Ok(None);
        };
        job.state = JobState::Running;
        job.attempts = job.attempts.saturating_add(1);
        job.updated_at_ms = now_ms;
        job.next_attempt_at_ms = None;

        let encoded = serde_json::to_vec(&job)?;
        self.jobs.put(&mut wtxn, job.job_id.as_str(), encoded.as_slice())?;
        wtxn.commit()?;
        Ok(Some(job))
    }

    /// Record a successful attempt.
    pub fn complete(&self, job_id: &str, chunk_count: Option<u32>) -> Result<Job, JobStoreError> {
        self.update(job_id, |job| {
            job.state = JobState::Succeeded;
            job.chunk_count = chunk_count;
            job.last_error = None;
        })
    }

    /// Record a terminal failure.
    pub fn fail(&self, job_id: &str, error: &str) -> Result<Job, JobStoreError> {
        self.update(job_id, |job| {
            job.state = JobState::Failed;
            job.last_error = Some(error.to_string());
        })
    }

    /// Put a failed attempt back in the queue, scheduled `delay_ms`
    /// from now. The job ID and accumulated attempt count survive.
    pub fn requeue(&self, job_id: &str, error: &str, delay_ms: i64) -> Result<Job, JobStoreError> {
        self.update(job_id, |job| {
            job.state = JobState::Pending;
            job.last_error = Some(error.to_string());
            job.next_attempt_at_ms = Some(current_timestamp_ms() + delay_ms);
        })
    }

    fn update(
        &self,
        job_id: &str,
        mutate: impl FnOnce(&mut Job),
    ) -> Result<Job, JobStoreError> {
        let mut wtxn = self.env.write_txn()?;
        let existing = self.jobs.get(&wtxn, job_id)?;
        let Some(raw) = existing else {
            return Err(JobStoreError::NotFound(job_id.to_string()));
        };
        let mut job: Job = serde_json::from_slice(raw)?;
        mutate(&mut job);
        job.updated_at_ms = current_timestamp_ms();
        let encoded = serde_json::to_vec(&job)?;
        self.jobs.put(&mut wtxn, job_id, encoded.as_slice())?;
        wtxn.commit()?;
        Ok(job)
    }

    /// TTL sweep: remove terminal jobs whose last update is older than
    /// the threshold. Returns how many were purged.
    pub fn purge_terminal(&self, ttl_ms: i64) -> Result<usize, JobStoreError> {
        let cutoff_ms = current_timestamp_ms().saturating_sub(ttl_ms);
        let mut wtxn = self.env.write_txn()?;

        let mut expired = Vec::new();
        {
            let iter = self.jobs.iter(&wtxn)?;
            for entry in iter {
                let (key, raw) = entry?;
                let job: Job = serde_json::from_slice(raw)?;
                if job.state.is_terminal() && job.updated_at_ms <= cutoff_ms {
                    expired.push(key.to_string());
                }
            }
        }
        for key in &expired {
            self.jobs.delete(&mut wtxn, key.as_str())?;
        }
        wtxn.commit()?;
        Ok(expired.len())
    }

    pub fn count_by_state(&self, state: JobState) -> Result<usize, JobStoreError> {
        let rtxn = self.env.read_txn()?;
        let iter = self.jobs.iter(&rtxn)?;
        let mut count = 0_usize;
        for entry in iter {
            let (_, raw) = entry?;
            let job: Job = serde_json::from_slice(raw)?;
            if job.state == state {
                count = count.saturating_add(1);
            }
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_store() -> (TempDir, JobStore) {
        let temp = TempDir::new().expect("temp dir");
        let store = JobStore::open(temp.path()).expect("open store");
        (temp, store)
    }

    #[test]
    fn new_ingest_job_sets_defaults() {
        let job = Job::new_ingest("https://example.com/a.pdf", SourceKind::Url, Map::new(), 3);
        assert_eq!(job.kind, JobKind::Ingest);
        assert_eq!(job.state, JobState::Pending);
        assert_eq!(job.attempts, 0);
        assert_eq!(job.max_retries, 3);
        assert!(job.chunk_count.is_none());
        assert!(job.next_attempt_at_ms.is_none());
        assert!(!job.attempts_exhausted());
    }

    #[test]
    fn enqueue_rejects_duplicate_ids() {
        let (_temp, store) = open_store();
        let job = Job::new_ingest("doc.pdf", SourceKind::File, Map::new(), 3);
        store.enqueue(&job).expect("initial enqueue succeeds");
        let err = store.enqueue(&job).expect_err("duplicate enqueue fails");
        assert!(matches!(err, JobStoreError::Duplicate(_)));
    }

    #[test]
    fn claim_transitions_and_hides_the_job() {
        let (_temp, store) = open_store();
        let job = Job::new_ingest("doc.pdf", SourceKind::File, Map::new(), 3);
        store.enqueue(&job).unwrap();

        let claimed = store.claim_next().unwrap().expect("job claimable");
        assert_eq!(claimed.job_id, job.job_id);
        assert_eq!(claimed.state, JobState::Running);
        assert_eq!(claimed.attempts, 1);

        // Claimed job must be invisible to other claimants.
        assert!(store.claim_next().unwrap().is_none());
    }

    #[test]
    fn requeue_keeps_id_and_respects_schedule() {
        let (_temp, store) = open_store();
        let job = Job::new_ingest("doc.pdf", SourceKind::File, Map::new(), 3);
        store.enqueue(&job).unwrap();
        store.claim_next().unwrap().unwrap();

        // Scheduled far in the future: not claimable yet.
        store.requeue(&job.job_id, "transient", 60_000).unwrap();
        assert!(store.claim_next().unwrap().is_none());

        // Reschedule immediately: claimable, same ID, attempts grow.
        store.requeue(&job.job_id, "transient", 0).unwrap();
        let again = store.claim_next().unwrap().expect("claimable after delay");
        assert_eq!(again.job_id, job.job_id);
        assert_eq!(again.attempts, 2);
        assert_eq!(again.last_error.as_deref(), Some("transient"));
    }

    #[test]
    fn complete_and_fail_are_terminal() {
        let (_temp, store) = open_store();
        let ok = Job::new_ingest("a.pdf", SourceKind::File, Map::new(), 3);
        let bad = Job::new_ingest("b.pdf", SourceKind::File, Map::new(), 3);
        store.enqueue(&ok).unwrap();
        store.enqueue(&bad).unwrap();
        store.claim_next().unwrap().unwrap();
        store.claim_next().unwrap().unwrap();

        let done = store.complete(&ok.job_id, Some(7)).unwrap();
        assert_eq!(done.state, JobState::Succeeded);
        assert_eq!(done.chunk_count, Some(7));

        let failed = store.fail(&bad.job_id, "conversion failed: corrupt").unwrap();
        assert_eq!(failed.state, JobState::Failed);
        assert!(failed.last_error.unwrap().contains("corrupt"));

        assert!(store.claim_next().unwrap().is_none());
    }

    #[test]
    fn purge_removes_only_old_terminal_jobs() {
        let (_temp, store) = open_store();
        let done = Job::new_ingest("a.pdf", SourceKind::File, Map::new(), 3);
        let pending = Job::new_ingest("b.pdf", SourceKind::File, Map::new(), 3);
        store.enqueue(&done).unwrap();
        store.enqueue(&pending).unwrap();
        store.claim_next().unwrap().unwrap();
        store.complete(&done.job_id, Some(1)).unwrap();

        let purged = store.purge_terminal(0).unwrap();
        assert_eq!(purged, 1);
        assert!(store.get(&done.job_id).unwrap().is_none());
        assert!(store.get(&pending.job_id).unwrap().is_some());
    }

    #[test]
    fn oldest_pending_job_is_claimed_first() {
        let (_temp, store) = open_store();
        let mut first = Job::new_ingest("a.pdf", SourceKind::File, Map::new(), 3);
        let mut second = Job::new_ingest("b.pdf", SourceKind::File, Map::new(), 3);
        first.created_at_ms = 1_000;
        second.created_at_ms = 2_000;
        store.enqueue(&second).unwrap();
        store.enqueue(&first).unwrap();

        let claimed = store.claim_next().unwrap().unwrap();
        assert_eq!(claimed.job_id, first.job_id);
    }
}
