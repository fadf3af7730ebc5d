//! Job records persisted in the object store.
//!
//! A record lives at `jobs/{state}/{job_id}.json`. The store offers no
//! transactions, so a state change is a write at the new prefix followed by a
//! delete at the old one. A crash between the two leaves the record at both
//! prefixes; readers resolve that with the lifecycle precedence
//! (Completed/Failed > Processing > Queued) and delete the stale copy.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, warn};
use vscan_models::{JobId, JobRecord, JobState};
use vscan_storage::keys::{job_id_from_key, job_key, job_state_prefix};
use vscan_storage::{get_json, put_json, ObjectStore, StorageError};

pub type JobStoreResult<T> = Result<T, JobStoreError>;

#[derive(Debug, Error)]
pub enum JobStoreError {
    #[error("Failed to write {key}: {source}")]
    StoreWrite {
        key: String,
        #[source]
        source: StorageError,
    },

    #[error("Failed to read job records: {0}")]
    StoreRead(#[source] StorageError),

    #[error("Job {job_id} not found in {state}")]
    NotFound { job_id: JobId, state: JobState },

    #[error("Invalid transition for job {job_id}: {reason}")]
    InvalidTransition { job_id: JobId, reason: String },
}

impl JobStoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Job record persistence and state transitions.
#[derive(Clone)]
pub struct JobRecordStore {
    store: Arc<dyn ObjectStore>,
}

impl JobRecordStore {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    async fn write(&self, record: &JobRecord) -> JobStoreResult<()> {
        let key = job_key(record.state, &record.job_id);
        put_json(self.store.as_ref(), &key, record)
            .await
            .map_err(|source| JobStoreError::StoreWrite { key, source })
    }

    /// Write a new record into the Queued prefix.
    ///
    /// If a record with the same id already exists, the authoritative copy is
    /// returned unchanged and nothing is written. Callers check its state.
    pub async fn create(&self, mut record: JobRecord) -> JobStoreResult<JobRecord> {
        if let Some(existing) = self.get(&record.job_id).await? {
            debug!(
                job_id = %existing.job_id,
                state = %existing.state,
                "Job record already exists"
            );
            return Ok(existing);
        }
        record.settle_into(JobState::Queued, Utc::now());
        self.write(&record).await?;
        debug!(job_id = %record.job_id, video_id = %record.video_id, "Created job record");
        Ok(record)
    }

    /// Read the copy of a record stored under `state`.
    pub async fn read(&self, state: JobState, job_id: &JobId) -> JobStoreResult<Option<JobRecord>> {
        get_json(self.store.as_ref(), &job_key(state, job_id))
            .await
            .map_err(JobStoreError::StoreRead)
    }

    /// Move a record from `from` to `to`, applying `mutate` on the way.
    ///
    /// The new copy is written before the old one is deleted. A failed
    /// delete is logged and left for the precedence rule to clean up.
    pub async fn transition<F>(
        &self,
        job_id: &JobId,
        from: JobState,
        to: JobState,
        mutate: F,
    ) -> JobStoreResult<JobRecord>
    where
        F: FnOnce(&mut JobRecord) + Send,
    {
        let mut record = self
            .read(from, job_id)
            .await?
            .ok_or_else(|| JobStoreError::NotFound {
                job_id: job_id.clone(),
                state: from,
            })?;

        mutate(&mut record);
        if to == JobState::Processing && !record.has_lease() {
            return Err(JobStoreError::InvalidTransition {
                job_id: job_id.clone(),
                reason: "entering processing requires a worker lease".to_string(),
            });
        }
        record.settle_into(to, Utc::now());

        self.write(&record).await?;
        if from != to {
            if let Err(e) = self.store.delete(&job_key(from, job_id)).await {
                warn!(
                    job_id = %job_id,
                    from = %from,
                    to = %to,
                    error = %e,
                    "Failed to delete previous job copy"
                );
            }
        }

        debug!(job_id = %job_id, from = %from, to = %to, "Job transitioned");
        Ok(record)
    }

    /// Rewrite the progress counters of a Processing record in place.
    pub async fn update_progress(
        &self,
        job_id: &JobId,
        completed_units: u32,
        total_units: Option<u32>,
    ) -> JobStoreResult<JobRecord> {
        let mut record = self
            .read(JobState::Processing, job_id)
            .await?
            .ok_or_else(|| JobStoreError::NotFound {
                job_id: job_id.clone(),
                state: JobState::Processing,
            })?;

        record.progress.completed_units = completed_units;
        if let Some(total) = total_units {
            record.progress.total_units = total;
        }
        record.updated_at = Utc::now();

        self.write(&record).await?;
        Ok(record)
    }

    /// Authoritative record for `job_id`, deleting any stale copies.
    pub async fn get(&self, job_id: &JobId) -> JobStoreResult<Option<JobRecord>> {
        let mut copies = Vec::new();
        for state in JobState::ALL {
            match self.read(state, job_id).await {
                Ok(Some(record)) => copies.push((state, record)),
                Ok(None) => {}
                Err(JobStoreError::StoreRead(StorageError::Corrupt { key, source })) => {
                    warn!(key = %key, error = %source, "Ignoring corrupt job record");
                }
                Err(e) => return Err(e),
            }
        }

        let mut winner: Option<usize> = None;
        for (i, (_, record)) in copies.iter().enumerate() {
            if winner.map_or(true, |w| record.supersedes(&copies[w].1)) {
                winner = Some(i);
            }
        }
        let Some(winner) = winner else {
            return Ok(None);
        };

        let (_, record) = copies.swap_remove(winner);
        for (state, _) in copies {
            if let Err(e) = self.remove_copy(state, job_id).await {
                warn!(job_id = %job_id, state = %state, error = %e, "Failed to delete stale job copy");
            }
        }
        Ok(Some(record))
    }

    /// Every readable record under `state`.
    ///
    /// Records that vanish between listing and reading, or fail to parse, are
    /// skipped.
    pub async fn list(&self, state: JobState) -> JobStoreResult<Vec<JobRecord>> {
        let ids = self.list_ids(state).await?;
        let mut records = Vec::with_capacity(ids.len());
        for job_id in ids {
            match self.read(state, &job_id).await {
                Ok(Some(record)) => records.push(record),
                Ok(None) => debug!(job_id = %job_id, state = %state, "Job record vanished while listing"),
                Err(e) => warn!(job_id = %job_id, state = %state, error = %e, "Skipping unreadable job record"),
            }
        }
        Ok(records)
    }

    /// Ids of every record under `state`, without reading the records.
    pub async fn ids(&self, state: JobState) -> JobStoreResult<HashSet<JobId>> {
        Ok(self.list_ids(state).await?.into_iter().collect())
    }

    async fn list_ids(&self, state: JobState) -> JobStoreResult<Vec<JobId>> {
        let objects = self
            .store
            .list(&job_state_prefix(state))
            .await
            .map_err(JobStoreError::StoreRead)?;
        Ok(objects
            .iter()
            .filter_map(|o| job_id_from_key(state, &o.key))
            .collect())
    }

    /// Delete the copy of a record stored under `state`.
    pub async fn remove_copy(&self, state: JobState, job_id: &JobId) -> JobStoreResult<()> {
        let key = job_key(state, job_id);
        self.store
            .delete(&key)
            .await
            .map_err(|source| JobStoreError::StoreWrite { key, source })
    }

    /// Queued → Processing under a lease held by `worker_id`.
    pub async fn claim(&self, job_id: &JobId, worker_id: &str) -> JobStoreResult<JobRecord> {
        let now = Utc::now();
        self.transition(job_id, JobState::Queued, JobState::Processing, |record| {
            record.assign_lease(worker_id, now);
        })
        .await
    }

    /// Move the authoritative copy of a record into the terminal state `to`.
    ///
    /// A record that is already terminal is returned unchanged.
    pub async fn settle<F>(
        &self,
        job_id: &JobId,
        to: JobState,
        mutate: F,
    ) -> JobStoreResult<JobRecord>
    where
        F: FnOnce(&mut JobRecord) + Send,
    {
        let current = self
            .get(job_id)
            .await?
            .ok_or_else(|| JobStoreError::NotFound {
                job_id: job_id.clone(),
                state: JobState::Processing,
            })?;
        if current.state.is_terminal() {
            debug!(job_id = %job_id, state = %current.state, "Job already settled");
            return Ok(current);
        }
        self.transition(job_id, current.state, to, mutate).await
    }

    /// Processing → Completed.
    ///
    /// When the Processing copy is gone (the lease was recovered), whatever
    /// copy is authoritative gets settled instead.
    pub async fn complete(&self, job_id: &JobId) -> JobStoreResult<JobRecord> {
        match self
            .transition(job_id, JobState::Processing, JobState::Completed, |_| {})
            .await
        {
            Err(e) if e.is_not_found() => self.settle(job_id, JobState::Completed, |_| {}).await,
            other => other,
        }
    }

    /// Processing → Failed with `error`, with the same fallback as
    /// [`complete`](Self::complete).
    pub async fn fail(&self, job_id: &JobId, error: impl Into<String>) -> JobStoreResult<JobRecord> {
        let error = error.into();
        let message = error.clone();
        match self
            .transition(job_id, JobState::Processing, JobState::Failed, move |record| {
                record.error_message = Some(message);
            })
            .await
        {
            Err(e) if e.is_not_found() => {
                self.settle(job_id, JobState::Failed, move |record| {
                    record.error_message = Some(error);
                })
                .await
            }
            other => other,
        }
    }

    /// Processing → Queued, dropping the lease and any progress.
    pub async fn requeue(&self, job_id: &JobId) -> JobStoreResult<JobRecord> {
        self.transition(job_id, JobState::Processing, JobState::Queued, |record| {
            record.progress = Default::default();
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vscan_models::VideoId;
    use vscan_storage::MemoryStore;

    fn setup() -> (Arc<MemoryStore>, JobRecordStore) {
        let memory = Arc::new(MemoryStore::new());
        let jobs = JobRecordStore::new(memory.clone());
        (memory, jobs)
    }

    fn record(id: &str) -> JobRecord {
        JobRecord::new(
            JobId::from(id),
            VideoId::from("abc123"),
            "https://www.youtube.com/watch?v=abc123",
            "hustle",
        )
    }

    async fn job_keys(memory: &MemoryStore) -> Vec<String> {
        memory.keys_under("jobs/").await
    }

    #[tokio::test]
    async fn test_claim_and_complete_leave_single_copy() {
        let (memory, jobs) = setup();
        let id = JobId::from("job-1");
        jobs.create(record("job-1")).await.unwrap();
        assert_eq!(job_keys(&memory).await, vec!["jobs/queued/job-1.json"]);

        let claimed = jobs.claim(&id, "worker-a").await.unwrap();
        assert_eq!(claimed.state, JobState::Processing);
        assert_eq!(claimed.worker_id.as_deref(), Some("worker-a"));
        assert!(claimed.lease_started_at.is_some());
        assert_eq!(job_keys(&memory).await, vec!["jobs/processing/job-1.json"]);

        let done = jobs.complete(&id).await.unwrap();
        assert_eq!(done.state, JobState::Completed);
        assert!(!done.has_lease());
        assert_eq!(job_keys(&memory).await, vec!["jobs/completed/job-1.json"]);
    }

    #[tokio::test]
    async fn test_fail_keeps_error_message() {
        let (_, jobs) = setup();
        let id = JobId::from("job-1");
        jobs.create(record("job-1")).await.unwrap();
        jobs.claim(&id, "worker-a").await.unwrap();

        let failed = jobs.fail(&id, "download failed").await.unwrap();
        assert_eq!(failed.error_message.as_deref(), Some("download failed"));
        assert!(failed.worker_id.is_none());

        let stored = jobs.read(JobState::Failed, &id).await.unwrap().unwrap();
        assert_eq!(stored, failed);
    }

    #[tokio::test]
    async fn test_processing_requires_lease() {
        let (memory, jobs) = setup();
        let id = JobId::from("job-1");
        jobs.create(record("job-1")).await.unwrap();

        let err = jobs
            .transition(&id, JobState::Queued, JobState::Processing, |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, JobStoreError::InvalidTransition { .. }));
        assert_eq!(job_keys(&memory).await, vec!["jobs/queued/job-1.json"]);
    }

    #[tokio::test]
    async fn test_requeue_clears_lease_and_progress() {
        let (_, jobs) = setup();
        let id = JobId::from("job-1");
        jobs.create(record("job-1")).await.unwrap();
        jobs.claim(&id, "worker-a").await.unwrap();
        jobs.update_progress(&id, 4, Some(9)).await.unwrap();

        let requeued = jobs.requeue(&id).await.unwrap();
        assert_eq!(requeued.state, JobState::Queued);
        assert!(!requeued.has_lease());
        assert_eq!(requeued.progress.completed_units, 0);
    }

    #[tokio::test]
    async fn test_missing_source_is_not_found() {
        let (_, jobs) = setup();
        let err = jobs.complete(&JobId::from("ghost")).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_write_failure_keeps_source_copy() {
        let (memory, jobs) = setup();
        let id = JobId::from("job-1");
        jobs.create(record("job-1")).await.unwrap();
        memory.fail_puts_under("jobs/processing/").await;

        let err = jobs.claim(&id, "worker-a").await.unwrap_err();
        assert!(matches!(err, JobStoreError::StoreWrite { .. }));
        assert_eq!(job_keys(&memory).await, vec!["jobs/queued/job-1.json"]);
    }

    #[tokio::test]
    async fn test_failed_delete_is_resolved_by_get() {
        let (memory, jobs) = setup();
        let id = JobId::from("job-1");
        jobs.create(record("job-1")).await.unwrap();
        jobs.claim(&id, "worker-a").await.unwrap();

        memory.fail_deletes_under("jobs/processing/").await;
        jobs.complete(&id).await.unwrap();
        assert_eq!(
            job_keys(&memory).await,
            vec!["jobs/completed/job-1.json", "jobs/processing/job-1.json"]
        );

        memory.clear_faults().await;
        let record = jobs.get(&id).await.unwrap().unwrap();
        assert_eq!(record.state, JobState::Completed);
        assert_eq!(job_keys(&memory).await, vec!["jobs/completed/job-1.json"]);
    }

    #[tokio::test]
    async fn test_get_prefers_newest_terminal_copy() {
        let (memory, jobs) = setup();
        let id = JobId::from("job-1");
        let now = Utc::now();

        let mut completed = record("job-1");
        completed.settle_into(JobState::Completed, now);
        let mut failed = record("job-1");
        failed.error_message = Some("late failure".into());
        failed.settle_into(JobState::Failed, now + chrono::Duration::seconds(5));

        put_json(memory.as_ref(), &job_key(JobState::Completed, &id), &completed)
            .await
            .unwrap();
        put_json(memory.as_ref(), &job_key(JobState::Failed, &id), &failed)
            .await
            .unwrap();

        let winner = jobs.get(&id).await.unwrap().unwrap();
        assert_eq!(winner.state, JobState::Failed);
        assert_eq!(job_keys(&memory).await, vec!["jobs/failed/job-1.json"]);
    }

    #[tokio::test]
    async fn test_get_unknown_job() {
        let (_, jobs) = setup();
        assert!(jobs.get(&JobId::from("nope")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_skips_corrupt_records() {
        let (memory, jobs) = setup();
        jobs.create(record("job-1")).await.unwrap();
        jobs.create(record("job-2")).await.unwrap();
        memory
            .put_bytes("jobs/queued/job-3.json", b"{not json".to_vec(), "application/json")
            .await
            .unwrap();

        let listed = jobs.list(JobState::Queued).await.unwrap();
        let ids: Vec<_> = listed.iter().map(|r| r.job_id.as_str()).collect();
        assert_eq!(ids, vec!["job-1", "job-2"]);
        assert_eq!(jobs.ids(JobState::Queued).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_create_returns_existing_record_untouched() {
        let (memory, jobs) = setup();
        let id = JobId::from("job-1");
        let original = jobs.create(record("job-1")).await.unwrap();
        jobs.claim(&id, "worker-a").await.unwrap();
        jobs.fail(&id, "download failed").await.unwrap();

        let again = jobs.create(record("job-1")).await.unwrap();
        assert_eq!(again.state, JobState::Failed);
        assert_eq!(again.created_at, original.created_at);
        assert_eq!(job_keys(&memory).await, vec!["jobs/failed/job-1.json"]);
    }

    #[tokio::test]
    async fn test_complete_settles_requeued_copy() {
        let (memory, jobs) = setup();
        let id = JobId::from("job-1");
        jobs.create(record("job-1")).await.unwrap();
        jobs.claim(&id, "worker-slow").await.unwrap();
        jobs.requeue(&id).await.unwrap();

        let done = jobs.complete(&id).await.unwrap();
        assert_eq!(done.state, JobState::Completed);
        assert_eq!(job_keys(&memory).await, vec!["jobs/completed/job-1.json"]);
    }

    #[tokio::test]
    async fn test_fail_settles_requeued_copy_with_error() {
        let (memory, jobs) = setup();
        let id = JobId::from("job-1");
        jobs.create(record("job-1")).await.unwrap();
        jobs.claim(&id, "worker-slow").await.unwrap();
        jobs.requeue(&id).await.unwrap();

        let failed = jobs.fail(&id, "conversion failed").await.unwrap();
        assert_eq!(failed.error_message.as_deref(), Some("conversion failed"));
        assert_eq!(job_keys(&memory).await, vec!["jobs/failed/job-1.json"]);
    }

    #[tokio::test]
    async fn test_settle_leaves_terminal_record_alone() {
        let (memory, jobs) = setup();
        let id = JobId::from("job-1");
        jobs.create(record("job-1")).await.unwrap();
        jobs.claim(&id, "worker-a").await.unwrap();
        jobs.fail(&id, "boom").await.unwrap();

        let settled = jobs.complete(&id).await.unwrap();
        assert_eq!(settled.state, JobState::Failed);
        assert_eq!(settled.error_message.as_deref(), Some("boom"));
        assert_eq!(job_keys(&memory).await, vec!["jobs/failed/job-1.json"]);
    }

    #[tokio::test]
    async fn test_update_progress_in_place() {
        let (memory, jobs) = setup();
        let id = JobId::from("job-1");
        jobs.create(record("job-1")).await.unwrap();
        jobs.claim(&id, "worker-a").await.unwrap();

        jobs.update_progress(&id, 0, Some(5)).await.unwrap();
        let updated = jobs.update_progress(&id, 3, None).await.unwrap();
        assert_eq!(updated.progress.completed_units, 3);
        assert_eq!(updated.progress.total_units, 5);
        assert_eq!(updated.worker_id.as_deref(), Some("worker-a"));
        assert_eq!(job_keys(&memory).await, vec!["jobs/processing/job-1.json"]);
    }
}
