//! Lease recovery for jobs abandoned by dead workers.

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};
use vscan_models::JobState;

use crate::job_store::{JobRecordStore, JobStoreResult};

/// Outcome of one recovery pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    /// Expired Processing records moved back to Queued
    pub recovered: usize,
    /// Stale copies deleted because a later-lifecycle copy exists
    pub shadowed_removed: usize,
    /// Records the pass could not fix; retried next pass
    pub failures: usize,
}

/// Returns Processing jobs whose lease has expired to the Queued prefix.
#[derive(Clone)]
pub struct LeaseRecoveryScanner {
    jobs: JobRecordStore,
    lease_timeout: Duration,
}

impl LeaseRecoveryScanner {
    pub fn new(jobs: JobRecordStore, lease_timeout: Duration) -> Self {
        Self { jobs, lease_timeout }
    }

    pub fn lease_timeout(&self) -> Duration {
        self.lease_timeout
    }

    pub async fn scan(&self) -> JobStoreResult<RecoveryReport> {
        self.scan_at(Utc::now()).await
    }

    /// Run one pass as if the current time were `now`.
    ///
    /// Listing failures abort the pass; per-record failures are counted and
    /// logged.
    pub async fn scan_at(&self, now: DateTime<Utc>) -> JobStoreResult<RecoveryReport> {
        let mut report = RecoveryReport::default();

        let mut terminal = self.jobs.ids(JobState::Completed).await?;
        terminal.extend(self.jobs.ids(JobState::Failed).await?);

        let mut live = HashSet::new();
        for record in self.jobs.list(JobState::Processing).await? {
            let job_id = record.job_id.clone();

            if terminal.contains(&job_id) {
                match self.jobs.remove_copy(JobState::Processing, &job_id).await {
                    Ok(()) => {
                        debug!(job_id = %job_id, "Removed processing copy of finished job");
                        report.shadowed_removed += 1;
                    }
                    Err(e) => {
                        warn!(job_id = %job_id, error = %e, "Failed to remove shadowed processing copy");
                        report.failures += 1;
                    }
                }
                continue;
            }

            let expired = record
                .lease_age(now)
                .to_std()
                .map(|age| age > self.lease_timeout)
                .unwrap_or(false);
            if !expired {
                live.insert(job_id);
                continue;
            }

            match self.jobs.requeue(&job_id).await {
                Ok(_) => {
                    info!(
                        job_id = %job_id,
                        worker_id = record.worker_id.as_deref().unwrap_or("unknown"),
                        "Recovered job with expired lease"
                    );
                    report.recovered += 1;
                }
                Err(e) => {
                    warn!(job_id = %job_id, error = %e, "Failed to requeue expired job");
                    report.failures += 1;
                }
            }
        }

        // Listed after the requeues above so their fresh copies are not
        // mistaken for leftovers.
        for job_id in self.jobs.ids(JobState::Queued).await? {
            if !terminal.contains(&job_id) && !live.contains(&job_id) {
                continue;
            }
            match self.jobs.remove_copy(JobState::Queued, &job_id).await {
                Ok(()) => {
                    debug!(job_id = %job_id, "Removed shadowed queued copy");
                    report.shadowed_removed += 1;
                }
                Err(e) => {
                    warn!(job_id = %job_id, error = %e, "Failed to remove shadowed queued copy");
                    report.failures += 1;
                }
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use vscan_models::{JobId, JobRecord, VideoId};
    use vscan_storage::keys::job_key;
    use vscan_storage::{put_json, MemoryStore};

    const TIMEOUT: Duration = Duration::from_secs(600);

    fn setup() -> (Arc<MemoryStore>, JobRecordStore, LeaseRecoveryScanner) {
        let memory = Arc::new(MemoryStore::new());
        let jobs = JobRecordStore::new(memory.clone());
        let scanner = LeaseRecoveryScanner::new(jobs.clone(), TIMEOUT);
        (memory, jobs, scanner)
    }

    fn record(id: &str) -> JobRecord {
        JobRecord::new(
            JobId::from(id),
            VideoId::from("abc123"),
            "https://www.youtube.com/watch?v=abc123",
            "hustle",
        )
    }

    /// Store a Processing record whose lease started `age_secs` before `now`.
    async fn put_processing(memory: &MemoryStore, id: &str, now: DateTime<Utc>, age_secs: i64) {
        let mut job = record(id);
        let started = now - chrono::Duration::seconds(age_secs);
        job.assign_lease("worker-dead", started);
        job.settle_into(JobState::Processing, started);
        put_json(memory, &job_key(JobState::Processing, &job.job_id), &job)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_expired_lease_is_requeued_once() {
        let (memory, jobs, scanner) = setup();
        let now = Utc::now();
        put_processing(&memory, "stale", now, 601).await;
        put_processing(&memory, "fresh", now, 30).await;

        let report = scanner.scan_at(now).await.unwrap();
        assert_eq!(report.recovered, 1);
        assert_eq!(report.failures, 0);

        let requeued = jobs.read(JobState::Queued, &JobId::from("stale")).await.unwrap().unwrap();
        assert!(requeued.worker_id.is_none());
        assert!(requeued.lease_started_at.is_none());
        assert!(memory.contains("jobs/processing/fresh.json").await);
        assert!(!memory.contains("jobs/processing/stale.json").await);

        let second = scanner.scan_at(now).await.unwrap();
        assert_eq!(second, RecoveryReport::default());
    }

    #[tokio::test]
    async fn test_slow_worker_completion_settles_recovered_job() {
        let (memory, jobs, scanner) = setup();
        let id = JobId::from("slow");
        jobs.create(record("slow")).await.unwrap();
        jobs.claim(&id, "worker-slow").await.unwrap();

        let later = Utc::now() + chrono::Duration::seconds(601);
        assert_eq!(scanner.scan_at(later).await.unwrap().recovered, 1);
        assert_eq!(memory.keys_under("jobs/").await, vec!["jobs/queued/slow.json"]);

        let done = jobs.complete(&id).await.unwrap();
        assert_eq!(done.state, JobState::Completed);
        assert_eq!(memory.keys_under("jobs/").await, vec!["jobs/completed/slow.json"]);
    }

    #[tokio::test]
    async fn test_lease_at_exact_timeout_is_kept() {
        let (memory, _, scanner) = setup();
        let now = Utc::now();
        put_processing(&memory, "edge", now, 600).await;

        let report = scanner.scan_at(now).await.unwrap();
        assert_eq!(report.recovered, 0);
        assert!(memory.contains("jobs/processing/edge.json").await);
    }

    #[tokio::test]
    async fn test_processing_copy_shadowed_by_terminal_is_removed() {
        let (memory, jobs, scanner) = setup();
        let now = Utc::now();
        put_processing(&memory, "done", now, 900).await;

        let mut completed = record("done");
        completed.settle_into(JobState::Completed, now);
        put_json(memory.as_ref(), &job_key(JobState::Completed, &completed.job_id), &completed)
            .await
            .unwrap();

        let report = scanner.scan_at(now).await.unwrap();
        assert_eq!(report.recovered, 0);
        assert_eq!(report.shadowed_removed, 1);
        assert_eq!(memory.keys_under("jobs/").await, vec!["jobs/completed/done.json"]);
        assert!(jobs.read(JobState::Queued, &completed.job_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_queued_copy_shadowed_by_live_lease_is_removed() {
        let (memory, jobs, scanner) = setup();
        let now = Utc::now();
        jobs.create(record("claimed")).await.unwrap();
        put_processing(&memory, "claimed", now, 10).await;
        jobs.create(record("waiting")).await.unwrap();

        let report = scanner.scan_at(now).await.unwrap();
        assert_eq!(report.shadowed_removed, 1);
        assert_eq!(
            memory.keys_under("jobs/").await,
            vec!["jobs/processing/claimed.json", "jobs/queued/waiting.json"]
        );
    }

    #[tokio::test]
    async fn test_per_record_failure_does_not_abort_pass() {
        let (memory, _, scanner) = setup();
        let now = Utc::now();
        put_processing(&memory, "a", now, 700).await;
        put_processing(&memory, "b", now, 700).await;
        memory.fail_puts_under("jobs/queued/a.json").await;

        let report = scanner.scan_at(now).await.unwrap();
        assert_eq!(report.recovered, 1);
        assert_eq!(report.failures, 1);
        assert!(memory.contains("jobs/processing/a.json").await);
        assert!(memory.contains("jobs/queued/b.json").await);
    }

    #[tokio::test]
    async fn test_listing_failure_aborts_pass() {
        let (memory, _, scanner) = setup();
        memory.fail_lists_under("jobs/processing/").await;
        assert!(scanner.scan().await.is_err());
    }
}
