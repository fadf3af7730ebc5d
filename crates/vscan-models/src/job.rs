//! Job records tracked in the object store.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::VideoId;

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID (used when the queue supplies none).
    pub fn new() -> Self {
        Self(format!("job-{}", Uuid::new_v4()))
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Lifecycle state of a job record.
///
/// The state doubles as the key prefix the record lives under, so a record
/// moves between prefixes as it advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Record created, waiting for a worker to claim it
    #[default]
    Queued,
    /// Claimed by a worker holding a lease
    Processing,
    /// Pipeline finished and a result was written
    Completed,
    /// Pipeline failed; not retried automatically
    Failed,
}

impl JobState {
    /// Every state, in lifecycle order.
    pub const ALL: [JobState; 4] = [
        JobState::Queued,
        JobState::Processing,
        JobState::Completed,
        JobState::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Processing => "processing",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }

    /// Lifecycle order used to pick the authoritative copy when a record
    /// exists under more than one prefix.
    pub fn precedence(&self) -> u8 {
        match self {
            JobState::Queued => 0,
            JobState::Processing => 1,
            JobState::Completed | JobState::Failed => 2,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "queued" => Ok(JobState::Queued),
            "processing" => Ok(JobState::Processing),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            other => Err(format!("unknown job state: {other}")),
        }
    }
}

/// Unit counters for progress estimation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct JobProgress {
    pub completed_units: u32,
    pub total_units: u32,
}

impl JobProgress {
    pub fn new(completed_units: u32, total_units: u32) -> Self {
        Self {
            completed_units,
            total_units,
        }
    }

    /// Completion percentage (0-100). Zero when the total is unknown.
    pub fn percent(&self) -> u8 {
        if self.total_units == 0 {
            return 0;
        }
        let pct = (self.completed_units as u64 * 100) / self.total_units as u64;
        pct.min(100) as u8
    }
}

/// A job record persisted as `jobs/{state}/{job_id}.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: JobId,
    pub video_id: VideoId,
    /// Source video URL
    #[serde(rename = "youtube_url")]
    pub source_url: String,
    /// Search term handed to the phrase scanner
    pub phrase: String,
    pub state: JobState,
    /// Set only while the record is in `Processing`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
    /// Set on transition into `Processing`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub progress: JobProgress,
    /// Set only in `Failed`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    /// Create a new queued record.
    pub fn new(
        job_id: JobId,
        video_id: VideoId,
        source_url: impl Into<String>,
        phrase: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            job_id,
            video_id,
            source_url: source_url.into(),
            phrase: phrase.into(),
            state: JobState::Queued,
            worker_id: None,
            lease_started_at: None,
            progress: JobProgress::default(),
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Attach a lease for `worker_id` starting at `at`.
    pub fn assign_lease(&mut self, worker_id: impl Into<String>, at: DateTime<Utc>) {
        self.worker_id = Some(worker_id.into());
        self.lease_started_at = Some(at);
    }

    /// Drop the worker assignment and lease.
    pub fn clear_lease(&mut self) {
        self.worker_id = None;
        self.lease_started_at = None;
    }

    pub fn has_lease(&self) -> bool {
        self.worker_id.is_some() && self.lease_started_at.is_some()
    }

    /// Move the record into `state`, dropping fields that only belong to
    /// other states.
    ///
    /// Worker fields survive only in `Processing`; the error message survives
    /// only in `Failed`.
    pub fn settle_into(&mut self, state: JobState, at: DateTime<Utc>) {
        self.state = state;
        if state != JobState::Processing {
            self.clear_lease();
        }
        if state != JobState::Failed {
            self.error_message = None;
        }
        self.updated_at = at;
    }

    /// Age of the lease at `now`.
    ///
    /// Records that somehow lack a lease timestamp fall back to `updated_at`
    /// so they still age out.
    pub fn lease_age(&self, now: DateTime<Utc>) -> Duration {
        let anchor = self.lease_started_at.unwrap_or(self.updated_at);
        now - anchor
    }

    /// Whether this copy wins over `other` under the precedence rule.
    pub fn supersedes(&self, other: &JobRecord) -> bool {
        match self.state.precedence().cmp(&other.state.precedence()) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Less => false,
            std::cmp::Ordering::Equal => self.updated_at >= other.updated_at,
        }
    }
}
