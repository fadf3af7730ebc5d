//! Worker liveness records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Liveness status reported by a worker process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    #[default]
    Active,
    Shutdown,
}

impl WorkerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerStatus::Active => "active",
            WorkerStatus::Shutdown => "shutdown",
        }
    }
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Heartbeat record stored at `workers/{worker_id}.json`.
///
/// Advisory only: nothing blocks on its freshness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatRecord {
    pub worker_id: String,
    pub hostname: String,
    pub ip_address: String,
    pub last_heartbeat: DateTime<Utc>,
    pub status: WorkerStatus,
    /// Jobs completed by this process since it started
    pub jobs_processed: u64,
    /// Default search phrase this worker was started with
    pub phrase: String,
    pub use_gpu: bool,
}

impl HeartbeatRecord {
    /// Whether the last heartbeat is older than `max_age`.
    pub fn is_stale(&self, now: DateTime<Utc>, max_age: chrono::Duration) -> bool {
        now - self.last_heartbeat > max_age
    }
}
