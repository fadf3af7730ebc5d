//! Bucket key layout.
//!
//! ```text
//! jobs/{queued|processing|completed|failed}/{job_id}.json
//! transcripts/{video_id}/{segment}.txt
//! results/{video_id}/{timestamp}-results.json
//! workers/{worker_id}.json
//! ```

use chrono::{DateTime, Utc};
use vscan_models::{JobId, JobState, VideoId};

pub const WORKERS_PREFIX: &str = "workers/";

/// Folder marker objects created when bootstrapping a fresh bucket.
pub const FOLDER_MARKERS: [&str; 7] = [
    "jobs/queued/",
    "jobs/processing/",
    "jobs/completed/",
    "jobs/failed/",
    "transcripts/",
    "results/",
    "workers/",
];

/// Prefix holding every record in `state`.
pub fn job_state_prefix(state: JobState) -> String {
    format!("jobs/{}/", state.as_str())
}

pub fn job_key(state: JobState, job_id: &JobId) -> String {
    format!("{}{}.json", job_state_prefix(state), job_id)
}

/// Recover the job id from a key under `state`'s prefix.
pub fn job_id_from_key(state: JobState, key: &str) -> Option<JobId> {
    let prefix = job_state_prefix(state);
    let name = key.strip_prefix(prefix.as_str())?.strip_suffix(".json")?;
    (!name.is_empty() && !name.contains('/')).then(|| JobId::from_string(name))
}

/// Transcript key for one segment, e.g. `segment_003` → `transcripts/{video_id}/segment_003.txt`.
pub fn transcript_key(video_id: &VideoId, segment_name: &str) -> String {
    format!("transcripts/{}/{}.txt", video_id, segment_name)
}

pub fn results_prefix(video_id: &VideoId) -> String {
    format!("results/{}/", video_id)
}

/// Timestamped result key, so reprocessing a video never overwrites an
/// earlier result.
pub fn result_key(video_id: &VideoId, at: DateTime<Utc>) -> String {
    format!(
        "{}{}-results.json",
        results_prefix(video_id),
        at.format("%Y%m%d-%H%M%S")
    )
}

pub fn worker_key(worker_id: &str) -> String {
    format!("{}{}.json", WORKERS_PREFIX, worker_id)
}
