//! Shared data models for the vscan worker fleet.
//!
//! This crate provides Serde-serializable types for:
//! - Job records and their lifecycle states
//! - Worker liveness (heartbeat) records
//! - Phrase-scan results
//! - Queue message bodies
//! - Deterministic video id derivation from source URLs

pub mod job;
pub mod message;
pub mod result;
pub mod video;
pub mod worker;

// Re-export common types
pub use job::{JobId, JobProgress, JobRecord, JobState};
pub use message::{MessageError, QueueMessage};
pub use result::{ResultRecord, ScanStats, SegmentHits};
pub use video::{derive_video_id, extract_youtube_id, VideoId, YoutubeIdError, YoutubeIdResult};
pub use worker::{HeartbeatRecord, WorkerStatus};
