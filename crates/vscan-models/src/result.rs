//! Phrase-scan results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{JobId, VideoId};

/// Phrase occurrences found in one transcript segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentHits {
    pub segment: String,
    pub occurrences: u32,
}

/// Aggregated statistics produced by the phrase scanner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ScanStats {
    /// Transcribed segments that were scanned
    pub total_segments: u32,
    pub segments_with_phrase: u32,
    pub total_occurrences: u32,
    pub total_words: u64,
    pub occurrences_per_1000_words: f64,
    /// Per-segment counts, only for segments containing the phrase
    #[serde(default)]
    pub segment_hits: Vec<SegmentHits>,
}

/// Immutable result object written once per completed job under
/// `results/{video_id}/{timestamp}-results.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    #[serde(flatten)]
    pub stats: ScanStats,
    pub video_id: VideoId,
    pub youtube_url: String,
    pub job_id: JobId,
    pub phrase: String,
    pub processed_at: DateTime<Utc>,
}
