//! Fixed-length audio segmentation.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info};

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::MediaResult;
use crate::probe::probe_audio;

/// Default segment length in seconds.
pub const DEFAULT_SEGMENT_SECONDS: f64 = 60.0;

/// One audio slice handed to the transcriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioUnit {
    /// Zero-based position in the source audio
    pub index: usize,
    /// Stable name, e.g. `segment_003`
    pub name: String,
    pub path: PathBuf,
}

impl AudioUnit {
    pub fn new(index: usize, dir: &Path) -> Self {
        let name = unit_name(index);
        let path = dir.join(format!("{name}.wav"));
        Self { index, name, path }
    }
}

/// Name of the unit at `index`.
pub fn unit_name(index: usize) -> String {
    format!("segment_{:03}", index)
}

/// Time span of one planned segment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentSpan {
    pub index: usize,
    pub start: f64,
    pub duration: f64,
}

/// Cut `total_seconds` into consecutive spans of `segment_seconds`.
///
/// The last span may be shorter. Non-positive or non-finite inputs yield no
/// spans.
pub fn plan_segments(total_seconds: f64, segment_seconds: f64) -> Vec<SegmentSpan> {
    let usable = |v: f64| v.is_finite() && v > 0.0;
    if !usable(total_seconds) || !usable(segment_seconds) {
        return Vec::new();
    }

    let mut spans = Vec::new();
    let mut index = 0;
    loop {
        let start = index as f64 * segment_seconds;
        if start >= total_seconds {
            break;
        }
        spans.push(SegmentSpan {
            index,
            start,
            duration: segment_seconds.min(total_seconds - start),
        });
        index += 1;
    }
    spans
}

/// Splits a WAV file into independently transcribable units.
#[async_trait]
pub trait AudioSegmenter: Send + Sync {
    async fn split(&self, wav: &Path, out_dir: &Path) -> MediaResult<Vec<AudioUnit>>;
}

/// [`AudioSegmenter`] cutting fixed-length slices with FFmpeg.
#[derive(Debug, Clone)]
pub struct FfmpegSegmenter {
    segment_seconds: f64,
    runner: FfmpegRunner,
}

impl Default for FfmpegSegmenter {
    fn default() -> Self {
        Self::new(DEFAULT_SEGMENT_SECONDS)
    }
}

impl FfmpegSegmenter {
    pub fn new(segment_seconds: f64) -> Self {
        Self {
            segment_seconds,
            runner: FfmpegRunner::new(),
        }
    }

    pub fn segment_seconds(&self) -> f64 {
        self.segment_seconds
    }
}

#[async_trait]
impl AudioSegmenter for FfmpegSegmenter {
    async fn split(&self, wav: &Path, out_dir: &Path) -> MediaResult<Vec<AudioUnit>> {
        tokio::fs::create_dir_all(out_dir).await?;

        let info = probe_audio(wav).await?;
        let spans = plan_segments(info.duration, self.segment_seconds);
        debug!(
            duration = info.duration,
            segments = spans.len(),
            "Planned audio segments"
        );

        let mut units = Vec::with_capacity(spans.len());
        for span in spans {
            let unit = AudioUnit::new(span.index, out_dir);
            let cmd = FfmpegCommand::new(wav, &unit.path)
                .seek(span.start)
                .duration(span.duration);
            self.runner.run(&cmd).await?;

            if span.index % 5 == 0 {
                info!(
                    "Created segment {} from {:.0} to {:.0} sec",
                    span.index,
                    span.start,
                    span.start + span.duration
                );
            }
            units.push(unit);
        }

        info!("Created {} segments total", units.len());
        Ok(units)
    }
}
