//! Media collaborators for the vscan worker.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building and running
//! - Audio acquisition through yt-dlp and WAV conversion
//! - Fixed-length audio segmentation
//! - Speech-to-text through a whisper-family CLI
//! - Phrase scanning over transcripts
//!
//! Each stage sits behind a trait so the worker can swap implementations.

pub mod acquire;
pub mod command;
pub mod error;
pub mod probe;
pub mod scan;
pub mod segment;
pub mod transcribe;

pub use acquire::{AudioAcquirer, YtDlpAcquirer};
pub use command::{check_ffmpeg, check_ffprobe, check_ytdlp, FfmpegCommand, FfmpegRunner};
pub use error::{MediaError, MediaResult};
pub use probe::{probe_audio, AudioInfo};
pub use scan::{PhraseScanner, TranscriptUnit};
pub use segment::{
    plan_segments, unit_name, AudioSegmenter, AudioUnit, FfmpegSegmenter, SegmentSpan,
    DEFAULT_SEGMENT_SECONDS,
};
pub use transcribe::{ComputeDevice, Transcriber, TranscriberConfig, WhisperCliTranscriber};
