//! Per-job pipeline: acquisition, segmentation, transcription, scanning and
//! result persistence.
//!
//! Progress is counted in units: download, conversion and segmentation are
//! one unit each, then one per audio segment. Before segmentation the total
//! is an estimate of 5.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::Instrument;
use vscan_media::{
    AudioAcquirer, AudioSegmenter, AudioUnit, MediaError, PhraseScanner, Transcriber,
    TranscriptUnit,
};
use vscan_models::{JobRecord, ResultRecord};
use vscan_storage::keys::{result_key, transcript_key};
use vscan_storage::{put_json, ObjectStore, StorageError};

use crate::job_store::JobRecordStore;
use crate::logging::JobLogger;
use crate::metrics;
use crate::termination::ShutdownSignal;

/// Progress total reported before the number of segments is known.
const INITIAL_TOTAL_UNITS: u32 = 5;

/// Units completed before the first audio segment.
const SETUP_UNITS: u32 = 3;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Audio download failed: {0}")]
    Acquisition(#[source] MediaError),

    #[error("Audio conversion failed: {0}")]
    Conversion(#[source] MediaError),

    #[error("Audio segmentation failed: {0}")]
    Segmentation(#[source] MediaError),

    #[error("Segmentation produced no audio segments")]
    NoUnits,

    #[error("Invalid search phrase: {0}")]
    Phrase(#[source] MediaError),

    #[error("Failed to write result: {0}")]
    ResultWrite(#[source] StorageError),

    #[error("Failed to prepare working directory: {0}")]
    WorkDir(#[source] std::io::Error),

    #[error("Interrupted by shutdown")]
    Interrupted,
}

impl PipelineError {
    /// Stage label used in metrics.
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Acquisition(_) => "download",
            Self::Conversion(_) => "convert",
            Self::Segmentation(_) | Self::NoUnits => "segment",
            Self::Phrase(_) => "phrase",
            Self::ResultWrite(_) => "result",
            Self::WorkDir(_) => "workdir",
            Self::Interrupted => "interrupted",
        }
    }
}

/// Drives the media collaborators for one job.
pub struct PipelineOrchestrator {
    store: Arc<dyn ObjectStore>,
    jobs: JobRecordStore,
    acquirer: Arc<dyn AudioAcquirer>,
    segmenter: Arc<dyn AudioSegmenter>,
    transcriber: Arc<dyn Transcriber>,
    work_root: PathBuf,
}

impl PipelineOrchestrator {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        jobs: JobRecordStore,
        acquirer: Arc<dyn AudioAcquirer>,
        segmenter: Arc<dyn AudioSegmenter>,
        transcriber: Arc<dyn Transcriber>,
        work_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            jobs,
            acquirer,
            segmenter,
            transcriber,
            work_root: work_root.into(),
        }
    }

    pub fn work_root(&self) -> &Path {
        &self.work_root
    }

    /// Run the whole pipeline for a claimed job and write its result.
    ///
    /// The transcription engine is released and the per-job working
    /// directory removed on every exit path.
    pub async fn run(
        &self,
        job: &JobRecord,
        shutdown: &ShutdownSignal,
    ) -> Result<ResultRecord, PipelineError> {
        let logger = JobLogger::new(&job.job_id, &job.video_id, "phrase_scan");

        let outcome = async {
            let work_dir = self.create_work_dir().await?;
            let outcome = self.run_in(job, work_dir.path(), shutdown, &logger).await;
            let path = work_dir.path().to_path_buf();
            if let Err(e) = work_dir.close() {
                logger.log_warning(&format!(
                    "Failed to remove working directory {}: {}",
                    path.display(),
                    e
                ));
            }
            outcome
        }
        .instrument(logger.create_span())
        .await;

        if let Err(e) = self.transcriber.release().await {
            logger.log_warning(&format!("Failed to release transcription engine: {e}"));
        }
        outcome
    }

    async fn create_work_dir(&self) -> Result<tempfile::TempDir, PipelineError> {
        tokio::fs::create_dir_all(&self.work_root)
            .await
            .map_err(PipelineError::WorkDir)?;
        tempfile::Builder::new()
            .prefix("job-")
            .tempdir_in(&self.work_root)
            .map_err(PipelineError::WorkDir)
    }

    async fn run_in(
        &self,
        job: &JobRecord,
        work_dir: &Path,
        shutdown: &ShutdownSignal,
        logger: &JobLogger,
    ) -> Result<ResultRecord, PipelineError> {
        let scanner = PhraseScanner::new(&job.phrase).map_err(PipelineError::Phrase)?;
        self.report_progress(job, 0, Some(INITIAL_TOTAL_UNITS), logger).await;

        logger.log_progress(&format!("Downloading {}", job.source_url));
        let downloaded = self
            .acquirer
            .download(&job.source_url, work_dir)
            .await
            .map_err(PipelineError::Acquisition)?;
        self.report_progress(job, 1, None, logger).await;

        let wav = self
            .acquirer
            .convert_to_wav(&downloaded, work_dir)
            .await
            .map_err(PipelineError::Conversion)?;
        self.report_progress(job, 2, None, logger).await;

        let units = self
            .segmenter
            .split(&wav, &work_dir.join("segments"))
            .await
            .map_err(PipelineError::Segmentation)?;
        if units.is_empty() {
            return Err(PipelineError::NoUnits);
        }
        let total_units = SETUP_UNITS + units.len() as u32;
        self.report_progress(job, SETUP_UNITS, Some(total_units), logger).await;
        logger.log_progress(&format!("Transcribing {} segments", units.len()));

        let transcript_dir = work_dir.join("transcripts");
        tokio::fs::create_dir_all(&transcript_dir)
            .await
            .map_err(PipelineError::WorkDir)?;

        let mut transcripts = Vec::with_capacity(units.len());
        for (i, unit) in units.iter().enumerate() {
            if shutdown.is_triggered() {
                return Err(PipelineError::Interrupted);
            }

            match self.transcriber.transcribe(unit).await {
                Ok(text) => {
                    self.persist_transcript(job, unit, &text, &transcript_dir, logger)
                        .await;
                    transcripts.push(TranscriptUnit::new(&unit.name, text));
                    metrics::record_segment(true);
                }
                Err(e) => {
                    logger.log_warning(&format!("Skipping segment {}: {}", unit.name, e));
                    metrics::record_segment(false);
                }
            }
            self.report_progress(job, SETUP_UNITS + i as u32 + 1, None, logger)
                .await;
        }

        let stats = scanner.scan(&transcripts);
        let processed_at = Utc::now();
        let result = ResultRecord {
            stats,
            video_id: job.video_id.clone(),
            youtube_url: job.source_url.clone(),
            job_id: job.job_id.clone(),
            phrase: scanner.phrase().to_string(),
            processed_at,
        };

        let key = result_key(&job.video_id, processed_at);
        put_json(self.store.as_ref(), &key, &result)
            .await
            .map_err(PipelineError::ResultWrite)?;

        logger.log_completion(&format!(
            "'{}' found {} times in {}/{} segments",
            result.phrase,
            result.stats.total_occurrences,
            result.stats.segments_with_phrase,
            result.stats.total_segments
        ));
        Ok(result)
    }

    async fn report_progress(
        &self,
        job: &JobRecord,
        completed: u32,
        total: Option<u32>,
        logger: &JobLogger,
    ) {
        if let Err(e) = self.jobs.update_progress(&job.job_id, completed, total).await {
            logger.log_warning(&format!("Failed to update progress: {e}"));
        }
    }

    /// Keep the transcript next to the audio and upload it. Both are
    /// best-effort.
    async fn persist_transcript(
        &self,
        job: &JobRecord,
        unit: &AudioUnit,
        text: &str,
        dir: &Path,
        logger: &JobLogger,
    ) {
        let local = dir.join(format!("{}.txt", unit.name));
        if let Err(e) = tokio::fs::write(&local, text).await {
            logger.log_warning(&format!("Failed to write {}: {}", local.display(), e));
        }

        let key = transcript_key(&job.video_id, &unit.name);
        if let Err(e) = self
            .store
            .put_bytes(&key, text.as_bytes().to_vec(), "text/plain; charset=utf-8")
            .await
        {
            logger.log_warning(&format!("Failed to upload transcript {key}: {e}"));
        }
    }
}
