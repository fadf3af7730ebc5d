//! Shared fixtures: in-memory store and queue plus scripted media fakes.

#![allow(dead_code)]

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use vscan_media::{
    AudioAcquirer, AudioSegmenter, AudioUnit, MediaError, MediaResult, Transcriber,
};
use vscan_models::{JobId, JobRecord, JobState};
use vscan_queue::MemoryQueue;
use vscan_storage::{get_json, MemoryStore};
use vscan_worker::{
    Collaborators, QueueConsumer, TerminationController, WorkerConfig, WorkerContext,
};

pub const VIDEO_URL: &str = "https://www.youtube.com/watch?v=dQw4w9WgXcQ";
pub const VIDEO_ID: &str = "dQw4w9WgXcQ";

pub fn body(url: &str) -> String {
    format!(r#"{{"youtube_url": "{url}", "phrase": "hustle"}}"#)
}

/// Writes placeholder audio files, or fails the download.
#[derive(Default)]
pub struct FakeAcquirer {
    pub fail_download: bool,
    pub downloads: AtomicUsize,
}

impl FakeAcquirer {
    pub fn failing() -> Self {
        Self {
            fail_download: true,
            ..Self::default()
        }
    }
}

#[async_trait]
impl AudioAcquirer for FakeAcquirer {
    async fn download(&self, _url: &str, work_dir: &Path) -> MediaResult<PathBuf> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        if self.fail_download {
            return Err(MediaError::download_failed("video unavailable"));
        }
        let path = work_dir.join("audio.m4a");
        tokio::fs::write(&path, b"m4a").await?;
        Ok(path)
    }

    async fn convert_to_wav(&self, _input: &Path, work_dir: &Path) -> MediaResult<PathBuf> {
        let path = work_dir.join("audio.wav");
        tokio::fs::write(&path, b"RIFF").await?;
        Ok(path)
    }
}

/// Produces a fixed number of units.
pub struct FakeSegmenter {
    pub units: usize,
}

#[async_trait]
impl AudioSegmenter for FakeSegmenter {
    async fn split(&self, _wav: &Path, out_dir: &Path) -> MediaResult<Vec<AudioUnit>> {
        tokio::fs::create_dir_all(out_dir).await?;
        let mut units = Vec::with_capacity(self.units);
        for index in 0..self.units {
            let unit = AudioUnit::new(index, out_dir);
            tokio::fs::write(&unit.path, b"RIFF").await?;
            units.push(unit);
        }
        Ok(units)
    }
}

/// Returns one "hustle" per unit, fails chosen units, and can request
/// shutdown while transcribing a chosen unit.
#[derive(Default)]
pub struct FakeTranscriber {
    pub failing: HashSet<usize>,
    pub shutdown_on: Option<usize>,
    pub controller: OnceLock<TerminationController>,
    pub transcribed: AtomicUsize,
    pub releases: AtomicUsize,
}

impl FakeTranscriber {
    pub fn failing_on(units: impl IntoIterator<Item = usize>) -> Self {
        Self {
            failing: units.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn shutdown_on(unit: usize) -> Self {
        Self {
            shutdown_on: Some(unit),
            ..Self::default()
        }
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transcriber for FakeTranscriber {
    async fn transcribe(&self, unit: &AudioUnit) -> MediaResult<String> {
        if self.shutdown_on == Some(unit.index) {
            if let Some(controller) = self.controller.get() {
                controller.trigger("test shutdown");
            }
        }
        if self.failing.contains(&unit.index) {
            return Err(MediaError::transcription_failed(format!("{}: engine crashed", unit.name)));
        }
        self.transcribed.fetch_add(1, Ordering::SeqCst);
        Ok(format!("this is segment {} with hustle", unit.index))
    }

    async fn release(&self) -> MediaResult<()> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// One worker wired to in-memory infrastructure.
pub struct Harness {
    pub memory: Arc<MemoryStore>,
    pub queue: Arc<MemoryQueue>,
    pub acquirer: Arc<FakeAcquirer>,
    pub transcriber: Arc<FakeTranscriber>,
    pub ctx: Arc<WorkerContext>,
    pub consumer: QueueConsumer,
    pub work_root: TempDir,
}

pub fn test_config(work_root: &Path) -> WorkerConfig {
    WorkerConfig {
        work_dir: work_root.to_path_buf(),
        poll_interval: Duration::from_millis(20),
        receive_wait: Duration::ZERO,
        preemption_watch: false,
        shutdown_grace: Duration::from_secs(3600),
        ..WorkerConfig::default()
    }
}

impl Harness {
    /// Fresh store, and a queue holding `bodies`.
    pub async fn new(bodies: &[String], units: usize) -> Self {
        Self::builder(bodies, units).build().await
    }

    pub fn builder(bodies: &[String], units: usize) -> HarnessBuilder {
        HarnessBuilder {
            bodies: bodies.to_vec(),
            units,
            memory: None,
            queue: None,
            acquirer: FakeAcquirer::default(),
            transcriber: FakeTranscriber::default(),
            batch_size: 5,
        }
    }

    pub async fn job_keys(&self) -> Vec<String> {
        self.memory.keys_under("jobs/").await
    }

    pub async fn read(&self, state: JobState, job_id: &str) -> Option<JobRecord> {
        self.ctx
            .jobs
            .read(state, &JobId::from(job_id))
            .await
            .expect("read job record")
    }

    pub async fn result_keys(&self) -> Vec<String> {
        self.memory.keys_under(&format!("results/{VIDEO_ID}/")).await
    }

    pub async fn first_result(&self) -> vscan_models::ResultRecord {
        let key = self.result_keys().await.into_iter().next().expect("a result");
        get_json(self.memory.as_ref(), &key)
            .await
            .expect("readable result")
            .expect("result present")
    }

    /// Entries left under the work root.
    pub fn work_entries(&self) -> usize {
        std::fs::read_dir(self.work_root.path())
            .map(|entries| entries.count())
            .unwrap_or(0)
    }
}

pub struct HarnessBuilder {
    bodies: Vec<String>,
    units: usize,
    memory: Option<Arc<MemoryStore>>,
    queue: Option<Arc<MemoryQueue>>,
    acquirer: FakeAcquirer,
    transcriber: FakeTranscriber,
    batch_size: usize,
}

impl HarnessBuilder {
    /// Share another worker's store and queue; `bodies` is then ignored.
    pub fn shared_with(mut self, other: &Harness) -> Self {
        self.memory = Some(other.memory.clone());
        self.queue = Some(other.queue.clone());
        self
    }

    pub fn acquirer(mut self, acquirer: FakeAcquirer) -> Self {
        self.acquirer = acquirer;
        self
    }

    pub fn transcriber(mut self, transcriber: FakeTranscriber) -> Self {
        self.transcriber = transcriber;
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub async fn build(self) -> Harness {
        let memory = self.memory.unwrap_or_default();
        let queue = match self.queue {
            Some(queue) => queue,
            None => Arc::new(MemoryQueue::with_bodies(self.bodies.iter()).await),
        };
        let acquirer = Arc::new(self.acquirer);
        let transcriber = Arc::new(self.transcriber);
        let work_root = tempfile::tempdir().expect("work root");

        let config = WorkerConfig {
            batch_size: self.batch_size,
            ..test_config(work_root.path())
        };
        let collaborators = Collaborators {
            acquirer: acquirer.clone(),
            segmenter: Arc::new(FakeSegmenter { units: self.units }),
            transcriber: transcriber.clone(),
        };
        let ctx = Arc::new(WorkerContext::new(
            config,
            vscan_worker::new_worker_id(),
            memory.clone(),
            queue.clone(),
            collaborators,
        ));
        let _ = transcriber.controller.set(ctx.termination.clone());

        Harness {
            memory,
            queue,
            acquirer,
            transcriber,
            consumer: QueueConsumer::new(ctx.clone()),
            ctx,
            work_root,
        }
    }
}
