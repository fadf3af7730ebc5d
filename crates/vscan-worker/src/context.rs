//! Shared worker state, built once at startup.

use std::sync::Arc;

use uuid::Uuid;
use vscan_media::{AudioAcquirer, AudioSegmenter, Transcriber};
use vscan_queue::MessageQueue;
use vscan_storage::ObjectStore;

use crate::config::WorkerConfig;
use crate::heartbeat::WorkerHeartbeat;
use crate::job_store::JobRecordStore;
use crate::pipeline::PipelineOrchestrator;
use crate::recovery::LeaseRecoveryScanner;
use crate::termination::TerminationController;

/// Generate a process-unique worker id.
pub fn new_worker_id() -> String {
    format!("worker-{}", Uuid::new_v4())
}

/// Media collaborators used by the pipeline.
#[derive(Clone)]
pub struct Collaborators {
    pub acquirer: Arc<dyn AudioAcquirer>,
    pub segmenter: Arc<dyn AudioSegmenter>,
    pub transcriber: Arc<dyn Transcriber>,
}

/// Everything the consumer loop needs, wired from one store and one queue.
pub struct WorkerContext {
    pub config: WorkerConfig,
    pub worker_id: String,
    pub store: Arc<dyn ObjectStore>,
    pub queue: Arc<dyn MessageQueue>,
    pub jobs: JobRecordStore,
    pub heartbeat: Arc<WorkerHeartbeat>,
    pub scanner: LeaseRecoveryScanner,
    pub pipeline: PipelineOrchestrator,
    pub termination: TerminationController,
}

impl WorkerContext {
    pub fn new(
        config: WorkerConfig,
        worker_id: impl Into<String>,
        store: Arc<dyn ObjectStore>,
        queue: Arc<dyn MessageQueue>,
        collaborators: Collaborators,
    ) -> Self {
        let worker_id = worker_id.into();
        let jobs = JobRecordStore::new(store.clone());
        let heartbeat = Arc::new(WorkerHeartbeat::new(
            store.clone(),
            worker_id.clone(),
            config.phrase.clone(),
            config.use_gpu(),
        ));
        let scanner = LeaseRecoveryScanner::new(jobs.clone(), config.lease_timeout);
        let pipeline = PipelineOrchestrator::new(
            store.clone(),
            jobs.clone(),
            collaborators.acquirer,
            collaborators.segmenter,
            collaborators.transcriber.clone(),
            config.work_dir.clone(),
        );
        let termination = TerminationController::new(
            collaborators.transcriber,
            heartbeat.clone(),
            config.shutdown_grace,
        );

        Self {
            config,
            worker_id,
            store,
            queue,
            jobs,
            heartbeat,
            scanner,
            pipeline,
            termination,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_id_format() {
        let a = new_worker_id();
        let b = new_worker_id();
        assert!(a.starts_with("worker-"));
        assert_eq!(a.len(), "worker-".len() + 36);
        assert_ne!(a, b);
    }
}
