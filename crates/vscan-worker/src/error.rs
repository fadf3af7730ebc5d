//! Worker error types.

use thiserror::Error;

use crate::job_store::JobStoreError;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Storage error: {0}")]
    Storage(#[from] vscan_storage::StorageError),

    #[error("Queue error: {0}")]
    Queue(#[from] vscan_queue::QueueError),

    #[error("Media error: {0}")]
    Media(#[from] vscan_media::MediaError),

    #[error("Job store error: {0}")]
    JobStore(#[from] JobStoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }
}
