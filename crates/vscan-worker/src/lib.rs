//! Queue-driven transcription and phrase-scan worker.
//!
//! This crate provides:
//! - Job record persistence with write-then-delete state transitions
//! - Lease recovery for jobs abandoned by dead workers
//! - Worker heartbeats
//! - Signal and preemption handling with a single cleanup path
//! - The per-job media pipeline
//! - The queue consumer main loop

pub mod config;
pub mod consumer;
pub mod context;
pub mod error;
pub mod heartbeat;
pub mod job_store;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod recovery;
pub mod termination;

pub use config::{QueueArgs, StoreArgs, WorkerArgs, WorkerConfig};
pub use consumer::{BatchOutcome, MessageOutcome, QueueConsumer};
pub use context::{new_worker_id, Collaborators, WorkerContext};
pub use error::{WorkerError, WorkerResult};
pub use heartbeat::WorkerHeartbeat;
pub use job_store::{JobRecordStore, JobStoreError, JobStoreResult};
pub use logging::{init_tracing, JobLogger};
pub use pipeline::{PipelineError, PipelineOrchestrator};
pub use recovery::{LeaseRecoveryScanner, RecoveryReport};
pub use termination::{check_preemption, ShutdownSignal, TerminationController};
