//! Queue consumer: the worker's main loop.
//!
//! A message is acknowledged only once its job record has settled, so any
//! failure before that point leaves it for redelivery after the visibility
//! timeout. The result check at the top of [`QueueConsumer::handle_message`]
//! turns redeliveries of already-finished work into cheap skips.

use std::sync::Arc;

use tracing::{error, info, warn};
use vscan_models::{derive_video_id, JobId, JobRecord, JobState, QueueMessage, VideoId};
use vscan_queue::ReceivedMessage;
use vscan_storage::keys::results_prefix;

use crate::context::WorkerContext;
use crate::error::WorkerResult;
use crate::job_store::JobStoreResult;
use crate::logging::JobLogger;
use crate::metrics;
use crate::pipeline::PipelineError;
use crate::termination::ShutdownSignal;

/// What happened to one received message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Job completed and message acknowledged
    Completed,
    /// Job failed and message acknowledged
    Failed,
    /// Result already existed, or the job had already settled; message
    /// acknowledged without running the pipeline
    Skipped,
    /// Malformed body; message acknowledged without a job
    Discarded,
    /// Record store trouble; message left for redelivery
    Unacknowledged,
    /// Shutdown mid-pipeline; job left in Processing, message unacknowledged
    Interrupted,
}

/// Counters for one `process_batch` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub received: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub discarded: usize,
    pub unacknowledged: usize,
    /// The batch stopped because shutdown was requested
    pub interrupted: bool,
}

impl BatchOutcome {
    fn record(&mut self, outcome: MessageOutcome) {
        match outcome {
            MessageOutcome::Completed => self.completed += 1,
            MessageOutcome::Failed => self.failed += 1,
            MessageOutcome::Skipped => self.skipped += 1,
            MessageOutcome::Discarded => self.discarded += 1,
            MessageOutcome::Unacknowledged => self.unacknowledged += 1,
            MessageOutcome::Interrupted => self.interrupted = true,
        }
    }
}

/// Polls the queue and turns messages into job attempts.
#[derive(Clone)]
pub struct QueueConsumer {
    ctx: Arc<WorkerContext>,
}

impl QueueConsumer {
    pub fn new(ctx: Arc<WorkerContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &WorkerContext {
        &self.ctx
    }

    /// Loop until shutdown is requested, then clean up.
    pub async fn run(&self) {
        let shutdown = self.ctx.termination.subscribe();
        info!(
            worker_id = %self.ctx.worker_id,
            phrase = %self.ctx.config.phrase,
            batch_size = self.ctx.config.batch_size,
            poll_interval_secs = self.ctx.config.poll_interval.as_secs(),
            "Worker started"
        );

        while !shutdown.is_triggered() {
            self.run_iteration(&shutdown).await;
            if shutdown.is_triggered() {
                break;
            }

            tokio::select! {
                _ = shutdown.triggered() => break,
                _ = tokio::time::sleep(self.ctx.config.poll_interval) => {}
            }
        }

        info!(
            reason = self.ctx.termination.reason().unwrap_or("unknown"),
            jobs_processed = self.ctx.heartbeat.jobs_processed(),
            "Worker stopping"
        );
        self.ctx.termination.cleanup().await;
    }

    /// One main-loop pass: heartbeat, lease recovery, then a batch.
    ///
    /// Returns the batch counters, or `None` when the batch errored.
    pub async fn run_iteration(&self, shutdown: &ShutdownSignal) -> Option<BatchOutcome> {
        self.ctx.heartbeat.beat().await;

        match self.ctx.scanner.scan().await {
            Ok(report) => {
                if report.recovered > 0 {
                    info!(recovered = report.recovered, "Recovered abandoned jobs");
                    metrics::record_leases_recovered(report.recovered);
                }
            }
            Err(e) => warn!(error = %e, "Lease recovery pass failed"),
        }

        match self.process_batch(shutdown).await {
            Ok(outcome) => {
                info!(
                    received = outcome.received,
                    failed = outcome.failed,
                    skipped = outcome.skipped,
                    "Processed {} videos in this batch",
                    outcome.completed
                );
                Some(outcome)
            }
            Err(e) => {
                error!(error = %e, "Batch processing failed");
                None
            }
        }
    }

    /// Handle up to `batch_size` messages.
    ///
    /// The batch ends early when the queue reports zero depth (or the depth
    /// query fails), a receive comes back empty, or shutdown is requested.
    pub async fn process_batch(&self, shutdown: &ShutdownSignal) -> WorkerResult<BatchOutcome> {
        let config = &self.ctx.config;
        let mut outcome = BatchOutcome::default();

        while outcome.received < config.batch_size {
            if shutdown.is_triggered() {
                outcome.interrupted = true;
                break;
            }

            match self.ctx.queue.depth().await {
                Ok(0) => {
                    metrics::set_queue_depth(0);
                    info!("Queue is empty");
                    break;
                }
                Ok(depth) => {
                    metrics::set_queue_depth(depth);
                    info!(depth, "Messages in queue");
                }
                Err(e) => {
                    warn!(error = %e, "Failed to read queue depth");
                    break;
                }
            }

            let Some(message) = self
                .ctx
                .queue
                .receive(config.visibility_timeout, config.receive_wait)
                .await?
            else {
                info!("No messages available");
                break;
            };
            outcome.received += 1;
            metrics::record_message_received();

            let result = self.handle_message(&message, shutdown).await;
            outcome.record(result);
            if result == MessageOutcome::Interrupted {
                break;
            }
        }

        Ok(outcome)
    }

    /// Turn one message into a job attempt.
    pub async fn handle_message(
        &self,
        message: &ReceivedMessage,
        shutdown: &ShutdownSignal,
    ) -> MessageOutcome {
        let request = match QueueMessage::parse(&message.body) {
            Ok(request) => request,
            Err(e) => {
                warn!(message_id = %message.message_id, error = %e, "Discarding malformed message");
                return self.discard(message).await;
            }
        };
        let Some(video_id) = derive_video_id(&request.youtube_url) else {
            warn!(message_id = %message.message_id, "Discarding message without a usable URL");
            return self.discard(message).await;
        };

        let delivered_id = (!message.message_id.is_empty())
            .then(|| JobId::from_string(&message.message_id));

        if self.result_exists(&video_id).await {
            info!(video_id = %video_id, "Results already exist, skipping");
            if let Some(job_id) = &delivered_id {
                if let Err(e) = self.settle_finished(job_id).await {
                    warn!(job_id = %job_id, error = %e, "Failed to settle job with existing results");
                    return MessageOutcome::Unacknowledged;
                }
            }
            return self.skip(message).await;
        }

        let job_id = delivered_id.unwrap_or_else(JobId::new);
        let phrase = request.phrase_or(&self.ctx.config.phrase).to_string();
        let logger = JobLogger::new(&job_id, &video_id, "phrase_scan");
        let record = JobRecord::new(job_id.clone(), video_id, request.youtube_url, phrase);

        let existing = match self.ctx.jobs.create(record).await {
            Ok(record) => record,
            Err(e) => {
                logger.log_error(&format!("Failed to create job record: {e}"));
                return MessageOutcome::Unacknowledged;
            }
        };
        match existing.state {
            JobState::Queued => {}
            JobState::Completed | JobState::Failed => {
                logger.log_warning(&format!(
                    "Job already settled as {}, acknowledging redelivery",
                    existing.state
                ));
                return self.skip(message).await;
            }
            JobState::Processing => {
                logger.log_warning("Job is still leased, leaving message for redelivery");
                return MessageOutcome::Unacknowledged;
            }
        }

        let job = match self.ctx.jobs.claim(&job_id, &self.ctx.worker_id).await {
            Ok(job) => job,
            Err(e) => {
                logger.log_error(&format!("Failed to claim job: {e}"));
                return MessageOutcome::Unacknowledged;
            }
        };

        logger.log_start(&format!(
            "scanning {} for '{}' (delivery {})",
            job.source_url, job.phrase, message.receive_count
        ));

        match self.ctx.pipeline.run(&job, shutdown).await {
            Ok(result) => match self.ctx.jobs.complete(&job_id).await {
                Ok(_) => {
                    self.acknowledge(message).await;
                    let total = self.ctx.heartbeat.record_job_processed();
                    metrics::record_job_completed();
                    logger.log_completion(&format!(
                        "{} occurrences, {} jobs processed by this worker",
                        result.stats.total_occurrences, total
                    ));
                    MessageOutcome::Completed
                }
                Err(e) => {
                    logger.log_error(&format!("Failed to mark job completed: {e}"));
                    MessageOutcome::Unacknowledged
                }
            },
            Err(PipelineError::Interrupted) => {
                logger.log_warning("Interrupted by shutdown, leaving job for lease recovery");
                MessageOutcome::Interrupted
            }
            Err(e) => {
                logger.log_error(&e.to_string());
                match self.ctx.jobs.fail(&job_id, e.to_string()).await {
                    Ok(_) => {
                        self.acknowledge(message).await;
                        metrics::record_job_failed(e.stage());
                        MessageOutcome::Failed
                    }
                    Err(store_err) => {
                        logger.log_error(&format!("Failed to mark job failed: {store_err}"));
                        MessageOutcome::Unacknowledged
                    }
                }
            }
        }
    }

    /// Whether any result object exists for `video_id`. Lookup errors count
    /// as no result.
    async fn result_exists(&self, video_id: &VideoId) -> bool {
        match self
            .ctx
            .store
            .any_with_prefix(&results_prefix(video_id))
            .await
        {
            Ok(exists) => exists,
            Err(e) => {
                warn!(video_id = %video_id, error = %e, "Failed to check for existing results");
                false
            }
        }
    }

    /// Settle a record an earlier delivery left unfinished after its result
    /// was written.
    async fn settle_finished(&self, job_id: &JobId) -> JobStoreResult<()> {
        let Some(record) = self.ctx.jobs.get(job_id).await? else {
            return Ok(());
        };
        if !record.state.is_terminal() {
            self.ctx.jobs.settle(job_id, JobState::Completed, |_| {}).await?;
            info!(job_id = %job_id, from = %record.state, "Settled job whose results already exist");
        }
        Ok(())
    }

    async fn skip(&self, message: &ReceivedMessage) -> MessageOutcome {
        self.acknowledge(message).await;
        metrics::record_job_skipped();
        MessageOutcome::Skipped
    }

    async fn discard(&self, message: &ReceivedMessage) -> MessageOutcome {
        self.acknowledge(message).await;
        metrics::record_message_discarded();
        MessageOutcome::Discarded
    }

    async fn acknowledge(&self, message: &ReceivedMessage) {
        if let Err(e) = self.ctx.queue.delete(&message.receipt).await {
            warn!(
                message_id = %message.message_id,
                error = %e,
                "Failed to acknowledge message; it will be redelivered"
            );
        }
    }
}
