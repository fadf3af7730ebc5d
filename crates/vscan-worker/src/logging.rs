//! Structured logging.
//!
//! [`init_tracing`] installs the process-wide subscriber; [`JobLogger`] gives
//! every job the same lifecycle lines with its job and video ids attached.

use tracing::{error, info, warn, Span};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use vscan_models::{JobId, VideoId};

/// Install the global tracing subscriber.
///
/// `LOG_FORMAT=json` selects JSON lines; anything else gets colored text.
/// `RUST_LOG` directives are honored on top of the defaults.
pub fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let mut env_filter = EnvFilter::from_default_env();
    for directive in ["vscan=info", "aws_config=warn", "aws_smithy_runtime=warn"] {
        if let Ok(directive) = directive.parse() {
            env_filter = env_filter.add_directive(directive);
        }
    }

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
}

/// Job logger for structured logging with consistent formatting.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    video_id: String,
    operation: String,
}

impl JobLogger {
    pub fn new(job_id: &JobId, video_id: &VideoId, operation: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            video_id: video_id.to_string(),
            operation: operation.to_string(),
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            video_id = %self.video_id,
            operation = %self.operation,
            "Job started: {}", message
        );
    }

    pub fn log_progress(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            video_id = %self.video_id,
            operation = %self.operation,
            "Job progress: {}", message
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            job_id = %self.job_id,
            video_id = %self.video_id,
            operation = %self.operation,
            "Job warning: {}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            job_id = %self.job_id,
            video_id = %self.video_id,
            operation = %self.operation,
            "Job error: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            video_id = %self.video_id,
            operation = %self.operation,
            "Job completed: {}", message
        );
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn video_id(&self) -> &str {
        &self.video_id
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Span carrying the job fields, for instrumenting a whole attempt.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "job",
            job_id = %self.job_id,
            video_id = %self.video_id,
            operation = %self.operation
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_logger_fields() {
        let job_id = JobId::new();
        let logger = JobLogger::new(&job_id, &VideoId::from("abc123"), "phrase_scan");

        assert_eq!(logger.job_id(), job_id.to_string());
        assert_eq!(logger.video_id(), "abc123");
        assert_eq!(logger.operation(), "phrase_scan");
    }
}
