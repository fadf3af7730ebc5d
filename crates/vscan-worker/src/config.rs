//! Worker configuration.
//!
//! Every flag can also be supplied through the environment, so the same
//! binary runs unchanged from a shell, a systemd unit or a container.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser};
use vscan_queue::QueueConfig;
use vscan_storage::S3Config;

pub const DEFAULT_PHRASE: &str = "hustle";
pub const DEFAULT_BUCKET: &str = "youtube-transcripts";
pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_PREEMPTION_URL: &str =
    "http://169.254.169.254/latest/meta-data/spot/termination-time";

/// Object store connection flags, shared by the worker and `vscanctl`.
#[derive(Debug, Clone, Args)]
pub struct StoreArgs {
    /// Region for the object store
    #[arg(short = 'r', long, env = "AWS_REGION", default_value = DEFAULT_REGION)]
    pub region: String,

    /// Custom S3-compatible endpoint (MinIO, R2)
    #[arg(long, env = "S3_ENDPOINT_URL")]
    pub endpoint_url: Option<String>,

    /// Bucket holding job records, transcripts and results
    #[arg(short = 'b', long, env = "S3_BUCKET", default_value = DEFAULT_BUCKET)]
    pub bucket: String,
}

impl StoreArgs {
    pub fn s3_config(&self) -> S3Config {
        S3Config::new(&self.bucket, &self.region)
            .with_endpoint(self.endpoint_url.clone())
            .with_env_credentials()
    }
}

/// Message queue connection flags, shared by the worker and `vscanctl`.
#[derive(Debug, Clone, Args)]
pub struct QueueArgs {
    /// Redis URL of the work queue
    #[arg(short = 'q', long, env = "REDIS_URL")]
    pub queue_url: String,

    /// Stream holding queued messages
    #[arg(long, env = "QUEUE_STREAM", default_value = "vscan:jobs")]
    pub stream: String,

    /// Consumer group shared by all workers
    #[arg(long, env = "QUEUE_CONSUMER_GROUP", default_value = "vscan:workers")]
    pub consumer_group: String,
}

impl QueueArgs {
    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            redis_url: self.queue_url.clone(),
            stream_name: self.stream.clone(),
            consumer_group: self.consumer_group.clone(),
        }
    }
}

/// Command line of the `vscan-worker` binary.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "vscan-worker",
    about = "Pull video URLs from a queue, transcribe them and scan the transcripts for a phrase"
)]
pub struct WorkerArgs {
    /// Phrase to search for when a message carries none
    #[arg(short = 'p', long, env = "VSCAN_PHRASE", default_value = DEFAULT_PHRASE)]
    pub phrase: String,

    /// Root of the per-job working directories
    #[arg(short = 't', long, env = "VSCAN_TEMP_DIR", default_value = "./temp")]
    pub temp_dir: PathBuf,

    #[command(flatten)]
    pub queue: QueueArgs,

    #[command(flatten)]
    pub store: StoreArgs,

    /// Messages handled per poll
    #[arg(short = 'n', long, env = "VSCAN_BATCH_SIZE", default_value_t = 5)]
    pub batch_size: usize,

    /// Seconds to sleep between polls
    #[arg(short = 'i', long, env = "VSCAN_POLL_INTERVAL", default_value_t = 60)]
    pub poll_interval: u64,

    /// Run transcription on CPU instead of GPU
    #[arg(long, env = "VSCAN_FORCE_CPU")]
    pub cpu: bool,

    /// Seconds after which a Processing lease counts as abandoned
    #[arg(long, env = "VSCAN_LEASE_TIMEOUT", default_value_t = 600)]
    pub lease_timeout: u64,

    /// Seconds a received message stays hidden from other workers
    #[arg(long, env = "VSCAN_VISIBILITY_TIMEOUT", default_value_t = 600)]
    pub visibility_timeout: u64,

    /// Length of each transcribed audio segment, in seconds
    #[arg(long, env = "VSCAN_SEGMENT_SECONDS", default_value_t = 60.0)]
    pub segment_seconds: f64,

    /// Seconds to wait for the main loop after a termination request
    #[arg(long, env = "VSCAN_SHUTDOWN_GRACE", default_value_t = 30)]
    pub shutdown_grace: u64,

    /// Do not poll the cloud preemption notice endpoint
    #[arg(long, env = "VSCAN_NO_PREEMPTION_WATCH")]
    pub no_preemption_watch: bool,

    /// Preemption notice endpoint; HTTP 200 means the instance is going away
    #[arg(long, env = "VSCAN_PREEMPTION_URL", default_value = DEFAULT_PREEMPTION_URL)]
    pub preemption_url: String,

    /// Address for the Prometheus metrics listener
    #[arg(long, env = "METRICS_ADDR")]
    pub metrics_addr: Option<SocketAddr>,
}

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Default search phrase
    pub phrase: String,
    /// Work directory for temporary files
    pub work_dir: PathBuf,
    /// Messages handled per poll
    pub batch_size: usize,
    /// Sleep between polls
    pub poll_interval: Duration,
    /// Force CPU transcription
    pub force_cpu: bool,
    /// Age after which a Processing lease is recovered
    pub lease_timeout: Duration,
    /// How long a received message stays hidden
    pub visibility_timeout: Duration,
    /// Long-poll wait for a receive
    pub receive_wait: Duration,
    /// Audio segment length in seconds
    pub segment_seconds: f64,
    /// Graceful shutdown timeout
    pub shutdown_grace: Duration,
    /// Whether to poll the preemption notice endpoint
    pub preemption_watch: bool,
    pub preemption_url: String,
    pub preemption_poll_interval: Duration,
    pub preemption_request_timeout: Duration,
    /// Prometheus listener, disabled when unset
    pub metrics_addr: Option<SocketAddr>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            phrase: DEFAULT_PHRASE.to_string(),
            work_dir: PathBuf::from("./temp"),
            batch_size: 5,
            poll_interval: Duration::from_secs(60),
            force_cpu: false,
            lease_timeout: Duration::from_secs(600), // 10 minutes
            visibility_timeout: Duration::from_secs(600), // matches the lease timeout
            receive_wait: Duration::from_secs(5),
            segment_seconds: 60.0,
            shutdown_grace: Duration::from_secs(30),
            preemption_watch: true,
            preemption_url: DEFAULT_PREEMPTION_URL.to_string(),
            preemption_poll_interval: Duration::from_secs(5),
            preemption_request_timeout: Duration::from_secs(2),
            metrics_addr: None,
        }
    }
}

impl WorkerConfig {
    pub fn use_gpu(&self) -> bool {
        !self.force_cpu
    }
}

impl From<&WorkerArgs> for WorkerConfig {
    fn from(args: &WorkerArgs) -> Self {
        Self {
            phrase: args.phrase.clone(),
            work_dir: args.temp_dir.clone(),
            batch_size: args.batch_size,
            poll_interval: Duration::from_secs(args.poll_interval),
            force_cpu: args.cpu,
            lease_timeout: Duration::from_secs(args.lease_timeout),
            visibility_timeout: Duration::from_secs(args.visibility_timeout),
            segment_seconds: args.segment_seconds,
            shutdown_grace: Duration::from_secs(args.shutdown_grace),
            preemption_watch: !args.no_preemption_watch,
            preemption_url: args.preemption_url.clone(),
            metrics_addr: args.metrics_addr,
            ..Self::default()
        }
    }
}
