//! Operator commands for the vscan worker fleet.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use vscan_models::{HeartbeatRecord, JobId, JobState, QueueMessage};
use vscan_queue::{MessageQueue, RedisStreamQueue};
use vscan_storage::keys::WORKERS_PREFIX;
use vscan_storage::{get_json, ObjectStore, S3Store};
use vscan_worker::{init_tracing, JobRecordStore, LeaseRecoveryScanner, QueueArgs, StoreArgs};

#[derive(Parser)]
#[command(name = "vscanctl", about = "Inspect and feed the vscan worker fleet")]
struct Cli {
    #[command(flatten)]
    store: StoreArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Enqueue a video for scanning
    Submit {
        /// Source video URL
        url: String,
        /// Phrase to search for instead of the worker default
        #[arg(short = 'p', long)]
        phrase: Option<String>,
        #[command(flatten)]
        queue: QueueArgs,
    },
    /// Show the authoritative record of one job
    Status { job_id: String },
    /// List job records in one state
    List {
        /// queued, processing, completed or failed
        state: JobState,
    },
    /// Run one lease recovery pass
    Recover {
        #[arg(long, env = "VSCAN_LEASE_TIMEOUT", default_value_t = 600)]
        lease_timeout: u64,
    },
    /// List worker heartbeats
    Workers {
        /// Seconds without a heartbeat before a worker is reported stale
        #[arg(long, default_value_t = 300)]
        stale_after: i64,
    },
}

async fn open_store(args: &StoreArgs) -> Result<Arc<dyn ObjectStore>> {
    let store = S3Store::new(args.s3_config())
        .await
        .context("Failed to create object store client")?;
    Ok(Arc::new(store))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = rustls::crypto::ring::default_provider().install_default();
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Submit { url, phrase, queue } => {
            let message = QueueMessage::new(url, phrase);
            let queue = RedisStreamQueue::new(queue.queue_config(), "vscanctl")
                .context("Failed to create queue client")?;
            queue.init().await.context("Failed to initialize queue")?;
            let message_id = queue
                .send(&message.to_body()?)
                .await
                .context("Failed to enqueue message")?;
            print_json(&serde_json::json!({
                "job_id": message_id,
                "youtube_url": message.youtube_url,
                "phrase": message.phrase,
            }))?;
        }
        Command::Status { job_id } => {
            let jobs = JobRecordStore::new(open_store(&cli.store).await?);
            match jobs.get(&JobId::from_string(job_id.as_str())).await? {
                Some(record) => print_json(&record)?,
                None => bail!("Job {job_id} not found"),
            }
        }
        Command::List { state } => {
            let jobs = JobRecordStore::new(open_store(&cli.store).await?);
            print_json(&jobs.list(state).await?)?;
        }
        Command::Recover { lease_timeout } => {
            let jobs = JobRecordStore::new(open_store(&cli.store).await?);
            let scanner = LeaseRecoveryScanner::new(jobs, Duration::from_secs(lease_timeout));
            print_json(&scanner.scan().await?)?;
        }
        Command::Workers { stale_after } => {
            let store = open_store(&cli.store).await?;
            let now = Utc::now();
            let max_age = chrono::Duration::seconds(stale_after);

            for object in store.list(WORKERS_PREFIX).await? {
                let Some(record) = get_json::<HeartbeatRecord>(store.as_ref(), &object.key).await?
                else {
                    continue;
                };
                println!(
                    "{:<44} {:<8} {:<5} {:<20} {:<15} jobs={:<5} last={}",
                    record.worker_id,
                    record.status.as_str(),
                    if record.is_stale(now, max_age) { "stale" } else { "fresh" },
                    record.hostname,
                    record.ip_address,
                    record.jobs_processed,
                    record.last_heartbeat.to_rfc3339(),
                );
            }
        }
    }
    Ok(())
}
