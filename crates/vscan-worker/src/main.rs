//! Transcription and phrase-scan worker binary.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use vscan_media::{
    check_ffmpeg, check_ytdlp, ComputeDevice, FfmpegSegmenter, TranscriberConfig,
    WhisperCliTranscriber, YtDlpAcquirer,
};
use vscan_queue::RedisStreamQueue;
use vscan_storage::S3Store;
use vscan_worker::metrics::init_metrics;
use vscan_worker::{
    init_tracing, new_worker_id, Collaborators, QueueConsumer, WorkerArgs, WorkerConfig,
    WorkerContext,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider (required for TLS/HTTPS). Fails only if
    // one is already installed.
    let _ = rustls::crypto::ring::default_provider().install_default();

    // Load environment variables
    dotenvy::dotenv().ok();

    init_tracing();

    let args = WorkerArgs::parse();
    let config = WorkerConfig::from(&args);
    let worker_id = new_worker_id();

    info!(worker_id = %worker_id, "Starting vscan-worker");
    info!("Worker config: {:?}", config);

    if let Some(addr) = config.metrics_addr {
        init_metrics(addr).context("Failed to start metrics listener")?;
        info!(addr = %addr, "Prometheus metrics enabled");
    }

    for (tool, check) in [("ffmpeg", check_ffmpeg()), ("yt-dlp", check_ytdlp())] {
        if let Err(e) = check {
            warn!(tool, error = %e, "Required tool not found; jobs will fail until it is installed");
        }
    }

    let store = S3Store::new(args.store.s3_config())
        .await
        .context("Failed to create object store client")?;
    store
        .ensure_bucket()
        .await
        .with_context(|| format!("Failed to prepare bucket {}", store.bucket()))?;

    let queue = RedisStreamQueue::new(args.queue.queue_config(), &worker_id)
        .context("Failed to create queue client")?;
    queue.init().await.context("Failed to initialize queue")?;

    tokio::fs::create_dir_all(&config.work_dir)
        .await
        .with_context(|| format!("Failed to create {}", config.work_dir.display()))?;

    let device = ComputeDevice::from_force_cpu(config.force_cpu);
    info!(device = %device, compute_type = device.compute_type(), "Transcription device selected");
    let collaborators = Collaborators {
        acquirer: Arc::new(YtDlpAcquirer::new()),
        segmenter: Arc::new(FfmpegSegmenter::new(config.segment_seconds)),
        transcriber: Arc::new(WhisperCliTranscriber::new(TranscriberConfig::new(device))),
    };

    let ctx = Arc::new(WorkerContext::new(
        config.clone(),
        worker_id,
        Arc::new(store),
        Arc::new(queue),
        collaborators,
    ));

    ctx.termination.set_exit_on_grace(true);
    ctx.termination
        .install_signal_handlers()
        .context("Failed to install signal handlers")?;
    if config.preemption_watch {
        ctx.termination
            .spawn_preemption_watch(
                config.preemption_url.clone(),
                config.preemption_poll_interval,
                config.preemption_request_timeout,
            )
            .context("Failed to start preemption watch")?;
    }

    QueueConsumer::new(ctx).run().await;

    info!("Worker shutdown complete");
    Ok(())
}
