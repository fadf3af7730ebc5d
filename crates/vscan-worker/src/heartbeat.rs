//! Worker liveness records.

use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};
use vscan_models::{HeartbeatRecord, WorkerStatus};
use vscan_storage::keys::worker_key;
use vscan_storage::{put_json, ObjectStore, StorageResult};

/// Best-effort host name of this machine.
pub fn hostname() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("HOST"))
        .ok()
        .or_else(|| {
            std::fs::read_to_string("/etc/hostname")
                .ok()
                .map(|s| s.trim().to_string())
        })
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Address of the interface used for outbound traffic.
///
/// Connecting a UDP socket only selects a route; no packet is sent.
pub fn local_ip_address() -> IpAddr {
    UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
        .and_then(|socket| {
            socket.connect((Ipv4Addr::new(8, 8, 8, 8), 80))?;
            socket.local_addr()
        })
        .map(|addr| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

/// Publishes `workers/{worker_id}.json` for this process.
pub struct WorkerHeartbeat {
    store: Arc<dyn ObjectStore>,
    worker_id: String,
    hostname: String,
    ip_address: String,
    phrase: String,
    use_gpu: bool,
    jobs_processed: AtomicU64,
}

impl WorkerHeartbeat {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        worker_id: impl Into<String>,
        phrase: impl Into<String>,
        use_gpu: bool,
    ) -> Self {
        Self {
            store,
            worker_id: worker_id.into(),
            hostname: hostname(),
            ip_address: local_ip_address().to_string(),
            phrase: phrase.into(),
            use_gpu,
            jobs_processed: AtomicU64::new(0),
        }
    }

    /// Override the detected host identity.
    pub fn with_host(mut self, hostname: impl Into<String>, ip_address: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self.ip_address = ip_address.into();
        self
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn jobs_processed(&self) -> u64 {
        self.jobs_processed.load(Ordering::SeqCst)
    }

    /// Count one more completed job. Returns the new total.
    pub fn record_job_processed(&self) -> u64 {
        self.jobs_processed.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Snapshot of the liveness record with `status`, stamped now.
    pub fn record(&self, status: WorkerStatus) -> HeartbeatRecord {
        HeartbeatRecord {
            worker_id: self.worker_id.clone(),
            hostname: self.hostname.clone(),
            ip_address: self.ip_address.clone(),
            last_heartbeat: Utc::now(),
            status,
            jobs_processed: self.jobs_processed(),
            phrase: self.phrase.clone(),
            use_gpu: self.use_gpu,
        }
    }

    pub async fn publish(&self, status: WorkerStatus) -> StorageResult<()> {
        let record = self.record(status);
        put_json(self.store.as_ref(), &worker_key(&self.worker_id), &record).await
    }

    /// Publish an active heartbeat, logging failure. Returns whether it was
    /// written.
    pub async fn beat(&self) -> bool {
        match self.publish(WorkerStatus::Active).await {
            Ok(()) => {
                debug!(worker_id = %self.worker_id, jobs_processed = self.jobs_processed(), "Heartbeat published");
                true
            }
            Err(e) => {
                warn!(worker_id = %self.worker_id, error = %e, "Failed to publish heartbeat");
                false
            }
        }
    }

    /// Publish the final record with `status = shutdown`.
    pub async fn publish_shutdown(&self) -> StorageResult<()> {
        self.publish(WorkerStatus::Shutdown).await
    }
}
