//! Shutdown signals, preemption notices and the single cleanup path.
//!
//! Every termination source calls [`TerminationController::trigger`]. The
//! main loop watches a [`ShutdownSignal`] and stops at its next checkpoint;
//! if it has not finished within the grace period the controller cleans up
//! on its own and exits the process.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use reqwest::StatusCode;
use tokio::sync::{watch, OnceCell};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use vscan_media::Transcriber;

use crate::heartbeat::WorkerHeartbeat;

/// Read side of the shutdown flag.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once shutdown has been requested.
    pub async fn triggered(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                // Sender gone without ever triggering.
                std::future::pending::<()>().await;
            }
        }
    }
}

struct Inner {
    tx: watch::Sender<bool>,
    reason: OnceLock<String>,
    cleanup: OnceCell<()>,
    transcriber: Arc<dyn Transcriber>,
    heartbeat: Arc<WorkerHeartbeat>,
    grace: Duration,
    exit_on_grace: AtomicBool,
}

/// Owns the shutdown flag and the idempotent cleanup.
#[derive(Clone)]
pub struct TerminationController {
    inner: Arc<Inner>,
}

impl TerminationController {
    pub fn new(
        transcriber: Arc<dyn Transcriber>,
        heartbeat: Arc<WorkerHeartbeat>,
        grace: Duration,
    ) -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                tx,
                reason: OnceLock::new(),
                cleanup: OnceCell::new(),
                transcriber,
                heartbeat,
                grace,
                exit_on_grace: AtomicBool::new(false),
            }),
        }
    }

    /// Exit the process when the grace period runs out. Off by default.
    pub fn set_exit_on_grace(&self, exit: bool) {
        self.inner.exit_on_grace.store(exit, Ordering::SeqCst);
    }

    pub fn subscribe(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.inner.tx.subscribe(),
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.inner.reason.get().is_some()
    }

    /// Why shutdown was requested, once it has been.
    pub fn reason(&self) -> Option<&str> {
        self.inner.reason.get().map(String::as_str)
    }

    pub fn is_cleaned_up(&self) -> bool {
        self.inner.cleanup.initialized()
    }

    /// Request shutdown. Only the first call has any effect; returns whether
    /// this call was it.
    pub fn trigger(&self, reason: &str) -> bool {
        if self.inner.reason.set(reason.to_string()).is_err() {
            debug!(reason, "Shutdown already requested");
            return false;
        }

        warn!(reason, "Termination requested, stopping at next checkpoint");
        self.inner.tx.send_replace(true);

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let this = self.clone();
                handle.spawn(async move { this.enforce_grace().await });
            }
            Err(_) => warn!("No runtime available; grace period will not be enforced"),
        }
        true
    }

    async fn enforce_grace(&self) {
        tokio::time::sleep(self.inner.grace).await;
        if !self.is_cleaned_up() {
            warn!(
                grace_secs = self.inner.grace.as_secs(),
                "Main loop did not stop within grace period"
            );
        }
        self.cleanup().await;
        if self.inner.exit_on_grace.load(Ordering::SeqCst) {
            info!("Exiting after termination");
            std::process::exit(0);
        }
    }

    /// Release engine resources and publish the shutdown heartbeat.
    ///
    /// The body runs at most once; concurrent callers wait for it.
    pub async fn cleanup(&self) {
        self.inner
            .cleanup
            .get_or_init(|| async {
                info!("Cleaning up before exit");
                if let Err(e) = self.inner.transcriber.release().await {
                    warn!(error = %e, "Failed to release transcription engine");
                }
                if let Err(e) = self.inner.heartbeat.publish_shutdown().await {
                    warn!(error = %e, "Failed to publish shutdown heartbeat");
                }
            })
            .await;
    }

    /// Trigger on SIGTERM or SIGINT.
    pub fn install_signal_handlers(&self) -> std::io::Result<JoinHandle<()>> {
        #[cfg(unix)]
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

        let this = self.clone();
        Ok(tokio::spawn(async move {
            #[cfg(unix)]
            let reason = tokio::select! {
                _ = sigterm.recv() => "SIGTERM",
                result = tokio::signal::ctrl_c() => match result {
                    Ok(()) => "SIGINT",
                    Err(e) => {
                        error!(error = %e, "Failed to listen for SIGINT");
                        sigterm.recv().await;
                        "SIGTERM"
                    }
                },
            };

            #[cfg(not(unix))]
            let reason = match tokio::signal::ctrl_c().await {
                Ok(()) => "SIGINT",
                Err(e) => {
                    error!(error = %e, "Failed to listen for Ctrl-C");
                    return;
                }
            };

            info!(signal = reason, "Received shutdown signal");
            this.trigger(reason);
        }))
    }

    /// Poll a preemption notice endpoint every `interval` and trigger when it
    /// answers 200.
    pub fn spawn_preemption_watch(
        &self,
        url: impl Into<String>,
        interval: Duration,
        request_timeout: Duration,
    ) -> Result<JoinHandle<()>, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(request_timeout).build()?;
        let url = url.into();
        let this = self.clone();
        let shutdown = self.subscribe();

        info!(url = %url, interval_secs = interval.as_secs(), "Watching for preemption notices");
        Ok(tokio::spawn(async move {
            loop {
                if shutdown.is_triggered() {
                    break;
                }
                if check_preemption(&client, &url).await {
                    warn!("Preemption notice received");
                    this.trigger("preemption notice");
                    break;
                }
                tokio::select! {
                    _ = shutdown.triggered() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
        }))
    }
}

/// Whether the notice endpoint reports an imminent preemption.
///
/// Anything other than HTTP 200, including connection errors, means no.
pub async fn check_preemption(client: &reqwest::Client, url: &str) -> bool {
    match client.get(url).send().await {
        Ok(response) => response.status() == StatusCode::OK,
        Err(e) => {
            debug!(error = %e, "Preemption endpoint unreachable");
            false
        }
    }
}
