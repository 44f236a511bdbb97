//! Periodic backend health monitoring.
//!
//! Each monitor owns its consecutive-success counter; two monitors on the
//! same backend count independently.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Notify, broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::api::backend::RagBackend;
use crate::api::types::HealthResponse;
use crate::cache::{QueryCache, QueryScope};
use crate::core::config::HealthConfig;
use crate::core::errors::ClientResult;

/// Delay between retries of a failed health check.
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Published health state.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct HealthSnapshot {
    /// Last successful response, kept while later checks fail.
    pub data: Option<HealthResponse>,
    /// No check has completed yet.
    pub is_loading: bool,
    /// The latest check failed.
    pub is_error: bool,
    /// Message of the latest failure.
    pub error: Option<String>,
    /// Time of the latest successful check.
    pub last_updated: Option<DateTime<Utc>>,
    /// Successful checks in a row; reset by a surfaced error.
    pub consecutive_successes: u64,
}

/// Health polling worker.
pub struct HealthMonitor {
    backend: Arc<dyn RagBackend>,
    config: HealthConfig,
    cache: Option<Arc<QueryCache>>,
}

impl HealthMonitor {
    /// Monitor `backend` on the configured interval.
    #[must_use]
    pub fn new(backend: Arc<dyn RagBackend>, config: HealthConfig) -> Self {
        Self {
            backend,
            config,
            cache: None,
        }
    }

    /// Share results through the cache and refetch on `Health` invalidation.
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<QueryCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Spawn the monitor as a tokio task.
    #[must_use]
    pub fn spawn(self) -> HealthHandle {
        let (tx, rx) = watch::channel(HealthSnapshot {
            is_loading: true,
            ..HealthSnapshot::default()
        });
        let shutdown = Arc::new(Notify::new());
        let worker_shutdown = Arc::clone(&shutdown);
        let handle = tokio::spawn(async move { self.run(tx, worker_shutdown).await });

        HealthHandle {
            snapshot: rx,
            shutdown,
            handle: Some(handle),
        }
    }

    async fn run(self, tx: watch::Sender<HealthSnapshot>, shutdown: Arc<Notify>) {
        let mut invalidations = self.cache.as_ref().map(|cache| cache.subscribe());
        let mut consecutive_successes = 0u64;
        info!(interval = ?self.config.interval, "Starting health monitor");

        loop {
            let outcome = tokio::select! {
                outcome = self.check() => outcome,
                () = shutdown.notified() => break,
            };

            match outcome {
                Ok(health) => {
                    consecutive_successes += 1;
                    debug!(
                        status = ?health.status,
                        documents = health.document_count,
                        consecutive_successes,
                        "Health check succeeded"
                    );
                    if let Some(cache) = &self.cache {
                        cache.set_health(&health);
                    }
                    tx.send_modify(|s| {
                        s.data = Some(health);
                        s.is_loading = false;
                        s.is_error = false;
                        s.error = None;
                        s.last_updated = Some(Utc::now());
                        s.consecutive_successes = consecutive_successes;
                    });
                }
                Err(err) => {
                    consecutive_successes = 0;
                    warn!(error = %err, "Health check failed");
                    tx.send_modify(|s| {
                        s.is_loading = false;
                        s.is_error = true;
                        s.error = Some(err.to_string());
                        s.consecutive_successes = 0;
                    });
                }
            }

            let deadline = Instant::now() + self.config.interval;
            loop {
                tokio::select! {
                    () = tokio::time::sleep_until(deadline) => break,
                    () = shutdown.notified() => {
                        info!("Health monitor shutting down");
                        return;
                    }
                    scope = next_invalidation(&mut invalidations) => {
                        if scope == QueryScope::Health {
                            debug!("Health invalidated, refetching");
                            break;
                        }
                    }
                }
            }
        }
        info!("Health monitor shutting down");
    }

    /// One check with up to `max_retries` retries on transient failures.
    async fn check(&self) -> ClientResult<HealthResponse> {
        let mut attempt = 0u32;
        loop {
            match self.backend.health().await {
                Ok(health) => return Ok(health),
                Err(err) if err.is_retryable() && attempt < self.config.max_retries => {
                    attempt += 1;
                    debug!(attempt, error = %err, "Retrying health check");
                    tokio::time::sleep(RETRY_DELAY).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Wait for the next invalidated scope. A lagged receiver is treated as a
/// `Health` invalidation; a closed or absent one never resolves.
async fn next_invalidation(rx: &mut Option<broadcast::Receiver<QueryScope>>) -> QueryScope {
    if let Some(receiver) = rx {
        match receiver.recv().await {
            Ok(scope) => return scope,
            Err(broadcast::error::RecvError::Lagged(_)) => return QueryScope::Health,
            Err(broadcast::error::RecvError::Closed) => *rx = None,
        }
    }
    std::future::pending().await
}

/// Handle on a running monitor. Dropping it stops the monitor.
pub struct HealthHandle {
    snapshot: watch::Receiver<HealthSnapshot>,
    shutdown: Arc<Notify>,
    handle: Option<JoinHandle<()>>,
}

impl HealthHandle {
    /// Latest snapshot.
    #[must_use]
    pub fn snapshot(&self) -> HealthSnapshot {
        self.snapshot.borrow().clone()
    }

    /// A receiver for snapshot changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<HealthSnapshot> {
        self.snapshot.clone()
    }

    /// Signal the monitor and wait for it to exit.
    pub async fn shutdown(mut self) {
        self.shutdown.notify_one();
        if let Some(handle) = self.handle.take()
            && let Err(e) = handle.await
        {
            warn!(error = %e, "Health monitor ended abnormally");
        }
    }
}

impl Drop for HealthHandle {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
