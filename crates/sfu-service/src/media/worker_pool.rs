//! Worker pool balancer.
//!
//! A fixed set of media workers created at startup. Rooms are assigned
//! round-robin; the pool knows nothing about rooms. A worker terminating
//! unexpectedly is fatal: the pool records which worker died and resolves
//! [`WorkerPool::worker_died`] so the binary can exit non-zero.

use super::engine::{MediaEngine, Worker, WorkerSettings};
use crate::errors::SfuError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

/// Round-robin pool of media workers.
pub struct WorkerPool {
    workers: Vec<Arc<dyn Worker>>,
    cursor: AtomicUsize,
    death: CancellationToken,
    dead_worker: Arc<OnceLock<String>>,
    monitors: CancellationToken,
}

impl WorkerPool {
    /// Create `count` workers and start watching each for termination.
    #[instrument(skip_all, name = "sfu.media.workers", fields(count = count))]
    pub async fn init(
        engine: &dyn MediaEngine,
        count: usize,
        settings: WorkerSettings,
    ) -> Result<Self, SfuError> {
        if count == 0 {
            return Err(SfuError::ResourceExhausted(
                "worker pool requires at least one worker".to_string(),
            ));
        }

        let death = CancellationToken::new();
        let dead_worker = Arc::new(OnceLock::new());
        let monitors = CancellationToken::new();
        let mut workers = Vec::with_capacity(count);

        for _ in 0..count {
            let worker = engine.create_worker(settings.clone()).await?;
            info!(
                target: "sfu.media.workers",
                worker_id = %worker.id(),
                rtc_min_port = settings.rtc_min_port,
                rtc_max_port = settings.rtc_max_port,
                "Media worker created"
            );

            let watched = Arc::clone(&worker);
            let death = death.clone();
            let dead_worker = Arc::clone(&dead_worker);
            let monitors = monitors.clone();
            tokio::spawn(async move {
                tokio::select! {
                    () = watched.died() => {
                        error!(
                            target: "sfu.media.workers",
                            worker_id = %watched.id(),
                            "Media worker died"
                        );
                        let _ = dead_worker.set(watched.id().to_string());
                        death.cancel();
                    }
                    () = monitors.cancelled() => {}
                }
            });

            workers.push(worker);
        }

        Ok(Self {
            workers,
            cursor: AtomicUsize::new(0),
            death,
            dead_worker,
            monitors,
        })
    }

    /// Next worker in round-robin order.
    pub fn next(&self) -> Result<Arc<dyn Worker>, SfuError> {
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.workers.len().max(1);
        self.workers
            .get(index)
            .cloned()
            .ok_or_else(|| SfuError::ResourceExhausted("no media workers".to_string()))
    }

    /// Completes with the id of the first worker to die.
    pub async fn worker_died(&self) -> String {
        self.death.cancelled().await;
        self.dead_worker.get().cloned().unwrap_or_default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.monitors.cancel();
    }
}
