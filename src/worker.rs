//! Worker pool driving a fetch strategy.
//!
//! Each worker is an independent async task polling the shared fetch for
//! units of work and dispatching them to a [`JobHandler`]. The pool also
//! runs the heartbeat the reliable fetch needs for liveness, and wires
//! the lifecycle hooks:
//!
//! - `start` calls `on_start` before any worker polls
//! - a heartbeat task calls `on_heartbeat` on a fixed interval
//! - `shutdown` signals the workers, calls `on_shutdown` so no new claims
//!   are taken, waits for in-flight jobs, then calls `bulk_requeue`
//!
//! A claim taken by an in-flight poll is never dropped: the worker either
//! finishes it or it lands in the shutdown bulk-requeue.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::fetch::{FetchStrategy, WorkUnit};

/// Errors that can occur in the worker pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Pool is already running.
    #[error("Pool is already running")]
    AlreadyRunning,

    /// Pool is not running.
    #[error("Pool is not running")]
    NotRunning,

    /// Shutdown timed out.
    #[error("Shutdown timed out after {0:?}")]
    ShutdownTimeout(Duration),
}

/// Outcome of handling one job.
pub type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Executes jobs pulled from the queues.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Processes one serialized job from the named queue.
    async fn perform(&self, queue: &str, job: &str) -> HandlerResult;
}

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of worker tasks to spawn.
    pub num_workers: usize,
    /// Sleep between polls when no work is available.
    pub poll_interval: Duration,
    /// Interval between heartbeats.
    pub heartbeat_interval: Duration,
    /// Timeout for graceful shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            num_workers: 4,
            poll_interval: Duration::from_secs(1),
            heartbeat_interval: Duration::from_secs(10),
            shutdown_timeout: Duration::from_secs(60),
        }
    }
}

impl WorkerPoolConfig {
    /// Creates a configuration with the specified number of workers.
    pub fn new(num_workers: usize) -> Self {
        Self {
            num_workers,
            ..Default::default()
        }
    }

    /// Sets the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the heartbeat interval.
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Sets the shutdown timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

/// Statistics about the worker pool.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    /// Total number of workers in the pool.
    pub num_workers: usize,
    /// Jobs acknowledged successfully.
    pub jobs_completed: u64,
    /// Jobs whose handler returned an error.
    pub jobs_failed: u64,
}

impl PoolStats {
    /// Total number of jobs processed (completed + failed).
    pub fn total_processed(&self) -> u64 {
        self.jobs_completed + self.jobs_failed
    }
}

struct SharedPoolStats {
    jobs_completed: AtomicU64,
    jobs_failed: AtomicU64,
}

impl SharedPoolStats {
    fn new() -> Self {
        Self {
            jobs_completed: AtomicU64::new(0),
            jobs_failed: AtomicU64::new(0),
        }
    }

    fn to_pool_stats(&self, num_workers: usize) -> PoolStats {
        PoolStats {
            num_workers,
            jobs_completed: self.jobs_completed.load(Ordering::SeqCst),
            jobs_failed: self.jobs_failed.load(Ordering::SeqCst),
        }
    }
}

/// Pool of workers polling one fetch strategy.
pub struct WorkerPool {
    config: WorkerPoolConfig,
    fetch: Arc<dyn FetchStrategy>,
    handler: Arc<dyn JobHandler>,
    shutdown_tx: broadcast::Sender<()>,
    worker_handles: Vec<JoinHandle<()>>,
    heartbeat_handle: Option<JoinHandle<()>>,
    stats: Arc<SharedPoolStats>,
    is_running: AtomicBool,
}

impl WorkerPool {
    /// Creates a new worker pool.
    pub fn new(
        config: WorkerPoolConfig,
        fetch: Arc<dyn FetchStrategy>,
        handler: Arc<dyn JobHandler>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            fetch,
            handler,
            shutdown_tx,
            worker_handles: Vec::new(),
            heartbeat_handle: None,
            stats: Arc::new(SharedPoolStats::new()),
            is_running: AtomicBool::new(false),
        }
    }

    /// Starts the workers and the heartbeat task.
    ///
    /// Runs the fetch's startup hook first, so crash recovery and process
    /// registration happen before the first poll.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::AlreadyRunning` if the pool is already running.
    pub async fn start(&mut self) -> Result<(), PoolError> {
        if self.is_running.load(Ordering::SeqCst) {
            return Err(PoolError::AlreadyRunning);
        }

        self.fetch.on_start().await;

        for i in 0..self.config.num_workers {
            let worker = Worker {
                id: format!("worker-{}", i),
                fetch: Arc::clone(&self.fetch),
                handler: Arc::clone(&self.handler),
                shutdown_rx: self.shutdown_tx.subscribe(),
                poll_interval: self.config.poll_interval,
                stats: Arc::clone(&self.stats),
            };

            self.worker_handles.push(tokio::spawn(async move {
                worker.run().await;
            }));
        }

        let fetch = Arc::clone(&self.fetch);
        let mut heartbeat_rx = self.shutdown_tx.subscribe();
        let heartbeat_interval = self.config.heartbeat_interval;
        self.heartbeat_handle = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(heartbeat_interval);
            ticker.tick().await; // First tick fires immediately; on_start already registered.
            loop {
                tokio::select! {
                    _ = ticker.tick() => fetch.on_heartbeat().await,
                    _ = heartbeat_rx.recv() => break,
                }
            }
        }));

        self.is_running.store(true, Ordering::SeqCst);
        info!(num_workers = self.config.num_workers, "Worker pool started");
        Ok(())
    }

    /// Gracefully shuts down the pool.
    ///
    /// Workers finish their current jobs; whatever remains claimed is
    /// handed to the fetch's bulk requeue.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::ShutdownTimeout` if workers don't stop within
    /// the configured timeout.
    pub async fn shutdown(&mut self) -> Result<(), PoolError> {
        if !self.is_running.load(Ordering::SeqCst) {
            return Err(PoolError::NotRunning);
        }

        info!("Initiating worker pool shutdown");

        // Stop new claims first, then wake everyone up.
        self.fetch.on_shutdown().await;
        let _ = self.shutdown_tx.send(());

        let workers = self.worker_handles.drain(..).collect::<Vec<_>>();
        let heartbeat = self.heartbeat_handle.take();
        let join_all = async {
            for handle in workers {
                if let Err(e) = handle.await {
                    error!(error = %e, "Worker task panicked during shutdown");
                }
            }
            if let Some(handle) = heartbeat {
                let _ = handle.await;
            }
        };

        let result = match tokio::time::timeout(self.config.shutdown_timeout, join_all).await {
            Ok(()) => Ok(()),
            Err(_) => Err(PoolError::ShutdownTimeout(self.config.shutdown_timeout)),
        };
        self.is_running.store(false, Ordering::SeqCst);

        // Even on a join timeout, give unfinished claims back.
        self.fetch.bulk_requeue(&[]).await;

        if result.is_ok() {
            info!("Worker pool shutdown complete");
        }
        result
    }

    /// Current pool statistics.
    pub fn stats(&self) -> PoolStats {
        self.stats.to_pool_stats(self.config.num_workers)
    }

    /// Whether the pool is currently running.
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }
}

/// A single polling worker.
struct Worker {
    id: String,
    fetch: Arc<dyn FetchStrategy>,
    handler: Arc<dyn JobHandler>,
    shutdown_rx: broadcast::Receiver<()>,
    poll_interval: Duration,
    stats: Arc<SharedPoolStats>,
}

impl Worker {
    async fn run(mut self) {
        info!(worker_id = %self.id, "Worker started");

        loop {
            match self.shutdown_rx.try_recv() {
                Ok(()) | Err(broadcast::error::TryRecvError::Closed) => {
                    info!(worker_id = %self.id, "Worker received shutdown signal");
                    break;
                }
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(broadcast::error::TryRecvError::Empty) => {}
            }

            match self.fetch.retrieve_work().await {
                Ok(Some(unit)) => self.process(unit.as_ref()).await,
                Ok(None) => {
                    debug!(worker_id = %self.id, "No work available");
                    tokio::time::sleep(self.poll_interval).await;
                }
                Err(e) => {
                    error!(worker_id = %self.id, error = %e, "Failed to retrieve work");
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }

        info!(worker_id = %self.id, "Worker stopped");
    }

    async fn process(&self, unit: &dyn WorkUnit) {
        let queue = unit.queue_name().to_string();

        match self.handler.perform(&queue, unit.job()).await {
            Ok(()) => {
                self.stats.jobs_completed.fetch_add(1, Ordering::SeqCst);
                unit.acknowledge().await;
                debug!(worker_id = %self.id, queue = %queue, "Job completed");
            }
            Err(e) => {
                self.stats.jobs_failed.fetch_add(1, Ordering::SeqCst);
                warn!(worker_id = %self.id, queue = %queue, error = %e, "Job failed, requeueing");
                unit.requeue().await;
            }
        }
    }
}
