//! Work retrieval strategies.
//!
//! Every strategy answers the same polling interface:
//!
//! - **BasicFetch**: blocking pop from plain FIFO lists
//! - **PriorityFetch**: score-ordered pop from priority sorted sets
//! - **ReliableFetch**: score-ordered claim into a per-process WIP set,
//!   with liveness registration and crash recovery
//! - **CombinedFetch**: first-source-wins composition of the above
//!
//! A successful retrieval hands the worker a [`WorkUnit`]; the worker
//! processes it and calls `acknowledge` (done) or `requeue` (give it
//! back). Both are best-effort: a Redis hiccup is logged, never raised,
//! because the surrounding worker loop must not stall on one store
//! incident.

pub mod basic;
pub mod combined;
pub mod priority;
pub mod reliable;

use async_trait::async_trait;
use rand::seq::SliceRandom;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde_json::Value;
use tracing::warn;

use crate::error::FetchError;
use crate::keys;

pub use basic::BasicFetch;
pub use combined::CombinedFetch;
pub use priority::PriorityFetch;
pub use reliable::ReliableFetch;

/// A claimed (queue key, serialized job) pair.
///
/// This is the value form of a unit of work used for bulk-requeue
/// routing; it carries no behavior of its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimedJob {
    /// Full Redis key of the originating queue.
    pub queue_key: String,
    /// Opaque serialized payload.
    pub job: String,
}

impl ClaimedJob {
    /// Creates a claimed-job pair.
    pub fn new(queue_key: impl Into<String>, job: impl Into<String>) -> Self {
        Self {
            queue_key: queue_key.into(),
            job: job.into(),
        }
    }
}

/// A unit of work owned exclusively by the worker that received it.
///
/// One concrete type per fetch strategy; workers depend only on this
/// interface.
#[async_trait]
pub trait WorkUnit: Send + Sync {
    /// Full Redis key of the queue the job came from.
    fn queue_key(&self) -> &str;

    /// The opaque serialized payload.
    fn job(&self) -> &str;

    /// Bare queue name with key prefixes stripped.
    fn queue_name(&self) -> &str {
        keys::queue_name(self.queue_key())
    }

    /// Marks the job done.
    ///
    /// Best-effort: returns `false` if the underlying store operations
    /// failed (already logged). The job has been processed either way, so
    /// failures must not crash the worker.
    async fn acknowledge(&self) -> bool;

    /// Gives the job back without processing it.
    async fn requeue(&self) -> bool;

    /// The value form of this unit, for bulk-requeue routing.
    fn claimed(&self) -> ClaimedJob {
        ClaimedJob::new(self.queue_key(), self.job())
    }
}

/// A source of work the worker runtime polls.
#[async_trait]
pub trait FetchStrategy: Send + Sync {
    /// Attempts to retrieve one unit of work.
    ///
    /// Returns `Ok(None)` when every probed queue is empty or the source
    /// has been shut down.
    async fn retrieve_work(&self) -> Result<Option<Box<dyn WorkUnit>>, FetchError>;

    /// Pushes terminated in-progress jobs back at graceful shutdown.
    ///
    /// Sources that track their own claim sets ignore `in_progress` and
    /// recover from their internal state instead. Errors are logged and
    /// swallowed; shutdown must not hang on the store.
    async fn bulk_requeue(&self, in_progress: &[ClaimedJob]);

    /// Whether a queue key follows this source's naming convention.
    ///
    /// Used by [`CombinedFetch`] to route bulk-requeue partitions.
    fn owns_queue_key(&self, queue_key: &str) -> bool;

    /// Called by the host runtime once at process startup.
    async fn on_start(&self) {}

    /// Called by the host runtime on every periodic heartbeat.
    async fn on_heartbeat(&self) {}

    /// Called by the host runtime when shutdown begins.
    async fn on_shutdown(&self) {}
}

/// The set of queue keys a fetch probes, plus its ordering policy.
///
/// Strict ordering probes in exact caller-given order with duplicates
/// removed once; otherwise each probe pass uses a fresh shuffle of the
/// de-duplicated keys so equally-weighted queues share the load.
#[derive(Debug, Clone)]
pub(crate) struct QueueSet {
    queue_keys: Vec<String>,
    strict: bool,
}

impl QueueSet {
    pub(crate) fn new(queue_keys: Vec<String>, strict: bool) -> Self {
        let queue_keys = if strict { dedup(queue_keys) } else { queue_keys };
        Self { queue_keys, strict }
    }

    /// All configured keys (strict sets are already de-duplicated).
    pub(crate) fn queue_keys(&self) -> &[String] {
        &self.queue_keys
    }

    /// The configured keys with duplicates removed, in first-seen order.
    pub(crate) fn unique_keys(&self) -> Vec<String> {
        dedup(self.queue_keys.clone())
    }

    /// The key order for one probe pass.
    pub(crate) fn probe_order(&self) -> Vec<String> {
        if self.strict {
            self.queue_keys.clone()
        } else {
            let mut order = self.queue_keys.clone();
            order.shuffle(&mut rand::rng());
            dedup(order)
        }
    }
}

fn dedup(queue_keys: Vec<String>) -> Vec<String> {
    let mut seen = Vec::with_capacity(queue_keys.len());
    for key in queue_keys {
        if !seen.contains(&key) {
            seen.push(key);
        }
    }
    seen
}

/// Settles the fairness counter for an acknowledged job.
///
/// A payload that does not parse still counts as acknowledged; the
/// decrement is skipped with a warning rather than failing the whole
/// acknowledge.
pub(crate) async fn settle_subqueue_count(
    redis: &ConnectionManager,
    queue_key: &str,
    job: &str,
) -> Result<(), FetchError> {
    let label = match serde_json::from_str::<Value>(job) {
        Ok(parsed) => match crate::job::subqueue_label(&parsed) {
            Some(label) => label,
            None => return Ok(()),
        },
        Err(e) => {
            warn!(queue = %queue_key, error = %e, "Unparseable job payload, skipping subqueue decrement");
            return Ok(());
        }
    };

    let counts_key = keys::subqueue_counts(keys::queue_name(queue_key));
    let mut conn = redis.clone();
    let count: f64 = conn.zincr(&counts_key, &label, -1.0).await?;
    if count < 1.0 {
        conn.zrem::<_, _, ()>(&counts_key, &label).await?;
    }
    Ok(())
}
