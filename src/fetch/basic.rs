//! Plain FIFO fetch source.
//!
//! Pops from `queue:<name>` lists with BRPOP, honoring the configured
//! blocking timeout. This is the only strategy where the timeout means
//! anything; the priority claims are server-side scripts and return
//! immediately.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::{debug, info, warn};

use crate::config::FetchConfig;
use crate::error::FetchError;
use crate::keys;

use super::{ClaimedJob, FetchStrategy, QueueSet, WorkUnit};

/// FIFO fetch over plain Redis lists.
pub struct BasicFetch {
    redis: ConnectionManager,
    queues: QueueSet,
    timeout_secs: f64,
}

impl BasicFetch {
    /// Creates a FIFO fetch for the configured queues.
    ///
    /// # Errors
    ///
    /// Returns `FetchError::Config` for an empty queue list.
    pub fn new(config: &FetchConfig, redis: ConnectionManager) -> Result<Self, FetchError> {
        config.validate()?;
        let queue_keys = config.queues.iter().map(|q| keys::basic_queue(q)).collect();

        Ok(Self {
            redis,
            queues: QueueSet::new(queue_keys, config.strict),
            timeout_secs: blocking_timeout_secs(config),
        })
    }

    /// The queue keys probed on one pass, in probe order.
    pub fn queues_cmd(&self) -> Vec<String> {
        self.queues.probe_order()
    }
}

#[async_trait]
impl FetchStrategy for BasicFetch {
    async fn retrieve_work(&self) -> Result<Option<Box<dyn WorkUnit>>, FetchError> {
        let mut conn = self.redis.clone();

        // One BRPOP across all keys; Redis serves them left to right, so
        // the probe order doubles as the queue precedence for this pass.
        let popped: Option<(String, String)> = conn
            .brpop(self.queues_cmd(), self.timeout_secs)
            .await?;

        Ok(popped.map(|(queue_key, job)| {
            Box::new(BasicUnit {
                queue_key,
                job,
                redis: self.redis.clone(),
            }) as Box<dyn WorkUnit>
        }))
    }

    async fn bulk_requeue(&self, in_progress: &[ClaimedJob]) {
        if in_progress.is_empty() {
            return;
        }

        debug!("Re-queueing terminated jobs");
        let mut pipe = redis::pipe();
        for claimed in in_progress {
            pipe.rpush(&claimed.queue_key, &claimed.job);
        }

        let mut conn = self.redis.clone();
        match pipe.query_async::<_, ()>(&mut conn).await {
            Ok(()) => info!(jobs = in_progress.len(), "Pushed jobs back to Redis"),
            Err(e) => warn!(jobs = in_progress.len(), error = %e, "Failed to requeue jobs"),
        }
    }

    fn owns_queue_key(&self, queue_key: &str) -> bool {
        !queue_key.starts_with(keys::PRIORITY_QUEUE_PREFIX)
    }
}

/// BRPOP timeout in seconds, floored at 1 so a zero-duration config
/// cannot turn the pop into an indefinite block (0 means "forever" to
/// Redis).
fn blocking_timeout_secs(config: &FetchConfig) -> f64 {
    config.fifo_timeout.as_secs_f64().max(1.0)
}

/// A job popped from a FIFO list.
///
/// BRPOP already removed it from Redis, so acknowledge has nothing to do
/// and an unacknowledged job is lost on crash. Reliability is what the
/// priority strategies add.
struct BasicUnit {
    queue_key: String,
    job: String,
    redis: ConnectionManager,
}

#[async_trait]
impl WorkUnit for BasicUnit {
    fn queue_key(&self) -> &str {
        &self.queue_key
    }

    fn job(&self) -> &str {
        &self.job
    }

    async fn acknowledge(&self) -> bool {
        true
    }

    async fn requeue(&self) -> bool {
        let mut conn = self.redis.clone();
        match conn
            .rpush::<_, _, ()>(&self.queue_key, &self.job)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                warn!(queue = %self.queue_key, error = %e, "Failed to requeue job");
                false
            }
        }
    }
}
