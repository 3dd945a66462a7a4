//! Non-claiming priority fetch source.
//!
//! Pops the highest-scoring job straight out of each probed sorted set.
//! There is no WIP tracking: a popped job that is never acknowledged is
//! gone. Use [`ReliableFetch`](super::ReliableFetch) when crash recovery
//! matters.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::{debug, info, warn};

use crate::config::FetchConfig;
use crate::error::FetchError;
use crate::keys;
use crate::store::PriorityStore;

use super::{settle_subqueue_count, ClaimedJob, FetchStrategy, QueueSet, WorkUnit};

/// Score-ordered fetch over priority sorted sets.
pub struct PriorityFetch {
    store: PriorityStore,
    queues: QueueSet,
}

impl PriorityFetch {
    /// Creates a priority fetch for the configured queues.
    ///
    /// # Errors
    ///
    /// Returns `FetchError::Config` for an empty queue list.
    pub fn new(config: &FetchConfig, redis: ConnectionManager) -> Result<Self, FetchError> {
        config.validate()?;
        let queue_keys = config
            .queues
            .iter()
            .map(|q| keys::priority_queue(q))
            .collect();

        Ok(Self {
            store: PriorityStore::from_connection(redis),
            queues: QueueSet::new(queue_keys, config.strict),
        })
    }

    /// The queue keys probed on one pass, in probe order.
    pub fn queues_cmd(&self) -> Vec<String> {
        self.queues.probe_order()
    }
}

#[async_trait]
impl FetchStrategy for PriorityFetch {
    async fn retrieve_work(&self) -> Result<Option<Box<dyn WorkUnit>>, FetchError> {
        for queue_key in self.queues_cmd() {
            if let Some(job) = self.store.pop_highest(&queue_key).await? {
                return Ok(Some(Box::new(PriorityUnit {
                    queue_key,
                    job,
                    redis: self.store.connection(),
                })));
            }
        }
        Ok(None)
    }

    async fn bulk_requeue(&self, in_progress: &[ClaimedJob]) {
        if in_progress.is_empty() {
            return;
        }

        debug!("Re-queueing terminated jobs");
        let mut jobs_by_queue: Vec<(String, Vec<String>)> = Vec::new();
        for claimed in in_progress {
            match jobs_by_queue
                .iter_mut()
                .find(|(queue, _)| queue == &claimed.queue_key)
            {
                Some((_, jobs)) => jobs.push(claimed.job.clone()),
                None => jobs_by_queue.push((claimed.queue_key.clone(), vec![claimed.job.clone()])),
            }
        }

        match self.store.requeue_jobs(&jobs_by_queue).await {
            Ok(count) => info!(jobs = count, "Pushed jobs back to Redis"),
            Err(e) => {
                warn!(jobs = in_progress.len(), error = %e, "Failed to requeue jobs");
            }
        }
    }

    fn owns_queue_key(&self, queue_key: &str) -> bool {
        queue_key.starts_with(keys::PRIORITY_QUEUE_PREFIX)
    }
}

/// A job popped from a priority queue without a claim set.
struct PriorityUnit {
    queue_key: String,
    job: String,
    redis: ConnectionManager,
}

#[async_trait]
impl WorkUnit for PriorityUnit {
    fn queue_key(&self) -> &str {
        &self.queue_key
    }

    fn job(&self) -> &str {
        &self.job
    }

    async fn acknowledge(&self) -> bool {
        match settle_subqueue_count(&self.redis, &self.queue_key, &self.job).await {
            Ok(()) => true,
            Err(e) => {
                warn!(queue = %self.queue_key, error = %e, "Failed to settle subqueue count");
                false
            }
        }
    }

    async fn requeue(&self) -> bool {
        let mut conn = self.redis.clone();
        match conn
            .zadd::<_, _, _, ()>(&self.queue_key, &self.job, 0.0)
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
