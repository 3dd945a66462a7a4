//! Producer-side push path.
//!
//! Mirrors the enqueue decision the fetch side depends on:
//!
//! - explicit `priority` ⇒ ZADD at that literal score
//! - `subqueue` label ⇒ score comes from the fairness counter
//! - neither ⇒ the job is not prioritized and goes to the plain FIFO list
//!
//! Priority and subqueue enqueues land in `priority-queue:<name>`; the
//! fallback LPUSHes onto `queue:<name>`, the list BasicFetch consumes.

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::debug;

use crate::error::FetchError;
use crate::job::Job;
use crate::keys;
use crate::store::{PriorityStore, SubqueueCounts};

/// Where a pushed job ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushedTo {
    /// The priority sorted set, at an explicit score.
    PriorityQueue,
    /// The priority sorted set, scored by the fairness counter.
    Subqueue,
    /// The plain FIFO list.
    BasicQueue,
}

/// Producer client for priority and plain queues.
#[derive(Clone)]
pub struct Client {
    store: PriorityStore,
    counts: SubqueueCounts,
    redis: ConnectionManager,
}

impl Client {
    /// Connects to Redis and creates a new client.
    pub async fn connect(redis_url: &str) -> Result<Self, FetchError> {
        let store = PriorityStore::connect(redis_url).await?;
        Ok(Self::from_store(store))
    }

    /// Creates a client sharing an existing store's connection.
    pub fn from_store(store: PriorityStore) -> Self {
        let redis = store.connection();
        Self {
            counts: SubqueueCounts::from_connection(redis.clone()),
            store,
            redis,
        }
    }

    /// Pushes a job onto the named queue and returns its jid.
    pub async fn push(&self, queue: &str, job: &Job) -> Result<(String, PushedTo), FetchError> {
        let payload = serde_json::to_string(job)?;

        let pushed_to = if let Some(priority) = job.priority {
            self.store.enqueue(queue, &payload, priority).await?;
            PushedTo::PriorityQueue
        } else if let Some(label) = &job.subqueue {
            let score = self.counts.increment_and_get(queue, label).await?;
            self.store.enqueue(queue, &payload, score).await?;
            PushedTo::Subqueue
        } else {
            let mut conn = self.redis.clone();
            conn.lpush::<_, _, ()>(keys::basic_queue(queue), &payload)
                .await?;
            PushedTo::BasicQueue
        };

        debug!(queue = %queue, jid = %job.jid, ?pushed_to, "Pushed job");
        Ok((job.jid.clone(), pushed_to))
    }
}
