//! Redis-backed priority store.
//!
//! This module owns the sorted-set representation of priority queues and
//! the atomic claim protocol:
//!
//! - **PriorityStore**: enqueue, size, atomic pop/claim, enumeration
//! - **SubqueueCounts**: the per-label fairness counter
//! - **scripts**: the server-side Lua used for atomic pop and claim
//!
//! A queue named `foo` lives in the sorted set `priority-queue:foo` with
//! the serialized job as member and its priority as score. Claiming moves
//! the highest-scoring member into a per-process WIP set in one
//! server-side step.

pub mod counts;
pub mod scripts;

use std::sync::Arc;

use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use tracing::debug;

use crate::error::FetchError;
use crate::keys;

pub use counts::SubqueueCounts;

/// Sorted-set abstraction over priority queues.
///
/// Cheap to clone; the underlying `ConnectionManager` multiplexes a single
/// reconnecting connection.
#[derive(Clone)]
pub struct PriorityStore {
    redis: ConnectionManager,
    pop_script: Arc<Script>,
    claim_script: Arc<Script>,
}

impl PriorityStore {
    /// Connects to Redis and creates a new store.
    ///
    /// # Errors
    ///
    /// Returns `FetchError::ConnectionFailed` if the connection fails.
    pub async fn connect(redis_url: &str) -> Result<Self, FetchError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| FetchError::ConnectionFailed(e.to_string()))?;

        let redis = ConnectionManager::new(client)
            .await
            .map_err(|e| FetchError::ConnectionFailed(e.to_string()))?;

        Ok(Self::from_connection(redis))
    }

    /// Creates a store from an existing connection manager.
    ///
    /// Useful when sharing a connection across multiple components.
    pub fn from_connection(redis: ConnectionManager) -> Self {
        Self {
            redis,
            pop_script: Arc::new(scripts::pop_highest()),
            claim_script: Arc::new(scripts::claim_highest()),
        }
    }

    /// Returns a clone of the underlying connection manager.
    pub fn connection(&self) -> ConnectionManager {
        self.redis.clone()
    }

    /// Inserts (or re-scores) a serialized job in a queue.
    ///
    /// ZADD semantics: enqueueing the same payload twice updates its score
    /// instead of duplicating it.
    pub async fn enqueue(&self, name: &str, job: &str, score: f64) -> Result<(), FetchError> {
        let mut conn = self.redis.clone();
        conn.zadd::<_, _, _, ()>(keys::priority_queue(name), job, score)
            .await?;
        Ok(())
    }

    /// Number of jobs currently queued (claimed jobs are not counted).
    pub async fn size(&self, name: &str) -> Result<usize, FetchError> {
        let mut conn = self.redis.clone();
        let len: usize = conn.zcard(keys::priority_queue(name)).await?;
        Ok(len)
    }

    /// Atomically removes and returns the highest-scoring job, if any.
    ///
    /// Ties are broken by the sorted set's lexicographic member order.
    pub async fn pop_highest(&self, queue_key: &str) -> Result<Option<String>, FetchError> {
        let mut conn = self.redis.clone();
        let job: Option<String> = self
            .pop_script
            .key(queue_key)
            .invoke_async(&mut conn)
            .await?;
        Ok(job)
    }

    /// Atomically moves the highest-scoring job into a claim set.
    ///
    /// Returns the claimed job, or `None` when the queue is empty. Another
    /// process winning the race is indistinguishable from an empty queue,
    /// which is exactly the contract callers rely on.
    pub async fn claim_highest(
        &self,
        queue_key: &str,
        wip_key: &str,
    ) -> Result<Option<String>, FetchError> {
        let mut conn = self.redis.clone();
        let job: Option<String> = self
            .claim_script
            .key(queue_key)
            .key(wip_key)
            .invoke_async(&mut conn)
            .await?;
        Ok(job)
    }

    /// Enumerates existing priority queue keys via SCAN, sorted.
    ///
    /// Eventually consistent with actual queue existence; an empty sorted
    /// set disappears from the key space.
    pub async fn list_queue_keys(&self) -> Result<Vec<String>, FetchError> {
        let mut conn = self.redis.clone();
        let pattern = format!("{}*", keys::PRIORITY_QUEUE_PREFIX);

        let mut found = Vec::new();
        let mut iter: redis::AsyncIter<String> = conn.scan_match(&pattern).await?;
        while let Some(key) = iter.next_item().await {
            found.push(key);
        }
        found.sort();
        Ok(found)
    }

    /// Pushes jobs back into their queues, pipelined, at score 0.
    ///
    /// Score 0 matches what every recovery path has always written; see
    /// DESIGN.md for the ordering caveat.
    pub async fn requeue_jobs(
        &self,
        jobs_by_queue: &[(String, Vec<String>)],
    ) -> Result<usize, FetchError> {
        let mut total = 0;
        let mut pipe = redis::pipe();
        for (queue_key, jobs) in jobs_by_queue {
            for job in jobs {
                pipe.zadd(queue_key, job, 0.0);
                total += 1;
            }
        }
        if total == 0 {
            return Ok(0);
        }

        let mut conn = self.redis.clone();
        pipe.query_async::<_, ()>(&mut conn).await?;
        debug!(jobs = total, "Requeued jobs into priority queues");
        Ok(total)
    }

    /// Reads one page of a queue in claim order (highest score first).
    pub async fn page(
        &self,
        name: &str,
        page: usize,
        page_size: usize,
    ) -> Result<Vec<(String, f64)>, FetchError> {
        let mut conn = self.redis.clone();
        let start = (page * page_size) as isize;
        let stop = start + page_size as isize - 1;
        let entries: Vec<(String, f64)> = conn
            .zrevrange_withscores(keys::priority_queue(name), start, stop)
            .await?;
        Ok(entries)
    }

    /// Deletes a job by exact serialized match. Returns whether it existed.
    pub async fn delete_job(&self, name: &str, job: &str) -> Result<bool, FetchError> {
        let mut conn = self.redis.clone();
        let removed: usize = conn.zrem(keys::priority_queue(name), job).await?;
        Ok(removed > 0)
    }
}
