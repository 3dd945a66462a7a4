//! Subqueue fairness counter.
//!
//! Each queue has a companion sorted set `priority-queue-counts:<name>`
//! mapping a subqueue label to the number of its jobs that are queued or
//! in flight. The running count doubles as the next job's priority score,
//! so a burst of jobs under one label spreads out behind jobs under other
//! labels instead of starving them.

use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::error::FetchError;
use crate::keys;

/// Per-label running counters for one or more queues.
#[derive(Clone)]
pub struct SubqueueCounts {
    redis: ConnectionManager,
}

impl SubqueueCounts {
    /// Creates a counter handle from an existing connection manager.
    pub fn from_connection(redis: ConnectionManager) -> Self {
        Self { redis }
    }

    /// Atomically increments the label's counter and returns the new value.
    ///
    /// The first job under a fresh label yields 1.0, which is used directly
    /// as that job's priority score.
    pub async fn increment_and_get(&self, name: &str, label: &str) -> Result<f64, FetchError> {
        let mut conn = self.redis.clone();
        let count: f64 = conn
            .zincr(keys::subqueue_counts(name), label, 1.0)
            .await?;
        Ok(count)
    }

    /// Decrements the label's counter on acknowledge.
    ///
    /// Entries that drop below 1 are removed so stale labels do not
    /// accumulate in the counter set.
    pub async fn decrement(&self, name: &str, label: &str) -> Result<(), FetchError> {
        let mut conn = self.redis.clone();
        let counts_key = keys::subqueue_counts(name);
        let count: f64 = conn.zincr(&counts_key, label, -1.0).await?;
        if count < 1.0 {
            conn.zrem::<_, _, ()>(&counts_key, label).await?;
        }
        Ok(())
    }

    /// Current counter value for a label, if the label is known.
    pub async fn get(&self, name: &str, label: &str) -> Result<Option<f64>, FetchError> {
        let mut conn = self.redis.clone();
        let count: Option<f64> = conn.zscore(keys::subqueue_counts(name), label).await?;
        Ok(count)
    }
}
