//! Administrative read path.
//!
//! Thin inspection layer over the priority queues for tooling and web
//! UIs: enumerate queues, read paginated contents with scores, delete a
//! specific job by exact serialized match.

use crate::error::FetchError;
use crate::keys;
use crate::store::PriorityStore;

/// Jobs returned per page.
pub const PAGE_SIZE: usize = 25;

/// A read-only handle on one priority queue.
#[derive(Clone)]
pub struct Queue {
    name: String,
    store: PriorityStore,
}

impl Queue {
    /// Creates a handle on the named queue.
    pub fn new(name: impl Into<String>, store: PriorityStore) -> Self {
        Self {
            name: name.into(),
            store,
        }
    }

    /// The queue's bare name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of queued jobs (claimed jobs are not counted).
    pub async fn size(&self) -> Result<usize, FetchError> {
        self.store.size(&self.name).await
    }

    /// One page of (job, score) entries in claim order.
    pub async fn page(&self, page: usize) -> Result<Vec<(String, f64)>, FetchError> {
        self.store.page(&self.name, page, PAGE_SIZE).await
    }

    /// Deletes a job by exact serialized match. Returns whether it existed.
    pub async fn delete_job(&self, job: &str) -> Result<bool, FetchError> {
        self.store.delete_job(&self.name, job).await
    }

    /// Enumerates all existing priority queues, sorted by name.
    pub async fn all(store: &PriorityStore) -> Result<Vec<Queue>, FetchError> {
        let queue_keys = store.list_queue_keys().await?;
        Ok(queue_keys
            .iter()
            .map(|key| Queue::new(keys::queue_name(key), store.clone()))
            .collect())
    }
}
