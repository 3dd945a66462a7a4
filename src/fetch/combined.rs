//! First-source-wins composition of fetch strategies.
//!
//! The source list is built once, explicitly, at construction; sources
//! earlier in the list are effectively higher priority. Mixing a
//! [`BasicFetch`](super::BasicFetch) with a priority strategy gives one
//! polling interface over both queue families.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::error::FetchError;

use super::{ClaimedJob, FetchStrategy, WorkUnit};

/// An ordered, immutable list of fetch sources behind one polling interface.
pub struct CombinedFetch {
    fetches: Vec<Arc<dyn FetchStrategy>>,
}

impl CombinedFetch {
    /// Creates a combined fetch over the given sources, probed in order.
    pub fn new(fetches: Vec<Arc<dyn FetchStrategy>>) -> Self {
        Self { fetches }
    }

    /// Number of composed sources.
    pub fn len(&self) -> usize {
        self.fetches.len()
    }

    /// Whether the source list is empty.
    pub fn is_empty(&self) -> bool {
        self.fetches.is_empty()
    }
}

#[async_trait]
impl FetchStrategy for CombinedFetch {
    async fn retrieve_work(&self) -> Result<Option<Box<dyn WorkUnit>>, FetchError> {
        for fetch in &self.fetches {
            match fetch.retrieve_work().await {
                Ok(Some(unit)) => return Ok(Some(unit)),
                Ok(None) => {}
                Err(e) => {
                    // One failing source degrades to "no work from it this
                    // cycle"; the remaining sources still get probed.
                    warn!(error = %e, "Fetch source failed, trying next");
                }
            }
        }
        Ok(None)
    }

    async fn bulk_requeue(&self, in_progress: &[ClaimedJob]) {
        for fetch in &self.fetches {
            let partition: Vec<ClaimedJob> = in_progress
                .iter()
                .filter(|claimed| fetch.owns_queue_key(&claimed.queue_key))
                .cloned()
                .collect();
            fetch.bulk_requeue(&partition).await;
        }
    }

    fn owns_queue_key(&self, queue_key: &str) -> bool {
        self.fetches.iter().any(|f| f.owns_queue_key(queue_key))
    }

    async fn on_start(&self) {
        for fetch in &self.fetches {
            fetch.on_start().await;
        }
    }

    async fn on_heartbeat(&self) {
        for fetch in &self.fetches {
            fetch.on_heartbeat().await;
        }
    }

    async fn on_shutdown(&self) {
        for fetch in &self.fetches {
            fetch.on_shutdown().await;
        }
    }
}
