//! prioq: priority-ordered, crash-recoverable job fetch for Redis-backed
//! workers.
//!
//! Multiple worker processes pull from shared priority queues backed by
//! Redis sorted sets. A job is claimed with a server-side script that
//! moves it into the claiming process's private work-in-progress set in
//! one atomic step, so no two workers ever hold the same job and a crash
//! never loses a claimed one.
//!
//! # Architecture
//!
//! ```text
//!   Producer ──push──▶ priority-queue:<name>  (sorted set, score = priority)
//!                              │
//!                      atomic claim script
//!                              │
//!                              ▼
//!        queue:spriorityq|<identity>|priority-queue:<name>  (WIP set)
//!                              │
//!              acknowledge ────┴──── crash ──▶ recovered on next startup
//! ```
//!
//! Components:
//!
//! - [`store::PriorityStore`]: the sorted-set queues and the atomic claim
//! - [`store::SubqueueCounts`]: per-label fairness counters used as scores
//! - [`client::Client`]: the producer push path
//! - [`fetch`]: the retrieval strategies (basic FIFO, priority, reliable,
//!   combined) behind one [`fetch::FetchStrategy`] interface
//! - [`worker::WorkerPool`]: a polling worker runtime wiring the
//!   startup/heartbeat/shutdown lifecycle
//! - [`api::Queue`]: the administrative read path
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use prioq::{Client, FetchConfig, Job, ReliableFetch};
//! use prioq::fetch::FetchStrategy;
//! use serde_json::json;
//!
//! let store = prioq::store::PriorityStore::connect("redis://localhost:6379").await?;
//! let client = Client::from_store(store.clone());
//!
//! // Jobs under one tenant spread out behind other tenants' jobs.
//! let job = Job::new("SendEmail", json!({"tenant": "acme"}))
//!     .with_subqueue_by(|args| args["tenant"].as_str().unwrap().to_string());
//! client.push("mailers", &job).await?;
//!
//! let fetch = ReliableFetch::new(
//!     &FetchConfig::new(vec!["mailers".into()]),
//!     store.connection(),
//! )?;
//! fetch.on_start().await;
//! if let Some(unit) = fetch.retrieve_work().await? {
//!     // ... process unit.job() ...
//!     unit.acknowledge().await;
//! }
//! ```

pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod fetch;
pub mod job;
pub mod keys;
pub mod store;
pub mod worker;

pub use client::{Client, PushedTo};
pub use config::FetchConfig;
pub use error::FetchError;
pub use fetch::{
    BasicFetch, ClaimedJob, CombinedFetch, FetchStrategy, PriorityFetch, ReliableFetch, WorkUnit,
};
pub use job::Job;
pub use store::{PriorityStore, SubqueueCounts};
pub use worker::{JobHandler, PoolError, PoolStats, WorkerPool, WorkerPoolConfig};
