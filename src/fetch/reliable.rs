//! Reliable priority fetch with per-process claim sets.
//!
//! Claiming moves a job from its queue into this process's private WIP
//! set in one server-side step, so a crash can never lose a claimed job:
//! it stays in the WIP set until acknowledged or until another process
//! recovers it.
//!
//! Recovery has two lines of defense:
//!
//! 1. `cleanup_the_dead` (startup): walks the process registry, and for
//!    every identity whose liveness marker has expired, drains its
//!    recorded WIP sets back into the original queues.
//! 2. `check_for_orphans` (rate-limited, best-effort): scans the key
//!    space for WIP-shaped keys whose owner is not registered at all,
//!    catching registry drift the first pass cannot see.
//!
//! The host runtime is contracted to call `on_start` once, `on_heartbeat`
//! periodically, and `on_shutdown` followed by `bulk_requeue` when
//! stopping.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use rand::RngExt;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::{debug, info, warn};

use crate::config::FetchConfig;
use crate::error::FetchError;
use crate::keys;
use crate::store::PriorityStore;

use super::{settle_subqueue_count, ClaimedJob, FetchStrategy, QueueSet, WorkUnit};

/// Crash-recoverable priority fetch.
pub struct ReliableFetch {
    redis: ConnectionManager,
    store: PriorityStore,
    queues: QueueSet,
    identity: String,
    heartbeat_ttl_secs: u64,
    orphan_check_secs: u64,
    done: AtomicBool,
}

impl ReliableFetch {
    /// Creates a reliable fetch for the configured queues.
    ///
    /// The process identity is `<hostname>:<pid>:<nonce>` and doubles as
    /// the liveness marker key.
    ///
    /// # Errors
    ///
    /// Returns `FetchError::Config` for an empty queue list.
    pub fn new(config: &FetchConfig, redis: ConnectionManager) -> Result<Self, FetchError> {
        config.validate()?;
        let queue_keys: Vec<String> = config
            .queues
            .iter()
            .map(|q| keys::priority_queue(q))
            .collect();

        Ok(Self {
            store: PriorityStore::from_connection(redis.clone()),
            redis,
            queues: QueueSet::new(queue_keys, config.strict),
            identity: process_identity(),
            heartbeat_ttl_secs: config.heartbeat_ttl.as_secs().max(1),
            orphan_check_secs: config.orphan_check_cooldown.as_secs(),
            done: AtomicBool::new(false),
        })
    }

    /// This process's identity as registered in Redis.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// The WIP set key for one of this process's queues.
    pub fn wip_queue(&self, queue_key: &str) -> String {
        keys::wip_queue(&self.identity, queue_key)
    }

    /// The queue keys probed on one pass, in probe order.
    pub fn queues_cmd(&self) -> Vec<String> {
        self.queues.probe_order()
    }

    /// Registers this process and the WIP set keys it owns.
    ///
    /// One transaction, so the registry entry and the owned-key record can
    /// never exist without each other. Runs on startup and on every
    /// heartbeat; re-running it self-heals the record if the queue
    /// configuration changed. The liveness marker is refreshed in the same
    /// step.
    async fn register_myself(&self) -> Result<(), FetchError> {
        let wip_keys: Vec<String> = self
            .queues
            .unique_keys()
            .iter()
            .map(|q| self.wip_queue(q))
            .collect();

        debug!(identity = %self.identity, wip_queues = wip_keys.len(), "Registering process");

        let mut pipe = redis::pipe();
        pipe.atomic()
            .sadd(keys::PROCESS_REGISTRY_KEY, &self.identity)
            .sadd(keys::owned_wip_set(&self.identity), &wip_keys)
            .cmd("SET")
            .arg(&self.identity)
            .arg(Utc::now().timestamp())
            .arg("EX")
            .arg(self.heartbeat_ttl_secs);

        let mut conn = self.redis.clone();
        pipe.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    /// Removes this process from the registry at clean shutdown.
    async fn unregister(&self) -> Result<(), FetchError> {
        debug!(identity = %self.identity, "Unregistering process");

        let mut pipe = redis::pipe();
        pipe.atomic()
            .srem(keys::PROCESS_REGISTRY_KEY, &self.identity)
            .del(keys::owned_wip_set(&self.identity))
            .del(&self.identity);

        let mut conn = self.redis.clone();
        pipe.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    /// Drains this process's own WIP sets back into their queues.
    async fn requeue_wip_jobs(&self) -> Result<usize, FetchError> {
        let mut conn = self.redis.clone();
        let mut jobs_by_queue: Vec<(String, Vec<String>)> = Vec::new();

        for queue_key in self.queues.unique_keys() {
            let wip_key = self.wip_queue(&queue_key);
            let mut jobs = Vec::new();
            while let Some(job) = conn.spop::<_, Option<String>>(&wip_key).await? {
                jobs.push(job);
            }
            jobs_by_queue.push((queue_key, jobs));
        }

        let requeued = self.store.requeue_jobs(&jobs_by_queue).await?;
        info!(jobs = requeued, "Pushed jobs back to Redis");
        Ok(requeued)
    }

    /// Recovers the WIP sets of processes that died without cleanup.
    ///
    /// An identity is proven dead by the absence of its liveness marker,
    /// never by registry state alone. A WIP set shrinking to empty
    /// mid-drain means another process got there first; that is a
    /// completed recovery, not an error.
    async fn cleanup_the_dead(&self) -> Result<usize, FetchError> {
        let mut conn = self.redis.clone();
        let mut moved = 0;

        let registered: Vec<String> = scan_set(&mut conn, keys::PROCESS_REGISTRY_KEY).await?;
        debug!(processes = registered.len(), "Checking registered processes");

        for identity in registered {
            let alive: bool = conn.exists(&identity).await?;
            if alive {
                continue;
            }

            let owned_key = keys::owned_wip_set(&identity);
            let wip_keys: Vec<String> = conn.smembers(&owned_key).await?;

            for wip_key in wip_keys {
                let Some((_, queue_key)) = keys::split_wip_queue(&wip_key) else {
                    warn!(key = %wip_key, "Skipping malformed WIP set key");
                    continue;
                };

                let drained = drain_wip_set(&mut conn, &wip_key, queue_key).await?;
                moved += drained;
                debug!(
                    from = %wip_key,
                    to = %queue_key,
                    jobs = drained,
                    "Moved jobs back to original queue"
                );
            }

            debug!(identity = %identity, "Unregistering dead process");
            let mut pipe = redis::pipe();
            pipe.atomic()
                .del(&owned_key)
                .srem(keys::PROCESS_REGISTRY_KEY, &identity);
            pipe.query_async::<_, ()>(&mut conn).await?;
        }

        if moved > 0 {
            info!(jobs = moved, "Recovered jobs from dead processes");
        }
        Ok(moved)
    }

    /// Scans the key space for WIP sets with no registered owner.
    ///
    /// Guarded by a SET NX EX lock so only one process in the fleet runs
    /// it per cooldown window.
    async fn check_for_orphans(&self) -> Result<usize, FetchError> {
        let mut conn = self.redis.clone();
        let mut orphaned = 0;
        let mut queues_seen = 0;
        let mut orphan_queues = Vec::new();

        let registered: Vec<String> =
            conn.smembers(keys::PROCESS_REGISTRY_KEY).await?;
        debug!(processes = registered.len(), "Scanning for orphaned WIP sets");

        let pattern = format!("{}*", keys::WIP_QUEUE_PREFIX);
        let wip_keys: Vec<String> = scan_keys(&mut conn, &pattern).await?;

        for wip_key in wip_keys {
            queues_seen += 1;
            let Some((identity, queue_key)) = keys::split_wip_queue(&wip_key) else {
                continue;
            };
            if registered.iter().any(|id| id == identity) {
                continue;
            }

            // The registry snapshot above races with registration; the
            // membership check is the authoritative answer.
            let owned: bool = conn
                .sismember(keys::PROCESS_REGISTRY_KEY, identity)
                .await?;
            if owned {
                continue;
            }

            let drained = drain_wip_set(&mut conn, &wip_key, queue_key).await?;
            if drained > 0 {
                orphan_queues.push(queue_key.to_string());
                orphaned += drained;
            }
        }

        if orphaned > 0 {
            warn!(
                jobs = orphaned,
                queues = ?orphan_queues,
                "Recovered orphaned jobs"
            );
        } else if queues_seen > 0 {
            info!(queues = queues_seen, "Found working queues with no orphaned jobs");
        }
        Ok(orphaned)
    }

    /// Takes the fleet-wide orphan check lock if the cooldown has passed.
    async fn orphan_check_due(&self) -> Result<bool, FetchError> {
        if self.orphan_check_secs == 0 {
            return Ok(false);
        }

        let mut conn = self.redis.clone();
        let taken: Option<String> = redis::cmd("SET")
            .arg(keys::ORPHAN_CHECK_LOCK_KEY)
            .arg(Utc::now().timestamp())
            .arg("NX")
            .arg("EX")
            .arg(self.orphan_check_secs)
            .query_async(&mut conn)
            .await?;
        Ok(taken.is_some())
    }
}

#[async_trait]
impl FetchStrategy for ReliableFetch {
    async fn retrieve_work(&self) -> Result<Option<Box<dyn WorkUnit>>, FetchError> {
        if self.done.load(Ordering::SeqCst) {
            return Ok(None);
        }

        for queue_key in self.queues_cmd() {
            let wip_key = self.wip_queue(&queue_key);
            if let Some(job) = self.store.claim_highest(&queue_key, &wip_key).await? {
                return Ok(Some(Box::new(ReliableUnit {
                    queue_key,
                    job,
                    wip_key,
                    redis: self.redis.clone(),
                })));
            }
        }
        Ok(None)
    }

    async fn bulk_requeue(&self, _in_progress: &[ClaimedJob]) {
        // The WIP sets are the source of truth; the passed-in list is for
        // sources without internal claim tracking.
        debug!("Re-queueing terminated jobs");
        if let Err(e) = self.requeue_wip_jobs().await {
            warn!(error = %e, "Failed to requeue WIP jobs");
        }
        if let Err(e) = self.unregister().await {
            warn!(error = %e, "Failed to unregister process");
        }
    }

    fn owns_queue_key(&self, queue_key: &str) -> bool {
        queue_key.starts_with(keys::PRIORITY_QUEUE_PREFIX)
    }

    async fn on_start(&self) {
        if let Err(e) = self.cleanup_the_dead().await {
            // Best effort; Redis downtime must not block startup.
            warn!(error = %e, "Failed to clean up dead processes");
        }
        if let Err(e) = self.register_myself().await {
            warn!(error = %e, "Failed to register process");
        }
        match self.orphan_check_due().await {
            Ok(true) => {
                if let Err(e) = self.check_for_orphans().await {
                    warn!(error = %e, "Failed to do orphan check");
                }
            }
            Ok(false) => {}
            Err(e) => warn!(error = %e, "Failed to do orphan check"),
        }
    }

    async fn on_heartbeat(&self) {
        if let Err(e) = self.register_myself().await {
            warn!(error = %e, "Failed to refresh process registration");
        }
    }

    async fn on_shutdown(&self) {
        self.done.store(true, Ordering::SeqCst);
    }
}

/// A claimed job tracked in this process's WIP set.
struct ReliableUnit {
    queue_key: String,
    job: String,
    wip_key: String,
    redis: ConnectionManager,
}

#[async_trait]
impl WorkUnit for ReliableUnit {
    fn queue_key(&self) -> &str {
        &self.queue_key
    }

    fn job(&self) -> &str {
        &self.job
    }

    async fn acknowledge(&self) -> bool {
        let mut conn = self.redis.clone();

        // The claim set entry goes first: the job has been processed, so
        // it must not be recoverable even if the counter settle fails.
        if let Err(e) = conn.srem::<_, _, ()>(&self.wip_key, &self.job).await {
            warn!(wip = %self.wip_key, error = %e, "Failed to remove job from WIP set");
            return false;
        }

        match settle_subqueue_count(&self.redis, &self.queue_key, &self.job).await {
            Ok(()) => true,
            Err(e) => {
                warn!(queue = %self.queue_key, error = %e, "Failed to settle subqueue count");
                false
            }
        }
    }

    async fn requeue(&self) -> bool {
        // Nothing to do: the job is already durable in the WIP set and
        // recovery will find it there.
        true
    }
}

/// Builds this process's registry identity.
fn process_identity() -> String {
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string());
    let nonce: [u8; 6] = rand::rng().random();
    format!("{}:{}:{}", host, std::process::id(), hex::encode(nonce))
}

/// Collects the members of a set via SSCAN.
async fn scan_set(
    conn: &mut ConnectionManager,
    key: &str,
) -> Result<Vec<String>, FetchError> {
    let mut members = Vec::new();
    let mut iter: redis::AsyncIter<String> = conn.sscan(key).await?;
    while let Some(member) = iter.next_item().await {
        members.push(member);
    }
    Ok(members)
}

/// Collects the keys matching a pattern via SCAN.
async fn scan_keys(
    conn: &mut ConnectionManager,
    pattern: &str,
) -> Result<Vec<String>, FetchError> {
    let mut found = Vec::new();
    let mut iter: redis::AsyncIter<String> = conn.scan_match(pattern).await?;
    while let Some(key) = iter.next_item().await {
        found.push(key);
    }
    Ok(found)
}

/// Moves every job in a WIP set back to its original queue.
///
/// SPOP-then-ZADD per job; an empty pop mid-drain means a concurrent
/// recovery already took the rest. The emptied set is deleted.
async fn drain_wip_set(
    conn: &mut ConnectionManager,
    wip_key: &str,
    queue_key: &str,
) -> Result<usize, FetchError> {
    let mut drained = 0;
    loop {
        let remaining: usize = conn.scard(wip_key).await?;
        if remaining == 0 {
            break;
        }
        let Some(job) = conn.spop::<_, Option<String>>(wip_key).await? else {
            break;
        };
        conn.zadd::<_, _, _, ()>(queue_key, &job, 0.0).await?;
        drained += 1;
    }

    let remaining: usize = conn.scard(wip_key).await?;
    if remaining == 0 {
        conn.del::<_, ()>(wip_key).await?;
    }
    Ok(drained)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_identity_shape() {
        let identity = process_identity();
        let parts: Vec<&str> = identity.rsplitn(3, ':').collect();

        assert_eq!(parts.len(), 3, "identity should be host:pid:nonce");
        // rsplitn yields nonce first, then pid.
        assert_eq!(parts[0].len(), 12);
        assert!(parts[1].parse::<u32>().is_ok());
    }

    #[test]
    fn test_identities_are_unique_per_instance() {
        assert_ne!(process_identity(), process_identity());
    }
}
