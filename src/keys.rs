//! Redis key layout shared by every component.
//!
//! The key surface is fixed for interop with existing deployments:
//!
//! - `priority-queue:<name>`: sorted set of (job JSON, score)
//! - `priority-queue-counts:<name>`: sorted set of (subqueue label, count)
//! - `queue:spriorityq|<identity>|priority-queue:<name>`: per-process WIP set
//! - `super_processes_priority`: registry set of live process identities
//! - `<identity>:super_priority_queues`: WIP-set keys owned by one process
//!
//! The process liveness marker is the bare identity string used as a key
//! with a TTL, refreshed on every heartbeat.

/// Prefix for priority queue sorted sets.
pub const PRIORITY_QUEUE_PREFIX: &str = "priority-queue:";

/// Prefix for subqueue fairness counter sorted sets.
pub const SUBQUEUE_COUNTS_PREFIX: &str = "priority-queue-counts:";

/// Prefix for plain FIFO queue lists.
pub const BASIC_QUEUE_PREFIX: &str = "queue:";

/// Prefix for per-process work-in-progress sets.
pub const WIP_QUEUE_PREFIX: &str = "queue:spriorityq|";

/// Registry set holding the identities of live worker processes.
pub const PROCESS_REGISTRY_KEY: &str = "super_processes_priority";

/// Short-lived lock key that rate-limits the orphan scan across a fleet.
pub const ORPHAN_CHECK_LOCK_KEY: &str = "priority_reliable_fetch_orphan_check";

/// Returns the sorted-set key for a priority queue.
pub fn priority_queue(name: &str) -> String {
    format!("{PRIORITY_QUEUE_PREFIX}{name}")
}

/// Returns the fairness counter key for a queue.
pub fn subqueue_counts(name: &str) -> String {
    format!("{SUBQUEUE_COUNTS_PREFIX}{name}")
}

/// Returns the list key for a plain FIFO queue.
pub fn basic_queue(name: &str) -> String {
    format!("{BASIC_QUEUE_PREFIX}{name}")
}

/// Returns the WIP set key for a (process identity, priority queue key) pair.
pub fn wip_queue(identity: &str, queue_key: &str) -> String {
    format!("{WIP_QUEUE_PREFIX}{identity}|{queue_key}")
}

/// Returns the key of the set recording which WIP sets a process owns.
pub fn owned_wip_set(identity: &str) -> String {
    format!("{identity}:super_priority_queues")
}

/// Extracts the bare queue name from a queue key.
///
/// Works for both `priority-queue:<name>` and `queue:<name>` keys by
/// stripping everything through the last `queue:` occurrence.
pub fn queue_name(queue_key: &str) -> &str {
    match queue_key.rfind("queue:") {
        Some(idx) => &queue_key[idx + "queue:".len()..],
        None => queue_key,
    }
}

/// Splits a WIP set key into its owner identity and original queue key.
///
/// Returns `None` if the key does not follow the WIP naming convention.
/// The identity may contain `:` but never `|`.
pub fn split_wip_queue(wip_key: &str) -> Option<(&str, &str)> {
    let rest = wip_key.strip_prefix(WIP_QUEUE_PREFIX)?;
    let (identity, queue_key) = rest.split_once('|')?;
    Some((identity, queue_key))
}
