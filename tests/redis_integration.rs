//! Integration tests against a live Redis.
//!
//! Run with: REDIS_URL=redis://localhost:6379 cargo test --test redis_integration -- --ignored
//!
//! Each test works in uniquely named queues so the suite is safe to run
//! against a shared Redis without flushing it.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde_json::json;
use uuid::Uuid;

use prioq::fetch::{FetchStrategy, WorkUnit};
use prioq::{
    keys, BasicFetch, Client, CombinedFetch, FetchConfig, Job, PriorityFetch, PriorityStore,
    PushedTo, ReliableFetch, SubqueueCounts,
};

fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string())
}

async fn connect() -> ConnectionManager {
    let client = redis::Client::open(redis_url()).expect("valid redis url");
    ConnectionManager::new(client)
        .await
        .expect("redis must be reachable for integration tests")
}

fn unique_queue(base: &str) -> String {
    format!("{}-{}", base, Uuid::new_v4().simple())
}

fn test_config(queue: &str) -> FetchConfig {
    FetchConfig::new(vec![queue.to_string()])
        .with_strict(true)
        .with_fifo_timeout(Duration::from_secs(1))
        // Keep the fleet-wide orphan lock out of shared test runs.
        .with_orphan_check_cooldown(Duration::ZERO)
}

#[tokio::test]
#[ignore] // Run with: cargo test --test redis_integration -- --ignored
async fn test_round_trip_through_priority_fetch() {
    let redis = connect().await;
    let store = PriorityStore::from_connection(redis.clone());
    let queue = unique_queue("foo");

    store.enqueue(&queue, "msg", 0.0).await.expect("enqueue");
    assert_eq!(store.size(&queue).await.expect("size"), 1);

    let fetch = PriorityFetch::new(&test_config(&queue), redis).expect("fetch");
    let unit = fetch
        .retrieve_work()
        .await
        .expect("retrieve")
        .expect("queue has work");

    assert_eq!(unit.queue_name(), queue);
    assert_eq!(unit.job(), "msg");
    assert_eq!(store.size(&queue).await.expect("size"), 0);

    // A non-claiming unit gives the job back on requeue.
    assert!(unit.requeue().await);
    assert_eq!(store.size(&queue).await.expect("size"), 1);
}

#[tokio::test]
#[ignore]
async fn test_reliable_fetch_claims_into_wip_set() {
    let redis = connect().await;
    let store = PriorityStore::from_connection(redis.clone());
    let queue = unique_queue("foo");
    let job = json!({"jid": "blah", "args": [1, 2, 3], "subqueue": 1}).to_string();

    store.enqueue(&queue, &job, 0.0).await.expect("enqueue");
    let mut conn = redis.clone();
    conn.zadd::<_, _, _, ()>(keys::subqueue_counts(&queue), "1", 1.0)
        .await
        .expect("seed counter");

    let fetch = ReliableFetch::new(&test_config(&queue), redis.clone()).expect("fetch");
    let unit = fetch
        .retrieve_work()
        .await
        .expect("retrieve")
        .expect("queue has work");

    assert_eq!(unit.queue_name(), queue);
    assert_eq!(unit.job(), job);
    assert_eq!(store.size(&queue).await.expect("size"), 0);

    let wip_key = fetch.wip_queue(&keys::priority_queue(&queue));
    let in_wip: bool = conn.sismember(&wip_key, &job).await.expect("sismember");
    assert!(in_wip, "claimed job must land in the WIP set");

    assert!(unit.acknowledge().await);

    let in_wip: bool = conn.sismember(&wip_key, &job).await.expect("sismember");
    assert!(!in_wip, "acknowledged job must leave the WIP set");
    let count: Option<f64> = conn
        .zscore(keys::subqueue_counts(&queue), "1")
        .await
        .expect("zscore");
    assert!(count.is_none(), "drained label must be garbage collected");
}

#[tokio::test]
#[ignore]
async fn test_claim_exclusivity_under_contention() {
    let redis = connect().await;
    let store = PriorityStore::from_connection(redis);
    let queue = unique_queue("contended");
    let queue_key = keys::priority_queue(&queue);

    let inserted = 5;
    let claimants = 8;
    for i in 0..inserted {
        store
            .enqueue(&queue, &format!("job-{}", i), i as f64)
            .await
            .expect("enqueue");
    }

    let mut handles = Vec::new();
    for i in 0..claimants {
        let store = store.clone();
        let queue_key = queue_key.clone();
        let wip_key = format!("queue:spriorityq|test-claimant-{}|{}", i, queue_key);
        handles.push(tokio::spawn(async move {
            store.claim_highest(&queue_key, &wip_key).await.expect("claim")
        }));
    }

    let mut claimed = Vec::new();
    let mut empty = 0;
    for handle in handles {
        match handle.await.expect("task") {
            Some(job) => claimed.push(job),
            None => empty += 1,
        }
    }

    assert_eq!(claimed.len(), inserted);
    assert_eq!(empty, claimants - inserted);
    let distinct: HashSet<_> = claimed.iter().collect();
    assert_eq!(distinct.len(), inserted, "no job may be claimed twice");
}

#[tokio::test]
#[ignore]
async fn test_fairness_counter_monotonicity() {
    let redis = connect().await;
    let counts = SubqueueCounts::from_connection(redis);
    let queue = unique_queue("fair");

    for expected in 1..=3 {
        let score = counts
            .increment_and_get(&queue, "tenant-a")
            .await
            .expect("increment");
        assert_eq!(score, expected as f64);
    }

    // A fresh label starts at 1 regardless of other labels' counts.
    let score = counts
        .increment_and_get(&queue, "tenant-b")
        .await
        .expect("increment");
    assert_eq!(score, 1.0);

    // Full drain removes the entry instead of leaving a zero residue.
    for _ in 0..3 {
        counts.decrement(&queue, "tenant-a").await.expect("decrement");
    }
    assert!(counts.get(&queue, "tenant-a").await.expect("get").is_none());
    assert_eq!(counts.get(&queue, "tenant-b").await.expect("get"), Some(1.0));
}

#[tokio::test]
#[ignore]
async fn test_client_push_routes_by_prioritization() {
    let redis = connect().await;
    let store = PriorityStore::from_connection(redis.clone());
    let client = Client::from_store(store.clone());
    let queue = unique_queue("push");

    let (_, to) = client
        .push(&queue, &Job::new("Worker", json!([])).with_priority(7.0))
        .await
        .expect("push");
    assert_eq!(to, PushedTo::PriorityQueue);

    let (_, to) = client
        .push(&queue, &Job::new("Worker", json!([])).with_subqueue("t1"))
        .await
        .expect("push");
    assert_eq!(to, PushedTo::Subqueue);

    let (_, to) = client
        .push(&queue, &Job::new("Worker", json!([])))
        .await
        .expect("push");
    assert_eq!(to, PushedTo::BasicQueue);

    assert_eq!(store.size(&queue).await.expect("size"), 2);
    let mut conn = redis.clone();
    let fifo_len: usize = conn.llen(keys::basic_queue(&queue)).await.expect("llen");
    assert_eq!(fifo_len, 1);

    // The subqueue push was scored by the fairness counter.
    let counts = SubqueueCounts::from_connection(redis);
    assert_eq!(counts.get(&queue, "t1").await.expect("get"), Some(1.0));
}

#[tokio::test]
#[ignore]
async fn test_highest_score_is_claimed_first() {
    let redis = connect().await;
    let store = PriorityStore::from_connection(redis.clone());
    let queue = unique_queue("ordered");

    store.enqueue(&queue, "low", 1.0).await.expect("enqueue");
    store.enqueue(&queue, "high", 9.0).await.expect("enqueue");
    store.enqueue(&queue, "mid", 5.0).await.expect("enqueue");

    let queue_key = keys::priority_queue(&queue);
    let order = [
        store.pop_highest(&queue_key).await.expect("pop"),
        store.pop_highest(&queue_key).await.expect("pop"),
        store.pop_highest(&queue_key).await.expect("pop"),
        store.pop_highest(&queue_key).await.expect("pop"),
    ];

    assert_eq!(
        order,
        [
            Some("high".to_string()),
            Some("mid".to_string()),
            Some("low".to_string()),
            None
        ]
    );
}

#[tokio::test]
#[ignore]
async fn test_combined_fetch_respects_source_order() {
    let redis = connect().await;
    let store = PriorityStore::from_connection(redis.clone());
    let queue = unique_queue("combined");

    let normal_job = json!({"jid": "normal_job", "args": [1, 2, 3]}).to_string();
    let priority_job =
        json!({"jid": "priority_job", "args": [1, 2, 3], "subqueue": 1}).to_string();

    let mut conn = redis.clone();
    conn.lpush::<_, _, ()>(keys::basic_queue(&queue), &normal_job)
        .await
        .expect("lpush");
    store
        .enqueue(&queue, &priority_job, 0.0)
        .await
        .expect("enqueue");

    let config = test_config(&queue);
    let combined = CombinedFetch::new(vec![
        Arc::new(BasicFetch::new(&config, redis.clone()).expect("basic")),
        Arc::new(PriorityFetch::new(&config, redis.clone()).expect("priority")),
    ]);

    let first = combined
        .retrieve_work()
        .await
        .expect("retrieve")
        .expect("fifo job available");
    assert_eq!(first.queue_name(), queue);
    assert_eq!(first.job(), normal_job);

    let second = combined
        .retrieve_work()
        .await
        .expect("retrieve")
        .expect("priority job available");
    assert_eq!(second.queue_name(), queue);
    assert_eq!(second.job(), priority_job);
}

#[tokio::test]
#[ignore]
async fn test_registration_on_heartbeat() {
    let redis = connect().await;
    let queue = unique_queue("beat");
    let fetch = ReliableFetch::new(&test_config(&queue), redis.clone()).expect("fetch");

    fetch.on_heartbeat().await;

    let mut conn = redis.clone();
    let registered: bool = conn
        .sismember(keys::PROCESS_REGISTRY_KEY, fetch.identity())
        .await
        .expect("sismember");
    assert!(registered);

    let owned: Vec<String> = conn
        .smembers(keys::owned_wip_set(fetch.identity()))
        .await
        .expect("smembers");
    assert_eq!(owned, vec![fetch.wip_queue(&keys::priority_queue(&queue))]);

    let alive: bool = conn.exists(fetch.identity()).await.expect("exists");
    assert!(alive, "heartbeat must refresh the liveness marker");

    // Clean up the registry entry for subsequent runs.
    fetch.bulk_requeue(&[]).await;
}

#[tokio::test]
#[ignore]
async fn test_shutdown_stops_retrieval() {
    let redis = connect().await;
    let store = PriorityStore::from_connection(redis.clone());
    let queue = unique_queue("stopping");

    store.enqueue(&queue, "msg", 0.0).await.expect("enqueue");

    let fetch = ReliableFetch::new(&test_config(&queue), redis).expect("fetch");
    fetch.on_shutdown().await;

    let unit = fetch.retrieve_work().await.expect("retrieve");
    assert!(unit.is_none(), "a stopped fetch takes no new claims");
    assert_eq!(store.size(&queue).await.expect("size"), 1);
}

#[tokio::test]
#[ignore]
async fn test_bulk_requeue_drains_own_wip_sets() {
    let redis = connect().await;
    let store = PriorityStore::from_connection(redis.clone());
    let queue = unique_queue("terminating");

    store.enqueue(&queue, "queued", 0.0).await.expect("enqueue");

    let fetch = ReliableFetch::new(&test_config(&queue), redis.clone()).expect("fetch");
    fetch.on_start().await;

    // Mimic a job that was claimed but never finished.
    let wip_key = fetch.wip_queue(&keys::priority_queue(&queue));
    let killed_job = json!({"jid": "blah_blah", "args": [1, 2, 3], "subqueue": 1}).to_string();
    let mut conn = redis.clone();
    conn.sadd::<_, _, ()>(&wip_key, &killed_job)
        .await
        .expect("sadd");

    fetch.bulk_requeue(&[]).await;

    assert_eq!(store.size(&queue).await.expect("size"), 2);
    let registered: bool = conn
        .sismember(keys::PROCESS_REGISTRY_KEY, fetch.identity())
        .await
        .expect("sismember");
    assert!(!registered, "clean shutdown must deregister the process");
}

#[tokio::test]
#[ignore]
async fn test_startup_recovers_dead_process_wip() {
    let redis = connect().await;
    let store = PriorityStore::from_connection(redis.clone());
    let queue = unique_queue("bar");
    let queue_key = keys::priority_queue(&queue);

    // A process that died without cleanup: registered, owns a WIP set
    // with a job, but its liveness marker is gone.
    let dead_identity = format!("dead-host:42251:{}", Uuid::new_v4().simple());
    let dead_wip = keys::wip_queue(&dead_identity, &queue_key);
    let job = json!({"jid": "blah", "args": [1, 2, 3], "subqueue": 1}).to_string();

    let mut conn = redis.clone();
    conn.sadd::<_, _, ()>(keys::PROCESS_REGISTRY_KEY, &dead_identity)
        .await
        .expect("sadd");
    conn.sadd::<_, _, ()>(keys::owned_wip_set(&dead_identity), &dead_wip)
        .await
        .expect("sadd");
    conn.sadd::<_, _, ()>(&dead_wip, &job).await.expect("sadd");

    assert_eq!(store.size(&queue).await.expect("size"), 0);

    let fetch = ReliableFetch::new(&test_config(&queue), redis).expect("fetch");
    fetch.on_start().await;

    assert_eq!(store.size(&queue).await.expect("size"), 1);
    let wip_exists: bool = conn.exists(&dead_wip).await.expect("exists");
    assert!(!wip_exists, "drained WIP set must be deleted");
    let registered: bool = conn
        .sismember(keys::PROCESS_REGISTRY_KEY, &dead_identity)
        .await
        .expect("sismember");
    assert!(!registered, "dead process must leave the registry");
    let record_exists: bool = conn
        .exists(keys::owned_wip_set(&dead_identity))
        .await
        .expect("exists");
    assert!(!record_exists, "owned-key record must be deleted");

    fetch.bulk_requeue(&[]).await;
}

#[tokio::test]
#[ignore]
async fn test_orphan_scan_recovers_unregistered_wip() {
    let redis = connect().await;
    let store = PriorityStore::from_connection(redis.clone());
    let queue = unique_queue("orphan");
    let queue_key = keys::priority_queue(&queue);

    // A WIP set whose owner never made it into the registry; the
    // dead-process pass cannot see it, only the key-space scan can.
    let orphan_identity = format!("gone-host:4411:{}", Uuid::new_v4().simple());
    let orphan_wip = keys::wip_queue(&orphan_identity, &queue_key);
    let job = json!({"jid": "blah", "args": [1, 2, 3]}).to_string();

    let mut conn = redis.clone();
    conn.sadd::<_, _, ()>(&orphan_wip, &job).await.expect("sadd");
    // Make the fleet-wide lock takeable regardless of earlier runs.
    conn.del::<_, ()>(keys::ORPHAN_CHECK_LOCK_KEY)
        .await
        .expect("del lock");

    assert_eq!(store.size(&queue).await.expect("size"), 0);

    let config = test_config(&queue).with_orphan_check_cooldown(Duration::from_secs(5));
    let fetch = ReliableFetch::new(&config, redis).expect("fetch");
    fetch.on_start().await;

    assert_eq!(
        store.size(&queue).await.expect("size"),
        1,
        "orphaned job must land back in its queue"
    );
    let wip_exists: bool = conn.exists(&orphan_wip).await.expect("exists");
    assert!(!wip_exists, "drained orphan WIP set must be deleted");
    let lock_taken: bool = conn
        .exists(keys::ORPHAN_CHECK_LOCK_KEY)
        .await
        .expect("exists");
    assert!(lock_taken, "the scan must leave the cooldown lock behind");

    fetch.bulk_requeue(&[]).await;
}

#[tokio::test]
#[ignore]
async fn test_admin_queue_inspection() {
    let redis = connect().await;
    let store = PriorityStore::from_connection(redis);
    let queue = unique_queue("admin");

    store.enqueue(&queue, "a", 1.0).await.expect("enqueue");
    store.enqueue(&queue, "b", 2.0).await.expect("enqueue");

    let handle = prioq::api::Queue::new(&queue, store.clone());
    assert_eq!(handle.size().await.expect("size"), 2);

    let page = handle.page(0).await.expect("page");
    assert_eq!(page, vec![("b".to_string(), 2.0), ("a".to_string(), 1.0)]);

    assert!(handle.delete_job("a").await.expect("delete"));
    assert!(!handle.delete_job("a").await.expect("delete twice"));
    assert_eq!(handle.size().await.expect("size"), 1);

    let all = prioq::api::Queue::all(&store).await.expect("all");
    assert!(all.iter().any(|q| q.name() == queue));
}
