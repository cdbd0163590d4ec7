//! Eviction of idle queries and mutations.

mod common;

use std::sync::atomic::AtomicU32;
use std::sync::Arc;
use std::time::Duration;

use common::{counter_query, setup};
use query_sync::{
    query_key, GcTime, MutationOptions, QueryCacheEvent, QueryClient, QueryObserver,
};

#[tokio::test(start_paused = true)]
async fn test_unobserved_query_is_evicted_after_gc_time() {
    setup();
    let client = QueryClient::new();
    let counter = Arc::new(AtomicU32::new(0));
    client
        .fetch_query(counter_query("todos", &counter, Duration::from_secs(1)).gc_time(Duration::from_secs(10)))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(9)).await;
    assert_eq!(client.query_cache().len(), 1);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(client.query_cache().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_observed_query_is_kept_until_observer_leaves() {
    setup();
    let client = QueryClient::new();
    let counter = Arc::new(AtomicU32::new(0));
    let removed = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let _sub = client.query_cache().subscribe({
        let removed = removed.clone();
        move |event| {
            if let QueryCacheEvent::Removed { key } = event {
                removed.lock().push(key.clone());
            }
        }
    });

    let observer = QueryObserver::new(
        &client,
        counter_query("todos", &counter, Duration::from_millis(10)).gc_time(Duration::from_secs(5)),
    )
    .unwrap();
    tokio::time::sleep(Duration::from_secs(3600)).await;
    assert_eq!(client.query_cache().len(), 1);

    drop(observer);
    tokio::time::sleep(Duration::from_secs(4)).await;
    assert_eq!(client.query_cache().len(), 1);
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(client.query_cache().is_empty());
    assert_eq!(*removed.lock(), vec![query_key!["todos"]]);
}

#[tokio::test(start_paused = true)]
async fn test_gc_time_keeps_the_longest_requested() {
    setup();
    let client = QueryClient::new();
    let counter = Arc::new(AtomicU32::new(0));
    let options = |gc: u64| {
        counter_query("todos", &counter, Duration::ZERO).gc_time(Duration::from_secs(gc))
    };

    client.fetch_query(options(10)).await.unwrap();
    client.prefetch_query(options(60)).await;
    client.prefetch_query(options(5)).await;

    let query = client
        .query_cache()
        .get::<u32>(&query_key!["todos"])
        .unwrap()
        .unwrap();
    assert_eq!(query.gc_time(), GcTime::from(Duration::from_secs(60)));

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(client.query_cache().len(), 1);
    tokio::time::sleep(Duration::from_secs(31)).await;
    assert!(client.query_cache().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_never_gc_time_is_never_evicted() {
    setup();
    let client = QueryClient::new();
    let counter = Arc::new(AtomicU32::new(0));
    client
        .fetch_query(counter_query("settings", &counter, Duration::ZERO).gc_time(GcTime::Never))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(24 * 3600)).await;
    assert_eq!(client.query_cache().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_settled_mutation_is_evicted() {
    setup();
    let client = QueryClient::new();
    let options = MutationOptions::<u32, u32>::new()
        .gc_time(Duration::from_secs(30))
        .mutation_fn(|n, _| async move { Ok(*n * 2) });

    assert_eq!(*client.execute_mutation(options, 21).await.unwrap(), 42);
    assert_eq!(client.mutation_cache().len(), 1);

    tokio::time::sleep(Duration::from_secs(31)).await;
    assert!(client.mutation_cache().is_empty());
}
