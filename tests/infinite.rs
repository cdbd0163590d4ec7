//! Paginated queries through the observer and the client.

mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::setup;
use query_sync::{
    query_key, InfiniteData, InfiniteQueryObserver, InfiniteQueryOptions, QueryClient,
    RetryPolicy,
};

/// A feed of `total` pages numbered from 0, each holding its own number.
fn feed(total: u32, fetches: &Arc<AtomicU32>) -> InfiniteQueryOptions<u32, u32> {
    let fetches = fetches.clone();
    InfiniteQueryOptions::new(query_key!["feed"], 0u32)
        .retry(RetryPolicy::Never)
        .page_fn(move |page: u32, _ctx| {
            fetches.fetch_add(1, Ordering::SeqCst);
            async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok(page)
            }
        })
        .get_next_page_param(move |data: &InfiniteData<u32, u32>| {
            data.last_page_param().map(|p| p + 1).filter(|p| *p < total)
        })
        .get_previous_page_param(|data: &InfiniteData<u32, u32>| {
            data.first_page_param().and_then(|p| p.checked_sub(1))
        })
}

fn pages(data: &InfiniteData<u32, u32>) -> Vec<u32> {
    data.pages.iter().map(|page| **page).collect()
}

#[tokio::test(start_paused = true)]
async fn test_observer_pages_forward_until_the_end() {
    setup();
    let client = QueryClient::new();
    let fetches = Arc::new(AtomicU32::new(0));
    let observer = InfiniteQueryObserver::new(&client, feed(3, &fetches)).unwrap();

    tokio::time::sleep(Duration::from_secs(1)).await;
    let result = observer.current_result();
    assert_eq!(pages(result.data().unwrap()), vec![0]);
    assert!(result.has_next_page);
    assert!(!result.has_previous_page);

    let next = observer.fetch_next_page();
    let during = observer.current_result();
    assert!(during.is_fetching_next_page);
    assert!(!during.is_fetching_previous_page);
    let result = next.await;
    assert_eq!(pages(result.data().unwrap()), vec![0, 1]);
    assert!(!result.is_fetching_next_page);

    let result = observer.fetch_next_page().await;
    assert_eq!(pages(result.data().unwrap()), vec![0, 1, 2]);
    assert!(!result.has_next_page);

    // Past the end nothing is requested.
    let result = observer.fetch_next_page().await;
    assert_eq!(pages(result.data().unwrap()), vec![0, 1, 2]);
    assert_eq!(fetches.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_max_pages_drops_from_the_opposite_end() {
    setup();
    let client = QueryClient::new();
    let fetches = Arc::new(AtomicU32::new(0));
    let observer = InfiniteQueryObserver::new(&client, feed(10, &fetches).max_pages(2)).unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    observer.fetch_next_page().await;
    let result = observer.fetch_next_page().await;
    assert_eq!(pages(result.data().unwrap()), vec![1, 2]);
    assert!(result.has_previous_page);

    let result = observer.fetch_previous_page().await;
    assert_eq!(pages(result.data().unwrap()), vec![0, 1]);
    assert!(!result.has_previous_page);
}

#[tokio::test(start_paused = true)]
async fn test_refetch_reloads_every_held_page() {
    setup();
    let client = QueryClient::new();
    let fetches = Arc::new(AtomicU32::new(0));
    let observer = InfiniteQueryObserver::new(&client, feed(5, &fetches)).unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    observer.fetch_next_page().await;
    observer.fetch_next_page().await;
    assert_eq!(fetches.load(Ordering::SeqCst), 3);

    let result = observer.refetch().await;
    assert_eq!(pages(result.data().unwrap()), vec![0, 1, 2]);
    assert_eq!(fetches.load(Ordering::SeqCst), 6);
}

#[tokio::test(start_paused = true)]
async fn test_client_fetch_infinite_query_loads_first_page() {
    setup();
    let client = QueryClient::new();
    let fetches = Arc::new(AtomicU32::new(0));

    let data = client.fetch_infinite_query(feed(3, &fetches)).await.unwrap();
    assert_eq!(pages(&data), vec![0]);
    assert_eq!(data.page_params, vec![0]);

    let cached = client
        .get_query_data::<InfiniteData<u32, u32>>(&query_key!["feed"])
        .unwrap()
        .unwrap();
    assert!(Arc::ptr_eq(&cached, &data));
}

#[tokio::test(start_paused = true)]
async fn test_next_page_replaces_refetch_in_flight() {
    setup();
    let client = QueryClient::new();
    let fetches = Arc::new(AtomicU32::new(0));
    let observer = InfiniteQueryObserver::new(&client, feed(3, &fetches)).unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    let refetch = observer.refetch();
    let result = observer.fetch_next_page().await;
    assert_eq!(pages(result.data().unwrap()), vec![0, 1]);

    // The superseded refetch settles on the newer data.
    let result = refetch.await;
    assert_eq!(pages(result.data().unwrap()), vec![0, 1]);
    assert!(!result.result.is_fetching());
}
