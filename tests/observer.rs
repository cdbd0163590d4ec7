//! Observer lifecycle: mount, placeholders, key switches and retries.

mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::{calls, counter_query, setup};
use parking_lot::Mutex;
use query_sync::{
    query_key, AnyQuery, FetchStatus, NetworkMode, PlaceholderData, QueryClient, QueryError,
    QueryFnContext, QueryObserver, QueryOptions, QueryStatus, RetryPolicy,
};

#[tokio::test(start_paused = true)]
async fn test_mount_fetches_missing_data() {
    setup();
    let client = QueryClient::new();
    let counter = Arc::new(AtomicU32::new(0));
    let observer =
        QueryObserver::new(&client, counter_query("todos", &counter, Duration::from_secs(1))).unwrap();

    let initial = observer.current_result();
    assert!(initial.is_loading());
    assert!(initial.data.is_none());

    let seen = Arc::new(Mutex::new(Vec::new()));
    let _sub = observer.subscribe({
        let seen = seen.clone();
        move |result| seen.lock().push((result.status, result.data.as_deref().copied()))
    });

    tokio::time::sleep(Duration::from_secs(2)).await;
    let result = observer.current_result();
    assert!(result.is_success());
    assert_eq!(result.data.as_deref(), Some(&1));
    assert_eq!(calls(&counter), 1);
    assert_eq!(seen.lock().last(), Some(&(QueryStatus::Success, Some(1))));
}

#[tokio::test(start_paused = true)]
async fn test_second_observer_reuses_fresh_data() {
    setup();
    let client = QueryClient::new();
    let counter = Arc::new(AtomicU32::new(0));
    let options = counter_query("todos", &counter, Duration::from_millis(100))
        .stale_time(Duration::from_secs(60));

    let first = QueryObserver::new(&client, options.clone()).unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    let second = QueryObserver::new(&client, options).unwrap();

    assert_eq!(second.current_result().data.as_deref(), Some(&1));
    assert!(!second.current_result().is_fetching());
    assert_eq!(calls(&counter), 1);
    assert_eq!(first.query().observer_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_disabled_observer_waits_for_manual_refetch() {
    setup();
    let client = QueryClient::new();
    let counter = Arc::new(AtomicU32::new(0));
    let observer = QueryObserver::new(
        &client,
        counter_query("lazy", &counter, Duration::from_millis(10)).enabled(false),
    )
    .unwrap();

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(calls(&counter), 0);
    assert_eq!(observer.current_result().fetch_status, FetchStatus::Idle);

    let result = observer.refetch().await;
    assert_eq!(result.data.as_deref(), Some(&1));
}

#[tokio::test(start_paused = true)]
async fn test_placeholder_shown_until_first_fetch() {
    setup();
    let client = QueryClient::new();
    let counter = Arc::new(AtomicU32::new(0));
    let observer = QueryObserver::new(
        &client,
        counter_query("todos", &counter, Duration::from_secs(1))
            .placeholder_data(PlaceholderData::Value(Arc::new(0))),
    )
    .unwrap();

    let result = observer.current_result();
    assert!(result.is_success());
    assert!(result.is_placeholder_data);
    assert!(result.is_fetching());
    assert_eq!(result.data.as_deref(), Some(&0));

    // The placeholder never reaches the cache.
    let state = observer.query().state();
    assert!(state.data.is_none());
    assert_eq!(state.status, QueryStatus::Pending);

    tokio::time::sleep(Duration::from_secs(2)).await;
    let result = observer.current_result();
    assert!(!result.is_placeholder_data);
    assert_eq!(result.data.as_deref(), Some(&1));
}

#[tokio::test(start_paused = true)]
async fn test_key_switch_keeps_previous_data_as_placeholder() {
    setup();
    let client = QueryClient::new();
    let user_query = |id: u32| {
        QueryOptions::new(query_key!["user", id])
            .retry(RetryPolicy::Never)
            .placeholder_data(PlaceholderData::KeepPrevious)
            .query_fn(move |_| async move {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok(format!("user {}", id))
            })
    };

    let observer = QueryObserver::new(&client, user_query(1)).unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;
    let first = observer.query();

    observer.set_options(user_query(2)).unwrap();
    let second = observer.query();
    assert_eq!(second.key(), &query_key!["user", 2]);
    assert_eq!(first.observer_count(), 0);
    assert_eq!(second.observer_count(), 1);

    let result = observer.current_result();
    assert!(result.is_placeholder_data);
    assert_eq!(result.data.as_deref().map(String::as_str), Some("user 1"));

    tokio::time::sleep(Duration::from_secs(2)).await;
    let result = observer.current_result();
    assert!(!result.is_placeholder_data);
    assert_eq!(result.data.as_deref().map(String::as_str), Some("user 2"));
}

#[tokio::test(start_paused = true)]
async fn test_retry_progress_is_visible_to_observers() {
    setup();
    let client = QueryClient::new();
    let attempts = Arc::new(AtomicU32::new(0));
    let options = QueryOptions::<u32>::new("unstable")
        .network_mode(NetworkMode::Always)
        .retry(RetryPolicy::Fixed {
            max_retries: 2,
            delay: Duration::from_secs(1),
        })
        .query_fn({
            let attempts = attempts.clone();
            move |_| {
                let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                async move { Err(QueryError::from(anyhow::anyhow!("attempt {} failed", n))) }
            }
        });
    let observer = QueryObserver::new(&client, options).unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;
    let result = observer.current_result();
    assert_eq!(result.failure_count, 1);
    assert!(result.failure_reason.is_some());
    assert!(result.is_pending());
    assert!(result.is_fetching());
    assert!(result.error.is_none());

    tokio::time::sleep(Duration::from_secs(5)).await;
    let result = observer.current_result();
    assert!(result.is_error());
    assert_eq!(result.failure_count, 3);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    let error = result.error.unwrap();
    assert!(error.to_string().contains("attempt 3 failed"));
}

#[tokio::test(start_paused = true)]
async fn test_destroyed_observer_stops_receiving_updates() {
    setup();
    let client = QueryClient::new();
    let counter = Arc::new(AtomicU32::new(0));
    let observer =
        QueryObserver::new(&client, counter_query("todos", &counter, Duration::from_secs(1))).unwrap();
    let updates = Arc::new(AtomicU32::new(0));
    let _sub = observer.subscribe({
        let updates = updates.clone();
        move |_| {
            updates.fetch_add(1, Ordering::SeqCst);
        }
    });

    observer.destroy();
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(updates.load(Ordering::SeqCst), 0);
    assert_eq!(observer.query().observer_count(), 0);
    // The fetch function ignores its signal, so the fetch itself completes.
    assert_eq!(observer.query().data().as_deref(), Some(&1));
}

#[tokio::test(start_paused = true)]
async fn test_imperative_fetch_keeps_observer_retry_policy() {
    setup();
    let client = QueryClient::new();
    let attempts = Arc::new(AtomicU32::new(0));
    // Succeeds once, then fails for good.
    let flaky = |attempts: &Arc<AtomicU32>| {
        let attempts = attempts.clone();
        QueryOptions::<u32>::new("flaky")
            .network_mode(NetworkMode::Always)
            .query_fn(move |_| {
                let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n == 1 {
                        Ok(n)
                    } else {
                        Err(QueryError::from(anyhow::anyhow!("attempt {} failed", n)))
                    }
                }
            })
    };

    let observer = QueryObserver::new(
        &client,
        flaky(&attempts).retry(RetryPolicy::Fixed {
            max_retries: 2,
            delay: Duration::from_secs(1),
        }),
    )
    .unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(attempts.load(Ordering::SeqCst), 1);

    // No retry policy given: this fetch alone fails fast.
    assert!(client.fetch_query(flaky(&attempts)).await.is_err());
    assert_eq!(attempts.load(Ordering::SeqCst), 2);

    let result = observer.refetch().await;
    assert_eq!(attempts.load(Ordering::SeqCst), 5);
    assert_eq!(result.failure_count, 3);
    assert!(result.is_error());
}

// =============================================================================
// Last observer leaving mid-fetch
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_last_observer_leaving_aborts_cooperative_fetch() {
    setup();
    let client = QueryClient::new();
    let finished = Arc::new(AtomicU32::new(0));
    let options = QueryOptions::<u32>::new("report")
        .network_mode(NetworkMode::Always)
        .retry(RetryPolicy::Never)
        .query_fn({
            let finished = finished.clone();
            move |ctx: QueryFnContext| {
                let _signal = ctx.signal().clone();
                let finished = finished.clone();
                async move {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    finished.fetch_add(1, Ordering::SeqCst);
                    Ok(1)
                }
            }
        });
    let observer = QueryObserver::new(&client, options).unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(observer.current_result().is_fetching());

    drop(observer);
    tokio::time::sleep(Duration::from_secs(20)).await;

    assert_eq!(finished.load(Ordering::SeqCst), 0);
    let state = client
        .get_query_state::<u32>(&query_key!["report"])
        .unwrap()
        .unwrap();
    assert_eq!(state.status, QueryStatus::Pending);
    assert_eq!(state.fetch_status, FetchStatus::Idle);
    assert!(state.data.is_none());
    assert!(state.error.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_last_observer_leaving_only_stops_retries() {
    setup();
    let client = QueryClient::new();
    let attempts = Arc::new(AtomicU32::new(0));
    let options = QueryOptions::<u32>::new("upload")
        .network_mode(NetworkMode::Always)
        .retry(RetryPolicy::Fixed {
            max_retries: 3,
            delay: Duration::from_secs(1),
        })
        .query_fn({
            let attempts = attempts.clone();
            move |_| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    tokio::time::sleep(Duration::from_secs(2)).await;
                    Err(QueryError::from(anyhow::anyhow!("upload failed")))
                }
            }
        });
    let observer = QueryObserver::new(&client, options).unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    drop(observer);
    tokio::time::sleep(Duration::from_secs(30)).await;

    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    let state = client
        .get_query_state::<u32>(&query_key!["upload"])
        .unwrap()
        .unwrap();
    assert_eq!(state.status, QueryStatus::Error);
    assert_eq!(state.fetch_status, FetchStatus::Idle);
    assert_eq!(state.fetch_failure_count, 1);
}
