#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use query_sync::{NetworkMode, QueryKey, QueryOptions, RetryPolicy};
use tracing_subscriber::EnvFilter;

/// Route engine logs to the test output. Set `RUST_LOG=query_sync=debug` to see them.
pub fn setup() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A query whose fetch takes `delay` and returns how many times it has run.
pub fn counter_query(key: impl Into<QueryKey>, calls: &Arc<AtomicU32>, delay: Duration) -> QueryOptions<u32> {
    let calls = calls.clone();
    QueryOptions::new(key)
        .retry(RetryPolicy::Never)
        .network_mode(NetworkMode::Always)
        .query_fn(move |_| {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                tokio::time::sleep(delay).await;
                Ok(n)
            }
        })
}

pub fn calls(counter: &Arc<AtomicU32>) -> u32 {
    counter.load(Ordering::SeqCst)
}
