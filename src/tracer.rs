//! Tracer trait for observing fetch and mutation execution.
//!
//! This module defines the [`Tracer`] trait and related types for observing
//! the engine from the outside. The default [`NoopTracer`] costs nothing when
//! tracing is not needed.
//!
//! # Example
//!
//! ```ignore
//! use query_sync::{QueryClient, QueryKey, SpanId, Tracer};
//!
//! struct PrintTracer;
//!
//! impl Tracer for PrintTracer {
//!     fn new_span_id(&self) -> SpanId {
//!         SpanId(1)
//!     }
//!
//!     fn on_fetch_start(&self, _span_id: SpanId, key: &QueryKey) {
//!         println!("fetching {}", key);
//!     }
//! }
//!
//! let client = QueryClient::builder().tracer(PrintTracer).build();
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::QueryError;
use crate::key::QueryKey;

/// Unique identifier for one fetch or mutation execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SpanId(pub u64);

/// How a fetch ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Data was committed.
    Success,
    /// The retry engine gave up and the error was committed.
    Error { message: String },
    /// The fetch was cancelled.
    Cancelled { revert: bool, silent: bool },
    /// A newer fetch replaced this one before it finished; nothing was committed.
    Superseded,
}

/// How a mutation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationOutcome {
    Success,
    Error { message: String },
}

/// Tracer trait for observing engine execution.
///
/// Implementations can collect events for testing, forward them to a metrics
/// system, or provide custom observability. Structured logs go through
/// `tracing` regardless of the installed tracer.
///
/// All methods except [`Tracer::new_span_id`] have default empty
/// implementations.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync` as the tracer is called from
/// whichever task drives a fetch.
pub trait Tracer: Send + Sync + 'static {
    /// Generate a new unique span ID.
    fn new_span_id(&self) -> SpanId;

    /// Called when a fetch is spawned for `key`.
    #[inline]
    fn on_fetch_start(&self, _span_id: SpanId, _key: &QueryKey) {}

    /// Called after a failed attempt when another attempt is scheduled.
    #[inline]
    fn on_fetch_retry(
        &self,
        _span_id: SpanId,
        _key: &QueryKey,
        _failure_count: u32,
        _error: &QueryError,
        _delay: Duration,
    ) {
    }

    /// Called when a fetch settles.
    #[inline]
    fn on_fetch_end(&self, _span_id: SpanId, _key: &QueryKey, _outcome: FetchOutcome) {}

    /// Called when a query is marked invalidated.
    #[inline]
    fn on_query_invalidated(&self, _key: &QueryKey) {}

    /// Called when the eviction timer removes a query from the cache.
    #[inline]
    fn on_query_evicted(&self, _key: &QueryKey) {}

    /// Called when a mutation starts executing.
    #[inline]
    fn on_mutation_start(&self, _span_id: SpanId, _mutation_id: u64) {}

    /// Called when a mutation settles, after its hooks ran.
    #[inline]
    fn on_mutation_end(&self, _span_id: SpanId, _mutation_id: u64, _outcome: MutationOutcome) {}
}

/// Tracer that discards all events.
///
/// This is the default tracer for [`QueryClient`](crate::QueryClient).
pub struct NoopTracer;

static NOOP_SPAN_COUNTER: AtomicU64 = AtomicU64::new(1);

impl Tracer for NoopTracer {
    #[inline(always)]
    fn new_span_id(&self) -> SpanId {
        SpanId(NOOP_SPAN_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    struct CountingTracer {
        start_count: AtomicUsize,
        end_count: AtomicUsize,
    }

    impl Tracer for CountingTracer {
        fn new_span_id(&self) -> SpanId {
            SpanId(1)
        }

        fn on_fetch_start(&self, _span_id: SpanId, _key: &QueryKey) {
            self.start_count.fetch_add(1, Ordering::Relaxed);
        }

        fn on_fetch_end(&self, _span_id: SpanId, _key: &QueryKey, _outcome: FetchOutcome) {
            self.end_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn test_noop_tracer_span_id() {
        let tracer = NoopTracer;
        assert_ne!(tracer.new_span_id(), tracer.new_span_id());
    }

    #[test]
    fn test_counting_tracer() {
        let tracer = CountingTracer {
            start_count: AtomicUsize::new(0),
            end_count: AtomicUsize::new(0),
        };
        let key = QueryKey::from("todos");

        tracer.on_fetch_start(SpanId(1), &key);
        tracer.on_fetch_start(SpanId(2), &key);
        tracer.on_fetch_end(SpanId(1), &key, FetchOutcome::Success);

        assert_eq!(tracer.start_count.load(Ordering::Relaxed), 2);
        assert_eq!(tracer.end_count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_tracer_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<NoopTracer>();
        assert_send_sync::<Arc<CountingTracer>>();
    }
}
