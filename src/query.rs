//! A single cached query: its state, the in-flight fetch, observers and eviction.
//!
//! All transitions go through [`crate::state::reduce`]. The entity lock is
//! never held while observers, listeners or the tracer are called.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::time::Instant;

use crate::cancel::CancelSignal;
use crate::error::{CancelOptions, QueryError};
use crate::gc::GcTimer;
use crate::key::QueryKey;
use crate::online::OnlineManager;
use crate::options::{FetchOptions, QueryFnContext, QueryFunction, QueryOptions};
use crate::query_cache::{CacheShared, QueryCacheEvent};
use crate::retryer::{self, NetworkMode, RetryEvents, RetryPolicy};
use crate::state::{reduce, Action, FetchStatus, QueryState, QueryStatus};
use crate::time::{GcTime, StaleTime};
use crate::tracer::{FetchOutcome, SpanId, Tracer};

type FetchPromise<T> = Shared<BoxFuture<'static, Result<Arc<T>, QueryError>>>;

/// External signals that may refetch a query with observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RefetchTrigger {
    Resume,
    Reconnect,
}

/// What a query needs from the observers attached to it.
pub(crate) trait QueryListener<T>: Send + Sync + 'static {
    fn on_query_update(&self, key: &QueryKey, state: &QueryState<T>);
    fn is_enabled(&self) -> bool;
    fn stale_time(&self) -> StaleTime;
    fn should_refetch_on(&self, trigger: RefetchTrigger, state: &QueryState<T>) -> bool;
    /// Retry policy and network mode for fetches started on this observer's behalf.
    fn fetch_options(&self) -> FetchOptions;
}

fn same_listener<T>(a: &Arc<dyn QueryListener<T>>, b: &Arc<dyn QueryListener<T>>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

/// Staleness of `state` under `stale_time`.
///
/// No data is always stale. Otherwise static data is never stale, invalidated
/// data always is, and the rest goes by age.
pub(crate) fn stale_by_time<T>(state: &QueryState<T>, stale_time: StaleTime, now: Instant) -> bool {
    let Some(updated_at) = state.data_updated_at.filter(|_| state.data.is_some()) else {
        return true;
    };
    match stale_time {
        StaleTime::Static => false,
        _ if state.is_invalidated => true,
        window => window.is_elapsed(updated_at, now),
    }
}

struct ActiveFetch<T> {
    id: u64,
    signal: CancelSignal,
    promise: FetchPromise<T>,
}

struct QueryInner<T> {
    options: QueryOptions<T>,
    state: QueryState<T>,
    initial_state: QueryState<T>,
    revert_state: Option<QueryState<T>>,
    active: Option<ActiveFetch<T>>,
    observers: Vec<Arc<dyn QueryListener<T>>>,
    next_fetch_id: u64,
    evicted: bool,
}

struct FetchJob<T> {
    id: u64,
    span_id: SpanId,
    query_fn: Arc<dyn QueryFunction<T>>,
    ctx: QueryFnContext,
    current: Option<Arc<T>>,
    retry: RetryPolicy,
    network_mode: NetworkMode,
    online: OnlineManager,
    tracer: Arc<dyn Tracer>,
}

/// One cached value and its fetch lifecycle.
///
/// Queries are created by [`QueryCache::build`](crate::QueryCache::build) and
/// shared by every caller that uses the same key, which is what deduplicates
/// concurrent fetches.
pub struct Query<T> {
    key: QueryKey,
    cache: Weak<CacheShared>,
    inner: Mutex<QueryInner<T>>,
    gc: GcTimer,
}

impl<T> fmt::Debug for Query<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Query")
            .field("key", &self.key)
            .field("status", &inner.state.status)
            .field("fetch_status", &inner.state.fetch_status)
            .field("observers", &inner.observers.len())
            .finish()
    }
}

impl<T: Send + Sync + 'static> Query<T> {
    pub(crate) fn new(options: QueryOptions<T>, cache: Weak<CacheShared>) -> Arc<Self> {
        let state = QueryState::initial(options.initial_data.clone(), Instant::now());
        let gc = GcTimer::new(options.config.gc_time.unwrap_or_default());
        Arc::new(Self {
            key: options.key.clone(),
            cache,
            gc,
            inner: Mutex::new(QueryInner {
                initial_state: state.clone(),
                state,
                options,
                revert_state: None,
                active: None,
                observers: Vec::new(),
                next_fetch_id: 0,
                evicted: false,
            }),
        })
    }

    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> QueryState<T> {
        self.inner.lock().state.clone()
    }

    pub fn data(&self) -> Option<Arc<T>> {
        self.inner.lock().state.data.clone()
    }

    pub fn options(&self) -> QueryOptions<T> {
        self.inner.lock().options.clone()
    }

    /// Effective eviction grace period.
    pub fn gc_time(&self) -> GcTime {
        self.gc.gc_time()
    }

    /// Merge `options` over the current ones. The grace period may only grow.
    pub(crate) fn set_options(&self, options: QueryOptions<T>) {
        let gc_time = {
            let mut inner = self.inner.lock();
            let merged = options.merged_over(&inner.options);
            inner.options = merged;
            inner.options.config.gc_time.unwrap_or_default()
        };
        self.gc.update_gc_time(gc_time);
    }

    /// Start a fetch, or join the one in flight.
    ///
    /// With [`FetchOptions::cancel_refetch`] and existing data, the in-flight
    /// fetch is cancelled silently with revert and replaced. The returned
    /// future resolves once the fetch settles; the fetch itself runs on its own
    /// task whether or not the future is polled.
    pub fn fetch(
        self: &Arc<Self>,
        options: FetchOptions,
    ) -> impl Future<Output = Result<Arc<T>, QueryError>> + Send + 'static {
        let started = self.start_fetch(options);
        let this = self.clone();
        async move { this.settle(started?).await }
    }

    fn start_fetch(self: &Arc<Self>, options: FetchOptions) -> Result<FetchPromise<T>, QueryError> {
        let handle = Handle::try_current().map_err(|_| QueryError::NoRuntime)?;
        let cache = self.cache.upgrade();
        let online = cache.as_ref().map(|c| c.online().clone()).unwrap_or_default();
        let tracer = cache.as_ref().map(|c| c.tracer()).unwrap_or_else(CacheShared::noop_tracer);
        let client = cache.as_ref().and_then(|c| c.client());
        let span_id = tracer.new_span_id();

        let mut superseded = None;
        let (promise, state, observers) = {
            let mut inner = self.inner.lock();
            if let Some(active) = &inner.active {
                if options.cancel_refetch && inner.state.data.is_some() {
                    superseded = Some(active.signal.clone());
                } else {
                    return Ok(active.promise.clone());
                }
            }
            let Some(query_fn) = inner.options.query_fn.clone() else {
                return Err(QueryError::MissingQueryFn {
                    key: self.key.to_string(),
                });
            };

            let config = inner.options.resolved();
            let retry = options.retry.unwrap_or(config.retry);
            let network_mode = options.network_mode.unwrap_or(config.network_mode);
            let id = inner.next_fetch_id;
            inner.next_fetch_id += 1;
            let signal = CancelSignal::new();
            inner.revert_state = Some(inner.state.clone());
            let paused = network_mode == NetworkMode::Online && !online.is_online();
            reduce(
                &mut inner.state,
                Action::Fetch {
                    paused,
                    direction: options.direction,
                },
            );

            let job = FetchJob {
                id,
                span_id,
                query_fn,
                ctx: QueryFnContext {
                    key: self.key.clone(),
                    client,
                    signal: signal.clone(),
                    meta: inner.options.meta.clone(),
                    direction: options.direction,
                },
                current: inner.state.data.clone(),
                retry,
                network_mode,
                online,
                tracer,
            };
            let task = handle.spawn(self.clone().run_fetch(job));
            let promise = async move {
                task.await.unwrap_or_else(|e| {
                    Err(QueryError::TaskFailed {
                        message: e.to_string(),
                    })
                })
            }
            .boxed()
            .shared();
            inner.active = Some(ActiveFetch {
                id,
                signal,
                promise: promise.clone(),
            });
            (promise, inner.state.clone(), inner.observers.clone())
        };

        if let Some(signal) = superseded {
            signal.cancel(CancelOptions {
                revert: true,
                silent: true,
            });
        }
        self.publish(&state, &observers, "fetch");
        Ok(promise)
    }

    async fn run_fetch(self: Arc<Self>, job: FetchJob<T>) -> Result<Arc<T>, QueryError> {
        let FetchJob {
            id,
            span_id,
            query_fn,
            ctx,
            current,
            retry,
            network_mode,
            online,
            tracer,
        } = job;
        tracer.on_fetch_start(span_id, &self.key);
        tracing::debug!(key = %self.key, "fetch started");

        let signal = ctx.signal.clone();
        let events = FetchEvents {
            query: &self,
            id,
            span_id,
            tracer: tracer.as_ref(),
        };
        let attempt = || {
            let query_fn = query_fn.clone();
            let ctx = ctx.clone();
            let current = current.clone();
            async move { query_fn.call(ctx, current).await }
        };
        let outcome = AssertUnwindSafe(retryer::run(
            attempt,
            &retry,
            &signal,
            network_mode,
            &online,
            &events,
        ))
        .catch_unwind()
        .await;
        let result = outcome.unwrap_or_else(|panic| {
            Err(QueryError::TaskFailed {
                message: panic_message(panic.as_ref()),
            })
        });
        self.finish_fetch(id, span_id, tracer.as_ref(), result)
    }

    fn finish_fetch(
        self: &Arc<Self>,
        id: u64,
        span_id: SpanId,
        tracer: &dyn Tracer,
        result: Result<T, QueryError>,
    ) -> Result<Arc<T>, QueryError> {
        let now = Instant::now();
        let (outcome, resolved, state, observers) = {
            let mut inner = self.inner.lock();
            if inner.active.as_ref().map(|a| a.id) != Some(id) {
                drop(inner);
                tracing::debug!(key = %self.key, "superseded fetch discarded");
                tracer.on_fetch_end(span_id, &self.key, FetchOutcome::Superseded);
                return Err(match result {
                    Err(cancelled @ QueryError::Cancelled(_)) => cancelled,
                    _ => QueryError::Cancelled(CancelOptions {
                        revert: true,
                        silent: true,
                    }),
                });
            }
            inner.active = None;
            let revert_state = inner.revert_state.take();

            let (outcome, resolved) = match result {
                Ok(data) => {
                    let data = Arc::new(data);
                    reduce(
                        &mut inner.state,
                        Action::Success {
                            data: data.clone(),
                            updated_at: now,
                            manual: false,
                        },
                    );
                    (FetchOutcome::Success, Ok(data))
                }
                Err(QueryError::Cancelled(options)) => {
                    if options.revert {
                        let mut previous = revert_state.unwrap_or_else(|| inner.state.clone());
                        previous.fetch_status = FetchStatus::Idle;
                        reduce(&mut inner.state, Action::SetState(previous));
                    } else if options.silent {
                        inner.state.fetch_status = FetchStatus::Idle;
                    } else {
                        reduce(
                            &mut inner.state,
                            Action::Error {
                                error: QueryError::Cancelled(options),
                                now,
                            },
                        );
                    }
                    (
                        FetchOutcome::Cancelled {
                            revert: options.revert,
                            silent: options.silent,
                        },
                        Err(QueryError::Cancelled(options)),
                    )
                }
                Err(error) => {
                    reduce(
                        &mut inner.state,
                        Action::Error {
                            error: error.clone(),
                            now,
                        },
                    );
                    (
                        FetchOutcome::Error {
                            message: error.to_string(),
                        },
                        Err(error),
                    )
                }
            };
            (outcome, resolved, inner.state.clone(), inner.observers.clone())
        };

        match &outcome {
            FetchOutcome::Success => tracing::debug!(key = %self.key, "fetch succeeded"),
            FetchOutcome::Cancelled { revert, silent } => {
                tracing::debug!(key = %self.key, revert, silent, "fetch cancelled")
            }
            FetchOutcome::Error { message } => {
                tracing::debug!(key = %self.key, error = %message, "fetch failed")
            }
            FetchOutcome::Superseded => {}
        }
        let action = if resolved.is_ok() { "success" } else { "error" };
        tracer.on_fetch_end(span_id, &self.key, outcome);
        self.publish(&state, &observers, action);
        if observers.is_empty() {
            self.schedule_gc();
        }
        resolved
    }

    async fn settle(self: Arc<Self>, mut promise: FetchPromise<T>) -> Result<Arc<T>, QueryError> {
        loop {
            match promise.await {
                Err(QueryError::Cancelled(options)) if options.silent => {
                    match self.after_silent_cancel(options) {
                        Ok(resolved) => return resolved,
                        Err(next) => promise = next,
                    }
                }
                other => return other,
            }
        }
    }

    /// Resolution for a caller whose fetch was cancelled silently: the last
    /// known data, else the fetch that replaced it, else the cancellation.
    fn after_silent_cancel(
        &self,
        options: CancelOptions,
    ) -> Result<Result<Arc<T>, QueryError>, FetchPromise<T>> {
        let inner = self.inner.lock();
        if let Some(data) = &inner.state.data {
            return Ok(Ok(data.clone()));
        }
        match &inner.active {
            Some(next) => Err(next.promise.clone()),
            None => Ok(Err(QueryError::Cancelled(options))),
        }
    }

    fn dispatch_when(
        &self,
        guard: impl FnOnce(&QueryInner<T>) -> bool,
        action: Action<T>,
    ) -> bool {
        let name = action.name();
        let (state, observers) = {
            let mut inner = self.inner.lock();
            if !guard(&inner) {
                return false;
            }
            reduce(&mut inner.state, action);
            (inner.state.clone(), inner.observers.clone())
        };
        self.publish(&state, &observers, name);
        true
    }

    fn publish(
        &self,
        state: &QueryState<T>,
        observers: &[Arc<dyn QueryListener<T>>],
        action: &'static str,
    ) {
        for observer in observers {
            observer.on_query_update(&self.key, state);
        }
        if let Some(cache) = self.cache.upgrade() {
            cache.emit(QueryCacheEvent::Updated {
                key: self.key.clone(),
                action,
            });
        }
    }

    /// Mark the data stale without touching it. Does not fetch.
    pub fn invalidate(&self) {
        if self.dispatch_when(|inner| !inner.state.is_invalidated, Action::Invalidate) {
            tracing::debug!(key = %self.key, "query invalidated");
            if let Some(cache) = self.cache.upgrade() {
                cache.tracer().on_query_invalidated(&self.key);
            }
        }
    }

    /// Cancel the in-flight fetch, if any. The returned future completes once
    /// the cancelled fetch has settled.
    pub fn cancel(&self, options: CancelOptions) -> impl Future<Output = ()> + Send + 'static {
        let active = self
            .inner
            .lock()
            .active
            .as_ref()
            .map(|a| (a.signal.clone(), a.promise.clone()));
        if let Some((signal, _)) = &active {
            signal.cancel(options);
        }
        async move {
            if let Some((_, promise)) = active {
                let _ = promise.await;
            }
        }
    }

    /// Cancel silently and go back to the state the query was built with.
    pub fn reset(&self) {
        let (signal, state, observers) = {
            let mut inner = self.inner.lock();
            let signal = inner.active.take().map(|a| a.signal);
            inner.revert_state = None;
            let initial = inner.initial_state.clone();
            reduce(&mut inner.state, Action::SetState(initial));
            (signal, inner.state.clone(), inner.observers.clone())
        };
        if let Some(signal) = signal {
            signal.cancel(CancelOptions::silent());
        }
        self.publish(&state, &observers, "reset");
    }

    /// Write data directly, as if a fetch had produced it.
    pub fn set_data(&self, data: T, updated_at: Option<Instant>) -> Arc<T> {
        let data = Arc::new(data);
        self.dispatch_when(
            |_| true,
            Action::Success {
                data: data.clone(),
                updated_at: updated_at.unwrap_or_else(Instant::now),
                manual: true,
            },
        );
        data
    }

    /// Staleness judged by `stale_time` alone, ignoring observers.
    pub fn is_stale_by_time(&self, stale_time: StaleTime) -> bool {
        stale_by_time(&self.inner.lock().state, stale_time, Instant::now())
    }

    /// Attach an observer. Fails once the query has been claimed for eviction;
    /// the caller then builds the key again to get its replacement.
    pub(crate) fn add_observer(&self, observer: Arc<dyn QueryListener<T>>) -> bool {
        let added = {
            let mut inner = self.inner.lock();
            if inner.evicted {
                return false;
            }
            if inner.observers.iter().any(|o| same_listener(o, &observer)) {
                false
            } else {
                inner.observers.push(observer);
                true
            }
        };
        if added {
            self.gc.clear();
            if let Some(cache) = self.cache.upgrade() {
                cache.emit(QueryCacheEvent::ObserverAdded {
                    key: self.key.clone(),
                });
            }
        }
        true
    }

    /// Detach an observer. The last one leaving arms the eviction timer and
    /// stops the in-flight fetch: aborted with revert if the fetch function
    /// listens to its signal, otherwise only its retries are dropped.
    pub(crate) fn remove_observer(self: &Arc<Self>, observer: &Arc<dyn QueryListener<T>>) {
        let (removed, now_empty, signal) = {
            let mut inner = self.inner.lock();
            let before = inner.observers.len();
            inner.observers.retain(|o| !same_listener(o, observer));
            (
                inner.observers.len() != before,
                inner.observers.is_empty(),
                inner.active.as_ref().map(|a| a.signal.clone()),
            )
        };
        if !removed {
            return;
        }
        if now_empty {
            if let Some(signal) = signal {
                if signal.was_consumed() {
                    signal.cancel(CancelOptions::revert());
                } else {
                    signal.cancel_retry();
                }
            }
            self.schedule_gc();
        }
        if let Some(cache) = self.cache.upgrade() {
            cache.emit(QueryCacheEvent::ObserverRemoved {
                key: self.key.clone(),
            });
        }
    }

    pub(crate) fn update_gc_time(&self, gc_time: GcTime) {
        self.gc.update_gc_time(gc_time);
    }

    pub(crate) fn schedule_gc(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        self.gc.schedule(move || {
            if let Some(query) = weak.upgrade() {
                query.optional_remove();
            }
        });
    }

    /// Claim the query for eviction if nobody observes it and it is idle.
    ///
    /// Runs inside the cache's map operation, so no observer can attach
    /// between the check and the removal.
    pub(crate) fn claim_eviction(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.evicted {
            return true;
        }
        let removable = inner.observers.is_empty()
            && inner.active.is_none()
            && inner.state.fetch_status == FetchStatus::Idle;
        inner.evicted = removable;
        removable
    }

    pub(crate) fn is_evicted(&self) -> bool {
        self.inner.lock().evicted
    }

    /// Remove from the cache if nobody observes the query and it is idle.
    fn optional_remove(self: &Arc<Self>) {
        if let Some(cache) = self.cache.upgrade() {
            let claim = || self.claim_eviction();
            if cache.remove_query_if(&self.key, Arc::as_ptr(self) as *const (), &claim) {
                tracing::debug!(key = %self.key, "query evicted");
                cache.tracer().on_query_evicted(&self.key);
            }
        }
    }

    fn snapshot(&self) -> (QueryState<T>, Vec<Arc<dyn QueryListener<T>>>) {
        let inner = self.inner.lock();
        (inner.state.clone(), inner.observers.clone())
    }

    fn on_trigger(self: &Arc<Self>, trigger: RefetchTrigger) {
        let (state, observers) = self.snapshot();
        if let Some(observer) = observers.iter().find(|o| o.should_refetch_on(trigger, &state)) {
            tracing::debug!(key = %self.key, ?trigger, "background refetch");
            self.fetch_in_background(observer.fetch_options());
        }
    }

    /// Fill unset fetch settings from the first enabled observer.
    fn with_observer_settings(&self, options: FetchOptions) -> FetchOptions {
        let (_, observers) = self.snapshot();
        let Some(observer) = observers.iter().find(|o| o.is_enabled()) else {
            return options;
        };
        let settings = observer.fetch_options();
        FetchOptions {
            retry: options.retry.or(settings.retry),
            network_mode: options.network_mode.or(settings.network_mode),
            ..options
        }
    }

    /// Start (or join) a fetch without waiting for it.
    pub(crate) fn fetch_in_background(self: &Arc<Self>, options: FetchOptions) {
        if let Err(error) = self.start_fetch(options) {
            tracing::debug!(key = %self.key, %error, "background fetch not started");
        }
    }
}

impl<T> Drop for Query<T> {
    fn drop(&mut self) {
        if let Some(active) = self.inner.get_mut().active.take() {
            active.signal.cancel(CancelOptions::silent());
        }
    }
}

struct FetchEvents<'a, T> {
    query: &'a Arc<Query<T>>,
    id: u64,
    span_id: SpanId,
    tracer: &'a dyn Tracer,
}

impl<T: Send + Sync + 'static> FetchEvents<'_, T> {
    fn dispatch(&self, action: Action<T>) {
        let id = self.id;
        self.query.dispatch_when(
            |inner| inner.active.as_ref().map(|a| a.id) == Some(id),
            action,
        );
    }
}

impl<T: Send + Sync + 'static> RetryEvents for FetchEvents<'_, T> {
    fn on_fail(&self, failure_count: u32, error: &QueryError, delay: Duration) {
        tracing::trace!(key = %self.query.key, failure_count, ?delay, %error, "fetch attempt failed, retrying");
        self.tracer
            .on_fetch_retry(self.span_id, &self.query.key, failure_count, error, delay);
        self.dispatch(Action::Failed {
            failure_count,
            error: error.clone(),
        });
    }

    fn on_pause(&self) {
        tracing::trace!(key = %self.query.key, "fetch paused while offline");
        self.dispatch(Action::Pause);
    }

    fn on_continue(&self) {
        self.dispatch(Action::Continue);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "fetch function panicked".to_owned()
    }
}

/// Type-erased view of a [`Query`], used by filters and bulk operations.
pub trait AnyQuery: Send + Sync + 'static {
    fn key(&self) -> &QueryKey;
    fn status(&self) -> QueryStatus;
    fn fetch_status(&self) -> FetchStatus;
    /// Has at least one enabled observer.
    fn is_active(&self) -> bool;
    /// Observed only by disabled observers, or unobserved and never fetched.
    fn is_disabled(&self) -> bool;
    /// Some observer declared the data immutable.
    fn is_static(&self) -> bool;
    fn is_stale(&self) -> bool;
    fn is_invalidated(&self) -> bool;
    fn observer_count(&self) -> usize;
    /// Claimed by garbage collection; accepts no more observers.
    fn is_evicted(&self) -> bool;
    fn data_updated_at(&self) -> Option<Instant>;
    /// Name of the data type the query was built with.
    fn type_name(&self) -> &'static str;
    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;

    fn invalidate(&self);
    fn reset(&self);
    fn cancel(&self, options: CancelOptions) -> BoxFuture<'static, ()>;
    fn refetch(self: Arc<Self>, options: FetchOptions) -> BoxFuture<'static, Result<(), QueryError>>;
    fn on_resume(self: Arc<Self>);
    fn on_reconnect(self: Arc<Self>);
    /// Stop timers and the in-flight fetch before removal from the cache.
    fn destroy(&self);
}

impl<T: Send + Sync + 'static> AnyQuery for Query<T> {
    fn key(&self) -> &QueryKey {
        &self.key
    }

    fn status(&self) -> QueryStatus {
        self.inner.lock().state.status
    }

    fn fetch_status(&self) -> FetchStatus {
        self.inner.lock().state.fetch_status
    }

    fn is_active(&self) -> bool {
        let (_, observers) = self.snapshot();
        observers.iter().any(|o| o.is_enabled())
    }

    fn is_disabled(&self) -> bool {
        let (state, observers) = self.snapshot();
        if !observers.is_empty() {
            return !observers.iter().any(|o| o.is_enabled());
        }
        let has_query_fn = self.inner.lock().options.query_fn.is_some();
        !has_query_fn || state.data_update_count + state.error_update_count == 0
    }

    fn is_static(&self) -> bool {
        let (_, observers) = self.snapshot();
        let options_static = self
            .inner
            .lock()
            .options
            .config
            .stale_time
            .is_some_and(|s| s.is_static());
        options_static || observers.iter().any(|o| o.stale_time().is_static())
    }

    fn is_stale(&self) -> bool {
        let (state, observers) = self.snapshot();
        if observers.is_empty() {
            return state.data.is_none() || state.is_invalidated;
        }
        let now = Instant::now();
        observers
            .iter()
            .any(|o| stale_by_time(&state, o.stale_time(), now))
    }

    fn is_invalidated(&self) -> bool {
        self.inner.lock().state.is_invalidated
    }

    fn observer_count(&self) -> usize {
        self.inner.lock().observers.len()
    }

    fn is_evicted(&self) -> bool {
        Query::is_evicted(self)
    }

    fn data_updated_at(&self) -> Option<Instant> {
        self.inner.lock().state.data_updated_at
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    fn invalidate(&self) {
        Query::invalidate(self)
    }

    fn reset(&self) {
        Query::reset(self)
    }

    fn cancel(&self, options: CancelOptions) -> BoxFuture<'static, ()> {
        Query::cancel(self, options).boxed()
    }

    fn refetch(self: Arc<Self>, options: FetchOptions) -> BoxFuture<'static, Result<(), QueryError>> {
        let options = self.with_observer_settings(options);
        let fetch = self.fetch(options);
        async move { fetch.await.map(|_| ()) }.boxed()
    }

    fn on_resume(self: Arc<Self>) {
        self.on_trigger(RefetchTrigger::Resume)
    }

    fn on_reconnect(self: Arc<Self>) {
        self.on_trigger(RefetchTrigger::Reconnect)
    }

    fn destroy(&self) {
        self.gc.clear();
        let signal = self.inner.lock().active.as_ref().map(|a| a.signal.clone());
        if let Some(signal) = signal {
            signal.cancel(CancelOptions::silent());
        }
    }
}

/// Recover the typed query behind a type-erased one.
pub(crate) fn downcast_query<T: Send + Sync + 'static>(
    query: Arc<dyn AnyQuery>,
) -> Result<Arc<Query<T>>, QueryError> {
    let key = query.key().to_string();
    query
        .as_any()
        .downcast::<Query<T>>()
        .map_err(|_| QueryError::TypeMismatch {
            key,
            expected: std::any::type_name::<T>(),
        })
}
