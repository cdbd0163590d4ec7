//! Observers: per-consumer views derived from one query plus local options.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::client::QueryClient;
use crate::error::QueryError;
use crate::key::QueryKey;
use crate::options::{
    FetchDirection, FetchOptions, PlaceholderData, QueryOptions, RefetchPolicy,
    ResolvedQueryConfig,
};
use crate::query::{stale_by_time, Query, QueryListener, RefetchTrigger};
use crate::state::{FetchStatus, QueryState, QueryStatus};
use crate::subscription::{Listeners, Subscription};
use crate::time::StaleTime;

/// What an observer shows its consumer.
///
/// Recomputed from the query state and the observer's options on every
/// change; never stored authoritatively anywhere else.
pub struct QueryObserverResult<T> {
    pub data: Option<Arc<T>>,
    pub data_updated_at: Option<Instant>,
    pub data_update_count: u64,
    pub error: Option<QueryError>,
    pub error_updated_at: Option<Instant>,
    pub error_update_count: u64,
    /// Failures in the current retry sequence; updates while retrying.
    pub failure_count: u32,
    pub failure_reason: Option<QueryError>,
    pub status: QueryStatus,
    pub fetch_status: FetchStatus,
    pub is_stale: bool,
    /// `data` comes from placeholder options, not from the query.
    pub is_placeholder_data: bool,
    pub is_invalidated: bool,
    pub(crate) fetch_direction: Option<FetchDirection>,
}

impl<T> Clone for QueryObserverResult<T> {
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
            data_updated_at: self.data_updated_at,
            data_update_count: self.data_update_count,
            error: self.error.clone(),
            error_updated_at: self.error_updated_at,
            error_update_count: self.error_update_count,
            failure_count: self.failure_count,
            failure_reason: self.failure_reason.clone(),
            status: self.status,
            fetch_status: self.fetch_status,
            is_stale: self.is_stale,
            is_placeholder_data: self.is_placeholder_data,
            is_invalidated: self.is_invalidated,
            fetch_direction: self.fetch_direction,
        }
    }
}

impl<T> fmt::Debug for QueryObserverResult<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryObserverResult")
            .field("has_data", &self.data.is_some())
            .field("status", &self.status)
            .field("fetch_status", &self.fetch_status)
            .field("error", &self.error)
            .field("failure_count", &self.failure_count)
            .field("is_stale", &self.is_stale)
            .field("is_placeholder_data", &self.is_placeholder_data)
            .finish()
    }
}

impl<T> QueryObserverResult<T> {
    pub fn is_pending(&self) -> bool {
        self.status == QueryStatus::Pending
    }

    pub fn is_success(&self) -> bool {
        self.status == QueryStatus::Success
    }

    pub fn is_error(&self) -> bool {
        self.status == QueryStatus::Error
    }

    pub fn is_fetching(&self) -> bool {
        self.fetch_status == FetchStatus::Fetching
    }

    pub fn is_paused(&self) -> bool {
        self.fetch_status == FetchStatus::Paused
    }

    /// First load: nothing to show yet and a fetch is running.
    pub fn is_loading(&self) -> bool {
        self.is_pending() && self.is_fetching()
    }

    /// Background refetch with something already shown.
    pub fn is_refetching(&self) -> bool {
        self.is_fetching() && !self.is_pending()
    }

    /// The query has completed at least one fetch.
    pub fn is_fetched(&self) -> bool {
        self.data_update_count + self.error_update_count > 0
    }
}

fn compute_result<T>(
    state: &QueryState<T>,
    options: &QueryOptions<T>,
    resolved: &ResolvedQueryConfig,
    previous_data: Option<&Arc<T>>,
    optimistic_fetch: bool,
) -> QueryObserverResult<T> {
    let mut data = state.data.clone();
    let mut status = state.status;
    let mut is_placeholder_data = false;
    if data.is_none() && status == QueryStatus::Pending {
        let placeholder = match &options.placeholder_data {
            Some(PlaceholderData::Value(value)) => Some(value.clone()),
            Some(PlaceholderData::KeepPrevious) => previous_data.cloned(),
            None => None,
        };
        if let Some(placeholder) = placeholder {
            data = Some(placeholder);
            status = QueryStatus::Success;
            is_placeholder_data = true;
        }
    }
    let fetch_status = if optimistic_fetch && state.fetch_status == FetchStatus::Idle {
        FetchStatus::Fetching
    } else {
        state.fetch_status
    };

    QueryObserverResult {
        data,
        data_updated_at: state.data_updated_at,
        data_update_count: state.data_update_count,
        error: state.error.clone(),
        error_updated_at: state.error_updated_at,
        error_update_count: state.error_update_count,
        failure_count: state.fetch_failure_count,
        failure_reason: state.fetch_failure_reason.clone(),
        status,
        fetch_status,
        is_stale: stale_by_time(state, resolved.stale_time, Instant::now()),
        is_placeholder_data,
        is_invalidated: state.is_invalidated,
        fetch_direction: state.fetch_direction,
    }
}

/// Refetch decision for one trigger. Disabled observers and static data never refetch.
fn should_fetch_on<T>(
    resolved: &ResolvedQueryConfig,
    policy: RefetchPolicy,
    state: &QueryState<T>,
) -> bool {
    if !resolved.enabled || resolved.stale_time.is_static() {
        return false;
    }
    match policy {
        RefetchPolicy::Never => false,
        RefetchPolicy::Always => true,
        RefetchPolicy::IfStale => stale_by_time(state, resolved.stale_time, Instant::now()),
    }
}

fn should_fetch_on_mount<T>(resolved: &ResolvedQueryConfig, state: &QueryState<T>) -> bool {
    if state.data.is_none() {
        return resolved.enabled;
    }
    should_fetch_on(resolved, resolved.refetch_on_mount, state)
}

struct ObserverState<T> {
    options: QueryOptions<T>,
    resolved: ResolvedQueryConfig,
    query: Arc<Query<T>>,
    result: QueryObserverResult<T>,
    last_defined_data: Option<Arc<T>>,
    destroyed: bool,
}

struct ObserverCore<T> {
    client: QueryClient,
    state: Mutex<ObserverState<T>>,
    listeners: Arc<Listeners<QueryObserverResult<T>>>,
}

impl<T: Send + Sync + 'static> ObserverCore<T> {
    fn query(&self) -> Arc<Query<T>> {
        self.state.lock().query.clone()
    }

    /// Recompute from the query's current state and notify subscribers.
    fn update_result(&self) {
        let query = self.query();
        let state = query.state();
        self.apply(query.key(), &state);
    }

    fn apply(&self, key: &QueryKey, state: &QueryState<T>) {
        let result = {
            let mut observer = self.state.lock();
            if observer.destroyed || observer.query.key() != key {
                return;
            }
            let result = compute_result(
                state,
                &observer.options,
                &observer.resolved,
                observer.last_defined_data.as_ref(),
                false,
            );
            if state.data.is_some() {
                observer.last_defined_data = state.data.clone();
            }
            observer.result = result.clone();
            result
        };
        self.listeners.notify(&result);
    }
}

impl<T: Send + Sync + 'static> QueryListener<T> for ObserverCore<T> {
    fn on_query_update(&self, key: &QueryKey, state: &QueryState<T>) {
        self.apply(key, state);
    }

    fn is_enabled(&self) -> bool {
        self.state.lock().resolved.enabled
    }

    fn stale_time(&self) -> StaleTime {
        self.state.lock().resolved.stale_time
    }

    fn should_refetch_on(&self, trigger: RefetchTrigger, state: &QueryState<T>) -> bool {
        let resolved = self.state.lock().resolved.clone();
        let policy = match trigger {
            RefetchTrigger::Resume => resolved.refetch_on_resume,
            RefetchTrigger::Reconnect => resolved.refetch_on_reconnect,
        };
        should_fetch_on(&resolved, policy, state)
    }

    fn fetch_options(&self) -> FetchOptions {
        FetchOptions::default().with_resolved(&self.state.lock().resolved)
    }
}

/// A consumer's handle on one query.
///
/// Creating an observer attaches it to the query for its key (building the
/// query if needed) and fetches if the data is missing or stale per the
/// refetch-on-mount policy. Changing options to another key moves the
/// observer to that key's query. Dropping the observer detaches it, which may
/// arm the query's eviction timer.
///
/// # Example
///
/// ```ignore
/// let observer = QueryObserver::new(&client, QueryOptions::new(query_key!["todos"]).query_fn(fetch_todos))?;
/// let _sub = observer.subscribe(|result| {
///     if let Some(todos) = &result.data {
///         render(todos);
///     }
/// });
/// ```
pub struct QueryObserver<T: Send + Sync + 'static> {
    core: Arc<ObserverCore<T>>,
}

impl<T: Send + Sync + 'static> QueryObserver<T> {
    pub fn new(client: &QueryClient, options: QueryOptions<T>) -> Result<Self, QueryError> {
        let options = client.default_query_options(options);
        let query = client.query_cache().build(options.clone())?;
        let resolved = options.resolved();
        let state = query.state();
        let result = compute_result(&state, &options, &resolved, None, false);
        let core = Arc::new(ObserverCore {
            client: client.clone(),
            state: Mutex::new(ObserverState {
                last_defined_data: state.data.clone(),
                options,
                resolved,
                query,
                result,
                destroyed: false,
            }),
            listeners: Listeners::new(),
        });

        let observer = Self { core };
        observer.mount()?;
        Ok(observer)
    }

    fn listener(&self) -> Arc<dyn QueryListener<T>> {
        self.core.clone()
    }

    /// Attach to `query`, or to its replacement when garbage collection
    /// claimed it first, and make that the observed query.
    fn attach(
        &self,
        mut query: Arc<Query<T>>,
        options: &QueryOptions<T>,
    ) -> Result<Arc<Query<T>>, QueryError> {
        while !query.add_observer(self.listener()) {
            query = self.core.client.query_cache().build(options.clone())?;
        }
        self.core.state.lock().query = query.clone();
        Ok(query)
    }

    fn mount(&self) -> Result<(), QueryError> {
        let (query, options, resolved) = {
            let observer = self.core.state.lock();
            (
                observer.query.clone(),
                observer.options.clone(),
                observer.resolved.clone(),
            )
        };
        let query = self.attach(query, &options)?;
        if should_fetch_on_mount(&resolved, &query.state()) {
            query.fetch_in_background(FetchOptions::default().with_resolved(&resolved));
        }
        self.core.update_result();
        Ok(())
    }

    /// The query currently observed.
    pub fn query(&self) -> Arc<Query<T>> {
        self.core.query()
    }

    pub fn options(&self) -> QueryOptions<T> {
        self.core.state.lock().options.clone()
    }

    pub fn current_result(&self) -> QueryObserverResult<T> {
        self.core.state.lock().result.clone()
    }

    /// The result a consumer should render right now for `options`, accounting
    /// for a fetch that mounting with these options would start.
    pub fn get_optimistic_result(
        &self,
        options: QueryOptions<T>,
    ) -> Result<QueryObserverResult<T>, QueryError> {
        let options = self.core.client.default_query_options(options);
        let query = self.core.client.query_cache().build(options.clone())?;
        let resolved = options.resolved();
        let state = query.state();
        let previous = self.core.state.lock().last_defined_data.clone();
        let fetch = should_fetch_on_mount(&resolved, &state);
        Ok(compute_result(
            &state,
            &options,
            &resolved,
            previous.as_ref(),
            fetch,
        ))
    }

    /// Replace the options.
    ///
    /// A new key moves the observer to that key's query. With the same key the
    /// result is recomputed, and a refetch starts if the observer was disabled
    /// before (or its stale time changed) and the data is now stale.
    pub fn set_options(&self, options: QueryOptions<T>) -> Result<(), QueryError> {
        let options = self.core.client.default_query_options(options);
        let (previous_query, previous_resolved) = {
            let observer = self.core.state.lock();
            (observer.query.clone(), observer.resolved.clone())
        };
        let query = self.core.client.query_cache().build(options.clone())?;
        let resolved = options.resolved();
        let key_changed = !Arc::ptr_eq(&query, &previous_query);
        {
            let mut observer = self.core.state.lock();
            observer.options = options.clone();
            observer.resolved = resolved.clone();
            observer.query = query.clone();
        }

        if key_changed {
            previous_query.remove_observer(&self.listener());
            let query = self.attach(query, &options)?;
            if should_fetch_on_mount(&resolved, &query.state()) {
                query.fetch_in_background(FetchOptions::default().with_resolved(&resolved));
            }
        } else {
            let reconsider =
                !previous_resolved.enabled || previous_resolved.stale_time != resolved.stale_time;
            if reconsider && should_fetch_on(&resolved, RefetchPolicy::IfStale, &query.state()) {
                query.fetch_in_background(FetchOptions::default().with_resolved(&resolved));
            }
        }
        self.core.update_result();
        Ok(())
    }

    /// Refetch, cancelling a fetch in flight if there is data, and return the
    /// resulting view.
    pub fn refetch(&self) -> impl Future<Output = QueryObserverResult<T>> + Send + 'static {
        self.fetch_with(FetchOptions::cancel_refetch())
    }

    pub(crate) fn fetch_with(
        &self,
        options: FetchOptions,
    ) -> impl Future<Output = QueryObserverResult<T>> + Send + 'static {
        let (query, resolved) = {
            let observer = self.core.state.lock();
            (observer.query.clone(), observer.resolved.clone())
        };
        let fetch = query.fetch(options.with_resolved(&resolved));
        let core = self.core.clone();
        async move {
            if let Err(error) = fetch.await {
                tracing::debug!(%error, "observer fetch failed");
            }
            core.update_result();
            let result = core.state.lock().result.clone();
            result
        }
    }

    /// Call `listener` with every new result.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&QueryObserverResult<T>) + Send + Sync + 'static,
    {
        self.core.listeners.subscribe(listener)
    }

    /// Detach from the query. Also happens on drop.
    pub fn destroy(&self) {
        let query = {
            let mut observer = self.core.state.lock();
            if observer.destroyed {
                return;
            }
            observer.destroyed = true;
            observer.query.clone()
        };
        query.remove_observer(&self.listener());
    }
}

impl<T: Send + Sync + 'static> Drop for QueryObserver<T> {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl<T: Send + Sync + 'static> fmt::Debug for QueryObserver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryObserver")
            .field("key", self.core.query().key())
            .field("result", &self.current_result())
            .finish()
    }
}
