//! The client: one entry point over the query and mutation caches.

use std::future::Future;
use std::sync::Arc;

use futures::future::join_all;
use parking_lot::RwLock;

use crate::error::{CancelOptions, QueryError};
use crate::filters::{MutationFilters, QueryFilters, QueryTypeFilter};
use crate::infinite::{InfiniteData, InfiniteQueryOptions};
use crate::key::QueryKey;
use crate::mutation::{MutationOptions, MutationStatus};
use crate::mutation_cache::MutationCache;
use crate::online::OnlineManager;
use crate::options::{DefaultOptions, FetchOptions, MutationConfig, QueryConfig, QueryOptions};
use crate::query_cache::QueryCache;
use crate::retryer::RetryPolicy;
use crate::state::{FetchStatus, QueryState};
use crate::tracer::{NoopTracer, Tracer};

/// Which invalidated queries [`QueryClient::invalidate_queries`] refetches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum RefetchType {
    /// Queries with at least one enabled observer.
    #[default]
    Active,
    Inactive,
    All,
    /// Only mark them stale.
    None,
}

pub(crate) struct ClientShared {
    query_cache: QueryCache,
    mutation_cache: MutationCache,
    defaults: RwLock<DefaultOptions>,
    query_defaults: RwLock<Vec<(QueryKey, QueryConfig)>>,
    mutation_defaults: RwLock<Vec<(QueryKey, MutationConfig)>>,
    online: OnlineManager,
}

/// Entry point for reading, writing and refreshing cached data.
///
/// This is cheap to clone; clones share the same caches.
///
/// # Example
///
/// ```ignore
/// let client = QueryClient::new();
/// let todos = client
///     .fetch_query(QueryOptions::new(query_key!["todos"]).query_fn(fetch_todos))
///     .await?;
/// client.invalidate_queries(QueryFilters::key("todos"), RefetchType::Active).await;
/// ```
#[derive(Clone)]
pub struct QueryClient {
    shared: Arc<ClientShared>,
}

impl Default for QueryClient {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for QueryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryClient")
            .field("query_cache", &self.shared.query_cache)
            .field("mutation_cache", &self.shared.mutation_cache)
            .field("online", &self.is_online())
            .finish()
    }
}

impl QueryClient {
    /// Create a client with default settings.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Create a builder for customizing the client.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let client = QueryClient::builder()
    ///     .default_options(ClientConfig::from_yaml_str(yaml)?.into())
    ///     .tracer(MyTracer::new())
    ///     .build();
    /// ```
    pub fn builder() -> QueryClientBuilder {
        QueryClientBuilder::new()
    }

    pub(crate) fn from_shared(shared: Arc<ClientShared>) -> Self {
        Self { shared }
    }

    pub fn query_cache(&self) -> &QueryCache {
        &self.shared.query_cache
    }

    pub fn mutation_cache(&self) -> &MutationCache {
        &self.shared.mutation_cache
    }

    /// Drop every query and mutation.
    pub fn clear(&self) {
        self.shared.query_cache.clear();
        self.shared.mutation_cache.clear();
    }
}

// ============================================================================
// Defaults
// ============================================================================

impl QueryClient {
    pub fn default_options(&self) -> DefaultOptions {
        self.shared.defaults.read().clone()
    }

    pub fn set_default_options(&self, options: DefaultOptions) {
        *self.shared.defaults.write() = options;
    }

    /// Register defaults for every query whose key starts with `prefix`.
    ///
    /// Registering the same prefix again replaces its defaults in place.
    pub fn set_query_defaults(&self, prefix: impl Into<QueryKey>, config: QueryConfig) {
        let prefix = prefix.into();
        let mut defaults = self.shared.query_defaults.write();
        match defaults.iter_mut().find(|(key, _)| *key == prefix) {
            Some((_, existing)) => *existing = config,
            None => defaults.push((prefix, config)),
        }
    }

    /// Prefix defaults that apply to `key`, merged in registration order.
    pub fn get_query_defaults(&self, key: &QueryKey) -> QueryConfig {
        self.shared
            .query_defaults
            .read()
            .iter()
            .filter(|(prefix, _)| key.starts_with(prefix))
            .fold(QueryConfig::default(), |acc, (_, config)| acc.merge(config))
    }

    pub fn set_mutation_defaults(&self, prefix: impl Into<QueryKey>, config: MutationConfig) {
        let prefix = prefix.into();
        let mut defaults = self.shared.mutation_defaults.write();
        match defaults.iter_mut().find(|(key, _)| *key == prefix) {
            Some((_, existing)) => *existing = config,
            None => defaults.push((prefix, config)),
        }
    }

    pub fn get_mutation_defaults(&self, key: &QueryKey) -> MutationConfig {
        self.shared
            .mutation_defaults
            .read()
            .iter()
            .filter(|(prefix, _)| key.starts_with(prefix))
            .fold(MutationConfig::default(), |acc, (_, config)| acc.merge(config))
    }

    /// Layer client defaults and prefix defaults underneath `options`.
    pub fn default_query_options<T: Send + Sync + 'static>(
        &self,
        options: QueryOptions<T>,
    ) -> QueryOptions<T> {
        let base = self.shared.defaults.read().queries.clone();
        let layered = base.merge(&self.get_query_defaults(options.key()));
        options.with_defaults(&layered)
    }

    pub fn default_mutation_options<T, V, C>(
        &self,
        options: MutationOptions<T, V, C>,
    ) -> MutationOptions<T, V, C>
    where
        T: Send + Sync + 'static,
        V: Send + Sync + 'static,
        C: Send + Sync + 'static,
    {
        let base = self.shared.defaults.read().mutations.clone();
        let layered = match options.key() {
            Some(key) => base.merge(&self.get_mutation_defaults(key)),
            None => base,
        };
        options.with_defaults(&layered)
    }
}

// ============================================================================
// Reads and writes
// ============================================================================

impl QueryClient {
    /// Return cached data if it is fresh, otherwise fetch it.
    ///
    /// Unless a retry policy is configured at some layer, imperative fetches
    /// do not retry. That fallback applies to this fetch only; the query
    /// keeps its own retry policy for observers and bulk refetches.
    pub async fn fetch_query<T: Send + Sync + 'static>(
        &self,
        options: QueryOptions<T>,
    ) -> Result<Arc<T>, QueryError> {
        let options = self.default_query_options(options);
        let resolved = options.resolved();
        let fetch_options = FetchOptions::default()
            .retry(options.config.retry.clone().unwrap_or(RetryPolicy::Never))
            .network_mode(resolved.network_mode);
        let query = self.shared.query_cache.build(options)?;
        if !query.is_stale_by_time(resolved.stale_time) {
            if let Some(data) = query.data() {
                return Ok(data);
            }
        }
        query.fetch(fetch_options).await
    }

    /// Like [`fetch_query`](Self::fetch_query), but only warms the cache.
    pub async fn prefetch_query<T: Send + Sync + 'static>(&self, options: QueryOptions<T>) {
        let key = options.key().clone();
        if let Err(error) = self.fetch_query(options).await {
            tracing::debug!(key = %key, %error, "prefetch failed");
        }
    }

    /// Cached data whatever its age, or fetch it when there is none.
    pub async fn ensure_query_data<T: Send + Sync + 'static>(
        &self,
        options: QueryOptions<T>,
    ) -> Result<Arc<T>, QueryError> {
        match self.get_query_data::<T>(options.key())? {
            Some(data) => Ok(data),
            None => self.fetch_query(options).await,
        }
    }

    pub fn get_query_data<T: Send + Sync + 'static>(
        &self,
        key: &QueryKey,
    ) -> Result<Option<Arc<T>>, QueryError> {
        Ok(self
            .shared
            .query_cache
            .get::<T>(key)?
            .and_then(|query| query.data()))
    }

    pub fn get_query_state<T: Send + Sync + 'static>(
        &self,
        key: &QueryKey,
    ) -> Result<Option<QueryState<T>>, QueryError> {
        Ok(self
            .shared
            .query_cache
            .get::<T>(key)?
            .map(|query| query.state()))
    }

    /// Write data computed from the current value, creating the query if
    /// needed. An updater returning `None` leaves the cache untouched.
    pub fn set_query_data<T, F>(
        &self,
        key: impl Into<QueryKey>,
        updater: F,
    ) -> Result<Option<Arc<T>>, QueryError>
    where
        T: Send + Sync + 'static,
        F: FnOnce(Option<&T>) -> Option<T>,
    {
        let key = key.into();
        let previous = self.get_query_data::<T>(&key)?;
        let Some(data) = updater(previous.as_deref()) else {
            return Ok(None);
        };
        let options = self.default_query_options(QueryOptions::<T>::new(key));
        let query = self.shared.query_cache.build(options)?;
        Ok(Some(query.set_data(data, None)))
    }
}

// ============================================================================
// Bulk operations
// ============================================================================

impl QueryClient {
    /// Mark matching queries stale, then refetch those selected by
    /// `refetch_type`.
    pub async fn invalidate_queries(&self, filters: QueryFilters, refetch_type: RefetchType) {
        for query in self.shared.query_cache.find_all(&filters) {
            query.invalidate();
        }
        let query_type = match refetch_type {
            RefetchType::None => return,
            RefetchType::Active => QueryTypeFilter::Active,
            RefetchType::Inactive => QueryTypeFilter::Inactive,
            RefetchType::All => QueryTypeFilter::All,
        };
        self.refetch_queries(filters.query_type(query_type)).await;
    }

    /// Refetch matching queries, active ones unless the filter says otherwise.
    ///
    /// Disabled, static and paused queries are skipped. Failures are logged,
    /// not returned.
    pub async fn refetch_queries(&self, filters: QueryFilters) {
        let filters = QueryFilters {
            query_type: Some(filters.query_type.unwrap_or(QueryTypeFilter::Active)),
            ..filters
        };
        let refetches = self
            .shared
            .query_cache
            .find_all(&filters)
            .into_iter()
            .filter(|query| {
                !query.is_disabled()
                    && !query.is_static()
                    && query.fetch_status() != FetchStatus::Paused
            })
            .map(|query| {
                let key = query.key().clone();
                let refetch = query.refetch(FetchOptions::cancel_refetch());
                async move {
                    if let Err(error) = refetch.await {
                        tracing::debug!(key = %key, %error, "refetch failed");
                    }
                }
            });
        join_all(refetches).await;
    }

    /// Put matching queries back to their initial state, then refetch the
    /// active ones.
    pub async fn reset_queries(&self, filters: QueryFilters) {
        for query in self.shared.query_cache.find_all(&filters) {
            query.reset();
        }
        self.refetch_queries(filters.query_type(QueryTypeFilter::Active))
            .await;
    }

    pub fn remove_queries(&self, filters: QueryFilters) {
        for query in self.shared.query_cache.find_all(&filters) {
            self.shared.query_cache.remove(&query);
        }
    }

    /// Cancel in-flight fetches of matching queries, reverting their state.
    pub fn cancel_queries(&self, filters: QueryFilters) -> impl Future<Output = ()> + Send + 'static {
        self.cancel_queries_with(filters, CancelOptions::revert())
    }

    pub fn cancel_queries_with(
        &self,
        filters: QueryFilters,
        options: CancelOptions,
    ) -> impl Future<Output = ()> + Send + 'static {
        let cancels: Vec<_> = self
            .shared
            .query_cache
            .find_all(&filters)
            .into_iter()
            .map(|query| query.cancel(options))
            .collect();
        async move {
            join_all(cancels).await;
        }
    }

    /// Number of matching queries currently fetching.
    pub fn is_fetching(&self, filters: QueryFilters) -> usize {
        self.shared
            .query_cache
            .find_all(&filters.fetch_status(FetchStatus::Fetching))
            .len()
    }

    /// Number of matching mutations currently pending.
    pub fn is_mutating(&self, filters: MutationFilters) -> usize {
        self.shared
            .mutation_cache
            .find_all(&filters.status(MutationStatus::Pending))
            .len()
    }
}

// ============================================================================
// Mutations and pagination
// ============================================================================

impl QueryClient {
    /// Run a one-shot mutation without an observer.
    pub fn execute_mutation<T, V, C>(
        &self,
        options: MutationOptions<T, V, C>,
        variables: V,
    ) -> impl Future<Output = Result<Arc<T>, QueryError>> + Send + 'static
    where
        T: Send + Sync + 'static,
        V: Send + Sync + 'static,
        C: Send + Sync + 'static,
    {
        let options = self.default_mutation_options(options);
        self.shared.mutation_cache.build(options).execute(variables)
    }

    pub async fn fetch_infinite_query<T, P>(
        &self,
        options: InfiniteQueryOptions<T, P>,
    ) -> Result<Arc<InfiniteData<T, P>>, QueryError>
    where
        T: Send + Sync + 'static,
        P: Clone + Send + Sync + 'static,
    {
        self.fetch_query(options.to_query_options()).await
    }

    pub async fn prefetch_infinite_query<T, P>(&self, options: InfiniteQueryOptions<T, P>)
    where
        T: Send + Sync + 'static,
        P: Clone + Send + Sync + 'static,
    {
        self.prefetch_query(options.to_query_options()).await
    }
}

// ============================================================================
// Background triggers
// ============================================================================

impl QueryClient {
    /// The application came back to the foreground.
    pub fn resume(&self) {
        tracing::debug!("client resumed");
        self.shared.query_cache.on_resume();
    }

    /// Update connectivity. Going online resumes paused fetches and runs the
    /// reconnect trigger.
    pub fn set_online(&self, online: bool) {
        if self.shared.online.set_online(online) && online {
            tracing::debug!("connectivity restored");
            self.shared.query_cache.on_reconnect();
        }
    }

    pub fn is_online(&self) -> bool {
        self.shared.online.is_online()
    }

    pub fn online_manager(&self) -> &OnlineManager {
        &self.shared.online
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for [`QueryClient`].
pub struct QueryClientBuilder {
    default_options: DefaultOptions,
    tracer: Option<Arc<dyn Tracer>>,
    online: Option<OnlineManager>,
}

impl Default for QueryClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryClientBuilder {
    pub fn new() -> Self {
        Self {
            default_options: DefaultOptions::default(),
            tracer: None,
            online: None,
        }
    }

    /// Client-wide defaults, the layer just above the built-in ones.
    pub fn default_options(mut self, options: DefaultOptions) -> Self {
        self.default_options = options;
        self
    }

    /// Receive fetch and mutation events. Defaults to [`NoopTracer`].
    pub fn tracer(mut self, tracer: impl Tracer + 'static) -> Self {
        self.tracer = Some(Arc::new(tracer));
        self
    }

    /// Share connectivity state with something else, such as another client.
    pub fn online(mut self, online: OnlineManager) -> Self {
        self.online = Some(online);
        self
    }

    pub fn build(self) -> QueryClient {
        let tracer = self.tracer.unwrap_or_else(|| Arc::new(NoopTracer));
        let online = self.online.unwrap_or_default();
        let shared = Arc::new(ClientShared {
            query_cache: QueryCache::with_parts(tracer.clone(), online.clone()),
            mutation_cache: MutationCache::with_parts(tracer, online.clone()),
            defaults: RwLock::new(self.default_options),
            query_defaults: RwLock::new(Vec::new()),
            mutation_defaults: RwLock::new(Vec::new()),
            online,
        });
        shared.query_cache.attach_client(Arc::downgrade(&shared));
        shared.mutation_cache.attach_client(Arc::downgrade(&shared));
        QueryClient { shared }
    }
}
