//! Key-indexed store of queries.

use std::sync::{Arc, Weak};

use papaya::{Compute, HashMap, Operation};
use parking_lot::RwLock;

use crate::client::{ClientShared, QueryClient};
use crate::error::QueryError;
use crate::filters::QueryFilters;
use crate::key::QueryKey;
use crate::online::OnlineManager;
use crate::options::QueryOptions;
use crate::query::{downcast_query, AnyQuery, Query};
use crate::subscription::{Listeners, Subscription};
use crate::tracer::{NoopTracer, Tracer};

/// Store events, for monitoring hooks such as fetch counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryCacheEvent {
    Added { key: QueryKey },
    Removed { key: QueryKey },
    /// A state transition; `action` names it (`"fetch"`, `"success"`, ...).
    Updated { key: QueryKey, action: &'static str },
    ObserverAdded { key: QueryKey },
    ObserverRemoved { key: QueryKey },
}

impl QueryCacheEvent {
    pub fn key(&self) -> &QueryKey {
        match self {
            QueryCacheEvent::Added { key }
            | QueryCacheEvent::Removed { key }
            | QueryCacheEvent::Updated { key, .. }
            | QueryCacheEvent::ObserverAdded { key }
            | QueryCacheEvent::ObserverRemoved { key } => key,
        }
    }
}

/// State shared between the cache handle and the queries it owns.
pub(crate) struct CacheShared {
    queries: HashMap<QueryKey, Arc<dyn AnyQuery>, ahash::RandomState>,
    listeners: Arc<Listeners<QueryCacheEvent>>,
    tracer: Arc<dyn Tracer>,
    online: OnlineManager,
    client: RwLock<Weak<ClientShared>>,
}

impl CacheShared {
    pub(crate) fn online(&self) -> &OnlineManager {
        &self.online
    }

    pub(crate) fn tracer(&self) -> Arc<dyn Tracer> {
        self.tracer.clone()
    }

    pub(crate) fn noop_tracer() -> Arc<dyn Tracer> {
        Arc::new(NoopTracer)
    }

    pub(crate) fn client(&self) -> Option<QueryClient> {
        self.client.read().upgrade().map(QueryClient::from_shared)
    }

    pub(crate) fn emit(&self, event: QueryCacheEvent) {
        self.listeners.notify(&event);
    }

    /// Remove the entry at `key` only if it is still the query at `ptr`.
    pub(crate) fn remove_query(&self, key: &QueryKey, ptr: *const ()) -> bool {
        self.remove_query_if(key, ptr, &|| true)
    }

    /// Like [`remove_query`](Self::remove_query), deciding with `can_remove`
    /// inside the map operation.
    pub(crate) fn remove_query_if(
        &self,
        key: &QueryKey,
        ptr: *const (),
        can_remove: &dyn Fn() -> bool,
    ) -> bool {
        let pinned = self.queries.pin();
        let result = pinned.compute(key.clone(), |entry| {
            let Some((_, current)) = entry else {
                return Operation::Abort(());
            };
            if std::ptr::eq(Arc::as_ptr(current) as *const (), ptr) && can_remove() {
                Operation::Remove
            } else {
                Operation::Abort(())
            }
        });
        match result {
            Compute::Removed(_, _) => {
                tracing::debug!(key = %key, "query removed from cache");
                self.emit(QueryCacheEvent::Removed { key: key.clone() });
                true
            }
            Compute::Aborted(()) => false,
            Compute::Inserted(_, _) | Compute::Updated { .. } => unreachable!(),
        }
    }
}

/// Registry of queries by key.
///
/// This is cheap to clone, so you can pass it around by just cloning it.
#[derive(Clone)]
pub struct QueryCache {
    shared: Arc<CacheShared>,
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for QueryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryCache")
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

impl QueryCache {
    /// A standalone cache with no tracer, always online.
    pub fn new() -> Self {
        Self::with_parts(Arc::new(NoopTracer), OnlineManager::default())
    }

    pub(crate) fn with_parts(tracer: Arc<dyn Tracer>, online: OnlineManager) -> Self {
        Self {
            shared: Arc::new(CacheShared {
                queries: HashMap::with_hasher(ahash::RandomState::new()),
                listeners: Listeners::new(),
                tracer,
                online,
                client: RwLock::new(Weak::new()),
            }),
        }
    }

    pub(crate) fn attach_client(&self, client: Weak<ClientShared>) {
        *self.shared.client.write() = client;
    }

    /// Get the query for `options.key`, creating it if absent.
    ///
    /// An existing query gets `options` merged over its own. A new query arms
    /// its eviction timer right away; the first observer disarms it. A query
    /// already claimed by garbage collection is replaced with a new one.
    ///
    /// Fails with [`QueryError::TypeMismatch`] if the key already holds a
    /// query of another data type.
    pub fn build<T: Send + Sync + 'static>(
        &self,
        options: QueryOptions<T>,
    ) -> Result<Arc<Query<T>>, QueryError> {
        let key = options.key.clone();
        let pinned = self.shared.queries.pin();
        if let Some(existing) = pinned.get(&key).filter(|q| !q.is_evicted()) {
            let query = downcast_query::<T>(existing.clone())?;
            query.set_options(options);
            return Ok(query);
        }

        let candidate = Query::new(options, Arc::downgrade(&self.shared));
        let erased: Arc<dyn AnyQuery> = candidate.clone();
        let result = pinned.compute(key.clone(), |entry| match entry {
            Some((_, existing)) if !existing.is_evicted() => Operation::Abort(existing.clone()),
            _ => Operation::Insert(erased.clone()),
        });
        match result {
            Compute::Inserted(_, _) => {
                tracing::debug!(key = %key, "query added to cache");
                candidate.schedule_gc();
                self.shared.emit(QueryCacheEvent::Added { key });
                Ok(candidate)
            }
            Compute::Updated { old: (_, old), .. } => {
                tracing::debug!(key = %key, "evicted query replaced");
                old.destroy();
                self.shared.emit(QueryCacheEvent::Removed { key: key.clone() });
                candidate.schedule_gc();
                self.shared.emit(QueryCacheEvent::Added { key });
                Ok(candidate)
            }
            Compute::Aborted(existing) => {
                // Lost a race against another builder of the same key.
                let query = downcast_query::<T>(existing)?;
                query.set_options(candidate.options());
                Ok(query)
            }
            Compute::Removed(_, _) => unreachable!(),
        }
    }

    /// Typed lookup by exact key.
    pub fn get<T: Send + Sync + 'static>(
        &self,
        key: &QueryKey,
    ) -> Result<Option<Arc<Query<T>>>, QueryError> {
        self.get_any(key).map(downcast_query::<T>).transpose()
    }

    pub fn get_any(&self, key: &QueryKey) -> Option<Arc<dyn AnyQuery>> {
        self.shared.queries.pin().get(key).cloned()
    }

    pub fn get_all(&self) -> Vec<Arc<dyn AnyQuery>> {
        self.shared
            .queries
            .pin()
            .iter()
            .map(|(_, query)| query.clone())
            .collect()
    }

    /// First query matching `filters`, preferring an exact key hit.
    pub fn find(&self, filters: &QueryFilters) -> Option<Arc<dyn AnyQuery>> {
        if let Some(query) = filters
            .query_key
            .as_ref()
            .and_then(|key| self.get_any(key))
            .filter(|query| filters.matches(query.as_ref()))
        {
            return Some(query);
        }
        self.find_all(filters).into_iter().next()
    }

    pub fn find_all(&self, filters: &QueryFilters) -> Vec<Arc<dyn AnyQuery>> {
        self.get_all()
            .into_iter()
            .filter(|query| filters.matches(query.as_ref()))
            .collect()
    }

    /// Remove `query` if it is still the one registered under its key.
    pub fn remove(&self, query: &Arc<dyn AnyQuery>) {
        let ptr = Arc::as_ptr(query) as *const ();
        if self.shared.remove_query(query.key(), ptr) {
            query.destroy();
        }
    }

    pub fn clear(&self) {
        for query in self.get_all() {
            self.remove(&query);
        }
    }

    pub fn len(&self) -> usize {
        self.shared.queries.pin().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Listen to [`QueryCacheEvent`]s.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&QueryCacheEvent) + Send + Sync + 'static,
    {
        self.shared.listeners.subscribe(listener)
    }

    /// Let every query react to the application resuming.
    pub fn on_resume(&self) {
        for query in self.get_all() {
            query.on_resume();
        }
    }

    /// Let every query react to connectivity returning.
    pub fn on_reconnect(&self) {
        for query in self.get_all() {
            query.on_reconnect();
        }
    }
}
