//! Registry of mutations by id.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};

use crate::client::{ClientShared, QueryClient};
use crate::error::QueryError;
use crate::filters::MutationFilters;
use crate::mutation::{AnyMutation, Mutation, MutationOptions};
use crate::online::OnlineManager;
use crate::subscription::{Listeners, Subscription};
use crate::tracer::{NoopTracer, Tracer};

/// Mutation store events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationCacheEvent {
    Added { mutation_id: u64 },
    Removed { mutation_id: u64 },
    Updated {
        mutation_id: u64,
        action: &'static str,
    },
}

impl MutationCacheEvent {
    pub fn mutation_id(&self) -> u64 {
        match self {
            MutationCacheEvent::Added { mutation_id }
            | MutationCacheEvent::Removed { mutation_id }
            | MutationCacheEvent::Updated { mutation_id, .. } => *mutation_id,
        }
    }
}

pub(crate) struct MutationCacheShared {
    mutations: Mutex<BTreeMap<u64, Arc<dyn AnyMutation>>>,
    next_id: AtomicU64,
    listeners: Arc<Listeners<MutationCacheEvent>>,
    tracer: Arc<dyn Tracer>,
    online: OnlineManager,
    client: RwLock<Weak<ClientShared>>,
}

impl MutationCacheShared {
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

    pub(crate) fn emit(&self, event: MutationCacheEvent) {
        self.listeners.notify(&event);
    }

    pub(crate) fn remove_mutation(&self, mutation_id: u64) -> bool {
        let removed = self.mutations.lock().remove(&mutation_id);
        match removed {
            Some(mutation) => {
                mutation.destroy();
                self.emit(MutationCacheEvent::Removed { mutation_id });
                true
            }
            None => false,
        }
    }
}

/// Holds every mutation until it is evicted.
///
/// Mutations are keyed by an increasing id, so iteration follows
/// submission order. This is cheap to clone.
#[derive(Clone)]
pub struct MutationCache {
    shared: Arc<MutationCacheShared>,
}

impl Default for MutationCache {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MutationCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutationCache")
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

impl MutationCache {
    pub fn new() -> Self {
        Self::with_parts(Arc::new(NoopTracer), OnlineManager::default())
    }

    pub(crate) fn with_parts(tracer: Arc<dyn Tracer>, online: OnlineManager) -> Self {
        Self {
            shared: Arc::new(MutationCacheShared {
                mutations: Mutex::new(BTreeMap::new()),
                next_id: AtomicU64::new(1),
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

    /// Register a new mutation. Unlike queries, nothing is shared between
    /// builds with the same key.
    pub fn build<T, V, C>(&self, options: MutationOptions<T, V, C>) -> Arc<Mutation<T, V, C>>
    where
        T: Send + Sync + 'static,
        V: Send + Sync + 'static,
        C: Send + Sync + 'static,
    {
        let mutation_id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let mutation = Mutation::new(mutation_id, options, Arc::downgrade(&self.shared));
        self.shared
            .mutations
            .lock()
            .insert(mutation_id, mutation.clone());
        mutation.schedule_gc();
        self.shared.emit(MutationCacheEvent::Added { mutation_id });
        mutation
    }

    /// Typed lookup by id.
    pub fn get<T, V, C>(&self, mutation_id: u64) -> Result<Option<Arc<Mutation<T, V, C>>>, QueryError>
    where
        T: Send + Sync + 'static,
        V: Send + Sync + 'static,
        C: Send + Sync + 'static,
    {
        let Some(mutation) = self.shared.mutations.lock().get(&mutation_id).cloned() else {
            return Ok(None);
        };
        mutation
            .as_any()
            .downcast::<Mutation<T, V, C>>()
            .map(Some)
            .map_err(|_| QueryError::TypeMismatch {
                key: format!("mutation #{}", mutation_id),
                expected: std::any::type_name::<T>(),
            })
    }

    pub fn get_all(&self) -> Vec<Arc<dyn AnyMutation>> {
        self.shared.mutations.lock().values().cloned().collect()
    }

    pub fn find(&self, filters: &MutationFilters) -> Option<Arc<dyn AnyMutation>> {
        self.find_all(filters).into_iter().next()
    }

    pub fn find_all(&self, filters: &MutationFilters) -> Vec<Arc<dyn AnyMutation>> {
        self.get_all()
            .into_iter()
            .filter(|mutation| filters.matches(mutation.as_ref()))
            .collect()
    }

    pub fn remove(&self, mutation: &Arc<dyn AnyMutation>) {
        self.shared.remove_mutation(mutation.mutation_id());
    }

    pub fn clear(&self) {
        let ids: Vec<u64> = self.shared.mutations.lock().keys().copied().collect();
        for mutation_id in ids {
            self.shared.remove_mutation(mutation_id);
        }
    }

    pub fn len(&self) -> usize {
        self.shared.mutations.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Listen to [`MutationCacheEvent`]s.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&MutationCacheEvent) + Send + Sync + 'static,
    {
        self.shared.listeners.subscribe(listener)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutation::MutationStatus;
    use crate::query_key;

    #[test]
    fn test_build_never_shares() {
        let cache = MutationCache::new();
        let a = cache.build(MutationOptions::<u32, (), ()>::new().mutation_key("add"));
        let b = cache.build(MutationOptions::<u32, (), ()>::new().mutation_key("add"));
        assert_ne!(a.mutation_id(), b.mutation_id());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_find_by_key_and_status() {
        let cache = MutationCache::new();
        cache.build(MutationOptions::<u32, (), ()>::new().mutation_key(query_key!["todos", "add"]));
        cache.build(MutationOptions::<u32, (), ()>::new().mutation_key(query_key!["users"]));
        cache.build(MutationOptions::<u32, (), ()>::new());

        assert_eq!(cache.find_all(&MutationFilters::key("todos")).len(), 1);
        assert_eq!(cache.find_all(&MutationFilters::all()).len(), 3);
        assert_eq!(
            cache
                .find_all(&MutationFilters::all().status(MutationStatus::Idle))
                .len(),
            3
        );
        assert!(cache
            .find(&MutationFilters::all().status(MutationStatus::Pending))
            .is_none());
    }

    #[test]
    fn test_typed_get() {
        let cache = MutationCache::new();
        let mutation = cache.build(MutationOptions::<u32, String, ()>::new());
        let id = mutation.mutation_id();

        assert!(cache.get::<u32, String, ()>(id).unwrap().is_some());
        assert!(cache.get::<u32, String, ()>(id + 100).unwrap().is_none());
        assert!(cache.get::<String, String, ()>(id).is_err());
    }

    #[test]
    fn test_events_and_clear() {
        let cache = MutationCache::new();
        let events = Arc::new(Mutex::new(Vec::new()));
        let _sub = cache.subscribe({
            let events = events.clone();
            move |event| events.lock().push(event.clone())
        });

        let id = cache.build(MutationOptions::<u32, (), ()>::new()).mutation_id();
        cache.clear();

        assert!(cache.is_empty());
        assert_eq!(
            *events.lock(),
            vec![
                MutationCacheEvent::Added { mutation_id: id },
                MutationCacheEvent::Removed { mutation_id: id },
            ]
        );
    }
}
