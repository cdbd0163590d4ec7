//! A consumer's handle on the latest execution of a mutation.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::client::QueryClient;
use crate::error::QueryError;
use crate::mutation::{Mutation, MutationListener, MutationOptions, MutationState};
use crate::subscription::{Listeners, Subscription};

/// What a [`MutationObserver`] shows: the state of its latest mutation.
pub type MutationObserverResult<T, V, C> = MutationState<T, V, C>;

struct ObserverState<T, V, C> {
    options: MutationOptions<T, V, C>,
    current: Option<Arc<Mutation<T, V, C>>>,
    result: MutationState<T, V, C>,
}

struct ObserverCore<T, V, C> {
    client: QueryClient,
    state: Mutex<ObserverState<T, V, C>>,
    listeners: Arc<Listeners<MutationState<T, V, C>>>,
}

impl<T, V, C> MutationListener<T, V, C> for ObserverCore<T, V, C>
where
    T: Send + Sync + 'static,
    V: Send + Sync + 'static,
    C: Send + Sync + 'static,
{
    fn on_mutation_update(&self, mutation_id: u64, state: &MutationState<T, V, C>) {
        {
            let mut observer = self.state.lock();
            let is_current = observer
                .current
                .as_ref()
                .is_some_and(|m| m.mutation_id() == mutation_id);
            if !is_current {
                return;
            }
            observer.result = state.clone();
        }
        self.listeners.notify(state);
    }
}

/// Runs a mutation on demand and tracks the latest run.
///
/// Every [`mutate`](Self::mutate) builds a fresh [`Mutation`] in the client's
/// mutation cache and moves the observer onto it; the previous one is left to
/// its eviction timer.
pub struct MutationObserver<T, V, C = ()>
where
    T: Send + Sync + 'static,
    V: Send + Sync + 'static,
    C: Send + Sync + 'static,
{
    core: Arc<ObserverCore<T, V, C>>,
}

impl<T, V, C> MutationObserver<T, V, C>
where
    T: Send + Sync + 'static,
    V: Send + Sync + 'static,
    C: Send + Sync + 'static,
{
    pub fn new(client: &QueryClient, options: MutationOptions<T, V, C>) -> Self {
        let options = client.default_mutation_options(options);
        Self {
            core: Arc::new(ObserverCore {
                client: client.clone(),
                state: Mutex::new(ObserverState {
                    options,
                    current: None,
                    result: MutationState::default(),
                }),
                listeners: Listeners::new(),
            }),
        }
    }

    fn listener(&self) -> Arc<dyn MutationListener<T, V, C>> {
        self.core.clone()
    }

    /// Replace the options. A mutation already running keeps its hooks;
    /// the next [`mutate`](Self::mutate) uses the new ones.
    pub fn set_options(&self, options: MutationOptions<T, V, C>) {
        let options = self.core.client.default_mutation_options(options);
        let current = {
            let mut observer = self.core.state.lock();
            observer.options = options.clone();
            observer.current.clone()
        };
        if let Some(mutation) = current {
            mutation.set_options(options);
        }
    }

    pub fn options(&self) -> MutationOptions<T, V, C> {
        self.core.state.lock().options.clone()
    }

    /// Execute a new mutation with `variables`.
    pub fn mutate(
        &self,
        variables: V,
    ) -> impl Future<Output = Result<Arc<T>, QueryError>> + Send + 'static {
        let options = self.options();
        let mutation = self.core.client.mutation_cache().build(options);
        let previous = {
            let mut observer = self.core.state.lock();
            observer.current.replace(mutation.clone())
        };
        if let Some(previous) = previous {
            previous.remove_observer(&self.listener());
        }
        mutation.add_observer(self.listener());
        mutation.execute(variables)
    }

    /// Detach from the latest mutation and go back to idle.
    pub fn reset(&self) {
        let (previous, result) = {
            let mut observer = self.core.state.lock();
            observer.result = MutationState::default();
            (observer.current.take(), observer.result.clone())
        };
        if let Some(previous) = previous {
            previous.remove_observer(&self.listener());
        }
        self.core.listeners.notify(&result);
    }

    pub fn current_result(&self) -> MutationObserverResult<T, V, C> {
        self.core.state.lock().result.clone()
    }

    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&MutationObserverResult<T, V, C>) + Send + Sync + 'static,
    {
        self.core.listeners.subscribe(listener)
    }
}

impl<T, V, C> Drop for MutationObserver<T, V, C>
where
    T: Send + Sync + 'static,
    V: Send + Sync + 'static,
    C: Send + Sync + 'static,
{
    fn drop(&mut self) {
        let current = self.core.state.lock().current.take();
        if let Some(mutation) = current {
            mutation.remove_observer(&self.listener());
        }
    }
}

impl<T, V, C> fmt::Debug for MutationObserver<T, V, C>
where
    T: Send + Sync + 'static,
    V: Send + Sync + 'static,
    C: Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutationObserver")
            .field("result", &self.current_result())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutation::MutationStatus;

    #[tokio::test(start_paused = true)]
    async fn test_mutate_and_reset() {
        let client = QueryClient::new();
        let observer = MutationObserver::new(
            &client,
            MutationOptions::<u32, u32, ()>::new().mutation_fn(|n, _| async move { Ok(*n + 1) }),
        );
        let seen = Arc::new(Mutex::new(Vec::new()));
        let _sub = observer.subscribe({
            let seen = seen.clone();
            move |result| seen.lock().push(result.status)
        });

        assert!(observer.current_result().is_idle());
        let data = observer.mutate(1).await.unwrap();
        assert_eq!(*data, 2);
        assert!(observer.current_result().is_success());
        assert_eq!(
            *seen.lock(),
            vec![MutationStatus::Pending, MutationStatus::Success]
        );

        observer.reset();
        assert!(observer.current_result().is_idle());
        assert_eq!(client.mutation_cache().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_mutate_builds_a_new_mutation() {
        let client = QueryClient::new();
        let observer = MutationObserver::new(
            &client,
            MutationOptions::<u32, u32, ()>::new().mutation_fn(|n, _| async move { Ok(*n) }),
        );

        observer.mutate(1).await.unwrap();
        observer.mutate(2).await.unwrap();
        assert_eq!(client.mutation_cache().len(), 2);
        assert_eq!(observer.current_result().variables.as_deref(), Some(&2));
    }
}
