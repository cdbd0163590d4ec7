//! Mutations: one-shot writes with lifecycle hooks.
//!
//! A mutation runs its hooks in a fixed order:
//!
//! ```text
//! on_mutate -> mutation fn -> on_success -> on_settled -> commit success
//!                          \-> on_error  -> on_settled -> commit error -> re-raise
//! ```
//!
//! A failing `on_mutate`, `on_success` or success-path `on_settled` sends the
//! mutation down the error path with the hook's error. A failing `on_error`
//! or error-path `on_settled` is logged and the mutation error is re-raised
//! unchanged.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::time::Instant;

use crate::cancel::CancelSignal;
use crate::client::QueryClient;
use crate::error::QueryError;
use crate::gc::GcTimer;
use crate::key::QueryKey;
use crate::online::OnlineManager;
use crate::mutation_cache::{MutationCacheEvent, MutationCacheShared};
use crate::options::{Meta, MutationConfig};
use crate::retryer::{self, NetworkMode, RetryEvents, RetryPolicy};
use crate::time::GcTime;
use crate::tracer::MutationOutcome;

/// Lifecycle of one mutation execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum MutationStatus {
    #[default]
    Idle,
    Pending,
    Success,
    Error,
}

/// Snapshot of one mutation, also what a [`MutationObserver`](crate::MutationObserver) shows.
pub struct MutationState<T, V, C> {
    pub data: Option<Arc<T>>,
    pub error: Option<QueryError>,
    pub variables: Option<Arc<V>>,
    /// Whatever `on_mutate` returned, threaded unchanged to the other hooks.
    pub context: Option<Arc<C>>,
    pub failure_count: u32,
    pub failure_reason: Option<QueryError>,
    pub is_paused: bool,
    pub status: MutationStatus,
    pub submitted_at: Option<Instant>,
}

impl<T, V, C> Default for MutationState<T, V, C> {
    fn default() -> Self {
        Self {
            data: None,
            error: None,
            variables: None,
            context: None,
            failure_count: 0,
            failure_reason: None,
            is_paused: false,
            status: MutationStatus::Idle,
            submitted_at: None,
        }
    }
}

impl<T, V, C> Clone for MutationState<T, V, C> {
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
            error: self.error.clone(),
            variables: self.variables.clone(),
            context: self.context.clone(),
            failure_count: self.failure_count,
            failure_reason: self.failure_reason.clone(),
            is_paused: self.is_paused,
            status: self.status,
            submitted_at: self.submitted_at,
        }
    }
}

impl<T, V, C> fmt::Debug for MutationState<T, V, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutationState")
            .field("status", &self.status)
            .field("has_data", &self.data.is_some())
            .field("error", &self.error)
            .field("failure_count", &self.failure_count)
            .field("is_paused", &self.is_paused)
            .finish_non_exhaustive()
    }
}

impl<T, V, C> MutationState<T, V, C> {
    pub fn is_idle(&self) -> bool {
        self.status == MutationStatus::Idle
    }

    pub fn is_pending(&self) -> bool {
        self.status == MutationStatus::Pending
    }

    pub fn is_success(&self) -> bool {
        self.status == MutationStatus::Success
    }

    pub fn is_error(&self) -> bool {
        self.status == MutationStatus::Error
    }
}

enum MutationAction<T, V, C> {
    Pending {
        variables: Arc<V>,
        submitted_at: Instant,
    },
    Context(Option<Arc<C>>),
    Failed {
        failure_count: u32,
        error: QueryError,
    },
    Pause,
    Continue,
    Success {
        data: Arc<T>,
    },
    Error {
        error: QueryError,
    },
}

impl<T, V, C> MutationAction<T, V, C> {
    fn name(&self) -> &'static str {
        match self {
            MutationAction::Pending { .. } => "pending",
            MutationAction::Context(_) => "context",
            MutationAction::Failed { .. } => "failed",
            MutationAction::Pause => "pause",
            MutationAction::Continue => "continue",
            MutationAction::Success { .. } => "success",
            MutationAction::Error { .. } => "error",
        }
    }
}

fn reduce<T, V, C>(state: &mut MutationState<T, V, C>, action: MutationAction<T, V, C>) {
    match action {
        MutationAction::Pending {
            variables,
            submitted_at,
        } => {
            *state = MutationState {
                variables: Some(variables),
                status: MutationStatus::Pending,
                submitted_at: Some(submitted_at),
                ..MutationState::default()
            };
        }
        MutationAction::Context(context) => state.context = context,
        MutationAction::Failed {
            failure_count,
            error,
        } => {
            state.failure_count = failure_count;
            state.failure_reason = Some(error);
        }
        MutationAction::Pause => state.is_paused = true,
        MutationAction::Continue => state.is_paused = false,
        MutationAction::Success { data } => {
            state.data = Some(data);
            state.error = None;
            state.failure_count = 0;
            state.failure_reason = None;
            state.is_paused = false;
            state.status = MutationStatus::Success;
        }
        MutationAction::Error { error } => {
            state.data = None;
            state.error = Some(error.clone());
            state.failure_count += 1;
            state.failure_reason = Some(error);
            state.is_paused = false;
            state.status = MutationStatus::Error;
        }
    }
}

/// What a mutation function gets besides its variables.
#[derive(Clone)]
pub struct MutationFnContext {
    pub(crate) client: Option<QueryClient>,
    pub(crate) meta: Arc<Meta>,
    pub(crate) mutation_key: Option<QueryKey>,
}

impl MutationFnContext {
    pub fn client(&self) -> Option<&QueryClient> {
        self.client.as_ref()
    }

    pub fn meta(&self) -> &Meta {
        &self.meta
    }

    /// Used for filtering only; mutations are never deduplicated.
    pub fn mutation_key(&self) -> Option<&QueryKey> {
        self.mutation_key.as_ref()
    }
}

impl fmt::Debug for MutationFnContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutationFnContext")
            .field("mutation_key", &self.mutation_key)
            .field("meta", &self.meta)
            .finish_non_exhaustive()
    }
}

/// Performs the write for a mutation.
#[async_trait]
pub trait MutationFunction<T, V>: Send + Sync + 'static {
    async fn call(&self, variables: Arc<V>, ctx: MutationFnContext) -> Result<T, QueryError>;
}

struct FnMutation<F>(F);

#[async_trait]
impl<T, V, F, Fut> MutationFunction<T, V> for FnMutation<F>
where
    T: Send + Sync + 'static,
    V: Send + Sync + 'static,
    F: Fn(Arc<V>, MutationFnContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, QueryError>> + Send + 'static,
{
    async fn call(&self, variables: Arc<V>, ctx: MutationFnContext) -> Result<T, QueryError> {
        (self.0)(variables, ctx).await
    }
}

type HookResult<R> = BoxFuture<'static, Result<R, QueryError>>;
type OnMutate<V, C> = Arc<dyn Fn(Arc<V>) -> HookResult<C> + Send + Sync>;
type OnSuccess<T, V, C> = Arc<dyn Fn(Arc<T>, Arc<V>, Option<Arc<C>>) -> HookResult<()> + Send + Sync>;
type OnError<V, C> = Arc<dyn Fn(QueryError, Arc<V>, Option<Arc<C>>) -> HookResult<()> + Send + Sync>;
type OnSettled<T, V, C> = Arc<
    dyn Fn(Option<Arc<T>>, Option<QueryError>, Arc<V>, Option<Arc<C>>) -> HookResult<()>
        + Send
        + Sync,
>;

/// Options for a mutation: the write, its hooks and its retry settings.
///
/// `T` is the result, `V` the variables and `C` the value `on_mutate`
/// returns (typically a rollback snapshot).
///
/// # Example
///
/// ```ignore
/// let options = MutationOptions::<Todo, NewTodo, Vec<Todo>>::new()
///     .mutation_fn(|todo, _ctx| async move { api::create(&todo).await.map_err(Into::into) })
///     .on_mutate(move |todo| { /* optimistic write, return snapshot */ })
///     .on_error(move |_err, _todo, snapshot| { /* roll back */ });
/// ```
pub struct MutationOptions<T, V, C = ()> {
    pub(crate) mutation_key: Option<QueryKey>,
    pub(crate) mutation_fn: Option<Arc<dyn MutationFunction<T, V>>>,
    pub(crate) on_mutate: Option<OnMutate<V, C>>,
    pub(crate) on_success: Option<OnSuccess<T, V, C>>,
    pub(crate) on_error: Option<OnError<V, C>>,
    pub(crate) on_settled: Option<OnSettled<T, V, C>>,
    pub(crate) config: MutationConfig,
    pub(crate) meta: Arc<Meta>,
}

impl<T, V, C> Clone for MutationOptions<T, V, C> {
    fn clone(&self) -> Self {
        Self {
            mutation_key: self.mutation_key.clone(),
            mutation_fn: self.mutation_fn.clone(),
            on_mutate: self.on_mutate.clone(),
            on_success: self.on_success.clone(),
            on_error: self.on_error.clone(),
            on_settled: self.on_settled.clone(),
            config: self.config.clone(),
            meta: self.meta.clone(),
        }
    }
}

impl<T, V, C> fmt::Debug for MutationOptions<T, V, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutationOptions")
            .field("mutation_key", &self.mutation_key)
            .field("has_mutation_fn", &self.mutation_fn.is_some())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<T, V, C> Default for MutationOptions<T, V, C>
where
    T: Send + Sync + 'static,
    V: Send + Sync + 'static,
    C: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, V, C> MutationOptions<T, V, C>
where
    T: Send + Sync + 'static,
    V: Send + Sync + 'static,
    C: Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            mutation_key: None,
            mutation_fn: None,
            on_mutate: None,
            on_success: None,
            on_error: None,
            on_settled: None,
            config: MutationConfig::default(),
            meta: Arc::new(Meta::new()),
        }
    }

    pub fn mutation_key(mut self, key: impl Into<QueryKey>) -> Self {
        self.mutation_key = Some(key.into());
        self
    }

    pub fn mutation_fn<F, Fut>(self, f: F) -> Self
    where
        F: Fn(Arc<V>, MutationFnContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, QueryError>> + Send + 'static,
    {
        self.mutation_function(FnMutation(f))
    }

    pub fn mutation_function(mut self, f: impl MutationFunction<T, V>) -> Self {
        self.mutation_fn = Some(Arc::new(f));
        self
    }

    /// Runs before the write; its value is passed to every later hook.
    pub fn on_mutate<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Arc<V>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<C, QueryError>> + Send + 'static,
    {
        self.on_mutate = Some(Arc::new(move |variables: Arc<V>| f(variables).boxed()));
        self
    }

    pub fn on_success<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Arc<T>, Arc<V>, Option<Arc<C>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), QueryError>> + Send + 'static,
    {
        self.on_success = Some(Arc::new(
            move |data: Arc<T>, variables: Arc<V>, context: Option<Arc<C>>| {
                f(data, variables, context).boxed()
            },
        ));
        self
    }

    pub fn on_error<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(QueryError, Arc<V>, Option<Arc<C>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), QueryError>> + Send + 'static,
    {
        self.on_error = Some(Arc::new(
            move |error: QueryError, variables: Arc<V>, context: Option<Arc<C>>| {
                f(error, variables, context).boxed()
            },
        ));
        self
    }

    pub fn on_settled<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Option<Arc<T>>, Option<QueryError>, Arc<V>, Option<Arc<C>>) -> Fut
            + Send
            + Sync
            + 'static,
        Fut: Future<Output = Result<(), QueryError>> + Send + 'static,
    {
        self.on_settled = Some(Arc::new(
            move |data: Option<Arc<T>>,
                  error: Option<QueryError>,
                  variables: Arc<V>,
                  context: Option<Arc<C>>| {
                f(data, error, variables, context).boxed()
            },
        ));
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.config.retry = Some(retry);
        self
    }

    pub fn gc_time(mut self, gc_time: impl Into<GcTime>) -> Self {
        self.config.gc_time = Some(gc_time.into());
        self
    }

    pub fn network_mode(mut self, mode: NetworkMode) -> Self {
        self.config.network_mode = Some(mode);
        self
    }

    pub fn meta(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        Arc::make_mut(&mut self.meta).insert(key.into(), value);
        self
    }

    pub fn key(&self) -> Option<&QueryKey> {
        self.mutation_key.as_ref()
    }

    pub fn config(&self) -> &MutationConfig {
        &self.config
    }

    pub(crate) fn with_defaults(mut self, defaults: &MutationConfig) -> Self {
        self.config = defaults.merge(&self.config);
        self
    }
}

/// What a mutation needs from the observers attached to it.
pub(crate) trait MutationListener<T, V, C>: Send + Sync + 'static {
    fn on_mutation_update(&self, mutation_id: u64, state: &MutationState<T, V, C>);
}

fn same_listener<T, V, C>(
    a: &Arc<dyn MutationListener<T, V, C>>,
    b: &Arc<dyn MutationListener<T, V, C>>,
) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

struct MutationInner<T, V, C> {
    options: MutationOptions<T, V, C>,
    state: MutationState<T, V, C>,
    observers: Vec<Arc<dyn MutationListener<T, V, C>>>,
}

/// One write and its state.
///
/// Built by [`MutationCache::build`](crate::MutationCache::build); every
/// [`MutationObserver::mutate`](crate::MutationObserver::mutate) call builds a
/// fresh one. Eviction is deferred while the mutation is pending.
pub struct Mutation<T, V, C = ()> {
    id: u64,
    mutation_key: Option<QueryKey>,
    cache: Weak<MutationCacheShared>,
    inner: Mutex<MutationInner<T, V, C>>,
    gc: GcTimer,
}

impl<T, V, C> fmt::Debug for Mutation<T, V, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Mutation")
            .field("id", &self.id)
            .field("mutation_key", &self.mutation_key)
            .field("status", &inner.state.status)
            .field("observers", &inner.observers.len())
            .finish()
    }
}

impl<T, V, C> Mutation<T, V, C>
where
    T: Send + Sync + 'static,
    V: Send + Sync + 'static,
    C: Send + Sync + 'static,
{
    pub(crate) fn new(
        id: u64,
        options: MutationOptions<T, V, C>,
        cache: Weak<MutationCacheShared>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            mutation_key: options.mutation_key.clone(),
            cache,
            gc: GcTimer::new(options.config.gc_time_or_default()),
            inner: Mutex::new(MutationInner {
                options,
                state: MutationState::default(),
                observers: Vec::new(),
            }),
        })
    }

    pub fn mutation_id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> MutationState<T, V, C> {
        self.inner.lock().state.clone()
    }

    pub fn options(&self) -> MutationOptions<T, V, C> {
        self.inner.lock().options.clone()
    }

    pub(crate) fn set_options(&self, options: MutationOptions<T, V, C>) {
        let gc_time = options.config.gc_time_or_default();
        self.inner.lock().options = options;
        self.gc.update_gc_time(gc_time);
    }

    /// Run the mutation with `variables`.
    ///
    /// The run happens on its own task, so dropping the returned future does
    /// not abandon a write halfway through its hooks.
    pub fn execute(
        self: &Arc<Self>,
        variables: V,
    ) -> impl Future<Output = Result<Arc<T>, QueryError>> + Send + 'static {
        let spawned = Handle::try_current()
            .map(|handle| handle.spawn(self.clone().run(Arc::new(variables))))
            .map_err(|_| QueryError::NoRuntime);
        async move {
            spawned?.await.unwrap_or_else(|e| {
                Err(QueryError::TaskFailed {
                    message: e.to_string(),
                })
            })
        }
    }

    async fn run(self: Arc<Self>, variables: Arc<V>) -> Result<Arc<T>, QueryError> {
        let cache = self.cache.upgrade();
        let tracer = cache
            .as_ref()
            .map(|c| c.tracer())
            .unwrap_or_else(MutationCacheShared::noop_tracer);
        let online = cache.as_ref().map(|c| c.online().clone()).unwrap_or_default();
        let client = cache.as_ref().and_then(|c| c.client());
        drop(cache);

        let options = self.options();
        let span_id = tracer.new_span_id();
        tracer.on_mutation_start(span_id, self.id);
        tracing::debug!(mutation_id = self.id, "mutation started");
        self.dispatch(MutationAction::Pending {
            variables: variables.clone(),
            submitted_at: Instant::now(),
        });

        let mut context = None;
        let mut outcome = match &options.on_mutate {
            Some(on_mutate) => match on_mutate(variables.clone()).await {
                Ok(value) => {
                    context = Some(Arc::new(value));
                    self.dispatch(MutationAction::Context(context.clone()));
                    Ok(())
                }
                Err(error) => Err(error),
            },
            None => Ok(()),
        };

        let mut data = None;
        if outcome.is_ok() {
            outcome = match self
                .perform(&options, &variables, client, online)
                .await
            {
                Ok(value) => {
                    data = Some(value);
                    Ok(())
                }
                Err(error) => Err(error),
            };
        }

        if let (Ok(()), Some(value)) = (&outcome, &data) {
            outcome = self
                .success_hooks(&options, value.clone(), &variables, &context)
                .await;
        }

        let result = match (outcome, data) {
            (Ok(()), Some(data)) => {
                self.dispatch(MutationAction::Success { data: data.clone() });
                tracing::debug!(mutation_id = self.id, "mutation succeeded");
                tracer.on_mutation_end(span_id, self.id, MutationOutcome::Success);
                Ok(data)
            }
            (outcome, _) => {
                let error = match outcome {
                    Err(error) => error,
                    Ok(()) => QueryError::MissingMutationFn,
                };
                self.error_hooks(&options, &error, &variables, &context)
                    .await;
                self.dispatch(MutationAction::Error {
                    error: error.clone(),
                });
                tracing::debug!(mutation_id = self.id, %error, "mutation failed");
                tracer.on_mutation_end(
                    span_id,
                    self.id,
                    MutationOutcome::Error {
                        message: error.to_string(),
                    },
                );
                Err(error)
            }
        };

        if self.inner.lock().observers.is_empty() {
            self.schedule_gc();
        }
        result
    }

    async fn perform(
        self: &Arc<Self>,
        options: &MutationOptions<T, V, C>,
        variables: &Arc<V>,
        client: Option<QueryClient>,
        online: OnlineManager,
    ) -> Result<Arc<T>, QueryError> {
        let Some(mutation_fn) = options.mutation_fn.clone() else {
            return Err(QueryError::MissingMutationFn);
        };
        let ctx = MutationFnContext {
            client,
            meta: options.meta.clone(),
            mutation_key: self.mutation_key.clone(),
        };
        let events = MutationEvents { mutation: self };
        let signal = CancelSignal::new();
        retryer::run(
            || {
                let mutation_fn = mutation_fn.clone();
                let variables = variables.clone();
                let ctx = ctx.clone();
                async move { mutation_fn.call(variables, ctx).await }
            },
            &options.config.retry_or_default(),
            &signal,
            options.config.network_mode_or_default(),
            &online,
            &events,
        )
        .await
        .map(Arc::new)
    }

    async fn success_hooks(
        &self,
        options: &MutationOptions<T, V, C>,
        data: Arc<T>,
        variables: &Arc<V>,
        context: &Option<Arc<C>>,
    ) -> Result<(), QueryError> {
        if let Some(on_success) = &options.on_success {
            on_success(data.clone(), variables.clone(), context.clone()).await?;
        }
        if let Some(on_settled) = &options.on_settled {
            on_settled(Some(data), None, variables.clone(), context.clone()).await?;
        }
        Ok(())
    }

    async fn error_hooks(
        &self,
        options: &MutationOptions<T, V, C>,
        error: &QueryError,
        variables: &Arc<V>,
        context: &Option<Arc<C>>,
    ) {
        if let Some(on_error) = &options.on_error {
            if let Err(hook_error) =
                on_error(error.clone(), variables.clone(), context.clone()).await
            {
                tracing::warn!(mutation_id = self.id, error = %hook_error, "on_error hook failed");
            }
        }
        if let Some(on_settled) = &options.on_settled {
            if let Err(hook_error) = on_settled(
                None,
                Some(error.clone()),
                variables.clone(),
                context.clone(),
            )
            .await
            {
                tracing::warn!(mutation_id = self.id, error = %hook_error, "on_settled hook failed");
            }
        }
    }

    fn dispatch(&self, action: MutationAction<T, V, C>) {
        let name = action.name();
        let (state, observers) = {
            let mut inner = self.inner.lock();
            reduce(&mut inner.state, action);
            (inner.state.clone(), inner.observers.clone())
        };
        for observer in &observers {
            observer.on_mutation_update(self.id, &state);
        }
        if let Some(cache) = self.cache.upgrade() {
            cache.emit(MutationCacheEvent::Updated {
                mutation_id: self.id,
                action: name,
            });
        }
    }

    pub(crate) fn add_observer(&self, observer: Arc<dyn MutationListener<T, V, C>>) {
        {
            let mut inner = self.inner.lock();
            if inner.observers.iter().any(|o| same_listener(o, &observer)) {
                return;
            }
            inner.observers.push(observer);
        }
        self.gc.clear();
    }

    pub(crate) fn remove_observer(
        self: &Arc<Self>,
        observer: &Arc<dyn MutationListener<T, V, C>>,
    ) {
        let now_empty = {
            let mut inner = self.inner.lock();
            let before = inner.observers.len();
            inner.observers.retain(|o| !same_listener(o, observer));
            before != inner.observers.len() && inner.observers.is_empty()
        };
        if now_empty {
            self.schedule_gc();
        }
    }

    pub(crate) fn schedule_gc(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        self.gc.schedule(move || {
            if let Some(mutation) = weak.upgrade() {
                mutation.optional_remove();
            }
        });
    }

    /// Remove from the cache when unobserved; a pending write is rescheduled.
    fn optional_remove(self: &Arc<Self>) {
        let (unobserved, pending) = {
            let inner = self.inner.lock();
            (
                inner.observers.is_empty(),
                inner.state.status == MutationStatus::Pending,
            )
        };
        if !unobserved {
            return;
        }
        if pending {
            tracing::trace!(mutation_id = self.id, "mutation pending, eviction deferred");
            self.schedule_gc();
            return;
        }
        if let Some(cache) = self.cache.upgrade() {
            if cache.remove_mutation(self.id) {
                tracing::debug!(mutation_id = self.id, "mutation evicted");
            }
        }
    }
}

struct MutationEvents<'a, T, V, C> {
    mutation: &'a Arc<Mutation<T, V, C>>,
}

impl<T, V, C> RetryEvents for MutationEvents<'_, T, V, C>
where
    T: Send + Sync + 'static,
    V: Send + Sync + 'static,
    C: Send + Sync + 'static,
{
    fn on_fail(&self, failure_count: u32, error: &QueryError, delay: Duration) {
        tracing::trace!(mutation_id = self.mutation.id, failure_count, ?delay, %error, "mutation attempt failed, retrying");
        self.mutation.dispatch(MutationAction::Failed {
            failure_count,
            error: error.clone(),
        });
    }

    fn on_pause(&self) {
        self.mutation.dispatch(MutationAction::Pause);
    }

    fn on_continue(&self) {
        self.mutation.dispatch(MutationAction::Continue);
    }
}

/// Type-erased view of a [`Mutation`], used by filters and the cache.
pub trait AnyMutation: Send + Sync + 'static {
    fn mutation_id(&self) -> u64;
    fn mutation_key(&self) -> Option<&QueryKey>;
    fn status(&self) -> MutationStatus;
    fn is_paused(&self) -> bool;
    fn submitted_at(&self) -> Option<Instant>;
    fn observer_count(&self) -> usize;
    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
    /// Stop the eviction timer before removal from the cache.
    fn destroy(&self);
}

impl<T, V, C> AnyMutation for Mutation<T, V, C>
where
    T: Send + Sync + 'static,
    V: Send + Sync + 'static,
    C: Send + Sync + 'static,
{
    fn mutation_id(&self) -> u64 {
        self.id
    }

    fn mutation_key(&self) -> Option<&QueryKey> {
        self.mutation_key.as_ref()
    }

    fn status(&self) -> MutationStatus {
        self.inner.lock().state.status
    }

    fn is_paused(&self) -> bool {
        self.inner.lock().state.is_paused
    }

    fn submitted_at(&self) -> Option<Instant> {
        self.inner.lock().state.submitted_at
    }

    fn observer_count(&self) -> usize {
        self.inner.lock().observers.len()
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    fn destroy(&self) {
        self.gc.clear();
    }
}
