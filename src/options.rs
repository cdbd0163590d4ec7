//! Query and mutation options, and the layered merge that resolves them.
//!
//! Every layered setting is an `Option`. Layers combine with
//! [`QueryConfig::merge`] ("last non-null wins"), lowest precedence first:
//!
//! 1. built-in defaults (applied by [`QueryConfig::resolve`])
//! 2. the client's [`DefaultOptions`]
//! 3. per-key-prefix defaults, in registration order
//! 4. options supplied at the call site

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::cancel::CancelSignal;
use crate::client::QueryClient;
use crate::error::QueryError;
use crate::key::QueryKey;
use crate::retryer::{NetworkMode, RetryPolicy};
use crate::time::{GcTime, StaleTime};

/// Opaque metadata passed through to fetch functions.
pub type Meta = BTreeMap<String, serde_json::Value>;

/// When an observer refetches in response to mount, resume or reconnect.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RefetchPolicy {
    Never,
    /// Refetch only when the data is stale.
    #[default]
    IfStale,
    Always,
}

/// Layered query settings. `None` defers to the layer below.
#[derive(Debug, Clone, Default)]
pub struct QueryConfig {
    pub stale_time: Option<StaleTime>,
    pub gc_time: Option<GcTime>,
    pub retry: Option<RetryPolicy>,
    pub network_mode: Option<NetworkMode>,
    pub enabled: Option<bool>,
    pub refetch_on_mount: Option<RefetchPolicy>,
    pub refetch_on_resume: Option<RefetchPolicy>,
    pub refetch_on_reconnect: Option<RefetchPolicy>,
}

/// Query settings with every layer applied.
#[derive(Debug, Clone)]
pub struct ResolvedQueryConfig {
    pub stale_time: StaleTime,
    pub gc_time: GcTime,
    pub retry: RetryPolicy,
    pub network_mode: NetworkMode,
    pub enabled: bool,
    pub refetch_on_mount: RefetchPolicy,
    pub refetch_on_resume: RefetchPolicy,
    pub refetch_on_reconnect: RefetchPolicy,
}

impl QueryConfig {
    /// Combine two layers; every field set in `overrides` wins.
    pub fn merge(&self, overrides: &QueryConfig) -> QueryConfig {
        QueryConfig {
            stale_time: overrides.stale_time.or(self.stale_time),
            gc_time: overrides.gc_time.or(self.gc_time),
            retry: overrides.retry.clone().or_else(|| self.retry.clone()),
            network_mode: overrides.network_mode.or(self.network_mode),
            enabled: overrides.enabled.or(self.enabled),
            refetch_on_mount: overrides.refetch_on_mount.or(self.refetch_on_mount),
            refetch_on_resume: overrides.refetch_on_resume.or(self.refetch_on_resume),
            refetch_on_reconnect: overrides.refetch_on_reconnect.or(self.refetch_on_reconnect),
        }
    }

    /// Fill every unset field with its built-in default.
    pub fn resolve(&self) -> ResolvedQueryConfig {
        ResolvedQueryConfig {
            stale_time: self.stale_time.unwrap_or_default(),
            gc_time: self.gc_time.unwrap_or_default(),
            retry: self.retry.clone().unwrap_or_else(RetryPolicy::default_query),
            network_mode: self.network_mode.unwrap_or_default(),
            enabled: self.enabled.unwrap_or(true),
            refetch_on_mount: self.refetch_on_mount.unwrap_or_default(),
            refetch_on_resume: self.refetch_on_resume.unwrap_or_default(),
            refetch_on_reconnect: self.refetch_on_reconnect.unwrap_or_default(),
        }
    }
}

/// Layered mutation settings.
#[derive(Debug, Clone, Default)]
pub struct MutationConfig {
    pub retry: Option<RetryPolicy>,
    pub gc_time: Option<GcTime>,
    pub network_mode: Option<NetworkMode>,
}

impl MutationConfig {
    pub fn merge(&self, overrides: &MutationConfig) -> MutationConfig {
        MutationConfig {
            retry: overrides.retry.clone().or_else(|| self.retry.clone()),
            gc_time: overrides.gc_time.or(self.gc_time),
            network_mode: overrides.network_mode.or(self.network_mode),
        }
    }

    /// Mutations never retry unless told to.
    pub fn retry_or_default(&self) -> RetryPolicy {
        self.retry.clone().unwrap_or(RetryPolicy::Never)
    }

    pub fn gc_time_or_default(&self) -> GcTime {
        self.gc_time.unwrap_or_default()
    }

    pub fn network_mode_or_default(&self) -> NetworkMode {
        self.network_mode.unwrap_or_default()
    }
}

/// Client-wide defaults, the second layer of the merge.
#[derive(Debug, Clone, Default)]
pub struct DefaultOptions {
    pub queries: QueryConfig,
    pub mutations: MutationConfig,
}

/// Direction of a paginated fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchDirection {
    Forward,
    Backward,
}

/// Everything a fetch function gets to know about the fetch it serves.
#[derive(Clone)]
pub struct QueryFnContext {
    pub(crate) key: QueryKey,
    pub(crate) client: Option<QueryClient>,
    pub(crate) signal: CancelSignal,
    pub(crate) meta: Arc<Meta>,
    pub(crate) direction: Option<FetchDirection>,
}

impl QueryFnContext {
    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    /// The client that owns the cache, if it is still alive.
    pub fn client(&self) -> Option<&QueryClient> {
        self.client.as_ref()
    }

    /// Cancellation signal for this fetch.
    ///
    /// Reading it tells the engine that the fetch function cooperates with
    /// cancellation, so the fetch may be aborted when its last observer leaves.
    pub fn signal(&self) -> &CancelSignal {
        self.signal.mark_consumed();
        &self.signal
    }

    pub fn meta(&self) -> &Meta {
        &self.meta
    }

    /// Set for paginated fetches that load a single page.
    pub fn direction(&self) -> Option<FetchDirection> {
        self.direction
    }
}

impl fmt::Debug for QueryFnContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryFnContext")
            .field("key", &self.key)
            .field("meta", &self.meta)
            .field("direction", &self.direction)
            .finish_non_exhaustive()
    }
}

/// Produces the data for one query.
///
/// Plain async closures are wrapped through [`QueryOptions::query_fn`];
/// implement the trait directly when the fetch needs the currently cached
/// value, as paginated queries do.
#[async_trait]
pub trait QueryFunction<T>: Send + Sync + 'static {
    async fn call(&self, ctx: QueryFnContext, current: Option<Arc<T>>) -> Result<T, QueryError>;
}

struct FnQuery<F>(F);

#[async_trait]
impl<T, F, Fut> QueryFunction<T> for FnQuery<F>
where
    T: Send + Sync + 'static,
    F: Fn(QueryFnContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, QueryError>> + Send + 'static,
{
    async fn call(&self, ctx: QueryFnContext, _current: Option<Arc<T>>) -> Result<T, QueryError> {
        (self.0)(ctx).await
    }
}

/// Value shown by an observer while its query has no data yet.
pub enum PlaceholderData<T> {
    Value(Arc<T>),
    /// Keep showing the data of the previously observed key.
    KeepPrevious,
}

impl<T> Clone for PlaceholderData<T> {
    fn clone(&self) -> Self {
        match self {
            PlaceholderData::Value(v) => PlaceholderData::Value(v.clone()),
            PlaceholderData::KeepPrevious => PlaceholderData::KeepPrevious,
        }
    }
}

impl<T> fmt::Debug for PlaceholderData<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlaceholderData::Value(_) => f.write_str("Value(..)"),
            PlaceholderData::KeepPrevious => f.write_str("KeepPrevious"),
        }
    }
}

/// Options for one query, used by the cache, observers and the client.
///
/// # Example
///
/// ```ignore
/// let options = QueryOptions::new(query_key!["todo", 5])
///     .query_fn(|ctx| async move { api::todo(ctx.key()).await.map_err(Into::into) })
///     .stale_time(StaleTime::Duration(Duration::from_secs(30)));
/// ```
pub struct QueryOptions<T> {
    pub(crate) key: QueryKey,
    pub(crate) query_fn: Option<Arc<dyn QueryFunction<T>>>,
    pub(crate) config: QueryConfig,
    pub(crate) initial_data: Option<Arc<T>>,
    pub(crate) placeholder_data: Option<PlaceholderData<T>>,
    pub(crate) meta: Arc<Meta>,
}

impl<T> Clone for QueryOptions<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            query_fn: self.query_fn.clone(),
            config: self.config.clone(),
            initial_data: self.initial_data.clone(),
            placeholder_data: self.placeholder_data.clone(),
            meta: self.meta.clone(),
        }
    }
}

impl<T> fmt::Debug for QueryOptions<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryOptions")
            .field("key", &self.key)
            .field("has_query_fn", &self.query_fn.is_some())
            .field("config", &self.config)
            .field("placeholder_data", &self.placeholder_data)
            .finish_non_exhaustive()
    }
}

impl<T: Send + Sync + 'static> QueryOptions<T> {
    pub fn new(key: impl Into<QueryKey>) -> Self {
        Self {
            key: key.into(),
            query_fn: None,
            config: QueryConfig::default(),
            initial_data: None,
            placeholder_data: None,
            meta: Arc::new(Meta::new()),
        }
    }

    /// Fetch with an async closure.
    pub fn query_fn<F, Fut>(self, f: F) -> Self
    where
        F: Fn(QueryFnContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, QueryError>> + Send + 'static,
    {
        self.query_function(FnQuery(f))
    }

    /// Fetch with a [`QueryFunction`] implementation.
    pub fn query_function(mut self, f: impl QueryFunction<T>) -> Self {
        self.query_fn = Some(Arc::new(f));
        self
    }

    pub fn stale_time(mut self, stale_time: impl Into<StaleTime>) -> Self {
        self.config.stale_time = Some(stale_time.into());
        self
    }

    pub fn gc_time(mut self, gc_time: impl Into<GcTime>) -> Self {
        self.config.gc_time = Some(gc_time.into());
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.config.retry = Some(retry);
        self
    }

    pub fn network_mode(mut self, mode: NetworkMode) -> Self {
        self.config.network_mode = Some(mode);
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.config.enabled = Some(enabled);
        self
    }

    pub fn refetch_on_mount(mut self, policy: RefetchPolicy) -> Self {
        self.config.refetch_on_mount = Some(policy);
        self
    }

    pub fn refetch_on_resume(mut self, policy: RefetchPolicy) -> Self {
        self.config.refetch_on_resume = Some(policy);
        self
    }

    pub fn refetch_on_reconnect(mut self, policy: RefetchPolicy) -> Self {
        self.config.refetch_on_reconnect = Some(policy);
        self
    }

    /// Seed a newly built query with this value as successful data.
    pub fn initial_data(mut self, data: T) -> Self {
        self.initial_data = Some(Arc::new(data));
        self
    }

    pub fn placeholder_data(mut self, placeholder: PlaceholderData<T>) -> Self {
        self.placeholder_data = Some(placeholder);
        self
    }

    pub fn meta(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        Arc::make_mut(&mut self.meta).insert(key.into(), value);
        self
    }

    /// Apply `config` on top of the settings already present.
    pub fn with_config(mut self, config: &QueryConfig) -> Self {
        self.config = self.config.merge(config);
        self
    }

    /// Put `defaults` underneath the settings already present.
    pub(crate) fn with_defaults(mut self, defaults: &QueryConfig) -> Self {
        self.config = defaults.merge(&self.config);
        self
    }

    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    pub fn config(&self) -> &QueryConfig {
        &self.config
    }

    pub fn resolved(&self) -> ResolvedQueryConfig {
        self.config.resolve()
    }

    pub fn has_query_fn(&self) -> bool {
        self.query_fn.is_some()
    }

    /// Merge `self` (newer) over `base` (older). Unset parts keep the older value.
    pub(crate) fn merged_over(self, base: &QueryOptions<T>) -> QueryOptions<T> {
        QueryOptions {
            key: self.key,
            query_fn: self.query_fn.or_else(|| base.query_fn.clone()),
            config: base.config.merge(&self.config),
            initial_data: self.initial_data.or_else(|| base.initial_data.clone()),
            placeholder_data: self
                .placeholder_data
                .or_else(|| base.placeholder_data.clone()),
            meta: if self.meta.is_empty() {
                base.meta.clone()
            } else {
                self.meta
            },
        }
    }
}

/// Per-call options for [`Query::fetch`](crate::Query::fetch) and refetches.
///
/// Retry policy and network mode set here apply to the fetch this call
/// starts. Unset ones fall back to the query's own options.
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    /// Cancel an in-flight fetch (if the query has data) and start over.
    pub cancel_refetch: bool,
    pub retry: Option<RetryPolicy>,
    pub network_mode: Option<NetworkMode>,
    pub(crate) direction: Option<FetchDirection>,
}

impl FetchOptions {
    pub fn cancel_refetch() -> Self {
        Self {
            cancel_refetch: true,
            ..Self::default()
        }
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn network_mode(mut self, mode: NetworkMode) -> Self {
        self.network_mode = Some(mode);
        self
    }

    /// Run with the retry policy and network mode of `resolved`.
    pub(crate) fn with_resolved(self, resolved: &ResolvedQueryConfig) -> Self {
        Self {
            retry: Some(resolved.retry.clone()),
            network_mode: Some(resolved.network_mode),
            ..self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_merge_last_non_null_wins() {
        let defaults = QueryConfig {
            stale_time: Some(StaleTime::Duration(Duration::from_secs(10))),
            gc_time: Some(GcTime::Never),
            enabled: Some(false),
            ..QueryConfig::default()
        };
        let call_site = QueryConfig {
            stale_time: Some(StaleTime::Infinite),
            enabled: None,
            refetch_on_mount: Some(RefetchPolicy::Always),
            ..QueryConfig::default()
        };

        let merged = defaults.merge(&call_site);
        assert_eq!(merged.stale_time, Some(StaleTime::Infinite));
        assert_eq!(merged.gc_time, Some(GcTime::Never));
        assert_eq!(merged.enabled, Some(false));
        assert_eq!(merged.refetch_on_mount, Some(RefetchPolicy::Always));
        assert_eq!(merged.refetch_on_resume, None);
    }

    #[test]
    fn test_resolve_builtin_defaults() {
        let resolved = QueryConfig::default().resolve();
        assert_eq!(resolved.stale_time, StaleTime::ZERO);
        assert_eq!(resolved.gc_time, GcTime::DEFAULT);
        assert_eq!(resolved.network_mode, NetworkMode::Online);
        assert!(resolved.enabled);
        assert_eq!(resolved.refetch_on_mount, RefetchPolicy::IfStale);
        assert!(matches!(
            resolved.retry,
            RetryPolicy::Exponential { max_retries: 3, .. }
        ));

        let mutation = MutationConfig::default();
        assert!(matches!(mutation.retry_or_default(), RetryPolicy::Never));
        assert_eq!(mutation.gc_time_or_default(), GcTime::DEFAULT);
    }

    #[test]
    fn test_options_merged_over_keeps_older_query_fn() {
        let older = QueryOptions::<u32>::new("n")
            .query_fn(|_| async { Ok(1) })
            .gc_time(GcTime::Never)
            .meta("source", serde_json::json!("list"));
        let newer = QueryOptions::<u32>::new("n").stale_time(StaleTime::Infinite);

        let merged = newer.merged_over(&older);
        assert!(merged.has_query_fn());
        assert_eq!(merged.config.gc_time, Some(GcTime::Never));
        assert_eq!(merged.config.stale_time, Some(StaleTime::Infinite));
        assert_eq!(merged.meta.get("source"), Some(&serde_json::json!("list")));
    }

    #[test]
    fn test_with_defaults_sits_below_call_site() {
        let defaults = QueryConfig {
            stale_time: Some(StaleTime::Infinite),
            retry: Some(RetryPolicy::Never),
            ..QueryConfig::default()
        };
        let options = QueryOptions::<u32>::new("n")
            .stale_time(Duration::from_secs(1))
            .with_defaults(&defaults);

        assert_eq!(
            options.config.stale_time,
            Some(StaleTime::Duration(Duration::from_secs(1)))
        );
        assert!(matches!(options.config.retry, Some(RetryPolicy::Never)));
    }
}
