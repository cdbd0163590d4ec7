#![doc = include_str!("../README.md")]

mod cancel;
mod client;
mod config;
mod error;
mod filters;
mod gc;
mod infinite;
mod key;
mod mutation;
mod mutation_cache;
mod mutation_observer;
mod observer;
mod online;
mod options;
mod query;
mod query_cache;
mod retryer;
mod state;
mod subscription;
mod time;
mod tracer;

pub use cancel::CancelSignal;
pub use client::{QueryClient, QueryClientBuilder, RefetchType};
pub use config::{ClientConfig, ConfigError, MutationDefaultsConfig, QueryDefaultsConfig, RetryConfig};
pub use error::{CancelOptions, QueryError, QueryResultExt, TypedErr};
pub use filters::{MutationFilters, QueryFilters, QueryTypeFilter};
pub use infinite::{
    InfiniteData, InfiniteQueryObserver, InfiniteQueryObserverResult, InfiniteQueryOptions,
};
pub use key::QueryKey;
pub use mutation::{
    AnyMutation, Mutation, MutationFnContext, MutationFunction, MutationOptions, MutationState,
    MutationStatus,
};
pub use mutation_cache::{MutationCache, MutationCacheEvent};
pub use mutation_observer::{MutationObserver, MutationObserverResult};
pub use observer::{QueryObserver, QueryObserverResult};
pub use online::OnlineManager;
pub use options::{
    DefaultOptions, FetchDirection, FetchOptions, Meta, MutationConfig, PlaceholderData,
    QueryConfig, QueryFnContext, QueryFunction, QueryOptions, RefetchPolicy, ResolvedQueryConfig,
};
pub use query::{AnyQuery, Query};
pub use query_cache::{QueryCache, QueryCacheEvent};
pub use retryer::{NetworkMode, RetryFn, RetryPolicy};
pub use state::{FetchStatus, QueryState, QueryStatus};
pub use subscription::Subscription;
pub use time::{GcTime, StaleTime};
pub use tracer::{FetchOutcome, MutationOutcome, NoopTracer, SpanId, Tracer};

/// Re-exported so implementors of [`QueryFunction`] and [`MutationFunction`]
/// can use the same attribute.
pub use async_trait::async_trait;
