//! Retry engine.
//!
//! Runs one async operation, consults a [`RetryPolicy`] after each failure and
//! waits out the returned delay before the next attempt. The engine knows
//! nothing about keys or caches; progress is reported through [`RetryEvents`].

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cancel::CancelSignal;
use crate::error::QueryError;
use crate::online::OnlineManager;

/// Resolver signature for [`RetryPolicy::Custom`]: `(failure_count, error) -> delay`.
pub type RetryFn = Arc<dyn Fn(u32, &QueryError) -> Option<Duration> + Send + Sync>;

/// Decides whether and when a failed attempt is retried.
#[derive(Clone)]
pub enum RetryPolicy {
    /// Fail on the first error.
    Never,
    /// Wait `min(base * 2^(n-1), cap)` after the `n`th failure, up to `max_retries` retries.
    Exponential {
        max_retries: u32,
        base: Duration,
        cap: Duration,
    },
    /// Wait a constant delay, up to `max_retries` retries.
    Fixed { max_retries: u32, delay: Duration },
    /// Caller-supplied resolver. `None` stops retrying.
    Custom(RetryFn),
}

impl RetryPolicy {
    pub const DEFAULT_BASE: Duration = Duration::from_secs(1);
    pub const DEFAULT_CAP: Duration = Duration::from_secs(30);

    /// Exponential backoff with the default 1s base and 30s cap.
    pub fn exponential(max_retries: u32) -> Self {
        RetryPolicy::Exponential {
            max_retries,
            base: Self::DEFAULT_BASE,
            cap: Self::DEFAULT_CAP,
        }
    }

    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(u32, &QueryError) -> Option<Duration> + Send + Sync + 'static,
    {
        RetryPolicy::Custom(Arc::new(f))
    }

    /// Default for queries: three retries with exponential backoff.
    pub fn default_query() -> Self {
        Self::exponential(3)
    }

    /// Delay before the next attempt after `failure_count` failures (1-indexed),
    /// or `None` to stop.
    pub fn resolve(&self, failure_count: u32, error: &QueryError) -> Option<Duration> {
        match self {
            RetryPolicy::Never => None,
            RetryPolicy::Exponential {
                max_retries,
                base,
                cap,
            } => {
                if failure_count == 0 || failure_count > *max_retries {
                    return None;
                }
                let delay = 1u32
                    .checked_shl(failure_count - 1)
                    .and_then(|factor| base.checked_mul(factor))
                    .unwrap_or(*cap);
                Some(delay.min(*cap))
            }
            RetryPolicy::Fixed { max_retries, delay } => {
                (failure_count > 0 && failure_count <= *max_retries).then_some(*delay)
            }
            RetryPolicy::Custom(f) => f(failure_count, error),
        }
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryPolicy::Never => f.write_str("Never"),
            RetryPolicy::Exponential {
                max_retries,
                base,
                cap,
            } => f
                .debug_struct("Exponential")
                .field("max_retries", max_retries)
                .field("base", base)
                .field("cap", cap)
                .finish(),
            RetryPolicy::Fixed { max_retries, delay } => f
                .debug_struct("Fixed")
                .field("max_retries", max_retries)
                .field("delay", delay)
                .finish(),
            RetryPolicy::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// When attempts are allowed to run relative to connectivity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NetworkMode {
    /// Only attempt while online; pause otherwise.
    #[default]
    Online,
    /// Never pause.
    Always,
    /// The first attempt always runs; retries pause while offline.
    OfflineFirst,
}

/// Progress callbacks from [`run`].
pub trait RetryEvents: Send + Sync {
    /// An attempt failed and another one is scheduled after `delay`.
    fn on_fail(&self, _failure_count: u32, _error: &QueryError, _delay: Duration) {}
    /// Waiting for connectivity before the next attempt.
    fn on_pause(&self) {}
    /// Connectivity returned; attempts continue.
    fn on_continue(&self) {}
}

impl RetryEvents for () {}

/// Run `attempt` until it succeeds, the policy gives up, or `signal` is cancelled.
///
/// Cancellation interrupts a running attempt, a retry delay and a paused wait
/// alike; the result is then `signal.error()`. A retry cancelled through
/// [`CancelSignal::cancel_retry`] lets the current attempt finish and surfaces
/// its error instead of retrying.
pub async fn run<T, F, Fut>(
    mut attempt: F,
    policy: &RetryPolicy,
    signal: &CancelSignal,
    network_mode: NetworkMode,
    online: &OnlineManager,
    events: &dyn RetryEvents,
) -> Result<T, QueryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, QueryError>>,
{
    let mut failure_count = 0u32;
    loop {
        if signal.is_cancelled() {
            return Err(signal.error());
        }

        let must_wait = match network_mode {
            NetworkMode::Always => false,
            NetworkMode::Online => !online.is_online(),
            NetworkMode::OfflineFirst => failure_count > 0 && !online.is_online(),
        };
        if must_wait {
            events.on_pause();
            tokio::select! {
                biased;
                _ = signal.cancelled() => return Err(signal.error()),
                _ = online.wait_online() => {}
            }
            events.on_continue();
        }

        let result = tokio::select! {
            biased;
            _ = signal.cancelled() => return Err(signal.error()),
            result = attempt() => result,
        };
        let error = match result {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        failure_count += 1;
        if !error.is_retryable() || signal.is_retry_cancelled() {
            return Err(error);
        }
        let Some(delay) = policy.resolve(failure_count, &error) else {
            return Err(error);
        };
        events.on_fail(failure_count, &error, delay);

        tokio::select! {
            biased;
            _ = signal.cancelled() => return Err(signal.error()),
            _ = tokio::time::sleep(delay) => {}
        }
        if signal.is_retry_cancelled() {
            return Err(error);
        }
    }
}
