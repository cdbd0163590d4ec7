//! Cooperative cancellation shared between a fetch and whoever may abort it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::{CancelOptions, QueryError};

struct SignalInner {
    token: CancellationToken,
    options: Mutex<Option<CancelOptions>>,
    consumed: AtomicBool,
    retry_cancelled: AtomicBool,
}

/// Cancellation handle for one fetch attempt.
///
/// The fetch function receives a clone through its context and may await
/// [`CancelSignal::cancelled`] to stop early. Reading the signal from the
/// context marks it consumed, which lets the entity abort the fetch when its
/// last observer goes away.
#[derive(Clone)]
pub struct CancelSignal {
    inner: Arc<SignalInner>,
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelSignal {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SignalInner {
                token: CancellationToken::new(),
                options: Mutex::new(None),
                consumed: AtomicBool::new(false),
                retry_cancelled: AtomicBool::new(false),
            }),
        }
    }

    /// Request cancellation. The first request wins; later calls are no-ops.
    pub fn cancel(&self, options: CancelOptions) {
        {
            let mut slot = self.inner.options.lock();
            if slot.is_some() {
                return;
            }
            *slot = Some(options);
        }
        self.inner.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// Completes once cancellation has been requested.
    pub async fn cancelled(&self) {
        self.inner.token.cancelled().await
    }

    /// Options of the winning cancel request, if any.
    pub fn options(&self) -> Option<CancelOptions> {
        *self.inner.options.lock()
    }

    /// The error a cancelled fetch resolves with.
    pub fn error(&self) -> QueryError {
        QueryError::Cancelled(self.options().unwrap_or_default())
    }

    pub(crate) fn mark_consumed(&self) {
        self.inner.consumed.store(true, Ordering::Release);
    }

    /// Returns `true` if the fetch function has read this signal.
    pub fn was_consumed(&self) -> bool {
        self.inner.consumed.load(Ordering::Acquire)
    }

    /// Stop retrying after the current attempt without aborting it.
    pub fn cancel_retry(&self) {
        self.inner.retry_cancelled.store(true, Ordering::Release);
    }

    pub fn is_retry_cancelled(&self) -> bool {
        self.inner.retry_cancelled.load(Ordering::Acquire)
    }

    /// The underlying token, for code that already speaks `tokio_util`.
    pub fn token(&self) -> &CancellationToken {
        &self.inner.token
    }
}

impl std::fmt::Debug for CancelSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelSignal")
            .field("cancelled", &self.is_cancelled())
            .field("options", &self.options())
            .field("consumed", &self.was_consumed())
            .finish()
    }
}
