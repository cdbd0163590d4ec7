//! Eviction timer shared by queries and mutations.

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;

use crate::time::GcTime;

struct TimerState {
    gc_time: GcTime,
    pending: Option<AbortHandle>,
}

/// One-shot removal timer whose grace period can only grow.
///
/// Arming replaces any pending timer; [`GcTime::Never`] disarms instead.
pub(crate) struct GcTimer {
    state: Mutex<TimerState>,
}

impl GcTimer {
    pub(crate) fn new(gc_time: GcTime) -> Self {
        Self {
            state: Mutex::new(TimerState {
                gc_time,
                pending: None,
            }),
        }
    }

    pub(crate) fn gc_time(&self) -> GcTime {
        self.state.lock().gc_time
    }

    /// Raise the grace period to `gc_time` if it is longer than the current one.
    pub(crate) fn update_gc_time(&self, gc_time: GcTime) {
        let mut state = self.state.lock();
        state.gc_time = state.gc_time.max(gc_time);
    }

    /// Arm the timer to run `on_expire` after the current grace period.
    ///
    /// Outside of a tokio runtime nothing is armed; the entry stays until
    /// removed explicitly.
    pub(crate) fn schedule<F>(&self, on_expire: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.state.lock();
        if let Some(pending) = state.pending.take() {
            pending.abort();
        }
        let GcTime::Duration(grace) = state.gc_time else {
            return;
        };
        match Handle::try_current() {
            Ok(handle) => {
                let task = handle.spawn(async move {
                    tokio::time::sleep(grace).await;
                    on_expire();
                });
                state.pending = Some(task.abort_handle());
            }
            Err(_) => {
                tracing::debug!("no tokio runtime, eviction timer not armed");
            }
        }
    }

    pub(crate) fn clear(&self) {
        if let Some(pending) = self.state.lock().pending.take() {
            pending.abort();
        }
    }
}

impl Drop for GcTimer {
    fn drop(&mut self) {
        if let Some(pending) = self.state.get_mut().pending.take() {
            pending.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn counter() -> (Arc<AtomicUsize>, impl FnOnce() + Send + 'static) {
        let fired = Arc::new(AtomicUsize::new(0));
        let handle = fired.clone();
        (fired, move || {
            handle.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_after_grace_period() {
        let timer = GcTimer::new(GcTime::Duration(Duration::from_secs(10)));
        let (fired, on_expire) = counter();
        timer.schedule(on_expire);

        tokio::time::sleep(Duration::from_secs(9)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_grace_period_only_grows() {
        let timer = GcTimer::new(GcTime::Duration(Duration::from_secs(60)));
        timer.update_gc_time(GcTime::Duration(Duration::from_secs(5)));
        assert_eq!(timer.gc_time(), GcTime::Duration(Duration::from_secs(60)));

        let (fired, on_expire) = counter();
        timer.schedule(on_expire);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_and_never() {
        let timer = GcTimer::new(GcTime::Duration(Duration::from_secs(1)));
        let (fired, on_expire) = counter();
        timer.schedule(on_expire);
        timer.clear();

        let never = GcTimer::new(GcTime::Duration(Duration::from_secs(1)));
        never.update_gc_time(GcTime::Never);
        let (never_fired, on_expire) = counter();
        never.schedule(on_expire);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(never_fired.load(Ordering::SeqCst), 0);
    }
}
