//! Query state and the reducer every transition goes through.

use std::fmt;
use std::sync::Arc;

use tokio::time::Instant;

use crate::error::QueryError;
use crate::options::FetchDirection;

/// Has the query ever produced a value or an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryStatus {
    Pending,
    Error,
    Success,
}

/// Is network activity happening right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchStatus {
    Fetching,
    /// A fetch is waiting for connectivity.
    Paused,
    Idle,
}

/// Snapshot of one query.
///
/// `data` and `error` may both be present: a failed refetch keeps the last
/// good value next to the new error.
pub struct QueryState<T> {
    pub data: Option<Arc<T>>,
    pub data_update_count: u64,
    pub data_updated_at: Option<Instant>,
    pub error: Option<QueryError>,
    pub error_update_count: u64,
    pub error_updated_at: Option<Instant>,
    pub fetch_failure_count: u32,
    pub fetch_failure_reason: Option<QueryError>,
    pub fetch_direction: Option<FetchDirection>,
    pub is_invalidated: bool,
    pub status: QueryStatus,
    pub fetch_status: FetchStatus,
}

impl<T> Clone for QueryState<T> {
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
            data_update_count: self.data_update_count,
            data_updated_at: self.data_updated_at,
            error: self.error.clone(),
            error_update_count: self.error_update_count,
            error_updated_at: self.error_updated_at,
            fetch_failure_count: self.fetch_failure_count,
            fetch_failure_reason: self.fetch_failure_reason.clone(),
            fetch_direction: self.fetch_direction,
            is_invalidated: self.is_invalidated,
            status: self.status,
            fetch_status: self.fetch_status,
        }
    }
}

impl<T> fmt::Debug for QueryState<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryState")
            .field("has_data", &self.data.is_some())
            .field("data_update_count", &self.data_update_count)
            .field("data_updated_at", &self.data_updated_at)
            .field("error", &self.error)
            .field("error_update_count", &self.error_update_count)
            .field("fetch_failure_count", &self.fetch_failure_count)
            .field("is_invalidated", &self.is_invalidated)
            .field("status", &self.status)
            .field("fetch_status", &self.fetch_status)
            .finish()
    }
}

impl<T> QueryState<T> {
    /// State of a freshly built query, seeded with `initial_data` if given.
    pub fn initial(initial_data: Option<Arc<T>>, now: Instant) -> Self {
        let has_data = initial_data.is_some();
        Self {
            data: initial_data,
            data_update_count: 0,
            data_updated_at: has_data.then_some(now),
            error: None,
            error_update_count: 0,
            error_updated_at: None,
            fetch_failure_count: 0,
            fetch_failure_reason: None,
            fetch_direction: None,
            is_invalidated: false,
            status: if has_data {
                QueryStatus::Success
            } else {
                QueryStatus::Pending
            },
            fetch_status: FetchStatus::Idle,
        }
    }

    pub fn is_fetching(&self) -> bool {
        self.fetch_status != FetchStatus::Idle
    }
}

/// One state transition.
pub(crate) enum Action<T> {
    Fetch {
        paused: bool,
        direction: Option<FetchDirection>,
    },
    Failed {
        failure_count: u32,
        error: QueryError,
    },
    Pause,
    Continue,
    Success {
        data: Arc<T>,
        updated_at: Instant,
        /// Written through `set_data` rather than produced by a fetch.
        manual: bool,
    },
    Error {
        error: QueryError,
        now: Instant,
    },
    Invalidate,
    SetState(QueryState<T>),
}

impl<T> Action<T> {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Action::Fetch { .. } => "fetch",
            Action::Failed { .. } => "failed",
            Action::Pause => "pause",
            Action::Continue => "continue",
            Action::Success { .. } => "success",
            Action::Error { .. } => "error",
            Action::Invalidate => "invalidate",
            Action::SetState(_) => "set_state",
        }
    }
}

/// Apply `action` to `state`.
pub(crate) fn reduce<T>(state: &mut QueryState<T>, action: Action<T>) {
    match action {
        Action::Fetch { paused, direction } => {
            state.fetch_failure_count = 0;
            state.fetch_failure_reason = None;
            state.fetch_direction = direction;
            state.fetch_status = if paused {
                FetchStatus::Paused
            } else {
                FetchStatus::Fetching
            };
            if state.data_updated_at.is_none() {
                state.error = None;
            }
        }
        Action::Failed {
            failure_count,
            error,
        } => {
            state.fetch_failure_count = failure_count;
            state.fetch_failure_reason = Some(error);
        }
        Action::Pause => state.fetch_status = FetchStatus::Paused,
        Action::Continue => state.fetch_status = FetchStatus::Fetching,
        Action::Success {
            data,
            updated_at,
            manual,
        } => {
            state.data = Some(data);
            state.data_update_count += 1;
            state.data_updated_at = Some(updated_at);
            state.error = None;
            state.is_invalidated = false;
            state.status = QueryStatus::Success;
            if !manual {
                state.fetch_status = FetchStatus::Idle;
                state.fetch_failure_count = 0;
                state.fetch_failure_reason = None;
                state.fetch_direction = None;
            }
        }
        Action::Error { error, now } => {
            state.error = Some(error.clone());
            state.error_update_count += 1;
            state.error_updated_at = Some(now);
            state.fetch_failure_count += 1;
            state.fetch_failure_reason = Some(error);
            state.fetch_status = FetchStatus::Idle;
            state.fetch_direction = None;
            state.status = QueryStatus::Error;
        }
        Action::Invalidate => state.is_invalidated = true,
        Action::SetState(next) => *state = next,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn err(msg: &'static str) -> QueryError {
        anyhow::anyhow!(msg).into()
    }

    #[test]
    fn test_success_clears_failures_and_invalidation() {
        let now = Instant::now();
        let mut state = QueryState::<u32>::initial(None, now);
        reduce(&mut state, Action::Invalidate);
        reduce(&mut state, Action::Fetch { paused: false, direction: None });
        reduce(
            &mut state,
            Action::Failed {
                failure_count: 2,
                error: err("flaky"),
            },
        );
        assert_eq!(state.fetch_failure_count, 2);
        assert_eq!(state.fetch_status, FetchStatus::Fetching);

        reduce(
            &mut state,
            Action::Success {
                data: Arc::new(7),
                updated_at: now,
                manual: false,
            },
        );
        assert_eq!(state.status, QueryStatus::Success);
        assert_eq!(state.fetch_status, FetchStatus::Idle);
        assert_eq!(state.fetch_failure_count, 0);
        assert_eq!(state.data_update_count, 1);
        assert!(!state.is_invalidated);
    }

    #[test]
    fn test_error_keeps_previous_data() {
        let now = Instant::now();
        let mut state = QueryState::initial(Some(Arc::new(1u32)), now);
        assert_eq!(state.status, QueryStatus::Success);

        reduce(&mut state, Action::Fetch { paused: false, direction: None });
        reduce(&mut state, Action::Error { error: err("down"), now });

        assert_eq!(state.status, QueryStatus::Error);
        assert_eq!(state.data.as_deref(), Some(&1));
        assert_eq!(state.error_update_count, 1);
        assert_eq!(state.fetch_failure_count, 1);
        assert_eq!(state.fetch_status, FetchStatus::Idle);
    }

    #[test]
    fn test_manual_success_leaves_fetch_status() {
        let now = Instant::now();
        let mut state = QueryState::<u32>::initial(None, now);
        reduce(&mut state, Action::Fetch { paused: true, direction: None });
        reduce(
            &mut state,
            Action::Success {
                data: Arc::new(3),
                updated_at: now,
                manual: true,
            },
        );
        assert_eq!(state.fetch_status, FetchStatus::Paused);
        assert_eq!(state.status, QueryStatus::Success);
    }
}
