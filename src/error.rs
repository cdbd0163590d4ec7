//! Error types for fetches and mutations.

use std::fmt;
use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::Arc;

/// How an in-flight fetch should be cancelled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct CancelOptions {
    /// Restore the state the entity had before the cancelled fetch started.
    pub revert: bool,
    /// Do not surface the cancellation as an error.
    pub silent: bool,
}

impl CancelOptions {
    /// Cancel and restore the pre-fetch state.
    pub fn revert() -> Self {
        Self {
            revert: true,
            silent: false,
        }
    }

    /// Cancel without committing an error.
    pub fn silent() -> Self {
        Self {
            revert: false,
            silent: true,
        }
    }
}

/// Errors produced by fetches and mutations.
///
/// Application errors can be propagated from fetch functions using the `?` operator,
/// which converts any `Into<anyhow::Error>` type into `QueryError::UserError`.
#[derive(Debug, Clone)]
pub enum QueryError {
    /// Error returned by a fetch or mutation function.
    ///
    /// This is the only retryable variant. Once the retry policy gives up,
    /// the last `UserError` is what gets committed and returned.
    UserError(Arc<anyhow::Error>),

    /// The fetch was cancelled before it could commit a result.
    Cancelled(CancelOptions),

    /// The query has no fetch function configured.
    MissingQueryFn {
        /// Display form of the query key.
        key: String,
    },

    /// The mutation has no mutation function configured.
    MissingMutationFn,

    /// A key was accessed with a data type different from the one it was created with.
    TypeMismatch {
        /// Display form of the query key.
        key: String,
        /// Type name that was requested.
        expected: &'static str,
    },

    /// A fetch was started outside of a tokio runtime.
    NoRuntime,

    /// The task driving a fetch or mutation failed to complete.
    TaskFailed {
        /// Description of the failure.
        message: String,
    },
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryError::UserError(e) => write!(f, "user error: {}", e),
            QueryError::Cancelled(options) => {
                write!(f, "query cancelled")?;
                if options.revert {
                    write!(f, " (revert)")?;
                }
                if options.silent {
                    write!(f, " (silent)")?;
                }
                Ok(())
            }
            QueryError::MissingQueryFn { key } => {
                write!(f, "missing query function for {}", key)
            }
            QueryError::MissingMutationFn => write!(f, "missing mutation function"),
            QueryError::TypeMismatch { key, expected } => {
                write!(f, "query {} is not of type {}", key, expected)
            }
            QueryError::NoRuntime => write!(f, "no tokio runtime available to run the fetch"),
            QueryError::TaskFailed { message } => write!(f, "fetch task failed: {}", message),
        }
    }
}

impl<T: Into<anyhow::Error>> From<T> for QueryError {
    fn from(err: T) -> Self {
        QueryError::UserError(Arc::new(err.into()))
    }
}

impl QueryError {
    /// Returns `true` if this is a cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, QueryError::Cancelled(_))
    }

    /// Returns `true` if the retry engine may try again after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, QueryError::UserError(_))
    }

    /// Returns a reference to the inner user error if this is a `UserError` variant.
    pub fn user_error(&self) -> Option<&Arc<anyhow::Error>> {
        match self {
            QueryError::UserError(e) => Some(e),
            _ => None,
        }
    }

    /// Attempts to downcast the user error to a specific type.
    ///
    /// Returns `Some(&E)` if this is a `UserError` containing an error of type `E`,
    /// otherwise returns `None`.
    pub fn downcast_ref<E: std::error::Error + Send + Sync + 'static>(&self) -> Option<&E> {
        self.user_error().and_then(|e| e.downcast_ref::<E>())
    }

    /// Returns `true` if this is a `UserError` containing an error of type `E`.
    pub fn is<E: std::error::Error + Send + Sync + 'static>(&self) -> bool {
        self.downcast_ref::<E>().is_some()
    }
}

/// A typed wrapper around a user error that provides `Deref` access to the inner error type.
#[derive(Clone)]
pub struct TypedErr<E> {
    arc: Arc<anyhow::Error>,
    _marker: PhantomData<E>,
}

impl<E: std::error::Error + Send + Sync + 'static> TypedErr<E> {
    fn new(arc: Arc<anyhow::Error>) -> Result<Self, Arc<anyhow::Error>> {
        if arc.downcast_ref::<E>().is_some() {
            Ok(Self {
                arc,
                _marker: PhantomData,
            })
        } else {
            Err(arc)
        }
    }

    /// Returns a reference to the inner error.
    pub fn get(&self) -> &E {
        match self.arc.downcast_ref::<E>() {
            Some(e) => e,
            // The type was checked in `new` and the Arc is never replaced.
            None => unreachable!("TypedErr holds an error of a different type"),
        }
    }
}

impl<E: std::error::Error + Send + Sync + 'static> Deref for TypedErr<E> {
    type Target = E;

    fn deref(&self) -> &E {
        self.get()
    }
}

impl<E: std::error::Error + Send + Sync + 'static> fmt::Debug for TypedErr<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.get(), f)
    }
}

impl<E: std::error::Error + Send + Sync + 'static> fmt::Display for TypedErr<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self.get(), f)
    }
}

/// Extension trait for fetch results that provides ergonomic error downcasting.
///
/// # Example
///
/// ```ignore
/// use query_sync::QueryResultExt;
///
/// match client.fetch_query(options).await.downcast_err::<HttpError>()? {
///     Ok(user) => println!("{:?}", user),
///     Err(http) => println!("status {}", http.status),
/// }
/// ```
pub trait QueryResultExt<T> {
    /// Attempts to downcast a `UserError` to a specific error type.
    ///
    /// - `Ok(Ok(value))` - the fetch succeeded
    /// - `Ok(Err(typed_err))` - the fetch failed with a `UserError` of type `E`
    /// - `Err(query_error)` - any other error, including user errors of other types
    fn downcast_err<E: std::error::Error + Send + Sync + 'static>(
        self,
    ) -> Result<Result<Arc<T>, TypedErr<E>>, QueryError>;
}

impl<T> QueryResultExt<T> for Result<Arc<T>, QueryError> {
    fn downcast_err<E: std::error::Error + Send + Sync + 'static>(
        self,
    ) -> Result<Result<Arc<T>, TypedErr<E>>, QueryError> {
        match self {
            Ok(value) => Ok(Ok(value)),
            Err(QueryError::UserError(arc)) => match TypedErr::new(arc) {
                Ok(typed) => Ok(Err(typed)),
                Err(arc) => Err(QueryError::UserError(arc)),
            },
            Err(other) => Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct NotFound;

    impl fmt::Display for NotFound {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("not found")
        }
    }

    impl std::error::Error for NotFound {}

    #[test]
    fn test_question_mark_conversion() {
        fn parse(input: &str) -> Result<i32, QueryError> {
            Ok(input.parse::<i32>()?)
        }

        assert_eq!(parse("7").unwrap(), 7);
        let err = parse("x").unwrap_err();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("invalid digit"));
    }

    #[test]
    fn test_downcast_err() {
        let result: Result<Arc<i32>, QueryError> = Err(NotFound.into());
        let typed = result.downcast_err::<NotFound>().unwrap().unwrap_err();
        assert_eq!(typed.to_string(), "not found");

        let other: Result<Arc<i32>, QueryError> = Err(anyhow::anyhow!("boom").into());
        assert!(matches!(
            other.downcast_err::<NotFound>(),
            Err(QueryError::UserError(_))
        ));
    }

    #[test]
    fn test_cancelled_is_not_retryable() {
        let err = QueryError::Cancelled(CancelOptions::revert());
        assert!(err.is_cancelled());
        assert!(!err.is_retryable());
        assert_eq!(err.to_string(), "query cancelled (revert)");
    }
}
