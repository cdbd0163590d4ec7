//! Filter vocabulary for bulk cache operations.

use std::fmt;
use std::sync::Arc;

use crate::key::QueryKey;
use crate::mutation::{AnyMutation, MutationStatus};
use crate::query::AnyQuery;
use crate::state::FetchStatus;

/// Which queries to match by observer activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum QueryTypeFilter {
    #[default]
    All,
    /// Queries with at least one enabled observer.
    Active,
    Inactive,
}

type QueryPredicate = Arc<dyn Fn(&dyn AnyQuery) -> bool + Send + Sync>;
type MutationPredicate = Arc<dyn Fn(&dyn AnyMutation) -> bool + Send + Sync>;

/// Selects queries for `find_all` and the client's bulk operations.
///
/// The default filter matches every query.
#[derive(Clone, Default)]
pub struct QueryFilters {
    pub query_key: Option<QueryKey>,
    /// Match `query_key` exactly instead of by prefix.
    pub exact: bool,
    pub predicate: Option<QueryPredicate>,
    /// `None` leaves the choice to the operation: bulk refetches default to
    /// active queries, everything else to all queries.
    pub query_type: Option<QueryTypeFilter>,
    pub stale: Option<bool>,
    pub fetch_status: Option<FetchStatus>,
}

impl QueryFilters {
    pub fn all() -> Self {
        Self::default()
    }

    /// Match every query whose key starts with `prefix`.
    pub fn key(prefix: impl Into<QueryKey>) -> Self {
        Self {
            query_key: Some(prefix.into()),
            ..Self::default()
        }
    }

    /// Match the query with exactly this key.
    pub fn exact(key: impl Into<QueryKey>) -> Self {
        Self {
            query_key: Some(key.into()),
            exact: true,
            ..Self::default()
        }
    }

    pub fn predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&dyn AnyQuery) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    pub fn query_type(mut self, query_type: QueryTypeFilter) -> Self {
        self.query_type = Some(query_type);
        self
    }

    pub fn stale(mut self, stale: bool) -> Self {
        self.stale = Some(stale);
        self
    }

    pub fn fetch_status(mut self, fetch_status: FetchStatus) -> Self {
        self.fetch_status = Some(fetch_status);
        self
    }

    pub fn matches(&self, query: &dyn AnyQuery) -> bool {
        if let Some(key) = &self.query_key {
            if !query.key().matches(key, self.exact) {
                return false;
            }
        }
        match self.query_type.unwrap_or_default() {
            QueryTypeFilter::All => {}
            QueryTypeFilter::Active if !query.is_active() => return false,
            QueryTypeFilter::Inactive if query.is_active() => return false,
            _ => {}
        }
        if let Some(stale) = self.stale {
            if query.is_stale() != stale {
                return false;
            }
        }
        if let Some(fetch_status) = self.fetch_status {
            if query.fetch_status() != fetch_status {
                return false;
            }
        }
        self.predicate
            .as_ref()
            .map_or(true, |predicate| predicate(query))
    }
}

impl fmt::Debug for QueryFilters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryFilters")
            .field("query_key", &self.query_key)
            .field("exact", &self.exact)
            .field("has_predicate", &self.predicate.is_some())
            .field("query_type", &self.query_type)
            .field("stale", &self.stale)
            .field("fetch_status", &self.fetch_status)
            .finish()
    }
}

/// Selects mutations for `find_all` and `is_mutating`.
#[derive(Clone, Default)]
pub struct MutationFilters {
    pub mutation_key: Option<QueryKey>,
    pub exact: bool,
    pub status: Option<MutationStatus>,
    pub predicate: Option<MutationPredicate>,
}

impl MutationFilters {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn key(prefix: impl Into<QueryKey>) -> Self {
        Self {
            mutation_key: Some(prefix.into()),
            ..Self::default()
        }
    }

    pub fn status(mut self, status: MutationStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&dyn AnyMutation) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    pub fn matches(&self, mutation: &dyn AnyMutation) -> bool {
        if let Some(filter) = &self.mutation_key {
            match mutation.mutation_key() {
                Some(key) if key.matches(filter, self.exact) => {}
                _ => return false,
            }
        }
        if let Some(status) = self.status {
            if mutation.status() != status {
                return false;
            }
        }
        self.predicate
            .as_ref()
            .map_or(true, |predicate| predicate(mutation))
    }
}

impl fmt::Debug for MutationFilters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutationFilters")
            .field("mutation_key", &self.mutation_key)
            .field("exact", &self.exact)
            .field("status", &self.status)
            .field("has_predicate", &self.predicate.is_some())
            .finish()
    }
}
