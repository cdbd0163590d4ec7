//! Key types for query caching and filtering.

use std::fmt::{self, Debug, Display};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde_json::Value;

/// Identity of one cached value, and the filter vocabulary for bulk operations.
///
/// A key is an ordered sequence of JSON values. Two keys are equal iff they are
/// structurally equal element-wise; object members compare independent of their
/// insertion order. Equality and hashing both go through a canonical string form
/// computed once at construction.
///
/// Clone is cheap as the parts are shared.
///
/// # Example
///
/// ```
/// use query_sync::query_key;
///
/// let todos = query_key!["todos"];
/// let page = query_key!["todos", { "page": 2, "done": false }];
///
/// assert!(page.starts_with(&todos));
/// assert!(!todos.starts_with(&page));
/// ```
#[derive(Clone)]
pub struct QueryKey {
    parts: Arc<[Value]>,
    hash: Arc<str>,
}

impl QueryKey {
    /// Create a key from its parts.
    pub fn new<I, V>(parts: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let parts: Arc<[Value]> = parts.into_iter().map(Into::into).collect();
        // serde_json keeps object members in a BTreeMap, so this is canonical.
        let hash = Value::Array(parts.to_vec()).to_string().into();
        Self { parts, hash }
    }

    /// The empty key. As a filter it matches every key.
    pub fn empty() -> Self {
        Self::new(Vec::<Value>::new())
    }

    /// Get the parts of this key.
    pub fn parts(&self) -> &[Value] {
        &self.parts
    }

    /// Number of parts.
    pub fn len(&self) -> usize {
        self.parts.len()
    }

    /// Returns `true` if this key has no parts.
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Canonical string form used for hashing and equality.
    pub fn hash_str(&self) -> &str {
        &self.hash
    }

    /// Returns `true` if `prefix` is a prefix of this key.
    ///
    /// Every element of `prefix` must deep-equal the element at the same position.
    /// An empty prefix matches every key.
    pub fn starts_with(&self, prefix: &QueryKey) -> bool {
        prefix.len() <= self.len()
            && prefix
                .parts
                .iter()
                .zip(self.parts.iter())
                .all(|(a, b)| a == b)
    }

    /// Match against a filter key, either exactly or by prefix.
    pub fn matches(&self, filter: &QueryKey, exact: bool) -> bool {
        if exact {
            self == filter
        } else {
            self.starts_with(filter)
        }
    }
}

impl Debug for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "QueryKey({})", self.hash)
    }
}

impl Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.hash)
    }
}

impl Hash for QueryKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.hash.hash(state);
    }
}

impl PartialEq for QueryKey {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.hash, &other.hash) || self.hash == other.hash
    }
}

impl Eq for QueryKey {}

impl From<&str> for QueryKey {
    fn from(part: &str) -> Self {
        Self::new([part])
    }
}

impl From<String> for QueryKey {
    fn from(part: String) -> Self {
        Self::new([part])
    }
}

impl From<Vec<Value>> for QueryKey {
    fn from(parts: Vec<Value>) -> Self {
        Self::new(parts)
    }
}

/// Build a [`QueryKey`] from JSON-literal parts.
///
/// Each part accepts anything `serde_json::json!` accepts.
///
/// ```
/// use query_sync::query_key;
///
/// let key = query_key!["user", 42, { "include": ["posts"] }];
/// assert_eq!(key.len(), 3);
/// ```
#[macro_export]
macro_rules! query_key {
    () => {
        $crate::QueryKey::empty()
    };
    ($($part:tt),+ $(,)?) => {
        $crate::QueryKey::new(::std::vec![$(::serde_json::json!($part)),+])
    };
}
