//! Staleness and eviction durations.
//!
//! Both are explicit sum types so that every consumer matches on the
//! "infinite" and "static" cases instead of comparing against sentinels.

use std::fmt;
use std::time::Duration;

use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};
use tokio::time::Instant;

/// How long fetched data stays fresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StaleTime {
    /// Data becomes stale this long after it was last updated.
    Duration(Duration),
    /// Data never becomes stale by age. Invalidation still marks it stale.
    Infinite,
    /// Data is immutable: never stale, not even after invalidation, and exempt
    /// from every background refetch trigger.
    Static,
}

impl StaleTime {
    /// Data is stale as soon as it arrives.
    pub const ZERO: StaleTime = StaleTime::Duration(Duration::ZERO);

    /// Returns `true` if data updated at `updated_at` is stale at `now` by age alone.
    pub fn is_elapsed(&self, updated_at: Instant, now: Instant) -> bool {
        match self {
            StaleTime::Duration(window) => now.saturating_duration_since(updated_at) >= *window,
            StaleTime::Infinite | StaleTime::Static => false,
        }
    }

    /// Returns `true` for [`StaleTime::Static`].
    pub fn is_static(&self) -> bool {
        matches!(self, StaleTime::Static)
    }
}

impl Default for StaleTime {
    fn default() -> Self {
        StaleTime::ZERO
    }
}

impl From<Duration> for StaleTime {
    fn from(d: Duration) -> Self {
        StaleTime::Duration(d)
    }
}

impl fmt::Display for StaleTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StaleTime::Duration(d) => write!(f, "{}", humantime::format_duration(*d)),
            StaleTime::Infinite => f.write_str("infinite"),
            StaleTime::Static => f.write_str("static"),
        }
    }
}

/// How long an unused entry is kept before it is evicted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GcTime {
    /// Evict after being unused for this long.
    Duration(Duration),
    /// Never evict.
    Never,
}

impl GcTime {
    /// Five minutes.
    pub const DEFAULT: GcTime = GcTime::Duration(Duration::from_secs(5 * 60));

    /// The longer of two grace periods. [`GcTime::Never`] dominates.
    pub fn max(self, other: GcTime) -> GcTime {
        match (self, other) {
            (GcTime::Never, _) | (_, GcTime::Never) => GcTime::Never,
            (GcTime::Duration(a), GcTime::Duration(b)) => GcTime::Duration(a.max(b)),
        }
    }
}

impl Default for GcTime {
    fn default() -> Self {
        GcTime::DEFAULT
    }
}

impl From<Duration> for GcTime {
    fn from(d: Duration) -> Self {
        GcTime::Duration(d)
    }
}

impl fmt::Display for GcTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GcTime::Duration(d) => write!(f, "{}", humantime::format_duration(*d)),
            GcTime::Never => f.write_str("never"),
        }
    }
}

struct KeywordDurationVisitor {
    expecting: &'static str,
}

impl Visitor<'_> for KeywordDurationVisitor {
    type Value = Result<Duration, String>;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.expecting)
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        match humantime::parse_duration(v) {
            Ok(d) => Ok(Ok(d)),
            Err(_) => Ok(Err(v.to_owned())),
        }
    }
}

impl<'de> Deserialize<'de> for StaleTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let parsed = deserializer.deserialize_str(KeywordDurationVisitor {
            expecting: "a duration, \"infinite\" or \"static\"",
        })?;
        match parsed {
            Ok(d) => Ok(StaleTime::Duration(d)),
            Err(word) => match word.as_str() {
                "infinite" => Ok(StaleTime::Infinite),
                "static" => Ok(StaleTime::Static),
                _ => Err(de::Error::invalid_value(
                    de::Unexpected::Str(&word),
                    &"a duration, \"infinite\" or \"static\"",
                )),
            },
        }
    }
}

impl Serialize for StaleTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for GcTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let parsed = deserializer.deserialize_str(KeywordDurationVisitor {
            expecting: "a duration or \"never\"",
        })?;
        match parsed {
            Ok(d) => Ok(GcTime::Duration(d)),
            Err(word) if word == "never" => Ok(GcTime::Never),
            Err(word) => Err(de::Error::invalid_value(
                de::Unexpected::Str(&word),
                &"a duration or \"never\"",
            )),
        }
    }
}

impl Serialize for GcTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
