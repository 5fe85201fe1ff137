//! Core types shared by subscription sets and their transport.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Unique identifier for a subscription (assigned by the manager).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(pub u64);

impl fmt::Debug for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SubscriptionId({})", self.0)
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Version of a committed subscription set.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct SetVersion(pub u64);

impl fmt::Debug for SetVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

impl SetVersion {
    pub fn next(self) -> Self {
        SetVersion(self.0 + 1)
    }
}

/// Microseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current time.
    pub fn now() -> Self {
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as i64)
            .unwrap_or_default();
        Timestamp(micros)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// A server-bound query: an object type plus an optional filter predicate.
///
/// Filters are opaque to this crate. They are stored and forwarded verbatim;
/// checking them is the job of a [`QueryValidator`](crate::QueryValidator).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Query {
    pub object_type: String,
    pub filter: Option<String>,
}

impl Query {
    /// Every object of `object_type`.
    pub fn all(object_type: impl Into<String>) -> Self {
        Self {
            object_type: object_type.into(),
            filter: None,
        }
    }

    /// Objects of `object_type` matching `filter`.
    pub fn filtered(object_type: impl Into<String>, filter: impl Into<String>) -> Self {
        Self {
            object_type: object_type.into(),
            filter: Some(filter.into()),
        }
    }

    /// The filter as sent to the server (`TRUEPREDICATE` when unfiltered).
    pub fn filter_text(&self) -> &str {
        self.filter.as_deref().unwrap_or("TRUEPREDICATE")
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.filter {
            Some(filter) => write!(f, "{}[{}]", self.object_type, filter),
            None => write!(f, "{}", self.object_type),
        }
    }
}

/// Synchronization state of one subscription-set version.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SubscriptionSetState {
    /// Committed locally, not yet acknowledged by the server.
    Pending,
    /// Server confirmed every query is fulfilled.
    Complete,
    /// Server rejected one or more queries.
    Error { reason: String },
    /// A newer version was committed before this one finished.
    Superseded,
}

impl SubscriptionSetState {
    /// Whether the state can still change.
    pub fn is_pending(&self) -> bool {
        matches!(self, SubscriptionSetState::Pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_navigation() {
        assert_eq!(SetVersion(0).next(), SetVersion(1));
        assert!(SetVersion(1) < SetVersion(2));
    }

    #[test]
    fn test_query_display() {
        assert_eq!(Query::all("Dog").to_string(), "Dog");
        assert_eq!(Query::filtered("Cat", "age > 10").to_string(), "Cat[age > 10]");
        assert_eq!(Query::all("Dog").filter_text(), "TRUEPREDICATE");
    }

    #[test]
    fn test_state_serializes_tagged() {
        let json = serde_json::to_value(SubscriptionSetState::Error {
            reason: "denied".into(),
        })
        .unwrap();
        assert_eq!(json["state"], "error");
        assert_eq!(json["reason"], "denied");
    }
}
