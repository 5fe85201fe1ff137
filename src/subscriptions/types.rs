//! Subscription records and committed subscription-set snapshots.

use crate::types::{Query, SetVersion, SubscriptionId, SubscriptionSetState, Timestamp};
use crate::waiter::{SyncOutcome, SyncSignal, WaitOptions};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// A registered query. Immutable; updates produce a new record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    /// Unique identifier (assigned by the manager).
    pub id: SubscriptionId,

    /// Lookup name, unique within a set (None = anonymous).
    pub name: Option<String>,

    pub query: Query,

    /// When the first subscription with this name (or query) was added.
    pub created_at: Timestamp,

    /// When this record last replaced a previous one.
    pub updated_at: Timestamp,
}

impl Subscription {
    pub fn is_anonymous(&self) -> bool {
        self.name.is_none()
    }
}

/// Options for `MutableSubscriptionSet::add`.
#[derive(Clone, Debug, Default)]
pub struct SubscriptionOptions {
    /// Lookup name (None = anonymous).
    pub name: Option<String>,

    /// Fail with `NameConflict` instead of replacing a same-named
    /// subscription that has a different query.
    pub throw_on_update: bool,
}

impl SubscriptionOptions {
    /// Anonymous subscription.
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Named subscription.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn with_throw_on_update(mut self) -> Self {
        self.throw_on_update = true;
        self
    }
}

/// What to do when an anonymous query is added twice.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AnonymousDuplicatePolicy {
    /// Return the existing subscription.
    #[default]
    Deduplicate,
    /// Fail with `DuplicateUnnamedQuery`.
    Reject,
}

struct SetSnapshot {
    version: SetVersion,
    subscriptions: Vec<Subscription>,
    committed_at: Timestamp,
    signal: SyncSignal,
}

/// Committed, versioned snapshot of active subscriptions.
///
/// The subscription list never changes. The synchronization state is
/// live and shared with the manager, so [`state`](Self::state) and
/// [`wait_for_synchronization`](Self::wait_for_synchronization) follow this
/// version through `Pending -> Complete | Error | Superseded`.
#[derive(Clone)]
pub struct SubscriptionSet {
    inner: Arc<SetSnapshot>,
}

impl SubscriptionSet {
    pub(crate) fn new(version: SetVersion, subscriptions: Vec<Subscription>, signal: SyncSignal) -> Self {
        Self {
            inner: Arc::new(SetSnapshot {
                version,
                subscriptions,
                committed_at: Timestamp::now(),
                signal,
            }),
        }
    }

    pub fn version(&self) -> SetVersion {
        self.inner.version
    }

    pub fn committed_at(&self) -> Timestamp {
        self.inner.committed_at
    }

    pub fn len(&self) -> usize {
        self.inner.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.subscriptions.is_empty()
    }

    /// Subscriptions in insertion order.
    pub fn iter(&self) -> std::slice::Iter<'_, Subscription> {
        self.inner.subscriptions.iter()
    }

    pub fn as_slice(&self) -> &[Subscription] {
        &self.inner.subscriptions
    }

    pub fn find_by_name(&self, name: &str) -> Option<&Subscription> {
        self.iter().find(|sub| sub.name.as_deref() == Some(name))
    }

    /// First subscription (named or not) for `query`.
    pub fn find_by_query(&self, query: &Query) -> Option<&Subscription> {
        self.iter().find(|sub| &sub.query == query)
    }

    pub fn contains(&self, subscription: &Subscription) -> bool {
        self.iter().any(|sub| sub.id == subscription.id)
    }

    /// Current synchronization state of this version.
    pub fn state(&self) -> SubscriptionSetState {
        self.inner.signal.state()
    }

    /// Server's reason, when this version was rejected.
    pub fn error(&self) -> Option<String> {
        match self.state() {
            SubscriptionSetState::Error { reason } => Some(reason),
            _ => None,
        }
    }

    pub fn signal(&self) -> &SyncSignal {
        &self.inner.signal
    }

    /// Block until this version leaves `Pending`.
    pub fn wait_for_synchronization(&self, options: WaitOptions) -> SyncOutcome {
        self.inner.signal.wait(options)
    }

    /// Callback form of [`wait_for_synchronization`](Self::wait_for_synchronization).
    pub fn on_synchronized<F>(&self, callback: F)
    where
        F: FnOnce(SyncOutcome) + Send + 'static,
    {
        self.inner.signal.on_resolved(callback)
    }

    /// Whether both handles refer to the same committed snapshot.
    pub fn same_snapshot(&self, other: &SubscriptionSet) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<'a> IntoIterator for &'a SubscriptionSet {
    type Item = &'a Subscription;
    type IntoIter = std::slice::Iter<'a, Subscription>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl fmt::Debug for SubscriptionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionSet")
            .field("version", &self.inner.version)
            .field("state", &self.state())
            .field("subscriptions", &self.inner.subscriptions)
            .finish()
    }
}
