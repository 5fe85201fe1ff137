//! Completion signals for subscription-set synchronization.
//!
//! Every committed subscription-set version carries one [`SyncSignal`]. The
//! signal starts `Pending` and resolves exactly once, to `Complete`, `Error`
//! or `Superseded`. Closing the session wakes all listeners with
//! [`SyncOutcome::SessionClosed`] without touching the recorded state.
//!
//! Two calling conventions share the same listener list:
//! - [`SyncSignal::wait`] blocks the calling thread, optionally bounded by a
//!   timeout.
//! - [`SyncSignal::on_resolved`] registers a callback that runs on whichever
//!   thread resolves the signal (or immediately, if already resolved).

use crate::error::{Result, SyncError};
use crate::types::{SetVersion, SubscriptionSetState};
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// How a wait on a subscription set ended.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SyncOutcome {
    /// Server confirmed every query is fulfilled.
    Complete,
    /// Server rejected the set.
    Error { reason: String },
    /// A newer version was committed first.
    Superseded,
    /// The session was torn down while waiting.
    SessionClosed,
    /// The caller's timeout elapsed; synchronization continues.
    Timeout,
}

impl SyncOutcome {
    /// Map the outcome for `version` onto the crate's error kinds.
    pub fn into_result(self, version: SetVersion) -> Result<()> {
        match self {
            SyncOutcome::Complete => Ok(()),
            SyncOutcome::Error { reason } => Err(SyncError::ServerRejected { version, reason }),
            SyncOutcome::Superseded => Err(SyncError::Superseded(version)),
            SyncOutcome::SessionClosed => Err(SyncError::SessionClosed),
            SyncOutcome::Timeout => Err(SyncError::Timeout),
        }
    }
}

/// Options for a single wait.
#[derive(Clone, Copy, Debug, Default)]
pub struct WaitOptions {
    /// Give up after this long (None = wait until resolved or closed).
    pub timeout: Option<Duration>,
}

impl WaitOptions {
    pub fn timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }
}

type Callback = Box<dyn FnOnce(SyncOutcome) + Send>;

enum Listener {
    Channel(Sender<SyncOutcome>),
    Callback(Callback),
}

impl Listener {
    fn notify(self, outcome: SyncOutcome) {
        match self {
            // Receiver may have timed out and gone away.
            Listener::Channel(tx) => {
                let _ = tx.try_send(outcome);
            }
            Listener::Callback(callback) => callback(outcome),
        }
    }
}

/// Listeners taken off a signal, woken by [`deliver`](Self::deliver).
///
/// Lets a caller record a transition while holding a lock and wake
/// listeners (which may run arbitrary callbacks) after releasing it.
#[must_use = "listeners are only woken by `deliver`"]
pub(crate) struct Notification {
    version: SetVersion,
    outcome: SyncOutcome,
    listeners: Vec<Listener>,
}

impl Notification {
    /// Wake every listener. Returns how many were woken.
    pub(crate) fn deliver(self) -> usize {
        let count = self.listeners.len();
        trace!(version = ?self.version, outcome = ?self.outcome, listeners = count, "Delivering sync outcome");
        for listener in self.listeners {
            listener.notify(self.outcome.clone());
        }
        count
    }
}

struct SignalState {
    state: SubscriptionSetState,
    closed: bool,
    next_listener: u64,
    listeners: Vec<(u64, Listener)>,
}

impl SignalState {
    fn register(&mut self, listener: Listener) -> u64 {
        let id = self.next_listener;
        self.next_listener += 1;
        self.listeners.push((id, listener));
        id
    }

    fn take_listeners(&mut self) -> Vec<Listener> {
        std::mem::take(&mut self.listeners)
            .into_iter()
            .map(|(_, listener)| listener)
            .collect()
    }

    /// The outcome a new listener would get right now, if any.
    fn settled(&self) -> Option<SyncOutcome> {
        match &self.state {
            SubscriptionSetState::Complete => Some(SyncOutcome::Complete),
            SubscriptionSetState::Error { reason } => Some(SyncOutcome::Error {
                reason: reason.clone(),
            }),
            SubscriptionSetState::Superseded => Some(SyncOutcome::Superseded),
            SubscriptionSetState::Pending if self.closed => Some(SyncOutcome::SessionClosed),
            SubscriptionSetState::Pending => None,
        }
    }
}

/// Multi-listener completion signal for one subscription-set version.
///
/// Cloning is cheap; all clones observe the same state.
#[derive(Clone)]
pub struct SyncSignal {
    version: SetVersion,
    inner: Arc<Mutex<SignalState>>,
}

impl SyncSignal {
    /// A signal that has not resolved yet.
    pub fn pending(version: SetVersion) -> Self {
        Self::with_state(version, SubscriptionSetState::Pending)
    }

    /// A signal that is already complete.
    pub fn complete(version: SetVersion) -> Self {
        Self::with_state(version, SubscriptionSetState::Complete)
    }

    fn with_state(version: SetVersion, state: SubscriptionSetState) -> Self {
        Self {
            version,
            inner: Arc::new(Mutex::new(SignalState {
                state,
                closed: false,
                next_listener: 0,
                listeners: Vec::new(),
            })),
        }
    }

    pub fn version(&self) -> SetVersion {
        self.version
    }

    /// Current state of this version.
    pub fn state(&self) -> SubscriptionSetState {
        self.inner.lock().state.clone()
    }

    /// Whether the owning session has been closed.
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Number of listeners still waiting.
    pub fn listener_count(&self) -> usize {
        self.inner.lock().listeners.len()
    }

    /// Move out of `Pending`. Returns false if the signal had already
    /// resolved, was closed, or `state` is itself `Pending`.
    pub fn resolve(&self, state: SubscriptionSetState) -> bool {
        match self.resolve_deferred(state) {
            Some(notification) => {
                notification.deliver();
                true
            }
            None => false,
        }
    }

    /// Record the transition now; listeners wake when the returned
    /// notification is delivered.
    pub(crate) fn resolve_deferred(&self, state: SubscriptionSetState) -> Option<Notification> {
        let mut inner = self.inner.lock();
        if !inner.state.is_pending() || inner.closed || state.is_pending() {
            return None;
        }
        inner.state = state;
        let outcome = inner.settled()?;
        Some(Notification {
            version: self.version,
            outcome,
            listeners: inner.take_listeners(),
        })
    }

    /// Wake every listener with `SessionClosed`. Returns how many were woken.
    pub fn close(&self) -> usize {
        self.close_deferred().map_or(0, Notification::deliver)
    }

    pub(crate) fn close_deferred(&self) -> Option<Notification> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return None;
        }
        inner.closed = true;
        Some(Notification {
            version: self.version,
            outcome: SyncOutcome::SessionClosed,
            listeners: inner.take_listeners(),
        })
    }

    /// Block until the signal resolves, the session closes, or the timeout
    /// elapses. Returns immediately when already resolved.
    pub fn wait(&self, options: WaitOptions) -> SyncOutcome {
        let (id, receiver) = {
            let mut inner = self.inner.lock();
            if let Some(outcome) = inner.settled() {
                return outcome;
            }
            let (tx, rx) = bounded(1);
            (inner.register(Listener::Channel(tx)), rx)
        };

        match options.timeout {
            Some(timeout) => match receiver.recv_timeout(timeout) {
                Ok(outcome) => outcome,
                Err(RecvTimeoutError::Timeout) => {
                    self.inner.lock().listeners.retain(|(lid, _)| *lid != id);
                    // Resolved between the timeout and the removal.
                    receiver.try_recv().unwrap_or(SyncOutcome::Timeout)
                }
                Err(RecvTimeoutError::Disconnected) => SyncOutcome::SessionClosed,
            },
            None => receiver.recv().unwrap_or(SyncOutcome::SessionClosed),
        }
    }

    /// Run `callback` once the signal resolves. Runs inline when the
    /// outcome is already known.
    pub fn on_resolved<F>(&self, callback: F)
    where
        F: FnOnce(SyncOutcome) + Send + 'static,
    {
        let outcome = {
            let mut inner = self.inner.lock();
            match inner.settled() {
                Some(outcome) => outcome,
                None => {
                    inner.register(Listener::Callback(Box::new(callback)));
                    return;
                }
            }
        };

        callback(outcome);
    }
}

impl fmt::Debug for SyncSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("SyncSignal")
            .field("version", &self.version)
            .field("state", &inner.state)
            .field("closed", &inner.closed)
            .field("listeners", &inner.listeners.len())
            .finish()
    }
}
