//! Subscription-set manager: owns the committed set and serializes writers.

use crate::error::{Result, SyncError};
use crate::transport::{SyncAck, SyncRequest, SyncTransport};
use crate::types::{SetVersion, SubscriptionId, SubscriptionSetState};
use crate::validation::{AcceptAll, QueryValidator};
use crate::waiter::{Notification, SyncOutcome, SyncSignal, WaitOptions};
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::mutable::MutableSubscriptionSet;
use super::types::{AnonymousDuplicatePolicy, Subscription, SubscriptionSet};

/// FIFO ticket queue: writers get their turn in the order they asked.
#[derive(Default)]
struct WriterQueue {
    /// (next ticket to hand out, ticket currently served)
    tickets: Mutex<(u64, u64)>,
    turn: Condvar,
}

impl WriterQueue {
    fn acquire(&self) -> WriterTurn<'_> {
        let mut tickets = self.tickets.lock();
        let ticket = tickets.0;
        tickets.0 += 1;
        while tickets.1 != ticket {
            self.turn.wait(&mut tickets);
        }
        WriterTurn { queue: self }
    }

    /// Writers holding or waiting for a turn.
    fn queued(&self) -> usize {
        let tickets = self.tickets.lock();
        (tickets.0 - tickets.1) as usize
    }

    fn release(&self) {
        let mut tickets = self.tickets.lock();
        tickets.1 += 1;
        self.turn.notify_all();
    }
}

/// Exclusive write access; released on drop.
pub(crate) struct WriterTurn<'a> {
    queue: &'a WriterQueue,
}

impl Drop for WriterTurn<'_> {
    fn drop(&mut self) {
        self.queue.release();
    }
}

/// Owns the current subscription set of one sync session.
///
/// Reads ([`subscriptions`](Self::subscriptions)) only clone a shared
/// snapshot. Writes go through a [`MutableSubscriptionSet`], one at a time,
/// in call order. Each commit with a net change produces the next version,
/// supersedes the previous one if it was still pending, and is handed to the
/// transport.
pub struct SubscriptionSetManager {
    /// Latest committed set.
    current: RwLock<SubscriptionSet>,
    writers: WriterQueue,
    /// Counter for generating subscription IDs.
    next_id: AtomicU64,
    closed: AtomicBool,
    transport: Arc<dyn SyncTransport>,
    validator: Arc<dyn QueryValidator>,
    duplicates: AnonymousDuplicatePolicy,
}

impl SubscriptionSetManager {
    /// Create a manager with an empty, already complete version 0.
    pub fn new(transport: Arc<dyn SyncTransport>) -> Self {
        Self::with_options(transport, Arc::new(AcceptAll), AnonymousDuplicatePolicy::default())
    }

    /// Create a manager with a custom validator and duplicate policy.
    pub fn with_options(
        transport: Arc<dyn SyncTransport>,
        validator: Arc<dyn QueryValidator>,
        duplicates: AnonymousDuplicatePolicy,
    ) -> Self {
        let initial = SubscriptionSet::new(
            SetVersion(0),
            Vec::new(),
            SyncSignal::complete(SetVersion(0)),
        );

        Self {
            current: RwLock::new(initial),
            writers: WriterQueue::default(),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            transport,
            validator,
            duplicates,
        }
    }

    /// Latest committed set. Never waits on writers.
    pub fn subscriptions(&self) -> SubscriptionSet {
        self.current.read().clone()
    }

    pub fn version(&self) -> SetVersion {
        self.current.read().version()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Writers currently holding or waiting for a transaction.
    pub fn queued_writers(&self) -> usize {
        self.writers.queued()
    }

    pub fn duplicate_policy(&self) -> AnonymousDuplicatePolicy {
        self.duplicates
    }

    /// Open a transaction on top of the latest committed set.
    ///
    /// Blocks until every earlier writer has committed or aborted. The
    /// transaction aborts when dropped without [`commit`](MutableSubscriptionSet::commit).
    pub fn begin_transaction(&self) -> Result<MutableSubscriptionSet<'_>> {
        let turn = self.writers.acquire();
        if self.is_closed() {
            return Err(SyncError::SessionClosed);
        }
        let base = self.subscriptions();
        Ok(MutableSubscriptionSet::new(self, base, turn))
    }

    /// Run `mutator` in a transaction and commit its result.
    ///
    /// If `mutator` returns an error the transaction is discarded and the
    /// committed set is unchanged.
    pub fn update<F>(&self, mutator: F) -> Result<SubscriptionSet>
    where
        F: FnOnce(&mut MutableSubscriptionSet<'_>) -> Result<()>,
    {
        let mut transaction = self.begin_transaction()?;
        match mutator(&mut transaction) {
            Ok(()) => transaction.commit(),
            Err(e) => {
                transaction.abort();
                Err(e)
            }
        }
    }

    /// Block until the latest committed set leaves `Pending`.
    pub fn wait_for_synchronization(&self, options: WaitOptions) -> SyncOutcome {
        self.subscriptions().wait_for_synchronization(options)
    }

    /// Record the server's answer for `version`.
    ///
    /// Answers for superseded versions are ignored. Answers for versions
    /// that were never committed are an error.
    pub fn acknowledge(&self, version: SetVersion, ack: SyncAck) -> Result<()> {
        if self.is_closed() {
            return Err(SyncError::SessionClosed);
        }

        let current = self.subscriptions();
        if version > current.version() {
            return Err(SyncError::UnknownVersion(version, current.version()));
        }
        if version < current.version() {
            debug!(?version, latest = ?current.version(), "Ignoring ack for superseded version");
            return Ok(());
        }

        let state = match ack {
            SyncAck::Fulfilled => SubscriptionSetState::Complete,
            SyncAck::Rejected { reason } => {
                warn!(?version, %reason, "Server rejected subscription set");
                SubscriptionSetState::Error { reason }
            }
        };

        if current.signal().resolve(state) {
            debug!(?version, "Subscription set acknowledged");
        } else {
            debug!(?version, state = ?current.state(), "Duplicate ack ignored");
        }
        Ok(())
    }

    /// Tear down: wake all waiters with `SessionClosed` and refuse further
    /// writes. Returns the number of waiters woken.
    pub fn close(&self) -> usize {
        if self.closed.swap(true, Ordering::SeqCst) {
            return 0;
        }
        let current = self.subscriptions();
        let woken = current.signal().close();
        info!(version = ?current.version(), woken, "Subscription manager closed");
        woken
    }

    pub(crate) fn next_subscription_id(&self) -> SubscriptionId {
        SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Validate, publish and hand off a transaction's working set.
    ///
    /// Runs while the caller holds the writer turn, so listener wake-ups are
    /// returned instead of delivered: callbacks may themselves call `update`.
    pub(crate) fn commit_working_set(
        &self,
        base: &SubscriptionSet,
        working: Vec<Subscription>,
    ) -> Result<(SubscriptionSet, Vec<Notification>)> {
        if self.is_closed() {
            return Err(SyncError::SessionClosed);
        }

        let base_ids: HashSet<SubscriptionId> = base.iter().map(|sub| sub.id).collect();
        for sub in working.iter().filter(|sub| !base_ids.contains(&sub.id)) {
            self.validator
                .validate(&sub.query)
                .map_err(|reason| SyncError::InvalidFilterSyntax {
                    query: sub.query.clone(),
                    reason,
                })?;
        }

        // Ids are unique, so equal length plus membership means the same
        // subscriptions. Order alone is not a change.
        let unchanged =
            working.len() == base.len() && working.iter().all(|sub| base_ids.contains(&sub.id));
        if unchanged {
            debug!(version = ?base.version(), "Transaction made no changes");
            return Ok((base.clone(), Vec::new()));
        }

        let version = base.version().next();
        let set = SubscriptionSet::new(version, working, SyncSignal::pending(version));

        let mut notifications = Vec::new();

        let previous = std::mem::replace(&mut *self.current.write(), set.clone());
        if let Some(n) = previous.signal().resolve_deferred(SubscriptionSetState::Superseded) {
            debug!(version = ?previous.version(), "Pending subscription set superseded");
            notifications.push(n);
        }

        debug!(?version, subscriptions = set.len(), "Committed subscription set");

        // Closed while publishing: the new version's waiters must not hang.
        if self.is_closed() {
            notifications.extend(set.signal().close_deferred());
            return Ok((set, notifications));
        }

        if let Err(e) = self.transport.submit(SyncRequest::from_set(&set)) {
            warn!(?version, error = %e, "Failed to hand subscription set to transport");
            notifications.extend(set.signal().resolve_deferred(SubscriptionSetState::Error {
                reason: e.to_string(),
            }));
        }

        Ok((set, notifications))
    }
}

impl std::fmt::Debug for SubscriptionSetManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionSetManager")
            .field("current", &*self.current.read())
            .field("closed", &self.is_closed())
            .field("duplicates", &self.duplicates)
            .finish()
    }
}
