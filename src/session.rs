//! Sync session owning one subscription-set manager.

use crate::error::Result;
use crate::subscriptions::{
    AnonymousDuplicatePolicy, MutableSubscriptionSet, SubscriptionSet, SubscriptionSetManager,
};
use crate::transport::{SyncAck, SyncTransport};
use crate::types::SetVersion;
use crate::validation::{AcceptAll, QueryValidator};
use crate::waiter::{SyncOutcome, WaitOptions};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// What `close` does with a subscription set still waiting on the server.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SessionStopPolicy {
    /// Wake all waiters with `SessionClosed` right away.
    #[default]
    Immediately,
    /// Give the latest set up to `timeout` to leave `Pending` first.
    AfterPendingAcknowledged { timeout: Duration },
}

/// Session configuration.
#[derive(Clone, Debug, Default)]
pub struct SessionConfig {
    /// Handling of identical anonymous queries.
    pub anonymous_duplicates: AnonymousDuplicatePolicy,

    /// Behaviour of `close` with pending sets.
    pub stop_policy: SessionStopPolicy,

    /// Timeout applied by [`SyncSession::wait_for_synchronization`]
    /// (None = wait until resolved or closed).
    pub default_wait_timeout: Option<Duration>,
}

/// An open flexible-sync session.
///
/// Owns its subscription-set manager; there is no shared global state.
/// Dropping the session closes it.
pub struct SyncSession {
    config: SessionConfig,
    manager: SubscriptionSetManager,
}

impl SyncSession {
    /// Open a session that accepts every query.
    pub fn open(config: SessionConfig, transport: Arc<dyn SyncTransport>) -> Self {
        Self::with_validator(config, transport, Arc::new(AcceptAll))
    }

    /// Open a session whose commits are checked by `validator`.
    pub fn with_validator(
        config: SessionConfig,
        transport: Arc<dyn SyncTransport>,
        validator: Arc<dyn QueryValidator>,
    ) -> Self {
        let manager =
            SubscriptionSetManager::with_options(transport, validator, config.anonymous_duplicates);
        info!(stop_policy = ?config.stop_policy, "Sync session opened");
        Self { config, manager }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn manager(&self) -> &SubscriptionSetManager {
        &self.manager
    }

    /// Latest committed subscription set.
    pub fn subscriptions(&self) -> SubscriptionSet {
        self.manager.subscriptions()
    }

    pub fn begin_transaction(&self) -> Result<MutableSubscriptionSet<'_>> {
        self.manager.begin_transaction()
    }

    pub fn update<F>(&self, mutator: F) -> Result<SubscriptionSet>
    where
        F: FnOnce(&mut MutableSubscriptionSet<'_>) -> Result<()>,
    {
        self.manager.update(mutator)
    }

    pub fn acknowledge(&self, version: SetVersion, ack: SyncAck) -> Result<()> {
        self.manager.acknowledge(version, ack)
    }

    /// Wait on the latest set using the configured default timeout.
    pub fn wait_for_synchronization(&self) -> SyncOutcome {
        self.manager.wait_for_synchronization(WaitOptions {
            timeout: self.config.default_wait_timeout,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.manager.is_closed()
    }

    /// Close according to the stop policy. Returns the number of waiters
    /// woken with `SessionClosed`.
    pub fn close(&self) -> usize {
        if self.manager.is_closed() {
            return 0;
        }

        if let SessionStopPolicy::AfterPendingAcknowledged { timeout } = self.config.stop_policy {
            let outcome = self
                .manager
                .wait_for_synchronization(WaitOptions::timeout(timeout));
            debug!(?outcome, "Pending subscriptions settled before close");
        }

        self.manager.close()
    }
}

impl Drop for SyncSession {
    fn drop(&mut self) {
        self.close();
    }
}
