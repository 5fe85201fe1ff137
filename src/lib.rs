//! # Flexible-Sync Subscriptions
//!
//! Versioned, transactional sets of server-bound query subscriptions for a
//! locally replicated dataset.
//!
//! ## Core Concepts
//!
//! - **Subscriptions**: Immutable records pairing a query with an optional name
//! - **Subscription sets**: Ordered snapshots, one per committed version
//! - **Transactions**: Exclusive, all-or-nothing editing of the next version
//! - **Waiters**: Completion signals resolved by the server's acknowledgement
//!
//! Authentication, transport and filter evaluation live outside this crate,
//! behind [`SyncTransport`] and [`QueryValidator`].
//!
//! ## Example
//!
//! ```ignore
//! use flexsync::{ChannelTransport, Query, SessionConfig, SubscriptionOptions, SyncSession};
//!
//! let (transport, requests) = ChannelTransport::new();
//! let session = SyncSession::open(SessionConfig::default(), Arc::new(transport));
//!
//! let set = session.update(|m| {
//!     m.add(Query::filtered("Cat", "age > 10"), SubscriptionOptions::named("test"))?;
//!     Ok(())
//! })?;
//!
//! // The sync engine drains `requests` and answers each version.
//! let request = requests.recv()?;
//! session.acknowledge(request.version, SyncAck::Fulfilled)?;
//! ```

pub mod error;
pub mod session;
pub mod subscriptions;
pub mod transport;
pub mod types;
pub mod validation;
pub mod waiter;

// Re-exports
pub use error::{Result, SyncError};
pub use session::{SessionConfig, SessionStopPolicy, SyncSession};
pub use subscriptions::{
    AnonymousDuplicatePolicy, MutableSubscriptionSet, Subscription, SubscriptionOptions,
    SubscriptionSet, SubscriptionSetManager,
};
pub use transport::{
    ChannelTransport, NullTransport, QueryDescriptor, SyncAck, SyncRequest, SyncRequestReceiver,
    SyncTransport,
};
pub use types::*;
pub use validation::{AcceptAll, QueryValidator};
pub use waiter::{SyncOutcome, SyncSignal, WaitOptions};
