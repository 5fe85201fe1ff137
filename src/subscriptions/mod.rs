//! Versioned query-subscription sets.
//!
//! A session's server-side subscriptions form a [`SubscriptionSet`]: an
//! ordered, versioned snapshot. New versions are produced only by
//! committing a [`MutableSubscriptionSet`] obtained from the
//! [`SubscriptionSetManager`]:
//! - Writers are served one at a time, in call order
//! - Readers always see a whole committed snapshot
//! - A commit supersedes the previous version if it was still pending
//!
//! # Example
//!
//! ```ignore
//! let manager = SubscriptionSetManager::new(Arc::new(transport));
//!
//! let set = manager.update(|m| {
//!     m.add(Query::filtered("Cat", "age > 10"), SubscriptionOptions::named("test"))?;
//!     Ok(())
//! })?;
//!
//! match set.wait_for_synchronization(WaitOptions::default()) {
//!     SyncOutcome::Complete => println!("Synced {:?}", set.version()),
//!     other => println!("Not synced: {:?}", other),
//! }
//! ```

mod manager;
mod mutable;
mod types;

pub use manager::SubscriptionSetManager;
pub use mutable::MutableSubscriptionSet;
pub use types::{AnonymousDuplicatePolicy, Subscription, SubscriptionOptions, SubscriptionSet};
