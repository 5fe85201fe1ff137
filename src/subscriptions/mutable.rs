//! Mutation transactions over a subscription set.

use crate::error::{Result, SyncError};
use crate::types::{Query, SetVersion, Timestamp};
use tracing::trace;

use super::manager::{SubscriptionSetManager, WriterTurn};
use super::types::{AnonymousDuplicatePolicy, Subscription, SubscriptionOptions, SubscriptionSet};

/// Exclusive editing context producing the next subscription-set version.
///
/// Works on a private copy of the committed set; nothing is visible to
/// readers until [`commit`](Self::commit). Dropping the transaction (or
/// calling [`abort`](Self::abort)) discards every change and lets the next
/// writer in. A failed [`add`](Self::add) poisons the transaction: the
/// following `commit` returns that error and commits nothing.
pub struct MutableSubscriptionSet<'a> {
    manager: &'a SubscriptionSetManager,
    base: SubscriptionSet,
    working: Vec<Subscription>,
    failed: Option<SyncError>,
    _turn: WriterTurn<'a>,
}

impl<'a> MutableSubscriptionSet<'a> {
    pub(crate) fn new(
        manager: &'a SubscriptionSetManager,
        base: SubscriptionSet,
        turn: WriterTurn<'a>,
    ) -> Self {
        let working = base.as_slice().to_vec();
        Self {
            manager,
            base,
            working,
            failed: None,
            _turn: turn,
        }
    }

    /// Version this transaction started from.
    pub fn base_version(&self) -> SetVersion {
        self.base.version()
    }

    /// Add a subscription for `query`.
    ///
    /// Named: an existing subscription with the same name and query is
    /// returned unchanged; one with a different query is replaced in place
    /// (or refused with `NameConflict` when `throw_on_update` is set).
    /// Anonymous: an identical anonymous query is returned or refused
    /// according to the manager's [`AnonymousDuplicatePolicy`].
    ///
    /// Re-adding a committed subscription that this transaction removed or
    /// replaced brings back the committed record (same id), so undoing a
    /// change inside one transaction is not a net change.
    pub fn add(&mut self, query: Query, options: SubscriptionOptions) -> Result<Subscription> {
        let result = self.add_inner(query, options);
        if let Err(ref e) = result {
            self.failed.get_or_insert_with(|| e.clone());
        }
        result
    }

    fn add_inner(&mut self, query: Query, options: SubscriptionOptions) -> Result<Subscription> {
        let now = Timestamp::now();

        match options.name {
            Some(name) if name.is_empty() => Err(SyncError::InvalidOperation(
                "subscription name must not be empty".into(),
            )),
            Some(name) => {
                let existing = self
                    .working
                    .iter()
                    .position(|sub| sub.name.as_deref() == Some(name.as_str()));

                if let Some(pos) = existing {
                    let current = &self.working[pos];
                    if current.query == query {
                        return Ok(current.clone());
                    }
                    if options.throw_on_update {
                        return Err(SyncError::NameConflict(name));
                    }

                    if let Some(committed) = self.revive(Some(name.as_str()), &query) {
                        self.working[pos] = committed.clone();
                        return Ok(committed);
                    }

                    let current = &self.working[pos];
                    let replacement = Subscription {
                        id: self.manager.next_subscription_id(),
                        name: Some(name),
                        query,
                        created_at: current.created_at,
                        updated_at: now,
                    };
                    trace!(name = ?replacement.name, query = %replacement.query, "Replacing subscription");
                    self.working[pos] = replacement.clone();
                    return Ok(replacement);
                }

                Ok(self.push(Some(name), query, now))
            }
            None => {
                let duplicate = self
                    .working
                    .iter()
                    .find(|sub| sub.is_anonymous() && sub.query == query);

                if let Some(existing) = duplicate {
                    return match self.manager.duplicate_policy() {
                        AnonymousDuplicatePolicy::Deduplicate => Ok(existing.clone()),
                        AnonymousDuplicatePolicy::Reject => {
                            Err(SyncError::DuplicateUnnamedQuery(query))
                        }
                    };
                }

                Ok(self.push(None, query, now))
            }
        }
    }

    /// Committed record with this name and query that the working set no
    /// longer holds.
    fn revive(&self, name: Option<&str>, query: &Query) -> Option<Subscription> {
        self.base
            .iter()
            .find(|sub| {
                sub.name.as_deref() == name
                    && &sub.query == query
                    && !self.working.iter().any(|w| w.id == sub.id)
            })
            .cloned()
    }

    fn push(&mut self, name: Option<String>, query: Query, now: Timestamp) -> Subscription {
        if let Some(committed) = self.revive(name.as_deref(), &query) {
            trace!(id = ?committed.id, query = %committed.query, "Restoring committed subscription");
            self.working.push(committed.clone());
            return committed;
        }

        let subscription = Subscription {
            id: self.manager.next_subscription_id(),
            name,
            query,
            created_at: now,
            updated_at: now,
        };
        trace!(id = ?subscription.id, query = %subscription.query, "Adding subscription");
        self.working.push(subscription.clone());
        subscription
    }

    /// Remove by handle. Returns whether it was present.
    pub fn remove(&mut self, subscription: &Subscription) -> bool {
        self.remove_where(|sub| sub.id == subscription.id) > 0
    }

    /// Remove by name. Absent names are a no-op.
    pub fn remove_by_name(&mut self, name: &str) -> bool {
        self.remove_where(|sub| sub.name.as_deref() == Some(name)) > 0
    }

    /// Remove every subscription (named or not) for `query`.
    pub fn remove_by_query(&mut self, query: &Query) -> bool {
        self.remove_where(|sub| &sub.query == query) > 0
    }

    /// Remove every subscription on `object_type`. Returns the count removed.
    pub fn remove_by_object_type(&mut self, object_type: &str) -> usize {
        self.remove_where(|sub| sub.query.object_type == object_type)
    }

    /// Remove every anonymous subscription. Returns the count removed.
    pub fn remove_unnamed(&mut self) -> usize {
        self.remove_where(Subscription::is_anonymous)
    }

    /// Clear the set. Returns the count removed.
    pub fn remove_all(&mut self) -> usize {
        let removed = self.working.len();
        self.working.clear();
        removed
    }

    fn remove_where<F>(&mut self, predicate: F) -> usize
    where
        F: Fn(&Subscription) -> bool,
    {
        let before = self.working.len();
        self.working.retain(|sub| !predicate(sub));
        before - self.working.len()
    }

    pub fn len(&self) -> usize {
        self.working.len()
    }

    pub fn is_empty(&self) -> bool {
        self.working.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Subscription> {
        self.working.iter()
    }

    pub fn find_by_name(&self, name: &str) -> Option<&Subscription> {
        self.working
            .iter()
            .find(|sub| sub.name.as_deref() == Some(name))
    }

    pub fn find_by_query(&self, query: &Query) -> Option<&Subscription> {
        self.working.iter().find(|sub| &sub.query == query)
    }

    /// Publish the working set as the next version.
    ///
    /// Returns the committed set in `Pending` state, or the unchanged base
    /// set when nothing changed.
    pub fn commit(self) -> Result<SubscriptionSet> {
        let MutableSubscriptionSet {
            manager,
            base,
            working,
            failed,
            _turn: turn,
        } = self;

        if let Some(e) = failed {
            return Err(e);
        }
        let (set, notifications) = manager.commit_working_set(&base, working)?;

        // Let the next writer in before any callback runs.
        drop(turn);
        for notification in notifications {
            notification.deliver();
        }
        Ok(set)
    }

    /// Discard every change.
    pub fn abort(self) {
        trace!(version = ?self.base.version(), "Transaction aborted");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::NullTransport;
    use std::sync::Arc;

    fn manager(duplicates: AnonymousDuplicatePolicy) -> SubscriptionSetManager {
        SubscriptionSetManager::with_options(
            Arc::new(NullTransport),
            Arc::new(crate::validation::AcceptAll),
            duplicates,
        )
    }

    #[test]
    fn test_named_add_replaces_in_place() {
        let manager = manager(AnonymousDuplicatePolicy::Deduplicate);
        let mut tx = manager.begin_transaction().unwrap();

        let first = tx
            .add(Query::filtered("Cat", "age > 10"), SubscriptionOptions::named("test"))
            .unwrap();
        tx.add(Query::all("Dog"), SubscriptionOptions::anonymous()).unwrap();
        let second = tx
            .add(Query::filtered("Cat", "age > 101"), SubscriptionOptions::named("test"))
            .unwrap();

        assert_ne!(first.id, second.id);
        assert_eq!(second.created_at, first.created_at);
        assert_eq!(tx.len(), 2);
        assert_eq!(tx.iter().next().unwrap().id, second.id);
        assert_eq!(
            tx.find_by_name("test").unwrap().query,
            Query::filtered("Cat", "age > 101")
        );
    }

    #[test]
    fn test_named_add_same_query_is_noop() {
        let manager = manager(AnonymousDuplicatePolicy::Deduplicate);
        let mut tx = manager.begin_transaction().unwrap();
        let a = tx
            .add(Query::filtered("Cat", "age > 15"), SubscriptionOptions::named("test2"))
            .unwrap();
        let b = tx
            .add(Query::filtered("Cat", "age > 15"), SubscriptionOptions::named("test2"))
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(tx.len(), 1);
    }

    #[test]
    fn test_throw_on_update_poisons_transaction() {
        let manager = manager(AnonymousDuplicatePolicy::Deduplicate);
        let mut tx = manager.begin_transaction().unwrap();
        tx.add(Query::all("Cat"), SubscriptionOptions::named("cats")).unwrap();

        let result = tx.add(
            Query::filtered("Cat", "age > 5"),
            SubscriptionOptions::named("cats").with_throw_on_update(),
        );
        assert_eq!(result, Err(SyncError::NameConflict("cats".into())));

        assert_eq!(tx.commit().unwrap_err(), SyncError::NameConflict("cats".into()));
        assert!(manager.subscriptions().is_empty());
    }

    #[test]
    fn test_anonymous_duplicates_deduplicated() {
        let manager = manager(AnonymousDuplicatePolicy::Deduplicate);
        let set = manager
            .update(|m| {
                let a = m.add(Query::all("Dog"), SubscriptionOptions::anonymous())?;
                let b = m.add(Query::all("Dog"), SubscriptionOptions::anonymous())?;
                assert_eq!(a.id, b.id);
                Ok(())
            })
            .unwrap();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_anonymous_duplicates_rejected() {
        let manager = manager(AnonymousDuplicatePolicy::Reject);
        let mut tx = manager.begin_transaction().unwrap();
        tx.add(Query::all("Dog"), SubscriptionOptions::anonymous()).unwrap();
        let result = tx.add(Query::all("Dog"), SubscriptionOptions::anonymous());
        assert_eq!(result, Err(SyncError::DuplicateUnnamedQuery(Query::all("Dog"))));
        assert!(tx.commit().is_err());
        assert_eq!(manager.version(), SetVersion(0));
    }

    #[test]
    fn test_removals() {
        let manager = manager(AnonymousDuplicatePolicy::Deduplicate);
        let mut tx = manager.begin_transaction().unwrap();
        let cat = tx.add(Query::all("Cat"), SubscriptionOptions::anonymous()).unwrap();
        tx.add(Query::filtered("Cat", "age > 10"), SubscriptionOptions::anonymous())
            .unwrap();
        tx.add(Query::all("Dog"), SubscriptionOptions::named("dogs")).unwrap();
        tx.add(Query::filtered("Dog", "age > 3"), SubscriptionOptions::anonymous())
            .unwrap();

        assert!(tx.remove(&cat));
        assert!(!tx.remove(&cat));
        assert!(!tx.remove_by_name("missing"));
        assert_eq!(tx.remove_by_object_type("Dog"), 2);
        assert!(tx.remove_by_query(&Query::filtered("Cat", "age > 10")));
        assert!(tx.is_empty());
    }

    #[test]
    fn test_remove_unnamed_and_all() {
        let manager = manager(AnonymousDuplicatePolicy::Deduplicate);
        let mut tx = manager.begin_transaction().unwrap();
        tx.add(Query::all("Cat"), SubscriptionOptions::anonymous()).unwrap();
        tx.add(Query::all("Dog"), SubscriptionOptions::named("dogs")).unwrap();
        assert_eq!(tx.remove_unnamed(), 1);
        assert_eq!(tx.remove_all(), 1);
        assert_eq!(tx.remove_all(), 0);
    }

    #[test]
    fn test_add_then_remove_is_no_net_change() {
        let manager = manager(AnonymousDuplicatePolicy::Deduplicate);
        let set = manager
            .update(|m| {
                m.add(Query::all("Cat"), SubscriptionOptions::named("cat_sub"))?;
                assert!(m.remove_by_name("cat_sub"));
                Ok(())
            })
            .unwrap();
        assert_eq!(set.version(), SetVersion(0));
    }

    #[test]
    fn test_undoing_changes_is_no_net_change() {
        let manager = manager(AnonymousDuplicatePolicy::Deduplicate);
        let committed = manager
            .update(|m| {
                m.add(Query::all("Dog"), SubscriptionOptions::anonymous())?;
                m.add(Query::filtered("Cat", "age > 10"), SubscriptionOptions::named("test"))?;
                Ok(())
            })
            .unwrap();
        let dog = committed.find_by_query(&Query::all("Dog")).unwrap().clone();
        let test = committed.find_by_name("test").unwrap().clone();

        let mut readded = None;
        let set = manager
            .update(|m| {
                assert!(m.remove_by_query(&Query::all("Dog")));
                readded = Some(m.add(Query::all("Dog"), SubscriptionOptions::anonymous())?);
                m.add(Query::filtered("Cat", "age > 99"), SubscriptionOptions::named("test"))?;
                let restored =
                    m.add(Query::filtered("Cat", "age > 10"), SubscriptionOptions::named("test"))?;
                assert_eq!(restored, test);
                Ok(())
            })
            .unwrap();

        // Same ids, same order: nothing to commit.
        assert_eq!(readded.unwrap(), dog);
        assert!(set.same_snapshot(&committed));
        assert_eq!(set.version(), SetVersion(1));
    }

    #[test]
    fn test_empty_name_rejected() {
        let manager = manager(AnonymousDuplicatePolicy::Deduplicate);
        let result = manager.update(|m| {
            m.add(Query::all("Cat"), SubscriptionOptions::named(""))?;
            Ok(())
        });
        assert!(matches!(result, Err(SyncError::InvalidOperation(_))));
        assert!(manager.subscriptions().is_empty());
    }

    #[test]
    fn test_dropped_transaction_releases_writer() {
        let manager = manager(AnonymousDuplicatePolicy::Deduplicate);
        {
            let mut tx = manager.begin_transaction().unwrap();
            tx.add(Query::all("Cat"), SubscriptionOptions::anonymous()).unwrap();
        }
        assert!(manager.subscriptions().is_empty());

        let set = manager
            .update(|m| {
                m.add(Query::all("Cat"), SubscriptionOptions::anonymous())?;
                Ok(())
            })
            .unwrap();
        assert_eq!(set.version(), SetVersion(1));
    }
}
