//! Connection reuse detection.
//!
//! A pool hands the same physical connection to unrelated transactions over
//! time. The resolver remembers which transaction handle last claimed each
//! connection id and reports when a different handle shows up on it, so the
//! registry can drop the previous owner's state before it absorbs statements
//! that belong to someone else.

use crate::record::{ConnectionId, TransactionHandle};
use crate::shard::ShardedMap;

/// Outcome of [`ReuseResolver::reconcile`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    /// The connection had no recorded owner; the handle now owns it.
    Claimed,
    /// The handle already owned the connection.
    Unchanged,
    /// The connection was owned by another handle, which must be evicted.
    Evicted(TransactionHandle),
}

/// Tracks which transaction handle currently owns each connection id.
pub struct ReuseResolver {
    owners: ShardedMap<ConnectionId, TransactionHandle>,
}

impl ReuseResolver {
    pub fn new() -> Self {
        Self {
            owners: ShardedMap::new(),
        }
    }

    /// Record that `handle` is running on `connection_id`.
    ///
    /// The ownership swap is a single atomic step per connection id, so two
    /// racing handles cannot both believe they claimed a vacant connection.
    pub fn reconcile(&self, connection_id: ConnectionId, handle: TransactionHandle) -> Reconciliation {
        match self.owners.insert(connection_id, handle) {
            None => Reconciliation::Claimed,
            Some(previous) if previous == handle => Reconciliation::Unchanged,
            Some(previous) => Reconciliation::Evicted(previous),
        }
    }

    /// Forget `handle`'s claim on `connection_id`, if it still holds one.
    pub fn release(&self, connection_id: ConnectionId, handle: TransactionHandle) -> bool {
        self.owners
            .remove_if(&connection_id, |owner| *owner == handle)
            .is_some()
    }

    pub fn owner(&self, connection_id: ConnectionId) -> Option<TransactionHandle> {
        self.owners.get(&connection_id)
    }

    /// Number of connections with a recorded owner.
    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ReuseResolver {
    fn default() -> Self {
        Self::new()
    }
}
