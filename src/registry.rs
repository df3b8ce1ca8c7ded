//! In-flight transaction bookkeeping.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;

use crate::record::{ConnectionId, TransactionHandle, TransactionRecord};
use crate::resolver::{Reconciliation, ReuseResolver};
use crate::shard::ShardedMap;

pub(crate) type SharedRecord = Arc<Mutex<TransactionRecord>>;

/// Owns the three maps behind the monitor: records by handle, explicit
/// transactions with the connection they were last bound to, and connection
/// ownership.
///
/// Each map is safe for concurrent use on its own. Operations spanning maps
/// (eviction, completion) are not atomic as a whole; a handle evicted while
/// one of its statements is being recorded may briefly reappear and is then
/// cleaned up by the next reconciliation on that connection.
pub(crate) struct TransactionRegistry {
    records: ShardedMap<TransactionHandle, SharedRecord>,
    explicit: ShardedMap<TransactionHandle, Option<ConnectionId>>,
    connections: ReuseResolver,
}

impl TransactionRegistry {
    pub(crate) fn new() -> Self {
        Self {
            records: ShardedMap::new(),
            explicit: ShardedMap::new(),
            connections: ReuseResolver::new(),
        }
    }

    /// Mark `handle` as an explicit transaction. Returns `false` if it already was.
    pub(crate) fn mark_explicit(&self, handle: TransactionHandle) -> bool {
        self.explicit.insert_if_absent(handle, None)
    }

    pub(crate) fn is_explicit(&self, handle: TransactionHandle) -> bool {
        self.explicit.contains_key(&handle)
    }

    /// Bind `handle` to `connection_id`, evicting the state of whatever
    /// transaction previously ran on that connection.
    pub(crate) fn reconcile(
        &self,
        connection_id: ConnectionId,
        handle: TransactionHandle,
    ) -> Reconciliation {
        let outcome = self.connections.reconcile(connection_id, handle);
        self.explicit.update(&handle, |bound| *bound = Some(connection_id));
        if let Reconciliation::Evicted(previous) = outcome {
            let abandoned = self.evict(previous);
            info!(
                connection_id = %connection_id,
                previous = %previous,
                current = %handle,
                abandoned_statements = abandoned,
                "Connection reused by a new transaction"
            );
        }
        outcome
    }

    /// Record for `handle`, created on first use with `connection_id`.
    pub(crate) fn record_for(
        &self,
        handle: TransactionHandle,
        connection_id: ConnectionId,
    ) -> SharedRecord {
        self.records.get_or_insert_with(handle, || {
            Arc::new(Mutex::new(TransactionRecord::new(connection_id)))
        })
    }

    pub(crate) fn snapshot(&self, handle: TransactionHandle) -> Option<TransactionRecord> {
        self.records.get(&handle).map(|record| record.lock().clone())
    }

    /// Drop everything known about a finished transaction.
    ///
    /// The connection ownership entry is only released while it still points
    /// at `handle`; a newer owner is left alone. A transaction that never ran a
    /// statement has no record but may still own its connection.
    pub(crate) fn complete(&self, handle: TransactionHandle) -> Option<TransactionRecord> {
        let bound = self.explicit.remove(&handle).flatten();
        let record = self
            .records
            .remove(&handle)
            .map(|record| record.lock().clone());

        let owned = record
            .as_ref()
            .map(TransactionRecord::connection_id)
            .or(bound);
        if let Some(connection_id) = owned {
            self.connections.release(connection_id, handle);
        }
        record
    }

    /// Number of transactions with a live record.
    pub(crate) fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns the number of statements the evicted record held.
    fn evict(&self, handle: TransactionHandle) -> usize {
        self.explicit.remove(&handle);
        self.records
            .remove(&handle)
            .map(|record| record.lock().statement_count())
            .unwrap_or(0)
    }
}
