//! Identifiers and per-transaction monitoring state.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use sea_orm::DbErr;

/// Process-wide serial for transaction handles.
static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

/// Opaque identifier for one logical transaction.
///
/// A handle is stable for the lifetime of the transaction it was minted for.
/// Handles are only compared, never dereferenced; the monitor does not own or
/// close whatever resource the handle names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionHandle(u64);

impl TransactionHandle {
    /// Mint a fresh handle from the process-wide serial.
    pub fn next() -> Self {
        Self(NEXT_HANDLE.fetch_add(1, Ordering::SeqCst))
    }

    /// Build a handle from a value the caller already tracks.
    ///
    /// Callers that derive handles themselves are responsible for keeping them
    /// unique among concurrently live transactions.
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransactionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx-{}", self.0)
    }
}

/// Server-assigned identifier of a physical database connection.
///
/// Pools hand the same connection to many transactions over time, so the same
/// `ConnectionId` shows up under different [`TransactionHandle`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl From<u64> for ConnectionId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of statement reported to the callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    /// A statement run for its side effects (`execute`, `execute_unprepared`).
    Execute,
    /// A statement run for its rows (`query_one`, `query_all`).
    Query,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Execute => "execute",
            OperationKind::Query => "query",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accumulated monitoring state for one transaction.
///
/// Created when the first statement of an explicit transaction is observed.
/// Statements are kept in execution order and the connection id never changes
/// after creation.
#[derive(Debug, Clone)]
pub struct TransactionRecord {
    start_time: Instant,
    statements: Vec<String>,
    connection_id: ConnectionId,
}

impl TransactionRecord {
    pub(crate) fn new(connection_id: ConnectionId) -> Self {
        Self {
            start_time: Instant::now(),
            statements: Vec::new(),
            connection_id,
        }
    }

    /// When the first statement of this transaction was observed.
    pub fn start_time(&self) -> Instant {
        self.start_time
    }

    /// Statement texts in the order they were executed.
    pub fn statements(&self) -> &[String] {
        &self.statements
    }

    pub fn statement_count(&self) -> usize {
        self.statements.len()
    }

    /// Connection the transaction was running on when the record was created.
    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Time since the first observed statement.
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub(crate) fn push(&mut self, statement: &str) {
        self.statements.push(statement.to_owned());
    }
}

/// Everything the callback learns about one monitored statement.
#[derive(Debug, Clone, Copy)]
pub struct StatementEvent<'a> {
    pub operation: OperationKind,
    /// The statement text, verbatim.
    pub statement: &'a str,
    /// Time from the transaction's first observed statement until now.
    pub duration: Duration,
    /// The record after this statement was appended.
    pub record: &'a TransactionRecord,
    /// Error returned by the real database operation, if any.
    pub error: Option<&'a DbErr>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handles_are_unique() {
        let a = TransactionHandle::next();
        let b = TransactionHandle::next();
        assert_ne!(a, b);
        assert!(b > a);
    }

    #[test]
    fn test_display_formats() {
        assert_eq!(TransactionHandle::from_raw(42).to_string(), "tx-42");
        assert_eq!(ConnectionId::new(7).to_string(), "7");
        assert_eq!(OperationKind::Query.to_string(), "query");
        assert_eq!(OperationKind::Execute.as_str(), "execute");
    }

    #[test]
    fn test_record_keeps_execution_order() {
        let mut record = TransactionRecord::new(ConnectionId::new(3));
        record.push("INSERT INTO users (name) VALUES ('a')");
        record.push("SELECT * FROM users");

        assert_eq!(record.statement_count(), 2);
        assert_eq!(record.statements()[0], "INSERT INTO users (name) VALUES ('a')");
        assert_eq!(record.statements()[1], "SELECT * FROM users");
        assert_eq!(record.connection_id(), ConnectionId::new(3));
        assert!(record.elapsed() >= Duration::ZERO);
    }
}
