//! The transaction monitor: registration and the two instrumentation hooks.

use std::sync::Arc;

use parking_lot::RwLock;
use sea_orm::DbErr;
use tracing::{debug, info, trace, warn};

use crate::config::MonitorConfig;
use crate::error::{MonitorError, Result};
use crate::record::{
    ConnectionId, OperationKind, StatementEvent, TransactionHandle, TransactionRecord,
};
use crate::registry::TransactionRegistry;
use crate::source::ConnectionIdSource;

/// Callback invoked once per monitored statement.
pub type StatementCallback = dyn Fn(&StatementEvent<'_>) + Send + Sync;

/// State that lives exactly as long as one registration.
struct Registration {
    callback: Box<StatementCallback>,
    registry: TransactionRegistry,
}

/// Correlates executed statements with the explicit transaction that issued
/// them.
///
/// The monitor is inert until [`register`](TxMonitor::register) installs a
/// callback. While registered, collaborators report two events:
///
/// - [`on_transaction_begin`](TxMonitor::on_transaction_begin) when a caller
///   opens an explicit transaction, and
/// - [`on_statement_executed`](TxMonitor::on_statement_executed) after every
///   statement run inside one.
///
/// Statements on handles that never went through the begin hook are ignored.
/// Monitoring is best-effort: hooks never fail and never alter the outcome of
/// the database operation they observe.
///
/// # Callback contract
///
/// The callback runs inline on the thread executing the statement, after the
/// statement has been appended to the record, while holding that record's
/// lock. It must be fast, must not panic, and must not call back into the
/// same monitor (including `register`/`unregister`).
pub struct TxMonitor {
    config: MonitorConfig,
    active: RwLock<Option<Arc<Registration>>>,
}

impl TxMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            config,
            active: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Install `callback` and start monitoring with empty state.
    ///
    /// Fails with [`MonitorError::AlreadyRegistered`] if a callback is
    /// already installed.
    pub fn register<F>(&self, callback: F) -> Result<()>
    where
        F: Fn(&StatementEvent<'_>) + Send + Sync + 'static,
    {
        let mut active = self.active.write();
        if active.is_some() {
            return Err(MonitorError::AlreadyRegistered);
        }
        *active = Some(Arc::new(Registration {
            callback: Box::new(callback),
            registry: TransactionRegistry::new(),
        }));

        info!(
            db.name = self.config.database_name.as_deref(),
            evict_on_completion = self.config.evict_on_completion,
            "Transaction monitor registered"
        );
        Ok(())
    }

    /// Remove the callback and drop all monitoring state.
    ///
    /// Returns once every callback already running has finished; no callback
    /// starts afterwards, even for statements that were mid-flight. Fails with
    /// [`MonitorError::NotRegistered`] if nothing is registered.
    pub fn unregister(&self) -> Result<()> {
        let registration = self.active.write().take().ok_or(MonitorError::NotRegistered)?;
        info!(
            abandoned_transactions = registration.registry.len(),
            "Transaction monitor unregistered"
        );
        Ok(())
    }

    pub fn is_registered(&self) -> bool {
        self.active.read().is_some()
    }

    fn current(&self) -> Option<Arc<Registration>> {
        self.active.read().clone()
    }

    /// Hook: an explicit transaction identified by `handle` is starting.
    ///
    /// Marks the handle explicit and claims its connection, evicting stale
    /// state left by an earlier transaction on the same connection. Calling it
    /// again for the same handle does nothing.
    pub async fn on_transaction_begin<S>(&self, handle: TransactionHandle, source: &S)
    where
        S: ConnectionIdSource + ?Sized,
    {
        let Some(registration) = self.current() else {
            return;
        };
        if !registration.registry.mark_explicit(handle) {
            trace!(handle = %handle, "Transaction already marked explicit");
            return;
        }

        let connection_id = match source.connection_id().await {
            Ok(id) => id,
            Err(e) => {
                warn!(handle = %handle, error = %e, "Failed to resolve connection id at begin");
                return;
            }
        };

        debug!(
            handle = %handle,
            connection_id = %connection_id,
            "Explicit transaction started"
        );
        registration.registry.reconcile(connection_id, handle);
    }

    /// Hook: a statement finished executing inside the transaction `handle`.
    ///
    /// `error` is the real operation's error, forwarded to the callback as-is.
    pub async fn on_statement_executed<S>(
        &self,
        handle: TransactionHandle,
        source: &S,
        operation: OperationKind,
        statement: &str,
        error: Option<&DbErr>,
    ) where
        S: ConnectionIdSource + ?Sized,
    {
        let Some(registration) = self.current() else {
            return;
        };
        if !registration.registry.is_explicit(handle) {
            trace!(handle = %handle, "Statement outside an explicit transaction, skipping");
            return;
        }

        let connection_id = match source.connection_id().await {
            Ok(id) => id,
            Err(e) => {
                warn!(handle = %handle, error = %e, "Failed to resolve connection id, skipping statement");
                return;
            }
        };

        self.record_statement(&registration, handle, connection_id, operation, statement, error);
    }

    fn record_statement(
        &self,
        registration: &Arc<Registration>,
        handle: TransactionHandle,
        connection_id: ConnectionId,
        operation: OperationKind,
        statement: &str,
        error: Option<&DbErr>,
    ) {
        // Held until the callback returns so unregister waits for us.
        let active = self.active.read();
        match active.as_ref() {
            Some(current) if Arc::ptr_eq(current, registration) => {}
            _ => return,
        }

        let registry = &registration.registry;
        registry.reconcile(connection_id, handle);

        let record = registry.record_for(handle, connection_id);
        let mut record = record.lock();
        record.push(statement);
        let duration = record.elapsed();

        debug!(
            handle = %handle,
            connection_id = %connection_id,
            operation = %operation,
            statement = self.config.log_statements.then_some(statement),
            statement_count = record.statement_count(),
            duration_ms = duration.as_millis() as u64,
            "Statement recorded"
        );
        if duration > self.config.slow_transaction_threshold {
            warn!(
                handle = %handle,
                connection_id = %connection_id,
                duration_ms = duration.as_millis() as u64,
                threshold_ms = self.config.slow_transaction_threshold.as_millis() as u64,
                "Slow transaction detected"
            );
        }

        (registration.callback)(&StatementEvent {
            operation,
            statement,
            duration,
            record: &*record,
            error,
        });
    }

    /// Hook: the transaction `handle` committed or rolled back.
    ///
    /// Drops its record when `evict_on_completion` is enabled; otherwise the
    /// record lingers until its connection is reused.
    pub fn on_transaction_end(&self, handle: TransactionHandle) {
        if !self.config.evict_on_completion {
            return;
        }
        let Some(registration) = self.current() else {
            return;
        };
        if let Some(record) = registration.registry.complete(handle) {
            debug!(
                handle = %handle,
                connection_id = %record.connection_id(),
                statement_count = record.statement_count(),
                duration_ms = record.elapsed().as_millis() as u64,
                "Transaction finished"
            );
        }
    }

    /// Copy of the current record for `handle`, if one exists.
    pub fn snapshot(&self, handle: TransactionHandle) -> Option<TransactionRecord> {
        self.current()?.registry.snapshot(handle)
    }

    pub fn is_explicit(&self, handle: TransactionHandle) -> bool {
        self.current()
            .is_some_and(|registration| registration.registry.is_explicit(handle))
    }

    /// Number of transactions with a live record.
    pub fn active_transactions(&self) -> usize {
        self.current()
            .map(|registration| registration.registry.len())
            .unwrap_or(0)
    }
}

impl Default for TxMonitor {
    fn default() -> Self {
        Self::new(MonitorConfig::default())
    }
}

impl std::fmt::Debug for TxMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxMonitor")
            .field("config", &self.config)
            .field("registered", &self.is_registered())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
    use std::time::Duration;

    use parking_lot::Mutex;
    use tokio::sync::{Notify, Semaphore};

    /// A pooled connection whose server-side id can be changed by the test.
    struct FakeConnection {
        id: AtomicU64,
        broken: AtomicBool,
    }

    impl FakeConnection {
        fn new(id: u64) -> Self {
            Self {
                id: AtomicU64::new(id),
                broken: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl ConnectionIdSource for FakeConnection {
        async fn connection_id(&self) -> Result<ConnectionId> {
            if self.broken.load(Ordering::SeqCst) {
                return Err(MonitorError::ConnectionId(DbErr::Custom(
                    "connection closed".into(),
                )));
            }
            Ok(ConnectionId::new(self.id.load(Ordering::SeqCst)))
        }
    }

    /// Blocks id resolution until the test releases it, and signals once a
    /// statement is waiting on it.
    struct GatedConnection {
        entered: Notify,
        gate: Semaphore,
    }

    #[async_trait]
    impl ConnectionIdSource for GatedConnection {
        async fn connection_id(&self) -> Result<ConnectionId> {
            self.entered.notify_one();
            let _permit = self.gate.acquire().await.expect("gate closed");
            Ok(ConnectionId::new(1))
        }
    }

    #[derive(Debug, Clone)]
    struct Seen {
        operation: OperationKind,
        statement: String,
        duration: Duration,
        statements: Vec<String>,
        connection_id: ConnectionId,
        error: Option<String>,
    }

    fn recording_monitor(config: MonitorConfig) -> (Arc<TxMonitor>, Arc<Mutex<Vec<Seen>>>) {
        let monitor = Arc::new(TxMonitor::new(config));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        monitor
            .register(move |event: &StatementEvent<'_>| {
                sink.lock().push(Seen {
                    operation: event.operation,
                    statement: event.statement.to_owned(),
                    duration: event.duration,
                    statements: event.record.statements().to_vec(),
                    connection_id: event.record.connection_id(),
                    error: event.error.map(|e| e.to_string()),
                });
            })
            .expect("register");
        (monitor, seen)
    }

    #[tokio::test]
    async fn test_statement_outside_transaction_is_ignored() {
        let (monitor, seen) = recording_monitor(MonitorConfig::default());
        let conn = FakeConnection::new(1);

        monitor
            .on_statement_executed(
                TransactionHandle::next(),
                &conn,
                OperationKind::Execute,
                "INSERT INTO users (name) VALUES ('a')",
                None,
            )
            .await;

        assert!(seen.lock().is_empty());
        assert_eq!(monitor.active_transactions(), 0);
    }

    #[tokio::test]
    async fn test_explicit_transaction_reports_every_statement() {
        let (monitor, seen) = recording_monitor(MonitorConfig::default());
        let conn = FakeConnection::new(5);
        let tx = TransactionHandle::next();

        monitor.on_transaction_begin(tx, &conn).await;
        let statements = [
            (OperationKind::Execute, "INSERT INTO users (name) VALUES ('a')"),
            (OperationKind::Execute, "INSERT INTO users (name) VALUES ('b')"),
            (OperationKind::Query, "SELECT * FROM users LIMIT 1"),
        ];
        for (operation, sql) in statements {
            monitor.on_statement_executed(tx, &conn, operation, sql, None).await;
        }

        let seen = seen.lock();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[2].operation, OperationKind::Query);
        assert_eq!(seen[2].statement, "SELECT * FROM users LIMIT 1");
        assert_eq!(
            seen[2].statements,
            statements.iter().map(|(_, sql)| sql.to_string()).collect::<Vec<_>>()
        );
        for (i, event) in seen.iter().enumerate() {
            assert_eq!(event.statements.len(), i + 1);
            assert_eq!(event.connection_id, ConnectionId::new(5));
        }
    }

    #[tokio::test]
    async fn test_reused_connection_starts_fresh_record() {
        let config = MonitorConfig::default().with_eviction_on_completion(false);
        let (monitor, seen) = recording_monitor(config);
        let conn = FakeConnection::new(7);

        let a = TransactionHandle::next();
        monitor.on_transaction_begin(a, &conn).await;
        monitor
            .on_statement_executed(a, &conn, OperationKind::Execute, "INSERT INTO a VALUES (1)", None)
            .await;
        monitor
            .on_statement_executed(a, &conn, OperationKind::Execute, "INSERT INTO a VALUES (2)", None)
            .await;
        monitor.on_transaction_end(a);
        assert!(monitor.snapshot(a).is_some(), "record kept without eviction on completion");

        let b = TransactionHandle::next();
        monitor.on_transaction_begin(b, &conn).await;
        assert!(monitor.snapshot(a).is_none());
        assert!(!monitor.is_explicit(a));

        monitor
            .on_statement_executed(b, &conn, OperationKind::Query, "SELECT * FROM b", None)
            .await;

        let last = seen.lock().last().cloned().expect("event");
        assert_eq!(last.statements, vec!["SELECT * FROM b".to_string()]);
        assert_eq!(monitor.snapshot(b).map(|r| r.statement_count()), Some(1));

        // a's handle is no longer explicit, so late statements on it are dropped
        monitor
            .on_statement_executed(a, &conn, OperationKind::Execute, "INSERT INTO a VALUES (3)", None)
            .await;
        assert_eq!(seen.lock().len(), 3);
    }

    #[tokio::test]
    async fn test_reuse_detected_between_begin_and_statement() {
        let config = MonitorConfig::default().with_eviction_on_completion(false);
        let (monitor, seen) = recording_monitor(config);
        let first = FakeConnection::new(1);
        let second = FakeConnection::new(2);

        let a = TransactionHandle::next();
        let b = TransactionHandle::next();
        monitor.on_transaction_begin(a, &first).await;
        monitor.on_transaction_begin(b, &second).await;
        monitor
            .on_statement_executed(a, &first, OperationKind::Execute, "UPDATE t SET x = 1", None)
            .await;

        // The pool moved b onto a's connection before b ran anything.
        second.id.store(1, Ordering::SeqCst);
        monitor
            .on_statement_executed(b, &second, OperationKind::Execute, "UPDATE t SET x = 2", None)
            .await;

        assert!(monitor.snapshot(a).is_none());
        let record = monitor.snapshot(b).expect("b record");
        assert_eq!(record.statements(), ["UPDATE t SET x = 2".to_string()]);
        assert_eq!(record.connection_id(), ConnectionId::new(1));
        assert_eq!(seen.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_register_twice_fails() {
        let monitor = TxMonitor::default();
        monitor.register(|_: &StatementEvent<'_>| {}).expect("first register");

        let err = monitor.register(|_: &StatementEvent<'_>| {}).unwrap_err();
        assert!(matches!(err, MonitorError::AlreadyRegistered));
        assert!(monitor.is_registered());
    }

    #[tokio::test]
    async fn test_unregister_without_register_fails() {
        let monitor = TxMonitor::default();
        assert!(matches!(monitor.unregister(), Err(MonitorError::NotRegistered)));

        monitor.register(|_: &StatementEvent<'_>| {}).expect("register");
        monitor.unregister().expect("unregister");
        assert!(matches!(monitor.unregister(), Err(MonitorError::NotRegistered)));
        assert!(!monitor.is_registered());
    }

    #[tokio::test]
    async fn test_no_callbacks_after_unregister() {
        let (monitor, seen) = recording_monitor(MonitorConfig::default());
        let conn = FakeConnection::new(3);
        let tx = TransactionHandle::next();
        monitor.on_transaction_begin(tx, &conn).await;

        monitor.unregister().expect("unregister");
        monitor
            .on_statement_executed(tx, &conn, OperationKind::Execute, "DELETE FROM users", None)
            .await;

        assert!(seen.lock().is_empty());
        assert_eq!(monitor.active_transactions(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_unregister_stops_in_flight_statement() {
        let (monitor, seen) = recording_monitor(MonitorConfig::default());
        let tx = TransactionHandle::next();
        monitor.on_transaction_begin(tx, &FakeConnection::new(1)).await;

        let gated = Arc::new(GatedConnection {
            entered: Notify::new(),
            gate: Semaphore::new(0),
        });
        let in_flight = {
            let monitor = Arc::clone(&monitor);
            let gated = Arc::clone(&gated);
            tokio::spawn(async move {
                monitor
                    .on_statement_executed(tx, &*gated, OperationKind::Execute, "SELECT 1", None)
                    .await;
            })
        };

        // the statement has been admitted and is suspended in id resolution
        gated.entered.notified().await;
        monitor.unregister().expect("unregister");
        gated.gate.add_permits(1);
        in_flight.await.expect("task");

        assert!(seen.lock().is_empty());
    }

    #[tokio::test]
    async fn test_reregister_starts_with_empty_state() {
        let (monitor, _seen) = recording_monitor(MonitorConfig::default());
        let conn = FakeConnection::new(9);
        let tx = TransactionHandle::next();
        monitor.on_transaction_begin(tx, &conn).await;
        monitor
            .on_statement_executed(tx, &conn, OperationKind::Execute, "SELECT 1", None)
            .await;
        assert_eq!(monitor.active_transactions(), 1);

        monitor.unregister().expect("unregister");
        monitor.register(|_: &StatementEvent<'_>| {}).expect("register again");
        assert_eq!(monitor.active_transactions(), 0);
        assert!(!monitor.is_explicit(tx));
    }

    #[tokio::test]
    async fn test_begin_is_idempotent() {
        let (monitor, seen) = recording_monitor(MonitorConfig::default());
        let conn = FakeConnection::new(4);
        let tx = TransactionHandle::next();

        monitor.on_transaction_begin(tx, &conn).await;
        monitor
            .on_statement_executed(tx, &conn, OperationKind::Execute, "INSERT INTO t VALUES (1)", None)
            .await;
        monitor.on_transaction_begin(tx, &conn).await;
        monitor
            .on_statement_executed(tx, &conn, OperationKind::Execute, "INSERT INTO t VALUES (2)", None)
            .await;

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].statements.len(), 2);
        assert_eq!(monitor.active_transactions(), 1);
    }

    #[tokio::test]
    async fn test_duration_never_decreases() {
        let (monitor, seen) = recording_monitor(MonitorConfig::default());
        let conn = FakeConnection::new(2);
        let tx = TransactionHandle::next();

        monitor.on_transaction_begin(tx, &conn).await;
        for i in 0..5 {
            monitor
                .on_statement_executed(tx, &conn, OperationKind::Execute, &format!("SELECT {i}"), None)
                .await;
            tokio::time::sleep(Duration::from_millis(2)).await;
        }

        let seen = seen.lock();
        assert_eq!(seen.len(), 5);
        for pair in seen.windows(2) {
            assert!(pair[1].duration >= pair[0].duration);
        }
        assert!(seen[4].duration >= Duration::from_millis(8));
    }

    #[tokio::test]
    async fn test_resolution_failure_skips_statement() {
        let (monitor, seen) = recording_monitor(MonitorConfig::default());
        let conn = FakeConnection::new(6);
        let tx = TransactionHandle::next();
        monitor.on_transaction_begin(tx, &conn).await;

        conn.broken.store(true, Ordering::SeqCst);
        monitor
            .on_statement_executed(tx, &conn, OperationKind::Execute, "SELECT 1", None)
            .await;
        assert!(seen.lock().is_empty());

        conn.broken.store(false, Ordering::SeqCst);
        monitor
            .on_statement_executed(tx, &conn, OperationKind::Execute, "SELECT 2", None)
            .await;
        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].statements, vec!["SELECT 2".to_string()]);
    }

    #[tokio::test]
    async fn test_database_error_is_forwarded() {
        let (monitor, seen) = recording_monitor(MonitorConfig::default());
        let conn = FakeConnection::new(8);
        let tx = TransactionHandle::next();
        monitor.on_transaction_begin(tx, &conn).await;

        let failure = DbErr::Custom("duplicate key".into());
        monitor
            .on_statement_executed(
                tx,
                &conn,
                OperationKind::Execute,
                "INSERT INTO users (id) VALUES (1)",
                Some(&failure),
            )
            .await;

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].error.as_deref(), Some(failure.to_string().as_str()));
        assert_eq!(seen[0].statements.len(), 1);
    }

    #[tokio::test]
    async fn test_completion_drops_record() {
        let (monitor, _seen) = recording_monitor(MonitorConfig::default());
        let conn = FakeConnection::new(11);
        let tx = TransactionHandle::next();
        monitor.on_transaction_begin(tx, &conn).await;
        monitor
            .on_statement_executed(tx, &conn, OperationKind::Execute, "SELECT 1", None)
            .await;

        monitor.on_transaction_end(tx);
        assert!(monitor.snapshot(tx).is_none());
        assert!(!monitor.is_explicit(tx));
        assert_eq!(monitor.active_transactions(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_transactions_on_shared_pool() {
        const TRANSACTIONS: u64 = 50;
        const STATEMENTS: usize = 100;

        let monitor = Arc::new(TxMonitor::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let last_counts: Arc<Mutex<HashMap<ConnectionId, usize>>> = Arc::default();
        {
            let calls = Arc::clone(&calls);
            let last_counts = Arc::clone(&last_counts);
            monitor
                .register(move |event: &StatementEvent<'_>| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    last_counts
                        .lock()
                        .insert(event.record.connection_id(), event.record.statement_count());
                })
                .expect("register");
        }

        let tasks: Vec<_> = (0..TRANSACTIONS)
            .map(|n| {
                let monitor = Arc::clone(&monitor);
                tokio::spawn(async move {
                    let conn = FakeConnection::new(100 + n);
                    let tx = TransactionHandle::next();
                    monitor.on_transaction_begin(tx, &conn).await;
                    for i in 0..STATEMENTS {
                        let sql = format!("INSERT INTO users (name) VALUES ('task {n} user {i}')");
                        monitor
                            .on_statement_executed(tx, &conn, OperationKind::Execute, &sql, None)
                            .await;
                    }
                    let record = monitor.snapshot(tx).expect("record");
                    monitor.on_transaction_end(tx);
                    record
                })
            })
            .collect();

        for task in tasks {
            let record = task.await.expect("task");
            assert_eq!(record.statement_count(), STATEMENTS);
        }

        assert_eq!(calls.load(Ordering::SeqCst), TRANSACTIONS as usize * STATEMENTS);
        let last_counts = last_counts.lock();
        assert_eq!(last_counts.len(), TRANSACTIONS as usize);
        assert!(last_counts.values().all(|count| *count == STATEMENTS));
        assert_eq!(monitor.active_transactions(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_pool_reuse_under_concurrency() {
        const CONNECTIONS: u64 = 10;
        const ROUNDS: usize = 5;
        const STATEMENTS: usize = 20;

        let config = MonitorConfig::default().with_eviction_on_completion(false);
        let monitor = Arc::new(TxMonitor::new(config));
        let calls = Arc::new(AtomicUsize::new(0));
        let overflow = Arc::new(AtomicBool::new(false));
        {
            let calls = Arc::clone(&calls);
            let overflow = Arc::clone(&overflow);
            monitor
                .register(move |event: &StatementEvent<'_>| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    if event.record.statement_count() > STATEMENTS {
                        overflow.store(true, Ordering::SeqCst);
                    }
                })
                .expect("register");
        }

        // Each connection serves several transactions back to back.
        let tasks: Vec<_> = (0..CONNECTIONS)
            .map(|id| {
                let monitor = Arc::clone(&monitor);
                tokio::spawn(async move {
                    let conn = FakeConnection::new(id);
                    for _ in 0..ROUNDS {
                        let tx = TransactionHandle::next();
                        monitor.on_transaction_begin(tx, &conn).await;
                        for i in 0..STATEMENTS {
                            monitor
                                .on_statement_executed(
                                    tx,
                                    &conn,
                                    OperationKind::Execute,
                                    &format!("UPDATE accounts SET n = {i}"),
                                    None,
                                )
                                .await;
                        }
                        monitor.on_transaction_end(tx);
                    }
                })
            })
            .collect();
        for task in tasks {
            task.await.expect("task");
        }

        assert_eq!(
            calls.load(Ordering::SeqCst),
            CONNECTIONS as usize * ROUNDS * STATEMENTS
        );
        assert!(!overflow.load(Ordering::SeqCst), "statements leaked across transactions");
        // Only the last transaction on each connection is still tracked.
        assert_eq!(monitor.active_transactions(), CONNECTIONS as usize);
    }
}
