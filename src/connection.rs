//! SeaORM connection wrappers that feed the transaction monitor.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use sea_orm::{
    AccessMode, ConnectionTrait, DatabaseConnection, DatabaseTransaction, DbBackend, DbErr,
    ExecResult, IsolationLevel, QueryResult, Statement, StreamTrait, TransactionError,
    TransactionTrait,
};
use tracing::{field, warn, Instrument, Span};

use crate::config::MonitorConfig;
use crate::monitor::TxMonitor;
use crate::record::{ConnectionId, OperationKind, TransactionHandle};
use crate::source::ConnectionIdSource;

/// Database system name for span attributes.
fn db_system(backend: DbBackend) -> &'static str {
    match backend {
        DbBackend::Postgres => "postgresql",
        DbBackend::MySql => "mysql",
        DbBackend::Sqlite => "sqlite",
    }
}

fn statement_span(
    config: &MonitorConfig,
    backend: DbBackend,
    operation: OperationKind,
    sql: &str,
    handle: Option<TransactionHandle>,
) -> Span {
    let span = tracing::info_span!(
        "db.query",
        db.system = %db_system(backend),
        db.operation = %operation,
        db.statement = field::Empty,
        db.name = field::Empty,
        db.transaction = field::Empty,
        otel.status_code = field::Empty,
        error.message = field::Empty,
    );

    if let Some(db_name) = &config.database_name {
        span.record("db.name", db_name.as_str());
    }
    if let Some(handle) = handle {
        span.record("db.transaction", handle.as_u64());
    }
    if config.log_statements {
        span.record("db.statement", sql);
    }

    span
}

fn transaction_span(config: &MonitorConfig, backend: DbBackend, operation: &'static str) -> Span {
    let span = tracing::info_span!(
        "db.transaction",
        otel.name = operation,
        db.system = %db_system(backend),
        db.operation = operation,
        db.name = field::Empty,
        db.transaction = field::Empty,
        otel.status_code = field::Empty,
        error.message = field::Empty,
    );
    if let Some(db_name) = &config.database_name {
        span.record("db.name", db_name.as_str());
    }
    span
}

fn record_status<T>(span: &Span, result: &Result<T, DbErr>) {
    match result {
        Ok(_) => {
            span.record("otel.status_code", "OK");
        }
        Err(e) => {
            span.record("otel.status_code", "ERROR");
            span.record("error.message", e.to_string().as_str());
        }
    }
}

/// A SeaORM `DatabaseConnection` whose transactions are monitored.
///
/// Statements run directly on the connection are auto-committed and never
/// reach the monitor callback. Call [`begin`](MonitoredConnection::begin) to
/// open an explicit transaction; statements run through the returned
/// [`MonitoredTransaction`] are reported.
///
/// # Example
///
/// ```rust,ignore
/// use std::sync::Arc;
/// use sea_orm::Database;
/// use sea_orm_tx_monitor::{MonitorConfig, TxMonitor, TxMonitorExt};
///
/// let monitor = Arc::new(TxMonitor::new(MonitorConfig::default()));
/// monitor.register(|event| {
///     println!("{} statements in {:?}", event.record.statement_count(), event.duration);
/// })?;
///
/// let db = Database::connect("mysql://localhost/app").await?.with_tx_monitor(monitor);
/// let txn = db.begin().await?;
/// Users::insert(user).exec(&txn).await?;
/// txn.commit().await?;
/// ```
///
/// The wrapper is not `Clone`: with SeaORM's `mock` feature enabled
/// `DatabaseConnection` is not either. Share it behind an `Arc`.
#[derive(Debug)]
pub struct MonitoredConnection {
    inner: DatabaseConnection,
    monitor: Arc<TxMonitor>,
}

impl MonitoredConnection {
    pub fn new(connection: DatabaseConnection, monitor: Arc<TxMonitor>) -> Self {
        Self {
            inner: connection,
            monitor,
        }
    }

    /// Get a reference to the underlying `DatabaseConnection`.
    pub fn inner(&self) -> &DatabaseConnection {
        &self.inner
    }

    pub fn monitor(&self) -> &Arc<TxMonitor> {
        &self.monitor
    }

    /// Consume the wrapper and return the inner `DatabaseConnection`.
    pub fn into_inner(self) -> DatabaseConnection {
        self.inner
    }

    /// Open an explicit, monitored transaction.
    pub async fn begin(&self) -> Result<MonitoredTransaction, DbErr> {
        self.begin_with_config(None, None).await
    }

    /// Open an explicit, monitored transaction with the given isolation level
    /// and access mode.
    pub async fn begin_with_config(
        &self,
        isolation_level: Option<IsolationLevel>,
        access_mode: Option<AccessMode>,
    ) -> Result<MonitoredTransaction, DbErr> {
        let span = transaction_span(
            self.monitor.config(),
            self.inner.get_database_backend(),
            "BEGIN",
        );

        let result = self
            .inner
            .begin_with_config(isolation_level, access_mode)
            .instrument(span.clone())
            .await;
        record_status(&span, &result);
        let inner = result?;

        let handle = TransactionHandle::next();
        span.record("db.transaction", handle.as_u64());
        let connection_id = if self.monitor.is_registered() {
            match inner.connection_id().instrument(span.clone()).await {
                Ok(id) => Some(id),
                Err(e) => {
                    warn!(
                        handle = %handle,
                        error = %e,
                        "Failed to resolve connection id, transaction is not monitored"
                    );
                    None
                }
            }
        } else {
            None
        };
        if let Some(connection_id) = &connection_id {
            self.monitor
                .on_transaction_begin(handle, connection_id)
                .instrument(span)
                .await;
        }

        Ok(MonitoredTransaction {
            inner,
            connection_id,
            completion: Completion {
                handle,
                monitor: Arc::clone(&self.monitor),
            },
        })
    }

    /// Run `callback` in a monitored transaction, committing on `Ok` and
    /// rolling back on `Err`.
    ///
    /// ```rust,ignore
    /// let id = db
    ///     .transaction::<_, i64, DbErr>(|txn| {
    ///         Box::pin(async move {
    ///             let res = txn.execute_unprepared("INSERT INTO users (name) VALUES ('ada')").await?;
    ///             Ok(res.last_insert_id() as i64)
    ///         })
    ///     })
    ///     .await?;
    /// ```
    pub async fn transaction<F, T, E>(&self, callback: F) -> Result<T, TransactionError<E>>
    where
        F: for<'c> FnOnce(
                &'c MonitoredTransaction,
            ) -> Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'c>>
            + Send,
        T: Send,
        E: std::fmt::Display + std::fmt::Debug + Send,
    {
        self.transaction_with_config(callback, None, None).await
    }

    /// [`transaction`](MonitoredConnection::transaction) with an isolation
    /// level and access mode.
    pub async fn transaction_with_config<F, T, E>(
        &self,
        callback: F,
        isolation_level: Option<IsolationLevel>,
        access_mode: Option<AccessMode>,
    ) -> Result<T, TransactionError<E>>
    where
        F: for<'c> FnOnce(
                &'c MonitoredTransaction,
            ) -> Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'c>>
            + Send,
        T: Send,
        E: std::fmt::Display + std::fmt::Debug + Send,
    {
        let txn = self
            .begin_with_config(isolation_level, access_mode)
            .await
            .map_err(TransactionError::Connection)?;

        match callback(&txn).await {
            Ok(value) => {
                txn.commit().await.map_err(TransactionError::Connection)?;
                Ok(value)
            }
            Err(e) => {
                txn.rollback().await.map_err(TransactionError::Connection)?;
                Err(TransactionError::Transaction(e))
            }
        }
    }

    async fn forward<T, F>(&self, operation: OperationKind, sql: &str, call: F) -> Result<T, DbErr>
    where
        F: Future<Output = Result<T, DbErr>>,
    {
        let span = statement_span(
            self.monitor.config(),
            self.inner.get_database_backend(),
            operation,
            sql,
            None,
        );
        let result = call.instrument(span.clone()).await;
        record_status(&span, &result);
        result
    }
}

#[async_trait]
impl ConnectionTrait for MonitoredConnection {
    fn get_database_backend(&self) -> DbBackend {
        self.inner.get_database_backend()
    }

    async fn execute(&self, stmt: Statement) -> Result<ExecResult, DbErr> {
        let sql = stmt.sql.clone();
        self.forward(OperationKind::Execute, &sql, self.inner.execute(stmt))
            .await
    }

    async fn execute_unprepared(&self, sql: &str) -> Result<ExecResult, DbErr> {
        self.forward(OperationKind::Execute, sql, self.inner.execute_unprepared(sql))
            .await
    }

    async fn query_one(&self, stmt: Statement) -> Result<Option<QueryResult>, DbErr> {
        let sql = stmt.sql.clone();
        self.forward(OperationKind::Query, &sql, self.inner.query_one(stmt))
            .await
    }

    async fn query_all(&self, stmt: Statement) -> Result<Vec<QueryResult>, DbErr> {
        let sql = stmt.sql.clone();
        self.forward(OperationKind::Query, &sql, self.inner.query_all(stmt))
            .await
    }

    fn support_returning(&self) -> bool {
        self.inner.support_returning()
    }

    fn is_mock_connection(&self) -> bool {
        self.inner.is_mock_connection()
    }
}

impl StreamTrait for MonitoredConnection {
    type Stream<'a> = <DatabaseConnection as StreamTrait>::Stream<'a>;

    fn stream<'a>(
        &'a self,
        stmt: Statement,
    ) -> Pin<Box<dyn Future<Output = Result<Self::Stream<'a>, DbErr>> + 'a + Send>> {
        let span = statement_span(
            self.monitor.config(),
            self.inner.get_database_backend(),
            OperationKind::Query,
            &stmt.sql,
            None,
        );

        Box::pin(async move {
            let result = self.inner.stream(stmt).instrument(span.clone()).await;
            record_status(&span, &result);
            result
        })
    }
}

/// An explicit transaction whose statements are reported to the monitor.
///
/// The connection id is resolved once at `BEGIN` and reused for every
/// statement, so a statement that fails and aborts the transaction is still
/// reported. Dropping the transaction without
/// [`commit`](MonitoredTransaction::commit) or
/// [`rollback`](MonitoredTransaction::rollback) rolls back as SeaORM does and
/// tells the monitor the transaction is over.
pub struct MonitoredTransaction {
    inner: DatabaseTransaction,
    connection_id: Option<ConnectionId>,
    completion: Completion,
}

/// Reports the end of a transaction to the monitor when dropped.
struct Completion {
    handle: TransactionHandle,
    monitor: Arc<TxMonitor>,
}

impl Drop for Completion {
    fn drop(&mut self) {
        self.monitor.on_transaction_end(self.handle);
    }
}

impl MonitoredTransaction {
    pub fn handle(&self) -> TransactionHandle {
        self.completion.handle
    }

    /// Connection id resolved at `BEGIN`; `None` when the monitor was not
    /// registered or the backend could not tell.
    pub fn connection_id(&self) -> Option<ConnectionId> {
        self.connection_id
    }

    /// Get a reference to the underlying `DatabaseTransaction`.
    ///
    /// Statements run on it directly bypass the monitor.
    pub fn inner(&self) -> &DatabaseTransaction {
        &self.inner
    }

    pub async fn commit(self) -> Result<(), DbErr> {
        let span = self.completion_span("COMMIT");
        let Self {
            inner, completion, ..
        } = self;
        let result = inner.commit().instrument(span.clone()).await;
        record_status(&span, &result);
        drop(completion);
        result
    }

    pub async fn rollback(self) -> Result<(), DbErr> {
        let span = self.completion_span("ROLLBACK");
        let Self {
            inner, completion, ..
        } = self;
        let result = inner.rollback().instrument(span.clone()).await;
        record_status(&span, &result);
        drop(completion);
        result
    }

    fn monitor(&self) -> &TxMonitor {
        &self.completion.monitor
    }

    fn completion_span(&self, operation: &'static str) -> Span {
        let span = transaction_span(
            self.monitor().config(),
            self.inner.get_database_backend(),
            operation,
        );
        span.record("db.transaction", self.handle().as_u64());
        span
    }

    /// Run the statement on the inner transaction, then report it.
    async fn observe<T, F>(&self, operation: OperationKind, sql: &str, call: F) -> Result<T, DbErr>
    where
        F: Future<Output = Result<T, DbErr>>,
    {
        let span = statement_span(
            self.monitor().config(),
            self.inner.get_database_backend(),
            operation,
            sql,
            Some(self.handle()),
        );
        let result = call.instrument(span.clone()).await;
        record_status(&span, &result);

        if let Some(connection_id) = &self.connection_id {
            let error = result.as_ref().err();
            self.monitor()
                .on_statement_executed(self.handle(), connection_id, operation, sql, error)
                .instrument(span)
                .await;
        }
        result
    }
}

impl std::fmt::Debug for MonitoredTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitoredTransaction")
            .field("handle", &self.handle())
            .field("connection_id", &self.connection_id)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ConnectionTrait for MonitoredTransaction {
    fn get_database_backend(&self) -> DbBackend {
        self.inner.get_database_backend()
    }

    async fn execute(&self, stmt: Statement) -> Result<ExecResult, DbErr> {
        let sql = stmt.sql.clone();
        self.observe(OperationKind::Execute, &sql, self.inner.execute(stmt))
            .await
    }

    async fn execute_unprepared(&self, sql: &str) -> Result<ExecResult, DbErr> {
        self.observe(OperationKind::Execute, sql, self.inner.execute_unprepared(sql))
            .await
    }

    async fn query_one(&self, stmt: Statement) -> Result<Option<QueryResult>, DbErr> {
        let sql = stmt.sql.clone();
        self.observe(OperationKind::Query, &sql, self.inner.query_one(stmt))
            .await
    }

    async fn query_all(&self, stmt: Statement) -> Result<Vec<QueryResult>, DbErr> {
        let sql = stmt.sql.clone();
        self.observe(OperationKind::Query, &sql, self.inner.query_all(stmt))
            .await
    }

    fn support_returning(&self) -> bool {
        self.inner.support_returning()
    }

    fn is_mock_connection(&self) -> bool {
        self.inner.is_mock_connection()
    }
}

/// Streams are reported as a query once they are opened; rows fetched later
/// do not add to the statement's duration.
impl StreamTrait for MonitoredTransaction {
    type Stream<'a> = <DatabaseTransaction as StreamTrait>::Stream<'a>;

    fn stream<'a>(
        &'a self,
        stmt: Statement,
    ) -> Pin<Box<dyn Future<Output = Result<Self::Stream<'a>, DbErr>> + 'a + Send>> {
        Box::pin(async move {
            let sql = stmt.sql.clone();
            self.observe(OperationKind::Query, &sql, self.inner.stream(stmt))
                .await
        })
    }
}

/// Extension trait for easy wrapping of database connections.
pub trait TxMonitorExt {
    /// Wrap this connection so its explicit transactions report to `monitor`.
    fn with_tx_monitor(self, monitor: Arc<TxMonitor>) -> MonitoredConnection;
}

impl TxMonitorExt for DatabaseConnection {
    fn with_tx_monitor(self, monitor: Arc<TxMonitor>) -> MonitoredConnection {
        MonitoredConnection::new(self, monitor)
    }
}
