//! Resolving the server-side connection id behind a transaction.

use async_trait::async_trait;
use sea_orm::{
    ConnectionTrait, DatabaseConnection, DatabaseTransaction, DbBackend, DbErr, Statement,
};

use crate::error::{MonitorError, Result};
use crate::record::ConnectionId;

const MYSQL_CONNECTION_ID: &str = "SELECT CAST(CONNECTION_ID() AS SIGNED) AS connection_id";
const POSTGRES_CONNECTION_ID: &str = "SELECT CAST(pg_backend_pid() AS BIGINT) AS connection_id";

/// Anything that can report the id of the physical connection it runs on.
///
/// The lookup usually costs one round trip to the server and may fail; the
/// monitor treats a failure as "skip monitoring for this step".
#[async_trait]
pub trait ConnectionIdSource: Send + Sync {
    async fn connection_id(&self) -> Result<ConnectionId>;
}

#[async_trait]
impl ConnectionIdSource for DatabaseTransaction {
    async fn connection_id(&self) -> Result<ConnectionId> {
        query_connection_id(self).await
    }
}

#[async_trait]
impl ConnectionIdSource for DatabaseConnection {
    async fn connection_id(&self) -> Result<ConnectionId> {
        query_connection_id(self).await
    }
}

/// An id resolved earlier, for example once at `BEGIN`.
///
/// A transaction keeps its pooled connection for its whole life, so a cached
/// id stays valid even after the server has aborted the transaction and
/// refuses further queries on it.
#[async_trait]
impl ConnectionIdSource for ConnectionId {
    async fn connection_id(&self) -> Result<ConnectionId> {
        Ok(*self)
    }
}

/// Ask the server which connection `conn` is using.
///
/// Supported on MySQL (`CONNECTION_ID()`) and PostgreSQL (`pg_backend_pid()`).
/// SQLite has no server-side connection identity.
pub async fn query_connection_id<C>(conn: &C) -> Result<ConnectionId>
where
    C: ConnectionTrait,
{
    let backend = conn.get_database_backend();
    let sql = match backend {
        DbBackend::MySql => MYSQL_CONNECTION_ID,
        DbBackend::Postgres => POSTGRES_CONNECTION_ID,
        DbBackend::Sqlite => return Err(MonitorError::UnsupportedBackend("sqlite")),
    };

    let row = conn
        .query_one(Statement::from_string(backend, sql))
        .await?
        .ok_or_else(|| DbErr::RecordNotFound("connection id query returned no rows".into()))?;
    let raw: i64 = row.try_get("", "connection_id")?;

    u64::try_from(raw)
        .map(ConnectionId::from)
        .map_err(|_| MonitorError::InvalidConnectionId(raw))
}
