//! Errors surfaced by the transaction monitor.

use sea_orm::DbErr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("transaction monitor already registered")]
    AlreadyRegistered,
    #[error("transaction monitor not registered")]
    NotRegistered,
    #[error("failed to resolve connection id: {0}")]
    ConnectionId(#[from] DbErr),
    #[error("connection id introspection is not supported on {0}")]
    UnsupportedBackend(&'static str),
    #[error("server returned an invalid connection id: {0}")]
    InvalidConnectionId(i64),
}

pub type Result<T, E = MonitorError> = std::result::Result<T, E>;
