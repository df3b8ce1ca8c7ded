//! # sea-orm-tx-monitor
//!
//! Transaction-level statement monitoring for SeaORM.
//!
//! Every statement executed inside an explicit transaction is reported to a
//! callback together with the transaction's accumulated record: when it
//! started, every statement it has run so far in execution order, and the
//! server-side id of the connection it runs on.
//!
//! The only identity available while a statement runs is a pooled connection
//! that many transactions share over time. The monitor therefore tracks two
//! signals side by side: a [`TransactionHandle`] minted per transaction, and
//! the [`ConnectionId`] reported by the server. When a connection id turns up
//! under a new handle, state left behind by the previous transaction on that
//! connection is evicted so statement logs never leak between transactions.
//!
//! ## Features
//!
//! - **Explicit transactions only**: auto-committed statements are never reported
//! - **Connection reuse detection**: stale records are evicted on pool reuse
//! - **Best effort**: monitoring failures never affect the real database operation
//! - **Structured logging**: bookkeeping and slow transactions are logged through `tracing`
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use sea_orm::Database;
//! use sea_orm_tx_monitor::prelude::*;
//!
//! let monitor = Arc::new(TxMonitor::new(MonitorConfig::default()));
//! monitor.register(|event| {
//!     tracing::info!(
//!         operation = %event.operation,
//!         statements = event.record.statement_count(),
//!         elapsed_ms = event.duration.as_millis() as u64,
//!         "statement finished"
//!     );
//! })?;
//!
//! let db = Database::connect("mysql://localhost/app").await?.with_tx_monitor(monitor.clone());
//!
//! let txn = db.begin().await?;
//! Users::insert(user).exec(&txn).await?;   // reported
//! txn.commit().await?;
//!
//! monitor.unregister()?;
//! ```
//!
//! ## Custom collaborators
//!
//! Other drivers can call the hooks directly: implement [`ConnectionIdSource`]
//! for the driver's transaction type and invoke
//! [`TxMonitor::on_transaction_begin`], [`TxMonitor::on_statement_executed`]
//! and [`TxMonitor::on_transaction_end`] at the matching points.

mod config;
mod connection;
mod error;
mod monitor;
mod record;
mod registry;
mod resolver;
mod shard;
mod source;

pub use config::MonitorConfig;
pub use connection::{MonitoredConnection, MonitoredTransaction, TxMonitorExt};
pub use error::{MonitorError, Result};
pub use monitor::{StatementCallback, TxMonitor};
pub use record::{ConnectionId, OperationKind, StatementEvent, TransactionHandle, TransactionRecord};
pub use resolver::{Reconciliation, ReuseResolver};
pub use source::{query_connection_id, ConnectionIdSource};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        MonitorConfig, MonitoredConnection, MonitoredTransaction, StatementEvent, TxMonitor,
        TxMonitorExt,
    };
}
