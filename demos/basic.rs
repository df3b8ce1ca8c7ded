//! Basic example showing how to monitor SeaORM transactions.
//!
//! Run with: DATABASE_URL=mysql://root@localhost/test cargo run --example basic

use std::sync::Arc;

use sea_orm::{ConnectionTrait, Database, DbErr, Statement};
use sea_orm_tx_monitor::prelude::*;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,sea_orm_tx_monitor=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| "mysql://root@localhost/test".into());

    let monitor = Arc::new(TxMonitor::new(MonitorConfig::development()));
    monitor.register(|event: &StatementEvent<'_>| {
        tracing::info!(
            operation = %event.operation,
            connection_id = %event.record.connection_id(),
            statements = event.record.statement_count(),
            elapsed_ms = event.duration.as_millis() as u64,
            failed = event.error.is_some(),
            "Monitored statement"
        );
    })?;

    tracing::info!("Connecting to database...");
    let db = Database::connect(&database_url).await?.with_tx_monitor(Arc::clone(&monitor));

    db.execute_unprepared("CREATE TABLE IF NOT EXISTS users (id INT AUTO_INCREMENT PRIMARY KEY, name VARCHAR(64))")
        .await?;

    // Not reported: auto-committed outside a transaction.
    db.execute_unprepared("INSERT INTO users (name) VALUES ('outside')")
        .await?;

    // Reported: three statements against one record.
    let txn = db.begin().await?;
    txn.execute_unprepared("INSERT INTO users (name) VALUES ('ada')")
        .await?;
    txn.execute_unprepared("INSERT INTO users (name) VALUES ('grace')")
        .await?;
    let count = txn
        .query_one(Statement::from_string(
            txn.get_database_backend(),
            "SELECT COUNT(*) AS total FROM users",
        ))
        .await?;
    if let Some(row) = count {
        tracing::info!(total = row.try_get::<i64>("", "total")?, "Users so far");
    }
    txn.commit().await?;

    // Reported and rolled back: the closure fails after its insert.
    let outcome = db
        .transaction::<_, (), DbErr>(|txn| {
            Box::pin(async move {
                txn.execute_unprepared("INSERT INTO users (name) VALUES ('rolled back')")
                    .await?;
                Err(DbErr::Custom("demo rollback".into()))
            })
        })
        .await;
    tracing::info!(rolled_back = outcome.is_err(), "Closure transaction finished");

    monitor.unregister()?;
    Ok(())
}
