//! Configuration for transaction monitoring.

use std::time::Duration;

/// Configuration options for the transaction monitor.
///
/// # Example
///
/// ```rust
/// use sea_orm_tx_monitor::MonitorConfig;
/// use std::time::Duration;
///
/// let config = MonitorConfig::default()
///     .with_statement_logging(true)
///     .with_slow_transaction_threshold(Duration::from_millis(250));
/// ```
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Whether to include SQL text in log events.
    /// Default: `false` (statements may embed credentials or PII)
    pub log_statements: bool,

    /// A transaction whose elapsed time exceeds this at a monitored statement
    /// is logged at WARN level.
    /// Default: 1s
    pub slow_transaction_threshold: Duration,

    /// Whether commit and rollback drop the transaction's record.
    ///
    /// When disabled, records only disappear once their connection is reused
    /// by another transaction, so a record whose connection is never reused
    /// stays in memory until the monitor is unregistered.
    /// Default: `true`
    pub evict_on_completion: bool,

    /// Custom database name to include in spans (useful for multi-database setups).
    /// Default: `None`
    pub database_name: Option<String>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            log_statements: false,
            slow_transaction_threshold: Duration::from_secs(1),
            evict_on_completion: true,
            database_name: None,
        }
    }
}

impl MonitorConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable SQL text in log events.
    ///
    /// **Security Warning**: statement text may contain user data.
    pub fn with_statement_logging(mut self, enabled: bool) -> Self {
        self.log_statements = enabled;
        self
    }

    /// Set the elapsed-time threshold for slow transaction warnings.
    pub fn with_slow_transaction_threshold(mut self, threshold: Duration) -> Self {
        self.slow_transaction_threshold = threshold;
        self
    }

    /// Enable or disable dropping records on commit and rollback.
    pub fn with_eviction_on_completion(mut self, enabled: bool) -> Self {
        self.evict_on_completion = enabled;
        self
    }

    /// Set a database name to include in spans.
    pub fn with_database_name(mut self, name: impl Into<String>) -> Self {
        self.database_name = Some(name.into());
        self
    }

    /// Create a development-friendly configuration that logs statement text.
    ///
    /// **Warning**: Do not use in production as it logs all SQL.
    pub fn development() -> Self {
        Self {
            log_statements: true,
            slow_transaction_threshold: Duration::from_millis(100),
            ..Self::default()
        }
    }

    /// Create a production-safe configuration.
    pub fn production() -> Self {
        Self {
            log_statements: false,
            slow_transaction_threshold: Duration::from_secs(5),
            ..Self::default()
        }
    }
}
