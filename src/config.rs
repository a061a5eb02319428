//! Connection configuration shared by the queue and pool façades.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::connection::Database;
use crate::error::Result;

/// What happens when SQLite reports `SQLITE_BUSY`.
#[derive(Clone, Copy)]
pub enum BusyMode {
    /// Fail immediately with the busy error.
    ImmediateError,
    /// Let SQLite retry for up to the given duration.
    Timeout(Duration),
    /// Invoke the callback with the number of prior attempts; returning
    /// `false` aborts the wait.
    Callback(fn(i32) -> bool),
}

impl fmt::Debug for BusyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ImmediateError => f.write_str("ImmediateError"),
            Self::Timeout(duration) => f.debug_tuple("Timeout").field(duration).finish(),
            Self::Callback(_) => f.write_str("Callback(..)"),
        }
    }
}

/// SQLite transaction kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionKind {
    Deferred,
    Immediate,
    Exclusive,
}

impl TransactionKind {
    #[must_use]
    pub(crate) fn begin_sql(self) -> &'static str {
        match self {
            Self::Deferred => "BEGIN DEFERRED TRANSACTION",
            Self::Immediate => "BEGIN IMMEDIATE TRANSACTION",
            Self::Exclusive => "BEGIN EXCLUSIVE TRANSACTION",
        }
    }
}

type PrepareConnection = Arc<dyn Fn(&mut Database) -> Result<()> + Send + Sync>;

/// Database configuration.
///
/// External collaborators (file attributes, encryption passphrases) hook in
/// through [`Config::prepare_connection`], which runs on every connection
/// right after it opens.
#[derive(Clone)]
pub struct Config {
    /// Open the file read-only.
    pub readonly: bool,
    /// `PRAGMA foreign_keys = ON` at open time.
    pub foreign_keys_enabled: bool,
    pub busy_mode: BusyMode,
    /// Kind used by façade-level write transactions.
    pub default_transaction_kind: TransactionKind,
    /// Statement tracer, invoked with each SQL string as it runs.
    pub trace: Option<fn(&str)>,
    /// Upper bound on pool reader connections.
    pub maximum_reader_count: usize,
    /// Capacity of the per-connection prepared statement cache; `None` keeps
    /// the driver default.
    pub statement_cache_capacity: Option<usize>,
    pub(crate) prepare_connection: Option<PrepareConnection>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            readonly: false,
            foreign_keys_enabled: true,
            busy_mode: BusyMode::ImmediateError,
            default_transaction_kind: TransactionKind::Immediate,
            trace: None,
            maximum_reader_count: 5,
            statement_cache_capacity: None,
            prepare_connection: None,
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("readonly", &self.readonly)
            .field("foreign_keys_enabled", &self.foreign_keys_enabled)
            .field("busy_mode", &self.busy_mode)
            .field("default_transaction_kind", &self.default_transaction_kind)
            .field("trace", &self.trace.map(|_| ".."))
            .field("maximum_reader_count", &self.maximum_reader_count)
            .field("statement_cache_capacity", &self.statement_cache_capacity)
            .field("prepare_connection", &self.prepare_connection.as_ref().map(|_| ".."))
            .finish()
    }
}

impl Config {
    #[must_use]
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }
}

/// Fluent builder for [`Config`].
#[derive(Clone, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    #[must_use]
    pub fn readonly(mut self, readonly: bool) -> Self {
        self.config.readonly = readonly;
        self
    }

    #[must_use]
    pub fn foreign_keys(mut self, enabled: bool) -> Self {
        self.config.foreign_keys_enabled = enabled;
        self
    }

    #[must_use]
    pub fn busy_mode(mut self, mode: BusyMode) -> Self {
        self.config.busy_mode = mode;
        self
    }

    #[must_use]
    pub fn default_transaction_kind(mut self, kind: TransactionKind) -> Self {
        self.config.default_transaction_kind = kind;
        self
    }

    #[must_use]
    pub fn trace(mut self, tracer: fn(&str)) -> Self {
        self.config.trace = Some(tracer);
        self
    }

    #[must_use]
    pub fn maximum_reader_count(mut self, count: usize) -> Self {
        self.config.maximum_reader_count = count.max(1);
        self
    }

    #[must_use]
    pub fn statement_cache_capacity(mut self, capacity: usize) -> Self {
        self.config.statement_cache_capacity = Some(capacity);
        self
    }

    /// Hook running on every freshly opened connection, before it is handed
    /// to the façade.
    #[must_use]
    pub fn prepare_connection<F>(mut self, prepare: F) -> Self
    where
        F: Fn(&mut Database) -> Result<()> + Send + Sync + 'static,
    {
        self.config.prepare_connection = Some(Arc::new(prepare));
        self
    }

    #[must_use]
    pub fn finish(self) -> Config {
        self.config
    }
}
