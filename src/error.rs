use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::value::Value;

/// SQLite diagnostic context: result code, optional message, the SQL that
/// failed and the arguments it was bound with.
#[derive(Debug, Clone)]
pub struct SqliteFailure {
    /// Primary result code (e.g. 19 for `SQLITE_CONSTRAINT`).
    pub code: i32,
    /// Extended result code when SQLite reported one.
    pub extended_code: i32,
    pub message: Option<String>,
    pub sql: Option<String>,
    pub arguments: Option<Vec<Value>>,
}

impl SqliteFailure {
    pub(crate) fn from_rusqlite(err: &rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(ffi_err, message) => Self {
                // The primary result code is the low byte of the extended one.
                code: ffi_err.extended_code & 0xff,
                extended_code: ffi_err.extended_code,
                message: message.clone().or_else(|| Some(ffi_err.to_string())),
                sql: None,
                arguments: None,
            },
            other => Self {
                code: 1, // SQLITE_ERROR
                extended_code: 1,
                message: Some(other.to_string()),
                sql: None,
                arguments: None,
            },
        }
    }

    #[must_use]
    pub(crate) fn with_statement(mut self, sql: &str, arguments: Option<&[Value]>) -> Self {
        self.sql = Some(sql.to_owned());
        self.arguments = arguments.map(<[Value]>::to_vec);
        self
    }
}

impl fmt::Display for SqliteFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SQLite error {}", self.code)?;
        if let Some(message) = &self.message {
            write!(f, ": {message}")?;
        }
        if let Some(sql) = &self.sql {
            write!(f, " - while executing `{sql}`")?;
        }
        if let Some(arguments) = &self.arguments
            && !arguments.is_empty()
        {
            write!(f, " with arguments [")?;
            for (i, value) in arguments.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{value}")?;
            }
            write!(f, "]")?;
        }
        Ok(())
    }
}

/// Unified error type for every fallible toolkit operation.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Any failure reported by the SQLite engine.
    #[error("{0}")]
    Sqlite(SqliteFailure),

    /// A required value was NULL or incompatible with the requested type.
    #[error("conversion error: {0}")]
    Conversion(String),

    /// An UPDATE or DELETE targeted no rows.
    #[error("record not found: {0}")]
    NotFound(String),

    /// Wrong number or naming of statement parameters, an empty persistence
    /// map, or invalid primary-key values.
    #[error("argument error: {0}")]
    Argument(String),

    /// Missing table or primary key, reverse without a deterministic
    /// ordering, or a failed deferred foreign-key check.
    #[error("schema error: {0}")]
    Schema(String),

    /// A transaction observer vetoed the commit; carries the observer's
    /// original error. SQLite has already rolled the transaction back.
    #[error("commit vetoed by transaction observer: {0}")]
    CommitVetoed(#[source] Arc<Error>),

    /// An operation ran outside the serialized worker that owns its
    /// connection.
    #[error("database access from the wrong queue: {0}")]
    WrongThread(String),

    /// The serialized worker behind a connection is gone.
    #[error("database worker closed: {0}")]
    WorkerClosed(String),
}

impl Error {
    /// Primary SQLite result code, when this error came from the engine.
    #[must_use]
    pub fn sqlite_code(&self) -> Option<i32> {
        match self {
            Self::Sqlite(failure) => Some(failure.code),
            _ => None,
        }
    }

    pub(crate) fn from_sqlite(err: rusqlite::Error, sql: &str, arguments: Option<&[Value]>) -> Self {
        Self::Sqlite(SqliteFailure::from_rusqlite(&err).with_statement(sql, arguments))
    }

    /// True when SQLite may already have rolled the transaction back itself,
    /// making an explicit ROLLBACK failure uninteresting (FULL, IOERR, BUSY,
    /// NOMEM).
    pub(crate) fn sqlite_aborted_transaction(&self) -> bool {
        matches!(self.sqlite_code(), Some(5 | 7 | 10 | 13))
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Self::Sqlite(SqliteFailure::from_rusqlite(&err))
    }
}

/// Convenience alias used across the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;
