/*!
 * SQLite Toolkit - a typed, concurrency-safe persistence layer for embedded SQLite
 *
 * This crate exposes a single SQLite database file through two façades:
 * a serialized single-connection queue, and a WAL-based pool combining one
 * writer with a bounded set of snapshot-isolated readers. On top of the
 * connection layer it provides a composable query builder, record
 * persistence derived from the table's primary key, ordered migrations,
 * transaction observation, and a fetched-records controller computing
 * stable diffs between successive query results.
 *
 * # Features
 *
 * - Every connection pinned to its own serialized worker thread
 * - Synchronous, fire-and-forget, and awaitable submission
 * - Typed values and rows with affinity-aware conversions
 * - Query builder rendering parameterized SQL from an expression algebra
 * - Insert/update/save/delete/exists derived from the primary key
 * - Weakly-held transaction observers with commit veto
 * - Identity-aware change tracking (insert/delete/move/update diffs)
 *
 * # Example
 *
 * ```rust,no_run
 * use sqlite_toolkit::prelude::*;
 *
 * fn demo() -> Result<(), sqlite_toolkit::Error> {
 *     let queue = DatabaseQueue::open("my_database.db", Config::default())?;
 *
 *     queue.write(|db| {
 *         db.execute_batch(
 *             "CREATE TABLE IF NOT EXISTS readers (
 *                 id INTEGER PRIMARY KEY,
 *                 name TEXT NOT NULL
 *             )",
 *         )?;
 *         db.execute("INSERT INTO readers (name) VALUES (?)", ["Arthur"])
 *     })?;
 *
 *     let names = queue.read(|db| {
 *         let rows = Row::fetch_all(db, "SELECT name FROM readers", ())?;
 *         rows.iter().map(|row| row.decode::<String>("name")).collect()
 *     })?;
 *     let _: Vec<String> = names;
 *     Ok(())
 * }
 * ```
 */

#![forbid(unsafe_code)]

pub mod config;
pub mod connection;
pub mod error;
pub mod facade;
pub mod migration;
pub mod observation;
pub mod pool;
pub mod query;
pub mod queue;
pub mod record;
pub mod row;
pub mod statement;
pub mod tracking;
pub mod value;

mod worker;

// Re-export everything that should be part of the public API
pub mod prelude {
    //! Convenient imports for common functionality.

    pub use crate::config::{BusyMode, Config, ConfigBuilder, TransactionKind};
    pub use crate::connection::{Database, PrimaryKey};
    pub use crate::error::Error;
    pub use crate::facade::{DatabaseReader, DatabaseWriter};
    pub use crate::migration::Migrator;
    pub use crate::observation::{DatabaseEvent, EventKind, TransactionObserver};
    pub use crate::pool::DatabasePool;
    pub use crate::query::{FetchRequest, QueryDef, SqlExpression, col, function, literal};
    pub use crate::queue::DatabaseQueue;
    pub use crate::record::{Persistable, RowConvertible, TableRecord};
    pub use crate::row::Row;
    pub use crate::statement::{Changes, SelectStatement, StatementArguments, UpdateStatement};
    pub use crate::tracking::{FetchedRecordsController, RowChange, TrackingCallbacks};
    pub use crate::value::{FromValue, ToValue, Value};
}

pub use config::{BusyMode, Config, ConfigBuilder, TransactionKind};
pub use connection::{Database, PrimaryKey};
pub use error::{Error, Result, SqliteFailure};
pub use facade::{DatabaseReader, DatabaseWriter};
pub use migration::Migrator;
pub use observation::{DatabaseEvent, EventKind, TransactionObserver};
pub use pool::DatabasePool;
pub use query::{FetchRequest, QueryDef, SqlExpression, SqlOrdering, SqlSelectable};
pub use queue::DatabaseQueue;
pub use record::{Persistable, RowConvertible, TableRecord};
pub use row::Row;
pub use statement::{Changes, SelectStatement, StatementArguments, UpdateStatement};
pub use tracking::{FetchedRecordsController, RecordIdentity, RowChange, TrackingCallbacks};
pub use value::{FromValue, ToValue, Value};
