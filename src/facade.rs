//! Capability traits implemented by both database façades.
//!
//! The object-safe `*_boxed` methods are the dispatch surface used by
//! façade-agnostic machinery (the migrator, the fetched-records controller);
//! the generic methods are the convenient typed entry points.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::TransactionKind;
use crate::connection::Database;
use crate::error::{Error, Result};

type BoxedAccess = Box<dyn FnOnce(&mut Database) + Send>;

fn run_captured<T, F, D>(dispatch: D, f: F) -> Result<T>
where
    F: FnOnce(&mut Database) -> Result<T> + Send + 'static,
    T: Send + 'static,
    D: FnOnce(BoxedAccess) -> Result<()>,
{
    let slot = Arc::new(Mutex::new(None));
    let closure_slot = Arc::clone(&slot);
    dispatch(Box::new(move |db| {
        *closure_slot.lock() = Some(f(db));
    }))?;
    let result = slot
        .lock()
        .take()
        .ok_or_else(|| Error::WorkerClosed("database access closure never ran".to_owned()))?;
    result
}

/// Read access to a database.
pub trait DatabaseReader: Send + Sync {
    /// Object-safe read dispatch. Blocks until the closure ran.
    #[doc(hidden)]
    fn read_boxed(&self, f: BoxedAccess) -> Result<()>;

    /// Run a read-only closure and return its value.
    ///
    /// On a pool this runs on a reader connection inside a deferred
    /// transaction, yielding a stable snapshot under WAL. On a queue it runs
    /// on the single serialized connection.
    ///
    /// # Errors
    /// Propagates the closure's error, or an infrastructure error.
    fn read<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Database) -> Result<T> + Send + 'static,
        T: Send + 'static,
        Self: Sized,
    {
        run_captured(|g| self.read_boxed(g), f)
    }
}

/// Write access to a database.
pub trait DatabaseWriter: DatabaseReader {
    /// Object-safe write dispatch. Blocks until the closure ran on the
    /// writer connection.
    #[doc(hidden)]
    fn write_boxed(&self, f: BoxedAccess) -> Result<()>;

    /// Object-safe writer-initiated concurrent read. Must be called from the
    /// writer's worker with its database; blocks the writer only until the
    /// read's snapshot is anchored, then lets the writer proceed while the
    /// closure completes.
    #[doc(hidden)]
    fn concurrent_read_boxed(
        &self,
        db: &mut Database,
        f: Box<dyn FnOnce(&mut Database) + Send + 'static>,
    ) -> Result<()>;

    /// Run a closure with write access and return its value.
    ///
    /// # Errors
    /// Propagates the closure's error, or an infrastructure error.
    fn write<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Database) -> Result<T> + Send + 'static,
        T: Send + 'static,
        Self: Sized,
    {
        run_captured(|g| self.write_boxed(g), f)
    }

    /// Run a closure inside a write transaction (the configured default kind
    /// when `None`): commit on `Ok`, roll back on `Err`.
    ///
    /// # Errors
    /// Propagates the closure's error, a commit failure (including
    /// [`Error::CommitVetoed`]), or a rollback failure.
    fn write_in_transaction<T, F>(&self, kind: Option<TransactionKind>, f: F) -> Result<T>
    where
        F: FnOnce(&mut Database) -> Result<T> + Send + 'static,
        T: Send + 'static,
        Self: Sized,
    {
        self.write(move |db| db.transaction(kind, f))
    }
}
