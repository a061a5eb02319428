//! The single-connection serialized façade.

use std::path::Path;
use std::sync::Arc;

use crate::config::Config;
use crate::connection::Database;
use crate::error::{Error, Result};
use crate::facade::{DatabaseReader, DatabaseWriter};
use crate::value::Value;
use crate::worker::SerialWorker;

/// A database façade backed by one connection on one serialized worker.
///
/// Reads and writes are mutually serialized; isolation between statements is
/// natural because no concurrency exists.
#[derive(Clone)]
pub struct DatabaseQueue {
    worker: Arc<SerialWorker<Database>>,
    path: String,
}

impl DatabaseQueue {
    /// Open (or create) the database file at `path`.
    ///
    /// # Errors
    /// Returns an error when the file cannot be opened or configured.
    pub fn open(path: impl AsRef<Path>, config: Config) -> Result<Self> {
        let path = path.as_ref().to_string_lossy().into_owned();
        Self::open_at(path, config)
    }

    /// Open a private in-memory database.
    ///
    /// # Errors
    /// Returns an error when the connection cannot be configured.
    pub fn open_in_memory(config: Config) -> Result<Self> {
        Self::open_at(":memory:".to_owned(), config)
    }

    fn open_at(path: String, config: Config) -> Result<Self> {
        let label = worker_label(&path);
        let open_path = path.clone();
        let worker = SerialWorker::spawn(&label, move || {
            let stamp = crate::worker::current_stamp().ok_or_else(|| {
                Error::WorkerClosed("worker thread lost its identity stamp".to_owned())
            })?;
            Database::open(&open_path, config, None, stamp)
        })?;
        Ok(Self {
            worker: Arc::new(worker),
            path,
        })
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Schedule a write closure without waiting for it. FIFO with respect to
    /// every other submission on this queue.
    ///
    /// # Errors
    /// Returns [`Error::WorkerClosed`] when the queue is gone.
    pub fn write_detached<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut Database) + Send + 'static,
    {
        self.worker.run_async(f)
    }

    /// Awaitable variant of [`DatabaseWriter::write`] for async callers.
    ///
    /// # Errors
    /// Propagates the closure's error, or an infrastructure error.
    pub async fn write_awaitable<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Database) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.worker.run_awaitable(f).await?
    }

    /// Awaitable variant of [`DatabaseReader::read`] for async callers.
    ///
    /// # Errors
    /// Propagates the closure's error, or an infrastructure error.
    pub async fn read_awaitable<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Database) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.worker.run_awaitable(f).await?
    }

    /// Register a scalar SQL function on the connection.
    ///
    /// # Errors
    /// Returns [`Error::Sqlite`] when registration fails.
    pub fn add_function<F>(
        &self,
        name: &str,
        arg_count: usize,
        deterministic: bool,
        function: F,
    ) -> Result<()>
    where
        F: Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        let name = name.to_owned();
        self.worker
            .run_sync(move |db| db.add_function(&name, arg_count, deterministic, function))?
    }

    /// Register a collation on the connection.
    ///
    /// # Errors
    /// Returns [`Error::Sqlite`] when registration fails.
    pub fn add_collation<C>(&self, name: &str, compare: C) -> Result<()>
    where
        C: Fn(&str, &str) -> std::cmp::Ordering + Send + Sync + 'static,
    {
        let name = name.to_owned();
        self.worker
            .run_sync(move |db| db.add_collation(&name, compare))?
    }

    /// Clear caches and release as much memory as SQLite can.
    ///
    /// # Errors
    /// Returns [`Error::Sqlite`] on engine failure.
    pub fn release_memory(&self) -> Result<()> {
        self.worker.run_sync(Database::release_memory)?
    }
}

impl DatabaseReader for DatabaseQueue {
    fn read_boxed(&self, f: Box<dyn FnOnce(&mut Database) + Send>) -> Result<()> {
        self.worker.run_sync(move |db| f(db))
    }
}

impl DatabaseWriter for DatabaseQueue {
    fn write_boxed(&self, f: Box<dyn FnOnce(&mut Database) + Send>) -> Result<()> {
        self.worker.run_sync(move |db| f(db))
    }

    fn concurrent_read_boxed(
        &self,
        db: &mut Database,
        f: Box<dyn FnOnce(&mut Database) + Send + 'static>,
    ) -> Result<()> {
        // A queue has no readers: the hand-off degenerates to running the
        // read right here, on the single serialized connection.
        f(db);
        Ok(())
    }
}

pub(crate) fn worker_label(path: &str) -> String {
    if path == ":memory:" {
        return "memory".to_owned();
    }
    Path::new(path)
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .filter(|stem| !stem.is_empty())
        .unwrap_or_else(|| "db".to_owned())
}
