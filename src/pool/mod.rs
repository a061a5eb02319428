//! The WAL connection-pool façade: one serialized writer plus a bounded set
//! of read-only connections, each on its own serialized worker.

use std::path::Path;
use std::sync::mpsc::sync_channel;
use std::sync::{Arc, Weak};

use crossbeam_channel::{Receiver, Sender, bounded};
use parking_lot::Mutex;
use tracing::debug;

use crate::config::{Config, TransactionKind};
use crate::connection::Database;
use crate::connection::schema::SharedSchemaCache;
use crate::error::{Error, Result};
use crate::facade::{DatabaseReader, DatabaseWriter};
use crate::row::Row;
use crate::value::Value;
use crate::worker::SerialWorker;

type ScalarFunction = Arc<dyn Fn(&[Value]) -> Result<Value> + Send + Sync>;
type Collation = Arc<dyn Fn(&str, &str) -> std::cmp::Ordering + Send + Sync>;

/// A function or collation registration, replayed onto present and future
/// reader connections.
enum Registration {
    Function {
        name: String,
        arg_count: usize,
        deterministic: bool,
        function: ScalarFunction,
    },
    Collation {
        name: String,
        compare: Collation,
    },
}

struct ReaderConnection {
    worker: SerialWorker<Database>,
}

/// A checkout token. `Vacant` slots turn into live readers lazily.
enum ReaderSlot {
    Vacant(usize),
    Ready(Arc<ReaderConnection>),
}

struct PoolInner {
    writer: SerialWorker<Database>,
    slots_tx: Sender<ReaderSlot>,
    slots_rx: Receiver<ReaderSlot>,
    readers: Mutex<Vec<Weak<ReaderConnection>>>,
    registrations: Mutex<Vec<Arc<Registration>>>,
    shared_schema: SharedSchemaCache,
    config: Config,
    path: String,
}

/// A database façade combining one writer with `maximum_reader_count`
/// read-only connections under WAL snapshot isolation.
#[derive(Clone)]
pub struct DatabasePool {
    inner: Arc<PoolInner>,
}

impl DatabasePool {
    /// Open (or create) the database file at `path`, switch it to WAL unless
    /// the configuration is read-only, and start the writer worker. Readers
    /// are created lazily, up to the configured maximum.
    ///
    /// # Errors
    /// Returns an error when the file cannot be opened, configured, or
    /// switched to WAL journaling.
    pub fn open(path: impl AsRef<Path>, config: Config) -> Result<Self> {
        let path = path.as_ref().to_string_lossy().into_owned();
        let label = format!("{}-writer", crate::queue::worker_label(&path));
        let shared_schema = SharedSchemaCache::default();

        let writer_path = path.clone();
        let writer_config = config.clone();
        let writer_schema = shared_schema.clone();
        let writer = SerialWorker::spawn(&label, move || {
            let stamp = crate::worker::current_stamp().ok_or_else(|| {
                Error::WorkerClosed("worker thread lost its identity stamp".to_owned())
            })?;
            let db =
                Database::open(&writer_path, writer_config.clone(), Some(writer_schema), stamp)?;
            if !writer_config.readonly {
                db.activate_wal()?;
            }
            Ok(db)
        })?;

        let reader_count = config.maximum_reader_count.max(1);
        let (slots_tx, slots_rx) = bounded(reader_count);
        for index in 0..reader_count {
            let _ = slots_tx.send(ReaderSlot::Vacant(index));
        }

        debug!(path, readers = reader_count, "database pool opened");
        Ok(Self {
            inner: Arc::new(PoolInner {
                writer,
                slots_tx,
                slots_rx,
                readers: Mutex::new(Vec::new()),
                registrations: Mutex::new(Vec::new()),
                shared_schema,
                config,
                path,
            }),
        })
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.inner.path
    }

    /// Non-isolated read: runs on a reader without a wrapping transaction,
    /// so only statement-level isolation applies.
    ///
    /// # Errors
    /// Propagates the closure's error, or an infrastructure error.
    pub fn read_uncommitted<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Database) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let guard = self.inner.checkout_reader()?;
        let connection = guard.connection();
        connection.worker.run_sync(move |db| {
            let _guard = guard;
            f(db)
        })?
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
        self.inner.writer.run_awaitable(f).await?
    }

    /// Awaitable snapshot read for async callers.
    ///
    /// # Errors
    /// Propagates the closure's error, or an infrastructure error.
    pub async fn read_awaitable<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Database) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let guard = self.inner.checkout_reader()?;
        let connection = guard.connection();
        connection
            .worker
            .run_awaitable(move |db| {
                let _guard = guard;
                snapshot_read(db, f)
            })
            .await?
    }

    /// Register a scalar SQL function on the writer and on every present and
    /// future reader.
    ///
    /// # Errors
    /// Returns [`Error::Sqlite`] when any registration fails.
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
        let registration = Arc::new(Registration::Function {
            name: name.to_owned(),
            arg_count,
            deterministic,
            function: Arc::new(function),
        });
        self.inner.apply_everywhere(&registration)?;
        self.inner.registrations.lock().push(registration);
        Ok(())
    }

    /// Register a collation on the writer and on every present and future
    /// reader.
    ///
    /// # Errors
    /// Returns [`Error::Sqlite`] when any registration fails.
    pub fn add_collation<C>(&self, name: &str, compare: C) -> Result<()>
    where
        C: Fn(&str, &str) -> std::cmp::Ordering + Send + Sync + 'static,
    {
        let registration = Arc::new(Registration::Collation {
            name: name.to_owned(),
            compare: Arc::new(compare),
        });
        self.inner.apply_everywhere(&registration)?;
        self.inner.registrations.lock().push(registration);
        Ok(())
    }

    /// Clear caches on the writer and every live reader, and release as much
    /// memory as SQLite can.
    ///
    /// # Errors
    /// Returns the first engine failure encountered.
    pub fn release_memory(&self) -> Result<()> {
        self.inner.writer.run_sync(Database::release_memory)??;
        for reader in self.inner.live_readers() {
            reader.worker.run_sync(Database::release_memory)??;
        }
        Ok(())
    }

    /// Truncating WAL checkpoint, on the writer connection.
    ///
    /// # Errors
    /// Returns [`Error::Sqlite`] on engine failure.
    pub fn checkpoint(&self) -> Result<()> {
        self.inner.writer.run_sync(|db| db.checkpoint())?
    }
}

impl PoolInner {
    fn checkout_reader(self: &Arc<Self>) -> Result<ReaderGuard> {
        // Blocks until a slot is free; the channel is the pool's semaphore.
        let slot = self
            .slots_rx
            .recv()
            .map_err(|_| Error::WorkerClosed("reader pool is gone".to_owned()))?;
        let connection = match slot {
            ReaderSlot::Ready(connection) => connection,
            ReaderSlot::Vacant(index) => match self.create_reader(index) {
                Ok(connection) => connection,
                Err(err) => {
                    // Return the vacant token so the pool does not shrink.
                    let _ = self.slots_tx.send(ReaderSlot::Vacant(index));
                    return Err(err);
                }
            },
        };
        Ok(ReaderGuard {
            pool: Arc::clone(self),
            connection: Some(connection),
        })
    }

    fn create_reader(&self, index: usize) -> Result<Arc<ReaderConnection>> {
        let label = format!("{}-reader-{index}", crate::queue::worker_label(&self.path));
        let mut config = self.config.clone();
        config.readonly = true;
        let path = self.path.clone();
        let shared_schema = self.shared_schema.clone();
        let worker = SerialWorker::spawn(&label, move || {
            let stamp = crate::worker::current_stamp().ok_or_else(|| {
                Error::WorkerClosed("worker thread lost its identity stamp".to_owned())
            })?;
            Database::open(&path, config, Some(shared_schema), stamp)
        })?;
        let connection = Arc::new(ReaderConnection { worker });
        for registration in self.registrations.lock().iter() {
            apply_registration(&connection.worker, registration)?;
        }
        self.readers.lock().push(Arc::downgrade(&connection));
        debug!(reader = index, "pool reader connection created");
        Ok(connection)
    }

    fn live_readers(&self) -> Vec<Arc<ReaderConnection>> {
        let mut readers = self.readers.lock();
        readers.retain(|weak| weak.strong_count() > 0);
        readers.iter().filter_map(Weak::upgrade).collect()
    }

    fn apply_everywhere(&self, registration: &Arc<Registration>) -> Result<()> {
        apply_registration(&self.writer, registration)?;
        for reader in self.live_readers() {
            apply_registration(&reader.worker, registration)?;
        }
        Ok(())
    }

    /// Writer-initiated hand-off: begin a deferred transaction on a reader,
    /// signal the writer once the snapshot is anchored, and let the read run
    /// to completion while the writer proceeds.
    fn spawn_concurrent_read(
        self: &Arc<Self>,
        f: Box<dyn FnOnce(&mut Database) + Send + 'static>,
    ) -> Result<()> {
        let guard = self.checkout_reader()?;
        let connection = guard.connection();
        let (ready_tx, ready_rx) = sync_channel::<Result<()>>(1);
        connection.worker.run_async(move |db| {
            let _guard = guard;
            let isolated = acquire_snapshot(db);
            let acquired = isolated.is_ok();
            let _ = ready_tx.send(isolated);
            if !acquired {
                return;
            }
            f(db);
            let _ = db.commit();
        })?;
        ready_rx
            .recv()
            .map_err(|_| Error::WorkerClosed("reader dropped the snapshot signal".to_owned()))?
    }
}

fn apply_registration(
    worker: &SerialWorker<Database>,
    registration: &Arc<Registration>,
) -> Result<()> {
    let registration = Arc::clone(registration);
    worker.run_sync(move |db| match registration.as_ref() {
        Registration::Function {
            name,
            arg_count,
            deterministic,
            function,
        } => {
            let function = Arc::clone(function);
            db.add_function(name, *arg_count, *deterministic, move |values| {
                (*function)(values)
            })
        }
        Registration::Collation { name, compare } => {
            let compare = Arc::clone(compare);
            db.add_collation(name, move |a, b| (*compare)(a, b))
        }
    })?
}

/// Begin a deferred transaction and anchor the WAL snapshot with a first
/// read.
fn acquire_snapshot(db: &mut Database) -> Result<()> {
    db.begin_transaction(TransactionKind::Deferred)?;
    match Row::fetch_all(db, "SELECT rootpage FROM sqlite_master LIMIT 1", ()) {
        Ok(_) => Ok(()),
        Err(err) => {
            let _ = db.rollback();
            Err(err)
        }
    }
}

/// Run `f` inside a snapshot transaction on a reader.
fn snapshot_read<T>(db: &mut Database, f: impl FnOnce(&mut Database) -> Result<T>) -> Result<T> {
    acquire_snapshot(db)?;
    let result = f(db);
    let finish = if result.is_ok() {
        db.commit()
    } else {
        db.rollback()
    };
    match (result, finish) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(err)) => Err(err),
        (Err(err), _) => Err(err),
    }
}

/// Returns its reader to the pool on drop.
struct ReaderGuard {
    pool: Arc<PoolInner>,
    connection: Option<Arc<ReaderConnection>>,
}

impl ReaderGuard {
    fn connection(&self) -> Arc<ReaderConnection> {
        Arc::clone(
            self.connection
                .as_ref()
                .expect("reader guard already released"),
        )
    }
}

impl Drop for ReaderGuard {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            let _ = self.pool.slots_tx.send(ReaderSlot::Ready(connection));
        }
    }
}

impl DatabaseReader for DatabasePool {
    fn read_boxed(&self, f: Box<dyn FnOnce(&mut Database) + Send>) -> Result<()> {
        let guard = self.inner.checkout_reader()?;
        let connection = guard.connection();
        connection.worker.run_sync(move |db| {
            let _guard = guard;
            snapshot_read(db, |db| {
                f(db);
                Ok(())
            })
        })?
    }
}

impl DatabaseWriter for DatabasePool {
    fn write_boxed(&self, f: Box<dyn FnOnce(&mut Database) + Send>) -> Result<()> {
        self.inner.writer.run_sync(move |db| f(db))
    }

    fn concurrent_read_boxed(
        &self,
        _db: &mut Database,
        f: Box<dyn FnOnce(&mut Database) + Send + 'static>,
    ) -> Result<()> {
        self.inner.spawn_concurrent_read(f)
    }
}
