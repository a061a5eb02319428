//! The fetched-records controller: keeps an array of records matching a
//! request and reports identity-aware diffs after every commit that touched
//! an observed table.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, sync_channel};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, trace};

pub mod diff;

pub use diff::RowChange;

use crate::connection::Database;
use crate::error::{Error, Result};
use crate::facade::DatabaseWriter;
use crate::observation::{DatabaseEvent, TransactionObserver};
use crate::query::QueryDef;
use crate::record::RowConvertible;
use crate::row::Row;
use crate::statement::StatementArguments;
use crate::worker::SerialWorker;

/// Identity comparator over raw rows: do two fetched rows refer to the same
/// entity?
pub type RecordIdentity = Arc<dyn Fn(&Row, &Row) -> bool + Send + Sync>;

/// What the controller fetches.
#[derive(Debug, Clone)]
enum FetchSource {
    Sql {
        sql: String,
        arguments: StatementArguments,
    },
    Query(QueryDef),
}

/// Change callbacks, invoked on the controller's serial queue.
///
/// Delivery per changed transaction is: `will_change`, one `on_change` per
/// record change, `did_change` with the post-change records.
pub struct TrackingCallbacks<R> {
    pub will_change: Option<Box<dyn Fn() + Send + 'static>>,
    pub on_change: Option<Box<dyn Fn(&R, &RowChange) + Send + 'static>>,
    pub did_change: Option<Box<dyn Fn(&[R]) + Send + 'static>>,
}

impl<R> Default for TrackingCallbacks<R> {
    fn default() -> Self {
        Self {
            will_change: None,
            on_change: None,
            did_change: None,
        }
    }
}

/// Rows and their decoded records, kept index-aligned.
struct Snapshot<R> {
    rows: Vec<Row>,
    records: Vec<R>,
}

impl<R> Default for Snapshot<R> {
    fn default() -> Self {
        Self {
            rows: Vec::new(),
            records: Vec::new(),
        }
    }
}

struct ControllerState<R> {
    snapshot: Snapshot<R>,
    callbacks: TrackingCallbacks<R>,
}

struct ControllerInner<R: RowConvertible + Send + 'static> {
    writer: Arc<dyn DatabaseWriter>,
    source: FetchSource,
    queue: SerialWorker<ControllerState<R>>,
    identity: Mutex<Option<RecordIdentity>>,
    observer: Mutex<Option<Arc<TrackingObserver<R>>>>,
}

/// Maintains the records matching a request and notifies callbacks of
/// insert/delete/move/update changes with record-identity semantics.
///
/// Dropping the controller stops tracking: the transaction observer is held
/// weakly by the database and swept at the next transaction boundary, and any
/// in-flight recomputation exits early.
pub struct FetchedRecordsController<R: RowConvertible + Send + 'static> {
    inner: Arc<ControllerInner<R>>,
}

impl<R: RowConvertible + Send + 'static> FetchedRecordsController<R> {
    /// Track the rows of a query-builder request.
    ///
    /// # Errors
    /// Returns [`Error::WorkerClosed`] when the controller queue cannot
    /// start.
    pub fn new(writer: Arc<dyn DatabaseWriter>, request: impl Into<QueryDef>) -> Result<Self> {
        Self::with_source(writer, FetchSource::Query(request.into()))
    }

    /// Track the rows of a raw SQL query.
    ///
    /// # Errors
    /// Returns [`Error::WorkerClosed`] when the controller queue cannot
    /// start.
    pub fn from_sql(
        writer: Arc<dyn DatabaseWriter>,
        sql: &str,
        arguments: impl Into<StatementArguments>,
    ) -> Result<Self> {
        Self::with_source(
            writer,
            FetchSource::Sql {
                sql: sql.to_owned(),
                arguments: arguments.into(),
            },
        )
    }

    fn with_source(writer: Arc<dyn DatabaseWriter>, source: FetchSource) -> Result<Self> {
        let queue = SerialWorker::spawn("record-tracking", || {
            Ok(ControllerState {
                snapshot: Snapshot::default(),
                callbacks: TrackingCallbacks::default(),
            })
        })?;
        Ok(Self {
            inner: Arc::new(ControllerInner {
                writer,
                source,
                queue,
                identity: Mutex::new(None),
                observer: Mutex::new(None),
            }),
        })
    }

    /// Supply the identity comparator used to fuse deletions and insertions
    /// into moves and updates. Without one, the comparator derives from the
    /// observed table's primary key; failing that, records are never
    /// identical and every update degenerates to delete+insert.
    pub fn set_record_identity<F>(&self, identity: F)
    where
        F: Fn(&Row, &Row) -> bool + Send + Sync + 'static,
    {
        *self.inner.identity.lock() = Some(Arc::new(identity));
    }

    /// Install change callbacks. Replaces any previous set; pass
    /// [`TrackingCallbacks::default`] to stop deliveries after the current
    /// change is drained.
    ///
    /// # Errors
    /// Returns [`Error::WorkerClosed`] when the controller queue is gone.
    pub fn track_changes(&self, callbacks: TrackingCallbacks<R>) -> Result<()> {
        self.inner
            .queue
            .run_sync(move |state| state.callbacks = callbacks)
    }

    /// Fetch the initial items, derive the identity comparator, and register
    /// for change tracking.
    ///
    /// # Errors
    /// Propagates fetch, decode, and registration errors.
    pub fn perform_fetch(&self) -> Result<()> {
        let inner = Arc::clone(&self.inner);
        let slot = Arc::new(Mutex::new(None));
        let closure_slot = Arc::clone(&slot);
        self.inner.writer.write_boxed(Box::new(move |db| {
            *closure_slot.lock() = Some(inner.start_tracking(db));
        }))?;
        slot.lock()
            .take()
            .ok_or_else(|| Error::WorkerClosed("tracking setup never ran".to_owned()))?
    }

    /// A snapshot of the currently tracked records.
    ///
    /// # Errors
    /// Returns [`Error::WorkerClosed`] when the controller queue is gone.
    pub fn fetched_records(&self) -> Result<Vec<R>>
    where
        R: Clone,
    {
        self.inner
            .queue
            .run_sync(|state| state.snapshot.records.clone())
    }
}

impl<R: RowConvertible + Send + 'static> ControllerInner<R> {
    /// Fetch rows and decode records for the current source.
    fn fetch_snapshot(&self, db: &mut Database) -> Result<Snapshot<R>> {
        let rows = match &self.source {
            FetchSource::Sql { sql, arguments } => Row::fetch_all(db, sql, arguments.clone())?,
            FetchSource::Query(query) => {
                let (sql, arguments) = query.sql(db)?;
                Row::fetch_all(db, &sql, arguments)?
            }
        };
        let records = rows.iter().map(R::from_row).collect::<Result<Vec<R>>>()?;
        Ok(Snapshot { rows, records })
    }

    /// Tables to observe, from the compiled statement's read region.
    fn observed_tables(&self, db: &mut Database) -> Result<BTreeSet<String>> {
        let sql = match &self.source {
            FetchSource::Sql { sql, .. } => sql.clone(),
            FetchSource::Query(query) => query.sql(db)?.0,
        };
        let statement = db.prepare_select(&sql)?;
        Ok(statement.read_tables().clone())
    }

    /// Runs on the writer worker: initial fetch, identity derivation,
    /// observer registration.
    fn start_tracking(self: &Arc<Self>, db: &mut Database) -> Result<()> {
        let observed_tables = self.observed_tables(db)?;
        let identity = match self.identity.lock().clone() {
            Some(identity) => identity,
            None => {
                let derived = derive_identity(db, &observed_tables)?;
                *self.identity.lock() = Some(Arc::clone(&derived));
                derived
            }
        };

        let snapshot = self.fetch_snapshot(db)?;
        self.queue.run_sync(move |state| state.snapshot = snapshot)?;

        let observer = Arc::new(TrackingObserver {
            observed_tables,
            needs_compute: AtomicBool::new(false),
            controller: Arc::downgrade(self),
            identity,
        });
        db.add_weak_transaction_observer(observer_weak(&observer));
        *self.observer.lock() = Some(observer);
        debug!("record tracking started");
        Ok(())
    }

    /// Runs on the writer worker right after a commit that touched an
    /// observed table.
    ///
    /// Processing stays in commit order: a slot is enqueued on the serial
    /// controller queue *before* the snapshot hand-off, and that slot blocks
    /// until this commit's fetch delivers. The writer itself is released as
    /// soon as the reader's snapshot is anchored.
    fn compute_changes(self: Arc<Self>, db: &mut Database, identity: RecordIdentity) {
        let (result_tx, result_rx) = sync_channel::<Result<Snapshot<R>>>(1);
        let _ = self.queue.run_async(move |state| {
            drain_change_pass(state, &result_rx, &identity);
        });

        let inner = Arc::clone(&self);
        let handoff = self.writer.concurrent_read_boxed(
            db,
            Box::new(move |reader_db| {
                let _ = result_tx.send(inner.fetch_snapshot(reader_db));
            }),
        );
        if let Err(err) = handoff {
            // The queued slot sees a closed channel and skips the pass.
            trace!(error = %err, "snapshot hand-off failed; change pass skipped");
        }
    }
}

/// Wait for the commit's snapshot, then diff and deliver. Runs on the
/// controller's serial queue.
fn drain_change_pass<R: RowConvertible + Send + 'static>(
    state: &mut ControllerState<R>,
    result_rx: &Receiver<Result<Snapshot<R>>>,
    identity: &RecordIdentity,
) {
    let fetched = match result_rx.recv() {
        Ok(Ok(snapshot)) => snapshot,
        Ok(Err(err)) => {
            trace!(error = %err, "change pass fetch failed");
            return;
        }
        Err(_) => return,
    };

    let changes = diff::row_changes(&state.snapshot.rows, &fetched.rows, &**identity);
    if changes.is_empty() {
        state.snapshot = fetched;
        return;
    }

    if let Some(will_change) = &state.callbacks.will_change {
        will_change();
    }
    if let Some(on_change) = &state.callbacks.on_change {
        for change in &changes {
            let record = match change {
                RowChange::Deleted { old_index } => &state.snapshot.records[*old_index],
                RowChange::Inserted { new_index }
                | RowChange::Moved { new_index, .. }
                | RowChange::Updated { new_index, .. } => &fetched.records[*new_index],
            };
            on_change(record, change);
        }
    }
    state.snapshot = fetched;
    if let Some(did_change) = &state.callbacks.did_change {
        did_change(&state.snapshot.records);
    }
}

fn observer_weak<R: RowConvertible + Send + 'static>(
    observer: &Arc<TrackingObserver<R>>,
) -> Weak<dyn TransactionObserver> {
    let coerced: Arc<dyn TransactionObserver> = Arc::clone(observer) as _;
    Arc::downgrade(&coerced)
}

/// Identity derived from the primary key of the observed table: rows are the
/// same record when every key column is non-NULL and equal. Multi-table or
/// keyless sources fall back to never-equal, degrading updates to
/// delete+insert.
fn derive_identity(
    db: &mut Database,
    observed_tables: &BTreeSet<String>,
) -> Result<RecordIdentity> {
    if observed_tables.len() == 1
        && let Some(table) = observed_tables.iter().next()
        && let Ok(key) = db.primary_key(table)
    {
        let columns = key.columns().to_vec();
        if !columns.is_empty() {
            return Ok(Arc::new(move |a: &Row, b: &Row| {
                columns
                    .iter()
                    .all(|column| match (a.value(column), b.value(column)) {
                        (Some(x), Some(y)) => !x.is_null() && !y.is_null() && x == y,
                        _ => false,
                    })
            }));
        }
    }
    Ok(Arc::new(|_: &Row, _: &Row| false))
}

/// The transaction observer registered on the writer for a controller.
struct TrackingObserver<R: RowConvertible + Send + 'static> {
    observed_tables: BTreeSet<String>,
    /// Set when a change of an observed table arrives, consumed at commit.
    needs_compute: AtomicBool,
    controller: Weak<ControllerInner<R>>,
    identity: RecordIdentity,
}

impl<R: RowConvertible + Send + 'static> TransactionObserver for TrackingObserver<R> {
    fn observes(&self, table: &str) -> bool {
        self.observed_tables.contains(table)
    }

    fn database_did_change(&self, _event: &DatabaseEvent) {
        self.needs_compute.store(true, Ordering::Release);
    }

    fn database_did_commit(&self, db: &mut Database) {
        if !self.needs_compute.swap(false, Ordering::AcqRel) {
            return;
        }
        // A dead controller means tracking stopped; exit early.
        let Some(inner) = self.controller.upgrade() else {
            return;
        };
        inner.compute_changes(db, Arc::clone(&self.identity));
    }

    fn database_did_rollback(&self, _db: &mut Database) {
        self.needs_compute.store(false, Ordering::Release);
    }
}
