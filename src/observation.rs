//! Transaction observation.
//!
//! The broker sits between SQLite's update/commit/rollback hooks and the
//! weakly-held observers. Row-change events are delivered as they happen;
//! the commit or rollback boundary is delivered after the statement that
//! triggered it completes, from the connection's worker, so observers may
//! re-enter the database there.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::trace;

use crate::connection::Database;
use crate::error::{Error, Result};

/// The kind of a row change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Insert,
    Update,
    Delete,
}

/// One row change reported by SQLite's update hook.
#[derive(Debug, Clone)]
pub struct DatabaseEvent {
    pub kind: EventKind,
    /// Database name, usually `main`.
    pub database: String,
    pub table: String,
    pub rowid: i64,
}

/// Observes database transactions.
///
/// Observers are held weakly: dead entries are swept at every transaction
/// boundary. `will_commit` may return an error to veto the commit; SQLite
/// then rolls the transaction back and the caller receives
/// [`Error::CommitVetoed`].
pub trait TransactionObserver: Send + Sync {
    /// Filter for row-change delivery. Defaults to observing every table.
    fn observes(&self, table: &str) -> bool {
        let _ = table;
        true
    }

    /// A row of an observed table changed. The transaction is still open.
    fn database_did_change(&self, event: &DatabaseEvent);

    /// The transaction is about to commit. Returning an error vetoes it.
    fn database_will_commit(&self) -> Result<()> {
        Ok(())
    }

    /// The transaction committed. Runs on the connection's worker; the
    /// database may be re-entered.
    fn database_did_commit(&self, db: &mut Database);

    /// The transaction rolled back (explicitly, by SQLite, or by a veto).
    fn database_did_rollback(&self, db: &mut Database);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Boundary {
    Commit,
    Rollback,
}

#[derive(Default)]
struct BrokerInner {
    observers: Vec<Weak<dyn TransactionObserver>>,
    /// Boundaries recorded by the hooks since the last dispatch. A
    /// multi-statement script may cross several implicit transactions before
    /// the connection gets a chance to dispatch.
    pending: Vec<Boundary>,
    /// The observer error that vetoed the in-flight commit, if any.
    veto: Option<Error>,
}

/// Shared state between the SQLite hooks and the owning connection.
pub(crate) struct ObservationBroker {
    inner: Mutex<BrokerInner>,
}

impl ObservationBroker {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(BrokerInner::default()),
        })
    }

    /// Install the SQLite hooks on a freshly opened connection.
    pub(crate) fn install(self: &Arc<Self>, conn: &rusqlite::Connection) {
        let broker = Arc::clone(self);
        conn.update_hook(Some(
            move |action: rusqlite::hooks::Action, database: &str, table: &str, rowid: i64| {
                let kind = match action {
                    rusqlite::hooks::Action::SQLITE_INSERT => EventKind::Insert,
                    rusqlite::hooks::Action::SQLITE_UPDATE => EventKind::Update,
                    rusqlite::hooks::Action::SQLITE_DELETE => EventKind::Delete,
                    _ => return,
                };
                broker.row_did_change(DatabaseEvent {
                    kind,
                    database: database.to_owned(),
                    table: table.to_owned(),
                    rowid,
                });
            },
        ));

        let broker = Arc::clone(self);
        conn.commit_hook(Some(move || broker.transaction_will_commit()));

        let broker = Arc::clone(self);
        conn.rollback_hook(Some(move || broker.transaction_did_rollback()));
    }

    pub(crate) fn add_observer(&self, observer: Weak<dyn TransactionObserver>) {
        self.inner.lock().observers.push(observer);
    }

    pub(crate) fn remove_observer(&self, observer: &Arc<dyn TransactionObserver>) {
        self.inner
            .lock()
            .observers
            .retain(|weak| !weak.ptr_eq(&Arc::downgrade(observer)));
    }

    /// Live observers, with dead weak entries swept.
    fn live_observers(&self) -> Vec<Arc<dyn TransactionObserver>> {
        let mut inner = self.inner.lock();
        inner.observers.retain(|weak| weak.strong_count() > 0);
        inner.observers.iter().filter_map(Weak::upgrade).collect()
    }

    fn row_did_change(&self, event: DatabaseEvent) {
        // The lock is released before user callbacks run, so a callback may
        // touch the broker (e.g. register another observer) without
        // deadlocking.
        for observer in self.live_observers() {
            if observer.observes(&event.table) {
                observer.database_did_change(&event);
            }
        }
    }

    /// Commit-hook body. Returning `true` converts the commit into a
    /// rollback.
    fn transaction_will_commit(&self) -> bool {
        for observer in self.live_observers() {
            if let Err(err) = observer.database_will_commit() {
                trace!(error = %err, "transaction vetoed by observer");
                self.inner.lock().veto = Some(err);
                return true;
            }
        }
        self.inner.lock().pending.push(Boundary::Commit);
        false
    }

    fn transaction_did_rollback(&self) {
        self.inner.lock().pending.push(Boundary::Rollback);
    }

    /// Drain recorded boundaries and the pending veto.
    pub(crate) fn take_pending(&self) -> (Vec<Boundary>, Option<Error>) {
        let mut inner = self.inner.lock();
        (std::mem::take(&mut inner.pending), inner.veto.take())
    }

    /// Deliver a boundary to every live observer. Runs on the connection's
    /// worker with the database available for re-entry.
    pub(crate) fn dispatch_boundary(&self, boundary: Boundary, db: &mut Database) {
        for observer in self.live_observers() {
            match boundary {
                Boundary::Commit => observer.database_did_commit(db),
                Boundary::Rollback => observer.database_did_rollback(db),
            }
        }
    }
}
