use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use sqlite_toolkit::prelude::*;
use sqlite_toolkit::{Database, Result as DbResult};

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<(EventKind, String, i64)>>,
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
    veto_next: AtomicBool,
}

impl TransactionObserver for Recorder {
    fn database_did_change(&self, event: &DatabaseEvent) {
        self.events
            .lock()
            .unwrap()
            .push((event.kind, event.table.clone(), event.rowid));
    }

    fn database_will_commit(&self) -> DbResult<()> {
        if self.veto_next.swap(false, Ordering::AcqRel) {
            return Err(Error::Argument("commit rejected by test".to_owned()));
        }
        Ok(())
    }

    fn database_did_commit(&self, _db: &mut Database) {
        self.commits.fetch_add(1, Ordering::AcqRel);
    }

    fn database_did_rollback(&self, _db: &mut Database) {
        self.rollbacks.fetch_add(1, Ordering::AcqRel);
    }
}

fn observed_queue() -> (DatabaseQueue, Arc<Recorder>) {
    let queue = DatabaseQueue::open_in_memory(Config::default()).unwrap();
    queue
        .write(|db| db.execute_batch("CREATE TABLE persons (id INTEGER PRIMARY KEY, name TEXT)"))
        .unwrap();
    let recorder = Arc::new(Recorder::default());
    let registered = recorder.clone();
    queue
        .write(move |db| {
            // The registry holds a weak reference; the test's Arc keeps the
            // observer alive.
            let observer: Arc<dyn TransactionObserver> = registered;
            db.add_transaction_observer(&observer);
            Ok(())
        })
        .unwrap();
    (queue, recorder)
}

#[test]
fn row_changes_and_commit_boundaries_are_reported() {
    let (queue, recorder) = observed_queue();

    queue
        .write(|db| db.execute("INSERT INTO persons (name) VALUES (?)", ["Arthur"]))
        .unwrap();

    let events = recorder.events.lock().unwrap().clone();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0], (EventKind::Insert, "persons".to_owned(), 1));
    assert_eq!(recorder.commits.load(Ordering::Acquire), 1);

    queue
        .write(|db| db.execute("UPDATE persons SET name = ? WHERE id = ?", ["Art", "1"]))
        .unwrap();
    queue
        .write(|db| db.execute("DELETE FROM persons WHERE id = ?", [1i64]))
        .unwrap();

    let events = recorder.events.lock().unwrap().clone();
    assert_eq!(events.len(), 3);
    assert_eq!(events[1].0, EventKind::Update);
    assert_eq!(events[2].0, EventKind::Delete);
    assert_eq!(recorder.commits.load(Ordering::Acquire), 3);
    assert_eq!(recorder.rollbacks.load(Ordering::Acquire), 0);
}

#[test]
fn explicit_transactions_report_one_boundary() {
    let (queue, recorder) = observed_queue();
    queue
        .write_in_transaction(None, |db| {
            db.execute("INSERT INTO persons (name) VALUES (?)", ["Arthur"])?;
            db.execute("INSERT INTO persons (name) VALUES (?)", ["Barbara"])
        })
        .unwrap();
    assert_eq!(recorder.events.lock().unwrap().len(), 2);
    assert_eq!(recorder.commits.load(Ordering::Acquire), 1);
}

#[test]
fn rollbacks_report_did_rollback() {
    let (queue, recorder) = observed_queue();
    let _ = queue
        .write_in_transaction(None, |db| {
            db.execute("INSERT INTO persons (name) VALUES (?)", ["Arthur"])?;
            Err::<(), Error>(Error::Argument("abort".to_owned()))
        })
        .unwrap_err();
    assert_eq!(recorder.commits.load(Ordering::Acquire), 0);
    assert_eq!(recorder.rollbacks.load(Ordering::Acquire), 1);

    let count: i64 = queue
        .read(|db| {
            Row::fetch_one(db, "SELECT COUNT(*) AS c FROM persons", ())?
                .expect("row")
                .decode("c")
        })
        .unwrap();
    assert_eq!(count, 0);
}

#[test]
fn will_commit_veto_surfaces_as_commit_vetoed() {
    let (queue, recorder) = observed_queue();
    recorder.veto_next.store(true, Ordering::Release);

    let err = queue
        .write_in_transaction(None, |db| {
            db.execute("INSERT INTO persons (name) VALUES (?)", ["Arthur"])
        })
        .unwrap_err();
    assert!(matches!(err, Error::CommitVetoed(_)), "got {err:?}");
    assert_eq!(recorder.commits.load(Ordering::Acquire), 0);
    assert_eq!(recorder.rollbacks.load(Ordering::Acquire), 1);

    // SQLite rolled the transaction back: no data landed.
    let count: i64 = queue
        .read(|db| {
            Row::fetch_one(db, "SELECT COUNT(*) AS c FROM persons", ())?
                .expect("row")
                .decode("c")
        })
        .unwrap();
    assert_eq!(count, 0);

    // The next commit goes through.
    queue
        .write(|db| db.execute("INSERT INTO persons (name) VALUES (?)", ["Barbara"]))
        .unwrap();
    assert_eq!(recorder.commits.load(Ordering::Acquire), 1);
}

#[test]
fn dropped_observers_stop_receiving_events() {
    struct LogObserver {
        log: Arc<Mutex<Vec<String>>>,
    }
    impl TransactionObserver for LogObserver {
        fn database_did_change(&self, event: &DatabaseEvent) {
            self.log.lock().unwrap().push(event.table.clone());
        }
        fn database_did_commit(&self, _db: &mut Database) {}
        fn database_did_rollback(&self, _db: &mut Database) {}
    }

    let queue = DatabaseQueue::open_in_memory(Config::default()).unwrap();
    queue
        .write(|db| db.execute_batch("CREATE TABLE persons (id INTEGER PRIMARY KEY, name TEXT)"))
        .unwrap();

    let log = Arc::new(Mutex::new(Vec::new()));
    let observer = Arc::new(LogObserver { log: log.clone() });
    let registered = observer.clone();
    queue
        .write(move |db| {
            let coerced: Arc<dyn TransactionObserver> = registered;
            db.add_transaction_observer(&coerced);
            Ok(())
        })
        .unwrap();

    queue
        .write(|db| db.execute("INSERT INTO persons (name) VALUES (?)", ["one"]))
        .unwrap();
    assert_eq!(log.lock().unwrap().len(), 1);

    // Dropping the last strong reference kills the weak registry entry.
    drop(observer);
    queue
        .write(|db| db.execute("INSERT INTO persons (name) VALUES (?)", ["two"]))
        .unwrap();
    assert_eq!(log.lock().unwrap().len(), 1);
}

#[test]
fn table_filters_limit_delivery() {
    struct OnlyPets {
        events: Mutex<Vec<String>>,
    }
    impl TransactionObserver for OnlyPets {
        fn observes(&self, table: &str) -> bool {
            table == "pets"
        }
        fn database_did_change(&self, event: &DatabaseEvent) {
            self.events.lock().unwrap().push(event.table.clone());
        }
        fn database_did_commit(&self, _db: &mut Database) {}
        fn database_did_rollback(&self, _db: &mut Database) {}
    }

    let queue = DatabaseQueue::open_in_memory(Config::default()).unwrap();
    queue
        .write(|db| {
            db.execute_batch(
                "CREATE TABLE persons (id INTEGER PRIMARY KEY, name TEXT);
                 CREATE TABLE pets (id INTEGER PRIMARY KEY, name TEXT)",
            )
        })
        .unwrap();

    let observer = Arc::new(OnlyPets {
        events: Mutex::new(Vec::new()),
    });
    let registered = observer.clone();
    queue
        .write(move |db| {
            let coerced: Arc<dyn TransactionObserver> = registered;
            db.add_transaction_observer(&coerced);
            Ok(())
        })
        .unwrap();

    queue
        .write(|db| {
            db.execute("INSERT INTO persons (name) VALUES (?)", ["Arthur"])?;
            db.execute("INSERT INTO pets (name) VALUES (?)", ["Bobby"])
        })
        .unwrap();

    let seen = observer.events.lock().unwrap().clone();
    assert_eq!(seen, ["pets"]);
}
