use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use sqlite_toolkit::prelude::*;
use sqlite_toolkit::{Result as DbResult, query::col};
use tempfile::tempdir;

fn unique_db_path(prefix: &str) -> String {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join(format!("{prefix}.sqlite"));
    std::mem::forget(dir);
    path.to_string_lossy().into_owned()
}

#[derive(Debug, Clone, PartialEq)]
struct Person {
    id: i64,
    name: String,
}

impl TableRecord for Person {
    const TABLE_NAME: &'static str = "persons";
}

impl RowConvertible for Person {
    fn from_row(row: &Row) -> DbResult<Self> {
        Ok(Self {
            id: row.decode("id")?,
            name: row.decode("name")?,
        })
    }
}

fn seeded_pool(prefix: &str) -> DatabasePool {
    let pool = DatabasePool::open(unique_db_path(prefix), Config::default()).unwrap();
    pool.write(|db| {
        db.execute_batch("CREATE TABLE persons (id INTEGER PRIMARY KEY, name TEXT NOT NULL)")?;
        db.execute(
            "INSERT INTO persons (id, name) VALUES (?, ?); \
             INSERT INTO persons (id, name) VALUES (?, ?)",
            [
                sqlite_toolkit::Value::Integer(1),
                "Arthur".into(),
                sqlite_toolkit::Value::Integer(2),
                "Barbara".into(),
            ],
        )
    })
    .unwrap();
    pool
}

fn wait_for<F: Fn() -> bool>(what: &str, condition: F) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(10));
    }
}

struct ChangeLog {
    changes: Mutex<Vec<(Person, RowChange)>>,
    passes: Mutex<Vec<Vec<String>>>,
}

impl ChangeLog {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            changes: Mutex::new(Vec::new()),
            passes: Mutex::new(Vec::new()),
        })
    }

    fn callbacks(self: &Arc<Self>) -> TrackingCallbacks<Person> {
        let on_change_log = Arc::clone(self);
        let did_change_log = Arc::clone(self);
        TrackingCallbacks {
            will_change: None,
            on_change: Some(Box::new(move |record, change| {
                on_change_log
                    .changes
                    .lock()
                    .unwrap()
                    .push((record.clone(), change.clone()));
            })),
            did_change: Some(Box::new(move |records: &[Person]| {
                did_change_log
                    .passes
                    .lock()
                    .unwrap()
                    .push(records.iter().map(|person| person.name.clone()).collect());
            })),
        }
    }

    fn pass_count(&self) -> usize {
        self.passes.lock().unwrap().len()
    }
}

fn tracked_by_name(
    writer: Arc<dyn DatabaseWriter>,
    log: &Arc<ChangeLog>,
) -> FetchedRecordsController<Person> {
    let request = Person::all().order(vec![col("name").asc()]);
    let controller = FetchedRecordsController::new(writer, request).unwrap();
    controller.track_changes(log.callbacks()).unwrap();
    controller.perform_fetch().unwrap();
    controller
}

#[test]
fn rename_that_reorders_is_a_single_move_with_old_values() {
    let pool = seeded_pool("tracking-move");
    let log = ChangeLog::new();
    let controller = tracked_by_name(Arc::new(pool.clone()), &log);

    assert_eq!(
        controller.fetched_records().unwrap(),
        vec![
            Person {
                id: 1,
                name: "Arthur".to_owned()
            },
            Person {
                id: 2,
                name: "Barbara".to_owned()
            },
        ]
    );

    pool.write(|db| db.execute("UPDATE persons SET name = ? WHERE id = ?", ["Alan", "2"]))
        .unwrap();
    wait_for("the move pass", || log.pass_count() == 1);

    let changes = log.changes.lock().unwrap().clone();
    assert_eq!(changes.len(), 1);
    let (record, change) = &changes[0];
    assert_eq!(record.id, 2);
    assert_eq!(record.name, "Alan");
    match change {
        RowChange::Moved {
            old_index,
            new_index,
            changes,
        } => {
            assert_eq!((*old_index, *new_index), (1, 0));
            assert_eq!(
                changes.get("name"),
                Some(&sqlite_toolkit::Value::Text("Barbara".to_owned()))
            );
            assert_eq!(changes.len(), 1);
        }
        other => panic!("expected a move, got {other:?}"),
    }

    let passes = log.passes.lock().unwrap().clone();
    assert_eq!(passes, vec![vec!["Alan".to_owned(), "Arthur".to_owned()]]);
}

#[test]
fn in_place_rename_is_an_update() {
    let pool = seeded_pool("tracking-update");
    let log = ChangeLog::new();
    let _controller = tracked_by_name(Arc::new(pool.clone()), &log);

    // "Art" still sorts before "Barbara": same index, so the change fuses
    // into an update.
    pool.write(|db| db.execute("UPDATE persons SET name = ? WHERE id = ?", ["Art", "1"]))
        .unwrap();
    wait_for("the update pass", || log.pass_count() == 1);

    let changes = log.changes.lock().unwrap().clone();
    assert_eq!(changes.len(), 1);
    match &changes[0].1 {
        RowChange::Updated {
            old_index,
            new_index,
            changes,
        } => {
            assert_eq!((*old_index, *new_index), (0, 0));
            assert_eq!(
                changes.get("name"),
                Some(&sqlite_toolkit::Value::Text("Arthur".to_owned()))
            );
        }
        other => panic!("expected an update, got {other:?}"),
    }
}

#[test]
fn every_commit_produces_one_pass_in_order() {
    let pool = seeded_pool("tracking-order");
    let log = ChangeLog::new();
    let _controller = tracked_by_name(Arc::new(pool.clone()), &log);

    for (id, name) in [(3i64, "Craig"), (4, "David"), (5, "Eve")] {
        pool.write(move |db| {
            db.execute(
                "INSERT INTO persons (id, name) VALUES (?, ?)",
                [sqlite_toolkit::Value::Integer(id), name.into()],
            )
        })
        .unwrap();
    }
    wait_for("three passes", || log.pass_count() == 3);

    let passes = log.passes.lock().unwrap().clone();
    assert_eq!(passes.len(), 3);
    assert_eq!(passes[0].len(), 3);
    assert_eq!(passes[1].len(), 4);
    assert_eq!(passes[2].len(), 5);
    assert_eq!(passes[2][2], "Craig");
}

#[test]
fn commits_to_unobserved_tables_trigger_nothing() {
    let pool = seeded_pool("tracking-unrelated");
    pool.write(|db| db.execute_batch("CREATE TABLE pets (id INTEGER PRIMARY KEY, name TEXT)"))
        .unwrap();
    let log = ChangeLog::new();
    let _controller = tracked_by_name(Arc::new(pool.clone()), &log);

    pool.write(|db| db.execute("INSERT INTO pets (name) VALUES (?)", ["Bobby"]))
        .unwrap();
    // Give any stray pass a chance to land before checking.
    std::thread::sleep(Duration::from_millis(150));
    assert_eq!(log.pass_count(), 0);
}

#[test]
fn rolled_back_writes_trigger_nothing() {
    let pool = seeded_pool("tracking-rollback");
    let log = ChangeLog::new();
    let _controller = tracked_by_name(Arc::new(pool.clone()), &log);

    let _ = pool
        .write_in_transaction(None, |db| {
            db.execute(
                "INSERT INTO persons (id, name) VALUES (?, ?)",
                [sqlite_toolkit::Value::Integer(9), "Zoe".into()],
            )?;
            Err::<(), Error>(Error::Argument("abort".to_owned()))
        })
        .unwrap_err();

    std::thread::sleep(Duration::from_millis(150));
    assert_eq!(log.pass_count(), 0);
}

#[test]
fn queue_writers_track_too() {
    let queue = DatabaseQueue::open_in_memory(Config::default()).unwrap();
    queue
        .write(|db| {
            db.execute_batch("CREATE TABLE persons (id INTEGER PRIMARY KEY, name TEXT NOT NULL)")?;
            db.execute(
                "INSERT INTO persons (id, name) VALUES (?, ?)",
                [sqlite_toolkit::Value::Integer(1), "Arthur".into()],
            )
        })
        .unwrap();

    let log = ChangeLog::new();
    let _controller = tracked_by_name(Arc::new(queue.clone()), &log);

    queue
        .write(|db| {
            db.execute(
                "INSERT INTO persons (id, name) VALUES (?, ?)",
                [sqlite_toolkit::Value::Integer(2), "Barbara".into()],
            )
        })
        .unwrap();
    wait_for("the queue pass", || log.pass_count() == 1);
    assert_eq!(
        log.passes.lock().unwrap()[0],
        vec!["Arthur".to_owned(), "Barbara".to_owned()]
    );
}

#[test]
fn dropping_the_controller_stops_tracking() {
    let pool = seeded_pool("tracking-drop");
    let log = ChangeLog::new();
    let controller = tracked_by_name(Arc::new(pool.clone()), &log);
    drop(controller);

    pool.write(|db| db.execute("UPDATE persons SET name = ? WHERE id = ?", ["Alan", "2"]))
        .unwrap();
    std::thread::sleep(Duration::from_millis(150));
    assert_eq!(log.pass_count(), 0);
}
