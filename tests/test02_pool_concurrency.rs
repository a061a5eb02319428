use std::sync::mpsc;
use std::thread;

use sqlite_toolkit::prelude::*;
use sqlite_toolkit::{Database, Result as DbResult, Value};
use tempfile::tempdir;

fn unique_db_path(prefix: &str) -> String {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join(format!("{prefix}.sqlite"));
    std::mem::forget(dir);
    path.to_string_lossy().into_owned()
}

fn item_count(db: &mut Database) -> DbResult<i64> {
    Row::fetch_one(db, "SELECT COUNT(*) AS c FROM items", ())?
        .expect("count row")
        .decode("c")
}

fn item_pool(prefix: &str) -> DatabasePool {
    let pool = DatabasePool::open(unique_db_path(prefix), Config::default()).unwrap();
    pool.write(|db| db.execute_batch("CREATE TABLE items (id INTEGER PRIMARY KEY, v TEXT)"))
        .unwrap();
    pool
}

#[test]
fn pool_write_then_read_sees_the_write() {
    let pool = item_pool("pool-rw");
    pool.write(|db| db.execute("INSERT INTO items (v) VALUES (?)", ["one"]))
        .unwrap();
    let count = pool.read(item_count).unwrap();
    assert_eq!(count, 1);
}

#[test]
fn snapshot_reads_do_not_see_concurrent_commits() {
    let pool = item_pool("pool-snapshot");
    pool.write(|db| db.execute("INSERT INTO items (v) VALUES (?)", ["seed"]))
        .unwrap();

    let (in_read_tx, in_read_rx) = mpsc::channel::<()>();
    let (write_done_tx, write_done_rx) = mpsc::channel::<()>();

    let reader_pool = pool.clone();
    let reader = thread::spawn(move || {
        reader_pool.read(move |db| {
            let before = item_count(db)?;
            in_read_tx.send(()).expect("reader signal");
            write_done_rx.recv().expect("writer signal");
            let after = item_count(db)?;
            Ok((before, after))
        })
    });

    in_read_rx.recv().unwrap();
    pool.write(|db| db.execute("INSERT INTO items (v) VALUES (?)", ["concurrent"]))
        .unwrap();
    write_done_tx.send(()).unwrap();

    // Inside one read, both counts come from the same WAL snapshot.
    let (before, after) = reader.join().unwrap().unwrap();
    assert_eq!(before, 1);
    assert_eq!(after, 1);

    // A fresh read sees the committed write.
    let fresh = pool.read(item_count).unwrap();
    assert_eq!(fresh, 2);
}

#[test]
fn uncommitted_reads_have_statement_level_isolation_only() {
    let pool = item_pool("pool-uncommitted");
    pool.write(|db| db.execute("INSERT INTO items (v) VALUES (?)", ["seed"]))
        .unwrap();
    let count = pool.read_uncommitted(item_count).unwrap();
    assert_eq!(count, 1);
}

#[test]
fn readers_are_strictly_read_only() {
    let pool = item_pool("pool-readonly");
    let err = pool
        .read(|db| db.execute("INSERT INTO items (v) VALUES (?)", ["nope"]))
        .unwrap_err();
    assert!(matches!(err, Error::Sqlite(_)), "got {err:?}");
}

#[test]
fn functions_apply_to_writer_and_future_readers() {
    let pool = item_pool("pool-functions");
    pool.add_function("triple_it", 1, true, |values| {
        Ok(Value::Integer(values[0].decode::<i64>()? * 3))
    })
    .unwrap();

    let via_writer: i64 = pool
        .write(|db| {
            Row::fetch_one(db, "SELECT triple_it(7) AS t", ())?
                .expect("row")
                .decode("t")
        })
        .unwrap();
    assert_eq!(via_writer, 21);

    // The reader for this read is created after registration.
    let via_reader: i64 = pool
        .read(|db| {
            Row::fetch_one(db, "SELECT triple_it(5) AS t", ())?
                .expect("row")
                .decode("t")
        })
        .unwrap();
    assert_eq!(via_reader, 15);
}

#[test]
fn concurrent_writers_serialize() {
    let pool = item_pool("pool-stress");
    let mut handles = Vec::new();
    for i in 0..20 {
        let pool = pool.clone();
        handles.push(thread::spawn(move || {
            pool.write(move |db| {
                db.execute("INSERT INTO items (v) VALUES (?)", [format!("w{i}")])
            })
        }));
    }
    for handle in handles {
        handle.join().unwrap().unwrap();
    }
    let count = pool.read(item_count).unwrap();
    assert_eq!(count, 20);
}

#[test]
fn maintenance_operations_succeed() {
    let pool = item_pool("pool-maintenance");
    pool.write(|db| db.execute("INSERT INTO items (v) VALUES (?)", ["x"]))
        .unwrap();
    let _ = pool.read(item_count).unwrap();
    pool.release_memory().unwrap();
    pool.checkpoint().unwrap();
    let count = pool.read(item_count).unwrap();
    assert_eq!(count, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn awaitable_access_works_from_async_contexts() {
    let pool = item_pool("pool-async");
    pool.write_awaitable(|db| db.execute("INSERT INTO items (v) VALUES (?)", ["async"]))
        .await
        .unwrap();
    let count = pool.read_awaitable(item_count).await.unwrap();
    assert_eq!(count, 1);

    let queue = DatabaseQueue::open_in_memory(Config::default()).unwrap();
    queue
        .write_awaitable(|db| db.execute_batch("CREATE TABLE t (v TEXT)"))
        .await
        .unwrap();
    let none: Option<String> = queue
        .read_awaitable(|db| {
            Ok(Row::fetch_one(db, "SELECT v FROM t", ())?
                .and_then(|row| row.decode_opt::<String>("v")))
        })
        .await
        .unwrap();
    assert_eq!(none, None);
}
