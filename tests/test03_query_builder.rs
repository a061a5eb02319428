use sqlite_toolkit::prelude::*;
use sqlite_toolkit::query::SqlSelectable;
use sqlite_toolkit::{Result as DbResult, Value};

#[derive(Debug, Clone, PartialEq)]
struct Reader {
    id: i64,
    name: String,
    age: Option<i64>,
}

impl TableRecord for Reader {
    const TABLE_NAME: &'static str = "readers";
}

impl RowConvertible for Reader {
    fn from_row(row: &Row) -> DbResult<Self> {
        Ok(Self {
            id: row.decode("id")?,
            name: row.decode("name")?,
            age: row.decode("age")?,
        })
    }
}

fn reader_queue() -> DatabaseQueue {
    let queue = DatabaseQueue::open_in_memory(Config::default()).unwrap();
    queue
        .write(|db| {
            db.execute_batch(
                "CREATE TABLE readers (id INTEGER PRIMARY KEY, name TEXT NOT NULL, age INT)",
            )?;
            db.execute(
                "INSERT INTO readers (name, age) VALUES (?, ?); \
                 INSERT INTO readers (name, age) VALUES (?, ?)",
                [
                    Value::Text("Arthur".to_owned()),
                    Value::Integer(42),
                    Value::Text("Barbara".to_owned()),
                    Value::Integer(36),
                ],
            )
        })
        .unwrap();
    queue
}

#[test]
fn all_fetches_in_rowid_order_with_exact_sql() {
    let queue = reader_queue();
    let (sql, readers) = queue
        .read(|db| {
            let request = Reader::all();
            let (sql, arguments) = request.sql(db)?;
            assert!(arguments.is_empty());
            let readers = request.fetch_all(db)?;
            Ok((sql, readers))
        })
        .unwrap();
    assert_eq!(sql, r#"SELECT * FROM "readers""#);
    assert_eq!(readers.len(), 2);
    assert_eq!(readers[0].name, "Arthur");
    assert_eq!(readers[0].id, 1);
    assert_eq!(readers[1].name, "Barbara");
    assert_eq!(readers[1].id, 2);
}

#[test]
fn filters_and_compose_and_bind() {
    let queue = reader_queue();
    queue
        .read(|db| {
            let request = Reader::all()
                .filter(col("name").equals("Arthur"))
                .filter(col("age").greater_than(18));
            let (sql, arguments) = request.sql(db)?;
            assert_eq!(
                sql,
                r#"SELECT * FROM "readers" WHERE (("name" = ?) AND ("age" > ?))"#
            );
            assert_eq!(
                arguments,
                vec![Value::Text("Arthur".to_owned()), Value::Integer(18)]
            );
            assert_eq!(request.fetch_all(db)?.len(), 1);
            Ok(())
        })
        .unwrap();
}

#[test]
fn null_comparisons_rewrite_to_is_null() {
    let queue = reader_queue();
    queue
        .write(|db| db.execute("INSERT INTO readers (name) VALUES (?)", ["Craig"]))
        .unwrap();
    queue
        .read(|db| {
            let request = Reader::all().filter(col("age").equals(None::<i64>));
            let (sql, arguments) = request.sql(db)?;
            assert_eq!(sql, r#"SELECT * FROM "readers" WHERE ("age" IS NULL)"#);
            assert!(arguments.is_empty());
            assert_eq!(request.fetch_all(db)?.len(), 1);

            let (sql, _) = Reader::all()
                .filter(col("age").not_equals(None::<i64>))
                .sql(db)?;
            assert_eq!(sql, r#"SELECT * FROM "readers" WHERE ("age" IS NOT NULL)"#);
            Ok(())
        })
        .unwrap();
}

#[test]
fn empty_in_lists_collapse_to_literals() {
    let queue = reader_queue();
    queue
        .read(|db| {
            let none = Reader::all().filter(col("id").contained_in(Vec::<i64>::new()));
            let (sql, _) = none.sql(db)?;
            assert_eq!(sql, r#"SELECT * FROM "readers" WHERE 0"#);
            assert_eq!(none.fetch_count(db)?, 0);

            let everyone = Reader::all()
                .filter(col("id").contained_in(Vec::<i64>::new()).negated());
            let (sql, _) = everyone.sql(db)?;
            assert_eq!(sql, r#"SELECT * FROM "readers" WHERE 1"#);
            assert_eq!(everyone.fetch_count(db)?, 2);
            Ok(())
        })
        .unwrap();
}

#[test]
fn ranges_and_sequences_render_membership() {
    let queue = reader_queue();
    queue
        .read(|db| {
            let (sql, arguments) = Reader::all()
                .filter(col("age").contained_in(30..=40))
                .sql(db)?;
            assert_eq!(
                sql,
                r#"SELECT * FROM "readers" WHERE ("age" BETWEEN ? AND ?)"#
            );
            assert_eq!(arguments, vec![Value::Integer(30), Value::Integer(40)]);

            let (sql, _) = Reader::all()
                .filter(col("age").contained_in(30..40))
                .sql(db)?;
            assert_eq!(
                sql,
                r#"SELECT * FROM "readers" WHERE (("age" >= ?) AND ("age" < ?))"#
            );

            let (sql, _) = Reader::all()
                .filter(col("id").contained_in(vec![1i64, 2, 3]))
                .sql(db)?;
            assert_eq!(
                sql,
                r#"SELECT * FROM "readers" WHERE "id" IN (?, ?, ?)"#
            );
            Ok(())
        })
        .unwrap();
}

#[test]
fn collation_moves_inside_parenthesized_expressions() {
    let queue = reader_queue();
    queue
        .read(|db| {
            let (sql, _) = Reader::all()
                .filter(col("name").equals("arthur").collating("NOCASE"))
                .sql(db)?;
            assert_eq!(
                sql,
                r#"SELECT * FROM "readers" WHERE ("name" = ? COLLATE NOCASE)"#
            );

            let (sql, _) = Reader::all()
                .order(vec![col("name").collating("NOCASE").asc()])
                .sql(db)?;
            assert_eq!(
                sql,
                r#"SELECT * FROM "readers" ORDER BY "name" COLLATE NOCASE"#
            );
            Ok(())
        })
        .unwrap();
}

#[test]
fn ordering_limit_and_distinct() {
    let queue = reader_queue();
    queue
        .read(|db| {
            let request = Reader::all()
                .order(vec![col("age").desc()])
                .limit(1, None);
            let (sql, _) = request.sql(db)?;
            assert_eq!(
                sql,
                r#"SELECT * FROM "readers" ORDER BY "age" DESC LIMIT 1"#
            );
            let oldest = request.fetch_one(db)?.expect("row");
            assert_eq!(oldest.name, "Arthur");
            Ok(())
        })
        .unwrap();
}

#[test]
fn reverse_flips_orderings_or_uses_primary_key() {
    let queue = reader_queue();
    queue
        .read(|db| {
            let ordered = Reader::all().order(vec![col("name").asc()]);
            let (sql, _) = ordered.clone().reverse().sql(db)?;
            assert_eq!(
                sql,
                r#"SELECT * FROM "readers" ORDER BY "name" DESC"#
            );

            // Double reversal restores the original SQL.
            let (original, _) = ordered.sql(db)?;
            let (round_trip, _) = ordered.clone().reverse().reverse().sql(db)?;
            assert_eq!(original, round_trip);

            // Without orderings, the primary key provides a DESC ordering.
            let (sql, _) = Reader::all().reverse().sql(db)?;
            assert_eq!(sql, r#"SELECT * FROM "readers" ORDER BY "id" DESC"#);
            let reversed = Reader::all().reverse().fetch_all(db)?;
            assert_eq!(reversed[0].id, 2);
            Ok(())
        })
        .unwrap();
}

#[test]
fn reverse_without_deterministic_ordering_fails() {
    let queue = DatabaseQueue::open_in_memory(Config::default()).unwrap();
    queue
        .write(|db| db.execute_batch("CREATE TABLE logs (msg TEXT)"))
        .unwrap();
    let err = queue
        .read(|db| FetchRequest::<Row>::table("logs").reverse().sql(db))
        .unwrap_err();
    assert!(matches!(err, Error::Schema(_)), "got {err:?}");
}

#[test]
fn count_rewrites_agree_with_fetch_all() {
    let queue = reader_queue();
    queue
        .read(|db| {
            // (b) plain star selection counts directly.
            let all = Reader::all();
            assert_eq!(all.fetch_count(db)?, all.fetch_all(db)?.len());

            // filtered
            let filtered = Reader::all().filter(col("age").greater_than(40));
            assert_eq!(filtered.fetch_count(db)?, filtered.fetch_all(db)?.len());

            // (c) single DISTINCT expression.
            let distinct_names = Reader::all()
                .select(vec![col("name").into()])
                .distinct();
            assert_eq!(
                distinct_names.fetch_count(db)?,
                distinct_names.fetch_rows(db)?.len()
            );

            // (a) grouped queries wrap.
            let grouped = Reader::all()
                .select(vec![SqlSelectable::from(col("age"))])
                .group(vec![col("age")]);
            assert_eq!(grouped.fetch_count(db)?, grouped.fetch_rows(db)?.len());

            // (a) limited queries wrap.
            let limited = Reader::all().limit(1, None);
            assert_eq!(limited.fetch_count(db)?, limited.fetch_rows(db)?.len());
            Ok(())
        })
        .unwrap();
}

#[test]
fn subqueries_and_exists_render_inline() {
    let queue = reader_queue();
    queue
        .write(|db| {
            db.execute_batch("CREATE TABLE borrowings (readerId INTEGER NOT NULL)")?;
            db.execute("INSERT INTO borrowings (readerId) VALUES (?)", [1i64])
        })
        .unwrap();
    queue
        .read(|db| {
            let borrowers = QueryDef::table("borrowings")
                .select(vec![col("readerId").into()]);
            let request = Reader::all().filter(col("id").in_subquery(borrowers));
            let (sql, _) = request.sql(db)?;
            assert_eq!(
                sql,
                r#"SELECT * FROM "readers" WHERE "id" IN (SELECT "readerId" FROM "borrowings")"#
            );
            let borrowing_readers = request.fetch_all(db)?;
            assert_eq!(borrowing_readers.len(), 1);
            assert_eq!(borrowing_readers[0].name, "Arthur");
            Ok(())
        })
        .unwrap();
}

#[test]
fn aggregates_render_as_function_calls() {
    let queue = reader_queue();
    queue
        .read(|db| {
            use sqlite_toolkit::query::{average, sum};
            let request = Reader::all().select(vec![
                sum(col("age")).aliased("total"),
                average(col("age")).aliased("mean"),
            ]);
            let (sql, _) = request.sql(db)?;
            assert_eq!(
                sql,
                r#"SELECT SUM("age") AS "total", AVG("age") AS "mean" FROM "readers""#
            );
            let row = request.fetch_rows(db)?.remove(0);
            assert_eq!(row.decode::<i64>("total")?, 78);
            assert_eq!(row.decode::<f64>("mean")?, 39.0);
            Ok(())
        })
        .unwrap();
}

#[test]
fn delete_all_removes_matching_rows() {
    let queue = reader_queue();
    let deleted = queue
        .write(|db| {
            Reader::all()
                .filter(col("name").equals("Arthur"))
                .delete_all(db)
        })
        .unwrap();
    assert_eq!(deleted, 1);
    let remaining = queue.read(|db| Reader::all().fetch_count(db)).unwrap();
    assert_eq!(remaining, 1);

    // Limited or grouped requests refuse to delete.
    let err = queue
        .write(|db| Reader::all().limit(1, None).delete_all(db))
        .unwrap_err();
    assert!(matches!(err, Error::Argument(_)), "got {err:?}");
}

#[test]
fn ordering_does_not_change_counts() {
    let queue = reader_queue();
    queue
        .read(|db| {
            let request = Reader::all().order(vec![col("name").asc()]).reverse();
            assert_eq!(request.fetch_count(db)?, 2);
            Ok(())
        })
        .unwrap();
}
