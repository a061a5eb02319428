//! The persistence mapper: derives CRUD statements from a record's column
//! map and the table's primary key.

use std::sync::Arc;

use crate::connection::Database;
use crate::connection::schema::quote_identifier;
use crate::error::{Error, Result};
use crate::value::Value;

use super::Persistable;

/// Cache key for derived SQL text, per connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum PersistenceSqlKey {
    Insert {
        table: String,
        columns: Vec<String>,
    },
    Update {
        table: String,
        set_columns: Vec<String>,
        condition_columns: Vec<String>,
    },
    Delete {
        table: String,
        condition_columns: Vec<String>,
    },
    Exists {
        table: String,
        condition_columns: Vec<String>,
    },
}

fn cached_sql(
    db: &mut Database,
    key: PersistenceSqlKey,
    build: impl FnOnce() -> String,
) -> Arc<String> {
    if let Some(sql) = db.persistence_sql.get(&key) {
        return Arc::clone(sql);
    }
    let sql = Arc::new(build());
    db.persistence_sql.insert(key, Arc::clone(&sql));
    sql
}

fn non_empty_map<R: Persistable>(record: &R) -> Result<Vec<(String, Value)>> {
    let map = record.persistence_map();
    if map.is_empty() {
        return Err(Error::Argument(format!(
            "record for table {} has an empty persistence map",
            R::TABLE_NAME
        )));
    }
    Ok(map)
}

fn value_for<'m>(map: &'m [(String, Value)], column: &str) -> Option<&'m Value> {
    map.iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(column))
        .map(|(_, value)| value)
}

/// The primary-key condition: column names and bound values.
///
/// Requires the table to declare a primary key, and at least one key value to
/// be non-NULL.
fn primary_key_condition<R: Persistable>(
    db: &mut Database,
    map: &[(String, Value)],
) -> Result<(Vec<String>, Vec<Value>)> {
    let key = db.primary_key(R::TABLE_NAME)?;
    let columns = key.columns();
    if columns.is_empty() {
        return Err(Error::Schema(format!(
            "table {} has no primary key",
            R::TABLE_NAME
        )));
    }
    let values: Vec<Value> = columns
        .iter()
        .map(|column| value_for(map, column).cloned().unwrap_or(Value::Null))
        .collect();
    if values.iter().all(Value::is_null) {
        return Err(Error::Argument(format!(
            "invalid primary key values in {}: all NULL",
            R::TABLE_NAME
        )));
    }
    Ok((columns.to_vec(), values))
}

pub(crate) fn insert<R: Persistable>(db: &mut Database, record: &mut R) -> Result<()> {
    let map = non_empty_map(record)?;
    let columns: Vec<String> = map.iter().map(|(name, _)| name.clone()).collect();
    let sql = cached_sql(
        db,
        PersistenceSqlKey::Insert {
            table: R::TABLE_NAME.to_owned(),
            columns: columns.clone(),
        },
        || {
            let column_list = columns
                .iter()
                .map(|name| quote_identifier(name))
                .collect::<Vec<_>>()
                .join(", ");
            let placeholders = vec!["?"; columns.len()].join(", ");
            format!(
                "INSERT INTO {} ({column_list}) VALUES ({placeholders})",
                quote_identifier(R::TABLE_NAME)
            )
        },
    );

    let values: Vec<Value> = map.into_iter().map(|(_, value)| value).collect();
    let mut statement = db.prepare_update(&sql)?;
    statement.bind(values)?;
    let changes = statement.execute(db)?;

    if let Some(row_id) = changes.last_inserted_row_id {
        let key = db.primary_key(R::TABLE_NAME)?;
        if let Some(column) = key.rowid_column() {
            let column = column.to_owned();
            record.did_insert(row_id, &column);
        }
    }
    Ok(())
}

pub(crate) fn update<R: Persistable>(db: &mut Database, record: &R) -> Result<()> {
    let map = non_empty_map(record)?;
    let (key_columns, key_values) = primary_key_condition::<R>(db, &map)?;

    let mut set_columns: Vec<String> = map
        .iter()
        .filter(|(name, _)| {
            !key_columns
                .iter()
                .any(|key| key.eq_ignore_ascii_case(name))
        })
        .map(|(name, _)| name.clone())
        .collect();
    // A record holding nothing but its key still updates key = key, so
    // transaction observers see the touch.
    if set_columns.is_empty() {
        set_columns = key_columns.clone();
    }

    let sql = cached_sql(
        db,
        PersistenceSqlKey::Update {
            table: R::TABLE_NAME.to_owned(),
            set_columns: set_columns.clone(),
            condition_columns: key_columns.clone(),
        },
        || update_sql(R::TABLE_NAME, &set_columns, &key_columns),
    );

    let mut arguments: Vec<Value> = set_columns
        .iter()
        .map(|column| value_for(&map, column).cloned().unwrap_or(Value::Null))
        .collect();
    arguments.extend(key_values.iter().cloned());

    let mut statement = db.prepare_update(&sql)?;
    statement.bind(arguments)?;
    let changes = statement.execute(db)?;
    if changes.changed_row_count == 0 {
        return Err(Error::NotFound(not_found_description(
            R::TABLE_NAME,
            &key_columns,
            &key_values,
        )));
    }
    Ok(())
}

pub(crate) fn save<R: Persistable>(db: &mut Database, record: &mut R) -> Result<()> {
    let map = record.persistence_map();
    let can_update = {
        let key = db.primary_key(R::TABLE_NAME)?;
        let columns = key.columns();
        !columns.is_empty()
            && columns
                .iter()
                .any(|column| value_for(&map, column).is_some_and(|value| !value.is_null()))
    };
    if can_update {
        match update(db, record) {
            Err(Error::NotFound(_)) => insert(db, record),
            other => other,
        }
    } else {
        insert(db, record)
    }
}

pub(crate) fn delete<R: Persistable>(db: &mut Database, record: &R) -> Result<bool> {
    let map = non_empty_map(record)?;
    let (key_columns, key_values) = primary_key_condition::<R>(db, &map)?;
    let sql = cached_sql(
        db,
        PersistenceSqlKey::Delete {
            table: R::TABLE_NAME.to_owned(),
            condition_columns: key_columns.clone(),
        },
        || {
            format!(
                "DELETE FROM {} WHERE {}",
                quote_identifier(R::TABLE_NAME),
                condition_sql(&key_columns)
            )
        },
    );
    let mut statement = db.prepare_update(&sql)?;
    statement.bind(key_values)?;
    let changes = statement.execute(db)?;
    Ok(changes.changed_row_count > 0)
}

pub(crate) fn exists<R: Persistable>(db: &mut Database, record: &R) -> Result<bool> {
    let map = record.persistence_map();
    let key = db.primary_key(R::TABLE_NAME)?;
    let key_columns = key.columns().to_vec();
    if key_columns.is_empty() {
        return Err(Error::Schema(format!(
            "table {} has no primary key",
            R::TABLE_NAME
        )));
    }
    let key_values: Vec<Value> = key_columns
        .iter()
        .map(|column| value_for(&map, column).cloned().unwrap_or(Value::Null))
        .collect();
    // A record with no usable key cannot match any row.
    if key_values.iter().all(Value::is_null) {
        return Ok(false);
    }
    let sql = cached_sql(
        db,
        PersistenceSqlKey::Exists {
            table: R::TABLE_NAME.to_owned(),
            condition_columns: key_columns.clone(),
        },
        || {
            format!(
                "SELECT 1 FROM {} WHERE {}",
                quote_identifier(R::TABLE_NAME),
                condition_sql(&key_columns)
            )
        },
    );
    let mut statement = db.prepare_select(&sql)?;
    statement.bind(key_values)?;
    Ok(statement.fetch_one(db)?.is_some())
}

fn update_sql(table: &str, set_columns: &[String], key_columns: &[String]) -> String {
    let assignments = set_columns
        .iter()
        .map(|name| format!("{} = ?", quote_identifier(name)))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "UPDATE {} SET {assignments} WHERE {}",
        quote_identifier(table),
        condition_sql(key_columns)
    )
}

fn condition_sql(columns: &[String]) -> String {
    columns
        .iter()
        .map(|name| format!("{} = ?", quote_identifier(name)))
        .collect::<Vec<_>>()
        .join(" AND ")
}

fn not_found_description(table: &str, columns: &[String], values: &[Value]) -> String {
    let key = columns
        .iter()
        .zip(values)
        .map(|(column, value)| format!("{column}={value}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!("no row in {table} with {key}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_sql_shapes_set_and_condition() {
        let sql = update_sql(
            "persons",
            &["name".to_owned(), "age".to_owned()],
            &["id".to_owned()],
        );
        assert_eq!(
            sql,
            "UPDATE \"persons\" SET \"name\" = ?, \"age\" = ? WHERE \"id\" = ?"
        );
    }

    #[test]
    fn composite_conditions_join_with_and() {
        assert_eq!(
            condition_sql(&["a".to_owned(), "b".to_owned()]),
            "\"a\" = ? AND \"b\" = ?"
        );
    }
}
