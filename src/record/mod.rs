//! Record traits: table mapping, row decoding, and persistence.

use crate::connection::Database;
use crate::error::Result;
use crate::query::FetchRequest;
use crate::row::Row;
use crate::value::Value;

pub(crate) mod persistence;

/// Associates a record type with its table.
pub trait TableRecord {
    const TABLE_NAME: &'static str;

    /// `SELECT * FROM table`, decoding into `Self`.
    #[must_use]
    fn all() -> FetchRequest<Self>
    where
        Self: Sized,
    {
        FetchRequest::table(Self::TABLE_NAME)
    }
}

/// Types that decode from a database row.
pub trait RowConvertible: Sized {
    /// Decode a record from a detached row.
    ///
    /// # Errors
    /// Returns [`Error::Conversion`](crate::Error::Conversion) when a column
    /// is missing or type-incompatible.
    fn from_row(row: &Row) -> Result<Self>;
}

/// Types that persist to a table.
///
/// The mapper derives INSERT/UPDATE/DELETE/EXISTS statements from
/// [`Persistable::persistence_map`] and the table's primary key read back
/// from SQLite.
pub trait Persistable: TableRecord {
    /// The record's columns and values, in insertion order.
    fn persistence_map(&self) -> Vec<(String, Value)>;

    /// Called after a successful insert into a rowid-aliased table with the
    /// assigned rowid and the aliasing column's name.
    fn did_insert(&mut self, row_id: i64, column: &str) {
        let _ = (row_id, column);
    }

    /// INSERT this record.
    ///
    /// # Errors
    /// Returns [`Error::Argument`](crate::Error::Argument) on an empty
    /// persistence map, or any statement error.
    fn insert(&mut self, db: &mut Database) -> Result<()>
    where
        Self: Sized,
    {
        persistence::insert(db, self)
    }

    /// UPDATE this record by primary key.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`](crate::Error::NotFound) when no row
    /// matched, [`Error::Schema`](crate::Error::Schema) when the table has no
    /// primary key, [`Error::Argument`](crate::Error::Argument) when every
    /// key value is NULL or missing.
    fn update(&self, db: &mut Database) -> Result<()>
    where
        Self: Sized,
    {
        persistence::update(db, self)
    }

    /// UPDATE when the primary key matches an existing row, INSERT otherwise.
    ///
    /// # Errors
    /// Propagates insert/update errors other than the probing
    /// [`Error::NotFound`](crate::Error::NotFound).
    fn save(&mut self, db: &mut Database) -> Result<()>
    where
        Self: Sized,
    {
        persistence::save(db, self)
    }

    /// DELETE this record by primary key; reports whether a row was removed.
    ///
    /// # Errors
    /// Same preconditions as [`Persistable::update`].
    fn delete(&self, db: &mut Database) -> Result<bool>
    where
        Self: Sized,
    {
        persistence::delete(db, self)
    }

    /// Whether a row with this record's primary key exists.
    ///
    /// # Errors
    /// Returns statement errors; a NULL or missing key reports `false`.
    fn exists(&self, db: &mut Database) -> Result<bool>
    where
        Self: Sized,
    {
        persistence::exists(db, self)
    }
}
