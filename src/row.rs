//! Detached database rows.
//!
//! Rows handed out by the public API own their values. The borrowed view over
//! a stepping statement lives inside the statement module and never escapes
//! the crate, so there is no lifetime hazard to manage at call sites.

use std::collections::HashMap;
use std::sync::Arc;

use crate::connection::Database;
use crate::error::Result;
use crate::statement::StatementArguments;
use crate::value::{FromValue, Value};

/// Column-name metadata shared by every row of one statement.
#[derive(Debug)]
pub(crate) struct ColumnLayout {
    names: Vec<String>,
    /// Lowercased name to leftmost index.
    index_by_name: HashMap<String, usize>,
}

impl ColumnLayout {
    pub(crate) fn new(names: Vec<String>) -> Arc<Self> {
        let mut index_by_name = HashMap::with_capacity(names.len());
        for (index, name) in names.iter().enumerate() {
            // entry() keeps the first insertion, so the leftmost duplicate wins.
            index_by_name.entry(name.to_ascii_lowercase()).or_insert(index);
        }
        Arc::new(Self {
            names,
            index_by_name,
        })
    }

    fn index_of(&self, name: &str) -> Option<usize> {
        if let Some(&index) = self.index_by_name.get(name) {
            return Some(index);
        }
        self.index_by_name.get(&name.to_ascii_lowercase()).copied()
    }
}

/// A detached row: an ordered sequence of `(column name, value)` pairs with
/// ASCII-case-insensitive lookup. On duplicate column names the leftmost one
/// wins.
#[derive(Debug, Clone)]
pub struct Row {
    layout: Arc<ColumnLayout>,
    values: Vec<Value>,
}

impl Row {
    pub(crate) fn new(layout: Arc<ColumnLayout>, values: Vec<Value>) -> Self {
        Self { layout, values }
    }

    /// Build a row from explicit pairs. Mostly useful in tests.
    #[must_use]
    pub fn from_pairs<I, N, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (N, V)>,
        N: Into<String>,
        V: Into<Value>,
    {
        let (names, values): (Vec<String>, Vec<Value>) = pairs
            .into_iter()
            .map(|(name, value)| (name.into(), value.into()))
            .unzip();
        Self {
            layout: ColumnLayout::new(names),
            values,
        }
    }

    #[must_use]
    pub fn column_count(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn column_name(&self, index: usize) -> Option<&str> {
        self.layout.names.get(index).map(String::as_str)
    }

    #[must_use]
    pub fn contains_column(&self, name: &str) -> bool {
        self.layout.index_of(name).is_some()
    }

    /// The value at `index`, if any.
    #[must_use]
    pub fn value_at(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// The value under `name` (case-insensitive, leftmost match).
    #[must_use]
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.layout.index_of(name).map(|index| &self.values[index])
    }

    /// Strict decode of a named column.
    ///
    /// # Errors
    /// Returns [`Error::Conversion`](crate::Error::Conversion) when the column
    /// is missing, NULL, or type-incompatible.
    pub fn decode<T: FromValue>(&self, name: &str) -> Result<T> {
        match self.value(name) {
            Some(value) => value.decode(),
            None => Err(crate::Error::Conversion(format!(
                "no such column: {name}"
            ))),
        }
    }

    /// Strict decode of a column by index.
    ///
    /// # Errors
    /// Returns [`Error::Conversion`](crate::Error::Conversion) when the index
    /// is out of bounds or the value does not convert.
    pub fn decode_at<T: FromValue>(&self, index: usize) -> Result<T> {
        match self.value_at(index) {
            Some(value) => value.decode(),
            None => Err(crate::Error::Conversion(format!(
                "no column at index {index}"
            ))),
        }
    }

    /// Fallible decode of a named column: `None` on absence, NULL, or
    /// mismatch.
    #[must_use]
    pub fn decode_opt<T: FromValue>(&self, name: &str) -> Option<T> {
        self.value(name).and_then(Value::decode_opt)
    }

    /// Iterate `(column name, value)` pairs in column order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.layout
            .names
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }

    /// Fetch all rows of a raw SQL query.
    ///
    /// # Errors
    /// Returns an error if compilation, binding, or stepping fails.
    pub fn fetch_all(
        db: &mut Database,
        sql: &str,
        arguments: impl Into<StatementArguments>,
    ) -> Result<Vec<Self>> {
        let mut statement = db.prepare_select(sql)?;
        statement.bind(arguments.into())?;
        statement.fetch_all(db)
    }

    /// Fetch the first row of a raw SQL query, if any.
    ///
    /// # Errors
    /// Returns an error if compilation, binding, or stepping fails.
    pub fn fetch_one(
        db: &mut Database,
        sql: &str,
        arguments: impl Into<StatementArguments>,
    ) -> Result<Option<Self>> {
        let mut statement = db.prepare_select(sql)?;
        statement.bind(arguments.into())?;
        statement.fetch_one(db)
    }
}

/// Raw equality over column names and storage values, used by the diff engine.
impl PartialEq for Row {
    fn eq(&self, other: &Self) -> bool {
        self.values == other.values && self.layout.names == other.layout.names
    }
}

impl Eq for Row {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive_and_leftmost() {
        let row = Row::from_pairs([("id", 1i64), ("Name", 2i64), ("NAME", 3i64)]);
        assert_eq!(row.value("name"), Some(&Value::Integer(2)));
        assert_eq!(row.value("NAME"), Some(&Value::Integer(2)));
        assert_eq!(row.value("missing"), None);
    }

    #[test]
    fn iteration_preserves_column_order() {
        let row = Row::from_pairs([("b", 1i64), ("a", 2i64)]);
        let names: Vec<&str> = row.iter().map(|(name, _)| name).collect();
        assert_eq!(names, ["b", "a"]);
    }

    #[test]
    fn decode_strict_and_fallible() {
        let row = Row::from_pairs([("id", Value::Integer(7)), ("note", Value::Null)]);
        assert_eq!(row.decode::<i64>("id").unwrap(), 7);
        assert!(row.decode::<String>("id").is_err());
        assert_eq!(row.decode_opt::<String>("note"), None);
        assert_eq!(row.decode::<Option<String>>("note").unwrap(), None);
    }
}
