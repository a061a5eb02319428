//! Compiled statements.
//!
//! A statement is compiled once by a [`Database`](crate::connection::Database)
//! and keeps its SQL, parameter metadata, and the table sets recorded by the
//! compile-time authorizer. The compiled handle itself lives in the
//! connection's prepared-statement cache; execution re-enters the connection,
//! which is why every execute method takes the database.

use std::collections::BTreeSet;
use std::sync::Arc;

mod arguments;

pub use arguments::StatementArguments;

use crate::connection::Database;
use crate::error::{Error, Result};
use crate::row::Row;
use crate::value::FromValue;

/// Parameter metadata recorded at compile time.
#[derive(Debug, Clone, Default)]
pub(crate) struct ParameterInfo {
    pub count: usize,
    /// Names per 1-based index, with the SQLite prefix character stripped;
    /// `None` for anonymous `?` parameters.
    pub names: Vec<Option<String>>,
}

impl ParameterInfo {
    /// Validate arguments against the declared parameters.
    ///
    /// Unnamed positional arguments binding to named parameters is permitted
    /// (they bind in declaration order).
    pub(crate) fn validate(&self, arguments: &StatementArguments) -> Result<()> {
        match arguments {
            StatementArguments::Empty => {
                if self.count == 0 {
                    Ok(())
                } else {
                    Err(Error::Argument(format!(
                        "wrong number of statement arguments: expected {}, got 0",
                        self.count
                    )))
                }
            }
            StatementArguments::Positional(values) => {
                if values.len() == self.count {
                    Ok(())
                } else {
                    Err(Error::Argument(format!(
                        "wrong number of statement arguments: expected {}, got {}",
                        self.count,
                        values.len()
                    )))
                }
            }
            StatementArguments::Named(values) => {
                let mut expected = BTreeSet::new();
                for (index, name) in self.names.iter().enumerate() {
                    match name {
                        Some(name) => {
                            expected.insert(name.as_str());
                        }
                        None => {
                            return Err(Error::Argument(format!(
                                "parameter {} has no name and cannot be bound from a named map",
                                index + 1
                            )));
                        }
                    }
                }
                for name in &expected {
                    if !values.contains_key(*name) {
                        return Err(Error::Argument(format!(
                            "missing statement argument: {name}"
                        )));
                    }
                }
                for name in values.keys() {
                    if !expected.contains(name.as_str()) {
                        return Err(Error::Argument(format!(
                            "unexpected statement argument: {name}"
                        )));
                    }
                }
                Ok(())
            }
        }
    }
}

/// A compiled read-only statement.
#[derive(Debug, Clone)]
pub struct SelectStatement {
    pub(crate) sql: Arc<String>,
    pub(crate) parameters: ParameterInfo,
    /// Tables read by this statement, recorded by the authorizer. This is the
    /// region the transaction-observation layer watches.
    pub(crate) read_tables: Arc<BTreeSet<String>>,
    pub(crate) arguments: Option<StatementArguments>,
}

impl SelectStatement {
    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Tables this statement reads from.
    #[must_use]
    pub fn read_tables(&self) -> &BTreeSet<String> {
        &self.read_tables
    }

    /// Bind arguments for the next execution.
    ///
    /// # Errors
    /// Returns [`Error::Argument`] when the count or names do not match the
    /// statement's declared parameters.
    pub fn bind(&mut self, arguments: impl Into<StatementArguments>) -> Result<()> {
        let arguments = arguments.into();
        self.parameters.validate(&arguments)?;
        self.arguments = Some(arguments);
        Ok(())
    }

    pub(crate) fn take_arguments(&mut self) -> Result<StatementArguments> {
        let arguments = self.arguments.take().unwrap_or_default();
        self.parameters.validate(&arguments)?;
        Ok(arguments)
    }

    /// Fetch every row as a detached copy.
    ///
    /// # Errors
    /// Returns an error if binding or stepping fails.
    pub fn fetch_all(&mut self, db: &mut Database) -> Result<Vec<Row>> {
        db.execute_select_statement(self)
    }

    /// Fetch the first row, if any.
    ///
    /// # Errors
    /// Returns an error if binding or stepping fails.
    pub fn fetch_one(&mut self, db: &mut Database) -> Result<Option<Row>> {
        db.execute_select_statement_first(self)
    }

    /// Strict-decode the first column of the first row.
    ///
    /// # Errors
    /// Returns [`Error::Conversion`] when no row comes back or the value does
    /// not convert.
    pub fn fetch_value<T: FromValue>(&mut self, db: &mut Database) -> Result<T> {
        match self.fetch_one(db)? {
            Some(row) => row.decode_at(0),
            None => Err(Error::Conversion(
                "statement returned no rows".to_owned(),
            )),
        }
    }
}

/// The outcome of an update statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Changes {
    pub changed_row_count: usize,
    /// Rowid assigned by the most recent successful INSERT, when the
    /// statement changed at least one row.
    pub last_inserted_row_id: Option<i64>,
}

/// A compiled statement that may write.
#[derive(Debug, Clone)]
pub struct UpdateStatement {
    pub(crate) sql: Arc<String>,
    pub(crate) parameters: ParameterInfo,
    /// Tables written by this statement, recorded by the authorizer.
    pub(crate) written_tables: Arc<BTreeSet<String>>,
    /// Compilation observed a schema-mutating action; executing this
    /// statement invalidates cached primary keys and prepared statements.
    pub(crate) mutates_schema: bool,
    pub(crate) arguments: Option<StatementArguments>,
}

impl UpdateStatement {
    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Tables this statement writes to.
    #[must_use]
    pub fn written_tables(&self) -> &BTreeSet<String> {
        &self.written_tables
    }

    #[must_use]
    pub fn mutates_schema(&self) -> bool {
        self.mutates_schema
    }

    /// Bind arguments for the next execution.
    ///
    /// # Errors
    /// Returns [`Error::Argument`] when the count or names do not match the
    /// statement's declared parameters.
    pub fn bind(&mut self, arguments: impl Into<StatementArguments>) -> Result<()> {
        let arguments = arguments.into();
        self.parameters.validate(&arguments)?;
        self.arguments = Some(arguments);
        Ok(())
    }

    pub(crate) fn take_arguments(&mut self) -> Result<StatementArguments> {
        let arguments = self.arguments.take().unwrap_or_default();
        self.parameters.validate(&arguments)?;
        Ok(arguments)
    }

    /// Run the statement.
    ///
    /// # Errors
    /// Returns [`Error::Sqlite`] with full statement context on engine
    /// failure, or [`Error::CommitVetoed`] when a transaction observer
    /// rejected the commit this statement triggered.
    pub fn execute(&mut self, db: &mut Database) -> Result<Changes> {
        db.execute_update_statement(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named_parameters() -> ParameterInfo {
        ParameterInfo {
            count: 2,
            names: vec![Some("id".to_owned()), Some("name".to_owned())],
        }
    }

    #[test]
    fn positional_arguments_may_bind_named_parameters() {
        let info = named_parameters();
        assert!(info.validate(&StatementArguments::from([1i64, 2])).is_ok());
        assert!(info.validate(&StatementArguments::from([1i64])).is_err());
    }

    #[test]
    fn named_arguments_must_match_exactly() {
        let info = named_parameters();
        assert!(
            info.validate(&StatementArguments::from([("id", 1i64), ("name", 2)]))
                .is_ok()
        );
        assert!(
            info.validate(&StatementArguments::from([("id", 1i64)]))
                .is_err()
        );
        assert!(
            info.validate(&StatementArguments::from([
                ("id", 1i64),
                ("name", 2),
                ("extra", 3)
            ]))
            .is_err()
        );
    }
}
