//! Query values and typed fetch requests.

use std::marker::PhantomData;

use crate::connection::Database;
use crate::error::Result;
use crate::record::RowConvertible;
use crate::row::Row;

use super::expression::{SqlExpression, SqlOrdering, SqlSelectable};
use super::sql;

/// The source of a query.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlSource {
    Table {
        name: String,
        alias: Option<String>,
    },
    Subquery {
        query: Box<QueryDef>,
        alias: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SqlLimit {
    pub limit: i64,
    pub offset: Option<i64>,
}

/// A composable query value. Every derivation returns a new value.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryDef {
    pub(crate) selection: Vec<SqlSelectable>,
    pub(crate) distinct: bool,
    pub(crate) source: SqlSource,
    pub(crate) filter: Option<SqlExpression>,
    pub(crate) group_by: Vec<SqlExpression>,
    pub(crate) having: Option<SqlExpression>,
    pub(crate) ordering: Vec<SqlOrdering>,
    pub(crate) reversed: bool,
    pub(crate) limit: Option<SqlLimit>,
}

impl QueryDef {
    /// `SELECT * FROM table`.
    #[must_use]
    pub fn table(name: &str) -> Self {
        Self {
            selection: vec![SqlSelectable::Star { qualifier: None }],
            distinct: false,
            source: SqlSource::Table {
                name: name.to_owned(),
                alias: None,
            },
            filter: None,
            group_by: Vec::new(),
            having: None,
            ordering: Vec::new(),
            reversed: false,
            limit: None,
        }
    }

    /// Replace the selection.
    #[must_use]
    pub fn select(mut self, selection: Vec<SqlSelectable>) -> Self {
        self.selection = selection;
        self
    }

    #[must_use]
    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    /// AND-compose a filter.
    #[must_use]
    pub fn filter(mut self, predicate: SqlExpression) -> Self {
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing.and(predicate),
            None => predicate,
        });
        self
    }

    #[must_use]
    pub fn group(mut self, expressions: Vec<SqlExpression>) -> Self {
        self.group_by = expressions;
        self
    }

    /// AND-compose a HAVING predicate.
    #[must_use]
    pub fn having(mut self, predicate: SqlExpression) -> Self {
        self.having = Some(match self.having.take() {
            Some(existing) => existing.and(predicate),
            None => predicate,
        });
        self
    }

    /// Append ordering terms.
    #[must_use]
    pub fn order(mut self, orderings: Vec<SqlOrdering>) -> Self {
        self.ordering.extend(orderings);
        self
    }

    /// Toggle the reversal flag. Resolution happens at SQL generation time:
    /// existing orderings flip; otherwise the source table's primary key
    /// provides a descending ordering.
    #[must_use]
    pub fn reverse(mut self) -> Self {
        self.reversed = !self.reversed;
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: i64, offset: Option<i64>) -> Self {
        self.limit = Some(SqlLimit { limit, offset });
        self
    }

    /// Render this query into SQL with a parallel binding list.
    ///
    /// # Errors
    /// Returns [`Error::Schema`](crate::Error::Schema) when a reversal has no
    /// deterministic ordering to flip.
    pub fn sql(&self, db: &mut Database) -> Result<(String, Vec<crate::value::Value>)> {
        sql::query_sql(db, self)
    }
}

/// A typed fetch request: a [`QueryDef`] plus the record type its rows decode
/// into.
#[derive(Debug)]
pub struct FetchRequest<R> {
    pub(crate) query: QueryDef,
    record: PhantomData<fn() -> R>,
}

impl<R> Clone for FetchRequest<R> {
    fn clone(&self) -> Self {
        Self {
            query: self.query.clone(),
            record: PhantomData,
        }
    }
}

impl<R> From<FetchRequest<R>> for QueryDef {
    fn from(request: FetchRequest<R>) -> Self {
        request.query
    }
}

impl<R> FetchRequest<R> {
    /// `SELECT * FROM table`, decoding into `R`.
    #[must_use]
    pub fn table(name: &str) -> Self {
        Self::from_query(QueryDef::table(name))
    }

    #[must_use]
    pub fn from_query(query: QueryDef) -> Self {
        Self {
            query,
            record: PhantomData,
        }
    }

    #[must_use]
    pub fn select(self, selection: Vec<SqlSelectable>) -> Self {
        Self::from_query(self.query.select(selection))
    }

    #[must_use]
    pub fn distinct(self) -> Self {
        Self::from_query(self.query.distinct())
    }

    #[must_use]
    pub fn filter(self, predicate: SqlExpression) -> Self {
        Self::from_query(self.query.filter(predicate))
    }

    #[must_use]
    pub fn group(self, expressions: Vec<SqlExpression>) -> Self {
        Self::from_query(self.query.group(expressions))
    }

    #[must_use]
    pub fn having(self, predicate: SqlExpression) -> Self {
        Self::from_query(self.query.having(predicate))
    }

    #[must_use]
    pub fn order(self, orderings: Vec<SqlOrdering>) -> Self {
        Self::from_query(self.query.order(orderings))
    }

    #[must_use]
    pub fn reverse(self) -> Self {
        Self::from_query(self.query.reverse())
    }

    #[must_use]
    pub fn limit(self, limit: i64, offset: Option<i64>) -> Self {
        Self::from_query(self.query.limit(limit, offset))
    }

    /// Render this request into SQL with a parallel binding list.
    ///
    /// # Errors
    /// See [`QueryDef::sql`].
    pub fn sql(&self, db: &mut Database) -> Result<(String, Vec<crate::value::Value>)> {
        self.query.sql(db)
    }

    /// Fetch all rows without decoding.
    ///
    /// # Errors
    /// Returns an error if generation, compilation, or stepping fails.
    pub fn fetch_rows(&self, db: &mut Database) -> Result<Vec<Row>> {
        let (sql, arguments) = self.query.sql(db)?;
        Row::fetch_all(db, &sql, arguments)
    }

    /// Delete every row this request matches; returns the number of deleted
    /// rows.
    ///
    /// # Errors
    /// Returns [`Error::Argument`](crate::Error::Argument) for requests that
    /// cannot delete (subquery source, grouping, limit, DISTINCT), or any
    /// statement error.
    pub fn delete_all(&self, db: &mut Database) -> Result<usize> {
        let (sql, arguments) = sql::delete_sql(db, &self.query)?;
        let mut statement = db.prepare_update(&sql)?;
        statement.bind(arguments)?;
        Ok(statement.execute(db)?.changed_row_count)
    }

    /// Number of rows this request matches, via the count-query rewrite.
    ///
    /// # Errors
    /// Returns an error if generation, compilation, or stepping fails.
    pub fn fetch_count(&self, db: &mut Database) -> Result<usize> {
        let (sql, arguments) = sql::count_sql(db, &self.query)?;
        let mut statement = db.prepare_select(&sql)?;
        statement.bind(arguments)?;
        let count: i64 = statement.fetch_value(db)?;
        Ok(usize::try_from(count).unwrap_or(0))
    }
}

impl<R: RowConvertible> FetchRequest<R> {
    /// Fetch and decode every matching record.
    ///
    /// # Errors
    /// Returns an error if the fetch or any row decode fails.
    pub fn fetch_all(&self, db: &mut Database) -> Result<Vec<R>> {
        self.fetch_rows(db)?
            .iter()
            .map(R::from_row)
            .collect()
    }

    /// Fetch and decode the first matching record, if any.
    ///
    /// # Errors
    /// Returns an error if the fetch or the row decode fails.
    pub fn fetch_one(&self, db: &mut Database) -> Result<Option<R>> {
        let (sql, arguments) = self.query.sql(db)?;
        match Row::fetch_one(db, &sql, arguments)? {
            Some(row) => Ok(Some(R::from_row(&row)?)),
            None => Ok(None),
        }
    }
}
