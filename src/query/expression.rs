//! The SQL expression algebra.
//!
//! Expressions, orderings and selectables are plain tagged values: composing
//! them builds an AST that the generator later renders into parameterized
//! SQL. No SQL string concatenation happens at composition time.

use crate::value::Value;

use super::request::QueryDef;

/// A SQL expression.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlExpression {
    /// Raw SQL, inserted verbatim.
    Literal(String),
    /// A bound value (rendered as a `?` placeholder; NULL renders inline).
    Value(Value),
    /// A column reference, optionally qualified by a table name or alias.
    Column {
        name: String,
        qualifier: Option<String>,
    },
    /// An expression with an explicit collation.
    Collated {
        expression: Box<SqlExpression>,
        collation: String,
    },
    Not(Box<SqlExpression>),
    Equal(Box<SqlExpression>, Box<SqlExpression>),
    NotEqual(Box<SqlExpression>, Box<SqlExpression>),
    Is(Box<SqlExpression>, Box<SqlExpression>),
    IsNot(Box<SqlExpression>, Box<SqlExpression>),
    Prefix {
        operator: &'static str,
        expression: Box<SqlExpression>,
    },
    Infix {
        operator: &'static str,
        lhs: Box<SqlExpression>,
        rhs: Box<SqlExpression>,
    },
    /// `test IN (values…)`. An empty list renders as the literal `0`; its
    /// negation as `1`.
    InList {
        test: Box<SqlExpression>,
        values: Vec<SqlExpression>,
    },
    /// `test IN (subquery)`.
    InSubquery {
        test: Box<SqlExpression>,
        query: Box<QueryDef>,
    },
    /// `EXISTS (subquery)`.
    Exists(Box<QueryDef>),
    /// `test BETWEEN lower AND upper`.
    Between {
        test: Box<SqlExpression>,
        lower: Box<SqlExpression>,
        upper: Box<SqlExpression>,
    },
    /// A SQL function call.
    Function {
        name: String,
        arguments: Vec<SqlExpression>,
    },
    /// `COUNT(selectable)`.
    Count(Box<SqlSelectable>),
    /// `COUNT(DISTINCT expression)`.
    CountDistinct(Box<SqlExpression>),
}

/// An ordering term.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlOrdering {
    Asc(SqlExpression),
    Desc(SqlExpression),
}

impl SqlOrdering {
    #[must_use]
    pub fn reversed(&self) -> Self {
        match self {
            Self::Asc(expression) => Self::Desc(expression.clone()),
            Self::Desc(expression) => Self::Asc(expression.clone()),
        }
    }
}

/// A result column of a SELECT.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlSelectable {
    /// `*`, or `qualifier.*`.
    Star { qualifier: Option<String> },
    /// An expression, optionally aliased.
    Expression {
        expression: SqlExpression,
        alias: Option<String>,
    },
}

/// A column reference.
#[must_use]
pub fn col(name: &str) -> SqlExpression {
    SqlExpression::Column {
        name: name.to_owned(),
        qualifier: None,
    }
}

/// Raw SQL inserted verbatim into the generated statement.
#[must_use]
pub fn literal(sql: &str) -> SqlExpression {
    SqlExpression::Literal(sql.to_owned())
}

/// A SQL function call.
#[must_use]
pub fn function(name: &str, arguments: Vec<SqlExpression>) -> SqlExpression {
    SqlExpression::Function {
        name: name.to_owned(),
        arguments,
    }
}

/// `COUNT(*)`.
#[must_use]
pub fn count_all() -> SqlExpression {
    SqlExpression::Count(Box::new(SqlSelectable::Star { qualifier: None }))
}

/// `COUNT(DISTINCT expression)`.
#[must_use]
pub fn count_distinct(expression: SqlExpression) -> SqlExpression {
    SqlExpression::CountDistinct(Box::new(expression))
}

/// `SUM(expression)`.
#[must_use]
pub fn sum(expression: SqlExpression) -> SqlExpression {
    function("SUM", vec![expression])
}

/// `AVG(expression)`.
#[must_use]
pub fn average(expression: SqlExpression) -> SqlExpression {
    function("AVG", vec![expression])
}

/// `MIN(expression)`.
#[must_use]
pub fn min(expression: SqlExpression) -> SqlExpression {
    function("MIN", vec![expression])
}

/// `MAX(expression)`.
#[must_use]
pub fn max(expression: SqlExpression) -> SqlExpression {
    function("MAX", vec![expression])
}

/// Conversion into an expression. Plain values become bound placeholders.
pub trait IntoSqlExpression {
    fn into_expression(self) -> SqlExpression;
}

impl IntoSqlExpression for SqlExpression {
    fn into_expression(self) -> SqlExpression {
        self
    }
}

macro_rules! value_expression {
    ($($ty:ty),* $(,)?) => {
        $(
            impl IntoSqlExpression for $ty {
                fn into_expression(self) -> SqlExpression {
                    SqlExpression::Value(self.into())
                }
            }
        )*
    };
}

value_expression!(Value, i64, i32, u32, f64, bool, String, &str, Vec<u8>);

impl<T> IntoSqlExpression for Option<T>
where
    T: IntoSqlExpression,
{
    fn into_expression(self) -> SqlExpression {
        match self {
            Some(value) => value.into_expression(),
            None => SqlExpression::Value(Value::Null),
        }
    }
}

impl SqlExpression {
    #[must_use]
    pub fn equals(self, other: impl IntoSqlExpression) -> Self {
        Self::Equal(Box::new(self), Box::new(other.into_expression()))
    }

    #[must_use]
    pub fn not_equals(self, other: impl IntoSqlExpression) -> Self {
        Self::NotEqual(Box::new(self), Box::new(other.into_expression()))
    }

    #[must_use]
    pub fn is(self, other: impl IntoSqlExpression) -> Self {
        Self::Is(Box::new(self), Box::new(other.into_expression()))
    }

    #[must_use]
    pub fn is_not(self, other: impl IntoSqlExpression) -> Self {
        Self::IsNot(Box::new(self), Box::new(other.into_expression()))
    }

    #[must_use]
    pub fn greater_than(self, other: impl IntoSqlExpression) -> Self {
        self.infix(">", other)
    }

    #[must_use]
    pub fn greater_than_or_equal(self, other: impl IntoSqlExpression) -> Self {
        self.infix(">=", other)
    }

    #[must_use]
    pub fn less_than(self, other: impl IntoSqlExpression) -> Self {
        self.infix("<", other)
    }

    #[must_use]
    pub fn less_than_or_equal(self, other: impl IntoSqlExpression) -> Self {
        self.infix("<=", other)
    }

    #[must_use]
    pub fn and(self, other: impl IntoSqlExpression) -> Self {
        self.infix("AND", other)
    }

    #[must_use]
    pub fn or(self, other: impl IntoSqlExpression) -> Self {
        self.infix("OR", other)
    }

    #[must_use]
    pub fn like(self, pattern: impl IntoSqlExpression) -> Self {
        self.infix("LIKE", pattern)
    }

    #[must_use]
    pub fn negated(self) -> Self {
        Self::Not(Box::new(self))
    }

    #[must_use]
    pub fn negative(self) -> Self {
        Self::Prefix {
            operator: "-",
            expression: Box::new(self),
        }
    }

    fn infix(self, operator: &'static str, other: impl IntoSqlExpression) -> Self {
        Self::Infix {
            operator,
            lhs: Box::new(self),
            rhs: Box::new(other.into_expression()),
        }
    }

    /// Apply a collation.
    #[must_use]
    pub fn collating(self, collation: &str) -> Self {
        Self::Collated {
            expression: Box::new(self),
            collation: collation.to_owned(),
        }
    }

    /// `self BETWEEN lower AND upper` (inclusive bounds).
    #[must_use]
    pub fn between(
        self,
        lower: impl IntoSqlExpression,
        upper: impl IntoSqlExpression,
    ) -> Self {
        Self::Between {
            test: Box::new(self),
            lower: Box::new(lower.into_expression()),
            upper: Box::new(upper.into_expression()),
        }
    }

    /// Membership in a range or sequence: inclusive ranges map to `BETWEEN`,
    /// half-open ranges to a pair of comparisons, sequences to `IN (…)`.
    #[must_use]
    pub fn contained_in(self, container: impl SqlContainer) -> Self {
        container.contains(self)
    }

    /// Membership in a subquery.
    #[must_use]
    pub fn in_subquery(self, query: impl Into<QueryDef>) -> Self {
        Self::InSubquery {
            test: Box::new(self),
            query: Box::new(query.into()),
        }
    }

    /// Ascending ordering term.
    #[must_use]
    pub fn asc(self) -> SqlOrdering {
        SqlOrdering::Asc(self)
    }

    /// Descending ordering term.
    #[must_use]
    pub fn desc(self) -> SqlOrdering {
        SqlOrdering::Desc(self)
    }

    /// Alias this expression in a selection.
    #[must_use]
    pub fn aliased(self, alias: &str) -> SqlSelectable {
        SqlSelectable::Expression {
            expression: self,
            alias: Some(alias.to_owned()),
        }
    }
}

impl From<SqlExpression> for SqlSelectable {
    fn from(expression: SqlExpression) -> Self {
        Self::Expression {
            expression,
            alias: None,
        }
    }
}

/// Containers usable on the right-hand side of a `contains` test.
pub trait SqlContainer {
    fn contains(self, element: SqlExpression) -> SqlExpression;
}

impl<T> SqlContainer for std::ops::Range<T>
where
    T: IntoSqlExpression,
{
    fn contains(self, element: SqlExpression) -> SqlExpression {
        element
            .clone()
            .greater_than_or_equal(self.start)
            .and(element.less_than(self.end))
    }
}

impl<T> SqlContainer for std::ops::RangeInclusive<T>
where
    T: IntoSqlExpression,
{
    fn contains(self, element: SqlExpression) -> SqlExpression {
        let (start, end) = self.into_inner();
        element.between(start, end)
    }
}

impl<T> SqlContainer for Vec<T>
where
    T: IntoSqlExpression,
{
    fn contains(self, element: SqlExpression) -> SqlExpression {
        SqlExpression::InList {
            test: Box::new(element),
            values: self
                .into_iter()
                .map(IntoSqlExpression::into_expression)
                .collect(),
        }
    }
}

impl<T, const N: usize> SqlContainer for [T; N]
where
    T: IntoSqlExpression,
{
    fn contains(self, element: SqlExpression) -> SqlExpression {
        SqlExpression::InList {
            test: Box::new(element),
            values: self
                .into_iter()
                .map(IntoSqlExpression::into_expression)
                .collect(),
        }
    }
}
