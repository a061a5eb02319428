//! The composable query builder: a typed expression algebra, query values,
//! and their rendering into parameterized SQL.

mod expression;
mod request;
pub(crate) mod sql;

pub use expression::{
    IntoSqlExpression, SqlContainer, SqlExpression, SqlOrdering, SqlSelectable, average, col,
    count_all, count_distinct, function, literal, max, min, sum,
};
pub use request::{FetchRequest, QueryDef, SqlLimit, SqlSource};
