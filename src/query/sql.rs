//! SQL generation: walks the query AST producing parameterized SQL with
//! positional placeholders and a parallel binding list.

use crate::connection::Database;
use crate::error::{Error, Result};
use crate::value::Value;

use super::expression::{SqlExpression, SqlOrdering, SqlSelectable};
use super::request::{QueryDef, SqlSource};

#[derive(Default)]
struct SqlBuilder {
    sql: String,
    arguments: Vec<Value>,
}

/// Render a query into SQL and its binding list.
pub(crate) fn query_sql(db: &mut Database, query: &QueryDef) -> Result<(String, Vec<Value>)> {
    let mut out = SqlBuilder::default();
    render_query(db, query, &mut out)?;
    Ok((out.sql, out.arguments))
}

/// Render the counting form of a query.
///
/// The rewrite avoids a wrapping subquery when the shape allows:
/// `SELECT * FROM t …` counts as `SELECT COUNT(*) FROM t …`, a single
/// DISTINCT expression counts as `SELECT COUNT(DISTINCT expr) …`; grouped,
/// limited or subquery-sourced queries wrap as
/// `SELECT COUNT(*) FROM (original without ordering)`.
pub(crate) fn count_sql(db: &mut Database, query: &QueryDef) -> Result<(String, Vec<Value>)> {
    // Ordering cannot change a count; drop it (and any pending reversal)
    // before deciding on a shape.
    let mut base = query.clone();
    base.ordering.clear();
    base.reversed = false;

    let plain_table_source = matches!(base.source, SqlSource::Table { .. });
    let needs_wrap = !base.group_by.is_empty() || base.limit.is_some() || !plain_table_source;

    if !needs_wrap {
        if !base.distinct
            && base.selection.len() == 1
            && matches!(base.selection[0], SqlSelectable::Star { .. })
        {
            let counted = QueryDef {
                selection: vec![SqlSelectable::Expression {
                    expression: SqlExpression::Count(Box::new(SqlSelectable::Star {
                        qualifier: None,
                    })),
                    alias: None,
                }],
                ..base
            };
            return query_sql(db, &counted);
        }
        if base.distinct && base.selection.len() == 1 {
            if let SqlSelectable::Expression { expression, .. } = &base.selection[0] {
                let counted = QueryDef {
                    selection: vec![SqlSelectable::Expression {
                        expression: SqlExpression::CountDistinct(Box::new(expression.clone())),
                        alias: None,
                    }],
                    distinct: false,
                    ..base.clone()
                };
                return query_sql(db, &counted);
            }
        }
    }

    let mut out = SqlBuilder::default();
    out.sql.push_str("SELECT COUNT(*) FROM (");
    render_query(db, &base, &mut out)?;
    out.sql.push(')');
    Ok((out.sql, out.arguments))
}

/// Render the deleting form of a request: `DELETE FROM t [WHERE …]`.
///
/// Only plain-table requests without grouping, limits or DISTINCT can turn
/// into deletions.
pub(crate) fn delete_sql(db: &mut Database, query: &QueryDef) -> Result<(String, Vec<Value>)> {
    let table = match &query.source {
        SqlSource::Table { name, .. } => name,
        SqlSource::Subquery { .. } => {
            return Err(Error::Argument(
                "cannot delete through a subquery source".to_owned(),
            ));
        }
    };
    if !query.group_by.is_empty() || query.limit.is_some() || query.distinct {
        return Err(Error::Argument(
            "cannot delete through a grouped, limited or DISTINCT request".to_owned(),
        ));
    }
    let mut out = SqlBuilder::default();
    out.sql.push_str("DELETE FROM ");
    out.sql.push_str(&quote(table));
    if let Some(filter) = &query.filter {
        out.sql.push_str(" WHERE ");
        render_expression(db, filter, &mut out)?;
    }
    Ok((out.sql, out.arguments))
}

fn render_query(db: &mut Database, query: &QueryDef, out: &mut SqlBuilder) -> Result<()> {
    out.sql.push_str("SELECT ");
    if query.distinct {
        out.sql.push_str("DISTINCT ");
    }
    if query.selection.is_empty() {
        out.sql.push('*');
    } else {
        for (index, selectable) in query.selection.iter().enumerate() {
            if index > 0 {
                out.sql.push_str(", ");
            }
            render_selectable(db, selectable, out)?;
        }
    }

    out.sql.push_str(" FROM ");
    match &query.source {
        SqlSource::Table { name, alias } => {
            out.sql.push_str(&quote(name));
            if let Some(alias) = alias {
                out.sql.push_str(" AS ");
                out.sql.push_str(&quote(alias));
            }
        }
        SqlSource::Subquery { query: inner, alias } => {
            out.sql.push('(');
            render_query(db, inner, out)?;
            out.sql.push(')');
            if let Some(alias) = alias {
                out.sql.push_str(" AS ");
                out.sql.push_str(&quote(alias));
            }
        }
    }

    if let Some(filter) = &query.filter {
        out.sql.push_str(" WHERE ");
        render_expression(db, filter, out)?;
    }

    if !query.group_by.is_empty() {
        out.sql.push_str(" GROUP BY ");
        for (index, expression) in query.group_by.iter().enumerate() {
            if index > 0 {
                out.sql.push_str(", ");
            }
            render_expression(db, expression, out)?;
        }
    }

    if let Some(having) = &query.having {
        out.sql.push_str(" HAVING ");
        render_expression(db, having, out)?;
    }

    let ordering = resolve_ordering(db, query)?;
    if !ordering.is_empty() {
        out.sql.push_str(" ORDER BY ");
        for (index, term) in ordering.iter().enumerate() {
            if index > 0 {
                out.sql.push_str(", ");
            }
            match term {
                SqlOrdering::Asc(expression) => render_expression(db, expression, out)?,
                SqlOrdering::Desc(expression) => {
                    render_expression(db, expression, out)?;
                    out.sql.push_str(" DESC");
                }
            }
        }
    }

    if let Some(limit) = &query.limit {
        out.sql.push_str(&format!(" LIMIT {}", limit.limit));
        if let Some(offset) = limit.offset {
            out.sql.push_str(&format!(" OFFSET {offset}"));
        }
    }
    Ok(())
}

/// The effective ordering after reversal resolution.
fn resolve_ordering(db: &mut Database, query: &QueryDef) -> Result<Vec<SqlOrdering>> {
    if !query.reversed {
        return Ok(query.ordering.clone());
    }
    if !query.ordering.is_empty() {
        return Ok(query.ordering.iter().map(SqlOrdering::reversed).collect());
    }
    // No explicit ordering: the source table's primary key provides a
    // deterministic descending ordering.
    match &query.source {
        SqlSource::Table { name, .. } => {
            let key = db.primary_key(name)?;
            let columns = key.columns();
            if columns.is_empty() {
                return Err(Error::Schema(format!(
                    "cannot reverse an unordered query: table {name} has no primary key"
                )));
            }
            Ok(columns
                .iter()
                .map(|column| {
                    SqlOrdering::Desc(SqlExpression::Column {
                        name: column.clone(),
                        qualifier: None,
                    })
                })
                .collect())
        }
        SqlSource::Subquery { .. } => Err(Error::Schema(
            "cannot reverse an unordered query on a subquery source".to_owned(),
        )),
    }
}

fn render_selectable(
    db: &mut Database,
    selectable: &SqlSelectable,
    out: &mut SqlBuilder,
) -> Result<()> {
    match selectable {
        SqlSelectable::Star { qualifier: None } => out.sql.push('*'),
        SqlSelectable::Star {
            qualifier: Some(qualifier),
        } => {
            out.sql.push_str(&quote(qualifier));
            out.sql.push_str(".*");
        }
        SqlSelectable::Expression { expression, alias } => {
            render_expression(db, expression, out)?;
            if let Some(alias) = alias {
                out.sql.push_str(" AS ");
                out.sql.push_str(&quote(alias));
            }
        }
    }
    Ok(())
}

/// Expression forms that render wrapped in their own parentheses. Collation
/// injection moves inside that closing parenthesis.
fn renders_parenthesized(expression: &SqlExpression) -> bool {
    matches!(
        expression,
        SqlExpression::Equal(..)
            | SqlExpression::NotEqual(..)
            | SqlExpression::Is(..)
            | SqlExpression::IsNot(..)
            | SqlExpression::Infix { .. }
            | SqlExpression::Between { .. }
    )
}

fn render_expression(
    db: &mut Database,
    expression: &SqlExpression,
    out: &mut SqlBuilder,
) -> Result<()> {
    match expression {
        SqlExpression::Literal(sql) => out.sql.push_str(sql),
        SqlExpression::Value(Value::Null) => out.sql.push_str("NULL"),
        SqlExpression::Value(value) => {
            out.sql.push('?');
            out.arguments.push(value.clone());
        }
        SqlExpression::Column { name, qualifier } => {
            if let Some(qualifier) = qualifier {
                out.sql.push_str(&quote(qualifier));
                out.sql.push('.');
            }
            out.sql.push_str(&quote(name));
        }
        SqlExpression::Collated {
            expression: inner,
            collation,
        } => {
            render_expression(db, inner, out)?;
            if renders_parenthesized(inner) {
                // `("a" = ?)` collates as `("a" = ? COLLATE NOCASE)`.
                let insert_at = out.sql.len() - 1;
                out.sql.insert_str(insert_at, &format!(" COLLATE {collation}"));
            } else {
                out.sql.push_str(&format!(" COLLATE {collation}"));
            }
        }
        SqlExpression::Not(inner) => match inner.as_ref() {
            // NOT (x IN ()) is vacuously true.
            SqlExpression::InList { values, .. } if values.is_empty() => out.sql.push('1'),
            _ => {
                out.sql.push_str("NOT ");
                render_expression(db, inner, out)?;
            }
        },
        SqlExpression::Equal(lhs, rhs) => match null_operand(lhs, rhs) {
            Some(operand) => {
                out.sql.push('(');
                render_expression(db, operand, out)?;
                out.sql.push_str(" IS NULL)");
            }
            None => render_binary(db, lhs, "=", rhs, out)?,
        },
        SqlExpression::NotEqual(lhs, rhs) => match null_operand(lhs, rhs) {
            Some(operand) => {
                out.sql.push('(');
                render_expression(db, operand, out)?;
                out.sql.push_str(" IS NOT NULL)");
            }
            None => render_binary(db, lhs, "<>", rhs, out)?,
        },
        SqlExpression::Is(lhs, rhs) => render_binary(db, lhs, "IS", rhs, out)?,
        SqlExpression::IsNot(lhs, rhs) => render_binary(db, lhs, "IS NOT", rhs, out)?,
        SqlExpression::Prefix {
            operator,
            expression: inner,
        } => {
            out.sql.push_str(operator);
            render_expression(db, inner, out)?;
        }
        SqlExpression::Infix { operator, lhs, rhs } => {
            render_binary(db, lhs, operator, rhs, out)?;
        }
        SqlExpression::InList { test, values } => {
            if values.is_empty() {
                // x IN () is vacuously false.
                out.sql.push('0');
            } else {
                render_expression(db, test, out)?;
                out.sql.push_str(" IN (");
                for (index, value) in values.iter().enumerate() {
                    if index > 0 {
                        out.sql.push_str(", ");
                    }
                    render_expression(db, value, out)?;
                }
                out.sql.push(')');
            }
        }
        SqlExpression::InSubquery { test, query } => {
            render_expression(db, test, out)?;
            out.sql.push_str(" IN (");
            render_query(db, query, out)?;
            out.sql.push(')');
        }
        SqlExpression::Exists(query) => {
            out.sql.push_str("EXISTS (");
            render_query(db, query, out)?;
            out.sql.push(')');
        }
        SqlExpression::Between { test, lower, upper } => {
            out.sql.push('(');
            render_expression(db, test, out)?;
            out.sql.push_str(" BETWEEN ");
            render_expression(db, lower, out)?;
            out.sql.push_str(" AND ");
            render_expression(db, upper, out)?;
            out.sql.push(')');
        }
        SqlExpression::Function { name, arguments } => {
            out.sql.push_str(name);
            out.sql.push('(');
            for (index, argument) in arguments.iter().enumerate() {
                if index > 0 {
                    out.sql.push_str(", ");
                }
                render_expression(db, argument, out)?;
            }
            out.sql.push(')');
        }
        SqlExpression::Count(selectable) => {
            out.sql.push_str("COUNT(");
            render_selectable(db, selectable, out)?;
            out.sql.push(')');
        }
        SqlExpression::CountDistinct(inner) => {
            out.sql.push_str("COUNT(DISTINCT ");
            render_expression(db, inner, out)?;
            out.sql.push(')');
        }
    }
    Ok(())
}

fn render_binary(
    db: &mut Database,
    lhs: &SqlExpression,
    operator: &str,
    rhs: &SqlExpression,
    out: &mut SqlBuilder,
) -> Result<()> {
    out.sql.push('(');
    render_expression(db, lhs, out)?;
    out.sql.push(' ');
    out.sql.push_str(operator);
    out.sql.push(' ');
    render_expression(db, rhs, out)?;
    out.sql.push(')');
    Ok(())
}

/// When one side of an (in)equality is the NULL value, the other side is the
/// operand to test with `IS NULL` / `IS NOT NULL`.
fn null_operand<'e>(
    lhs: &'e SqlExpression,
    rhs: &'e SqlExpression,
) -> Option<&'e SqlExpression> {
    match (lhs, rhs) {
        (SqlExpression::Value(Value::Null), other) | (other, SqlExpression::Value(Value::Null)) => {
            Some(other)
        }
        _ => None,
    }
}

fn quote(identifier: &str) -> String {
    crate::connection::schema::quote_identifier(identifier)
}
