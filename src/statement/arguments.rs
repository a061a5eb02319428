//! Statement arguments: positional values or a named-value mapping.

use std::collections::HashMap;

use crate::value::Value;

/// Arguments for a prepared statement.
///
/// Arguments are consumed by execution and must be rebound for the next run.
/// A positional list may also be consumed prefix-wise across the statements
/// of a multi-statement script; see
/// [`Database::execute`](crate::connection::Database::execute).
#[derive(Debug, Clone, Default, PartialEq)]
pub enum StatementArguments {
    #[default]
    Empty,
    Positional(Vec<Value>),
    Named(HashMap<String, Value>),
}

impl StatementArguments {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Positional(values) => values.is_empty(),
            Self::Named(values) => values.is_empty(),
        }
    }

    /// Positional values, when this is a positional argument list.
    #[must_use]
    pub fn positional_values(&self) -> Option<&[Value]> {
        match self {
            Self::Empty => Some(&[]),
            Self::Positional(values) => Some(values),
            Self::Named(_) => None,
        }
    }

    /// Split off the first `count` positional values for one statement of a
    /// script, leaving the rest for its siblings. Named arguments are shared
    /// unsplit.
    pub(crate) fn consume_prefix(&mut self, count: usize) -> crate::Result<Self> {
        match self {
            Self::Empty => {
                if count == 0 {
                    Ok(Self::Empty)
                } else {
                    Err(crate::Error::Argument(format!(
                        "missing statement arguments: expected {count}, got 0"
                    )))
                }
            }
            Self::Positional(values) => {
                if values.len() < count {
                    return Err(crate::Error::Argument(format!(
                        "missing statement arguments: expected {count}, got {}",
                        values.len()
                    )));
                }
                let rest = values.split_off(count);
                let taken = std::mem::replace(values, rest);
                Ok(Self::Positional(taken))
            }
            Self::Named(_) => Ok(self.clone()),
        }
    }

    /// Values remaining after a script consumed its statements' prefixes.
    pub(crate) fn remaining_count(&self) -> usize {
        match self {
            Self::Empty | Self::Named(_) => 0,
            Self::Positional(values) => values.len(),
        }
    }
}

impl From<()> for StatementArguments {
    fn from((): ()) -> Self {
        Self::Empty
    }
}

impl From<Vec<Value>> for StatementArguments {
    fn from(values: Vec<Value>) -> Self {
        Self::Positional(values)
    }
}

impl From<&[Value]> for StatementArguments {
    fn from(values: &[Value]) -> Self {
        Self::Positional(values.to_vec())
    }
}

impl<V: Into<Value>, const N: usize> From<[V; N]> for StatementArguments {
    fn from(values: [V; N]) -> Self {
        Self::Positional(values.into_iter().map(Into::into).collect())
    }
}

impl<V: Into<Value>> From<HashMap<String, V>> for StatementArguments {
    fn from(values: HashMap<String, V>) -> Self {
        Self::Named(
            values
                .into_iter()
                .map(|(name, value)| (name, value.into()))
                .collect(),
        )
    }
}

impl<V: Into<Value> + Clone, const N: usize> From<[(&str, V); N]> for StatementArguments {
    fn from(values: [(&str, V); N]) -> Self {
        Self::Named(
            values
                .into_iter()
                .map(|(name, value)| (name.to_owned(), value.into()))
                .collect(),
        )
    }
}
