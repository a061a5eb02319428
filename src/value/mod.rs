//! Tagged SQLite values and the conversions between them and Rust types.

use std::fmt;
use std::hash::{Hash, Hasher};

use rusqlite::ToSql;
use rusqlite::types::{ToSqlOutput, ValueRef};

mod convert;

pub use convert::{FromValue, ToValue};

/// A value stored in, or bound to, a SQLite database.
///
/// Variants follow SQLite's storage classes, not declared column affinities.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

/// The integer a float round-trips to exactly, if any.
fn exact_integer(real: f64) -> Option<i64> {
    // The upper bound is exclusive: 2^63 itself is representable as f64 but
    // not as i64.
    const MAX_EXACT: f64 = 9_223_372_036_854_775_808.0;
    if real.is_finite() && real >= -MAX_EXACT && real < MAX_EXACT {
        let truncated = real as i64;
        if truncated as f64 == real {
            return Some(truncated);
        }
    }
    None
}

impl Value {
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Strict decode: fails when the value is NULL or the storage class is
    /// incompatible with the requested type.
    ///
    /// # Errors
    /// Returns [`Error::Conversion`](crate::Error::Conversion) on NULL or
    /// cross-class mismatch.
    pub fn decode<T: FromValue>(&self) -> crate::Result<T> {
        T::from_value(self).ok_or_else(|| {
            crate::Error::Conversion(format!(
                "could not decode {} from SQLite value {self}",
                std::any::type_name::<T>()
            ))
        })
    }

    /// Fallible decode: `None` on NULL or any cross-class mismatch.
    #[must_use]
    pub fn decode_opt<T: FromValue>(&self) -> Option<T> {
        T::from_value(self)
    }

    pub(crate) fn from_sqlite_ref(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => Self::Null,
            ValueRef::Integer(i) => Self::Integer(i),
            ValueRef::Real(r) => Self::Real(r),
            ValueRef::Text(bytes) => Self::Text(String::from_utf8_lossy(bytes).into_owned()),
            ValueRef::Blob(bytes) => Self::Blob(bytes.to_vec()),
        }
    }

    pub(crate) fn into_sqlite(self) -> rusqlite::types::Value {
        match self {
            Self::Null => rusqlite::types::Value::Null,
            Self::Integer(i) => rusqlite::types::Value::Integer(i),
            Self::Real(r) => rusqlite::types::Value::Real(r),
            Self::Text(s) => rusqlite::types::Value::Text(s),
            Self::Blob(b) => rusqlite::types::Value::Blob(b),
        }
    }
}

/// Equality follows SQLite value semantics: NULL equals NULL, and an integer
/// equals a float exactly when the float round-trips through `i64`.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Integer(a), Self::Integer(b)) => a == b,
            (Self::Real(a), Self::Real(b)) => a == b,
            (Self::Integer(i), Self::Real(r)) | (Self::Real(r), Self::Integer(i)) => {
                exact_integer(*r) == Some(*i)
            }
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Blob(a), Self::Blob(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Self::Null => state.write_u8(0),
            Self::Integer(i) => state.write_i64(*i),
            // An exactly-integral float must hash like its integer, per Eq.
            Self::Real(r) => match exact_integer(*r) {
                Some(i) => state.write_i64(i),
                None => state.write_u64(r.to_bits()),
            },
            Self::Text(s) => s.hash(state),
            Self::Blob(b) => b.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Real(r) => write!(f, "{r}"),
            Self::Text(s) => write!(f, "{s:?}"),
            Self::Blob(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Self::Null => ToSqlOutput::Owned(rusqlite::types::Value::Null),
            Self::Integer(i) => ToSqlOutput::Owned(rusqlite::types::Value::Integer(*i)),
            Self::Real(r) => ToSqlOutput::Owned(rusqlite::types::Value::Real(*r)),
            Self::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Self::Blob(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
        })
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Real(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Self::Blob(value)
    }
}

impl From<&[u8]> for Value {
    fn from(value: &[u8]) -> Self {
        Self::Blob(value.to_vec())
    }
}

impl<T> From<Option<T>> for Value
where
    T: Into<Value>,
{
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn integer_and_exact_real_compare_equal() {
        assert_eq!(Value::Integer(3), Value::Real(3.0));
        assert_eq!(Value::Real(-7.0), Value::Integer(-7));
        assert_ne!(Value::Integer(3), Value::Real(3.5));
        assert_ne!(Value::Integer(1), Value::Real(f64::NAN));
    }

    #[test]
    fn huge_reals_do_not_bridge() {
        // 1e19 > i64::MAX, so no exact round-trip exists.
        assert_ne!(Value::Integer(i64::MAX), Value::Real(1.0e19));
        assert_eq!(exact_integer(1.0e19), None);
    }

    #[test]
    fn null_equals_null_and_nothing_else() {
        assert_eq!(Value::Null, Value::Null);
        assert_ne!(Value::Null, Value::Integer(0));
        assert_ne!(Value::Null, Value::Text(String::new()));
    }

    #[test]
    fn hash_respects_integer_real_bridge() {
        let mut set = HashSet::new();
        set.insert(Value::Integer(42));
        assert!(set.contains(&Value::Real(42.0)));
        assert!(!set.contains(&Value::Real(42.5)));
    }

    #[test]
    fn distinct_storage_classes_are_unequal() {
        assert_ne!(Value::Text("1".into()), Value::Integer(1));
        assert_ne!(Value::Blob(vec![0x31]), Value::Text("1".into()));
    }
}
