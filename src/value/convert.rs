//! Rust-side conversion traits for [`Value`].
//!
//! The conversion matrix follows SQLite storage classes: numeric classes
//! inter-convert (truncating or widening), text and blob convert only to
//! themselves, NULL converts to nothing.

use chrono::NaiveDateTime;

use super::Value;

/// Types that can be bound into a SQLite statement.
pub trait ToValue {
    fn to_value(&self) -> Value;
}

/// Types that can be decoded from a SQLite storage value.
///
/// `from_value` is the fallible form: `None` on NULL or any cross-class
/// mismatch. The strict form is [`Value::decode`].
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> Option<Self>;
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Integer(i) => Some(*i != 0),
            Value::Real(r) => Some(*r != 0.0),
            _ => None,
        }
    }
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Integer(i) => Some(*i),
            Value::Real(r) if r.is_finite() => Some(r.trunc() as i64),
            _ => None,
        }
    }
}

impl FromValue for i32 {
    fn from_value(value: &Value) -> Option<Self> {
        i64::from_value(value).and_then(|i| Self::try_from(i).ok())
    }
}

impl FromValue for u32 {
    fn from_value(value: &Value) -> Option<Self> {
        i64::from_value(value).and_then(|i| Self::try_from(i).ok())
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Integer(i) => Some(*i as f64),
            Value::Real(r) => Some(*r),
            _ => None,
        }
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Text(s) => Some(s.clone()),
            _ => None,
        }
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Blob(b) => Some(b.clone()),
            _ => None,
        }
    }
}

impl FromValue for NaiveDateTime {
    fn from_value(value: &Value) -> Option<Self> {
        let text = match value {
            Value::Text(s) => s.as_str(),
            _ => return None,
        };
        NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f")
            .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f"))
            .ok()
    }
}

impl FromValue for serde_json::Value {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Text(s) => serde_json::from_str(s).ok(),
            _ => None,
        }
    }
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Option<Self> {
        Some(value.clone())
    }
}

/// NULL decodes to `None`; anything else goes through the inner conversion.
impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Null => Some(None),
            other => T::from_value(other).map(Some),
        }
    }
}

impl<T> ToValue for T
where
    T: Clone + Into<Value>,
{
    fn to_value(&self) -> Value {
        self.clone().into()
    }
}

impl ToValue for NaiveDateTime {
    fn to_value(&self) -> Value {
        Value::Text(self.format("%F %T%.f").to_string())
    }
}

impl ToValue for serde_json::Value {
    fn to_value(&self) -> Value {
        Value::Text(self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_classes_inter_convert() {
        assert_eq!(Value::Integer(3).decode_opt::<f64>(), Some(3.0));
        assert_eq!(Value::Real(3.9).decode_opt::<i64>(), Some(3));
        assert_eq!(Value::Real(-3.9).decode_opt::<i64>(), Some(-3));
        assert_eq!(Value::Integer(0).decode_opt::<bool>(), Some(false));
        assert_eq!(Value::Real(0.5).decode_opt::<bool>(), Some(true));
    }

    #[test]
    fn text_and_blob_only_convert_to_themselves() {
        assert_eq!(Value::Text("12".into()).decode_opt::<i64>(), None);
        assert_eq!(Value::Integer(12).decode_opt::<String>(), None);
        assert_eq!(Value::Text("x".into()).decode_opt::<Vec<u8>>(), None);
        assert_eq!(
            Value::Blob(vec![1, 2]).decode_opt::<Vec<u8>>(),
            Some(vec![1, 2])
        );
    }

    #[test]
    fn strict_decode_fails_on_null() {
        assert!(Value::Null.decode::<i64>().is_err());
        assert_eq!(Value::Null.decode_opt::<Option<i64>>(), Some(None));
    }

    #[test]
    fn datetime_round_trip() {
        let dt = NaiveDateTime::parse_from_str("2024-05-06 07:08:09.123", "%Y-%m-%d %H:%M:%S%.f")
            .unwrap();
        let stored = dt.to_value();
        assert_eq!(stored.decode_opt::<NaiveDateTime>(), Some(dt));
    }

    #[test]
    fn json_round_trip() {
        let json: serde_json::Value = serde_json::json!({"a": [1, 2, 3]});
        assert_eq!(
            json.to_value().decode_opt::<serde_json::Value>(),
            Some(json)
        );
    }
}
