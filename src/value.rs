use chrono::{DateTime, NaiveDate, NaiveTime};
use duckdb::types::{TimeUnit, ValueRef};
use serde::{Deserialize, Serialize};

/// Days between 0001-01-01 (CE) and the 1970-01-01 epoch DuckDB dates count from.
const EPOCH_DAYS_FROM_CE: i32 = 719_163;

/// Portable cell value used to serialize results across the process boundary.
///
/// DuckDB's native column types (integer widths, decimals, timestamps) are not
/// directly serializable, so every cell is folded into this closed set before
/// it leaves the executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Null,
}

impl Value {
    /// Collapses non-finite floats to an explicit null. Every other value is
    /// already in portable form, which makes normalization idempotent.
    pub fn normalized(self) -> Value {
        match self {
            Value::Float(f) if !f.is_finite() => Value::Null,
            other => other,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Converts one cell of a DuckDB result row into a portable value.
    ///
    /// Integer widths collapse to `Int`, float widths to `Float`, temporal
    /// types render as strings. Anything outside the portable set falls back
    /// to DuckDB's own string conversion, or null if it has none.
    pub(crate) fn from_duckdb_cell(row: &duckdb::Row<'_>, idx: usize) -> Value {
        let value_ref = match row.get_ref(idx) {
            Ok(v) => v,
            Err(_) => return Value::Null,
        };

        match value_ref {
            ValueRef::Null => Value::Null,
            ValueRef::Boolean(b) => Value::Bool(b),
            ValueRef::TinyInt(i) => Value::Int(i as i64),
            ValueRef::SmallInt(i) => Value::Int(i as i64),
            ValueRef::Int(i) => Value::Int(i as i64),
            ValueRef::BigInt(i) => Value::Int(i),
            ValueRef::HugeInt(i) => match i64::try_from(i) {
                Ok(v) => Value::Int(v),
                Err(_) => Value::Str(i.to_string()),
            },
            ValueRef::UTinyInt(i) => Value::Int(i as i64),
            ValueRef::USmallInt(i) => Value::Int(i as i64),
            ValueRef::UInt(i) => Value::Int(i as i64),
            ValueRef::UBigInt(i) => match i64::try_from(i) {
                Ok(v) => Value::Int(v),
                Err(_) => Value::Str(i.to_string()),
            },
            ValueRef::Float(f) => Value::Float(f as f64).normalized(),
            ValueRef::Double(f) => Value::Float(f).normalized(),
            ValueRef::Decimal(d) => match d.to_string().parse::<f64>() {
                Ok(f) => Value::Float(f).normalized(),
                Err(_) => Value::Str(d.to_string()),
            },
            ValueRef::Text(bytes) => Value::Str(String::from_utf8_lossy(bytes).into_owned()),
            ValueRef::Timestamp(unit, raw) => {
                let micros = match unit {
                    TimeUnit::Second => raw.saturating_mul(1_000_000),
                    TimeUnit::Millisecond => raw.saturating_mul(1_000),
                    TimeUnit::Microsecond => raw,
                    TimeUnit::Nanosecond => raw / 1_000,
                };
                match DateTime::from_timestamp_micros(micros) {
                    Some(ts) => Value::Str(ts.naive_utc().to_string()),
                    None => Value::Null,
                }
            }
            ValueRef::Date32(days) => {
                match NaiveDate::from_num_days_from_ce_opt(days + EPOCH_DAYS_FROM_CE) {
                    Some(date) => Value::Str(date.to_string()),
                    None => Value::Null,
                }
            }
            ValueRef::Time64(unit, raw) => {
                let micros = match unit {
                    TimeUnit::Second => raw.saturating_mul(1_000_000),
                    TimeUnit::Millisecond => raw.saturating_mul(1_000),
                    TimeUnit::Microsecond => raw,
                    TimeUnit::Nanosecond => raw / 1_000,
                };
                let secs = (micros / 1_000_000) as u32;
                let nanos = ((micros % 1_000_000) * 1_000) as u32;
                match NaiveTime::from_num_seconds_from_midnight_opt(secs, nanos) {
                    Some(time) => Value::Str(time.to_string()),
                    None => Value::Null,
                }
            }
            _ => row
                .get::<_, String>(idx)
                .map(Value::Str)
                .unwrap_or(Value::Null),
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{}", v),
            Value::Str(s) => write!(f, "{}", s),
            Value::Null => write!(f, "NULL"),
        }
    }
}

/// Normalizes a full result set. Idempotent: already-portable rows pass
/// through unchanged.
pub fn normalize_rows(rows: Vec<Vec<Value>>) -> Vec<Vec<Value>> {
    rows.into_iter()
        .map(|row| row.into_iter().map(Value::normalized).collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nan_and_infinity_become_null() {
        assert_eq!(Value::Float(f64::NAN).normalized(), Value::Null);
        assert_eq!(Value::Float(f64::INFINITY).normalized(), Value::Null);
        assert_eq!(Value::Float(f64::NEG_INFINITY).normalized(), Value::Null);
        assert_eq!(Value::Float(1.5).normalized(), Value::Float(1.5));
    }

    #[test]
    fn normalize_is_idempotent() {
        let rows = vec![
            vec![
                Value::Int(1),
                Value::Float(f64::NAN),
                Value::Str("a".into()),
            ],
            vec![Value::Bool(true), Value::Null, Value::Float(2.25)],
        ];
        let once = normalize_rows(rows);
        let twice = normalize_rows(once.clone());
        assert_eq!(once, twice);
        assert_eq!(once[0][1], Value::Null);
    }

    #[test]
    fn serializes_to_plain_json_scalars() {
        let row = vec![
            Value::Int(42),
            Value::Float(1.5),
            Value::Bool(false),
            Value::Str("east".into()),
            Value::Null,
        ];
        let json = serde_json::to_string(&row).unwrap();
        assert_eq!(json, r#"[42,1.5,false,"east",null]"#);
    }

    #[test]
    fn deserializes_heterogeneous_json() {
        let row: Vec<Value> = serde_json::from_str(r#"[1, 2.5, true, "x", null]"#).unwrap();
        assert_eq!(
            row,
            vec![
                Value::Int(1),
                Value::Float(2.5),
                Value::Bool(true),
                Value::Str("x".into()),
                Value::Null,
            ]
        );
    }
}
