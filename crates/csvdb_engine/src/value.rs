//! Values crossing the engine boundary.
//!
//! Bound parameters only ever come from coerced source fields, but result
//! values come from arbitrary user queries, so every engine type has a
//! readable rendering here.

use crate::backend::BackendError;
use chrono::{DateTime, NaiveDate, NaiveTime};
use duckdb::types::{TimeUnit, Value};
use std::fmt;

/// A scalar bound into, or read out of, a statement.
#[derive(Debug, Clone, PartialEq)]
pub enum DbValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
    Boolean(bool),
}

impl fmt::Display for DbValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DbValue::Null => f.write_str("NULL"),
            DbValue::Integer(v) => write!(f, "{v}"),
            DbValue::Real(v) => write!(f, "{v}"),
            DbValue::Text(v) => f.write_str(v),
            DbValue::Blob(v) => write!(f, "<{} bytes>", v.len()),
            DbValue::Boolean(v) => write!(f, "{v}"),
        }
    }
}

impl DbValue {
    pub(crate) fn to_engine(&self) -> Value {
        match self {
            DbValue::Null => Value::Null,
            DbValue::Integer(v) => Value::BigInt(*v),
            DbValue::Real(v) => Value::Double(*v),
            DbValue::Text(v) => Value::Text(v.clone()),
            DbValue::Blob(v) => Value::Blob(v.clone()),
            DbValue::Boolean(v) => Value::Boolean(*v),
        }
    }

    /// Map one engine result value.
    ///
    /// Integers that do not fit `i64` and nested values become text so
    /// nothing is truncated or shown as a debug dump.
    pub(crate) fn from_engine(value: Value) -> Self {
        match value {
            Value::Null => DbValue::Null,
            Value::Boolean(v) => DbValue::Boolean(v),
            Value::TinyInt(v) => DbValue::Integer(v.into()),
            Value::SmallInt(v) => DbValue::Integer(v.into()),
            Value::Int(v) => DbValue::Integer(v.into()),
            Value::BigInt(v) => DbValue::Integer(v),
            Value::UTinyInt(v) => DbValue::Integer(v.into()),
            Value::USmallInt(v) => DbValue::Integer(v.into()),
            Value::UInt(v) => DbValue::Integer(v.into()),
            Value::HugeInt(v) => i64::try_from(v)
                .map(DbValue::Integer)
                .unwrap_or_else(|_| DbValue::Text(v.to_string())),
            Value::UBigInt(v) => i64::try_from(v)
                .map(DbValue::Integer)
                .unwrap_or_else(|_| DbValue::Text(v.to_string())),
            Value::Float(v) => DbValue::Real(v.into()),
            Value::Double(v) => DbValue::Real(v),
            Value::Decimal(d) => {
                let text = d.to_string();
                match text.parse::<f64>() {
                    Ok(v) => DbValue::Real(v),
                    Err(_) => DbValue::Text(text),
                }
            }
            Value::Text(v) => DbValue::Text(v),
            Value::Blob(v) => DbValue::Blob(v),
            Value::Enum(v) => DbValue::Text(v),
            Value::Union(inner) => DbValue::from_engine(*inner),
            other => DbValue::Text(render(&other)),
        }
    }
}

/// Text form of any engine value, close to what the DuckDB shell prints.
fn render(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Boolean(v) => v.to_string(),
        Value::TinyInt(v) => v.to_string(),
        Value::SmallInt(v) => v.to_string(),
        Value::Int(v) => v.to_string(),
        Value::BigInt(v) => v.to_string(),
        Value::HugeInt(v) => v.to_string(),
        Value::UTinyInt(v) => v.to_string(),
        Value::USmallInt(v) => v.to_string(),
        Value::UInt(v) => v.to_string(),
        Value::UBigInt(v) => v.to_string(),
        Value::Float(v) => v.to_string(),
        Value::Double(v) => v.to_string(),
        Value::Decimal(d) => d.to_string(),
        Value::Text(v) | Value::Enum(v) => v.clone(),
        Value::Blob(v) => format!("<{} bytes>", v.len()),
        Value::Timestamp(unit, v) => render_timestamp(to_micros(*unit, *v)),
        Value::Date32(days) => render_date(*days),
        Value::Time64(unit, v) => render_time(to_micros(*unit, *v)),
        Value::Interval {
            months,
            days,
            nanos,
        } => render_interval(*months, *days, *nanos),
        Value::List(items) | Value::Array(items) => {
            let inner: Vec<String> = items.iter().map(render).collect();
            format!("[{}]", inner.join(", "))
        }
        Value::Struct(fields) => {
            let inner: Vec<String> = fields
                .iter()
                .map(|(k, v)| format!("'{}': {}", k, render(v)))
                .collect();
            format!("{{{}}}", inner.join(", "))
        }
        Value::Map(entries) => {
            let inner: Vec<String> = entries
                .iter()
                .map(|(k, v)| format!("{}={}", render(k), render(v)))
                .collect();
            format!("{{{}}}", inner.join(", "))
        }
        Value::Union(inner) => render(inner),
    }
}

fn to_micros(unit: TimeUnit, v: i64) -> i64 {
    match unit {
        TimeUnit::Second => v.saturating_mul(1_000_000),
        TimeUnit::Millisecond => v.saturating_mul(1_000),
        TimeUnit::Microsecond => v,
        TimeUnit::Nanosecond => v / 1_000,
    }
}

fn render_timestamp(micros: i64) -> String {
    match DateTime::from_timestamp_micros(micros) {
        Some(ts) => ts.naive_utc().format("%Y-%m-%d %H:%M:%S%.f").to_string(),
        None => micros.to_string(),
    }
}

fn render_date(days_since_epoch: i32) -> String {
    NaiveDate::from_ymd_opt(1970, 1, 1)
        .and_then(|epoch| epoch.checked_add_signed(chrono::Duration::days(days_since_epoch.into())))
        .map(|date| date.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| days_since_epoch.to_string())
}

fn render_time(micros: i64) -> String {
    let secs = micros.div_euclid(1_000_000);
    let nanos = micros.rem_euclid(1_000_000) * 1_000;
    match (u32::try_from(secs), u32::try_from(nanos)) {
        (Ok(secs), Ok(nanos)) => NaiveTime::from_num_seconds_from_midnight_opt(secs, nanos)
            .map(|t| t.format("%H:%M:%S%.f").to_string())
            .unwrap_or_else(|| micros.to_string()),
        _ => micros.to_string(),
    }
}

/// `1 year 2 months 3 days 04:05:06`, omitting zero parts.
fn render_interval(months: i32, days: i32, nanos: i64) -> String {
    fn unit(n: i64, name: &str) -> String {
        if n.abs() == 1 {
            format!("{n} {name}")
        } else {
            format!("{n} {name}s")
        }
    }

    let mut parts = Vec::new();
    let years = i64::from(months / 12);
    let months = i64::from(months % 12);
    if years != 0 {
        parts.push(unit(years, "year"));
    }
    if months != 0 {
        parts.push(unit(months, "month"));
    }
    if days != 0 {
        parts.push(unit(days.into(), "day"));
    }
    if nanos != 0 || parts.is_empty() {
        let sign = if nanos < 0 { "-" } else { "" };
        let micros = (nanos / 1_000).unsigned_abs();
        let secs = micros / 1_000_000;
        let mut clock = format!(
            "{sign}{:02}:{:02}:{:02}",
            secs / 3600,
            (secs / 60) % 60,
            secs % 60
        );
        let frac = micros % 1_000_000;
        if frac != 0 {
            clock.push_str(&format!(".{frac:06}"));
        }
        parts.push(clock);
    }
    parts.join(" ")
}

/// Conversion out of a result value.
pub trait FromDbValue: Sized {
    fn from_db_value(value: &DbValue) -> Result<Self, BackendError>;
}

impl FromDbValue for i64 {
    fn from_db_value(value: &DbValue) -> Result<Self, BackendError> {
        match value {
            DbValue::Integer(v) => Ok(*v),
            other => Err(mismatch("integer", other)),
        }
    }
}

impl FromDbValue for f64 {
    fn from_db_value(value: &DbValue) -> Result<Self, BackendError> {
        match value {
            DbValue::Real(v) => Ok(*v),
            DbValue::Integer(v) => Ok(*v as f64),
            other => Err(mismatch("real", other)),
        }
    }
}

impl FromDbValue for String {
    fn from_db_value(value: &DbValue) -> Result<Self, BackendError> {
        match value {
            DbValue::Text(v) => Ok(v.clone()),
            other => Err(mismatch("text", other)),
        }
    }
}

fn mismatch(expected: &str, found: &DbValue) -> BackendError {
    BackendError::TypeConversion(format!("expected {expected}, found {found:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wide_integers_fit_or_become_text() {
        assert_eq!(DbValue::from_engine(Value::HugeInt(3)), DbValue::Integer(3));
        assert_eq!(
            DbValue::from_engine(Value::HugeInt(i128::from(i64::MAX) + 1)),
            DbValue::Text("9223372036854775808".to_string())
        );
        assert_eq!(
            DbValue::from_engine(Value::UBigInt(u64::MAX)),
            DbValue::Text(u64::MAX.to_string())
        );
    }

    #[test]
    fn test_render_interval() {
        assert_eq!(render_interval(0, 1, 0), "1 day");
        assert_eq!(render_interval(14, 3, 0), "1 year 2 months 3 days");
        assert_eq!(render_interval(0, 0, 3_723_000_000_000), "01:02:03");
        assert_eq!(render_interval(0, 0, 1_500_000_000), "00:00:01.500000");
        assert_eq!(render_interval(0, -2, 0), "-2 days");
        assert_eq!(render_interval(0, 0, 0), "00:00:00");
    }

    #[test]
    fn test_render_dates_and_times() {
        assert_eq!(render_date(0), "1970-01-01");
        assert_eq!(render_date(19_723), "2024-01-01");
        assert_eq!(render_time(3_723_000_000), "01:02:03");
        assert_eq!(render_timestamp(0), "1970-01-01 00:00:00");
    }

    #[test]
    fn test_nested_values_render_as_text() {
        let list = Value::List(vec![Value::Int(1), Value::Text("a".to_string())]);
        assert_eq!(DbValue::from_engine(list), DbValue::Text("[1, a]".to_string()));
    }

    #[test]
    fn test_typed_reads_reject_other_kinds() {
        assert_eq!(i64::from_db_value(&DbValue::Integer(4)).unwrap(), 4);
        assert_eq!(f64::from_db_value(&DbValue::Integer(4)).unwrap(), 4.0);
        assert!(i64::from_db_value(&DbValue::Null).is_err());
        assert!(String::from_db_value(&DbValue::Real(1.0)).is_err());
    }
}
