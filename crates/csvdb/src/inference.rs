//! Scalar type inference for raw delimited-file fields.
//!
//! Preference order is Integer, then Real, then Text: the first parse that
//! succeeds wins, and Text always succeeds.

use csvdb_engine::DbValue;
use serde::Serialize;
use std::fmt;

/// Column type of a materialized table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Integer,
    Real,
    Text,
}

impl ColumnType {
    /// Engine type used in generated DDL.
    ///
    /// DuckDB's INTEGER and REAL are 32-bit; inference parses i64/f64.
    pub fn sql_type(&self) -> &'static str {
        match self {
            ColumnType::Integer => "BIGINT",
            ColumnType::Real => "DOUBLE",
            ColumnType::Text => "VARCHAR",
        }
    }

    /// Convert a raw field to this type, or `None` if it does not fit.
    ///
    /// Empty numeric fields load as NULL. Text keeps the field verbatim.
    pub fn coerce(&self, raw: &str) -> Option<DbValue> {
        match self {
            ColumnType::Text => Some(DbValue::Text(raw.to_string())),
            ColumnType::Integer | ColumnType::Real if raw.trim().is_empty() => Some(DbValue::Null),
            ColumnType::Integer => parse_integer(raw).map(DbValue::Integer),
            ColumnType::Real => parse_real(raw).map(DbValue::Real),
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::Integer => write!(f, "integer"),
            ColumnType::Real => write!(f, "real"),
            ColumnType::Text => write!(f, "text"),
        }
    }
}

/// Classify one raw value. Total: anything unparseable is Text.
pub fn infer(value: &str) -> ColumnType {
    if parse_integer(value).is_some() {
        ColumnType::Integer
    } else if parse_real(value).is_some() {
        ColumnType::Real
    } else {
        ColumnType::Text
    }
}

fn parse_integer(value: &str) -> Option<i64> {
    value.trim().parse::<i64>().ok()
}

// f64::from_str also accepts "inf" and "NaN"; those stay Text.
fn parse_real(value: &str) -> Option<f64> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
}
