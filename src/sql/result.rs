//! Typed access to raw query results.

use crate::error::{Error, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use std::fmt;

/// A single scalar as returned by a backend.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Real(r) => write!(f, "{r}"),
            Value::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// A rectangular result: rows of scalars.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    rows: Vec<Vec<Value>>,
}

impl ResultSet {
    pub fn new(rows: Vec<Vec<Value>>) -> Self {
        Self { rows }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// A one-row, one-column result.
    pub fn single(value: impl Into<Value>) -> Self {
        Self {
            rows: vec![vec![value.into()]],
        }
    }

    /// A one-column result with a row per value.
    pub fn column<V: Into<Value>>(values: impl IntoIterator<Item = V>) -> Self {
        Self {
            rows: values.into_iter().map(|v| vec![v.into()]).collect(),
        }
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Vec<Value>> {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Text values of the first column, skipping nulls.
    pub fn first_column_text(&self) -> Vec<String> {
        self.rows
            .iter()
            .filter_map(|row| row.first())
            .filter(|v| !v.is_null())
            .map(|v| v.to_string())
            .collect()
    }
}

/// Extract the sole scalar of a result.
///
/// Zero rows, a single empty row, or a single null are all "no value".
pub fn parse_single_value(result: &ResultSet) -> Result<Option<&Value>> {
    let rows = result.rows();
    if rows.len() > 1 {
        return Err(Error::Shape("row"));
    }
    let Some(row) = rows.first() else {
        return Ok(None);
    };
    if row.len() > 1 {
        return Err(Error::Shape("column"));
    }
    match row.first() {
        None | Some(Value::Null) => Ok(None),
        Some(value) => Ok(Some(value)),
    }
}

pub fn get_single_int(result: &ResultSet) -> Result<Option<i64>> {
    let Some(value) = parse_single_value(result)? else {
        return Ok(None);
    };
    match value {
        Value::Integer(i) => Ok(Some(*i)),
        Value::Text(s) => s
            .trim()
            .parse::<i64>()
            .map(Some)
            .map_err(|_| Error::conversion(s, "integer")),
        Value::Real(r) if r.fract() == 0.0 => Ok(Some(*r as i64)),
        other => Err(Error::conversion(other, "integer")),
    }
}

pub fn get_single_time(result: &ResultSet) -> Result<Option<DateTime<Utc>>> {
    let Some(value) = parse_single_value(result)? else {
        return Ok(None);
    };
    match value {
        Value::Text(s) => parse_time(s).map(Some),
        other => Err(Error::conversion(other, "timestamp")),
    }
}

/// Parse a backend timestamp string. Strings without zone information are UTC.
pub fn parse_time(raw: &str) -> Result<DateTime<Utc>> {
    let s = raw.trim();

    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Ok(t.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f%#z", "%Y-%m-%dT%H:%M:%S%.f%#z", "%Y-%m-%d %H:%M:%S%.f %#z"] {
        if let Ok(t) = DateTime::parse_from_str(s, format) {
            return Ok(t.with_timezone(&Utc));
        }
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(t) = NaiveDateTime::parse_from_str(s, format) {
            return Ok(t.and_utc());
        }
    }

    Err(Error::conversion(s, "timestamp"))
}
