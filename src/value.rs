//! Backend-neutral cell values and the storage types they coerce to.
//!
//! `SqlValue` is what flows through row sets, bulk buffers and bound
//! parameters. `FieldKind` is the coerced storage type of a record property;
//! it drives row coercion, literal rendering and temp-table column typing.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
pub use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{DbError, DbResult};

/// A single cell value. `Null` is the backend null sentinel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub enum SqlValue {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Decimal(Decimal),
    Text(String),
    DateTime(DateTime<Utc>),
    Bytes(Vec<u8>),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            SqlValue::Null => "null",
            SqlValue::Bool(_) => "bool",
            SqlValue::Int(_) => "int",
            SqlValue::Float(_) => "float",
            SqlValue::Decimal(_) => "decimal",
            SqlValue::Text(_) => "text",
            SqlValue::DateTime(_) => "datetime",
            SqlValue::Bytes(_) => "bytes",
        }
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null => write!(f, "null"),
            SqlValue::Bool(b) => write!(f, "{}", b),
            SqlValue::Int(i) => write!(f, "{}", i),
            SqlValue::Float(x) => write!(f, "{}", x),
            SqlValue::Decimal(d) => write!(f, "{}", d),
            SqlValue::Text(s) => write!(f, "{}", s),
            SqlValue::DateTime(dt) => write!(f, "{}", format_instant(dt)),
            SqlValue::Bytes(b) => write!(f, "0x{}", hex::encode_upper(b)),
        }
    }
}

/// Parse decimal text; surrounding whitespace is ignored.
pub fn parse_decimal(text: &str) -> DbResult<Decimal> {
    Decimal::from_str(text.trim())
        .map_err(|e| DbError::TypeMismatch(format!("'{}' is not a decimal: {}", text, e)))
}

/// How an enum property is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumRepr {
    Int,
    Text,
}

/// Coerced storage type of a record property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Bool,
    Int,
    BigInt,
    Float,
    Double,
    Decimal,
    DateTime,
    Bytes,
    Enum(EnumRepr),
    /// A property type with no known SQL mapping.
    Unsupported(&'static str),
}

impl FieldKind {
    /// Name used by the fixed temp-table type mapping.
    pub fn type_name(&self) -> &'static str {
        match self {
            FieldKind::Text => "string",
            FieldKind::Bool => "bool",
            FieldKind::Int => "int",
            FieldKind::BigInt => "bigint",
            FieldKind::Float => "float",
            FieldKind::Double => "double",
            FieldKind::Decimal => "decimal",
            FieldKind::DateTime => "datetime",
            FieldKind::Bytes => "varbinary",
            FieldKind::Enum(EnumRepr::Int) => "int",
            FieldKind::Enum(EnumRepr::Text) => "string",
            FieldKind::Unsupported(name) => name,
        }
    }

    pub fn is_text_like(&self) -> bool {
        matches!(self, FieldKind::Text | FieldKind::Enum(EnumRepr::Text))
    }

    pub fn is_floating(&self) -> bool {
        matches!(self, FieldKind::Float | FieldKind::Double)
    }
}

/// What to do with a property type that has no SQL mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValuePolicy {
    /// Fail with `UnsupportedValueType` at the point of conversion.
    #[default]
    Strict,
    /// Pass the value through unexamined.
    Relaxed,
}

/// Canonical round-trip rendering of an instant.
pub fn format_instant(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Parse an instant from its round-trip text, accepting the naive forms
/// SQLite stores (`YYYY-MM-DD HH:MM:SS[.f]`, `T`-separated) as UTC.
pub fn parse_instant(text: &str) -> DbResult<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Ok(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Ok(naive.and_utc());
        }
    }
    if let Ok(date) = chrono::NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        if let Some(naive) = date.and_hms_opt(0, 0, 0) {
            return Ok(naive.and_utc());
        }
    }
    Err(DbError::TypeMismatch(format!("'{}' is not a date/time", text)))
}

/// Render a value as a backend literal for diagnostics and synthetic SQL.
pub fn render_literal(kind: FieldKind, value: &SqlValue, policy: ValuePolicy) -> DbResult<String> {
    if let FieldKind::Unsupported(type_name) = kind {
        return match policy {
            ValuePolicy::Strict => Err(DbError::UnsupportedValueType {
                field: String::new(),
                type_name: type_name.to_string(),
            }),
            ValuePolicy::Relaxed => Ok(plain_literal(value)),
        };
    }

    let rendered = match (kind, value) {
        (_, SqlValue::Null) => "null".to_string(),
        (FieldKind::Bool, SqlValue::Bool(b)) => if *b { "1" } else { "0" }.to_string(),
        (FieldKind::DateTime, SqlValue::Text(s)) => quote(&format_instant(&parse_instant(s)?)),
        (_, value) => plain_literal(value),
    };
    Ok(rendered)
}

fn plain_literal(value: &SqlValue) -> String {
    match value {
        SqlValue::Null => "null".to_string(),
        SqlValue::Bool(b) => if *b { "1" } else { "0" }.to_string(),
        SqlValue::Int(i) => i.to_string(),
        SqlValue::Float(x) => x.to_string(),
        SqlValue::Decimal(d) => d.to_string(),
        SqlValue::Text(s) => quote(s),
        SqlValue::DateTime(dt) => quote(&format_instant(dt)),
        SqlValue::Bytes(b) => format!("0x{}", hex::encode_upper(b)),
    }
}

fn quote(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_decimal() {
        assert_eq!(parse_decimal(" 123.40 ").unwrap().normalize().to_string(), "123.4");
        assert_eq!(parse_decimal("-0.50").unwrap(), Decimal::new(-5, 1));
        assert_eq!(parse_decimal("17").unwrap(), Decimal::from(17));
        assert!(matches!(parse_decimal("1.2.3"), Err(DbError::TypeMismatch(_))));
        assert!(parse_decimal("abc").is_err());
    }

    #[test]
    fn test_parse_instant_formats() {
        let expected = Utc.with_ymd_and_hms(2021, 3, 4, 5, 6, 7).unwrap();
        assert_eq!(parse_instant("2021-03-04T05:06:07Z").unwrap(), expected);
        assert_eq!(parse_instant("2021-03-04T05:06:07+00:00").unwrap(), expected);
        assert_eq!(parse_instant("2021-03-04 05:06:07").unwrap(), expected);
        assert_eq!(parse_instant("2021-03-04T05:06:07.000").unwrap(), expected);
        assert!(parse_instant("yesterday").is_err());
    }

    #[test]
    fn test_instant_round_trip() {
        let dt = Utc.with_ymd_and_hms(2020, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(parse_instant(&format_instant(&dt)).unwrap(), dt);
    }

    #[test]
    fn test_render_literals() {
        let strict = ValuePolicy::Strict;
        assert_eq!(
            render_literal(FieldKind::Text, &SqlValue::Text("O'Neil".into()), strict).unwrap(),
            "'O''Neil'"
        );
        assert_eq!(
            render_literal(FieldKind::Bool, &SqlValue::Bool(true), strict).unwrap(),
            "1"
        );
        assert_eq!(
            render_literal(FieldKind::Int, &SqlValue::Null, strict).unwrap(),
            "null"
        );
        assert_eq!(
            render_literal(FieldKind::Enum(EnumRepr::Int), &SqlValue::Int(2), strict).unwrap(),
            "2"
        );
        assert_eq!(
            render_literal(
                FieldKind::DateTime,
                &SqlValue::Text("2021-03-04 05:06:07".into()),
                strict
            )
            .unwrap(),
            "'2021-03-04T05:06:07Z'"
        );
        assert_eq!(
            render_literal(FieldKind::Bytes, &SqlValue::Bytes(vec![0x00, 0xab, 0x7f]), strict)
                .unwrap(),
            "0x00AB7F"
        );
        assert_eq!(
            render_literal(FieldKind::Decimal, &SqlValue::Decimal(Decimal::new(-1250, 2)), strict)
                .unwrap(),
            "-12.50"
        );
        assert_eq!(SqlValue::Bytes(vec![0xde, 0xad]).to_string(), "0xDEAD");
    }

    #[test]
    fn test_render_unsupported_depends_on_policy() {
        let kind = FieldKind::Unsupported("Uuid");
        let value = SqlValue::Text("abc".into());
        assert!(matches!(
            render_literal(kind, &value, ValuePolicy::Strict),
            Err(DbError::UnsupportedValueType { .. })
        ));
        assert_eq!(
            render_literal(kind, &value, ValuePolicy::Relaxed).unwrap(),
            "'abc'"
        );
    }
}
