use chrono::{DateTime, Utc};

use crate::error::{DbError, DbResult};
use crate::value::{Decimal, EnumRepr, FieldKind, SqlValue};

/// A property type with a known SQL mapping.
///
/// `from_value` expects a value already coerced to `KIND` by the mapper.
pub trait SqlField: Sized + Send + Sync + 'static {
    const KIND: FieldKind;
    const NULLABLE: bool = false;

    fn to_value(&self) -> SqlValue;
    fn from_value(value: SqlValue) -> DbResult<Self>;
}

fn mismatch<T>(expected: FieldKind, value: &SqlValue) -> DbResult<T> {
    Err(DbError::TypeMismatch(format!(
        "cannot assign {} value to {}",
        value.type_name(),
        expected.type_name()
    )))
}

impl SqlField for String {
    const KIND: FieldKind = FieldKind::Text;

    fn to_value(&self) -> SqlValue {
        SqlValue::Text(self.clone())
    }

    fn from_value(value: SqlValue) -> DbResult<Self> {
        match value {
            SqlValue::Text(s) => Ok(s),
            SqlValue::Null => Ok(String::new()),
            other => mismatch(Self::KIND, &other),
        }
    }
}

impl SqlField for i32 {
    const KIND: FieldKind = FieldKind::Int;

    fn to_value(&self) -> SqlValue {
        SqlValue::Int(*self as i64)
    }

    fn from_value(value: SqlValue) -> DbResult<Self> {
        match value {
            SqlValue::Int(i) => i32::try_from(i)
                .map_err(|_| DbError::TypeMismatch(format!("{} is out of range for int", i))),
            other => mismatch(Self::KIND, &other),
        }
    }
}

impl SqlField for i64 {
    const KIND: FieldKind = FieldKind::BigInt;

    fn to_value(&self) -> SqlValue {
        SqlValue::Int(*self)
    }

    fn from_value(value: SqlValue) -> DbResult<Self> {
        match value {
            SqlValue::Int(i) => Ok(i),
            other => mismatch(Self::KIND, &other),
        }
    }
}

impl SqlField for bool {
    const KIND: FieldKind = FieldKind::Bool;

    fn to_value(&self) -> SqlValue {
        SqlValue::Bool(*self)
    }

    fn from_value(value: SqlValue) -> DbResult<Self> {
        match value {
            SqlValue::Bool(b) => Ok(b),
            other => mismatch(Self::KIND, &other),
        }
    }
}

impl SqlField for f32 {
    const KIND: FieldKind = FieldKind::Float;

    fn to_value(&self) -> SqlValue {
        SqlValue::Float(*self as f64)
    }

    fn from_value(value: SqlValue) -> DbResult<Self> {
        match value {
            SqlValue::Float(x) => Ok(x as f32),
            other => mismatch(Self::KIND, &other),
        }
    }
}

impl SqlField for f64 {
    const KIND: FieldKind = FieldKind::Double;

    fn to_value(&self) -> SqlValue {
        SqlValue::Float(*self)
    }

    fn from_value(value: SqlValue) -> DbResult<Self> {
        match value {
            SqlValue::Float(x) => Ok(x),
            other => mismatch(Self::KIND, &other),
        }
    }
}

impl SqlField for Decimal {
    const KIND: FieldKind = FieldKind::Decimal;

    fn to_value(&self) -> SqlValue {
        SqlValue::Decimal(*self)
    }

    fn from_value(value: SqlValue) -> DbResult<Self> {
        match value {
            SqlValue::Decimal(d) => Ok(d),
            other => mismatch(Self::KIND, &other),
        }
    }
}

impl SqlField for DateTime<Utc> {
    const KIND: FieldKind = FieldKind::DateTime;

    fn to_value(&self) -> SqlValue {
        SqlValue::DateTime(*self)
    }

    fn from_value(value: SqlValue) -> DbResult<Self> {
        match value {
            SqlValue::DateTime(dt) => Ok(dt),
            other => mismatch(Self::KIND, &other),
        }
    }
}

impl SqlField for Vec<u8> {
    const KIND: FieldKind = FieldKind::Bytes;

    fn to_value(&self) -> SqlValue {
        SqlValue::Bytes(self.clone())
    }

    fn from_value(value: SqlValue) -> DbResult<Self> {
        match value {
            SqlValue::Bytes(b) => Ok(b),
            SqlValue::Null => Ok(Vec::new()),
            other => mismatch(Self::KIND, &other),
        }
    }
}

impl<T: SqlField> SqlField for Option<T> {
    const KIND: FieldKind = T::KIND;
    const NULLABLE: bool = true;

    fn to_value(&self) -> SqlValue {
        match self {
            Some(inner) => inner.to_value(),
            None => SqlValue::Null,
        }
    }

    fn from_value(value: SqlValue) -> DbResult<Self> {
        match value {
            SqlValue::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

/// A fieldless enum stored either by discriminant or by member name.
///
/// ```rust
/// use dualsql::record::SqlEnum;
/// use dualsql::value::EnumRepr;
///
/// #[derive(Debug, Clone, Copy, Default, PartialEq)]
/// enum Shade {
///     #[default]
///     None,
///     Light,
///     Dark,
/// }
///
/// impl SqlEnum for Shade {
///     const REPR: EnumRepr = EnumRepr::Int;
///
///     fn members() -> &'static [(&'static str, i64, Self)] {
///         &[("None", 0, Shade::None), ("Light", 1, Shade::Light), ("Dark", 2, Shade::Dark)]
///     }
/// }
///
/// assert_eq!(Shade::from_name("Dark"), Some(Shade::Dark));
/// assert_eq!(Shade::Light.discriminant(), 1);
/// ```
pub trait SqlEnum: Sized + Clone + Default + PartialEq + Send + Sync + 'static {
    const REPR: EnumRepr;

    /// Every member as (symbolic name, discriminant, value).
    fn members() -> &'static [(&'static str, i64, Self)];

    fn from_name(name: &str) -> Option<Self> {
        Self::members()
            .iter()
            .find(|(n, _, _)| *n == name)
            .map(|(_, _, m)| m.clone())
    }

    fn from_discriminant(discriminant: i64) -> Option<Self> {
        Self::members()
            .iter()
            .find(|(_, d, _)| *d == discriminant)
            .map(|(_, _, m)| m.clone())
    }

    /// The member with discriminant 0, or the default member.
    fn zero() -> Self {
        Self::from_discriminant(0).unwrap_or_default()
    }

    fn name(&self) -> &'static str {
        Self::members()
            .iter()
            .find(|(_, _, m)| m == self)
            .map(|(n, _, _)| *n)
            .unwrap_or("")
    }

    fn discriminant(&self) -> i64 {
        Self::members()
            .iter()
            .find(|(_, _, m)| m == self)
            .map(|(_, d, _)| *d)
            .unwrap_or(0)
    }

    fn to_value(&self) -> SqlValue {
        match Self::REPR {
            EnumRepr::Int => SqlValue::Int(self.discriminant()),
            EnumRepr::Text => SqlValue::Text(self.name().to_string()),
        }
    }

    /// Resolve a coerced cell. `None` leaves the property untouched.
    fn from_value(value: SqlValue) -> Option<Self> {
        match (Self::REPR, value) {
            (EnumRepr::Int, SqlValue::Null) => None,
            (EnumRepr::Int, SqlValue::Int(d)) => Some(Self::from_discriminant(d).unwrap_or_else(Self::zero)),
            (EnumRepr::Int, SqlValue::Text(name)) => Some(Self::from_name(&name).unwrap_or_else(Self::zero)),
            (EnumRepr::Text, SqlValue::Text(name)) => Some(
                Self::from_name(&name)
                    .or_else(|| Self::from_name(""))
                    .unwrap_or_default(),
            ),
            (EnumRepr::Text, SqlValue::Null) => Some(Self::from_name("").unwrap_or_default()),
            (EnumRepr::Text, SqlValue::Int(d)) => Some(Self::from_discriminant(d).unwrap_or_default()),
            (_, _) => None,
        }
    }
}
