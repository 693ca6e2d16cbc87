//! Record mapper: typed record ↔ tabular row conversion with type coercion.

use std::collections::HashMap;
use std::sync::Arc;

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};

use crate::error::{DbError, DbResult};
use crate::row::{BufferColumn, RowRef, RowSet};
use crate::value::{parse_decimal, parse_instant, Decimal, EnumRepr, FieldKind, SqlValue, ValuePolicy};

use super::{AccessorTable, Record};

/// Statement-level value producer that replaces a direct property read.
pub type ValueOverride<R> = Arc<dyn Fn(&R) -> SqlValue + Send + Sync>;

/// Value overrides keyed by resolved column name.
pub type Overrides<R> = HashMap<String, ValueOverride<R>>;

/// One resolved output column of a statement.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDescriptor {
    /// Resolved column (property) name.
    pub name: String,
    /// Field text as the statement spelled it, e.g. `t.Int1 AS Int1`.
    pub source: String,
    /// Index into the record's accessor table.
    pub accessor: usize,
    pub kind: FieldKind,
    pub nullable: bool,
}

impl ColumnDescriptor {
    pub fn buffer_column(&self) -> BufferColumn {
        BufferColumn {
            name: self.name.clone(),
            kind: self.kind,
            nullable: self.nullable,
        }
    }
}

/// Columns resolved from a field list, in field order.
#[derive(Debug, Clone, Default)]
pub struct ResolvedColumns {
    pub columns: Vec<ColumnDescriptor>,
    /// Fields that matched no property.
    pub unresolved: Vec<String>,
}

impl ResolvedColumns {
    pub fn names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn buffer_columns(&self) -> Vec<BufferColumn> {
        self.columns.iter().map(ColumnDescriptor::buffer_column).collect()
    }
}

/// Strip a qualifier (`dbo.t.Col` → `Col`), resolve an alias
/// (`t.Col AS Alias` → `Alias`) and drop `[]`/`"` quoting.
pub fn resolve_field_name(field: &str) -> String {
    let field = field.trim();
    let upper = field.to_ascii_uppercase();
    let expression = match upper.rfind(" AS ") {
        Some(pos) => &field[pos + 4..],
        None => field,
    };
    let expression = expression.trim();

    let unqualified = match expression.rfind('.') {
        Some(pos) => &expression[pos + 1..],
        None => expression,
    };

    unqualified
        .trim()
        .trim_start_matches(['[', '"', '`'])
        .trim_end_matches([']', '"', '`'])
        .to_string()
}

/// Converts between rows and records of one type under one value policy.
pub struct RecordMapper<R> {
    accessors: AccessorTable<R>,
    policy: ValuePolicy,
}

impl<R: Record> RecordMapper<R> {
    pub fn new(policy: ValuePolicy) -> Self {
        Self {
            accessors: R::accessors(),
            policy,
        }
    }

    pub fn accessors(&self) -> &AccessorTable<R> {
        &self.accessors
    }

    pub fn policy(&self) -> ValuePolicy {
        self.policy
    }

    /// Resolve a statement field list into column descriptors. An empty list
    /// selects every property.
    pub fn resolve_columns(&self, fields: &[String]) -> ResolvedColumns {
        let mut resolved = ResolvedColumns::default();

        if fields.is_empty() {
            resolved.columns = self
                .accessors
                .iter()
                .enumerate()
                .map(|(index, accessor)| ColumnDescriptor {
                    name: accessor.name().to_string(),
                    source: accessor.name().to_string(),
                    accessor: index,
                    kind: accessor.kind(),
                    nullable: accessor.nullable(),
                })
                .collect();
            return resolved;
        }

        for field in fields {
            let name = resolve_field_name(field);
            match self.accessors.position(&name) {
                Some(index) => {
                    if resolved.columns.iter().any(|c| c.accessor == index) {
                        continue;
                    }
                    let accessor = self.accessors.at(index);
                    resolved.columns.push(ColumnDescriptor {
                        name: accessor.name().to_string(),
                        source: field.clone(),
                        accessor: index,
                        kind: accessor.kind(),
                        nullable: accessor.nullable(),
                    });
                }
                None => resolved.unresolved.push(field.clone()),
            }
        }
        resolved
    }

    /// Map one row into a new record. Unresolved fields are skipped.
    pub fn row_to_record(&self, row: RowRef<'_>, fields: &[String]) -> DbResult<R> {
        let plan = self.read_plan(row.columns(), fields);
        self.apply_plan(&plan, row)
    }

    /// Map every row of a result set, building the read plan once.
    pub fn rows_to_records(&self, rows: &RowSet, fields: &[String]) -> DbResult<Vec<R>> {
        let plan = self.read_plan(rows.columns(), fields);
        rows.rows().map(|row| self.apply_plan(&plan, row)).collect()
    }

    /// Produce the cell values of `record` for `columns`, in column order.
    pub fn record_to_columns(
        &self,
        record: &R,
        columns: &[ColumnDescriptor],
        overrides: &Overrides<R>,
    ) -> DbResult<Vec<SqlValue>> {
        columns
            .iter()
            .map(|column| {
                if let Some(produce) = overrides.get(&column.name) {
                    return Ok(produce(record));
                }
                if let FieldKind::Unsupported(type_name) = column.kind {
                    if self.policy == ValuePolicy::Strict {
                        return Err(DbError::UnsupportedValueType {
                            field: column.name.clone(),
                            type_name: type_name.to_string(),
                        });
                    }
                }
                Ok(self.accessors.at(column.accessor).read(record))
            })
            .collect()
    }

    /// Build a record from cells laid out as `columns`. Properties with no
    /// column keep their defaults.
    pub fn columns_to_record(
        &self,
        columns: &[ColumnDescriptor],
        values: Vec<SqlValue>,
    ) -> DbResult<R> {
        let mut record = R::default();
        for (column, raw) in columns.iter().zip(values) {
            let accessor = self.accessors.at(column.accessor);
            if !accessor.is_writable() {
                continue;
            }
            if let Some(value) = coerce(accessor.kind(), raw, self.policy, accessor.name())? {
                accessor.write(&mut record, value)?;
            }
        }
        Ok(record)
    }

    /// Pairs of (accessor index, row column index) for the projected fields.
    fn read_plan(&self, row_columns: &[String], fields: &[String]) -> Vec<(usize, usize)> {
        let find_column = |name: &str| {
            row_columns
                .iter()
                .position(|c| c == name)
                .or_else(|| row_columns.iter().position(|c| c.eq_ignore_ascii_case(name)))
        };

        let names: Vec<String> = if fields.is_empty() {
            row_columns.to_vec()
        } else {
            fields.iter().map(|f| resolve_field_name(f)).collect()
        };

        names
            .iter()
            .filter_map(|name| {
                let accessor = self.accessors.position(name)?;
                let column = find_column(name)?;
                Some((accessor, column))
            })
            .collect()
    }

    fn apply_plan(&self, plan: &[(usize, usize)], row: RowRef<'_>) -> DbResult<R> {
        let mut record = R::default();
        for &(accessor_index, column_index) in plan {
            let accessor = self.accessors.at(accessor_index);
            let raw = row.values().get(column_index).cloned().ok_or_else(|| {
                DbError::TypeMismatch(format!(
                    "row has no column {} for field '{}'",
                    column_index,
                    accessor.name()
                ))
            })?;
            if let Some(value) = coerce(accessor.kind(), raw, self.policy, accessor.name())? {
                if accessor.is_writable() {
                    accessor.write(&mut record, value)?;
                }
            }
        }
        Ok(record)
    }
}

/// Coerce a raw cell to the storage type of a property. `None` means the
/// property is left untouched.
pub fn coerce(
    kind: FieldKind,
    value: SqlValue,
    policy: ValuePolicy,
    field: &str,
) -> DbResult<Option<SqlValue>> {
    let fail = |value: &SqlValue| {
        Err(DbError::TypeMismatch(format!(
            "cannot coerce {} value to {} for field '{}'",
            value.type_name(),
            kind.type_name(),
            field
        )))
    };

    let coerced = match (kind, value) {
        (FieldKind::Unsupported(type_name), _) => {
            return match policy {
                ValuePolicy::Strict => Err(DbError::UnsupportedValueType {
                    field: field.to_string(),
                    type_name: type_name.to_string(),
                }),
                ValuePolicy::Relaxed => Ok(None),
            };
        }
        (FieldKind::Enum(EnumRepr::Int), SqlValue::Null) => return Ok(None),
        (FieldKind::Enum(EnumRepr::Text), SqlValue::Null) => SqlValue::Text(String::new()),
        (_, SqlValue::Null) => SqlValue::Null,

        (FieldKind::Text, SqlValue::Text(s)) => SqlValue::Text(s),
        (FieldKind::Text, SqlValue::Bytes(b)) => return fail(&SqlValue::Bytes(b)),
        (FieldKind::Text, other) => SqlValue::Text(other.to_string()),

        (FieldKind::DateTime, SqlValue::DateTime(dt)) => SqlValue::DateTime(dt),
        (FieldKind::DateTime, SqlValue::Text(s)) => SqlValue::DateTime(parse_instant(&s)?),

        (FieldKind::Bool, SqlValue::Bool(b)) => SqlValue::Bool(b),
        (FieldKind::Bool, SqlValue::Int(i)) => SqlValue::Bool(i != 0),
        (FieldKind::Bool, SqlValue::Text(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => SqlValue::Bool(true),
            "false" | "0" => SqlValue::Bool(false),
            _ => return fail(&SqlValue::Text(s)),
        },

        (FieldKind::Int | FieldKind::BigInt, SqlValue::Int(i)) => SqlValue::Int(i),
        (FieldKind::Int | FieldKind::BigInt, SqlValue::Bool(b)) => SqlValue::Int(b as i64),
        (FieldKind::Int | FieldKind::BigInt, SqlValue::Float(x)) if x.fract() == 0.0 => {
            SqlValue::Int(x as i64)
        }
        (FieldKind::Int | FieldKind::BigInt, SqlValue::Decimal(d)) if d.fract().is_zero() => {
            match d.to_i64() {
                Some(i) => SqlValue::Int(i),
                None => return fail(&SqlValue::Decimal(d)),
            }
        }
        (FieldKind::Int | FieldKind::BigInt, SqlValue::Text(s)) => match s.trim().parse() {
            Ok(i) => SqlValue::Int(i),
            Err(_) => return fail(&SqlValue::Text(s)),
        },

        (FieldKind::Float | FieldKind::Double, SqlValue::Float(x)) => SqlValue::Float(x),
        (FieldKind::Float | FieldKind::Double, SqlValue::Int(i)) => SqlValue::Float(i as f64),
        (FieldKind::Float | FieldKind::Double, SqlValue::Decimal(d)) => match d.to_f64() {
            Some(x) => SqlValue::Float(x),
            None => return fail(&SqlValue::Decimal(d)),
        },
        (FieldKind::Float | FieldKind::Double, SqlValue::Text(s)) => match s.trim().parse() {
            Ok(x) => SqlValue::Float(x),
            Err(_) => return fail(&SqlValue::Text(s)),
        },

        (FieldKind::Decimal, SqlValue::Decimal(d)) => SqlValue::Decimal(d),
        (FieldKind::Decimal, SqlValue::Int(i)) => SqlValue::Decimal(Decimal::from(i)),
        (FieldKind::Decimal, SqlValue::Float(x)) => match Decimal::from_f64(x) {
            Some(d) => SqlValue::Decimal(d),
            None => return fail(&SqlValue::Float(x)),
        },
        (FieldKind::Decimal, SqlValue::Text(s)) => SqlValue::Decimal(parse_decimal(&s)?),

        (FieldKind::Bytes, SqlValue::Bytes(b)) => SqlValue::Bytes(b),

        (FieldKind::Enum(EnumRepr::Int), SqlValue::Int(i)) => SqlValue::Int(i),
        (FieldKind::Enum(EnumRepr::Int), SqlValue::Text(s)) => match s.trim().parse::<i64>() {
            Ok(i) => SqlValue::Int(i),
            Err(_) => SqlValue::Text(s),
        },
        (FieldKind::Enum(EnumRepr::Text), SqlValue::Text(s)) => SqlValue::Text(s),
        (FieldKind::Enum(EnumRepr::Text), SqlValue::Int(i)) => SqlValue::Int(i),

        (_, other) => return fail(&other),
    };
    Ok(Some(coerced))
}
