//! Tabular rows: result sets coming back from a backend and bulk buffers
//! going out to one.

use crate::value::{FieldKind, SqlValue};

/// A fully materialized result set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowSet {
    columns: Vec<String>,
    rows: Vec<Vec<SqlValue>>,
}

impl RowSet {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn with_rows(columns: Vec<String>, rows: Vec<Vec<SqlValue>>) -> Self {
        Self { columns, rows }
    }

    pub fn push(&mut self, row: Vec<SqlValue>) {
        self.rows.push(row);
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> impl Iterator<Item = RowRef<'_>> {
        self.rows.iter().map(move |values| RowRef {
            columns: &self.columns,
            values,
        })
    }

    pub fn row(&self, index: usize) -> Option<RowRef<'_>> {
        self.rows.get(index).map(|values| RowRef {
            columns: &self.columns,
            values,
        })
    }
}

/// One row of a `RowSet`, addressable by column name.
#[derive(Debug, Clone, Copy)]
pub struct RowRef<'a> {
    columns: &'a [String],
    values: &'a [SqlValue],
}

impl<'a> RowRef<'a> {
    pub fn columns(&self) -> &'a [String] {
        self.columns
    }

    pub fn values(&self) -> &'a [SqlValue] {
        self.values
    }

    /// Column lookup is exact first, then case-insensitive.
    pub fn get(&self, name: &str) -> Option<&'a SqlValue> {
        let index = self
            .columns
            .iter()
            .position(|c| c == name)
            .or_else(|| self.columns.iter().position(|c| c.eq_ignore_ascii_case(name)))?;
        self.values.get(index)
    }
}

/// Column definition of a bulk buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct BufferColumn {
    pub name: String,
    pub kind: FieldKind,
    pub nullable: bool,
}

/// A batch of rows materialized for one bulk-append call.
#[derive(Debug, Clone)]
pub struct BulkBuffer {
    pub table: String,
    pub columns: Vec<BufferColumn>,
    pub rows: Vec<Vec<SqlValue>>,
}

impl BulkBuffer {
    pub fn new(table: impl Into<String>, columns: Vec<BufferColumn>) -> Self {
        Self {
            table: table.into(),
            columns,
            rows: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn clear(&mut self) {
        self.rows.clear();
    }
}
