//! Typed records and their compiled accessor tables.
//!
//! A record type describes its columns once through [`Record::accessors`];
//! the resulting [`AccessorTable`] is built per statement execution and reused
//! for every row, so no per-row lookup by type happens during mapping.
//!
//! ```rust
//! use dualsql::record::{Accessor, AccessorTable, Record};
//!
//! #[derive(Debug, Clone, Default)]
//! struct LocalTableRecord {
//!     id: i32,
//!     str1: String,
//!     int1: Option<i32>,
//! }
//!
//! impl Record for LocalTableRecord {
//!     fn accessors() -> AccessorTable<Self> {
//!         AccessorTable::new(vec![
//!             Accessor::field("Id", |r: &Self| &r.id, |r: &mut Self| &mut r.id),
//!             Accessor::field("Str1", |r: &Self| &r.str1, |r: &mut Self| &mut r.str1),
//!             Accessor::field("Int1", |r: &Self| &r.int1, |r: &mut Self| &mut r.int1),
//!         ])
//!     }
//! }
//!
//! let table = LocalTableRecord::accessors();
//! assert_eq!(table.len(), 3);
//! assert!(table.get("Int1").unwrap().nullable());
//! ```

mod field;
pub mod mapper;

pub use field::{SqlEnum, SqlField};
pub use mapper::{ColumnDescriptor, Overrides, RecordMapper, ResolvedColumns, ValueOverride};

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{DbError, DbResult};
use crate::value::{FieldKind, SqlValue};

/// A typed record that can be mapped to and from tabular rows.
pub trait Record: Clone + Default + Send + Sync + 'static {
    /// Ordered column accessors for this record type.
    fn accessors() -> AccessorTable<Self>;

    /// Element type tag stored with virtual tables.
    fn type_name() -> &'static str {
        std::any::type_name::<Self>()
    }
}

type Getter<R> = Arc<dyn Fn(&R) -> SqlValue + Send + Sync>;
type Setter<R> = Arc<dyn Fn(&mut R, SqlValue) -> DbResult<()> + Send + Sync>;

/// Get/set pair for one record property.
pub struct Accessor<R> {
    name: String,
    kind: FieldKind,
    nullable: bool,
    get: Getter<R>,
    set: Option<Setter<R>>,
}

impl<R> Clone for Accessor<R> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            kind: self.kind,
            nullable: self.nullable,
            get: Arc::clone(&self.get),
            set: self.set.clone(),
        }
    }
}

impl<R> fmt::Debug for Accessor<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Accessor")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("nullable", &self.nullable)
            .finish()
    }
}

impl<R: 'static> Accessor<R> {
    /// Accessor for a property whose type implements [`SqlField`].
    pub fn field<T: SqlField>(
        name: &str,
        get: fn(&R) -> &T,
        get_mut: fn(&mut R) -> &mut T,
    ) -> Self {
        Self {
            name: name.to_string(),
            kind: T::KIND,
            nullable: T::NULLABLE,
            get: Arc::new(move |record| get(record).to_value()),
            set: Some(Arc::new(move |record, value| {
                *get_mut(record) = T::from_value(value)?;
                Ok(())
            })),
        }
    }

    /// Accessor for an enum property.
    pub fn enumeration<E: SqlEnum>(
        name: &str,
        get: fn(&R) -> &E,
        get_mut: fn(&mut R) -> &mut E,
    ) -> Self {
        Self {
            name: name.to_string(),
            kind: FieldKind::Enum(E::REPR),
            nullable: false,
            get: Arc::new(move |record| get(record).to_value()),
            set: Some(Arc::new(move |record, value| {
                if let Some(member) = E::from_value(value) {
                    *get_mut(record) = member;
                }
                Ok(())
            })),
        }
    }

    /// Accessor for a property with no SQL mapping. It can be read (as its
    /// `Debug` text) but never written back.
    pub fn opaque<T: fmt::Debug + 'static>(
        name: &str,
        type_name: &'static str,
        get: fn(&R) -> &T,
    ) -> Self {
        Self {
            name: name.to_string(),
            kind: FieldKind::Unsupported(type_name),
            nullable: true,
            get: Arc::new(move |record| SqlValue::Text(format!("{:?}", get(record)))),
            set: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> FieldKind {
        self.kind
    }

    pub fn nullable(&self) -> bool {
        self.nullable
    }

    pub fn is_writable(&self) -> bool {
        self.set.is_some()
    }

    pub fn read(&self, record: &R) -> SqlValue {
        (self.get)(record)
    }

    pub fn write(&self, record: &mut R, value: SqlValue) -> DbResult<()> {
        match &self.set {
            Some(set) => set(record, value).map_err(|e| match e {
                DbError::TypeMismatch(msg) => {
                    DbError::TypeMismatch(format!("field '{}': {}", self.name, msg))
                }
                other => other,
            }),
            None => Err(DbError::UnsupportedValueType {
                field: self.name.clone(),
                type_name: self.kind.type_name().to_string(),
            }),
        }
    }
}

/// Ordered accessors of one record type, indexed by column name.
pub struct AccessorTable<R> {
    entries: Vec<Accessor<R>>,
    by_name: HashMap<String, usize>,
}

impl<R> Clone for AccessorTable<R> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
            by_name: self.by_name.clone(),
        }
    }
}

impl<R> fmt::Debug for AccessorTable<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.entries.iter()).finish()
    }
}

impl<R: 'static> AccessorTable<R> {
    pub fn new(entries: Vec<Accessor<R>>) -> Self {
        let by_name = entries
            .iter()
            .enumerate()
            .map(|(i, a)| (a.name.clone(), i))
            .collect();
        Self { entries, by_name }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Position of a column, exact match first, then case-insensitive.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied().or_else(|| {
            self.entries
                .iter()
                .position(|a| a.name.eq_ignore_ascii_case(name))
        })
    }

    pub fn get(&self, name: &str) -> Option<&Accessor<R>> {
        self.position(name).map(|i| &self.entries[i])
    }

    pub fn at(&self, index: usize) -> &Accessor<R> {
        &self.entries[index]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Accessor<R>> {
        self.entries.iter()
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|a| a.name.clone()).collect()
    }
}
