//! Virtual tables and the per-context store that owns them.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{DbError, DbResult};
use crate::record::Record;

/// Named in-memory stand-in for a relational table.
///
/// Shared by `Arc` between every operation that addresses it by name. The
/// lock only makes single reads and writes memory-safe; callers running
/// concurrent writers against one table get no ordering guarantees.
#[derive(Debug)]
pub struct VirtualTable<R> {
    name: String,
    type_tag: &'static str,
    rows: RwLock<Vec<R>>,
}

impl<R: Record> VirtualTable<R> {
    pub fn new(name: impl Into<String>, rows: Vec<R>) -> Self {
        Self {
            name: name.into(),
            type_tag: R::type_name(),
            rows: RwLock::new(rows),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn type_tag(&self) -> &'static str {
        self.type_tag
    }

    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }

    /// Clone of the current rows.
    pub fn snapshot(&self) -> Vec<R> {
        self.rows.read().clone()
    }

    pub fn read<T>(&self, f: impl FnOnce(&[R]) -> T) -> T {
        f(&self.rows.read())
    }

    pub fn write<T>(&self, f: impl FnOnce(&mut Vec<R>) -> T) -> T {
        f(&mut self.rows.write())
    }
}

struct StoredTable {
    type_tag: &'static str,
    table: Arc<dyn Any + Send + Sync>,
}

/// Name → virtual table registry of one execution context.
#[derive(Default)]
pub struct TableStore {
    tables: RwLock<HashMap<String, StoredTable>>,
}

impl TableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the table registered under `name`.
    pub fn insert<R: Record>(&self, name: &str, rows: Vec<R>) -> Arc<VirtualTable<R>> {
        let table = Arc::new(VirtualTable::new(name, rows));
        self.tables.write().insert(
            name.to_string(),
            StoredTable {
                type_tag: R::type_name(),
                table: table.clone(),
            },
        );
        table
    }

    /// Look up a table of record type `R`. A table stored under `name`
    /// with another record type is treated as absent.
    pub fn get<R: Record>(&self, name: &str) -> Option<Arc<VirtualTable<R>>> {
        let stored = {
            let tables = self.tables.read();
            let entry = tables.get(name)?;
            (entry.type_tag, entry.table.clone())
        };

        match stored.1.downcast::<VirtualTable<R>>() {
            Ok(table) => Some(table),
            Err(_) => {
                tracing::warn!(
                    "Table '{}' holds {} records, not {}; treating it as absent",
                    name,
                    stored.0,
                    R::type_name()
                );
                None
            }
        }
    }

    /// Return the table under `name`, creating an empty one if missing.
    pub fn get_or_create<R: Record>(&self, name: &str) -> DbResult<Arc<VirtualTable<R>>> {
        let mut tables = self.tables.write();
        if let Some(entry) = tables.get(name) {
            return entry
                .table
                .clone()
                .downcast::<VirtualTable<R>>()
                .map_err(|_| {
                    DbError::TypeMismatch(format!(
                        "table '{}' holds {} records, not {}",
                        name,
                        entry.type_tag,
                        R::type_name()
                    ))
                });
        }

        tracing::debug!("Auto-creating virtual table '{}'", name);
        let table = Arc::new(VirtualTable::<R>::new(name, Vec::new()));
        tables.insert(
            name.to_string(),
            StoredTable {
                type_tag: R::type_name(),
                table: table.clone(),
            },
        );
        Ok(table)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tables.read().contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.tables.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Accessor, AccessorTable};

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Left {
        id: i32,
    }

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Right {
        id: i32,
    }

    impl Record for Left {
        fn accessors() -> AccessorTable<Self> {
            AccessorTable::new(vec![Accessor::field("Id", |r: &Self| &r.id, |r: &mut Self| &mut r.id)])
        }
    }

    impl Record for Right {
        fn accessors() -> AccessorTable<Self> {
            AccessorTable::new(vec![Accessor::field("Id", |r: &Self| &r.id, |r: &mut Self| &mut r.id)])
        }
    }

    #[test]
    fn test_insert_replaces_and_shares() {
        let store = TableStore::new();
        let first = store.insert("t", vec![Left { id: 1 }]);
        let again = store.get::<Left>("t").unwrap();
        again.write(|rows| rows.push(Left { id: 2 }));
        assert_eq!(first.len(), 2);

        store.insert("t", vec![Left { id: 9 }]);
        assert_eq!(store.get::<Left>("t").unwrap().snapshot(), vec![Left { id: 9 }]);
        assert_eq!(first.len(), 2);
    }

    #[test]
    fn test_type_mismatch_resolves_as_absent() {
        let store = TableStore::new();
        store.insert("t", vec![Left { id: 1 }]);
        assert!(store.contains("t"));
        assert!(store.get::<Right>("t").is_none());
        assert!(store.get_or_create::<Right>("t").is_err());
    }

    #[test]
    fn test_get_or_create() {
        let store = TableStore::new();
        let created = store.get_or_create::<Left>("new").unwrap();
        assert!(created.is_empty());
        assert_eq!(created.name(), "new");
        created.write(|rows| rows.push(Left { id: 5 }));
        assert_eq!(store.get_or_create::<Left>("new").unwrap().len(), 1);
        assert_eq!(store.names(), vec!["new".to_string()]);
    }
}
