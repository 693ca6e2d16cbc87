use crate::error::{DbError, DbResult};
use crate::record::mapper::resolve_field_name;
use crate::record::{AccessorTable, Record, RecordMapper};
use crate::value::{SqlValue, ValuePolicy};

use super::{Command, LocalEvaluator, Statement};

/// Built-in in-memory evaluator used when a statement carries none.
///
/// Rows are matched on the statement's match keys. SELECT returns every
/// source row projected onto the field list; INSERT appends the statement's
/// records; UPDATE and DELETE address target rows whose keys equal a
/// statement record's keys; MERGE updates matched rows and appends the
/// unmatched ones when the statement asks for it.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyedEvaluator;

impl<R: Record> LocalEvaluator<R> for KeyedEvaluator {
    fn select(&self, statement: &Statement<R>, source: &[R]) -> DbResult<Vec<R>> {
        let plan = Plan::<R>::new(statement)?;
        Ok(source
            .iter()
            .map(|record| plan.project(record, &plan.projected))
            .collect())
    }

    fn apply(
        &self,
        statement: &Statement<R>,
        target: &mut Vec<R>,
        merge_source: Option<&[R]>,
    ) -> DbResult<u64> {
        let plan = Plan::<R>::new(statement)?;

        match statement.command() {
            Command::Select => Err(DbError::OperationNotSupported(
                "SELECT does not modify a table".to_string(),
            )),
            Command::Insert => {
                let inserted: Vec<R> = statement
                    .source_records()
                    .iter()
                    .map(|record| plan.project(record, &plan.inserted))
                    .collect();
                let count = inserted.len() as u64;
                target.extend(inserted);
                Ok(count)
            }
            Command::Update => {
                plan.require_keys(statement.command())?;
                let mut affected = 0u64;
                for row in target.iter_mut() {
                    if let Some(source) = plan.find_match(row, statement.source_records()) {
                        plan.copy(source, row, &plan.updated)?;
                        affected += 1;
                    }
                }
                Ok(affected)
            }
            Command::Merge => {
                plan.require_keys(statement.command())?;
                let source = merge_source.unwrap_or(statement.source_records());
                let mut affected = 0u64;
                let mut unmatched = Vec::new();
                for record in source {
                    let mut matched = false;
                    for row in target.iter_mut().filter(|row| plan.keys_equal(row, record)) {
                        plan.copy(record, row, &plan.updated)?;
                        matched = true;
                        affected += 1;
                    }
                    if !matched && statement.inserts_unmatched() {
                        unmatched.push(plan.project(record, &plan.inserted));
                    }
                }
                affected += unmatched.len() as u64;
                target.extend(unmatched);
                Ok(affected)
            }
            Command::Delete => {
                plan.require_keys(statement.command())?;
                let before = target.len();
                target.retain(|row| plan.find_match(row, statement.source_records()).is_none());
                Ok((before - target.len()) as u64)
            }
        }
    }
}

/// Accessor positions resolved once per statement.
struct Plan<R> {
    accessors: AccessorTable<R>,
    keys: Vec<usize>,
    projected: Vec<usize>,
    inserted: Vec<usize>,
    updated: Vec<usize>,
}

impl<R: Record> Plan<R> {
    fn new(statement: &Statement<R>) -> DbResult<Self> {
        let mapper = RecordMapper::<R>::new(ValuePolicy::Relaxed);
        let positions = |fields: &[String]| -> Vec<usize> {
            mapper
                .resolve_columns(fields)
                .columns
                .iter()
                .map(|c| c.accessor)
                .collect()
        };

        let mut keys = Vec::new();
        for key in statement.match_key_list() {
            let name = resolve_field_name(key);
            let position = mapper.accessors().position(&name).ok_or_else(|| {
                DbError::InvalidArgument(format!("match key '{}' is not a field of {}", key, R::type_name()))
            })?;
            keys.push(position);
        }

        let projected = positions(statement.field_list());
        let inserted = positions(statement.bulk_fields());
        let updated = if statement.update_field_list().is_empty() {
            (0..mapper.accessors().len())
                .filter(|i| !keys.contains(i))
                .collect()
        } else {
            positions(statement.update_field_list())
        };

        Ok(Self {
            accessors: mapper.accessors().clone(),
            keys,
            projected,
            inserted,
            updated,
        })
    }

    fn require_keys(&self, command: Command) -> DbResult<()> {
        if self.keys.is_empty() {
            return Err(DbError::InvalidArgument(format!(
                "{} needs at least one match key",
                command
            )));
        }
        Ok(())
    }

    fn key_values(&self, record: &R) -> Vec<SqlValue> {
        self.keys
            .iter()
            .map(|&i| self.accessors.at(i).read(record))
            .collect()
    }

    fn keys_equal(&self, left: &R, right: &R) -> bool {
        self.key_values(left) == self.key_values(right)
    }

    fn find_match<'a>(&self, row: &R, candidates: &'a [R]) -> Option<&'a R> {
        let keys = self.key_values(row);
        candidates
            .iter()
            .find(|candidate| self.key_values(candidate) == keys)
    }

    /// Copy the listed properties from `from` into `to`.
    fn copy(&self, from: &R, to: &mut R, positions: &[usize]) -> DbResult<()> {
        for &i in positions {
            let accessor = self.accessors.at(i);
            if accessor.is_writable() {
                accessor.write(to, accessor.read(from))?;
            }
        }
        Ok(())
    }

    /// A copy of `record` limited to `positions`; every property when the
    /// list covers the whole record.
    fn project(&self, record: &R, positions: &[usize]) -> R {
        if positions.len() == self.accessors.len() {
            return record.clone();
        }
        let mut projected = R::default();
        for &i in positions {
            let accessor = self.accessors.at(i);
            if accessor.is_writable() {
                if let Err(e) = accessor.write(&mut projected, accessor.read(record)) {
                    tracing::debug!("Skipping field '{}' in projection: {}", accessor.name(), e);
                }
            }
        }
        projected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Accessor;

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Row {
        id: i32,
        name: String,
        qty: Option<i32>,
    }

    impl Record for Row {
        fn accessors() -> AccessorTable<Self> {
            AccessorTable::new(vec![
                Accessor::field("Id", |r: &Self| &r.id, |r: &mut Self| &mut r.id),
                Accessor::field("Name", |r: &Self| &r.name, |r: &mut Self| &mut r.name),
                Accessor::field("Qty", |r: &Self| &r.qty, |r: &mut Self| &mut r.qty),
            ])
        }
    }

    fn row(id: i32, name: &str, qty: Option<i32>) -> Row {
        Row {
            id,
            name: name.to_string(),
            qty,
        }
    }

    #[test]
    fn test_select_projects_fields() {
        let stmt = Statement::<Row>::select("t").fields(["t.Id", "Qty"]);
        let rows = KeyedEvaluator
            .select(&stmt, &[row(1, "a", Some(3))])
            .unwrap();
        assert_eq!(rows, vec![row(1, "", Some(3))]);
    }

    #[test]
    fn test_update_sets_listed_fields_only() {
        let stmt = Statement::<Row>::update("t")
            .match_keys(["Id"])
            .update_fields(["Qty"])
            .source(vec![row(2, "ignored", Some(20))]);
        let mut target = vec![row(1, "a", Some(1)), row(2, "b", Some(2))];
        let affected = KeyedEvaluator.apply(&stmt, &mut target, None).unwrap();
        assert_eq!(affected, 1);
        assert_eq!(target[1], row(2, "b", Some(20)));
        assert_eq!(target[0], row(1, "a", Some(1)));
    }

    #[test]
    fn test_merge_updates_and_inserts() {
        let stmt = Statement::<Row>::merge("src", "dst")
            .match_keys(["Id"])
            .insert_unmatched(true);
        let mut target = vec![row(1, "a", None), row(2, "b", None)];
        let source = vec![row(1, "A", Some(1)), row(2, "B", Some(2)), row(3, "C", Some(3))];
        let affected = KeyedEvaluator
            .apply(&stmt, &mut target, Some(&source))
            .unwrap();
        assert_eq!(affected, 3);
        assert_eq!(target, source);
    }

    #[test]
    fn test_merge_without_insert_leaves_unmatched_out() {
        let stmt = Statement::<Row>::merge("src", "dst").match_keys(["Id"]);
        let mut target = vec![row(1, "a", None)];
        let source = vec![row(1, "A", None), row(9, "Z", None)];
        let affected = KeyedEvaluator
            .apply(&stmt, &mut target, Some(&source))
            .unwrap();
        assert_eq!(affected, 1);
        assert_eq!(target, vec![row(1, "A", None)]);
    }

    #[test]
    fn test_insert_and_delete() {
        let stmt = Statement::<Row>::insert("t").source(vec![row(5, "e", None)]);
        let mut target = vec![row(5, "e", None)];
        assert_eq!(KeyedEvaluator.apply(&stmt, &mut target, None).unwrap(), 1);
        assert_eq!(target.len(), 2);

        let stmt = Statement::<Row>::delete("t")
            .match_keys(["Id"])
            .source(vec![row(5, "", None)]);
        assert_eq!(KeyedEvaluator.apply(&stmt, &mut target, None).unwrap(), 2);
        assert!(target.is_empty());
    }

    #[test]
    fn test_keyed_commands_need_keys() {
        let stmt = Statement::<Row>::update("t");
        let err = KeyedEvaluator.apply(&stmt, &mut Vec::new(), None).unwrap_err();
        assert!(matches!(err, DbError::InvalidArgument(_)));

        let stmt = Statement::<Row>::update("t").match_keys(["Nope"]);
        assert!(KeyedEvaluator.apply(&stmt, &mut Vec::new(), None).is_err());
    }
}
