//! Compiled statements as handed over by the query builder.
//!
//! A `Statement` carries everything needed to run one command on either
//! substrate: the SQL text for a live backend, the field and key lists the
//! temp-table path needs, the source records, and an optional in-memory
//! evaluator mirroring the SQL semantics for testing.

mod local;
mod multi;

pub use local::KeyedEvaluator;
pub use multi::{MultiSourceEvaluator, MultiSourceStatement, SourceName, SourceSet};

use std::fmt;
use std::sync::Arc;

use crate::config::StatementMetadata;
use crate::driver::Params;
use crate::error::DbResult;
use crate::record::{Overrides, ValueOverride};
use crate::value::SqlValue;

/// Statement command kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Select,
    Insert,
    Update,
    Merge,
    Delete,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Select => "SELECT",
            Command::Insert => "INSERT",
            Command::Update => "UPDATE",
            Command::Merge => "MERGE",
            Command::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// In-memory evaluation of a statement over virtual-table rows.
pub trait LocalEvaluator<R>: Send + Sync {
    /// Rows a SELECT over `source` returns.
    fn select(&self, statement: &Statement<R>, source: &[R]) -> DbResult<Vec<R>>;

    /// Apply a write to `target`, returning the affected row count. For
    /// MERGE, `merge_source` holds the rows merged into `target`.
    fn apply(
        &self,
        statement: &Statement<R>,
        target: &mut Vec<R>,
        merge_source: Option<&[R]>,
    ) -> DbResult<u64>;
}

pub struct Statement<R> {
    table: String,
    actual_table: Option<String>,
    sql: String,
    command: Command,
    fields: Vec<String>,
    insert_fields: Vec<String>,
    update_fields: Vec<String>,
    match_keys: Vec<String>,
    merge_into: Option<String>,
    insert_unmatched: bool,
    parameters: Params,
    overrides: Overrides<R>,
    source: Vec<R>,
    metadata: StatementMetadata,
    evaluator: Option<Arc<dyn LocalEvaluator<R>>>,
}

impl<R: Clone> Clone for Statement<R> {
    fn clone(&self) -> Self {
        Self {
            table: self.table.clone(),
            actual_table: self.actual_table.clone(),
            sql: self.sql.clone(),
            command: self.command,
            fields: self.fields.clone(),
            insert_fields: self.insert_fields.clone(),
            update_fields: self.update_fields.clone(),
            match_keys: self.match_keys.clone(),
            merge_into: self.merge_into.clone(),
            insert_unmatched: self.insert_unmatched,
            parameters: self.parameters.clone(),
            overrides: self.overrides.clone(),
            source: self.source.clone(),
            metadata: self.metadata.clone(),
            evaluator: self.evaluator.clone(),
        }
    }
}

impl<R> fmt::Debug for Statement<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Statement")
            .field("command", &self.command)
            .field("table", &self.table)
            .field("sql", &self.sql)
            .field("fields", &self.fields)
            .field("match_keys", &self.match_keys)
            .field("merge_into", &self.merge_into)
            .field("source_rows", &self.source.len())
            .field("metadata", &self.metadata)
            .finish()
    }
}

fn strings<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    items.into_iter().map(Into::into).collect()
}

impl<R> Statement<R> {
    pub fn new(command: Command, table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            actual_table: None,
            sql: String::new(),
            command,
            fields: Vec::new(),
            insert_fields: Vec::new(),
            update_fields: Vec::new(),
            match_keys: Vec::new(),
            merge_into: None,
            insert_unmatched: false,
            parameters: Vec::new(),
            overrides: Overrides::new(),
            source: Vec::new(),
            metadata: StatementMetadata::default(),
            evaluator: None,
        }
    }

    pub fn select(table: impl Into<String>) -> Self {
        Self::new(Command::Select, table)
    }

    pub fn insert(table: impl Into<String>) -> Self {
        Self::new(Command::Insert, table)
    }

    pub fn update(table: impl Into<String>) -> Self {
        Self::new(Command::Update, table)
    }

    pub fn delete(table: impl Into<String>) -> Self {
        Self::new(Command::Delete, table)
    }

    /// MERGE from `source_table` into `target`.
    pub fn merge(source_table: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(Command::Merge, source_table).merge_into(target)
    }

    /// Undecorated table name tried when the declared name is not registered.
    pub fn actual_table(mut self, name: impl Into<String>) -> Self {
        self.actual_table = Some(name.into());
        self
    }

    pub fn sql(mut self, sql: impl Into<String>) -> Self {
        self.sql = sql.into();
        self
    }

    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = strings(fields);
        self
    }

    pub fn insert_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.insert_fields = strings(fields);
        self
    }

    pub fn update_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.update_fields = strings(fields);
        self
    }

    pub fn match_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.match_keys = strings(keys);
        self
    }

    pub fn merge_into(mut self, target: impl Into<String>) -> Self {
        self.merge_into = Some(target.into());
        self
    }

    pub fn insert_unmatched(mut self, enabled: bool) -> Self {
        self.insert_unmatched = enabled;
        self
    }

    pub fn parameter(mut self, name: impl Into<String>, value: SqlValue) -> Self {
        self.parameters.push((name.into(), value));
        self
    }

    pub fn override_value<F>(mut self, field: impl Into<String>, produce: F) -> Self
    where
        F: Fn(&R) -> SqlValue + Send + Sync + 'static,
    {
        let produce: ValueOverride<R> = Arc::new(produce);
        self.overrides.insert(field.into(), produce);
        self
    }

    pub fn source(mut self, records: Vec<R>) -> Self {
        self.source = records;
        self
    }

    pub fn metadata(mut self, metadata: StatementMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn evaluator(mut self, evaluator: Arc<dyn LocalEvaluator<R>>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    pub fn table_name(&self) -> &str {
        &self.table
    }

    pub fn actual_table_name(&self) -> Option<&str> {
        self.actual_table.as_deref()
    }

    pub fn sql_text(&self) -> &str {
        &self.sql
    }

    pub fn command(&self) -> Command {
        self.command
    }

    pub fn field_list(&self) -> &[String] {
        &self.fields
    }

    pub fn insert_field_list(&self) -> &[String] {
        &self.insert_fields
    }

    pub fn update_field_list(&self) -> &[String] {
        &self.update_fields
    }

    pub fn match_key_list(&self) -> &[String] {
        &self.match_keys
    }

    pub fn merge_target(&self) -> Option<&str> {
        self.merge_into.as_deref()
    }

    pub fn inserts_unmatched(&self) -> bool {
        self.insert_unmatched
    }

    pub fn parameters(&self) -> &Params {
        &self.parameters
    }

    pub fn overrides(&self) -> &Overrides<R> {
        &self.overrides
    }

    pub fn source_records(&self) -> &[R] {
        &self.source
    }

    pub fn statement_metadata(&self) -> &StatementMetadata {
        &self.metadata
    }

    pub fn local_evaluator(&self) -> Option<&Arc<dyn LocalEvaluator<R>>> {
        self.evaluator.as_ref()
    }

    /// Physical table a write lands in.
    pub fn destination(&self) -> &str {
        match (self.command, &self.merge_into) {
            (Command::Merge, Some(target)) => target,
            _ => &self.table,
        }
    }

    /// Fields a bulk load writes: insert fields, else the projected fields.
    /// Empty means every property.
    pub fn bulk_fields(&self) -> &[String] {
        if self.insert_fields.is_empty() {
            &self.fields
        } else {
            &self.insert_fields
        }
    }

    /// Text a trace scope is keyed by.
    pub fn trace_text(&self) -> String {
        if self.sql.trim().is_empty() {
            format!("{} {}", self.command, self.destination())
        } else {
            self.sql.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Default)]
    struct Row;

    #[test]
    fn test_builder_and_destination() {
        let stmt: Statement<Row> = Statement::merge("Staging", "LocalTable")
            .match_keys(["Id"])
            .update_fields(["Int1"])
            .insert_unmatched(true);
        assert_eq!(stmt.command(), Command::Merge);
        assert_eq!(stmt.table_name(), "Staging");
        assert_eq!(stmt.destination(), "LocalTable");
        assert!(stmt.inserts_unmatched());
        assert_eq!(stmt.match_key_list(), ["Id".to_string()]);
    }

    #[test]
    fn test_trace_text_falls_back_to_synthetic() {
        let stmt: Statement<Row> = Statement::update("LocalTable");
        assert_eq!(stmt.trace_text(), "UPDATE LocalTable");

        let stmt: Statement<Row> = Statement::select("LocalTable").sql("SELECT Id FROM LocalTable");
        assert_eq!(stmt.trace_text(), "SELECT Id FROM LocalTable");
    }

    #[test]
    fn test_bulk_fields_prefer_insert_list() {
        let stmt: Statement<Row> = Statement::insert("t").fields(["A", "B"]);
        assert_eq!(stmt.bulk_fields().len(), 2);
        let stmt = stmt.insert_fields(["C"]);
        assert_eq!(stmt.bulk_fields(), ["C".to_string()]);
    }
}
