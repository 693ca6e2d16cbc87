//! Statement entry points: route every operation by context mode and
//! statement kind, inside one trace scope.

use std::sync::Arc;
use std::time::Duration;

use crate::config::BulkOptions;
use crate::context::{ExecutionContext, ExecutionMode, LiveConnection};
use crate::error::{DbError, DbResult, Operation};
use crate::record::{Record, RecordMapper};
use crate::statement::{
    Command, KeyedEvaluator, LocalEvaluator, MultiSourceStatement, SourceSet, Statement,
};
use crate::trace::{trace_key, TraceScope};

use super::bulk::BulkTransfer;
use super::merge::execute_via_temp_table;
use super::primitives;

/// A reconciliation statement produced by the temp-table path. It has no
/// metadata, so running it can only take the plain non-query route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FollowUp {
    pub command: Command,
    pub table: String,
    pub sql: String,
}

/// Run a follow-up statement as a plain non-query in its own trace scope.
pub async fn execute_follow_up(
    ctx: &ExecutionContext,
    live: &LiveConnection,
    follow_up: &FollowUp,
    timeout: Duration,
) -> DbResult<u64> {
    let mut scope = ctx.open_scope(&trace_key(&follow_up.sql), follow_up.command.as_str());
    scope.add_event("sql", &follow_up.sql);
    let affected = primitives::non_query(live, &follow_up.sql, &Vec::new(), timeout).await?;
    scope.add_metric("rows", affected as f64);
    Ok(affected)
}

fn open_scope(ctx: &ExecutionContext, text: &str, category: &str) -> Box<dyn TraceScope> {
    let mut scope = ctx.open_scope(&trace_key(text), category);
    scope.add_event("sql", text);
    scope.add_event("mode", &ctx.mode().to_string());
    scope
}

fn record_count(scope: &mut dyn TraceScope, count: u64) {
    scope.add_metric("rows", count as f64);
}

impl<R: Record> Statement<R> {
    fn evaluator_or_default(&self) -> Arc<dyn LocalEvaluator<R>> {
        match self.local_evaluator() {
            Some(evaluator) => Arc::clone(evaluator),
            None => Arc::new(KeyedEvaluator),
        }
    }

    /// Bulk options derived from the statement metadata and context defaults.
    fn bulk_options(&self, ctx: &ExecutionContext) -> BulkOptions {
        let defaults = ctx.config().bulk;
        let metadata = self.statement_metadata();
        BulkOptions {
            batch_size: metadata.bulk_copy_size.unwrap_or(defaults.batch_size),
            retries: defaults.retries,
            timeout_secs: metadata.timeout_in_seconds.unwrap_or(defaults.timeout_secs),
        }
    }

    /// Run a read and map every row into `R`.
    pub async fn execute(&self, ctx: &ExecutionContext) -> DbResult<Vec<R>> {
        let text = self.trace_text();
        let mut scope = open_scope(ctx, &text, self.command().as_str());

        let records = match ctx.mode() {
            ExecutionMode::NoAction => Vec::new(),
            ExecutionMode::Testing => {
                let table = ctx.require_table::<R>(
                    self.table_name(),
                    self.actual_table_name(),
                    Operation::Read,
                    false,
                )?;
                let rows = table.snapshot();
                self.evaluator_or_default().select(self, &rows)?
            }
            ExecutionMode::Live => {
                let live = ctx.live_connection()?;
                if self.sql_text().trim().is_empty() {
                    return Err(DbError::InvalidArgument(format!(
                        "{} on '{}' has no SQL text",
                        self.command(),
                        self.table_name()
                    )));
                }
                let timeout = self.statement_metadata().timeout(ctx.config());
                let rows =
                    primitives::fetch(live, self.sql_text(), self.parameters(), timeout).await?;
                RecordMapper::<R>::new(ctx.value_policy()).rows_to_records(&rows, self.field_list())?
            }
        };

        record_count(scope.as_mut(), records.len() as u64);
        Ok(records)
    }

    /// Run a write and return the affected row count.
    pub async fn execute_non_query(&self, ctx: &ExecutionContext) -> DbResult<u64> {
        let text = self.trace_text();
        let mut scope = open_scope(ctx, &text, self.command().as_str());

        let affected = match ctx.mode() {
            ExecutionMode::NoAction => 0,
            ExecutionMode::Testing => self.apply_in_memory(ctx)?,
            ExecutionMode::Live => self.execute_live(ctx, scope.as_mut()).await?,
        };

        record_count(scope.as_mut(), affected);
        Ok(affected)
    }

    /// Bulk-load the statement's records into its destination.
    pub async fn execute_bulk_copy(
        &self,
        ctx: &ExecutionContext,
        options: BulkOptions,
    ) -> DbResult<u64> {
        let text = format!("BULK COPY {}", self.destination());
        let mut scope = open_scope(ctx, &text, "BulkCopy");

        let written = match ctx.mode() {
            ExecutionMode::NoAction => 0,
            ExecutionMode::Testing => {
                options.validate()?;
                let table = ctx.require_table::<R>(
                    self.destination(),
                    None,
                    Operation::BulkCopy,
                    true,
                )?;
                let mapper = RecordMapper::<R>::new(ctx.value_policy());
                let resolved = mapper.resolve_columns(self.bulk_fields());
                let projected = self
                    .source_records()
                    .iter()
                    .map(|record| {
                        let cells =
                            mapper.record_to_columns(record, &resolved.columns, self.overrides())?;
                        mapper.columns_to_record(&resolved.columns, cells)
                    })
                    .collect::<DbResult<Vec<R>>>()?;
                let written = projected.len() as u64;
                table.write(|rows| rows.extend(projected));
                written
            }
            ExecutionMode::Live => {
                let live = ctx.live_connection()?;
                let transfer = BulkTransfer {
                    live,
                    table: self.destination(),
                    fields: self.bulk_fields(),
                    overrides: self.overrides(),
                    options,
                    policy: ctx.value_policy(),
                };
                transfer.run(self.source_records(), scope.as_mut()).await?
            }
        };

        record_count(scope.as_mut(), written);
        Ok(written)
    }

    fn apply_in_memory(&self, ctx: &ExecutionContext) -> DbResult<u64> {
        let evaluator = self.evaluator_or_default();

        if self.command() == Command::Merge {
            let target_name = self.merge_target().ok_or_else(|| {
                DbError::InvalidArgument(format!(
                    "MERGE from '{}' has no merge-into table",
                    self.table_name()
                ))
            })?;
            let source = ctx
                .require_table::<R>(
                    self.table_name(),
                    self.actual_table_name(),
                    Operation::Merge,
                    false,
                )?
                .snapshot();
            let target = ctx.require_table::<R>(target_name, None, Operation::Merge, true)?;
            return target.write(|rows| evaluator.apply(self, rows, Some(source.as_slice())));
        }

        let table = ctx.require_table::<R>(
            self.table_name(),
            self.actual_table_name(),
            Operation::Write,
            true,
        )?;
        table.write(|rows| evaluator.apply(self, rows, None))
    }

    async fn execute_live(&self, ctx: &ExecutionContext, scope: &mut dyn TraceScope) -> DbResult<u64> {
        let live = ctx.live_connection()?;
        let metadata = self.statement_metadata();
        let command = self.command();

        match command {
            Command::Update | Command::Merge
                if metadata.wants_temp_table() || metadata.use_bulk_copy =>
            {
                execute_via_temp_table(ctx, live, self, self.bulk_options(ctx), scope).await
            }
            Command::Insert if metadata.wants_temp_table() => {
                execute_via_temp_table(ctx, live, self, self.bulk_options(ctx), scope).await
            }
            Command::Insert if metadata.use_bulk_copy => {
                let transfer = BulkTransfer {
                    live,
                    table: self.destination(),
                    fields: self.bulk_fields(),
                    overrides: self.overrides(),
                    options: self.bulk_options(ctx),
                    policy: ctx.value_policy(),
                };
                transfer.run(self.source_records(), scope).await
            }
            Command::Select | Command::Delete if metadata.wants_temp_table() => {
                Err(DbError::OperationNotSupported(format!(
                    "{} cannot run through a temp table",
                    command
                )))
            }
            _ => {
                let timeout = metadata.timeout(ctx.config());
                primitives::non_query(live, self.sql_text(), self.parameters(), timeout).await
            }
        }
    }
}

impl<R: Record, S: SourceSet> MultiSourceStatement<R, S> {
    /// Run a read over every source and map the rows into `R`.
    pub async fn execute(&self, ctx: &ExecutionContext) -> DbResult<Vec<R>> {
        let text = self.trace_text();
        let mut scope = open_scope(ctx, &text, "SELECT");

        let records = match ctx.mode() {
            ExecutionMode::NoAction => Vec::new(),
            ExecutionMode::Testing => {
                let sources = S::resolve(ctx, self.source_names())?;
                let evaluate = self.local_evaluator().ok_or_else(|| {
                    DbError::OperationNotSupported(format!(
                        "{}-source read has no in-memory evaluator",
                        S::ARITY
                    ))
                })?;
                evaluate(sources)?
            }
            ExecutionMode::Live => {
                let live = ctx.live_connection()?;
                let timeout = self.statement_metadata().timeout(ctx.config());
                let rows =
                    primitives::fetch(live, self.sql_text(), self.parameters(), timeout).await?;
                RecordMapper::<R>::new(ctx.value_policy()).rows_to_records(&rows, self.field_list())?
            }
        };

        record_count(scope.as_mut(), records.len() as u64);
        Ok(records)
    }
}
