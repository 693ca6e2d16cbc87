//! UPDATE / MERGE / INSERT through a temp table.
//!
//! Bulk append can only add rows, so a write that has to match rows is
//! split in two: the statement's records are bulk-loaded into a fresh temp
//! table, then one reconciliation statement moves them into the
//! destination. The temp table is dropped whatever the outcome.

use uuid::Uuid;

use crate::config::BulkOptions;
use crate::context::{ExecutionContext, LiveConnection};
use crate::driver::{Dialect, MergePlan, TempColumn};
use crate::error::{DbError, DbResult};
use crate::record::mapper::resolve_field_name;
use crate::record::{ColumnDescriptor, Record, RecordMapper};
use crate::statement::{Command, Statement};
use crate::trace::TraceScope;

use super::bulk::BulkTransfer;
use super::dispatch::{execute_follow_up, FollowUp};
use super::primitives;

/// Physical name for one invocation: every `*` in the template becomes a
/// fresh token.
pub fn temp_table_name(template: &str) -> String {
    template.replace('*', &Uuid::new_v4().simple().to_string())
}

/// How the temp table's columns are chosen.
#[derive(Debug, Clone, PartialEq)]
enum TempSchema {
    /// Mirror the destination's columns.
    FullClone,
    /// Only the listed columns.
    Minimal(Vec<ColumnDescriptor>),
}

struct TempPlan {
    command: Command,
    destination: String,
    temp: String,
    schema: TempSchema,
    keys: Vec<String>,
    /// Columns the bulk load writes, in buffer order. Destination columns
    /// not listed here are left NULL when an insert copies `SELECT *` out of
    /// a cloned temp table.
    loaded: Vec<ColumnDescriptor>,
    updates: Vec<String>,
}

impl TempPlan {
    fn new<R: Record>(
        stmt: &Statement<R>,
        mapper: &RecordMapper<R>,
        dialect: &dyn Dialect,
        scope: &mut dyn TraceScope,
    ) -> DbResult<Self> {
        let command = stmt.command();
        if matches!(command, Command::Select | Command::Delete) {
            return Err(DbError::OperationNotSupported(format!(
                "{} cannot run through a temp table",
                command
            )));
        }

        let destination = stmt.destination().to_string();
        let metadata = stmt.statement_metadata();
        let template = metadata
            .temp_table_name
            .clone()
            .unwrap_or_else(|| dialect.default_temp_template(&destination));
        let temp = temp_table_name(&template);

        let keys: Vec<String> = stmt
            .match_key_list()
            .iter()
            .map(|k| resolve_field_name(k))
            .collect();
        if command != Command::Insert && keys.is_empty() {
            return Err(DbError::InvalidArgument(format!(
                "{} through a temp table needs at least one match key",
                command
            )));
        }

        let subset: &[String] = if !stmt.update_field_list().is_empty() {
            stmt.update_field_list()
        } else if !stmt.insert_field_list().is_empty() {
            stmt.insert_field_list()
        } else {
            stmt.field_list()
        };

        let schema = if metadata.use_min_temp_table && !subset.is_empty() {
            let mut fields = keys.clone();
            fields.extend(subset.iter().cloned());
            let resolved = mapper.resolve_columns(&fields);
            for field in &resolved.unresolved {
                tracing::debug!("Temp table for '{}' skips field '{}'", destination, field);
                scope.add_event("skipped_field", field);
            }
            TempSchema::Minimal(resolved.columns)
        } else {
            if metadata.use_min_temp_table {
                tracing::debug!(
                    "No field subset for '{}', cloning the destination instead",
                    destination
                );
            }
            TempSchema::FullClone
        };

        let loaded = match &schema {
            TempSchema::Minimal(columns) => columns.clone(),
            TempSchema::FullClone if stmt.bulk_fields().is_empty() => {
                mapper.resolve_columns(stmt.bulk_fields()).columns
            }
            TempSchema::FullClone => {
                // Match keys are always loaded so the join can see them.
                let mut fields = keys.clone();
                fields.extend(stmt.bulk_fields().iter().cloned());
                mapper.resolve_columns(&fields).columns
            }
        };

        let updates: Vec<String> = if stmt.update_field_list().is_empty() {
            loaded
                .iter()
                .map(|c| c.name.clone())
                .filter(|name| !keys.iter().any(|k| k.eq_ignore_ascii_case(name)))
                .collect()
        } else {
            mapper.resolve_columns(stmt.update_field_list()).names()
        };

        Ok(Self {
            command,
            destination,
            temp,
            schema,
            keys,
            loaded,
            updates,
        })
    }

    fn loaded_names(&self) -> Vec<String> {
        self.loaded.iter().map(|c| c.name.clone()).collect()
    }

    /// Reconciliation statement from the temp table into the destination.
    fn follow_up(&self, dialect: &dyn Dialect, insert_unmatched: bool) -> DbResult<FollowUp> {
        let loaded = self.loaded_names();
        let sql = match self.command {
            Command::Insert => {
                let columns = match self.schema {
                    TempSchema::Minimal(_) => Some(loaded.as_slice()),
                    TempSchema::FullClone => None,
                };
                dialect.insert_select(&self.destination, &self.temp, columns)
            }
            Command::Update | Command::Merge => {
                let insert_unmatched = self.command == Command::Merge && insert_unmatched;
                if self.updates.is_empty() && !insert_unmatched {
                    return Err(DbError::InvalidArgument(format!(
                        "{} into '{}' has no column to update",
                        self.command, self.destination
                    )));
                }
                dialect.merge(&MergePlan {
                    target: &self.destination,
                    source: &self.temp,
                    match_keys: &self.keys,
                    update_columns: &self.updates,
                    insert_columns: &loaded,
                    insert_unmatched,
                })
            }
            Command::Select | Command::Delete => {
                return Err(DbError::OperationNotSupported(format!(
                    "{} cannot run through a temp table",
                    self.command
                )))
            }
        };

        Ok(FollowUp {
            command: self.command,
            table: self.destination.clone(),
            sql,
        })
    }
}

/// Run a write through a temp table and return the reconciliation
/// statement's affected row count.
pub async fn execute_via_temp_table<R: Record>(
    ctx: &ExecutionContext,
    live: &LiveConnection,
    stmt: &Statement<R>,
    options: BulkOptions,
    scope: &mut dyn TraceScope,
) -> DbResult<u64> {
    let dialect = live.connector.dialect();
    let mapper = RecordMapper::<R>::new(ctx.value_policy());
    let plan = TempPlan::new(stmt, &mapper, dialect, scope)?;
    let follow_up = plan.follow_up(dialect, stmt.inserts_unmatched())?;
    let timeout = stmt.statement_metadata().timeout(ctx.config());

    let create_sql = match &plan.schema {
        TempSchema::FullClone => dialect.create_clone_table(&plan.temp, &plan.destination),
        TempSchema::Minimal(columns) => {
            let declared = match primitives::column_types(live, &plan.destination).await {
                Ok(types) => types.unwrap_or_default(),
                Err(e) => {
                    tracing::warn!(
                        "Could not read column types of '{}', using the fixed mapping: {}",
                        plan.destination,
                        e
                    );
                    Default::default()
                }
            };
            let temp_columns: Vec<TempColumn> = columns
                .iter()
                .map(|c| {
                    let declared_type = declared
                        .iter()
                        .find(|(name, _)| name.eq_ignore_ascii_case(&c.name))
                        .map(|(_, sql_type)| sql_type.clone())
                        .filter(|sql_type| !sql_type.is_empty());
                    TempColumn {
                        name: c.name.clone(),
                        sql_type: declared_type.unwrap_or_else(|| dialect.column_type(c.kind)),
                        nullable: c.nullable,
                    }
                })
                .collect();
            dialect.create_table(&plan.temp, &temp_columns)
        }
    };

    tracing::debug!("Creating temp table '{}' for '{}'", plan.temp, plan.destination);
    scope.add_event("temp_table", &plan.temp);
    primitives::non_query(live, &create_sql, &Vec::new(), timeout).await?;

    let outcome = stage_and_reconcile(ctx, live, stmt, &plan, &follow_up, options, scope).await;

    let drop_sql = dialect.drop_table(&plan.temp);
    let dropped = primitives::non_query(live, &drop_sql, &Vec::new(), timeout).await;

    match (outcome, dropped) {
        (Ok(affected), Ok(_)) => {
            tracing::debug!("Dropped temp table '{}'", plan.temp);
            Ok(affected)
        }
        (Ok(_), Err(e)) => Err(DbError::TempTableDrop {
            table: plan.temp,
            source: Box::new(e),
        }),
        (Err(e), Ok(_)) => Err(e),
        (Err(e), Err(drop_err)) => {
            tracing::error!(
                "Failed to drop temp table '{}' after a failed {}: {}",
                plan.temp,
                plan.command,
                drop_err
            );
            Err(e)
        }
    }
}

async fn stage_and_reconcile<R: Record>(
    ctx: &ExecutionContext,
    live: &LiveConnection,
    stmt: &Statement<R>,
    plan: &TempPlan,
    follow_up: &FollowUp,
    options: BulkOptions,
    scope: &mut dyn TraceScope,
) -> DbResult<u64> {
    let loaded = plan.loaded_names();
    let transfer = BulkTransfer {
        live,
        table: &plan.temp,
        fields: &loaded,
        overrides: stmt.overrides(),
        options,
        policy: ctx.value_policy(),
    };
    let staged = transfer.run(stmt.source_records(), scope).await?;
    tracing::debug!("Staged {} rows in '{}'", staged, plan.temp);

    execute_follow_up(ctx, live, follow_up, stmt.statement_metadata().timeout(ctx.config())).await
}
