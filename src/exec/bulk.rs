//! Chunked, retrying bulk transfer of typed records into one table.

use std::time::Duration;

use crate::config::BulkOptions;
use crate::context::LiveConnection;
use crate::driver::Connection;
use crate::error::{DbError, DbResult};
use crate::record::{ColumnDescriptor, Overrides, Record, RecordMapper};
use crate::row::BulkBuffer;
use crate::trace::TraceScope;
use crate::value::{render_literal, ValuePolicy};

/// One bulk load of records into `table`.
///
/// Records are split into consecutive batches of at most
/// `options.batch_size`, in source order. Each batch is streamed with the
/// backend's bulk append and retried up to `options.retries` attempts in
/// total, reconnecting after every fault. Batches run one at a time; the
/// first batch to exhaust its attempts aborts the transfer.
pub struct BulkTransfer<'a, R> {
    pub live: &'a LiveConnection,
    pub table: &'a str,
    /// Fields to write; empty means every property.
    pub fields: &'a [String],
    pub overrides: &'a Overrides<R>,
    pub options: BulkOptions,
    pub policy: ValuePolicy,
}

impl<'a, R: Record> BulkTransfer<'a, R> {
    /// Transfer `records` and return the number of rows written.
    pub async fn run(&self, records: &[R], scope: &mut dyn TraceScope) -> DbResult<u64> {
        self.options.validate()?;

        let mapper = RecordMapper::<R>::new(self.policy);
        let resolved = mapper.resolve_columns(self.fields);
        for field in &resolved.unresolved {
            tracing::debug!("Bulk copy into '{}' skips field '{}'", self.table, field);
            scope.add_event("skipped_field", field);
        }

        if records.is_empty() {
            scope.add_metric("bulk_rows", 0.0);
            return Ok(0);
        }
        if resolved.columns.is_empty() {
            return Err(DbError::InvalidArgument(format!(
                "no field resolves to a column of {}",
                R::type_name()
            )));
        }

        let columns = resolved.buffer_columns();
        let timeout = self.options.timeout();
        let mut conn: Option<Box<dyn Connection>> = None;
        let mut written = 0u64;
        let mut batches = 0usize;

        for (batch, chunk) in records.chunks(self.options.batch_size).enumerate() {
            let mut buffer = BulkBuffer::new(self.table, columns.clone());
            for record in chunk {
                buffer
                    .rows
                    .push(mapper.record_to_columns(record, &resolved.columns, self.overrides)?);
            }

            let mut attempt = 0usize;
            loop {
                attempt += 1;
                match self.append(&mut conn, &buffer, timeout).await {
                    Ok(count) => {
                        written += count;
                        batches += 1;
                        tracing::debug!(
                            "Bulk copy into '{}': batch {} wrote {} rows ({} total)",
                            self.table,
                            batch,
                            count,
                            written
                        );
                        break;
                    }
                    Err(e) if attempt < self.options.retries => {
                        tracing::warn!(
                            "Bulk copy into '{}' batch {} attempt {}/{} failed, retrying: {}",
                            self.table,
                            batch,
                            attempt,
                            self.options.retries,
                            e
                        );
                        scope.add_event("bulk_retry", &e.to_string());
                    }
                    Err(e) => {
                        let sample = sample_row(&resolved.columns, &buffer, self.policy);
                        tracing::error!(
                            "Bulk copy into '{}' failed on batch {} after {} attempt(s): {}; first row: ({})",
                            self.table,
                            batch,
                            attempt,
                            e,
                            sample.as_deref().unwrap_or("")
                        );
                        if let Some(sample) = &sample {
                            scope.add_event("bulk_failed_row", sample);
                        }
                        scope.add_metric("bulk_rows", written as f64);
                        return Err(DbError::BulkCopyFailed {
                            table: self.table.to_string(),
                            batch,
                            attempts: attempt,
                            rows_written: written,
                            sample,
                            source: Box::new(e),
                        });
                    }
                }
            }
        }

        if let Some(conn) = conn {
            if let Err(e) = conn.close().await {
                tracing::warn!("Failed to close bulk copy connection: {}", e);
            }
        }

        tracing::info!(
            "Bulk copied {} rows into '{}' in {} batch(es)",
            written,
            self.table,
            batches
        );
        scope.add_metric("bulk_batches", batches as f64);
        scope.add_metric("bulk_rows", written as f64);
        Ok(written)
    }

    /// One attempt at one batch. A connection that faulted is dropped so
    /// the next attempt reconnects.
    async fn append(
        &self,
        conn: &mut Option<Box<dyn Connection>>,
        buffer: &BulkBuffer,
        timeout: Duration,
    ) -> DbResult<u64> {
        let mut connection = match conn.take() {
            Some(connection) => connection,
            None => self.live.connector.connect(&self.live.descriptor).await?,
        };
        let count = connection.bulk_append(buffer, timeout).await?;
        *conn = Some(connection);
        Ok(count)
    }
}

/// First buffer row rendered as backend literals.
fn sample_row(columns: &[ColumnDescriptor], buffer: &BulkBuffer, policy: ValuePolicy) -> Option<String> {
    let row = buffer.rows.first()?;
    let rendered: Vec<String> = columns
        .iter()
        .zip(row)
        .map(|(column, value)| {
            render_literal(column.kind, value, policy).unwrap_or_else(|_| value.to_string())
        })
        .collect();
    Some(rendered.join(", "))
}
