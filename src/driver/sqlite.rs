//! SQLite backend over rusqlite.
//!
//! The descriptor is a database path. rusqlite is synchronous, so every
//! call runs on the blocking pool against a connection held behind a mutex.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::types::{ToSql, ToSqlOutput, Value, ValueRef};

use crate::error::{DbError, DbResult};
use crate::row::{BulkBuffer, RowSet};
use crate::value::{format_instant, SqlValue};

use super::{Connection, Connector, Dialect, Params, SqliteDialect};

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlValue::Null => ToSqlOutput::Owned(Value::Null),
            SqlValue::Bool(b) => ToSqlOutput::Owned(Value::Integer(*b as i64)),
            SqlValue::Int(i) => ToSqlOutput::Owned(Value::Integer(*i)),
            SqlValue::Float(x) => ToSqlOutput::Owned(Value::Real(*x)),
            SqlValue::Decimal(d) => ToSqlOutput::Owned(Value::Text(d.to_string())),
            SqlValue::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            SqlValue::DateTime(dt) => ToSqlOutput::Owned(Value::Text(format_instant(dt))),
            SqlValue::Bytes(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
        })
    }
}

fn from_value_ref(value: ValueRef<'_>) -> SqlValue {
    match value {
        ValueRef::Null => SqlValue::Null,
        ValueRef::Integer(i) => SqlValue::Int(i),
        ValueRef::Real(x) => SqlValue::Float(x),
        ValueRef::Text(t) => SqlValue::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => SqlValue::Bytes(b.to_vec()),
    }
}

/// Index of a named parameter, trying the `@`, `:` and `$` prefixes when
/// the name has none.
fn parameter_index(stmt: &rusqlite::Statement<'_>, name: &str) -> DbResult<Option<usize>> {
    if name.starts_with([':', '@', '$']) {
        return Ok(stmt.parameter_index(name)?);
    }
    for prefix in ['@', ':', '$'] {
        if let Some(index) = stmt.parameter_index(&format!("{}{}", prefix, name))? {
            return Ok(Some(index));
        }
    }
    Ok(None)
}

fn bind(stmt: &mut rusqlite::Statement<'_>, params: &Params) -> DbResult<()> {
    for (name, value) in params {
        match parameter_index(stmt, name)? {
            Some(index) => stmt.raw_bind_parameter(index, value)?,
            None => tracing::debug!("Parameter '{}' is not referenced by the statement", name),
        }
    }
    Ok(())
}

fn total_changes(conn: &rusqlite::Connection) -> DbResult<u64> {
    let total: i64 = conn.query_row("SELECT total_changes()", [], |row| row.get(0))?;
    Ok(total as u64)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteConnector {
    dialect: SqliteDialect,
}

impl SqliteConnector {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Connector for SqliteConnector {
    async fn connect(&self, descriptor: &str) -> DbResult<Box<dyn Connection>> {
        let path = descriptor.to_string();
        let conn = tokio::task::spawn_blocking(move || rusqlite::Connection::open(path)).await??;
        Ok(Box::new(SqliteConnection {
            conn: Arc::new(Mutex::new(conn)),
        }))
    }

    fn dialect(&self) -> &dyn Dialect {
        &self.dialect
    }
}

pub struct SqliteConnection {
    conn: Arc<Mutex<rusqlite::Connection>>,
}

impl SqliteConnection {
    async fn run<T, F>(&self, timeout: Duration, work: F) -> DbResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut rusqlite::Connection) -> DbResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock();
            guard.busy_timeout(timeout)?;
            work(&mut *guard)
        })
        .await?
    }
}

#[async_trait]
impl Connection for SqliteConnection {
    async fn fetch(&mut self, sql: &str, params: &Params, timeout: Duration) -> DbResult<RowSet> {
        let sql = sql.to_string();
        let params = params.clone();
        self.run(timeout, move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            bind(&mut stmt, &params)?;
            let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
            let width = columns.len();
            let mut set = RowSet::new(columns);

            let mut rows = stmt.raw_query();
            while let Some(row) = rows.next()? {
                let mut values = Vec::with_capacity(width);
                for i in 0..width {
                    values.push(from_value_ref(row.get_ref(i)?));
                }
                set.push(values);
            }
            Ok(set)
        })
        .await
    }

    async fn execute(&mut self, sql: &str, params: &Params, timeout: Duration) -> DbResult<u64> {
        let sql = sql.to_string();
        let params = params.clone();
        self.run(timeout, move |conn| {
            if params.is_empty() {
                // May hold several statements; count every change they make.
                let before = total_changes(conn)?;
                conn.execute_batch(&sql)?;
                Ok(total_changes(conn)?.saturating_sub(before))
            } else {
                let mut stmt = conn.prepare(&sql)?;
                bind(&mut stmt, &params)?;
                Ok(stmt.raw_execute()? as u64)
            }
        })
        .await
    }

    async fn bulk_append(&mut self, buffer: &BulkBuffer, timeout: Duration) -> DbResult<u64> {
        if buffer.is_empty() {
            return Ok(0);
        }
        if buffer.columns.is_empty() {
            return Err(DbError::InvalidArgument(format!(
                "bulk buffer for '{}' has no columns",
                buffer.table
            )));
        }

        let dialect = SqliteDialect;
        let columns: Vec<String> = buffer
            .columns
            .iter()
            .map(|c| dialect.quote_ident(&c.name))
            .collect();
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            dialect.quote_table(&buffer.table),
            columns.join(", "),
            placeholders.join(", ")
        );
        let rows = buffer.rows.clone();

        self.run(timeout, move |conn| {
            let tx = conn.transaction()?;
            let mut written = 0u64;
            {
                let mut stmt = tx.prepare(&sql)?;
                for row in &rows {
                    stmt.execute(rusqlite::params_from_iter(row.iter()))?;
                    written += 1;
                }
            }
            tx.commit()?;
            Ok(written)
        })
        .await
    }

    async fn column_types(&mut self, table: &str) -> DbResult<Option<HashMap<String, String>>> {
        let table = table
            .rsplit('.')
            .next()
            .unwrap_or(table)
            .trim_matches(['[', ']', '"', '`'])
            .to_string();
        self.run(Duration::from_secs(30), move |conn| {
            let mut stmt = conn.prepare("SELECT name, type FROM pragma_table_info(?1)")?;
            let types = stmt
                .query_map([&table], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
                .collect::<Result<HashMap<_, _>, _>>()?;
            Ok(if types.is_empty() { None } else { Some(types) })
        })
        .await
    }

    async fn close(self: Box<Self>) -> DbResult<()> {
        match Arc::try_unwrap(self.conn) {
            Ok(mutex) => mutex.into_inner().close().map_err(|(_, e)| DbError::from(e)),
            Err(_) => Ok(()),
        }
    }
}
