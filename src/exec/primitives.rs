//! Parameterized fetch and non-query against the live backend.
//!
//! Each call opens and owns one connection. It is closed explicitly on
//! success and dropped on every error path.

use std::collections::HashMap;
use std::time::Duration;

use crate::context::LiveConnection;
use crate::driver::Params;
use crate::error::DbResult;
use crate::row::RowSet;

/// Run a query and materialize its rows. A transient transport fault is
/// retried exactly once.
pub async fn fetch(
    live: &LiveConnection,
    sql: &str,
    params: &Params,
    timeout: Duration,
) -> DbResult<RowSet> {
    match fetch_once(live, sql, params, timeout).await {
        Err(e) if e.is_transient() => {
            tracing::warn!("Transient fault while fetching, retrying once: {}", e);
            fetch_once(live, sql, params, timeout).await
        }
        result => result,
    }
}

async fn fetch_once(
    live: &LiveConnection,
    sql: &str,
    params: &Params,
    timeout: Duration,
) -> DbResult<RowSet> {
    let mut conn = live.connector.connect(&live.descriptor).await?;
    let rows = conn.fetch(sql, params, timeout).await?;
    if let Err(e) = conn.close().await {
        tracing::warn!("Failed to close connection after fetch: {}", e);
    }
    Ok(rows)
}

/// Run a statement and return the affected row count. Blank SQL returns 0
/// without connecting.
pub async fn non_query(
    live: &LiveConnection,
    sql: &str,
    params: &Params,
    timeout: Duration,
) -> DbResult<u64> {
    if sql.trim().is_empty() {
        return Ok(0);
    }

    let mut conn = live.connector.connect(&live.descriptor).await?;
    let affected = conn.execute(sql, params, timeout).await?;
    if let Err(e) = conn.close().await {
        tracing::warn!("Failed to close connection after non-query: {}", e);
    }
    Ok(affected)
}

/// Declared column types of `table`, if the backend reports them.
pub async fn column_types(
    live: &LiveConnection,
    table: &str,
) -> DbResult<Option<HashMap<String, String>>> {
    let mut conn = live.connector.connect(&live.descriptor).await?;
    let types = conn.column_types(table).await?;
    if let Err(e) = conn.close().await {
        tracing::warn!("Failed to close connection after schema lookup: {}", e);
    }
    Ok(types)
}
