//! Backend substrate for live execution.
//!
//! A [`Connector`] turns an opaque connection descriptor into a
//! [`Connection`]; each primitive call opens and owns its own connection.
//! The connector also exposes the [`Dialect`] used to build the DDL and
//! reconciliation statements of the temp-table path.

pub mod dialect;
pub mod sqlite;

pub use dialect::{Dialect, MergePlan, SqliteDialect, TSqlDialect, TempColumn};
pub use sqlite::SqliteConnector;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::DbResult;
use crate::row::{BulkBuffer, RowSet};
use crate::value::SqlValue;

/// Named statement parameters, in binding order.
pub type Params = Vec<(String, SqlValue)>;

/// Opens connections to one kind of backend
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, descriptor: &str) -> DbResult<Box<dyn Connection>>;

    fn dialect(&self) -> &dyn Dialect;
}

/// One open backend connection
#[async_trait]
pub trait Connection: Send {
    /// Run a query and materialize the whole result set
    async fn fetch(&mut self, sql: &str, params: &Params, timeout: Duration) -> DbResult<RowSet>;

    /// Run a statement and return the affected row count
    async fn execute(&mut self, sql: &str, params: &Params, timeout: Duration) -> DbResult<u64>;

    /// Append every buffer row to `buffer.table`, positionally, and return
    /// the number of rows written. Either the whole buffer lands or none of it.
    async fn bulk_append(&mut self, buffer: &BulkBuffer, timeout: Duration) -> DbResult<u64>;

    /// Declared column types of `table`, when the backend can report them.
    async fn column_types(&mut self, _table: &str) -> DbResult<Option<HashMap<String, String>>> {
        Ok(None)
    }

    async fn close(self: Box<Self>) -> DbResult<()>;
}
