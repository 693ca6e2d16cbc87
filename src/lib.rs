pub mod config;
pub mod context;
pub mod driver;
pub mod error;
pub mod exec;
pub mod record;
pub mod row;
pub mod statement;
pub mod trace;
pub mod value;

pub use config::{BulkOptions, ExecutionConfig, StatementMetadata};
pub use context::{ExecutionContext, ExecutionMode, VirtualTable};
pub use driver::{Connection, Connector, Dialect, SqliteConnector, SqliteDialect, TSqlDialect};
pub use error::{DbError, DbResult, Operation};
pub use record::{Accessor, AccessorTable, Record, RecordMapper, SqlEnum, SqlField};
pub use row::{BulkBuffer, RowSet};
pub use statement::{Command, KeyedEvaluator, LocalEvaluator, MultiSourceStatement, SourceName, Statement};
pub use trace::{MemorySink, TraceScope, TraceSink, TracingSink};
pub use value::{Decimal, EnumRepr, FieldKind, SqlValue, ValuePolicy};
