//! Execution context: mode flag, virtual-table registry, live connection
//! and trace sink for one logical unit of work.

mod table;

pub use table::{TableStore, VirtualTable};

use std::fmt;
use std::sync::Arc;

use crate::config::ExecutionConfig;
use crate::driver::Connector;
use crate::error::{DbError, DbResult, Operation};
use crate::record::Record;
use crate::trace::{NoopScope, TraceScope, TraceSink};
use crate::value::ValuePolicy;

/// Where statements run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Neither virtual tables nor SQL: reads are empty, writes affect nothing.
    NoAction,
    /// Against registered virtual tables.
    Testing,
    /// Against a live backend.
    Live,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::NoAction => write!(f, "no-action"),
            ExecutionMode::Testing => write!(f, "testing"),
            ExecutionMode::Live => write!(f, "live"),
        }
    }
}

/// Connection descriptor plus the connector that interprets it.
#[derive(Clone)]
pub struct LiveConnection {
    pub descriptor: String,
    pub connector: Arc<dyn Connector>,
}

impl fmt::Debug for LiveConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveConnection")
            .field("descriptor", &self.descriptor)
            .field("dialect", &self.connector.dialect().name())
            .finish()
    }
}

pub struct ExecutionContext {
    mode: ExecutionMode,
    tables: TableStore,
    live: Option<LiveConnection>,
    config: ExecutionConfig,
    trace_sink: Option<Arc<dyn TraceSink>>,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionContext {
    /// A context in `NoAction` mode. Registering a table switches it to
    /// `Testing`.
    pub fn new() -> Self {
        Self {
            mode: ExecutionMode::NoAction,
            tables: TableStore::new(),
            live: None,
            config: ExecutionConfig::default(),
            trace_sink: None,
        }
    }

    pub fn testing() -> Self {
        Self {
            mode: ExecutionMode::Testing,
            ..Self::new()
        }
    }

    /// A context bound to a live backend. The mode stays `Live`.
    pub fn live(descriptor: impl Into<String>, connector: Arc<dyn Connector>) -> Self {
        Self {
            mode: ExecutionMode::Live,
            live: Some(LiveConnection {
                descriptor: descriptor.into(),
                connector,
            }),
            ..Self::new()
        }
    }

    pub fn with_config(mut self, config: ExecutionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_trace_sink(mut self, sink: Arc<dyn TraceSink>) -> Self {
        self.trace_sink = Some(sink);
        self
    }

    pub fn set_auto_create_tables(&mut self, enabled: bool) {
        self.config.auto_create_tables = enabled;
    }

    pub fn set_value_policy(&mut self, policy: ValuePolicy) {
        self.config.value_policy = policy;
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    pub fn value_policy(&self) -> ValuePolicy {
        self.config.value_policy
    }

    pub fn auto_create_tables(&self) -> bool {
        self.config.auto_create_tables
    }

    pub fn tables(&self) -> &TableStore {
        &self.tables
    }

    /// Insert or replace a virtual table.
    pub fn register_table<R: Record>(
        &mut self,
        name: &str,
        records: Vec<R>,
    ) -> Arc<VirtualTable<R>> {
        if self.mode == ExecutionMode::NoAction {
            self.mode = ExecutionMode::Testing;
        }
        tracing::debug!("Registered table '{}' with {} rows", name, records.len());
        self.tables.insert(name, records)
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.tables.contains(name)
    }

    /// Look up `name`, then `fallback`.
    pub fn resolve_table<R: Record>(
        &self,
        name: &str,
        fallback: Option<&str>,
    ) -> Option<Arc<VirtualTable<R>>> {
        self.tables
            .get::<R>(name)
            .or_else(|| fallback.and_then(|f| self.tables.get::<R>(f)))
    }

    /// Resolve a table the operation cannot run without. With
    /// `allow_create` and auto-create enabled, a missing table is created
    /// empty under `name`.
    pub fn require_table<R: Record>(
        &self,
        name: &str,
        fallback: Option<&str>,
        operation: Operation,
        allow_create: bool,
    ) -> DbResult<Arc<VirtualTable<R>>> {
        if let Some(table) = self.resolve_table::<R>(name, fallback) {
            return Ok(table);
        }
        if allow_create && self.config.auto_create_tables {
            return self.tables.get_or_create::<R>(name);
        }
        Err(DbError::missing_table(name, operation))
    }

    /// Clone of the rows of a registered table.
    pub fn table_snapshot<R: Record>(&self, name: &str) -> Option<Vec<R>> {
        self.tables.get::<R>(name).map(|t| t.snapshot())
    }

    pub fn live_connection(&self) -> DbResult<&LiveConnection> {
        self.live.as_ref().ok_or_else(|| {
            DbError::InvalidArgument(format!(
                "context in {} mode has no live connection",
                self.mode
            ))
        })
    }

    pub fn open_scope(&self, key: &str, category: &str) -> Box<dyn TraceScope> {
        match &self.trace_sink {
            Some(sink) => sink.open_scope(key, category),
            None => Box::new(NoopScope),
        }
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("mode", &self.mode)
            .field("tables", &self.tables.names())
            .field("live", &self.live)
            .field("config", &self.config)
            .finish()
    }
}
