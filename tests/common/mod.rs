//! Common test utilities for execution tests
//!
//! Provides shared helpers for:
//! - The `LocalTableRecord` record type and sample rows
//! - SQLite databases in temp directories
//! - A connector that injects faults into bulk appends and fetches

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

use async_trait::async_trait;
use dualsql::driver::Params;
use dualsql::{
    Accessor, AccessorTable, BulkBuffer, Connection, Connector, DbError, DbResult, Dialect,
    EnumRepr, ExecutionContext, Record, RowSet, SqlEnum, SqliteConnector,
};
use tempfile::TempDir;

static INIT: Once = Once::new();

pub fn init_logging() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub enum Level {
    #[default]
    None,
    Low,
    High,
}

impl SqlEnum for Level {
    const REPR: EnumRepr = EnumRepr::Int;

    fn members() -> &'static [(&'static str, i64, Self)] {
        &[("None", 0, Level::None), ("Low", 1, Level::Low), ("High", 2, Level::High)]
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocalTableRecord {
    pub id: i32,
    pub str1: String,
    pub int1: Option<i32>,
    pub bool1: Option<bool>,
    pub str2: String,
    pub int2: i32,
    pub level: Level,
}

impl Record for LocalTableRecord {
    fn accessors() -> AccessorTable<Self> {
        AccessorTable::new(vec![
            Accessor::field("Id", |r: &Self| &r.id, |r: &mut Self| &mut r.id),
            Accessor::field("Str1", |r: &Self| &r.str1, |r: &mut Self| &mut r.str1),
            Accessor::field("Int1", |r: &Self| &r.int1, |r: &mut Self| &mut r.int1),
            Accessor::field("Bool1", |r: &Self| &r.bool1, |r: &mut Self| &mut r.bool1),
            Accessor::field("Str2", |r: &Self| &r.str2, |r: &mut Self| &mut r.str2),
            Accessor::field("Int2", |r: &Self| &r.int2, |r: &mut Self| &mut r.int2),
            Accessor::enumeration("Level", |r: &Self| &r.level, |r: &mut Self| &mut r.level),
        ])
    }
}

pub fn record(id: i32, int1: Option<i32>) -> LocalTableRecord {
    LocalTableRecord {
        id,
        str1: format!("row {}", id),
        int1,
        bool1: Some(id % 2 == 0),
        str2: String::new(),
        int2: id * 10,
        level: if id % 2 == 0 { Level::High } else { Level::Low },
    }
}

/// Rows with ids `1..=count` and `Int1 = 100 + id`.
pub fn records(count: i32) -> Vec<LocalTableRecord> {
    (1..=count).map(|id| record(id, Some(100 + id))).collect()
}

pub fn sorted(mut rows: Vec<LocalTableRecord>) -> Vec<LocalTableRecord> {
    rows.sort_by_key(|r| r.id);
    rows
}

pub const LOCAL_TABLE_DDL: &str = "CREATE TABLE LocalTable (
    Id INTEGER NOT NULL,
    Str1 TEXT,
    Int1 INTEGER,
    Bool1 INTEGER,
    Str2 TEXT,
    Int2 INTEGER NOT NULL,
    Level INTEGER NOT NULL
)";

/// A fresh SQLite database holding an empty `LocalTable`.
pub fn create_test_database() -> (TempDir, String) {
    let tmp_dir = TempDir::new().expect("Failed to create temp dir");
    let path = tmp_dir.path().join("test.db");
    let path = path.to_str().expect("Non UTF-8 temp path").to_string();
    let conn = rusqlite::Connection::open(&path).expect("Failed to open database");
    conn.execute_batch(LOCAL_TABLE_DDL)
        .expect("Failed to create LocalTable");
    (tmp_dir, path)
}

pub fn seed_local_table(path: &str, rows: &[LocalTableRecord]) {
    let conn = rusqlite::Connection::open(path).expect("Failed to open database");
    for row in rows {
        conn.execute(
            "INSERT INTO LocalTable (Id, Str1, Int1, Bool1, Str2, Int2, Level) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                row.id,
                row.str1,
                row.int1,
                row.bool1,
                row.str2,
                row.int2,
                row.level.discriminant()
            ],
        )
        .expect("Failed to seed LocalTable");
    }
}

pub fn count_rows(path: &str, table: &str) -> i64 {
    let conn = rusqlite::Connection::open(path).expect("Failed to open database");
    conn.query_row(&format!("SELECT COUNT(*) FROM \"{}\"", table), [], |row| row.get(0))
        .expect("Failed to count rows")
}

/// Names of every table in the database.
pub fn table_names(path: &str) -> Vec<String> {
    let conn = rusqlite::Connection::open(path).expect("Failed to open database");
    let mut stmt = conn
        .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
        .unwrap();
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    names
}

pub fn live_context(path: &str) -> ExecutionContext {
    init_logging();
    ExecutionContext::live(path, Arc::new(SqliteConnector::new()))
}

/// Counters and fault schedule shared by a `FaultyConnector` and its
/// connections.
#[derive(Debug, Default)]
pub struct FaultPlan {
    /// 1-based bulk-append calls that fail before reaching the database.
    pub failing_appends: Vec<usize>,
    /// Number of leading fetches that fail with a transient fault.
    pub failing_fetches: usize,
    /// 1-based execute calls that fail with a non-transient backend error.
    pub failing_executes: Vec<usize>,
    pub appends: AtomicUsize,
    pub executes: AtomicUsize,
    pub fetches: AtomicUsize,
    pub connects: AtomicUsize,
}

impl FaultPlan {
    pub fn failing_appends(calls: &[usize]) -> Arc<Self> {
        Arc::new(Self {
            failing_appends: calls.to_vec(),
            ..Default::default()
        })
    }

    pub fn failing_fetches(count: usize) -> Arc<Self> {
        Arc::new(Self {
            failing_fetches: count,
            ..Default::default()
        })
    }

    pub fn failing_executes(calls: &[usize]) -> Arc<Self> {
        Arc::new(Self {
            failing_executes: calls.to_vec(),
            ..Default::default()
        })
    }

    pub fn appends(&self) -> usize {
        self.appends.load(Ordering::SeqCst)
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn executes(&self) -> usize {
        self.executes.load(Ordering::SeqCst)
    }
}

/// SQLite connector that injects faults according to a `FaultPlan`.
pub struct FaultyConnector {
    inner: SqliteConnector,
    plan: Arc<FaultPlan>,
}

impl FaultyConnector {
    pub fn new(plan: Arc<FaultPlan>) -> Self {
        Self {
            inner: SqliteConnector::new(),
            plan,
        }
    }
}

#[async_trait]
impl Connector for FaultyConnector {
    async fn connect(&self, descriptor: &str) -> DbResult<Box<dyn Connection>> {
        self.plan.connects.fetch_add(1, Ordering::SeqCst);
        let inner = self.inner.connect(descriptor).await?;
        Ok(Box::new(FaultyConnection {
            inner,
            plan: self.plan.clone(),
        }))
    }

    fn dialect(&self) -> &dyn Dialect {
        self.inner.dialect()
    }
}

struct FaultyConnection {
    inner: Box<dyn Connection>,
    plan: Arc<FaultPlan>,
}

#[async_trait]
impl Connection for FaultyConnection {
    async fn fetch(&mut self, sql: &str, params: &Params, timeout: Duration) -> DbResult<RowSet> {
        let call = self.plan.fetches.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.plan.failing_fetches {
            return Err(DbError::BackendError(
                "A transport-level error has occurred when receiving results from the server"
                    .to_string(),
            ));
        }
        self.inner.fetch(sql, params, timeout).await
    }

    async fn execute(&mut self, sql: &str, params: &Params, timeout: Duration) -> DbResult<u64> {
        let call = self.plan.executes.fetch_add(1, Ordering::SeqCst) + 1;
        if self.plan.failing_executes.contains(&call) {
            return Err(DbError::BackendError(format!(
                "statement rejected on execute call {}",
                call
            )));
        }
        self.inner.execute(sql, params, timeout).await
    }

    async fn bulk_append(&mut self, buffer: &BulkBuffer, timeout: Duration) -> DbResult<u64> {
        let call = self.plan.appends.fetch_add(1, Ordering::SeqCst) + 1;
        if self.plan.failing_appends.contains(&call) {
            return Err(DbError::TransportFault(format!(
                "connection reset during bulk append call {}",
                call
            )));
        }
        self.inner.bulk_append(buffer, timeout).await
    }

    async fn column_types(&mut self, table: &str) -> DbResult<Option<HashMap<String, String>>> {
        self.inner.column_types(table).await
    }

    async fn close(self: Box<Self>) -> DbResult<()> {
        self.inner.close().await
    }
}

pub fn faulty_context(path: &str, plan: Arc<FaultPlan>) -> ExecutionContext {
    init_logging();
    ExecutionContext::live(path, Arc::new(FaultyConnector::new(plan)))
}
