use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::config::StatementMetadata;
use crate::context::ExecutionContext;
use crate::driver::Params;
use crate::error::{DbError, DbResult};
use crate::record::Record;
use crate::value::SqlValue;

/// A source table as the query builder names it: the declared (possibly
/// decorated or aliased) name and the undecorated fallback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceName {
    pub declared: String,
    pub actual: Option<String>,
}

impl SourceName {
    pub fn new(declared: impl Into<String>) -> Self {
        Self {
            declared: declared.into(),
            actual: None,
        }
    }

    pub fn with_actual(declared: impl Into<String>, actual: impl Into<String>) -> Self {
        Self {
            declared: declared.into(),
            actual: Some(actual.into()),
        }
    }
}

impl From<&str> for SourceName {
    fn from(name: &str) -> Self {
        SourceName::new(name)
    }
}

impl From<(&str, &str)> for SourceName {
    fn from((declared, actual): (&str, &str)) -> Self {
        SourceName::with_actual(declared, actual)
    }
}

/// A tuple of source record types, one per joined table.
pub trait SourceSet: Send + Sync + 'static {
    const ARITY: usize;
    /// One row vector per source, in declaration order.
    type Data;

    /// Snapshot every source table. Any missing source fails the whole
    /// set with `SourceCountMismatch`.
    fn resolve(ctx: &ExecutionContext, names: &[SourceName]) -> DbResult<Self::Data>;
}

fn resolve_source<T: Record>(
    ctx: &ExecutionContext,
    name: &SourceName,
    required: usize,
) -> DbResult<Vec<T>> {
    match ctx.resolve_table::<T>(&name.declared, name.actual.as_deref()) {
        Some(table) => Ok(table.snapshot()),
        None => {
            tracing::warn!("Source table '{}' is not registered", name.declared);
            Err(DbError::SourceCountMismatch { required })
        }
    }
}

macro_rules! impl_source_set {
    ($arity:expr; $($source:ident => $index:tt),+) => {
        impl<$($source: Record),+> SourceSet for ($($source,)+) {
            const ARITY: usize = $arity;
            type Data = ($(Vec<$source>,)+);

            fn resolve(ctx: &ExecutionContext, names: &[SourceName]) -> DbResult<Self::Data> {
                if names.len() < Self::ARITY {
                    return Err(DbError::SourceCountMismatch { required: Self::ARITY });
                }
                Ok(($(resolve_source::<$source>(ctx, &names[$index], Self::ARITY)?,)+))
            }
        }
    };
}

impl_source_set!(2; A => 0, B => 1);
impl_source_set!(3; A => 0, B => 1, C => 2);
impl_source_set!(4; A => 0, B => 1, C => 2, D => 3);

/// In-memory evaluation of a joined read.
pub type MultiSourceEvaluator<R, S> =
    Arc<dyn Fn(<S as SourceSet>::Data) -> DbResult<Vec<R>> + Send + Sync>;

/// A read over two to four source tables. On a live backend the SQL text
/// is already joined; under test the evaluator receives every source.
pub struct MultiSourceStatement<R, S: SourceSet> {
    sql: String,
    sources: Vec<SourceName>,
    fields: Vec<String>,
    parameters: Params,
    metadata: StatementMetadata,
    evaluator: Option<MultiSourceEvaluator<R, S>>,
    _sources: PhantomData<fn() -> S>,
}

impl<R, S: SourceSet> fmt::Debug for MultiSourceStatement<R, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultiSourceStatement")
            .field("arity", &S::ARITY)
            .field("sql", &self.sql)
            .field("sources", &self.sources)
            .field("fields", &self.fields)
            .finish()
    }
}

impl<R: Record, S: SourceSet> MultiSourceStatement<R, S> {
    pub fn new<I, N>(sources: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<SourceName>,
    {
        Self {
            sql: String::new(),
            sources: sources.into_iter().map(Into::into).collect(),
            fields: Vec::new(),
            parameters: Vec::new(),
            metadata: StatementMetadata::default(),
            evaluator: None,
            _sources: PhantomData,
        }
    }

    pub fn sql(mut self, sql: impl Into<String>) -> Self {
        self.sql = sql.into();
        self
    }

    pub fn fields<I, F>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = F>,
        F: Into<String>,
    {
        self.fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn parameter(mut self, name: impl Into<String>, value: SqlValue) -> Self {
        self.parameters.push((name.into(), value));
        self
    }

    pub fn metadata(mut self, metadata: StatementMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn evaluator<F>(mut self, evaluate: F) -> Self
    where
        F: Fn(S::Data) -> DbResult<Vec<R>> + Send + Sync + 'static,
    {
        self.evaluator = Some(Arc::new(evaluate));
        self
    }

    pub fn arity(&self) -> usize {
        S::ARITY
    }

    pub fn sql_text(&self) -> &str {
        &self.sql
    }

    pub fn source_names(&self) -> &[SourceName] {
        &self.sources
    }

    pub fn field_list(&self) -> &[String] {
        &self.fields
    }

    pub fn parameters(&self) -> &Params {
        &self.parameters
    }

    pub fn statement_metadata(&self) -> &StatementMetadata {
        &self.metadata
    }

    pub fn local_evaluator(&self) -> Option<&MultiSourceEvaluator<R, S>> {
        self.evaluator.as_ref()
    }

    pub fn trace_text(&self) -> String {
        if self.sql.trim().is_empty() {
            let names: Vec<&str> = self.sources.iter().map(|s| s.declared.as_str()).collect();
            format!("SELECT {}", names.join(", "))
        } else {
            self.sql.clone()
        }
    }
}
