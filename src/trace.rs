//! Trace sink contract for dispatched operations.
//!
//! Every operation opens one scope keyed by a stable hash of its SQL text.
//! A scope is a guard: it closes when dropped, on every exit path.

use std::sync::Arc;

use parking_lot::Mutex;

/// Stable trace key for a statement text.
pub fn trace_key(text: &str) -> String {
    format!("{:016x}", seahash::hash(text.as_bytes()))
}

pub trait TraceSink: Send + Sync {
    fn open_scope(&self, key: &str, category: &str) -> Box<dyn TraceScope>;
}

pub trait TraceScope: Send {
    fn add_event(&mut self, name: &str, text: &str);
    fn add_metric(&mut self, name: &str, value: f64);
}

/// Scope used when the context has no sink.
pub struct NoopScope;

impl TraceScope for NoopScope {
    fn add_event(&mut self, _name: &str, _text: &str) {}
    fn add_metric(&mut self, _name: &str, _value: f64) {}
}

/// Forwards scopes to `tracing` as a span with events attached to it.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

struct TracingScope {
    span: tracing::Span,
}

impl TraceSink for TracingSink {
    fn open_scope(&self, key: &str, category: &str) -> Box<dyn TraceScope> {
        let span = tracing::info_span!("sql_operation", key = %key, category = %category);
        tracing::debug!(parent: &span, "scope opened");
        Box::new(TracingScope { span })
    }
}

impl TraceScope for TracingScope {
    fn add_event(&mut self, name: &str, text: &str) {
        tracing::info!(parent: &self.span, event = %name, "{}", text);
    }

    fn add_metric(&mut self, name: &str, value: f64) {
        tracing::info!(parent: &self.span, metric = %name, value, "metric");
    }
}

impl Drop for TracingScope {
    fn drop(&mut self) {
        tracing::debug!(parent: &self.span, "scope closed");
    }
}

/// A scope as recorded by [`MemorySink`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScopeRecord {
    pub key: String,
    pub category: String,
    pub events: Vec<(String, String)>,
    pub metrics: Vec<(String, f64)>,
    pub closed: bool,
}

impl ScopeRecord {
    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, v)| *v)
    }

    pub fn event(&self, name: &str) -> Option<&str> {
        self.events
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, t)| t.as_str())
    }
}

/// Keeps every scope in memory.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    scopes: Arc<Mutex<Vec<ScopeRecord>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scopes(&self) -> Vec<ScopeRecord> {
        self.scopes.lock().clone()
    }

    pub fn last(&self) -> Option<ScopeRecord> {
        self.scopes.lock().last().cloned()
    }
}

struct MemoryScope {
    scopes: Arc<Mutex<Vec<ScopeRecord>>>,
    index: usize,
}

impl TraceSink for MemorySink {
    fn open_scope(&self, key: &str, category: &str) -> Box<dyn TraceScope> {
        let mut scopes = self.scopes.lock();
        scopes.push(ScopeRecord {
            key: key.to_string(),
            category: category.to_string(),
            ..Default::default()
        });
        Box::new(MemoryScope {
            scopes: Arc::clone(&self.scopes),
            index: scopes.len() - 1,
        })
    }
}

impl TraceScope for MemoryScope {
    fn add_event(&mut self, name: &str, text: &str) {
        if let Some(scope) = self.scopes.lock().get_mut(self.index) {
            scope.events.push((name.to_string(), text.to_string()));
        }
    }

    fn add_metric(&mut self, name: &str, value: f64) {
        if let Some(scope) = self.scopes.lock().get_mut(self.index) {
            scope.metrics.push((name.to_string(), value));
        }
    }
}

impl Drop for MemoryScope {
    fn drop(&mut self) {
        if let Some(scope) = self.scopes.lock().get_mut(self.index) {
            scope.closed = true;
        }
    }
}
