use super::{Backend, BackendConnector, Filter, FilterOp, Query};
use crate::error::{DataError, DataResult};
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::cmp::Ordering as CmpOrdering;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// In-process backend for local development and tests.
/// Rows are JSON objects keyed by their "id" field.
pub struct MemoryBackend {
    tables: DashMap<String, Vec<Value>>,
    offline: AtomicBool,
    calls: AtomicU64,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            tables: DashMap::new(),
            offline: AtomicBool::new(false),
            calls: AtomicU64::new(0),
        }
    }

    /// Simulate an outage: every call fails with a connection error.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::Relaxed);
    }

    /// Number of operations attempted, including failed ones
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.tables.get(table).map(|rows| rows.len()).unwrap_or(0)
    }

    fn enter(&self) -> DataResult<()> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if self.offline.load(Ordering::Relaxed) {
            return Err(DataError::Connection("memory backend is offline".to_string()));
        }
        Ok(())
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn field_text(row: &Value, column: &str) -> Option<String> {
    match row.get(column)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn compare(left: &str, right: &str) -> CmpOrdering {
    match (left.parse::<f64>(), right.parse::<f64>()) {
        (Ok(a), Ok(b)) => a.partial_cmp(&b).unwrap_or(CmpOrdering::Equal),
        _ => left.cmp(right),
    }
}

fn matches(row: &Value, filter: &Filter) -> bool {
    let Some(value) = field_text(row, &filter.column) else {
        return false;
    };
    let ord = compare(&value, &filter.value);
    match filter.op {
        FilterOp::Eq => ord == CmpOrdering::Equal,
        FilterOp::Gte => ord != CmpOrdering::Less,
        FilterOp::Lt => ord == CmpOrdering::Less,
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn insert(&self, table: &str, mut row: Value) -> DataResult<Value> {
        self.enter()?;
        let Some(object) = row.as_object_mut() else {
            return Err(DataError::backend(format!("Rows in {} must be objects", table)));
        };
        if !object.contains_key("id") {
            object.insert("id".to_string(), Value::String(uuid::Uuid::new_v4().to_string()));
        }

        let mut rows = self.tables.entry(table.to_string()).or_default();
        let id = field_text(&row, "id");
        if rows.iter().any(|r| field_text(r, "id") == id) {
            return Err(DataError::Backend {
                message: format!("duplicate key value in {}", table),
                code: Some("23505".to_string()),
                details: id.map(|id| format!("Key (id)=({}) already exists.", id)),
                hint: None,
            });
        }
        rows.push(row.clone());
        Ok(row)
    }

    async fn select(&self, query: &Query) -> DataResult<Vec<Value>> {
        self.enter()?;
        let Some(rows) = self.tables.get(&query.table) else {
            return Ok(Vec::new());
        };

        let mut selected: Vec<Value> = rows
            .iter()
            .filter(|row| query.filters.iter().all(|f| matches(row, f)))
            .cloned()
            .collect();
        drop(rows);

        if let Some(order) = &query.order {
            selected.sort_by(|a, b| {
                let a = field_text(a, &order.column).unwrap_or_default();
                let b = field_text(b, &order.column).unwrap_or_default();
                let ord = compare(&a, &b);
                if order.descending { ord.reverse() } else { ord }
            });
        }
        if let Some(limit) = query.limit {
            selected.truncate(limit);
        }
        Ok(selected)
    }

    async fn update(&self, table: &str, id: &str, patch: Value) -> DataResult<Option<Value>> {
        self.enter()?;
        let Value::Object(patch) = patch else {
            return Err(DataError::backend(format!("Patch for {} must be an object", table)));
        };
        let Some(mut rows) = self.tables.get_mut(table) else {
            return Ok(None);
        };

        let Some(row) = rows
            .iter_mut()
            .find(|r| field_text(r, "id").as_deref() == Some(id))
        else {
            return Ok(None);
        };
        if let Some(object) = row.as_object_mut() {
            for (key, value) in patch {
                if key != "id" {
                    object.insert(key, value);
                }
            }
        }
        Ok(Some(row.clone()))
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}

/// Hands every pool key the same shared in-memory backend
pub struct MemoryConnector {
    backend: Arc<MemoryBackend>,
}

impl MemoryConnector {
    pub fn new(backend: Arc<MemoryBackend>) -> Self {
        Self { backend }
    }
}

impl BackendConnector for MemoryConnector {
    fn connect(&self, _key: &str) -> DataResult<Arc<dyn Backend>> {
        Ok(self.backend.clone())
    }
}
