mod memory;
mod rest;

pub use memory::{MemoryBackend, MemoryConnector};
pub use rest::{RestBackend, RestConnector};

use crate::config::BackendConfig;
use crate::error::DataResult;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt::Write as _;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Gte,
    Lt,
}

impl FilterOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOp::Eq => "eq",
            FilterOp::Gte => "gte",
            FilterOp::Lt => "lt",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    pub column: String,
    pub op: FilterOp,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub column: String,
    pub descending: bool,
}

/// Row selection against one table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub table: String,
    pub filters: Vec<Filter>,
    pub order: Option<Order>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            filters: Vec::new(),
            order: None,
            limit: None,
        }
    }

    fn filter(mut self, column: &str, op: FilterOp, value: impl ToString) -> Self {
        self.filters.push(Filter {
            column: column.to_string(),
            op,
            value: value.to_string(),
        });
        self
    }

    pub fn eq(self, column: &str, value: impl ToString) -> Self {
        self.filter(column, FilterOp::Eq, value)
    }

    pub fn gte(self, column: &str, value: impl ToString) -> Self {
        self.filter(column, FilterOp::Gte, value)
    }

    pub fn lt(self, column: &str, value: impl ToString) -> Self {
        self.filter(column, FilterOp::Lt, value)
    }

    pub fn order_by(mut self, column: &str, descending: bool) -> Self {
        self.order = Some(Order {
            column: column.to_string(),
            descending,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Cache key made of the table name followed by the effective parameters,
    /// so invalidating by table prefix covers every query on that table.
    pub fn cache_key(&self) -> String {
        let mut key = self.table.clone();
        key.push(':');
        for (i, f) in self.filters.iter().enumerate() {
            if i > 0 {
                key.push('&');
            }
            let _ = write!(key, "{}={}.{}", f.column, f.op.as_str(), f.value);
        }
        if let Some(order) = &self.order {
            let _ = write!(
                key,
                "&order={}.{}",
                order.column,
                if order.descending { "desc" } else { "asc" }
            );
        }
        if let Some(limit) = self.limit {
            let _ = write!(key, "&limit={}", limit);
        }
        key
    }
}

/// Client handle to the remote data backend
#[async_trait]
pub trait Backend: Send + Sync {
    /// Insert a row and return it as stored
    async fn insert(&self, table: &str, row: Value) -> DataResult<Value>;

    async fn select(&self, query: &Query) -> DataResult<Vec<Value>>;

    /// Merge `patch` into the row with this id; `None` if there is no such row
    async fn update(&self, table: &str, id: &str, patch: Value) -> DataResult<Option<Value>>;

    fn backend_type(&self) -> &'static str;
}

/// Creates handles for the connection pool
pub trait BackendConnector: Send + Sync {
    fn connect(&self, key: &str) -> DataResult<Arc<dyn Backend>>;
}

/// REST connector when credentials are configured, otherwise nothing.
pub fn connector_from_config(config: &BackendConfig) -> Option<Arc<dyn BackendConnector>> {
    match (&config.url, &config.api_key) {
        (Some(url), Some(key)) if config.is_configured() => Some(Arc::new(RestConnector::new(
            url.clone(),
            key.clone(),
            config.request_timeout.as_std(),
        ))),
        _ => None,
    }
}
