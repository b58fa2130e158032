use super::RetryPolicy;
use crate::backend::{Backend, BackendConnector};
use crate::config::PoolConfig;
use crate::error::{DataError, DataResult};
use crate::metrics::Metrics;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Named backend handles with a soft cap: past `max_connections` a new key
/// shares an existing handle instead of opening another one.
pub struct BackendPool {
    connector: Option<Arc<dyn BackendConnector>>,
    handles: Mutex<HashMap<String, Arc<dyn Backend>>>,
    max_connections: usize,
    retry: RetryPolicy,
}

impl BackendPool {
    pub fn new(
        connector: Option<Arc<dyn BackendConnector>>,
        max_connections: usize,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            connector,
            handles: Mutex::new(HashMap::new()),
            max_connections: max_connections.max(1),
            retry,
        }
    }

    pub fn from_config(config: &PoolConfig, connector: Option<Arc<dyn BackendConnector>>) -> Self {
        Self::new(connector, config.max_connections, RetryPolicy::new(&config.retry))
    }

    /// False when no backend credentials were provided.
    pub fn is_configured(&self) -> bool {
        self.connector.is_some()
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Handle for `key`, created on first use. `None` only when the backend
    /// is unconfigured or the handle could not be built.
    pub fn get_connection(&self, key: &str) -> Option<Arc<dyn Backend>> {
        let connector = self.connector.as_ref()?;
        let mut handles = self.handles.lock();

        if let Some(handle) = handles.get(key) {
            return Some(Arc::clone(handle));
        }

        if handles.len() >= self.max_connections {
            warn!(
                "Backend pool full ({} handles), sharing an existing handle for '{}'",
                handles.len(),
                key
            );
            Metrics::record_pool_overflow(key);
            return handles.values().next().cloned();
        }

        match connector.connect(key) {
            Ok(handle) => {
                handles.insert(key.to_string(), Arc::clone(&handle));
                debug!("Backend pool opened '{}' ({}/{})", key, handles.len(), self.max_connections);
                Metrics::record_pool_size(handles.len());
                Some(handle)
            }
            Err(e) => {
                error!("Failed to open backend handle '{}': {}", key, e);
                None
            }
        }
    }

    /// Like `get_connection`, but absence is an error.
    pub fn connection(&self, key: &str) -> DataResult<Arc<dyn Backend>> {
        self.get_connection(key)
            .ok_or_else(|| DataError::Connection("backend is not configured".to_string()))
    }

    pub fn close_connection(&self, key: &str) -> bool {
        let mut handles = self.handles.lock();
        let removed = handles.remove(key).is_some();
        if removed {
            debug!("Backend pool closed '{}'", key);
            Metrics::record_pool_size(handles.len());
        }
        removed
    }

    pub fn close_all(&self) -> usize {
        let mut handles = self.handles.lock();
        let closed = handles.len();
        handles.clear();
        Metrics::record_pool_size(0);
        closed
    }

    pub fn live_connections(&self) -> usize {
        self.handles.lock().len()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.handles.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Run `operation` with the configured attempt budget.
    pub async fn execute_with_retry<T, F, Fut>(&self, operation: F) -> DataResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = DataResult<T>>,
    {
        self.execute_with_attempts(self.retry.attempts(), operation).await
    }

    /// Run `operation` up to `attempts` times. Errors that are not retryable
    /// return immediately; the last error is returned as-is.
    pub async fn execute_with_attempts<T, F, Fut>(&self, attempts: u32, mut operation: F) -> DataResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = DataResult<T>>,
    {
        let attempts = attempts.max(1);
        let mut attempt = 0;

        loop {
            let err = match operation().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };
            attempt += 1;
            if !err.is_retryable() || attempt >= attempts {
                return Err(err);
            }

            let delay = self.retry.delay_for_attempt(attempt);
            warn!(
                "Backend operation failed (attempt {}/{}): {}. Retrying in {:?}",
                attempt, attempts, err, delay
            );
            Metrics::record_retry();
            tokio::time::sleep(delay).await;
        }
    }
}

impl Drop for BackendPool {
    fn drop(&mut self) {
        self.handles.get_mut().clear();
    }
}
