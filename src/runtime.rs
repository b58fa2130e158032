use anyhow::{Context, Result};
use futures::future::join_all;
use std::sync::Arc;
use tracing::info;

use crate::admin::AdminApi;
use crate::backend::{BackendConnector, connector_from_config};
use crate::cache::QueryCache;
use crate::config::Config;
use crate::fallback::{FallbackPolicy, MockInterceptor};
use crate::health::{HealthCheckResult, HealthMonitor, HealthProbe, HttpProbe};
use crate::pool::BackendPool;
use crate::records::DataLayer;
use crate::status::StatusBoard;

/// Owns every long-lived component. Built once from configuration.
pub struct Runtime {
    config: Arc<Config>,
    monitor: Arc<HealthMonitor>,
    pool: Arc<BackendPool>,
    data: Arc<DataLayer>,
    board: StatusBoard,
}

impl Runtime {
    /// Wire the HTTP health probe and, when credentials exist, the REST backend.
    pub fn new(config: Config) -> Result<Self> {
        let probe = HttpProbe::new().context("Failed to build health probe client")?;
        let connector = connector_from_config(&config.backend);
        Ok(Self::with_parts(config, Arc::new(probe), connector))
    }

    pub fn with_parts(
        config: Config,
        probe: Arc<dyn HealthProbe>,
        connector: Option<Arc<dyn BackendConnector>>,
    ) -> Self {
        let monitor = HealthMonitor::new(config.services.clone(), probe);
        let pool = Arc::new(BackendPool::from_config(&config.pool, connector));
        let cache = Arc::new(QueryCache::new(Arc::clone(&pool)));
        let interceptor = Arc::new(MockInterceptor::from_config(&config));
        let policy = FallbackPolicy::new(Arc::clone(&monitor));
        let data = Arc::new(DataLayer::new(&config, cache, interceptor, policy));

        info!(
            "Runtime ready: mode={}, backend={}, mock={}, {} monitored services",
            config.run_mode(),
            if pool.is_configured() { "configured" } else { "absent" },
            config.mock_enabled(),
            config.services.len()
        );

        Self {
            config: Arc::new(config),
            board: StatusBoard::new(Arc::clone(&monitor)),
            monitor,
            pool,
            data,
        }
    }

    /// Begin periodic health checks
    pub fn start(&self) {
        self.monitor.start();
    }

    /// One check of every service, in registration order
    pub async fn check_all(&self) -> Vec<(String, HealthCheckResult)> {
        let names: Vec<String> = self.monitor.services().map(|s| s.name.clone()).collect();
        let results = join_all(names.iter().map(|name| self.monitor.check_once(name))).await;
        names
            .into_iter()
            .zip(results)
            .filter_map(|(name, result)| result.map(|r| (name, r)))
            .collect()
    }

    pub fn shutdown(&self) {
        self.monitor.shutdown();
        let closed = self.pool.close_all();
        info!("Runtime stopped, closed {} backend connections", closed);
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn monitor(&self) -> &Arc<HealthMonitor> {
        &self.monitor
    }

    pub fn pool(&self) -> &Arc<BackendPool> {
        &self.pool
    }

    pub fn data(&self) -> &Arc<DataLayer> {
        &self.data
    }

    pub fn status(&self) -> &StatusBoard {
        &self.board
    }

    pub fn admin_api(&self) -> AdminApi {
        AdminApi::new(self.board.clone()).with_cache(Arc::clone(self.data.cache()))
    }
}
