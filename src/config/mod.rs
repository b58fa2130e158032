pub mod defaults;
pub mod duration;
pub mod env;
mod types;

pub use duration::Duration;
pub use types::*;

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::path::Path;

impl Config {
    /// Load from a YAML file, overlay the process environment and validate.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let mut config: Config =
            serde_yml::from_str(&content).with_context(|| "Failed to parse config file")?;

        config.apply_env(&env::process_env);
        config.validate()?;

        Ok(config)
    }

    /// Built-in service registry plus whatever the environment provides.
    pub fn from_env() -> Result<Self> {
        let mut config = Config::default();
        config.apply_env(&env::process_env);
        config.validate()?;
        Ok(config)
    }

    pub fn service(&self, name: &str) -> Option<&ServiceConfig> {
        self.services.iter().find(|s| s.name == name)
    }

    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for service in &self.services {
            if service.name.is_empty() {
                anyhow::bail!("Every service needs a name");
            }
            if !seen.insert(service.name.as_str()) {
                anyhow::bail!("Service '{}' is defined more than once", service.name);
            }
            if service.check_interval.is_zero() {
                anyhow::bail!("Service '{}' must have a non-zero checkInterval", service.name);
            }
            if service.timeout.is_zero() {
                anyhow::bail!("Service '{}' must have a non-zero timeout", service.name);
            }
            if let Some(endpoint) = &service.endpoint {
                url::Url::parse(endpoint).with_context(|| {
                    format!("Invalid endpoint for service '{}': {}", service.name, endpoint)
                })?;
            }
        }

        if self.pool.max_connections == 0 {
            anyhow::bail!("pool.maxConnections must be at least 1");
        }
        if self.pool.retry.attempts == 0 {
            anyhow::bail!("pool.retry.attempts must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.mock.failure_rate) {
            anyhow::bail!("mock.failureRate must be between 0.0 and 1.0");
        }
        if let Some(url) = &self.backend.url {
            url::Url::parse(url).with_context(|| format!("Invalid backend url: {}", url))?;
        }
        if self.service(&self.backend.service).is_none() {
            anyhow::bail!(
                "backend.service references unknown service '{}'",
                self.backend.service
            );
        }
        let hours = &self.clinic;
        if hours.open_hour >= hours.close_hour || hours.close_hour > 24 || hours.slot_minutes == 0 {
            anyhow::bail!("clinic hours must describe a non-empty day with a positive slot length");
        }

        Ok(())
    }
}
