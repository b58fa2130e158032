use crate::health::{HealthMonitor, Status};
use std::sync::Arc;
use tracing::debug;

/// Health-driven routing decisions for services that have synthetic data.
#[derive(Clone)]
pub struct FallbackPolicy {
    monitor: Arc<HealthMonitor>,
}

impl FallbackPolicy {
    pub fn new(monitor: Arc<HealthMonitor>) -> Self {
        Self { monitor }
    }

    /// True when the service has fallback enabled and is unhealthy or not yet
    /// checked. Degraded and maintenance services keep using the real path.
    pub fn should_use_fallback(&self, service: &str) -> bool {
        let Some(config) = self.monitor.service_config(service) else {
            return false;
        };
        if !config.fallback_enabled {
            return false;
        }
        let status = self.monitor.status(service);
        let fallback = matches!(status, Status::Unhealthy | Status::Unknown);
        if fallback {
            debug!("Falling back to synthetic data for {} ({})", service, status);
        }
        fallback
    }

    /// Attempt budget for calls to `service`. Once the service has been seen
    /// failing `retry_attempts` checks in a row, callers get a single attempt.
    pub fn retry_budget(&self, service: &str, default: u32) -> u32 {
        let (Some(config), Some(health)) = (self.monitor.service_config(service), self.monitor.health(service))
        else {
            return default;
        };
        if health.status == Status::Unhealthy && health.consecutive_failures >= config.retry_attempts.max(1) {
            1
        } else {
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Criticality, Duration, ServiceConfig};
    use crate::health::{HealthProbe, ProbeOutcome};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    struct FixedProbe(Mutex<ProbeOutcome>);

    #[async_trait]
    impl HealthProbe for FixedProbe {
        async fn probe(&self, _service: &ServiceConfig) -> ProbeOutcome {
            self.0.lock().clone()
        }
    }

    fn setup(fallback: bool) -> (Arc<HealthMonitor>, Arc<FixedProbe>, FallbackPolicy) {
        let mut config = ServiceConfig::new("database", "Patient Records", Criticality::Critical)
            .with_endpoint("http://db.internal/health")
            .with_timing(Duration::from_secs(1), Duration::from_secs(3600));
        if fallback {
            config = config.with_fallback(true);
        }
        let probe = Arc::new(FixedProbe(Mutex::new(ProbeOutcome::Up)));
        let monitor = HealthMonitor::new(vec![config], probe.clone());
        let policy = FallbackPolicy::new(Arc::clone(&monitor));
        (monitor, probe, policy)
    }

    async fn fail(monitor: &HealthMonitor, times: usize) {
        for _ in 0..times {
            monitor.check_once("database").await;
        }
    }

    #[tokio::test]
    async fn test_fallback_by_status() {
        let (monitor, probe, policy) = setup(true);

        // unknown before the first check
        assert!(policy.should_use_fallback("database"));

        monitor.check_once("database").await;
        assert!(!policy.should_use_fallback("database"));

        *probe.0.lock() = ProbeOutcome::Unreachable("refused".into());
        fail(&monitor, 2).await;
        assert_eq!(monitor.status("database"), Status::Degraded);
        assert!(!policy.should_use_fallback("database"));

        fail(&monitor, 1).await;
        assert_eq!(monitor.status("database"), Status::Unhealthy);
        assert!(policy.should_use_fallback("database"));

        monitor.set_maintenance("database", true);
        assert!(!policy.should_use_fallback("database"));
    }

    #[tokio::test]
    async fn test_no_fallback_when_disabled() {
        let (monitor, probe, policy) = setup(false);
        *probe.0.lock() = ProbeOutcome::ServerError { status: 503 };
        fail(&monitor, 3).await;
        assert_eq!(monitor.status("database"), Status::Unhealthy);
        assert!(!policy.should_use_fallback("database"));
        assert!(!policy.should_use_fallback("unregistered"));
    }

    #[tokio::test]
    async fn test_retry_budget_shrinks_after_repeated_failures() {
        let (monitor, probe, policy) = setup(true);
        assert_eq!(policy.retry_budget("database", 3), 3);

        *probe.0.lock() = ProbeOutcome::Unreachable("refused".into());
        fail(&monitor, 2).await;
        assert_eq!(policy.retry_budget("database", 3), 3);

        fail(&monitor, 1).await;
        assert_eq!(policy.retry_budget("database", 3), 1);

        *probe.0.lock() = ProbeOutcome::Up;
        fail(&monitor, 1).await;
        assert_eq!(policy.retry_budget("database", 3), 3);
        assert_eq!(policy.retry_budget("unregistered", 2), 2);
    }
}
