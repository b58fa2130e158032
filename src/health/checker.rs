use crate::config::{CheckMethod, ServiceConfig};
use async_trait::async_trait;
use reqwest::Method;
use tracing::debug;

/// Classified result of one probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// 2xx (or the configured expected status), or nothing to probe
    Up,
    /// Reachable but answered with a non-success, non-5xx status
    Rejected { status: u16 },
    /// 5xx
    ServerError { status: u16 },
    /// Timeout, connection failure or any other transport error
    Unreachable(String),
}

impl ProbeOutcome {
    pub fn from_status(status: u16, expected: Option<u16>) -> Self {
        let ok = match expected {
            Some(code) => status == code,
            None => (200..300).contains(&status),
        };
        if ok {
            ProbeOutcome::Up
        } else if (500..600).contains(&status) {
            ProbeOutcome::ServerError { status }
        } else {
            ProbeOutcome::Rejected { status }
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ProbeOutcome::Up => "up",
            ProbeOutcome::Rejected { .. } => "rejected",
            ProbeOutcome::ServerError { .. } => "server_error",
            ProbeOutcome::Unreachable(_) => "unreachable",
        }
    }
}

/// Performs a single network probe against a service.
///
/// The monitor owns timeouts; implementations only need to make one attempt.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self, service: &ServiceConfig) -> ProbeOutcome;
}

/// HTTP probe backed by a shared reqwest client
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("clinic-resilience-health/", env!("CARGO_PKG_VERSION")))
            .pool_max_idle_per_host(2)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HealthProbe for HttpProbe {
    async fn probe(&self, service: &ServiceConfig) -> ProbeOutcome {
        let Some(endpoint) = service.endpoint.as_deref() else {
            return ProbeOutcome::Up;
        };

        let method = match service.method {
            CheckMethod::Get => Method::GET,
            CheckMethod::Head => Method::HEAD,
        };

        let mut request = self.client.request(method, endpoint);
        for (name, value) in &service.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                debug!("Health probe {} -> {}", service.name, status);
                ProbeOutcome::from_status(status, service.expected_status)
            }
            Err(e) => ProbeOutcome::Unreachable(format!("Request failed: {}", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert_eq!(ProbeOutcome::from_status(200, None), ProbeOutcome::Up);
        assert_eq!(ProbeOutcome::from_status(204, None), ProbeOutcome::Up);
        assert_eq!(
            ProbeOutcome::from_status(503, None),
            ProbeOutcome::ServerError { status: 503 }
        );
        assert_eq!(
            ProbeOutcome::from_status(401, None),
            ProbeOutcome::Rejected { status: 401 }
        );
        assert_eq!(
            ProbeOutcome::from_status(301, None),
            ProbeOutcome::Rejected { status: 301 }
        );
    }

    #[test]
    fn test_expected_status_override() {
        assert_eq!(ProbeOutcome::from_status(404, Some(404)), ProbeOutcome::Up);
        assert_eq!(
            ProbeOutcome::from_status(200, Some(404)),
            ProbeOutcome::Rejected { status: 200 }
        );
    }

    #[tokio::test]
    async fn test_probe_without_endpoint_is_up() {
        let probe = HttpProbe::new().unwrap();
        let service = ServiceConfig::new("analytics", "Analytics", crate::config::Criticality::Optional);
        assert_eq!(probe.probe(&service).await, ProbeOutcome::Up);
    }

    #[tokio::test]
    async fn test_probe_unreachable() {
        let probe = HttpProbe::new().unwrap();
        // Port 9 (discard) on localhost is closed in test environments
        let service = ServiceConfig::new("email", "Email", crate::config::Criticality::Important)
            .with_endpoint("http://127.0.0.1:9/health");
        assert!(matches!(probe.probe(&service).await, ProbeOutcome::Unreachable(_)));
    }
}
