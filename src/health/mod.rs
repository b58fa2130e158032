mod checker;
mod monitor;

pub use checker::{HealthProbe, HttpProbe, ProbeOutcome};
pub use monitor::{HealthMonitor, Subscription};

use crate::config::{Criticality, ServiceConfig};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Consecutive failures at which a service is reported degraded
pub const DEGRADED_AFTER: u32 = 2;
/// Consecutive failures at which a service is reported unhealthy
pub const UNHEALTHY_AFTER: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Unknown,
    Healthy,
    Degraded,
    Unhealthy,
    Maintenance,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Unknown => "unknown",
            Status::Healthy => "healthy",
            Status::Degraded => "degraded",
            Status::Unhealthy => "unhealthy",
            Status::Maintenance => "maintenance",
        }
    }

    /// Gauge value exported to metrics
    pub fn as_gauge(&self) -> f64 {
        match self {
            Status::Healthy => 1.0,
            Status::Degraded => 0.5,
            Status::Unknown | Status::Maintenance => -1.0,
            Status::Unhealthy => 0.0,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a single `check_once` call
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckResult {
    pub status: Status,
    pub response_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Rolling health record for one service
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceHealth {
    pub name: String,
    pub display_name: String,
    pub criticality: Criticality,
    pub status: Status,
    pub maintenance: bool,
    pub last_checked: Option<DateTime<Utc>>,
    pub last_response_time_ms: Option<u64>,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
    pub total_requests: u64,
    pub failed_requests: u64,
    pub uptime: f64,
    pub average_response_time_ms: f64,
    /// Status from checks alone, kept while maintenance masks it
    #[serde(skip)]
    observed: Status,
}

impl ServiceHealth {
    pub fn new(config: &ServiceConfig) -> Self {
        Self {
            name: config.name.clone(),
            display_name: config.display_name.clone(),
            criticality: config.criticality,
            status: Status::Unknown,
            maintenance: false,
            last_checked: None,
            last_response_time_ms: None,
            last_error: None,
            consecutive_failures: 0,
            total_requests: 0,
            failed_requests: 0,
            uptime: 100.0,
            average_response_time_ms: 0.0,
            observed: Status::Unknown,
        }
    }

    /// Status the checks would report with maintenance off.
    pub fn observed_status(&self) -> Status {
        self.observed
    }

    /// Fold one probe outcome into the record.
    pub fn record_check(&mut self, outcome: &ProbeOutcome, elapsed: Duration, now: DateTime<Utc>) {
        self.total_requests += 1;

        match outcome {
            ProbeOutcome::Up => {
                self.consecutive_failures = 0;
                self.observed = Status::Healthy;
                self.last_error = None;
            }
            ProbeOutcome::Rejected { status } => {
                self.record_failure(format!("Unexpected status {}", status));
                self.observed = Status::Degraded;
            }
            ProbeOutcome::ServerError { status } => {
                self.record_failure(format!("Server error {}", status));
                self.observed = Status::Unhealthy;
            }
            ProbeOutcome::Unreachable(error) => {
                self.record_failure(error.clone());
                if self.consecutive_failures >= UNHEALTHY_AFTER {
                    self.observed = Status::Unhealthy;
                } else if self.consecutive_failures == DEGRADED_AFTER {
                    self.observed = Status::Degraded;
                }
            }
        }

        let millis = elapsed.as_millis() as u64;
        let n = self.total_requests as f64;
        self.average_response_time_ms += (millis as f64 - self.average_response_time_ms) / n;
        self.last_response_time_ms = Some(millis);
        self.last_checked = Some(now);
        self.uptime = uptime(self.total_requests, self.failed_requests);
        self.refresh_status();
    }

    fn record_failure(&mut self, error: String) {
        self.failed_requests += 1;
        self.consecutive_failures += 1;
        self.last_error = Some(error);
    }

    pub fn set_maintenance(&mut self, on: bool) {
        self.maintenance = on;
        self.refresh_status();
    }

    fn refresh_status(&mut self) {
        self.status = if self.maintenance {
            Status::Maintenance
        } else {
            self.observed
        };
    }
}

/// Percentage of successful checks; 100 before any check has run.
pub fn uptime(total: u64, failed: u64) -> f64 {
    if total == 0 {
        return 100.0;
    }
    (total.saturating_sub(failed)) as f64 / total as f64 * 100.0
}

/// Point-in-time copy of every service record
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSnapshot {
    pub taken_at: DateTime<Utc>,
    pub services: Vec<ServiceHealth>,
}

impl HealthSnapshot {
    pub fn get(&self, name: &str) -> Option<&ServiceHealth> {
        self.services.iter().find(|s| s.name == name)
    }
}
