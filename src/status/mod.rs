use crate::config::Criticality;
use crate::health::{HealthMonitor, HealthSnapshot, ServiceHealth, Status};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

/// Display form of one service status
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Badge {
    pub name: String,
    pub display_name: String,
    pub status: Status,
    pub label: &'static str,
    pub color: &'static str,
    pub criticality: Criticality,
    pub uptime: f64,
    pub last_checked: Option<DateTime<Utc>>,
}

impl Badge {
    pub fn from_health(health: &ServiceHealth) -> Self {
        let (label, color) = match health.status {
            Status::Healthy => ("Operational", "green"),
            Status::Degraded => ("Degraded Performance", "yellow"),
            Status::Unhealthy => ("Outage", "red"),
            Status::Maintenance => ("Under Maintenance", "blue"),
            Status::Unknown => ("Checking", "gray"),
        };
        Self {
            name: health.name.clone(),
            display_name: health.display_name.clone(),
            status: health.status,
            label,
            color,
            criticality: health.criticality,
            uptime: health.uptime,
            last_checked: health.last_checked,
        }
    }
}

/// "N of M healthy" plus the critical services that are down
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSummary {
    pub healthy_count: usize,
    pub total_count: usize,
    pub critical_services_down: Vec<String>,
}

impl HealthSummary {
    pub fn from_snapshot(snapshot: &HealthSnapshot) -> Self {
        Self {
            healthy_count: snapshot
                .services
                .iter()
                .filter(|s| s.status == Status::Healthy)
                .count(),
            total_count: snapshot.services.len(),
            critical_services_down: snapshot
                .services
                .iter()
                .filter(|s| s.criticality == Criticality::Critical && s.status == Status::Unhealthy)
                .map(|s| s.display_name.clone())
                .collect(),
        }
    }

    pub fn all_healthy(&self) -> bool {
        self.healthy_count == self.total_count
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Dashboard {
    pub generated_at: DateTime<Utc>,
    pub overall: Status,
    pub summary: HealthSummary,
    pub services: Vec<ServiceHealth>,
}

/// Worst status across the snapshot, ignoring services under maintenance.
/// Only critical services can make the whole site unhealthy.
pub fn overall_status(snapshot: &HealthSnapshot) -> Status {
    let active: Vec<&ServiceHealth> = snapshot
        .services
        .iter()
        .filter(|s| s.status != Status::Maintenance)
        .collect();

    if active.is_empty() {
        return if snapshot.services.is_empty() {
            Status::Unknown
        } else {
            Status::Maintenance
        };
    }
    if active
        .iter()
        .any(|s| s.criticality == Criticality::Critical && s.status == Status::Unhealthy)
    {
        return Status::Unhealthy;
    }
    if active.iter().all(|s| s.status == Status::Unknown) {
        return Status::Unknown;
    }
    if active
        .iter()
        .all(|s| matches!(s.status, Status::Healthy | Status::Unknown))
    {
        Status::Healthy
    } else {
        Status::Degraded
    }
}

/// Read-only views over the health monitor for the UI layer
#[derive(Clone)]
pub struct StatusBoard {
    monitor: Arc<HealthMonitor>,
}

impl StatusBoard {
    pub fn new(monitor: Arc<HealthMonitor>) -> Self {
        Self { monitor }
    }

    pub fn monitor(&self) -> &Arc<HealthMonitor> {
        &self.monitor
    }

    pub fn badge(&self, name: &str) -> Option<Badge> {
        self.monitor.health(name).map(|h| Badge::from_health(&h))
    }

    pub fn badges(&self) -> Vec<Badge> {
        self.monitor
            .snapshot()
            .services
            .iter()
            .map(Badge::from_health)
            .collect()
    }

    pub fn summary(&self) -> HealthSummary {
        HealthSummary::from_snapshot(&self.monitor.snapshot())
    }

    pub fn dashboard(&self) -> Dashboard {
        let snapshot = self.monitor.snapshot();
        Dashboard {
            generated_at: snapshot.taken_at,
            overall: overall_status(&snapshot),
            summary: HealthSummary::from_snapshot(&snapshot),
            services: snapshot.services,
        }
    }
}
