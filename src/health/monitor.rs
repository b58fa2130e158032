use super::{HealthCheckResult, HealthProbe, HealthSnapshot, ProbeOutcome, ServiceHealth, Status};
use crate::config::ServiceConfig;
use crate::metrics::Metrics;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

type Callback = Arc<dyn Fn(&HealthSnapshot) + Send + Sync>;

struct ServiceEntry {
    config: ServiceConfig,
    record: Mutex<ServiceHealth>,
    // Serializes checks for one service; guards no data.
    gate: tokio::sync::Mutex<()>,
}

#[derive(Default)]
struct Subscribers {
    next_id: AtomicU64,
    callbacks: RwLock<HashMap<u64, Callback>>,
}

/// Handle returned by [`HealthMonitor::subscribe`]. Dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    subscribers: Weak<Subscribers>,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(subscribers) = self.subscribers.upgrade() {
            subscribers.callbacks.write().remove(&self.id);
        }
    }
}

/// Periodic health checker for every configured service
pub struct HealthMonitor {
    entries: Vec<Arc<ServiceEntry>>,
    probe: Arc<dyn HealthProbe>,
    subscribers: Arc<Subscribers>,
    updates: broadcast::Sender<Arc<HealthSnapshot>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl HealthMonitor {
    pub fn new(services: Vec<ServiceConfig>, probe: Arc<dyn HealthProbe>) -> Arc<Self> {
        let entries = services
            .into_iter()
            .map(|config| {
                Arc::new(ServiceEntry {
                    record: Mutex::new(ServiceHealth::new(&config)),
                    config,
                    gate: tokio::sync::Mutex::new(()),
                })
            })
            .collect();
        let (updates, _) = broadcast::channel(64);

        Arc::new(Self {
            entries,
            probe,
            subscribers: Arc::new(Subscribers::default()),
            updates,
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Spawn one checker per service. Each checks immediately, then every
    /// `check_interval`. Calling `start` twice is a no-op.
    pub fn start(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() {
            return;
        }

        for entry in &self.entries {
            let monitor = Arc::downgrade(self);
            let entry = Arc::clone(entry);
            tasks.push(tokio::spawn(Self::run_service(monitor, entry)));
        }
        info!("Health monitor started for {} services", self.entries.len());
    }

    async fn run_service(monitor: Weak<Self>, entry: Arc<ServiceEntry>) {
        let mut ticker = interval(entry.config.check_interval.as_std());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let Some(monitor) = monitor.upgrade() else {
                break;
            };
            monitor.check_entry(&entry).await;
        }
    }

    /// Abort all checker tasks.
    pub fn shutdown(&self) {
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in &tasks {
            task.abort();
        }
        if !tasks.is_empty() {
            info!("Health monitor stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        !self.tasks.lock().is_empty()
    }

    fn entry(&self, name: &str) -> Option<&Arc<ServiceEntry>> {
        self.entries.iter().find(|e| e.config.name == name)
    }

    pub fn services(&self) -> impl Iterator<Item = &ServiceConfig> {
        self.entries.iter().map(|e| &e.config)
    }

    pub fn service_config(&self, name: &str) -> Option<&ServiceConfig> {
        self.entry(name).map(|e| &e.config)
    }

    /// Run one check right now. `None` if the service is not registered.
    pub async fn check_once(&self, name: &str) -> Option<HealthCheckResult> {
        let entry = self.entry(name)?;
        Some(self.check_entry(entry).await)
    }

    async fn check_entry(&self, entry: &ServiceEntry) -> HealthCheckResult {
        let gate = entry.gate.lock().await;
        let config = &entry.config;
        let started = Instant::now();

        let outcome = if config.endpoint.is_none() {
            ProbeOutcome::Up
        } else {
            // A probe that outlives its timeout is dropped here, so its
            // result can never land on the record.
            match timeout(config.timeout.as_std(), self.probe.probe(config)).await {
                Ok(outcome) => outcome,
                Err(_) => ProbeOutcome::Unreachable(format!("Timed out after {}", config.timeout)),
            }
        };
        let elapsed = if config.endpoint.is_none() {
            std::time::Duration::ZERO
        } else {
            started.elapsed()
        };

        let (result, previous) = {
            let mut record = entry.record.lock();
            let previous = record.status;
            record.record_check(&outcome, elapsed, Utc::now());
            let result = HealthCheckResult {
                status: record.status,
                response_time_ms: elapsed.as_millis() as u64,
                error: record.last_error.clone(),
            };
            (result, previous)
        };

        Metrics::record_health_check(&config.name, outcome.label(), elapsed);
        Metrics::set_service_status(&config.name, result.status);

        if previous != result.status {
            match result.status {
                Status::Unhealthy => warn!(
                    "Service {} is now unhealthy: {}",
                    config.name,
                    result.error.as_deref().unwrap_or("unknown error")
                ),
                status => info!("Service {} is now {}", config.name, status),
            }
        } else {
            debug!("Service {} checked: {} in {}ms", config.name, result.status, result.response_time_ms);
        }

        // The next check may start while subscribers run.
        drop(gate);
        self.publish();
        result
    }

    pub fn status(&self, name: &str) -> Status {
        self.entry(name)
            .map(|e| e.record.lock().status)
            .unwrap_or(Status::Unknown)
    }

    /// Consistent copy of one service record.
    pub fn health(&self, name: &str) -> Option<ServiceHealth> {
        self.entry(name).map(|e| e.record.lock().clone())
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        HealthSnapshot {
            taken_at: Utc::now(),
            services: self.entries.iter().map(|e| e.record.lock().clone()).collect(),
        }
    }

    /// Force a service into (or out of) maintenance. Returns false for
    /// unknown services.
    pub fn set_maintenance(&self, name: &str, on: bool) -> bool {
        let Some(entry) = self.entry(name) else {
            return false;
        };
        let status = {
            let mut record = entry.record.lock();
            if record.maintenance == on {
                return true;
            }
            record.set_maintenance(on);
            record.status
        };

        info!("Maintenance for {} {}", name, if on { "enabled" } else { "cleared" });
        Metrics::set_service_status(name, status);
        self.publish();
        true
    }

    /// Register a callback that receives a full snapshot after every change.
    ///
    /// Callbacks run synchronously on the task that finished the check, after
    /// that service's check gate is released. They must not block; hand slow
    /// work to a channel or use [`HealthMonitor::watch`] instead.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&HealthSnapshot) + Send + Sync + 'static,
    {
        let id = self.subscribers.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.callbacks.write().insert(id, Arc::new(callback));
        Subscription {
            id,
            subscribers: Arc::downgrade(&self.subscribers),
        }
    }

    /// Channel of snapshots for async consumers. Lagging receivers skip
    /// to the most recent snapshots.
    pub fn watch(&self) -> broadcast::Receiver<Arc<HealthSnapshot>> {
        self.updates.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.callbacks.read().len()
    }

    fn publish(&self) {
        let snapshot = Arc::new(self.snapshot());

        let callbacks: Vec<Callback> = self.subscribers.callbacks.read().values().cloned().collect();
        for callback in callbacks {
            callback(&snapshot);
        }

        let _ = self.updates.send(snapshot);
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Criticality, Duration};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;

    /// Probe that replays scripted outcomes, then repeats the last one.
    /// Each call takes its outcome and delay when it starts.
    struct ScriptedProbe {
        outcomes: Mutex<VecDeque<ProbeOutcome>>,
        delays: Mutex<VecDeque<std::time::Duration>>,
        delay: std::time::Duration,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl ScriptedProbe {
        fn new(outcomes: Vec<ProbeOutcome>) -> Arc<Self> {
            Self::slow(outcomes, std::time::Duration::ZERO)
        }

        fn slow(outcomes: Vec<ProbeOutcome>, delay: std::time::Duration) -> Arc<Self> {
            Self::paced(outcomes, Vec::new(), delay)
        }

        /// Per-call delays, falling back to `delay` once they run out
        fn paced(
            outcomes: Vec<ProbeOutcome>,
            delays: Vec<std::time::Duration>,
            delay: std::time::Duration,
        ) -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(outcomes.into()),
                delays: Mutex::new(delays.into()),
                delay,
                calls: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            })
        }

        fn next(&self) -> (ProbeOutcome, std::time::Duration) {
            let mut outcomes = self.outcomes.lock();
            let outcome = if outcomes.len() > 1 {
                outcomes.pop_front().unwrap_or(ProbeOutcome::Up)
            } else {
                outcomes.front().cloned().unwrap_or(ProbeOutcome::Up)
            };
            let delay = self.delays.lock().pop_front().unwrap_or(self.delay);
            (outcome, delay)
        }
    }

    /// Counts a probe call as in flight until dropped, timeouts included
    struct InFlight<'a>(&'a AtomicUsize);

    impl<'a> InFlight<'a> {
        fn enter(probe: &'a ScriptedProbe) -> Self {
            let now = probe.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            probe.max_in_flight.fetch_max(now, Ordering::SeqCst);
            InFlight(&probe.in_flight)
        }
    }

    impl Drop for InFlight<'_> {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl HealthProbe for ScriptedProbe {
        async fn probe(&self, _service: &ServiceConfig) -> ProbeOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let (outcome, delay) = self.next();
            let _in_flight = InFlight::enter(self);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            outcome
        }
    }

    fn service(name: &str, criticality: Criticality) -> ServiceConfig {
        ServiceConfig::new(name, name.to_uppercase(), criticality)
            .with_endpoint(format!("http://{}.internal/health", name))
            .with_timing(Duration::from_millis(200), Duration::from_secs(3600))
    }

    fn down() -> ProbeOutcome {
        ProbeOutcome::Unreachable("connection refused".into())
    }

    #[tokio::test]
    async fn test_initial_state_unknown() {
        let monitor = HealthMonitor::new(vec![service("db", Criticality::Critical)], ScriptedProbe::new(vec![]));
        assert_eq!(monitor.status("db"), Status::Unknown);
        let health = monitor.health("db").unwrap();
        assert_eq!(health.uptime, 100.0);
        assert_eq!(health.total_requests, 0);
        assert!(monitor.health("missing").is_none());
        assert_eq!(monitor.status("missing"), Status::Unknown);
    }

    #[tokio::test]
    async fn test_check_once_transitions() {
        let probe = ScriptedProbe::new(vec![ProbeOutcome::Up, down(), down(), down(), ProbeOutcome::Up]);
        let monitor = HealthMonitor::new(vec![service("db", Criticality::Critical)], probe);

        assert_eq!(monitor.check_once("db").await.unwrap().status, Status::Healthy);
        assert_eq!(monitor.check_once("db").await.unwrap().status, Status::Healthy);
        assert_eq!(monitor.check_once("db").await.unwrap().status, Status::Degraded);

        let third = monitor.check_once("db").await.unwrap();
        assert_eq!(third.status, Status::Unhealthy);
        assert_eq!(third.error.as_deref(), Some("connection refused"));

        assert_eq!(monitor.check_once("db").await.unwrap().status, Status::Healthy);
        assert_eq!(monitor.health("db").unwrap().consecutive_failures, 0);
        assert!(monitor.check_once("missing").await.is_none());
    }

    #[tokio::test]
    async fn test_no_endpoint_assumed_healthy() {
        let probe = ScriptedProbe::new(vec![down()]);
        let config = ServiceConfig::new("analytics", "Analytics", Criticality::Optional);
        let monitor = HealthMonitor::new(vec![config], probe.clone());

        let result = monitor.check_once("analytics").await.unwrap();
        assert_eq!(result.status, Status::Healthy);
        assert_eq!(result.response_time_ms, 0);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failure() {
        let probe = ScriptedProbe::slow(vec![ProbeOutcome::Up], std::time::Duration::from_millis(500));
        let config = service("slow", Criticality::Important)
            .with_timing(Duration::from_millis(20), Duration::from_secs(3600));
        let monitor = HealthMonitor::new(vec![config], probe);

        let result = monitor.check_once("slow").await.unwrap();
        assert!(result.error.unwrap().contains("Timed out"));
        let health = monitor.health("slow").unwrap();
        assert_eq!(health.failed_requests, 1);
        assert_eq!(health.consecutive_failures, 1);
    }

    #[tokio::test]
    async fn test_subscribers_receive_snapshots() {
        let monitor = HealthMonitor::new(
            vec![service("db", Criticality::Critical), service("maps", Criticality::Optional)],
            ScriptedProbe::new(vec![ProbeOutcome::Up]),
        );
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let subscription = monitor.subscribe(move |snapshot| {
            sink.lock().push(snapshot.services.len());
        });
        assert_eq!(monitor.subscriber_count(), 1);

        monitor.check_once("db").await;
        monitor.check_once("maps").await;
        assert_eq!(*seen.lock(), vec![2, 2]);

        subscription.unsubscribe();
        assert_eq!(monitor.subscriber_count(), 0);
        monitor.check_once("db").await;
        assert_eq!(seen.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_watch_channel() {
        let monitor = HealthMonitor::new(
            vec![service("db", Criticality::Critical)],
            ScriptedProbe::new(vec![ProbeOutcome::Up]),
        );
        let mut rx = monitor.watch();
        monitor.check_once("db").await;
        let snapshot = rx.recv().await.unwrap();
        assert_eq!(snapshot.get("db").unwrap().status, Status::Healthy);
    }

    #[tokio::test]
    async fn test_maintenance_override() {
        let monitor = HealthMonitor::new(
            vec![service("db", Criticality::Critical)],
            ScriptedProbe::new(vec![down()]),
        );
        assert!(monitor.set_maintenance("db", true));
        for _ in 0..3 {
            monitor.check_once("db").await;
        }
        assert_eq!(monitor.status("db"), Status::Maintenance);
        assert_eq!(monitor.health("db").unwrap().total_requests, 3);

        assert!(monitor.set_maintenance("db", false));
        assert_eq!(monitor.status("db"), Status::Unhealthy);
        assert!(!monitor.set_maintenance("missing", true));
    }

    #[tokio::test]
    async fn test_start_runs_initial_check() {
        let probe = ScriptedProbe::new(vec![ProbeOutcome::Up]);
        let monitor = HealthMonitor::new(
            vec![service("db", Criticality::Critical), service("email", Criticality::Important)],
            probe.clone(),
        );
        let mut rx = monitor.watch();
        monitor.start();
        monitor.start();
        assert!(monitor.is_running());

        rx.recv().await.unwrap();
        rx.recv().await.unwrap();
        assert_eq!(monitor.status("db"), Status::Healthy);
        assert_eq!(monitor.status("email"), Status::Healthy);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 2);

        monitor.shutdown();
        assert!(!monitor.is_running());
    }

    #[tokio::test]
    async fn test_slow_service_does_not_block_others() {
        struct SplitProbe;

        #[async_trait]
        impl HealthProbe for SplitProbe {
            async fn probe(&self, service: &ServiceConfig) -> ProbeOutcome {
                if service.name == "slow" {
                    tokio::time::sleep(std::time::Duration::from_secs(10)).await;
                }
                ProbeOutcome::Up
            }
        }

        let slow = service("slow", Criticality::Optional)
            .with_timing(Duration::from_secs(30), Duration::from_secs(3600));
        let monitor = HealthMonitor::new(vec![slow, service("db", Criticality::Critical)], Arc::new(SplitProbe));
        let mut rx = monitor.watch();
        monitor.start();

        let snapshot = tokio::time::timeout(std::time::Duration::from_secs(2), rx.recv())
            .await
            .expect("fast service should report first")
            .unwrap();
        assert_eq!(snapshot.get("db").unwrap().status, Status::Healthy);
        assert_eq!(snapshot.get("slow").unwrap().status, Status::Unknown);
        monitor.shutdown();
    }

    #[tokio::test]
    async fn test_checks_for_one_service_never_overlap() {
        let probe = ScriptedProbe::slow(vec![ProbeOutcome::Up], std::time::Duration::from_millis(40));
        let monitor = HealthMonitor::new(vec![service("db", Criticality::Critical)], probe.clone());

        monitor.start();
        let (first, second) = tokio::join!(monitor.check_once("db"), monitor.check_once("db"));
        assert!(first.is_some() && second.is_some());

        tokio::time::timeout(std::time::Duration::from_secs(2), async {
            while monitor.health("db").unwrap().total_requests < 3 {
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("scheduled check should finish");
        monitor.shutdown();

        assert_eq!(probe.calls.load(Ordering::SeqCst), 3);
        assert_eq!(probe.max_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(probe.in_flight.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_timed_out_check_never_lands_late() {
        let probe = ScriptedProbe::paced(
            vec![ProbeOutcome::Up, ProbeOutcome::ServerError { status: 503 }, ProbeOutcome::Up],
            vec![
                std::time::Duration::ZERO,
                std::time::Duration::from_millis(300),
                std::time::Duration::ZERO,
            ],
            std::time::Duration::ZERO,
        );
        let config = service("db", Criticality::Critical)
            .with_timing(Duration::from_millis(50), Duration::from_secs(3600));
        let monitor = HealthMonitor::new(vec![config], probe.clone());

        assert_eq!(monitor.check_once("db").await.unwrap().status, Status::Healthy);
        let timed_out = monitor.check_once("db").await.unwrap();
        assert!(timed_out.error.unwrap().contains("Timed out"));
        assert_eq!(monitor.check_once("db").await.unwrap().status, Status::Healthy);

        // Past the point where the abandoned 503 would have resolved
        tokio::time::sleep(std::time::Duration::from_millis(400)).await;

        let health = monitor.health("db").unwrap();
        assert_eq!(health.status, Status::Healthy);
        assert_eq!(health.total_requests, 3);
        assert_eq!(health.failed_requests, 1);
        assert_eq!(health.consecutive_failures, 0);
        assert!(health.last_error.is_none());
        assert_eq!(probe.in_flight.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_slow_subscriber_does_not_hold_the_gate() {
        let monitor = HealthMonitor::new(
            vec![service("db", Criticality::Critical)],
            ScriptedProbe::new(vec![ProbeOutcome::Up]),
        );
        let first_call = Arc::new(std::sync::atomic::AtomicBool::new(true));
        let _subscription = monitor.subscribe(move |_| {
            if first_call.swap(false, Ordering::SeqCst) {
                std::thread::sleep(std::time::Duration::from_millis(300));
            }
        });

        let background = Arc::clone(&monitor);
        let slow = tokio::spawn(async move { background.check_once("db").await });
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let started = Instant::now();
        assert!(monitor.check_once("db").await.is_some());
        assert!(started.elapsed() < std::time::Duration::from_millis(200));

        slow.await.unwrap();
        assert_eq!(monitor.health("db").unwrap().total_requests, 2);
    }
}
