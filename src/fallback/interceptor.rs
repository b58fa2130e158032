use crate::cache::{CacheEntry, TtlMap};
use crate::config::Config;
use crate::error::{DataError, DataResult};
use crate::metrics::Metrics;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Per-call options for [`MockInterceptor::intercept`]
#[derive(Debug, Clone, Copy)]
pub struct InterceptOptions {
    /// Reuse a previously generated mock value for the same key
    pub cache: bool,
    /// Lifetime of a cached mock value; the interceptor default when `None`
    pub cache_ttl: Option<Duration>,
    /// Let the configured failure rate apply to this call
    pub allow_failure: bool,
}

impl Default for InterceptOptions {
    fn default() -> Self {
        Self {
            cache: false,
            cache_ttl: None,
            allow_failure: true,
        }
    }
}

impl InterceptOptions {
    pub fn cached() -> Self {
        Self {
            cache: true,
            ..Self::default()
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }
}

/// Routes a call to either the real implementation or a synthetic generator.
pub struct MockInterceptor {
    enabled: AtomicBool,
    delay: Duration,
    failure_rate: f64,
    default_ttl: Duration,
    cache: TtlMap,
    rng: Mutex<StdRng>,
}

impl MockInterceptor {
    pub fn new(enabled: bool, delay: Duration, failure_rate: f64, default_ttl: Duration) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            delay,
            failure_rate: failure_rate.clamp(0.0, 1.0),
            default_ttl,
            cache: TtlMap::new(),
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.mock_enabled(),
            config.mock_delay().as_std(),
            config.mock.failure_rate,
            config.mock.cache_ttl.as_std(),
        )
    }

    /// Make simulated failures reproducible.
    pub fn with_seed(self, seed: u64) -> Self {
        *self.rng.lock() = StdRng::seed_from_u64(seed);
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        let previous = self.enabled.swap(enabled, Ordering::Relaxed);
        if previous != enabled {
            debug!(target: "mock", "Mock interception {}", if enabled { "enabled" } else { "disabled" });
        }
    }

    pub fn failure_rate(&self) -> f64 {
        self.failure_rate
    }

    /// `real` when interception is off, the mock path otherwise.
    pub async fn intercept<T, R, RFut, M>(
        &self,
        key: &str,
        real: R,
        mock: M,
        options: InterceptOptions,
    ) -> DataResult<T>
    where
        T: Clone + Send + Sync + 'static,
        R: FnOnce() -> RFut,
        RFut: Future<Output = DataResult<T>>,
        M: FnOnce() -> T,
    {
        self.intercept_conditional(self.is_enabled(), key, real, mock, options)
            .await
    }

    /// Take the mock path only when `condition` holds. Real results are never
    /// cached here.
    pub async fn intercept_conditional<T, R, RFut, M>(
        &self,
        condition: bool,
        key: &str,
        real: R,
        mock: M,
        options: InterceptOptions,
    ) -> DataResult<T>
    where
        T: Clone + Send + Sync + 'static,
        R: FnOnce() -> RFut,
        RFut: Future<Output = DataResult<T>>,
        M: FnOnce() -> T,
    {
        if !condition {
            return real().await;
        }

        if options.cache
            && let Some(value) = self.cache.get::<T>(key)
        {
            debug!(target: "mock", "Serving cached synthetic data for {}", key);
            Metrics::record_mock_response(key);
            return Ok(value);
        }

        if options.allow_failure && self.roll_failure() {
            warn!(target: "mock", "Simulated failure for {}", key);
            Metrics::record_mock_failure(key);
            return Err(DataError::Simulated(key.to_string()));
        }

        let generation = self.cache.generation();
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let value = mock();
        if options.cache {
            let ttl = options.cache_ttl.unwrap_or(self.default_ttl);
            self.cache
                .insert_since(key, CacheEntry::new(value.clone(), ttl), generation);
        }

        debug!(target: "mock", "Serving synthetic data for {}", key);
        Metrics::record_mock_response(key);
        Ok(value)
    }

    fn roll_failure(&self) -> bool {
        if self.failure_rate <= 0.0 {
            return false;
        }
        if self.failure_rate >= 1.0 {
            return true;
        }
        self.rng.lock().random::<f64>() < self.failure_rate
    }

    /// Drop cached mock values whose key starts with `prefix`; all when `None`.
    pub fn clear_cache(&self, prefix: Option<&str>) {
        self.cache.clear(prefix);
    }

    pub fn cache_size(&self) -> usize {
        self.cache.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::time::Instant;

    fn interceptor(enabled: bool, failure_rate: f64) -> MockInterceptor {
        MockInterceptor::new(enabled, Duration::ZERO, failure_rate, Duration::from_secs(60)).with_seed(7)
    }

    #[tokio::test]
    async fn test_disabled_always_calls_real() {
        let interceptor = interceptor(false, 1.0);
        let value = interceptor
            .intercept("patients.get:1", || async { Ok("real") }, || "mock", InterceptOptions::cached())
            .await
            .unwrap();
        assert_eq!(value, "real");
        assert_eq!(interceptor.cache_size(), 0);
    }

    #[tokio::test]
    async fn test_enabled_serves_mock() {
        let interceptor = interceptor(true, 0.0);
        let value = interceptor
            .intercept(
                "patients.get:1",
                || async { Err::<&str, _>(DataError::Connection("unused".into())) },
                || "mock",
                InterceptOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(value, "mock");
    }

    #[tokio::test]
    async fn test_certain_failure_always_raises() {
        let interceptor = interceptor(true, 1.0);
        for _ in 0..20 {
            let result = interceptor
                .intercept("slots", || async { Ok(1) }, || 2, InterceptOptions::default())
                .await;
            assert!(matches!(result, Err(DataError::Simulated(_))));
        }
    }

    #[tokio::test]
    async fn test_failures_can_be_suppressed_per_call() {
        let interceptor = interceptor(true, 1.0);
        let options = InterceptOptions {
            allow_failure: false,
            ..InterceptOptions::default()
        };
        assert_eq!(
            interceptor.intercept("slots", || async { Ok(1) }, || 2, options).await.unwrap(),
            2
        );
    }

    #[tokio::test]
    async fn test_mock_cache() {
        let interceptor = interceptor(true, 0.0);
        let generated = AtomicU32::new(0);
        let generate = || generated.fetch_add(1, Ordering::SeqCst) + 1;

        let a = interceptor
            .intercept("k", || async { Ok(0) }, generate, InterceptOptions::cached())
            .await
            .unwrap();
        let b = interceptor
            .intercept("k", || async { Ok(0) }, generate, InterceptOptions::cached())
            .await
            .unwrap();
        assert_eq!((a, b), (1, 1));

        interceptor.clear_cache(Some("k"));
        let c = interceptor
            .intercept("k", || async { Ok(0) }, generate, InterceptOptions::cached())
            .await
            .unwrap();
        assert_eq!(c, 2);
    }

    #[tokio::test]
    async fn test_conditional() {
        let interceptor = interceptor(false, 0.0);
        let mock = interceptor
            .intercept_conditional(true, "k", || async { Ok("real") }, || "mock", InterceptOptions::default())
            .await
            .unwrap();
        let real = interceptor
            .intercept_conditional(false, "k", || async { Ok("real") }, || "mock", InterceptOptions::default())
            .await
            .unwrap();
        assert_eq!((mock, real), ("mock", "real"));
    }

    #[tokio::test]
    async fn test_delay_applies_to_mock_path() {
        let interceptor = MockInterceptor::new(true, Duration::from_millis(30), 0.0, Duration::from_secs(60));
        let started = Instant::now();
        interceptor
            .intercept("k", || async { Ok(0) }, || 1, InterceptOptions::default())
            .await
            .unwrap();
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn test_toggle_and_short_ttl() {
        let interceptor = interceptor(false, 0.0);
        let real = interceptor
            .intercept("k", || async { Ok("real") }, || "mock", InterceptOptions::default())
            .await
            .unwrap();
        assert_eq!(real, "real");

        interceptor.set_enabled(true);
        let options = InterceptOptions::cached().with_ttl(Duration::from_millis(30));
        let first = interceptor
            .intercept("k", || async { Ok(String::new()) }, || "first".to_string(), options)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let second = interceptor
            .intercept("k", || async { Ok(String::new()) }, || "second".to_string(), options)
            .await
            .unwrap();
        assert_eq!((first.as_str(), second.as_str()), ("first", "second"));
        assert_eq!(interceptor.cache_size(), 1);
    }

    #[tokio::test]
    async fn test_clear_during_delay_drops_mock_value() {
        let interceptor = MockInterceptor::new(true, Duration::from_millis(40), 0.0, Duration::from_secs(60));
        let key = "patients.get:p-1";

        let delayed = interceptor.intercept(key, || async { Ok(0) }, || 1, InterceptOptions::cached());
        let clear = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            interceptor.clear_cache(Some("patients"));
        };
        let (first, ()) = tokio::join!(delayed, clear);
        assert_eq!(first.unwrap(), 1);
        assert_eq!(interceptor.cache_size(), 0);

        let second = interceptor
            .intercept(key, || async { Ok(0) }, || 2, InterceptOptions::cached())
            .await
            .unwrap();
        assert_eq!(second, 2);
        assert_eq!(interceptor.cache_size(), 1);
    }
}
