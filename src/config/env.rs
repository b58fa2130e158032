use super::{Config, Duration, RunMode};
use regex::Regex;
use std::sync::LazyLock;
use tracing::{info, warn};

pub const RUN_MODE: &str = "CLINIC_RUN_MODE";
pub const FORCE_MOCK: &str = "CLINIC_FORCE_MOCK";
pub const MOCK_DELAY: &str = "CLINIC_MOCK_DELAY";
pub const MOCK_FAILURE_RATE: &str = "CLINIC_MOCK_FAILURE_RATE";
pub const BACKEND_URL: &str = "CLINIC_BACKEND_URL";
pub const BACKEND_KEY: &str = "CLINIC_BACKEND_KEY";

static VAR_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("static regex"));

/// Reads process environment variables, ignoring empty values.
pub fn process_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn truthy(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

/// Work out the run mode once: explicit setting first, then build markers.
pub fn detect_run_mode(lookup: &dyn Fn(&str) -> Option<String>) -> RunMode {
    if let Some(raw) = lookup(RUN_MODE) {
        match raw.parse() {
            Ok(mode) => return mode,
            Err(e) => warn!("Ignoring {}: {}", RUN_MODE, e),
        }
    }
    if lookup("STATIC_BUILD").is_some_and(|v| truthy(&v)) || lookup("CI").is_some_and(|v| truthy(&v)) {
        return RunMode::StaticBuild;
    }
    RunMode::Normal
}

/// Expand `${VAR}` references. Returns `None` if any reference is unset.
pub fn expand(template: &str, lookup: &dyn Fn(&str) -> Option<String>) -> Option<String> {
    let mut missing = false;
    let expanded = VAR_REF.replace_all(template, |caps: &regex::Captures<'_>| match lookup(&caps[1]) {
        Some(value) => value,
        None => {
            missing = true;
            String::new()
        }
    });
    if missing { None } else { Some(expanded.into_owned()) }
}

impl Config {
    /// Overlay environment settings and resolve service endpoints.
    pub fn apply_env(&mut self, lookup: &dyn Fn(&str) -> Option<String>) {
        let detected = detect_run_mode(lookup);
        if self.run_mode.is_none() || lookup(RUN_MODE).is_some() || detected != RunMode::Normal {
            self.run_mode = Some(detected);
        }

        if let Some(v) = lookup(FORCE_MOCK) {
            self.mock.force = truthy(&v);
        }
        if let Some(v) = lookup(MOCK_DELAY) {
            match v.parse::<Duration>() {
                Ok(d) => self.mock.delay = d,
                Err(e) => warn!("Ignoring {}: {}", MOCK_DELAY, e),
            }
        }
        if let Some(v) = lookup(MOCK_FAILURE_RATE) {
            match v.trim().parse::<f64>() {
                Ok(rate) => self.mock.failure_rate = rate.clamp(0.0, 1.0),
                Err(_) => warn!("Ignoring {}: not a number: {}", MOCK_FAILURE_RATE, v),
            }
        }
        if let Some(url) = lookup(BACKEND_URL) {
            self.backend.url = Some(url.trim_end_matches('/').to_string());
        }
        if let Some(key) = lookup(BACKEND_KEY) {
            self.backend.api_key = Some(key);
        }

        for service in &mut self.services {
            let missing: Vec<&str> = service
                .required_env
                .iter()
                .filter(|var| lookup(var).is_none())
                .map(String::as_str)
                .collect();

            if !missing.is_empty() {
                if service.endpoint.take().is_some() {
                    info!(
                        "Health check for '{}' disabled, missing: {}",
                        service.name,
                        missing.join(", ")
                    );
                }
                service.headers.clear();
                continue;
            }

            if let Some(template) = service.endpoint.take() {
                service.endpoint = expand(&template, lookup);
                if service.endpoint.is_none() {
                    warn!("Health check for '{}' disabled, unresolved variables in endpoint", service.name);
                }
            }
            service.headers = std::mem::take(&mut service.headers)
                .into_iter()
                .filter_map(|(name, value)| expand(&value, lookup).map(|v| (name, v)))
                .collect();
        }
    }

    pub fn run_mode(&self) -> RunMode {
        self.run_mode.unwrap_or_default()
    }

    /// Mock mode is forced explicitly or implied by a static build.
    pub fn mock_enabled(&self) -> bool {
        self.mock.force || self.run_mode() == RunMode::StaticBuild
    }

    pub fn mock_delay(&self) -> Duration {
        if self.run_mode().allows_mock_delay() {
            self.mock.delay
        } else {
            Duration::ZERO
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_run_mode_detection() {
        assert_eq!(detect_run_mode(&env(&[])), RunMode::Normal);
        assert_eq!(detect_run_mode(&env(&[("CI", "true")])), RunMode::StaticBuild);
        assert_eq!(detect_run_mode(&env(&[(RUN_MODE, "test"), ("CI", "1")])), RunMode::Test);
    }

    #[test]
    fn test_expand() {
        let lookup = env(&[("HOST", "api.example.com")]);
        assert_eq!(
            expand("https://${HOST}/health", &lookup).as_deref(),
            Some("https://api.example.com/health")
        );
        assert_eq!(expand("https://${NOPE}/health", &lookup), None);
        assert_eq!(expand("plain", &lookup).as_deref(), Some("plain"));
    }

    #[test]
    fn test_missing_credentials_disable_probe() {
        let mut config = Config::default();
        config.apply_env(&env(&[]));

        let db = config.services.iter().find(|s| s.name == "database").unwrap();
        assert!(db.endpoint.is_none());
        assert!(db.headers.is_empty());
        assert!(!config.backend.is_configured());
    }

    #[test]
    fn test_credentials_enable_probe_and_backend() {
        let mut config = Config::default();
        config.apply_env(&env(&[
            (BACKEND_URL, "https://db.example.com"),
            (BACKEND_KEY, "secret"),
        ]));

        let db = config.services.iter().find(|s| s.name == "database").unwrap();
        assert_eq!(db.endpoint.as_deref(), Some("https://db.example.com/rest/v1/"));
        assert_eq!(db.headers.get("apikey").map(String::as_str), Some("secret"));
        assert!(config.backend.is_configured());
        assert_eq!(config.backend.url.as_deref(), Some("https://db.example.com"));
    }

    #[test]
    fn test_mock_settings() {
        let mut config = Config::default();
        config.apply_env(&env(&[
            (FORCE_MOCK, "yes"),
            (MOCK_DELAY, "150ms"),
            (MOCK_FAILURE_RATE, "2.5"),
        ]));
        assert!(config.mock_enabled());
        assert_eq!(config.mock_delay(), Duration::from_millis(150));
        assert_eq!(config.mock.failure_rate, 1.0);

        let mut build = Config::default();
        build.apply_env(&env(&[("STATIC_BUILD", "1"), (MOCK_DELAY, "1s")]));
        assert!(build.mock_enabled());
        assert_eq!(build.mock_delay(), Duration::ZERO);
    }
}
