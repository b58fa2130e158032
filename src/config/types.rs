use super::Duration;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub run_mode: Option<RunMode>,

    #[serde(default)]
    pub backend: BackendConfig,

    #[serde(default)]
    pub pool: PoolConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub mock: MockConfig,

    #[serde(default = "super::defaults::services")]
    pub services: Vec<ServiceConfig>,

    #[serde(default)]
    pub clinic: ClinicHours,

    #[serde(default)]
    pub admin: Option<AdminConfig>,

    #[serde(default)]
    pub metrics: Option<MetricsConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            run_mode: None,
            backend: BackendConfig::default(),
            pool: PoolConfig::default(),
            cache: CacheConfig::default(),
            mock: MockConfig::default(),
            services: super::defaults::services(),
            clinic: ClinicHours::default(),
            admin: None,
            metrics: None,
        }
    }
}

/// How the process was launched. Computed once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunMode {
    #[default]
    Normal,
    StaticBuild,
    Test,
}

impl RunMode {
    /// Static builds and tests never wait on artificial mock latency.
    pub fn allows_mock_delay(&self) -> bool {
        matches!(self, RunMode::Normal)
    }
}

impl FromStr for RunMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "normal" | "production" | "development" => Ok(RunMode::Normal),
            "static-build" | "static_build" | "build" => Ok(RunMode::StaticBuild),
            "test" => Ok(RunMode::Test),
            other => Err(format!("unknown run mode: {}", other)),
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RunMode::Normal => "normal",
            RunMode::StaticBuild => "static-build",
            RunMode::Test => "test",
        })
    }
}

/// Remote data backend (PostgREST-compatible REST API)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendConfig {
    /// Base URL, e.g. "https://project.example.co"
    #[serde(default)]
    pub url: Option<String>,

    /// API key sent as `apikey` and bearer token
    #[serde(default)]
    pub api_key: Option<String>,

    /// Name of the monitored service that represents this backend
    #[serde(default = "default_backend_service")]
    pub service: String,

    #[serde(default = "default_request_timeout")]
    pub request_timeout: Duration,
}

fn default_backend_service() -> String {
    "database".to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(10)
}

impl BackendConfig {
    pub fn is_configured(&self) -> bool {
        matches!((&self.url, &self.api_key), (Some(u), Some(k)) if !u.is_empty() && !k.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolConfig {
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_max_connections() -> usize {
    10
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    /// Total attempts including the first
    #[serde(default = "default_attempts")]
    pub attempts: u32,

    #[serde(default = "default_retry_delay")]
    pub delay: Duration,

    /// 1.0 keeps the delay fixed
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    #[serde(default = "default_max_delay")]
    pub max_delay: Duration,
}

fn default_attempts() -> u32 {
    3
}

fn default_retry_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_multiplier() -> f64 {
    1.0
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            delay: default_retry_delay(),
            multiplier: default_multiplier(),
            max_delay: default_max_delay(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheConfig {
    #[serde(default = "default_cache_ttl")]
    pub ttl: Duration,

    /// Shorter window for lists that change with every booking
    #[serde(default = "default_list_ttl")]
    pub list_ttl: Duration,
}

fn default_cache_ttl() -> Duration {
    Duration::from_secs(300)
}

fn default_list_ttl() -> Duration {
    Duration::from_secs(60)
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: default_cache_ttl(),
            list_ttl: default_list_ttl(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MockConfig {
    /// Serve synthetic data for every call
    #[serde(default)]
    pub force: bool,

    /// Artificial latency added to mock responses
    #[serde(default)]
    pub delay: Duration,

    /// Probability (0.0 - 1.0) that a mock call fails on purpose
    #[serde(default)]
    pub failure_rate: f64,

    #[serde(default = "default_mock_cache_ttl")]
    pub cache_ttl: Duration,
}

fn default_mock_cache_ttl() -> Duration {
    Duration::from_secs(60)
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            force: false,
            delay: Duration::ZERO,
            failure_rate: 0.0,
            cache_ttl: default_mock_cache_ttl(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Criticality {
    Critical,
    Important,
    Optional,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CheckMethod {
    #[default]
    Get,
    Head,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceConfig {
    pub name: String,

    pub display_name: String,

    /// Probe URL; `${VAR}` references are expanded from the environment
    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default)]
    pub method: CheckMethod,

    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Require this exact status instead of any 2xx
    #[serde(default)]
    pub expected_status: Option<u16>,

    #[serde(default = "default_check_timeout")]
    pub timeout: Duration,

    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    #[serde(default = "default_check_interval")]
    pub check_interval: Duration,

    pub criticality: Criticality,

    #[serde(default)]
    pub fallback_enabled: bool,

    #[serde(default)]
    pub has_mock_data: bool,

    /// Credentials that must be present before the endpoint is probed
    #[serde(default)]
    pub required_env: Vec<String>,
}

fn default_check_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_check_interval() -> Duration {
    Duration::from_secs(60)
}

impl ServiceConfig {
    pub fn new(name: impl Into<String>, display_name: impl Into<String>, criticality: Criticality) -> Self {
        Self {
            name: name.into(),
            display_name: display_name.into(),
            endpoint: None,
            method: CheckMethod::Get,
            headers: HashMap::new(),
            expected_status: None,
            timeout: default_check_timeout(),
            retry_attempts: default_retry_attempts(),
            check_interval: default_check_interval(),
            criticality,
            fallback_enabled: false,
            has_mock_data: false,
            required_env: Vec::new(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_fallback(mut self, has_mock_data: bool) -> Self {
        self.fallback_enabled = true;
        self.has_mock_data = has_mock_data;
        self
    }

    pub fn with_timing(mut self, timeout: Duration, interval: Duration) -> Self {
        self.timeout = timeout;
        self.check_interval = interval;
        self
    }

    pub fn requires(mut self, vars: &[&str]) -> Self {
        self.required_env = vars.iter().map(|v| v.to_string()).collect();
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// Opening hours used to lay out bookable slots
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClinicHours {
    #[serde(default = "default_open_hour")]
    pub open_hour: u32,

    #[serde(default = "default_close_hour")]
    pub close_hour: u32,

    #[serde(default = "default_slot_minutes")]
    pub slot_minutes: u32,
}

fn default_open_hour() -> u32 {
    9
}

fn default_close_hour() -> u32 {
    17
}

fn default_slot_minutes() -> u32 {
    30
}

impl Default for ClinicHours {
    fn default() -> Self {
        Self {
            open_hour: default_open_hour(),
            close_hour: default_close_hour(),
            slot_minutes: default_slot_minutes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    #[serde(default = "default_admin_address")]
    pub address: String,
}

fn default_admin_address() -> String {
    "127.0.0.1:8081".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_address")]
    pub address: String,
}

fn default_metrics_address() -> String {
    "0.0.0.0:9090".to_string()
}
