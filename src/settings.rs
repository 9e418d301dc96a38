//! src/settings.rs
//!
//! Process-wide configuration: schema, YAML loading, and validation for the
//! scheduler core. Mirrors the shape in the specification's data model: a
//! `global` section, `loadbalancer` credentials, `scheduler` cadences, an
//! ordered `modes` list of algorithm configurations (first is active), and
//! a `pools` list.

use config::{Config, ConfigError as ConfigCrateError, File, FileFormat};
use serde::Deserialize;
use std::env;
use std::path::Path;

use crate::errors::ConfigError;

pub const DEFAULT_CONFIG_PATH: &str = "config/scheduler-config.yaml";

const SUPPORTED_MODES: &[&str] = &[
    "s1",
    "s1_enhanced",
    "s1_adaptive",
    "s1_ratio",
    "s1_precise",
    "s1_nonlinear",
    "s1_balanced",
    "s1_adaptive_distribution",
    "s1_advanced",
    "s1_dynamic_waiting",
    "s2",
    "s2_enhanced",
    "s2_nonlinear",
    "s2_adaptive",
    "s2_advanced",
    "s2_dynamic_waiting",
];

fn default_interval() -> u64 {
    60
}
fn default_log_level() -> String {
    "INFO".to_string()
}
fn default_api_port() -> u16 {
    8080
}
fn default_api_host() -> String {
    "0.0.0.0".to_string()
}
fn default_consecutive_failure_threshold() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct GlobalConfig {
    #[serde(default = "default_interval")]
    pub interval: u64,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_api_host")]
    pub api_host: String,
    #[serde(default = "default_api_port")]
    pub api_port: u16,
    #[serde(default = "default_consecutive_failure_threshold")]
    pub consecutive_failure_threshold: u32,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            log_level: default_log_level(),
            api_host: default_api_host(),
            api_port: default_api_port(),
            consecutive_failure_threshold: default_consecutive_failure_threshold(),
        }
    }
}

fn default_lb_port() -> u16 {
    443
}
fn default_lb_scheme() -> String {
    "https".to_string()
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LoadBalancerConfig {
    /// `https` in production (iControl REST terminates TLS); overridable for
    /// a TLS-terminating proxy in front of the load-balancer that speaks
    /// plain HTTP on the backend leg.
    #[serde(default = "default_lb_scheme")]
    pub scheme: String,
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_lb_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Name of an environment variable carrying the password, taking
    /// precedence over `password` when set and resolvable.
    #[serde(default)]
    pub password_env: Option<String>,
}

impl LoadBalancerConfig {
    fn resolve_env(&mut self) {
        if let Some(var) = &self.password_env {
            match env::var(var) {
                Ok(value) => self.password = value,
                Err(_) => {
                    tracing::warn!(env_var = %var, "password_env set but environment variable is unset");
                }
            }
        }
    }
}

fn default_pool_fetch_interval() -> u64 {
    10
}
fn default_metrics_fetch_interval() -> u64 {
    1000
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct SchedulerConfig {
    #[serde(default = "default_pool_fetch_interval")]
    pub pool_fetch_interval_s: u64,
    #[serde(default = "default_metrics_fetch_interval")]
    pub metrics_fetch_interval_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            pool_fetch_interval_s: default_pool_fetch_interval(),
            metrics_fetch_interval_ms: default_metrics_fetch_interval(),
        }
    }
}

fn default_mode_name() -> String {
    "s1".to_string()
}
fn default_weight() -> f64 {
    0.5
}
fn default_w_g() -> f64 {
    0.0
}
fn default_transition_point() -> f64 {
    30.0
}
fn default_steepness() -> f64 {
    1.0
}
fn default_power() -> f64 {
    2.0
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ModeConfig {
    #[serde(default = "default_mode_name")]
    pub name: String,
    #[serde(default = "default_weight")]
    pub w_a: f64,
    #[serde(default = "default_weight")]
    pub w_b: f64,
    #[serde(default = "default_w_g")]
    pub w_g: f64,
    #[serde(default = "default_transition_point")]
    pub transition_point: f64,
    #[serde(default = "default_steepness")]
    pub steepness: f64,
    #[serde(default = "default_power")]
    pub power: f64,
}

impl Default for ModeConfig {
    fn default() -> Self {
        Self {
            name: default_mode_name(),
            w_a: default_weight(),
            w_b: default_weight(),
            w_g: default_w_g(),
            transition_point: default_transition_point(),
            steepness: default_steepness(),
            power: default_power(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Default)]
pub struct FallbackConfig {
    #[serde(default)]
    pub pool_fallback: bool,
    #[serde(default)]
    pub member_running_req_threshold: Option<f64>,
    #[serde(default)]
    pub member_waiting_queue_threshold: Option<f64>,
}

fn default_schema() -> String {
    "http".to_string()
}
fn default_metrics_path() -> String {
    "/metrics".to_string()
}
fn default_metrics_timeout() -> u64 {
    3
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct MetricsConfig {
    #[serde(default = "default_schema")]
    pub schema: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default = "default_metrics_path")]
    pub path: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub password_env: Option<String>,
    #[serde(default = "default_metrics_timeout")]
    pub timeout_s: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            schema: default_schema(),
            port: None,
            path: default_metrics_path(),
            api_key: None,
            api_key_env: None,
            user: None,
            password: None,
            password_env: None,
            timeout_s: default_metrics_timeout(),
        }
    }
}

impl MetricsConfig {
    fn resolve_env(&mut self) {
        if let Some(var) = &self.api_key_env {
            match env::var(var) {
                Ok(value) => self.api_key = Some(value),
                Err(_) => tracing::warn!(env_var = %var, "api_key_env set but unresolved"),
            }
        }
        if let Some(var) = &self.password_env {
            match env::var(var) {
                Ok(value) => self.password = Some(value),
                Err(_) => tracing::warn!(env_var = %var, "password_env set but unresolved"),
            }
        }
    }
}

fn default_partition() -> String {
    "Common".to_string()
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct PoolConfig {
    pub name: String,
    #[serde(default = "default_partition")]
    pub partition: String,
    pub engine_type: String,
    #[serde(default)]
    pub fallback: FallbackConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub global: GlobalConfig,
    #[serde(default)]
    pub loadbalancer: LoadBalancerConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default = "default_modes")]
    pub modes: Vec<ModeConfig>,
    #[serde(default)]
    pub pools: Vec<PoolConfig>,
}

fn default_modes() -> Vec<ModeConfig> {
    vec![ModeConfig::default()]
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            global: GlobalConfig::default(),
            loadbalancer: LoadBalancerConfig {
                scheme: default_lb_scheme(),
                host: String::new(),
                port: default_lb_port(),
                username: "admin".to_string(),
                password: "admin".to_string(),
                password_env: None,
            },
            scheduler: SchedulerConfig::default(),
            modes: default_modes(),
            pools: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Load configuration from `path`, falling back to an in-memory default
    /// when the file does not exist (the default still fails validation,
    /// since it has an empty loadbalancer host and no pools).
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let mut raw: Self = if path.exists() {
            let source = Config::builder()
                .add_source(File::new(
                    path.to_str().ok_or_else(|| {
                        ConfigError::Invalid("config path is not valid UTF-8".into())
                    })?,
                    FileFormat::Yaml,
                ))
                .build()
                .map_err(config_err)?;
            source.try_deserialize().map_err(config_err)?
        } else {
            tracing::warn!(path = %path.display(), "configuration file not found, using defaults");
            Self::default()
        };

        raw.loadbalancer.resolve_env();
        for pool in &mut raw.pools {
            pool.metrics.resolve_env();
        }
        raw.normalize_modes();
        raw.validate()?;
        Ok(raw)
    }

    /// Validate against the mandatory checks from the specification's
    /// hot-reload section: non-empty loadbalancer host, at least one pool,
    /// strictly positive intervals.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.loadbalancer.host.is_empty() {
            return Err(ConfigError::Invalid("loadbalancer.host cannot be empty".into()));
        }
        if self.pools.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one pool configuration is required".into(),
            ));
        }
        if self.global.interval == 0 {
            return Err(ConfigError::Invalid("global.interval must be greater than 0".into()));
        }
        if self.scheduler.pool_fetch_interval_s == 0 {
            return Err(ConfigError::Invalid(
                "scheduler.pool_fetch_interval_s must be greater than 0".into(),
            ));
        }
        if self.scheduler.metrics_fetch_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "scheduler.metrics_fetch_interval_ms must be greater than 0".into(),
            ));
        }
        for pool in &self.pools {
            if pool.name.is_empty() {
                return Err(ConfigError::Invalid("pool name cannot be empty".into()));
            }
            if pool.engine_type.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "pool {} missing engine_type",
                    pool.name
                )));
            }
        }
        Ok(())
    }

    /// Unrecognised algorithm names fall back to `s1` with a warning; this
    /// happens at load time and is distinct from the score calculator's own
    /// defensive, fatal-for-this-sweep handling of an unsupported name that
    /// reaches it at runtime.
    fn normalize_modes(&mut self) {
        if self.modes.is_empty() {
            self.modes.push(ModeConfig::default());
        }
        for mode in &mut self.modes {
            if !SUPPORTED_MODES.contains(&mode.name.as_str()) {
                tracing::warn!(mode = %mode.name, "unrecognised algorithm name, falling back to s1");
                mode.name = "s1".to_string();
            }
        }
    }
}

fn config_err(e: ConfigCrateError) -> ConfigError {
    ConfigError::Invalid(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_fails_validation() {
        let cfg = AppConfig::default();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn unsupported_mode_falls_back_to_s1() {
        let mut cfg = AppConfig {
            modes: vec![ModeConfig {
                name: "bogus".to_string(),
                ..ModeConfig::default()
            }],
            ..AppConfig::default()
        };
        cfg.normalize_modes();
        assert_eq!(cfg.modes[0].name, "s1");
    }

    #[test]
    fn empty_modes_gets_default() {
        let mut cfg = AppConfig {
            modes: vec![],
            ..AppConfig::default()
        };
        cfg.normalize_modes();
        assert_eq!(cfg.modes.len(), 1);
        assert_eq!(cfg.modes[0].name, "s1");
    }
}
