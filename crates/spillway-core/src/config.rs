//! spillway.toml configuration parser.
//!
//! Every section and field has a default, so an empty file is a valid
//! (if not very useful) config. Durations are written as strings such as
//! `"500ms"`, `"10s"` or `"5m"`.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SpillwayConfig {
    pub server: ServerConfig,
    pub dispatch: DispatchConfig,
    pub estimator: EstimatorConfig,
    pub policy: PolicyConfig,
    pub autoscale: AutoscaleConfig,
    pub monitor: MonitorConfig,
    pub fleet: FleetConfig,
    pub overflow: OverflowConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    pub admin_listen: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 8000)),
            admin_listen: SocketAddr::from(([127, 0, 0, 1], 9000)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Total attempts per request, first try included.
    pub max_attempts: u32,
    pub forward_timeout: String,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            forward_timeout: "30s".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimatorKind {
    Online,
    Fixed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    pub kind: EstimatorKind,
    /// Estimate returned for signatures never seen before.
    pub default_cost_ms: f64,
    /// Samples after which a bucket switches from a plain mean to an
    /// exponentially weighted one.
    pub window: u64,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            kind: EstimatorKind::Online,
            default_cost_ms: 1000.0,
            window: 50,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    Prediction,
    OverflowOnly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub kind: PolicyKind,
    /// Load score at or above which a worker is not a candidate.
    pub saturation_threshold: f64,
    pub in_flight_weight: f64,
    pub cost_weight: f64,
    pub cpu_weight: f64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            kind: PolicyKind::Prediction,
            saturation_threshold: 30_000.0,
            in_flight_weight: 100.0,
            cost_weight: 1.0,
            cpu_weight: 50.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoscaleConfig {
    pub interval: String,
    pub lower_cpu: f64,
    pub upper_cpu: f64,
    /// Scale-in is held while any worker has more in-flight jobs than this.
    pub busy_in_flight: usize,
    pub scale_out_cooldown: String,
    pub scale_in_cooldown: String,
    pub min_workers: u32,
    pub max_workers: u32,
}

impl Default for AutoscaleConfig {
    fn default() -> Self {
        Self {
            interval: "10s".to_string(),
            lower_cpu: 25.0,
            upper_cpu: 75.0,
            busy_in_flight: 2,
            scale_out_cooldown: "60s".to_string(),
            scale_in_cooldown: "600s".to_string(),
            min_workers: 1,
            max_workers: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub query_interval: String,
    /// Trailing window the CPU source averages over.
    pub cpu_window: String,
    pub stats_path: String,
    pub cpu_path: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            query_interval: "10s".to_string(),
            cpu_window: "20m".to_string(),
            stats_path: "/stats".to_string(),
            cpu_path: "/cpu".to_string(),
        }
    }
}

/// A pre-provisioned worker endpoint the standby registry can activate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerSlot {
    pub address: String,
    #[serde(default = "default_worker_port")]
    pub port: u16,
}

fn default_worker_port() -> u16 {
    8000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    /// Slots activated at startup.
    pub initial: u32,
    pub workers: Vec<WorkerSlot>,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            initial: 0,
            workers: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OverflowConfig {
    /// Base URL of the function gateway. `None` disables overflow.
    pub endpoint: Option<String>,
    pub timeout: String,
}

impl Default for OverflowConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout: "30s".to_string(),
        }
    }
}

impl SpillwayConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: SpillwayConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check cross-field constraints and that every duration parses.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dispatch.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "dispatch.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.estimator.window == 0 {
            return Err(ConfigError::Invalid(
                "estimator.window must be at least 1".to_string(),
            ));
        }
        if !(0.0..=100.0).contains(&self.autoscale.lower_cpu)
            || !(0.0..=100.0).contains(&self.autoscale.upper_cpu)
            || self.autoscale.lower_cpu >= self.autoscale.upper_cpu
        {
            return Err(ConfigError::Invalid(format!(
                "autoscale thresholds must satisfy 0 <= lower ({}) < upper ({}) <= 100",
                self.autoscale.lower_cpu, self.autoscale.upper_cpu
            )));
        }
        if self.autoscale.min_workers > self.autoscale.max_workers {
            return Err(ConfigError::Invalid(format!(
                "autoscale.min_workers ({}) exceeds max_workers ({})",
                self.autoscale.min_workers, self.autoscale.max_workers
            )));
        }
        if self.fleet.initial as usize > self.fleet.workers.len() {
            return Err(ConfigError::Invalid(format!(
                "fleet.initial ({}) exceeds the {} configured worker slots",
                self.fleet.initial,
                self.fleet.workers.len()
            )));
        }

        self.forward_timeout()?;
        self.autoscale_interval()?;
        self.scale_out_cooldown()?;
        self.scale_in_cooldown()?;
        self.query_interval()?;
        self.cpu_window()?;
        self.overflow_timeout()?;
        Ok(())
    }

    pub fn forward_timeout(&self) -> Result<Duration, ConfigError> {
        duration_field("dispatch.forward_timeout", &self.dispatch.forward_timeout)
    }

    pub fn autoscale_interval(&self) -> Result<Duration, ConfigError> {
        duration_field("autoscale.interval", &self.autoscale.interval)
    }

    pub fn scale_out_cooldown(&self) -> Result<Duration, ConfigError> {
        duration_field("autoscale.scale_out_cooldown", &self.autoscale.scale_out_cooldown)
    }

    pub fn scale_in_cooldown(&self) -> Result<Duration, ConfigError> {
        duration_field("autoscale.scale_in_cooldown", &self.autoscale.scale_in_cooldown)
    }

    pub fn query_interval(&self) -> Result<Duration, ConfigError> {
        duration_field("monitor.query_interval", &self.monitor.query_interval)
    }

    pub fn cpu_window(&self) -> Result<Duration, ConfigError> {
        duration_field("monitor.cpu_window", &self.monitor.cpu_window)
    }

    pub fn overflow_timeout(&self) -> Result<Duration, ConfigError> {
        duration_field("overflow.timeout", &self.overflow.timeout)
    }
}

fn duration_field(field: &'static str, value: &str) -> Result<Duration, ConfigError> {
    parse_duration(value).ok_or_else(|| ConfigError::Duration {
        field,
        value: value.to_string(),
    })
}

/// Parse a duration string like "5s", "500ms", "1m". A bare number is seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>().ok().map(|m| Duration::from_secs(m * 60))
    } else if let Some(hours) = s.strip_suffix('h') {
        hours.parse::<u64>().ok().map(|h| Duration::from_secs(h * 3600))
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}
