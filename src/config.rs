use envconfig::Envconfig;
use std::net::SocketAddr;
use std::time::Duration;
use validator::Validate;

use crate::health::HealthThresholds;
use crate::scheduler::SchedulerConfig;

#[derive(Debug, Envconfig, Validate, Clone)]
pub struct Config {
    /// Server bind address
    #[envconfig(from = "BIND_ADDR", default = "127.0.0.1:5000")]
    pub bind_addr: SocketAddr,

    /// Credential list in `key:owner:limit[,...]` form
    #[envconfig(from = "API_KEYS")]
    pub api_keys: Option<String>,

    #[envconfig(from = "LOG_LEVEL", default = "info")]
    pub log_level: String,

    #[envconfig(from = "RATE_LIMIT_WINDOW_SECS", default = "60")]
    #[validate(range(min = 1))]
    pub rate_limit_window_secs: u64,

    /// How often idle rate-limit windows are dropped
    #[envconfig(from = "RATE_LIMIT_PURGE_SECS", default = "300")]
    #[validate(range(min = 1))]
    pub rate_limit_purge_secs: u64,

    #[envconfig(from = "ABUSE_THRESHOLD", default = "10")]
    #[validate(range(min = 1))]
    pub abuse_threshold: u32,

    #[envconfig(from = "MAX_CONCURRENT_TASKS", default = "3")]
    #[validate(range(min = 1, max = 64))]
    pub max_concurrent_tasks: usize,

    #[envconfig(from = "MAX_QUEUE_SIZE", default = "50")]
    #[validate(range(min = 1))]
    pub max_queue_size: usize,

    #[envconfig(from = "TASK_POLL_INTERVAL_MS", default = "100")]
    #[validate(range(min = 1, max = 10000))]
    pub task_poll_interval_ms: u64,

    #[envconfig(from = "TASK_RETENTION_SECS", default = "86400")]
    pub task_retention_secs: u64,

    #[envconfig(from = "SHUTDOWN_TIMEOUT_SECS", default = "5")]
    pub shutdown_timeout_secs: u64,

    #[envconfig(from = "MEMORY_LIMIT_MB", default = "512")]
    #[validate(range(min = 1.0))]
    pub memory_limit_mb: f64,

    #[envconfig(from = "MEMORY_WARNING_MB", default = "400")]
    #[validate(range(min = 0.0))]
    pub memory_warning_mb: f64,

    #[envconfig(from = "MEMORY_CRITICAL_MB", default = "480")]
    #[validate(range(min = 0.0))]
    pub memory_critical_mb: f64,

    #[envconfig(from = "CPU_WARNING_PERCENT", default = "80")]
    #[validate(range(min = 0.0, max = 100.0))]
    pub cpu_warning_percent: f64,

    #[envconfig(from = "DISK_MIN_FREE_GB", default = "0.1")]
    #[validate(range(min = 0.0))]
    pub disk_min_free_gb: f64,

    #[envconfig(from = "RESPONSE_TIME_WARNING_SECS", default = "10")]
    pub response_time_warning_secs: u64,

    #[envconfig(from = "ERROR_RATE_WARNING_PERCENT", default = "20")]
    #[validate(range(min = 0.0, max = 100.0))]
    pub error_rate_warning_percent: f64,

    /// Resource samples kept for trend analysis
    #[envconfig(from = "HISTORY_CAPACITY", default = "1000")]
    #[validate(range(min = 1))]
    pub history_capacity: usize,

    /// Most recent response times kept for latency stats
    #[envconfig(from = "RESPONSE_WINDOW", default = "100")]
    #[validate(range(min = 1))]
    pub response_window: usize,

    #[envconfig(from = "PROFILER_CAPACITY", default = "100")]
    #[validate(range(min = 1))]
    pub profiler_capacity: usize,

    #[envconfig(from = "HEALTH_SAMPLE_INTERVAL_SECS", default = "60")]
    #[validate(range(min = 1))]
    pub health_sample_interval_secs: u64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, envconfig::Error> {
        Config::init_from_env()
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }

    pub fn rate_limit_purge_interval(&self) -> Duration {
        Duration::from_secs(self.rate_limit_purge_secs)
    }

    pub fn task_retention(&self) -> Duration {
        Duration::from_secs(self.task_retention_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn health_sample_interval(&self) -> Duration {
        Duration::from_secs(self.health_sample_interval_secs)
    }

    pub fn scheduler(&self) -> SchedulerConfig {
        SchedulerConfig {
            max_concurrent: self.max_concurrent_tasks,
            max_queue_size: self.max_queue_size,
            poll_interval: Duration::from_millis(self.task_poll_interval_ms),
        }
    }

    pub fn health_thresholds(&self) -> HealthThresholds {
        HealthThresholds {
            memory_limit_mb: self.memory_limit_mb,
            memory_warning_mb: self.memory_warning_mb,
            memory_critical_mb: self.memory_critical_mb,
            cpu_warning_percent: self.cpu_warning_percent,
            disk_min_free_gb: self.disk_min_free_gb,
            response_time_warning: Duration::from_secs(self.response_time_warning_secs),
            error_rate_warning_percent: self.error_rate_warning_percent,
            ..HealthThresholds::default()
        }
    }
}
