//! Resource sampling, bounded metrics history and health classification.
//!
//! The monitor never blocks the request path: `record_request` and
//! `record_error` take one short lock and drop the sample if the lock is
//! poisoned. Resource readings are taken outside the lock.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime};
use sysinfo::{Disks, Pid, System};

use crate::error::{GateError, Result};
use crate::history::RingBuffer;
use crate::unix_secs;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;
const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Samples per block when comparing recent memory against the preceding block.
const TREND_BLOCK: usize = 10;
/// Relative band inside which memory is considered stable.
const TREND_TOLERANCE: f64 = 0.10;
/// Number of most recent responses averaged for the latency alert.
const LATENCY_ALERT_WINDOW: usize = 10;

/// One reading of the resources the backend competes for.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub memory_used_mb: f64,
    pub cpu_percent: f64,
    pub disk_free_gb: f64,
    pub disk_total_gb: f64,
    pub pid: u32,
}

pub trait ResourceSampler: Send + Sync {
    fn sample(&self) -> Result<ResourceUsage>;
}

/// Reads the current process and root filesystem through `sysinfo`.
pub struct SysinfoSampler {
    system: Mutex<System>,
    disks: Mutex<Disks>,
    pid: Pid,
}

impl SysinfoSampler {
    pub fn new() -> Result<Self> {
        let pid = sysinfo::get_current_pid()
            .map_err(|e| GateError::Internal(format!("Cannot determine current pid: {}", e)))?;
        let mut system = System::new();
        system.refresh_process(pid);

        Ok(Self {
            system: Mutex::new(system),
            disks: Mutex::new(Disks::new_with_refreshed_list()),
            pid,
        })
    }
}

impl ResourceSampler for SysinfoSampler {
    fn sample(&self) -> Result<ResourceUsage> {
        let (memory_used_mb, cpu_percent) = {
            let mut system = self
                .system
                .lock()
                .map_err(|_| GateError::Internal("Failed to acquire sysinfo lock".to_string()))?;
            if !system.refresh_process(self.pid) {
                return Err(GateError::Internal("Current process not visible to sysinfo".to_string()));
            }
            let process = system
                .process(self.pid)
                .ok_or_else(|| GateError::Internal("Current process not visible to sysinfo".to_string()))?;
            (process.memory() as f64 / BYTES_PER_MB, process.cpu_usage() as f64)
        };

        let (disk_free_gb, disk_total_gb) = {
            let mut disks = self
                .disks
                .lock()
                .map_err(|_| GateError::Internal("Failed to acquire disk list lock".to_string()))?;
            disks.refresh();
            disks
                .list()
                .iter()
                .find(|d| d.mount_point() == Path::new("/"))
                .or_else(|| disks.list().first())
                .map(|d| {
                    (
                        d.available_space() as f64 / BYTES_PER_GB,
                        d.total_space() as f64 / BYTES_PER_GB,
                    )
                })
                .unwrap_or((0.0, 0.0))
        };

        Ok(ResourceUsage {
            memory_used_mb,
            cpu_percent,
            disk_free_gb,
            disk_total_gb,
            pid: self.pid.as_u32(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct HealthThresholds {
    pub memory_limit_mb: f64,
    pub memory_warning_mb: f64,
    pub memory_critical_mb: f64,
    pub cpu_warning_percent: f64,
    pub disk_min_free_gb: f64,
    pub response_time_warning: Duration,
    pub error_rate_warning_percent: f64,
    /// Error-rate alerts need more requests than this to fire.
    pub min_requests_for_error_rate: u64,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            memory_limit_mb: 512.0,
            memory_warning_mb: 400.0,
            memory_critical_mb: 480.0,
            cpu_warning_percent: 80.0,
            disk_min_free_gb: 0.1,
            response_time_warning: Duration::from_secs(10),
            error_rate_warning_percent: 20.0,
            min_requests_for_error_rate: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceStatus {
    Normal,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryTrend {
    Increasing,
    Decreasing,
    Stable,
    InsufficientData,
}

impl HealthThresholds {
    pub fn classify(&self, usage: &ResourceUsage) -> HealthStatus {
        let disk_low = usage.disk_total_gb > 0.0 && usage.disk_free_gb < self.disk_min_free_gb;

        if usage.memory_used_mb > self.memory_critical_mb {
            HealthStatus::Critical
        } else if usage.memory_used_mb > self.memory_warning_mb
            || usage.cpu_percent > self.cpu_warning_percent
            || disk_low
        {
            HealthStatus::Warning
        } else {
            HealthStatus::Healthy
        }
    }

    fn memory_status(&self, memory_mb: f64) -> ResourceStatus {
        if memory_mb > self.memory_critical_mb {
            ResourceStatus::Critical
        } else if memory_mb > self.memory_warning_mb {
            ResourceStatus::Warning
        } else {
            ResourceStatus::Normal
        }
    }

    fn cpu_status(&self, cpu_percent: f64) -> ResourceStatus {
        if cpu_percent > self.cpu_warning_percent {
            ResourceStatus::Warning
        } else {
            ResourceStatus::Normal
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricsSample {
    #[serde(serialize_with = "serialize_unix_secs")]
    pub timestamp: SystemTime,
    pub memory_used_mb: f64,
    pub cpu_percent: f64,
    pub disk_free_gb: f64,
}

fn serialize_unix_secs<S: serde::Serializer>(t: &SystemTime, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_u64(unix_secs(*t))
}

#[derive(Debug, Clone, Serialize)]
pub struct MemoryReport {
    pub used_mb: f64,
    pub limit_mb: f64,
    pub usage_percent: f64,
    pub status: ResourceStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct CpuReport {
    pub usage_percent: f64,
    pub status: ResourceStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiskReport {
    pub free_gb: f64,
    pub total_gb: f64,
    pub usage_percent: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub timestamp: u64,
    pub uptime_seconds: u64,
    pub uptime_human: String,
    pub version: String,
    pub memory: MemoryReport,
    pub cpu: CpuReport,
    pub disk: DiskReport,
    pub pid: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Warning,
    Critical,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertCategory {
    Memory,
    Performance,
    Errors,
    System,
}

#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub severity: AlertSeverity,
    pub category: AlertCategory,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RequestStats {
    pub total: u64,
    pub by_endpoint: BTreeMap<String, u64>,
    pub per_hour: f64,
    pub success_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorStats {
    pub total: u64,
    pub by_endpoint: BTreeMap<String, u64>,
    pub by_kind: BTreeMap<String, u64>,
    pub error_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResponseTimeStats {
    pub avg_seconds: f64,
    pub min_seconds: f64,
    pub max_seconds: f64,
    pub recent_requests: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct MemoryStats {
    pub avg_mb: f64,
    pub min_mb: f64,
    pub max_mb: f64,
    pub trend: MemoryTrend,
    pub data_points: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthStats {
    pub timestamp: u64,
    pub uptime_hours: f64,
    pub requests: RequestStats,
    pub errors: ErrorStats,
    pub performance: ResponseTimeStats,
    pub memory: MemoryStats,
    pub alerts: Vec<Alert>,
}

struct MonitorState {
    history: RingBuffer<MetricsSample>,
    response_times: RingBuffer<f64>,
    requests_by_endpoint: HashMap<String, u64>,
    failures_by_endpoint: HashMap<String, u64>,
    errors_by_kind: HashMap<(String, String), u64>,
    last_status: Option<HealthStatus>,
}

impl MonitorState {
    fn total_requests(&self) -> u64 {
        self.requests_by_endpoint.values().sum()
    }

    /// Failed requests. `errors_by_kind` is a breakdown of the same failures.
    fn total_errors(&self) -> u64 {
        self.failures_by_endpoint.values().sum()
    }
}

pub struct HealthMonitor {
    sampler: Arc<dyn ResourceSampler>,
    thresholds: HealthThresholds,
    state: Mutex<MonitorState>,
    started: Instant,
}

impl HealthMonitor {
    pub fn new(
        sampler: Arc<dyn ResourceSampler>,
        thresholds: HealthThresholds,
        history_capacity: usize,
        response_window: usize,
    ) -> Self {
        Self {
            sampler,
            thresholds,
            state: Mutex::new(MonitorState {
                history: RingBuffer::new(history_capacity),
                response_times: RingBuffer::new(response_window),
                requests_by_endpoint: HashMap::new(),
                failures_by_endpoint: HashMap::new(),
                errors_by_kind: HashMap::new(),
                last_status: None,
            }),
            started: Instant::now(),
        }
    }

    pub fn thresholds(&self) -> &HealthThresholds {
        &self.thresholds
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    /// Take a resource sample, append it to the history and report health.
    pub fn check(&self) -> Result<HealthReport> {
        let usage = self.sampler.sample().map_err(|e| {
            tracing::warn!(error = %e, "Resource sampling failed");
            e
        })?;
        let status = self.thresholds.classify(&usage);
        let now = SystemTime::now();

        match self.state.lock() {
            Ok(mut state) => {
                state.history.push(MetricsSample {
                    timestamp: now,
                    memory_used_mb: usage.memory_used_mb,
                    cpu_percent: usage.cpu_percent,
                    disk_free_gb: usage.disk_free_gb,
                });
                if state.last_status != Some(status) {
                    if status != HealthStatus::Healthy {
                        tracing::warn!(
                            status = ?status,
                            memory_mb = usage.memory_used_mb,
                            cpu_percent = usage.cpu_percent,
                            disk_free_gb = usage.disk_free_gb,
                            "Health status changed"
                        );
                    } else if state.last_status.is_some() {
                        tracing::info!("Health status recovered");
                    }
                    state.last_status = Some(status);
                }
            }
            Err(_) => tracing::warn!("Health monitor lock poisoned, sample not recorded"),
        }

        Ok(self.report(status, &usage, now))
    }

    fn report(&self, status: HealthStatus, usage: &ResourceUsage, now: SystemTime) -> HealthReport {
        let uptime = self.uptime();
        let limit = self.thresholds.memory_limit_mb;
        let disk_used_percent = if usage.disk_total_gb > 0.0 {
            round2((usage.disk_total_gb - usage.disk_free_gb) / usage.disk_total_gb * 100.0)
        } else {
            0.0
        };

        HealthReport {
            status,
            timestamp: unix_secs(now),
            uptime_seconds: uptime.as_secs(),
            uptime_human: humanize_uptime(uptime),
            version: env!("CARGO_PKG_VERSION").to_string(),
            memory: MemoryReport {
                used_mb: round2(usage.memory_used_mb),
                limit_mb: limit,
                usage_percent: if limit > 0.0 { round2(usage.memory_used_mb / limit * 100.0) } else { 0.0 },
                status: self.thresholds.memory_status(usage.memory_used_mb),
            },
            cpu: CpuReport {
                usage_percent: round2(usage.cpu_percent),
                status: self.thresholds.cpu_status(usage.cpu_percent),
            },
            disk: DiskReport {
                free_gb: round2(usage.disk_free_gb),
                total_gb: round2(usage.disk_total_gb),
                usage_percent: disk_used_percent,
            },
            pid: usage.pid,
        }
    }

    /// Status of the most recent sample, if any was taken.
    pub fn last_status(&self) -> Option<HealthStatus> {
        self.state.lock().ok().and_then(|s| s.last_status)
    }

    pub fn record_request(&self, endpoint: &str, duration: Duration, success: bool) {
        let Ok(mut state) = self.state.lock() else {
            tracing::warn!(endpoint = %endpoint, "Health monitor lock poisoned, request not recorded");
            return;
        };
        *state.requests_by_endpoint.entry(endpoint.to_string()).or_insert(0) += 1;
        state.response_times.push(duration.as_secs_f64());
        if !success {
            *state.failures_by_endpoint.entry(endpoint.to_string()).or_insert(0) += 1;
        }
    }

    pub fn record_error(&self, kind: &str, endpoint: &str) {
        let Ok(mut state) = self.state.lock() else {
            tracing::warn!(kind = %kind, endpoint = %endpoint, "Health monitor lock poisoned, error not recorded");
            return;
        };
        *state
            .errors_by_kind
            .entry((kind.to_string(), endpoint.to_string()))
            .or_insert(0) += 1;
    }

    pub fn stats(&self) -> Result<HealthStats> {
        let uptime_hours = self.uptime().as_secs_f64() / 3600.0;

        let (requests, errors, performance, memory) = {
            let state = self
                .state
                .lock()
                .map_err(|_| GateError::Internal("Failed to acquire health monitor lock".to_string()))?;

            let total_requests = state.total_requests();
            let total_errors = state.total_errors();

            let requests = RequestStats {
                total: total_requests,
                by_endpoint: state.requests_by_endpoint.iter().map(|(k, v)| (k.clone(), *v)).collect(),
                per_hour: if uptime_hours > 0.0 { round2(total_requests as f64 / uptime_hours) } else { 0.0 },
                success_rate: if total_requests > 0 {
                    round2((total_requests.saturating_sub(total_errors)) as f64 / total_requests as f64 * 100.0)
                } else {
                    100.0
                },
            };

            let errors = ErrorStats {
                total: total_errors,
                by_endpoint: state.failures_by_endpoint.iter().map(|(k, v)| (k.clone(), *v)).collect(),
                by_kind: state
                    .errors_by_kind
                    .iter()
                    .map(|((kind, endpoint), v)| (format!("{}:{}", kind, endpoint), *v))
                    .collect(),
                error_rate: error_rate(total_requests, total_errors),
            };

            let performance = ResponseTimeStats {
                avg_seconds: round3(state.response_times.mean().unwrap_or(0.0)),
                min_seconds: round3(state.response_times.min().unwrap_or(0.0)),
                max_seconds: round3(state.response_times.max().unwrap_or(0.0)),
                recent_requests: state.response_times.len(),
            };

            let memory_values: Vec<f64> = state.history.iter().map(|s| s.memory_used_mb).collect();
            (requests, errors, performance, memory_stats(&memory_values))
        };

        Ok(HealthStats {
            timestamp: unix_secs(SystemTime::now()),
            uptime_hours: round2(uptime_hours),
            requests,
            errors,
            performance,
            memory,
            alerts: self.alerts(),
        })
    }

    /// Active warning and critical conditions, recomputed on every call.
    pub fn alerts(&self) -> Vec<Alert> {
        let now = unix_secs(SystemTime::now());
        let mut alerts = Vec::new();

        match self.sampler.sample() {
            Ok(usage) => {
                let memory = usage.memory_used_mb;
                if memory > self.thresholds.memory_critical_mb {
                    alerts.push(Alert {
                        severity: AlertSeverity::Critical,
                        category: AlertCategory::Memory,
                        message: format!("Memory usage is critical: {:.1}MB", memory),
                        threshold: Some(self.thresholds.memory_critical_mb),
                        timestamp: now,
                    });
                } else if memory > self.thresholds.memory_warning_mb {
                    alerts.push(Alert {
                        severity: AlertSeverity::Warning,
                        category: AlertCategory::Memory,
                        message: format!("Memory usage is high: {:.1}MB", memory),
                        threshold: Some(self.thresholds.memory_warning_mb),
                        timestamp: now,
                    });
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Resource sampling failed while computing alerts");
                alerts.push(Alert {
                    severity: AlertSeverity::Error,
                    category: AlertCategory::System,
                    message: format!("Monitoring error: {}", e),
                    threshold: None,
                    timestamp: now,
                });
            }
        }

        let Ok(state) = self.state.lock() else {
            return alerts;
        };

        let recent: Vec<f64> = state.response_times.recent(LATENCY_ALERT_WINDOW).copied().collect();
        if !recent.is_empty() {
            let recent_avg = recent.iter().sum::<f64>() / recent.len() as f64;
            let limit = self.thresholds.response_time_warning.as_secs_f64();
            if recent_avg > limit {
                alerts.push(Alert {
                    severity: AlertSeverity::Warning,
                    category: AlertCategory::Performance,
                    message: format!("Response time is slow: {:.2}s", recent_avg),
                    threshold: Some(limit),
                    timestamp: now,
                });
            }
        }

        let total_requests = state.total_requests();
        if total_requests > self.thresholds.min_requests_for_error_rate {
            let rate = error_rate(total_requests, state.total_errors());
            if rate > self.thresholds.error_rate_warning_percent {
                alerts.push(Alert {
                    severity: AlertSeverity::Warning,
                    category: AlertCategory::Errors,
                    message: format!("Error rate is high: {:.1}%", rate),
                    threshold: Some(self.thresholds.error_rate_warning_percent),
                    timestamp: now,
                });
            }
        }

        alerts
    }

    /// Drop history samples at least `max_age` old. Returns how many were removed.
    pub fn cleanup(&self, max_age: Duration) -> usize {
        let now = SystemTime::now();
        let Ok(mut state) = self.state.lock() else {
            return 0;
        };
        let removed = state
            .history
            .prune_front(|sample| now.duration_since(sample.timestamp).unwrap_or_default() >= max_age);
        if removed > 0 {
            tracing::info!(removed, max_age_secs = max_age.as_secs(), "Pruned health history");
        }
        removed
    }

    pub fn history(&self) -> Vec<MetricsSample> {
        self.state
            .lock()
            .map(|s| s.history.iter().copied().collect())
            .unwrap_or_default()
    }
}

/// Compare the mean of the latest block of samples with the block before it.
///
/// With fewer than two full blocks the latest block is compared with the
/// mean of the whole series.
pub fn memory_trend(values: &[f64]) -> MemoryTrend {
    if values.len() < TREND_BLOCK {
        return MemoryTrend::InsufficientData;
    }

    let mean = |xs: &[f64]| xs.iter().sum::<f64>() / xs.len() as f64;
    let recent = mean(&values[values.len() - TREND_BLOCK..]);
    let baseline = if values.len() >= 2 * TREND_BLOCK {
        mean(&values[values.len() - 2 * TREND_BLOCK..values.len() - TREND_BLOCK])
    } else {
        mean(values)
    };

    if recent > baseline * (1.0 + TREND_TOLERANCE) {
        MemoryTrend::Increasing
    } else if recent < baseline * (1.0 - TREND_TOLERANCE) {
        MemoryTrend::Decreasing
    } else {
        MemoryTrend::Stable
    }
}

fn memory_stats(values: &[f64]) -> MemoryStats {
    if values.is_empty() {
        return MemoryStats {
            avg_mb: 0.0,
            min_mb: 0.0,
            max_mb: 0.0,
            trend: MemoryTrend::InsufficientData,
            data_points: 0,
        };
    }

    MemoryStats {
        avg_mb: round2(values.iter().sum::<f64>() / values.len() as f64),
        min_mb: round2(values.iter().copied().fold(f64::INFINITY, f64::min)),
        max_mb: round2(values.iter().copied().fold(f64::NEG_INFINITY, f64::max)),
        trend: memory_trend(values),
        data_points: values.len(),
    }
}

fn error_rate(total_requests: u64, total_errors: u64) -> f64 {
    if total_requests > 0 {
        round2(total_errors as f64 / total_requests as f64 * 100.0)
    } else {
        0.0
    }
}

fn humanize_uptime(uptime: Duration) -> String {
    let secs = uptime.as_secs();
    let (days, rem) = (secs / 86_400, secs % 86_400);
    let clock = format!("{}:{:02}:{:02}", rem / 3600, (rem % 3600) / 60, rem % 60);
    match days {
        0 => clock,
        1 => format!("1 day, {}", clock),
        n => format!("{} days, {}", n, clock),
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Sampler returning whatever reading the test sets.
    pub(crate) struct FixedSampler {
        usage: Mutex<Option<ResourceUsage>>,
    }

    impl FixedSampler {
        pub(crate) fn new(memory_used_mb: f64, cpu_percent: f64, disk_free_gb: f64) -> Self {
            Self {
                usage: Mutex::new(Some(ResourceUsage {
                    memory_used_mb,
                    cpu_percent,
                    disk_free_gb,
                    disk_total_gb: 100.0,
                    pid: 42,
                })),
            }
        }

        pub(crate) fn failing() -> Self {
            Self { usage: Mutex::new(None) }
        }

        pub(crate) fn set_memory(&self, memory_used_mb: f64) {
            if let Some(usage) = self.usage.lock().unwrap().as_mut() {
                usage.memory_used_mb = memory_used_mb;
            }
        }
    }

    impl ResourceSampler for FixedSampler {
        fn sample(&self) -> Result<ResourceUsage> {
            (*self.usage.lock().unwrap()).ok_or_else(|| GateError::Internal("sampler offline".to_string()))
        }
    }

    fn monitor_with(sampler: Arc<FixedSampler>) -> HealthMonitor {
        HealthMonitor::new(sampler, HealthThresholds::default(), 1000, 100)
    }

    #[test]
    fn test_classification() {
        let t = HealthThresholds::default();
        let usage = |memory_used_mb, cpu_percent, disk_free_gb| ResourceUsage {
            memory_used_mb,
            cpu_percent,
            disk_free_gb,
            disk_total_gb: 50.0,
            pid: 1,
        };

        assert_eq!(t.classify(&usage(100.0, 10.0, 20.0)), HealthStatus::Healthy);
        assert_eq!(t.classify(&usage(450.0, 10.0, 20.0)), HealthStatus::Warning);
        assert_eq!(t.classify(&usage(500.0, 10.0, 20.0)), HealthStatus::Critical);
        assert_eq!(t.classify(&usage(100.0, 95.0, 20.0)), HealthStatus::Warning);
        assert_eq!(t.classify(&usage(100.0, 10.0, 0.05)), HealthStatus::Warning);
        // cpu and disk never escalate past warning
        assert_eq!(t.classify(&usage(100.0, 100.0, 0.0)), HealthStatus::Warning);
    }

    #[test]
    fn test_check_appends_history_and_reports() {
        let sampler = Arc::new(FixedSampler::new(256.0, 12.5, 40.0));
        let monitor = monitor_with(sampler);

        let report = monitor.check().unwrap();
        assert_eq!(report.status, HealthStatus::Healthy);
        assert_eq!(report.memory.usage_percent, 50.0);
        assert_eq!(report.memory.status, ResourceStatus::Normal);
        assert_eq!(report.disk.usage_percent, 60.0);
        assert_eq!(report.pid, 42);
        assert_eq!(monitor.history().len(), 1);
        assert_eq!(monitor.last_status(), Some(HealthStatus::Healthy));
    }

    #[test]
    fn test_history_is_bounded() {
        let sampler = Arc::new(FixedSampler::new(100.0, 1.0, 10.0));
        let monitor = HealthMonitor::new(sampler, HealthThresholds::default(), 5, 100);
        for _ in 0..50 {
            monitor.check().unwrap();
        }
        assert_eq!(monitor.history().len(), 5);
    }

    #[test]
    fn test_sampling_failure_is_reported() {
        let monitor = monitor_with(Arc::new(FixedSampler::failing()));
        assert!(monitor.check().is_err());

        let alerts = monitor.alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].category, AlertCategory::System);
        assert_eq!(alerts[0].severity, AlertSeverity::Error);
    }

    #[test]
    fn test_request_stats() {
        let monitor = monitor_with(Arc::new(FixedSampler::new(100.0, 1.0, 10.0)));
        monitor.record_request("/api/generate", Duration::from_millis(200), true);
        monitor.record_request("/api/generate", Duration::from_millis(400), false);
        monitor.record_request("/health", Duration::from_millis(100), true);
        monitor.record_error("timeout", "/api/generate");

        let stats = monitor.stats().unwrap();
        assert_eq!(stats.requests.total, 3);
        assert_eq!(stats.requests.by_endpoint["/api/generate"], 2);
        assert_eq!(stats.errors.total, 1);
        assert_eq!(stats.errors.by_kind["timeout:/api/generate"], 1);
        assert_eq!(stats.errors.error_rate, 33.33);
        assert_eq!(stats.requests.success_rate, 66.67);
        assert_eq!(stats.performance.recent_requests, 3);
        assert_eq!(stats.performance.max_seconds, 0.4);
        assert_eq!(stats.performance.min_seconds, 0.1);
        assert_eq!(stats.memory.trend, MemoryTrend::InsufficientData);
    }

    #[test]
    fn test_memory_trend() {
        assert_eq!(memory_trend(&[100.0; 5]), MemoryTrend::InsufficientData);
        assert_eq!(memory_trend(&[100.0; 20]), MemoryTrend::Stable);

        let mut rising = vec![100.0; 10];
        rising.extend(vec![120.0; 10]);
        assert_eq!(memory_trend(&rising), MemoryTrend::Increasing);

        let mut falling = vec![200.0; 10];
        falling.extend(vec![150.0; 10]);
        assert_eq!(memory_trend(&falling), MemoryTrend::Decreasing);

        // Within the 10% band.
        let mut drifting = vec![100.0; 10];
        drifting.extend(vec![109.0; 10]);
        assert_eq!(memory_trend(&drifting), MemoryTrend::Stable);
    }

    #[test]
    fn test_trend_from_samples() {
        let sampler = Arc::new(FixedSampler::new(100.0, 1.0, 10.0));
        let monitor = monitor_with(Arc::clone(&sampler));
        for _ in 0..10 {
            monitor.check().unwrap();
        }
        sampler.set_memory(150.0);
        for _ in 0..10 {
            monitor.check().unwrap();
        }
        let stats = monitor.stats().unwrap();
        assert_eq!(stats.memory.trend, MemoryTrend::Increasing);
        assert_eq!(stats.memory.data_points, 20);
        assert_eq!(stats.memory.max_mb, 150.0);
    }

    #[test]
    fn test_alerts() {
        let sampler = Arc::new(FixedSampler::new(490.0, 1.0, 10.0));
        let monitor = monitor_with(Arc::clone(&sampler));

        let alerts = monitor.alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, AlertSeverity::Critical);

        sampler.set_memory(410.0);
        monitor.record_request("/slow", Duration::from_secs(30), true);
        let alerts = monitor.alerts();
        assert!(alerts
            .iter()
            .any(|a| a.category == AlertCategory::Memory && a.severity == AlertSeverity::Warning));
        assert!(alerts.iter().any(|a| a.category == AlertCategory::Performance));

        sampler.set_memory(100.0);
        let fresh = monitor_with(Arc::clone(&sampler));
        for i in 0..12 {
            fresh.record_request("/api", Duration::from_millis(10), i % 2 == 0);
        }
        let alerts = fresh.alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].category, AlertCategory::Errors);
    }

    #[test]
    fn test_error_kinds_do_not_inflate_error_rate() {
        let monitor = monitor_with(Arc::new(FixedSampler::new(100.0, 1.0, 10.0)));
        for i in 0..12 {
            let success = i >= 2;
            monitor.record_request("/api/queue", Duration::from_millis(5), success);
            if !success {
                monitor.record_error("unknown_credential", "/api/queue");
            }
        }

        let stats = monitor.stats().unwrap();
        assert_eq!(stats.errors.total, 2);
        assert_eq!(stats.errors.error_rate, 16.67);
        assert_eq!(stats.requests.success_rate, 83.33);
        // 16.7% stays under the 20% warning threshold.
        assert!(monitor.alerts().is_empty());
    }

    #[test]
    fn test_cleanup_prunes_old_samples_only() {
        let monitor = monitor_with(Arc::new(FixedSampler::new(100.0, 1.0, 10.0)));
        for _ in 0..3 {
            monitor.check().unwrap();
        }
        assert_eq!(monitor.cleanup(Duration::from_secs(3600)), 0);
        assert_eq!(monitor.history().len(), 3);

        std::thread::sleep(Duration::from_millis(300));
        for _ in 0..2 {
            monitor.check().unwrap();
        }

        // Threshold falls between the two batches.
        assert_eq!(monitor.cleanup(Duration::from_millis(150)), 3);
        assert_eq!(monitor.history().len(), 2);

        assert_eq!(monitor.cleanup(Duration::ZERO), 2);
        assert!(monitor.history().is_empty());
    }

    #[test]
    fn test_humanize_uptime() {
        assert_eq!(humanize_uptime(Duration::from_secs(3_725)), "1:02:05");
        assert_eq!(humanize_uptime(Duration::from_secs(90_061)), "1 day, 1:01:01");
    }
}
