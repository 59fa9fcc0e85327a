use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::time::SystemTime;

use crate::credentials::KeyStats;
use crate::health::{Alert, HealthStats};
use crate::profiler::OperationStats;
use crate::scheduler::{QueueStats, TaskId, TaskStatus};
use crate::unix_secs;

#[derive(Debug, Serialize)]
pub struct TaskAccepted {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub message: String,
}

impl TaskAccepted {
    pub fn queued(task_id: TaskId) -> Self {
        Self {
            task_id,
            status: TaskStatus::Pending,
            message: format!("Task queued, poll /api/tasks/{} for the result", task_id),
        }
    }
}

/// Generic acknowledgement for state-changing endpoints.
#[derive(Debug, Serialize)]
pub struct ActionResponse {
    pub success: bool,
    pub message: String,
    pub timestamp: u64,
}

impl ActionResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            timestamp: unix_secs(SystemTime::now()),
        }
    }

    pub fn noop(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            timestamp: unix_secs(SystemTime::now()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct KeyIssued {
    pub api_key: String,
    pub owner: String,
    pub rate_limit: u32,
    pub scopes: BTreeSet<String>,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct KeyList {
    pub keys: Vec<KeyStats>,
    pub count: usize,
}

impl KeyList {
    pub fn new(keys: Vec<KeyStats>) -> Self {
        Self {
            count: keys.len(),
            keys,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AlertsResponse {
    pub alerts: Vec<Alert>,
    pub count: usize,
    pub timestamp: u64,
}

impl AlertsResponse {
    pub fn new(alerts: Vec<Alert>) -> Self {
        Self {
            count: alerts.len(),
            alerts,
            timestamp: unix_secs(SystemTime::now()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub health: HealthStats,
    pub queue: QueueStats,
    pub tracked_rate_limit_keys: usize,
}

#[derive(Debug, Serialize)]
pub struct ProfileResponse {
    pub operations: BTreeMap<String, OperationStats>,
    pub count: usize,
    pub timestamp: u64,
}

impl ProfileResponse {
    pub fn new(operations: BTreeMap<String, OperationStats>) -> Self {
        Self {
            count: operations.len(),
            operations,
            timestamp: unix_secs(SystemTime::now()),
        }
    }
}
