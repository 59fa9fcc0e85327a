//! Bounded task queue with a capped pool of concurrent executions.
//!
//! Tasks live in an arena keyed by id; callers only ever hold ids. A
//! dispatch loop moves tasks from the waiting queue into the active set
//! while the concurrency cap allows it and hands each one to a blocking
//! worker thread. The loop is woken by submissions and completions, and
//! falls back to a short poll interval.

use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::{GateError, Result};
use crate::profiler::PerformanceProfiler;
use crate::unix_millis;

pub type TaskId = Uuid;

/// One backend invocation. Receives the task payload and returns its result.
pub type TaskJob = Box<dyn FnOnce(Value) -> Result<Value> + Send + 'static>;

pub const DEFAULT_PRIORITY: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled)
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub max_concurrent: usize,
    pub max_queue_size: usize,
    pub poll_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            max_queue_size: 50,
            poll_interval: Duration::from_millis(100),
        }
    }
}

struct TaskRecord {
    id: TaskId,
    endpoint: String,
    payload: Value,
    priority: u8,
    status: TaskStatus,
    created_at: SystemTime,
    started_at: Option<SystemTime>,
    completed_at: Option<SystemTime>,
    result: Option<Value>,
    error: Option<String>,
    job: Option<TaskJob>,
}

/// Point-in-time view of a task. `result` and `error` are only filled once
/// the task has completed or failed.
#[derive(Debug, Clone, Serialize)]
pub struct TaskSnapshot {
    pub task_id: TaskId,
    pub endpoint: String,
    pub status: TaskStatus,
    pub priority: u8,
    pub created_at_ms: u64,
    pub started_at_ms: Option<u64>,
    pub completed_at_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&TaskRecord> for TaskSnapshot {
    fn from(task: &TaskRecord) -> Self {
        Self {
            task_id: task.id,
            endpoint: task.endpoint.clone(),
            status: task.status,
            priority: task.priority,
            created_at_ms: unix_millis(task.created_at),
            started_at_ms: task.started_at.map(unix_millis),
            completed_at_ms: task.completed_at.map(unix_millis),
            result: match task.status {
                TaskStatus::Completed => task.result.clone(),
                _ => None,
            },
            error: match task.status {
                TaskStatus::Failed => task.error.clone(),
                _ => None,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub active_tasks: usize,
    pub waiting_tasks: usize,
    pub max_concurrent: usize,
    pub max_queue_size: usize,
    pub total_processed: u64,
    pub total_failed: u64,
    pub total_cancelled: u64,
    /// Mean execution time of completed tasks, in seconds.
    pub average_processing_time: f64,
    pub queue_utilization: f64,
}

#[derive(Default)]
struct SchedulerState {
    tasks: HashMap<TaskId, TaskRecord>,
    waiting: VecDeque<(TaskId, u8)>,
    active: usize,
    total_processed: u64,
    total_failed: u64,
    total_cancelled: u64,
    average_processing_secs: f64,
}

impl SchedulerState {
    /// Position of the first waiting task with the highest priority.
    fn next_waiting(&self) -> Option<usize> {
        let mut best: Option<(usize, u8)> = None;
        for (idx, &(_, priority)) in self.waiting.iter().enumerate() {
            if best.map_or(true, |(_, p)| priority > p) {
                best = Some((idx, priority));
            }
        }
        best.map(|(idx, _)| idx)
    }
}

struct Dispatch {
    id: TaskId,
    endpoint: String,
    payload: Value,
    job: TaskJob,
}

struct Shared {
    state: Mutex<SchedulerState>,
    wake: Notify,
    config: SchedulerConfig,
    profiler: Option<Arc<PerformanceProfiler>>,
}

impl Shared {
    fn lock(&self) -> Result<MutexGuard<'_, SchedulerState>> {
        self.state
            .lock()
            .map_err(|_| GateError::Internal("Failed to acquire scheduler lock".to_string()))
    }

    /// Move as many waiting tasks into the active set as the cap allows.
    fn take_ready(&self) -> Vec<Dispatch> {
        let Ok(mut state) = self.lock() else {
            tracing::error!("Scheduler lock poisoned, dispatch skipped");
            return Vec::new();
        };

        let mut ready = Vec::new();
        while state.active < self.config.max_concurrent {
            let Some(idx) = state.next_waiting() else { break };
            let Some((id, _)) = state.waiting.remove(idx) else { break };
            let Some(task) = state.tasks.get_mut(&id) else { continue };
            let Some(job) = task.job.take() else { continue };

            task.status = TaskStatus::Processing;
            task.started_at = Some(SystemTime::now());
            let dispatch = Dispatch {
                id,
                endpoint: task.endpoint.clone(),
                payload: task.payload.clone(),
                job,
            };
            state.active += 1;
            ready.push(dispatch);
        }
        ready
    }

    fn finish(&self, id: TaskId, endpoint: &str, outcome: Result<Value>, elapsed: Duration) {
        // Recorded before the status flips so observers of a terminal task see its timing.
        if let Some(profiler) = &self.profiler {
            profiler.record(&format!("task:{}", endpoint), elapsed);
        }

        match self.lock() {
            Ok(mut state) => {
                let state = &mut *state;
                state.active = state.active.saturating_sub(1);
                match state.tasks.get_mut(&id) {
                    Some(task) => {
                        task.completed_at = Some(SystemTime::now());
                        match outcome {
                            Ok(value) => {
                                task.status = TaskStatus::Completed;
                                task.result = Some(value);
                                state.total_processed += 1;
                                let n = state.total_processed as f64;
                                state.average_processing_secs +=
                                    (elapsed.as_secs_f64() - state.average_processing_secs) / n;
                                tracing::info!(task_id = %id, endpoint = %endpoint, elapsed_ms = elapsed.as_millis() as u64, "Task completed");
                            }
                            Err(e) => {
                                task.status = TaskStatus::Failed;
                                task.error = Some(e.to_string());
                                state.total_failed += 1;
                                tracing::warn!(task_id = %id, endpoint = %endpoint, error = %e, "Task failed");
                            }
                        }
                    }
                    None => tracing::error!(task_id = %id, "Finished task missing from arena"),
                }
            }
            Err(e) => tracing::error!(task_id = %id, error = %e, "Could not record task outcome"),
        }

        self.wake.notify_one();
    }
}

struct Worker {
    shutdown_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

pub struct TaskScheduler {
    shared: Arc<Shared>,
    worker: Mutex<Option<Worker>>,
}

impl TaskScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self::build(config, None)
    }

    /// Scheduler that records each execution's duration as `task:<endpoint>`.
    pub fn with_profiler(config: SchedulerConfig, profiler: Arc<PerformanceProfiler>) -> Self {
        Self::build(config, Some(profiler))
    }

    fn build(config: SchedulerConfig, profiler: Option<Arc<PerformanceProfiler>>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(SchedulerState::default()),
                wake: Notify::new(),
                config,
                profiler,
            }),
            worker: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    /// Spawn the dispatch loop on the current tokio runtime. Calling it again is a no-op.
    pub fn start(&self) {
        let Ok(mut worker) = self.worker.lock() else {
            tracing::error!("Scheduler worker lock poisoned, dispatch loop not started");
            return;
        };
        if worker.is_some() {
            return;
        }

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let shared = Arc::clone(&self.shared);
        let handle = tokio::spawn(dispatch_loop(shared, shutdown_rx));
        *worker = Some(Worker { shutdown_tx, handle });

        tracing::info!(
            max_concurrent = self.shared.config.max_concurrent,
            max_queue_size = self.shared.config.max_queue_size,
            "Task dispatch loop started"
        );
    }

    pub fn submit(&self, endpoint: &str, payload: Value, job: TaskJob) -> Result<TaskId> {
        self.submit_with_priority(endpoint, payload, DEFAULT_PRIORITY, job)
    }

    /// Queue a task. Higher priorities are dispatched first; equal
    /// priorities keep submission order. Fails fast when the queue is full.
    pub fn submit_with_priority(
        &self,
        endpoint: &str,
        payload: Value,
        priority: u8,
        job: TaskJob,
    ) -> Result<TaskId> {
        let id = Uuid::new_v4();
        {
            let mut state = self.shared.lock()?;
            if state.waiting.len() >= self.shared.config.max_queue_size {
                tracing::warn!(
                    endpoint = %endpoint,
                    waiting = state.waiting.len(),
                    "Task queue full, rejecting submission"
                );
                return Err(GateError::QueueFull);
            }

            state.tasks.insert(
                id,
                TaskRecord {
                    id,
                    endpoint: endpoint.to_string(),
                    payload,
                    priority,
                    status: TaskStatus::Pending,
                    created_at: SystemTime::now(),
                    started_at: None,
                    completed_at: None,
                    result: None,
                    error: None,
                    job: Some(job),
                },
            );
            state.waiting.push_back((id, priority));
        }

        tracing::debug!(task_id = %id, endpoint = %endpoint, priority, "Task submitted");
        self.shared.wake.notify_one();
        Ok(id)
    }

    pub fn status(&self, id: TaskId) -> Option<TaskSnapshot> {
        self.shared.lock().ok()?.tasks.get(&id).map(TaskSnapshot::from)
    }

    /// Cancel a task that has not been dispatched yet.
    pub fn try_cancel(&self, id: TaskId) -> Result<()> {
        let mut state = self.shared.lock()?;
        let status = state.tasks.get(&id).map(|t| t.status).ok_or(GateError::TaskNotFound)?;
        if status != TaskStatus::Pending {
            return Err(GateError::CancelRejected);
        }

        let position = state
            .waiting
            .iter()
            .position(|&(waiting_id, _)| waiting_id == id)
            .ok_or(GateError::CancelRejected)?;
        state.waiting.remove(position);
        state.total_cancelled += 1;

        if let Some(task) = state.tasks.get_mut(&id) {
            task.status = TaskStatus::Cancelled;
            task.completed_at = Some(SystemTime::now());
            task.job = None;
        }
        tracing::info!(task_id = %id, "Task cancelled");
        Ok(())
    }

    /// Returns `true` iff the task was pending and is now cancelled.
    pub fn cancel(&self, id: TaskId) -> bool {
        self.try_cancel(id).is_ok()
    }

    /// Delete terminal tasks created at least `max_age` ago.
    pub fn cleanup(&self, max_age: Duration) -> usize {
        let now = SystemTime::now();
        let Ok(mut state) = self.shared.lock() else {
            return 0;
        };

        let before = state.tasks.len();
        state.tasks.retain(|_, task| {
            let age = now.duration_since(task.created_at).unwrap_or_default();
            !(task.status.is_terminal() && age >= max_age)
        });
        let removed = before - state.tasks.len();
        if removed > 0 {
            tracing::info!(removed, max_age_secs = max_age.as_secs(), "Cleaned up old tasks");
        }
        removed
    }

    pub fn queue_stats(&self) -> Result<QueueStats> {
        let state = self.shared.lock()?;
        let config = &self.shared.config;
        Ok(QueueStats {
            active_tasks: state.active,
            waiting_tasks: state.waiting.len(),
            max_concurrent: config.max_concurrent,
            max_queue_size: config.max_queue_size,
            total_processed: state.total_processed,
            total_failed: state.total_failed,
            total_cancelled: state.total_cancelled,
            average_processing_time: (state.average_processing_secs * 100.0).round() / 100.0,
            queue_utilization: if config.max_queue_size > 0 {
                state.waiting.len() as f64 / config.max_queue_size as f64 * 100.0
            } else {
                0.0
            },
        })
    }

    pub fn active_count(&self) -> usize {
        self.shared.lock().map(|s| s.active).unwrap_or(0)
    }

    pub fn waiting_count(&self) -> usize {
        self.shared.lock().map(|s| s.waiting.len()).unwrap_or(0)
    }

    pub fn task_count(&self) -> usize {
        self.shared.lock().map(|s| s.tasks.len()).unwrap_or(0)
    }

    /// Stop the dispatch loop, waiting at most `timeout` for it to exit.
    ///
    /// Executions already handed to worker threads are not aborted and may
    /// finish after this returns.
    pub async fn shutdown(&self, timeout: Duration) {
        let worker = match self.worker.lock() {
            Ok(mut worker) => worker.take(),
            Err(_) => None,
        };
        let Some(worker) = worker else {
            return;
        };

        let _ = worker.shutdown_tx.send(());
        match tokio::time::timeout(timeout, worker.handle).await {
            Ok(_) => tracing::info!(active = self.active_count(), "Task dispatch loop stopped"),
            Err(_) => tracing::warn!(
                timeout_ms = timeout.as_millis() as u64,
                "Task dispatch loop did not stop in time"
            ),
        }
    }
}

impl Drop for TaskScheduler {
    fn drop(&mut self) {
        if let Ok(mut worker) = self.worker.lock() {
            if let Some(worker) = worker.take() {
                let _ = worker.shutdown_tx.send(());
            }
        }
    }
}

async fn dispatch_loop(shared: Arc<Shared>, mut shutdown_rx: oneshot::Receiver<()>) {
    loop {
        for dispatch in shared.take_ready() {
            tracing::debug!(task_id = %dispatch.id, endpoint = %dispatch.endpoint, "Task started");
            execute(Arc::clone(&shared), dispatch);
        }

        tokio::select! {
            _ = shared.wake.notified() => {}
            _ = tokio::time::sleep(shared.config.poll_interval) => {}
            _ = &mut shutdown_rx => break,
        }
    }
}

/// Run one task on the blocking pool, detached from the dispatch loop.
fn execute(shared: Arc<Shared>, dispatch: Dispatch) {
    let Dispatch { id, endpoint, payload, job } = dispatch;
    tokio::task::spawn_blocking(move || {
        let started = Instant::now();
        let outcome = catch_unwind(AssertUnwindSafe(move || job(payload)))
            .unwrap_or_else(|_| Err(GateError::Internal("task panicked".to_string())));
        shared.finish(id, &endpoint, outcome, started.elapsed());
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;

    fn config(max_concurrent: usize, max_queue_size: usize) -> SchedulerConfig {
        SchedulerConfig {
            max_concurrent,
            max_queue_size,
            poll_interval: Duration::from_millis(10),
        }
    }

    fn echo() -> TaskJob {
        Box::new(|payload: Value| -> Result<Value> { Ok(payload) })
    }

    async fn wait_for(scheduler: &TaskScheduler, id: TaskId, status: TaskStatus) -> TaskSnapshot {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let snapshot = scheduler.status(id).expect("task exists");
            if snapshot.status == status {
                return snapshot;
            }
            assert!(Instant::now() < deadline, "task {} stuck in {:?}", id, snapshot.status);
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_submit_rejects_when_queue_full() {
        let scheduler = TaskScheduler::new(config(1, 3));
        for _ in 0..3 {
            scheduler.submit("generate", json!({}), echo()).unwrap();
        }

        let err = scheduler.submit("generate", json!({}), echo()).unwrap_err();
        assert!(matches!(err, GateError::QueueFull));
        assert_eq!(scheduler.waiting_count(), 3);
        assert_eq!(scheduler.task_count(), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrency_cap_is_respected() {
        let scheduler = TaskScheduler::new(config(2, 10));
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let ids: Vec<TaskId> = (0..5)
            .map(|i| {
                let running = Arc::clone(&running);
                let peak = Arc::clone(&peak);
                scheduler
                    .submit(
                        "generate",
                        json!({ "n": i }),
                        Box::new(move |payload| {
                            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                            peak.fetch_max(now, Ordering::SeqCst);
                            std::thread::sleep(Duration::from_millis(200));
                            running.fetch_sub(1, Ordering::SeqCst);
                            Ok(payload)
                        }),
                    )
                    .unwrap()
            })
            .collect();

        scheduler.start();

        let deadline = Instant::now() + Duration::from_secs(5);
        while scheduler.queue_stats().unwrap().total_processed < 5 {
            assert!(scheduler.active_count() <= 2);
            assert!(Instant::now() < deadline, "tasks did not finish");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert!(peak.load(Ordering::SeqCst) <= 2);
        for (i, id) in ids.into_iter().enumerate() {
            let snapshot = scheduler.status(id).unwrap();
            assert_eq!(snapshot.status, TaskStatus::Completed);
            assert_eq!(snapshot.result, Some(json!({ "n": i })));
        }

        let stats = scheduler.queue_stats().unwrap();
        assert_eq!(stats.active_tasks, 0);
        assert!(stats.average_processing_time >= 0.2);
        scheduler.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_failures_are_captured_on_the_task() {
        let scheduler = TaskScheduler::new(config(2, 10));
        scheduler.start();

        let failing = scheduler
            .submit(
                "generate",
                json!({}),
                Box::new(|_| -> Result<Value> {
                    Err(GateError::UpstreamFailure("model not loaded".to_string()))
                }),
            )
            .unwrap();
        let panicking = scheduler
            .submit("generate", json!({}), Box::new(|_| -> Result<Value> { panic!("boom") }))
            .unwrap();
        let fine = scheduler.submit("generate", json!("ok"), echo()).unwrap();

        let snapshot = wait_for(&scheduler, failing, TaskStatus::Failed).await;
        assert_eq!(snapshot.error.as_deref(), Some("Backend failure: model not loaded"));
        assert!(snapshot.result.is_none());
        wait_for(&scheduler, panicking, TaskStatus::Failed).await;
        let snapshot = wait_for(&scheduler, fine, TaskStatus::Completed).await;
        assert!(snapshot.error.is_none());

        let stats = scheduler.queue_stats().unwrap();
        assert_eq!(stats.total_failed, 2);
        assert_eq!(stats.total_processed, 1);
        scheduler.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_cancel_pending_task() {
        let scheduler = TaskScheduler::new(config(1, 10));
        let id = scheduler.submit("generate", json!({}), echo()).unwrap();

        assert!(scheduler.cancel(id));
        let snapshot = scheduler.status(id).unwrap();
        assert_eq!(snapshot.status, TaskStatus::Cancelled);
        assert!(snapshot.completed_at_ms.is_some());
        assert_eq!(scheduler.waiting_count(), 0);

        // Cancelling a terminal task changes nothing.
        assert!(!scheduler.cancel(id));
        assert!(matches!(scheduler.try_cancel(id), Err(GateError::CancelRejected)));
        assert!(matches!(scheduler.try_cancel(Uuid::new_v4()), Err(GateError::TaskNotFound)));
        assert_eq!(scheduler.queue_stats().unwrap().total_cancelled, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_dispatched_task_cannot_be_cancelled() {
        let scheduler = TaskScheduler::new(config(1, 10));
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let id = scheduler
            .submit(
                "generate",
                json!({}),
                Box::new(move |payload| {
                    let _ = release_rx.recv_timeout(Duration::from_secs(5));
                    Ok(payload)
                }),
            )
            .unwrap();
        scheduler.start();

        let before = wait_for(&scheduler, id, TaskStatus::Processing).await;
        assert!(!scheduler.cancel(id));
        let after = scheduler.status(id).unwrap();
        assert_eq!(after.status, TaskStatus::Processing);
        assert_eq!(after.started_at_ms, before.started_at_ms);

        release_tx.send(()).unwrap();
        wait_for(&scheduler, id, TaskStatus::Completed).await;
        assert!(!scheduler.cancel(id));
        scheduler.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_higher_priority_dispatched_first() {
        let scheduler = TaskScheduler::new(config(1, 10));
        let order = Arc::new(Mutex::new(Vec::new()));

        let job = |label: &'static str| -> TaskJob {
            let order = Arc::clone(&order);
            Box::new(move |payload| {
                order.lock().unwrap().push(label);
                Ok(payload)
            })
        };

        scheduler.submit_with_priority("generate", json!({}), 1, job("low-1")).unwrap();
        scheduler.submit_with_priority("generate", json!({}), 5, job("high")).unwrap();
        let last = scheduler.submit_with_priority("generate", json!({}), 1, job("low-2")).unwrap();
        scheduler.start();

        wait_for(&scheduler, last, TaskStatus::Completed).await;
        assert_eq!(*order.lock().unwrap(), vec!["high", "low-1", "low-2"]);
        scheduler.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cleanup_only_removes_terminal_tasks() {
        let scheduler = TaskScheduler::new(config(1, 10));
        let (release_tx, release_rx) = mpsc::channel::<()>();

        let processing = scheduler
            .submit(
                "generate",
                json!({}),
                Box::new(move |payload| {
                    let _ = release_rx.recv_timeout(Duration::from_secs(5));
                    Ok(payload)
                }),
            )
            .unwrap();
        let pending = scheduler.submit("generate", json!({}), echo()).unwrap();
        let cancelled = scheduler.submit("generate", json!({}), echo()).unwrap();
        assert!(scheduler.cancel(cancelled));
        scheduler.start();
        wait_for(&scheduler, processing, TaskStatus::Processing).await;

        assert_eq!(scheduler.cleanup(Duration::from_secs(3600)), 0);
        assert_eq!(scheduler.cleanup(Duration::ZERO), 1);
        assert!(scheduler.status(cancelled).is_none());
        assert_eq!(scheduler.status(processing).unwrap().status, TaskStatus::Processing);
        assert_eq!(scheduler.status(pending).unwrap().status, TaskStatus::Pending);

        release_tx.send(()).unwrap();
        wait_for(&scheduler, pending, TaskStatus::Completed).await;
        assert_eq!(scheduler.cleanup(Duration::ZERO), 2);
        assert_eq!(scheduler.task_count(), 0);
        scheduler.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cleanup_keeps_recent_terminal_tasks() {
        let scheduler = TaskScheduler::new(config(2, 10));
        scheduler.start();

        let old: Vec<TaskId> = (0..2)
            .map(|_| scheduler.submit("generate", json!({}), echo()).unwrap())
            .collect();
        for &id in &old {
            wait_for(&scheduler, id, TaskStatus::Completed).await;
        }

        tokio::time::sleep(Duration::from_millis(300)).await;
        let recent = scheduler.submit("generate", json!({}), echo()).unwrap();
        wait_for(&scheduler, recent, TaskStatus::Completed).await;

        // Threshold falls between the two batches.
        assert_eq!(scheduler.cleanup(Duration::from_millis(150)), 2);
        assert!(old.iter().all(|&id| scheduler.status(id).is_none()));
        assert_eq!(scheduler.status(recent).unwrap().status, TaskStatus::Completed);
        scheduler.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_profiler_receives_execution_times() {
        let profiler = Arc::new(PerformanceProfiler::default());
        let scheduler = TaskScheduler::with_profiler(config(1, 10), Arc::clone(&profiler));
        scheduler.start();

        let id = scheduler.submit("explain", json!({}), echo()).unwrap();
        wait_for(&scheduler, id, TaskStatus::Completed).await;
        scheduler.shutdown(Duration::from_secs(1)).await;

        assert_eq!(profiler.stats("task:explain").unwrap().count, 1);
    }

    #[tokio::test]
    async fn test_shutdown_is_bounded_and_idempotent() {
        let scheduler = TaskScheduler::new(config(1, 10));
        scheduler.start();
        scheduler.start();

        let started = Instant::now();
        scheduler.shutdown(Duration::from_millis(500)).await;
        assert!(started.elapsed() < Duration::from_millis(500));
        scheduler.shutdown(Duration::from_millis(500)).await;

        // Submissions still queue after the loop has stopped.
        let id = scheduler.submit("generate", json!({}), echo()).unwrap();
        assert_eq!(scheduler.status(id).unwrap().status, TaskStatus::Pending);
    }
}
