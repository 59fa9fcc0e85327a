use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Duration;

use crate::history::RingBuffer;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationStats {
    pub operation: String,
    pub count: usize,
    pub avg_time: f64,
    pub min_time: f64,
    pub max_time: f64,
    pub total_time: f64,
}

/// Per-operation duration statistics over the last `capacity` samples.
pub struct PerformanceProfiler {
    timings: Mutex<HashMap<String, RingBuffer<f64>>>,
    capacity: usize,
}

impl PerformanceProfiler {
    pub fn new(capacity: usize) -> Self {
        Self {
            timings: Mutex::new(HashMap::new()),
            capacity,
        }
    }

    pub fn record(&self, operation: &str, duration: Duration) {
        match self.timings.lock() {
            Ok(mut timings) => {
                timings
                    .entry(operation.to_string())
                    .or_insert_with(|| RingBuffer::new(self.capacity))
                    .push(duration.as_secs_f64());
            }
            Err(_) => {
                tracing::warn!(operation = %operation, "Profiler lock poisoned, timing dropped");
            }
        }
    }

    /// Time a closure and record its duration under `operation`.
    pub fn measure<T, F: FnOnce() -> T>(&self, operation: &str, f: F) -> T {
        let started = std::time::Instant::now();
        let out = f();
        self.record(operation, started.elapsed());
        out
    }

    pub fn stats(&self, operation: &str) -> Option<OperationStats> {
        let timings = self.timings.lock().ok()?;
        timings.get(operation).and_then(|samples| summarize(operation, samples))
    }

    pub fn all_stats(&self) -> BTreeMap<String, OperationStats> {
        let Ok(timings) = self.timings.lock() else {
            return BTreeMap::new();
        };
        timings
            .iter()
            .filter_map(|(name, samples)| summarize(name, samples).map(|s| (name.clone(), s)))
            .collect()
    }
}

fn summarize(operation: &str, samples: &RingBuffer<f64>) -> Option<OperationStats> {
    Some(OperationStats {
        operation: operation.to_string(),
        count: samples.len(),
        avg_time: samples.mean()?,
        min_time: samples.min()?,
        max_time: samples.max()?,
        total_time: samples.sum(),
    })
}

impl Default for PerformanceProfiler {
    fn default() -> Self {
        Self::new(100)
    }
}
