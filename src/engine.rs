use std::sync::Arc;

use crate::error::{GateError, Result};
use crate::health::ResourceSampler;

pub const DEFAULT_MAX_LENGTH: u32 = 100;
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

/// The text-generation backend. Invocations are blocking and run on the
/// scheduler's worker threads.
pub trait InferenceEngine: Send + Sync {
    fn generate(&self, prompt: &str, max_length: u32, temperature: f32) -> Result<String>;

    fn name(&self) -> &str;
}

/// Development backend that returns the first `max_length` words of the prompt.
#[derive(Debug, Default, Clone)]
pub struct EchoEngine;

impl InferenceEngine for EchoEngine {
    fn generate(&self, prompt: &str, max_length: u32, _temperature: f32) -> Result<String> {
        if prompt.trim().is_empty() {
            return Err(GateError::UpstreamFailure("empty prompt".to_string()));
        }
        Ok(prompt
            .split_whitespace()
            .take(max_length as usize)
            .collect::<Vec<_>>()
            .join(" "))
    }

    fn name(&self) -> &str {
        "echo"
    }
}

/// Refuses to invoke the wrapped engine while process memory is above the limit.
pub struct MemoryBudget<E> {
    inner: E,
    sampler: Arc<dyn ResourceSampler>,
    limit_mb: f64,
}

impl<E: InferenceEngine> MemoryBudget<E> {
    pub fn new(inner: E, sampler: Arc<dyn ResourceSampler>, limit_mb: f64) -> Self {
        Self {
            inner,
            sampler,
            limit_mb,
        }
    }

    pub fn limit_mb(&self) -> f64 {
        self.limit_mb
    }
}

impl<E: InferenceEngine> InferenceEngine for MemoryBudget<E> {
    fn generate(&self, prompt: &str, max_length: u32, temperature: f32) -> Result<String> {
        match self.sampler.sample() {
            Ok(usage) if usage.memory_used_mb > self.limit_mb => {
                tracing::warn!(
                    memory_used_mb = usage.memory_used_mb,
                    limit_mb = self.limit_mb,
                    "Memory budget exceeded, refusing generation"
                );
                return Err(GateError::ResourceExhausted);
            }
            Ok(_) => {}
            // An unreadable sample does not block generation.
            Err(e) => tracing::warn!(error = %e, "Memory sample unavailable before generation"),
        }

        self.inner.generate(prompt, max_length, temperature)
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}
