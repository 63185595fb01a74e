// Engine limits: loop budgets, worker counts, call depth
// Loaded from JSON with per-field defaults; unknown keys are rejected

use serde::Deserialize;
use thiserror::Error;

/// Upper bound for `max_parallel_workers`, whatever the configuration says.
pub const HARD_MAX_PARALLEL_WORKERS: usize = 50;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid engine configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Limits applied by the evaluator.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EngineConfig {
    /// Iterations a while loop may run when it has no `maxLoops` option.
    #[serde(default = "default_while_loops")]
    pub while_default_loops: usize,
    /// Ceiling applied to any requested `maxLoops`.
    #[serde(default = "default_while_max_loops")]
    pub while_max_loops: usize,
    /// Workers a parallel foreach uses when it has no `workers` option.
    #[serde(default = "default_parallel_workers")]
    pub parallel_default_workers: usize,
    #[serde(default = "default_max_parallel_workers")]
    pub max_parallel_workers: usize,
    /// Size of the shared worker pool. Only the first parallel loop's value counts.
    #[serde(default = "default_pool_threads")]
    pub pool_threads: usize,
    #[serde(default = "default_max_call_depth")]
    pub max_call_depth: usize,
}

fn default_while_loops() -> usize {
    50
}

fn default_while_max_loops() -> usize {
    5000
}

fn default_parallel_workers() -> usize {
    6
}

fn default_max_parallel_workers() -> usize {
    20
}

fn default_pool_threads() -> usize {
    20
}

fn default_max_call_depth() -> usize {
    200
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            while_default_loops: default_while_loops(),
            while_max_loops: default_while_max_loops(),
            parallel_default_workers: default_parallel_workers(),
            max_parallel_workers: default_max_parallel_workers(),
            pool_threads: default_pool_threads(),
            max_call_depth: default_max_call_depth(),
        }
    }
}

impl EngineConfig {
    /// Parse overrides from a JSON object; missing fields keep their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = serde_json::from_str(json)?;
        Ok(config.normalized())
    }

    /// Same configuration with the worker cap clamped into `1..=50`.
    pub fn normalized(mut self) -> Self {
        self.max_parallel_workers = self
            .max_parallel_workers
            .clamp(1, HARD_MAX_PARALLEL_WORKERS);
        self.pool_threads = self.pool_threads.max(1);
        self
    }

    pub fn with_max_parallel_workers(mut self, workers: usize) -> Self {
        self.max_parallel_workers = workers;
        self.normalized()
    }

    /// Resolve a requested while budget against the ceiling.
    pub fn while_budget(&self, requested: Option<i64>) -> usize {
        match requested {
            Some(n) if n > 0 => (n as usize).min(self.while_max_loops),
            Some(_) => 0,
            None => self.while_default_loops.min(self.while_max_loops),
        }
    }

    /// Resolve a requested worker count into `1..=max_parallel_workers`.
    pub fn worker_count(&self, requested: Option<i64>) -> usize {
        let max = self.max_parallel_workers.clamp(1, HARD_MAX_PARALLEL_WORKERS);
        let wanted = requested
            .map(|n| n.max(1) as usize)
            .unwrap_or(self.parallel_default_workers);
        wanted.clamp(1, max)
    }
}
