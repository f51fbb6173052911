//! Per-node execution statistics.
//!
//! The tracker is an explicitly constructed collaborator handed to the
//! executor — never ambient global state — so tests can own one per
//! scenario and the orchestrator can aggregate per swarm.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// Accumulated statistics for one node name.
#[derive(Debug, Clone, Default)]
pub struct NodeStats {
    /// Node name these stats belong to.
    pub name: String,
    /// Total executions.
    pub execution_count: u64,
    /// Executions that completed without error.
    pub success_count: u64,
    /// Executions that raised a node error.
    pub failure_count: u64,
    /// Sum of execution durations.
    pub total_duration: Duration,
    /// Fastest execution.
    pub min_duration: Duration,
    /// Slowest execution.
    pub max_duration: Duration,
    /// Message of the most recent failure.
    pub last_error: Option<String>,
}

impl NodeStats {
    /// Mean execution duration.
    #[must_use]
    pub fn average_duration(&self) -> Duration {
        if self.execution_count == 0 {
            return Duration::ZERO;
        }
        self.total_duration / self.execution_count as u32
    }

    /// Success percentage in `[0, 100]`.
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        if self.execution_count == 0 {
            return 0.0;
        }
        self.success_count as f64 / self.execution_count as f64 * 100.0
    }

    fn record(&mut self, duration: Duration, success: bool, error: Option<&str>) {
        self.execution_count += 1;
        if success {
            self.success_count += 1;
        } else {
            self.failure_count += 1;
            if let Some(error) = error {
                self.last_error = Some(error.to_string());
            }
        }

        self.total_duration += duration;
        if self.execution_count == 1 {
            self.min_duration = duration;
            self.max_duration = duration;
        } else {
            self.min_duration = self.min_duration.min(duration);
            self.max_duration = self.max_duration.max(duration);
        }
    }
}

/// Thread-safe tracker keyed by node name.
#[derive(Debug, Default)]
pub struct NodeStatsTracker {
    stats: Mutex<HashMap<String, NodeStats>>,
}

impl NodeStatsTracker {
    /// Create an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one node execution.
    pub fn record(&self, name: &str, duration: Duration, success: bool, error: Option<&str>) {
        let mut stats = self.lock();
        let entry = stats
            .entry(name.to_string())
            .or_insert_with(|| NodeStats { name: name.to_string(), ..NodeStats::default() });
        entry.record(duration, success, error);
    }

    /// Stats for one node name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<NodeStats> {
        self.lock().get(name).cloned()
    }

    /// All stats, most-executed first.
    #[must_use]
    pub fn all(&self) -> Vec<NodeStats> {
        let mut all: Vec<NodeStats> = self.lock().values().cloned().collect();
        all.sort_by(|a, b| b.execution_count.cmp(&a.execution_count));
        all
    }

    /// Drop all recorded stats.
    pub fn reset(&self) {
        self.lock().clear();
    }

    /// Drop stats for one node name.
    pub fn reset_node(&self, name: &str) {
        self.lock().remove(name);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, NodeStats>> {
        match self.stats.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
