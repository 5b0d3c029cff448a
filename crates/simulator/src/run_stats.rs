//! Some stats from a completed simulation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use dfsim_dfs::units::ByteSize;

use crate::task::{TaskResult, TaskState};

/// Some stats from a completed simulation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunStats {
    /// Simulated time when the last task finished.
    pub total_time: f64,
    /// Total number of processed tasks.
    pub task_count: usize,
    /// Number of tasks which finished with [TaskState::Done].
    pub completed_task_count: usize,
    /// Number of tasks per final state.
    pub tasks_by_state: BTreeMap<TaskState, usize>,
    /// Bytes moved by completed tasks.
    pub total_bytes_transferred: f64,
    /// Average elapsed time among completed tasks.
    pub average_task_time: f64,
    /// Minimum elapsed time among completed tasks.
    pub min_task_time: f64,
    /// Maximum elapsed time among completed tasks.
    pub max_task_time: f64,
    /// Average of per-task average speeds among completed tasks.
    pub average_speed: f64,
    /// Sum of path latencies of all tasks.
    pub total_latency: f64,
    /// Number of path changes during transfers.
    pub reroute_count: usize,
    /// Number of files moved between storages.
    pub migration_count: usize,
    pub migrated_bytes: ByteSize,
    /// Number of replicas created for uploaded files.
    pub replica_count: usize,
}

impl Default for RunStats {
    fn default() -> Self {
        Self::new()
    }
}

impl RunStats {
    pub fn new() -> Self {
        RunStats {
            total_time: 0.0,
            task_count: 0,
            completed_task_count: 0,
            tasks_by_state: BTreeMap::new(),
            total_bytes_transferred: 0.0,
            average_task_time: 0.0,
            min_task_time: f64::MAX,
            max_task_time: 0.0,
            average_speed: 0.0,
            total_latency: 0.0,
            reroute_count: 0,
            migration_count: 0,
            migrated_bytes: ByteSize::ZERO,
            replica_count: 0,
        }
    }

    /// Register a finished task.
    pub fn register_result(&mut self, result: &TaskResult) {
        self.task_count += 1;
        *self.tasks_by_state.entry(result.state).or_default() += 1;
        self.total_latency += result.total_latency;
        if !result.state.is_success() {
            return;
        }
        let completed = self.completed_task_count as f64;
        self.average_task_time = (self.average_task_time * completed + result.elapsed) / (completed + 1.);
        self.average_speed = (self.average_speed * completed + result.average_speed) / (completed + 1.);
        self.completed_task_count += 1;
        self.min_task_time = self.min_task_time.min(result.elapsed);
        self.max_task_time = self.max_task_time.max(result.elapsed);
        self.total_bytes_transferred += result.transferred;
    }

    pub fn register_reroute(&mut self) {
        self.reroute_count += 1;
    }

    pub fn register_migration(&mut self, size: ByteSize) {
        self.migration_count += 1;
        self.migrated_bytes = self.migrated_bytes + size;
    }

    pub fn register_replicas(&mut self, count: usize) {
        self.replica_count += count;
    }

    /// Number of tasks which finished with `state`.
    pub fn count(&self, state: TaskState) -> usize {
        self.tasks_by_state.get(&state).copied().unwrap_or(0)
    }

    pub fn finalize(&mut self, time: f64) {
        self.total_time = time;
        if self.completed_task_count == 0 {
            self.min_task_time = 0.0;
        }
    }
}
