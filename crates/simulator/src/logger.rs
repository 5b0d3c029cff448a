//! Callbacks describing what the simulator does.

use dfsim_dfs::replicas::ReplicaTarget;

use crate::{
    path::DfsPath,
    planner::Migration,
    task::{SimulationTask, TaskResult},
};

/// Receiver of simulator events, every callback gets the simulated time.
pub trait DfsSimulatorLogger {
    fn simulation_started(&mut self, _time: f64, _tasks: usize) {}

    fn simulation_finished(&mut self, _time: f64) {}

    fn task_started(&mut self, _time: f64, _task: &SimulationTask) {}

    fn task_finished(&mut self, _time: f64, _result: &TaskResult) {}

    fn path_selected(&mut self, _time: f64, _task: &SimulationTask, _path: &DfsPath) {}

    fn migration_started(&mut self, _time: f64, _migration: &Migration) {}

    fn migration_finished(&mut self, _time: f64, _migration: &Migration) {}

    fn replication_started(&mut self, _time: f64, _path: &str, _targets: &[ReplicaTarget]) {}

    fn replication_finished(&mut self, _time: f64, _path: &str, _replicas: usize) {}

    fn error(&mut self, _time: f64, _message: &str) {}
}

/// Logger keeping one text line per event.
#[derive(Clone, Debug, Default)]
pub struct StringLogger {
    pub lines: Vec<String>,
}

impl StringLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(&self) -> String {
        self.lines.join("\n")
    }

    fn push(&mut self, time: f64, line: String) {
        self.lines.push(format!("[{:.3}] {}", time, line));
    }
}

impl DfsSimulatorLogger for StringLogger {
    fn simulation_started(&mut self, time: f64, tasks: usize) {
        self.push(time, format!("simulation started with {} task(s)", tasks));
    }

    fn simulation_finished(&mut self, time: f64) {
        self.push(time, "simulation finished".to_string());
    }

    fn task_started(&mut self, time: f64, task: &SimulationTask) {
        self.push(time, format!("task {} {:?} {} started", task.id, task.kind, task.path));
    }

    fn task_finished(&mut self, time: f64, result: &TaskResult) {
        self.push(
            time,
            format!(
                "task {} finished with {:?} after {:.3} s, {:.0} B/s",
                result.task_id, result.state, result.elapsed, result.average_speed
            ),
        );
    }

    fn path_selected(&mut self, time: f64, task: &SimulationTask, path: &DfsPath) {
        self.push(
            time,
            format!(
                "task {} uses path {:?} to server {} storage {}",
                task.id, path.nodes, path.server, path.storage
            ),
        );
    }

    fn migration_started(&mut self, time: f64, migration: &Migration) {
        self.push(
            time,
            format!(
                "migration of {} on server {} from storage {} to {} started",
                migration.path, migration.server, migration.from, migration.to
            ),
        );
    }

    fn migration_finished(&mut self, time: f64, migration: &Migration) {
        self.push(time, format!("migration of {} finished", migration.path));
    }

    fn replication_started(&mut self, time: f64, path: &str, targets: &[ReplicaTarget]) {
        self.push(time, format!("replication of {} to {} target(s) started", path, targets.len()));
    }

    fn replication_finished(&mut self, time: f64, path: &str, replicas: usize) {
        self.push(time, format!("replication of {} finished with {} replica(s)", path, replicas));
    }

    fn error(&mut self, time: f64, message: &str) {
        self.push(time, format!("error: {}", message));
    }
}
