use std::path::Path;

use serde::{Deserialize, Serialize};

use dfsim_dfs::{replicas::ReplicaTarget, storage::StorageId};

use crate::{
    logger::DfsSimulatorLogger,
    path::DfsPath,
    planner::Migration,
    task::{SimulationTask, TaskKind, TaskResult, TaskState},
    topology::NodeId,
};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TraceEvent {
    SimulationStarted {
        time: f64,
        tasks: usize,
    },
    SimulationFinished {
        time: f64,
    },
    TaskStarted {
        time: f64,
        task_id: u64,
        kind: TaskKind,
        path: String,
    },
    TaskFinished {
        time: f64,
        task_id: u64,
        state: TaskState,
        elapsed: f64,
        average_speed: f64,
    },
    PathSelected {
        time: f64,
        task_id: u64,
        nodes: Vec<NodeId>,
        storage: StorageId,
    },
    MigrationStarted {
        time: f64,
        path: String,
        from: StorageId,
        to: StorageId,
    },
    MigrationFinished {
        time: f64,
        path: String,
    },
    ReplicationStarted {
        time: f64,
        path: String,
        targets: Vec<ReplicaTarget>,
    },
    ReplicationFinished {
        time: f64,
        path: String,
        replicas: usize,
    },
    Error {
        time: f64,
        message: String,
    },
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Trace {
    pub events: Vec<TraceEvent>,
}

impl Trace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&mut self, event: TraceEvent) {
        self.events.push(event);
    }

    /// Write trace as JSON. Panic on error.
    pub fn to_json<P: AsRef<Path>>(&self, file: P) {
        std::fs::write(
            &file,
            serde_json::to_string_pretty(self).unwrap_or_else(|e| panic!("Can't serialize trace: {e:?}")),
        )
        .unwrap_or_else(|_| panic!("Can't write file {}", file.as_ref().display()));
    }
}

impl DfsSimulatorLogger for Trace {
    fn simulation_started(&mut self, time: f64, tasks: usize) {
        self.log(TraceEvent::SimulationStarted { time, tasks });
    }

    fn simulation_finished(&mut self, time: f64) {
        self.log(TraceEvent::SimulationFinished { time });
    }

    fn task_started(&mut self, time: f64, task: &SimulationTask) {
        self.log(TraceEvent::TaskStarted {
            time,
            task_id: task.id,
            kind: task.kind,
            path: task.path.clone(),
        });
    }

    fn task_finished(&mut self, time: f64, result: &TaskResult) {
        self.log(TraceEvent::TaskFinished {
            time,
            task_id: result.task_id,
            state: result.state,
            elapsed: result.elapsed,
            average_speed: result.average_speed,
        });
    }

    fn path_selected(&mut self, time: f64, task: &SimulationTask, path: &DfsPath) {
        self.log(TraceEvent::PathSelected {
            time,
            task_id: task.id,
            nodes: path.nodes.clone(),
            storage: path.storage,
        });
    }

    fn migration_started(&mut self, time: f64, migration: &Migration) {
        self.log(TraceEvent::MigrationStarted {
            time,
            path: migration.path.clone(),
            from: migration.from,
            to: migration.to,
        });
    }

    fn migration_finished(&mut self, time: f64, migration: &Migration) {
        self.log(TraceEvent::MigrationFinished {
            time,
            path: migration.path.clone(),
        });
    }

    fn replication_started(&mut self, time: f64, path: &str, targets: &[ReplicaTarget]) {
        self.log(TraceEvent::ReplicationStarted {
            time,
            path: path.to_string(),
            targets: targets.to_vec(),
        });
    }

    fn replication_finished(&mut self, time: f64, path: &str, replicas: usize) {
        self.log(TraceEvent::ReplicationFinished {
            time,
            path: path.to_string(),
            replicas,
        });
    }

    fn error(&mut self, time: f64, message: &str) {
        self.log(TraceEvent::Error {
            time,
            message: message.to_string(),
        });
    }
}
