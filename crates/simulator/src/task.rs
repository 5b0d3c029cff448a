//! Upload and download tasks and their results.

use serde::{Deserialize, Serialize};

use dfsim_dfs::units::ByteSize;

use crate::{path::DfsPath, topology::NodeId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskKind {
    /// Download of a file to the client.
    Get,
    /// Upload of a file from the client.
    Put,
}

/// Transfer requested by a client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimulationTask {
    pub id: u64,
    pub kind: TaskKind,
    pub client: NodeId,
    pub path: String,
    /// Size of the uploaded data, ignored by downloads.
    #[serde(default)]
    pub size: ByteSize,
}

/// Final state of a task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TaskState {
    Done,
    NoNeighboursAvailable,
    NoPathAvailable,
    NotMounted,
    ObjectNotFound,
    NotEnoughSpaceOnDevice,
    NotEnoughSpaceForReplica,
    TransferStalled,
}

impl TaskState {
    pub fn is_success(self) -> bool {
        self == TaskState::Done
    }
}

/// Throughput during one slice of a transfer.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ThroughputSample {
    pub time: f64,
    /// Bytes per second.
    pub speed: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: u64,
    pub kind: TaskKind,
    pub path: String,
    pub state: TaskState,
    pub start_time: f64,
    /// Time from the start of the task until its end, including latencies.
    pub elapsed: f64,
    /// Bytes moved over the network.
    pub transferred: f64,
    /// Bytes per second over the whole elapsed time.
    pub average_speed: f64,
    pub total_latency: f64,
    /// Distinct paths in the order they were used.
    pub paths: Vec<DfsPath>,
    pub samples: Vec<ThroughputSample>,
}

impl TaskResult {
    /// Result of a task that ended before any transfer.
    pub fn failed(task: &SimulationTask, state: TaskState, start_time: f64, elapsed: f64) -> Self {
        Self {
            task_id: task.id,
            kind: task.kind,
            path: task.path.clone(),
            state,
            start_time,
            elapsed,
            transferred: 0.,
            average_speed: 0.,
            total_latency: 0.,
            paths: Vec::new(),
            samples: Vec::new(),
        }
    }

    pub fn end_time(&self) -> f64 {
        self.start_time + self.elapsed
    }
}
