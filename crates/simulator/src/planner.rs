//! Trait for a hierarchical storage planner.

use serde::{Deserialize, Serialize};

use dfsim_dfs::{
    dfs::DistributedFileSystem,
    fs_tree::FsNodeId,
    registry::FsObjectRef,
    storage::{ServerId, StorageId},
    units::ByteSize,
};

use crate::task::SimulationTask;

/// Move of a file between two storages of a server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Migration {
    pub server: ServerId,
    pub file: FsNodeId,
    pub path: String,
    pub size: ByteSize,
    pub from: StorageId,
    pub to: StorageId,
}

/// Trait for a planner moving files between storage tiers of a server.
///
/// Moves are applied to the file system model at once, the returned [Migration]s describe
/// the background copying the simulator accounts for.
pub trait HierarchicalPlanner {
    /// Called before `file` is read or overwritten by `task`.
    fn on_before_access(
        &mut self,
        dfs: &mut DistributedFileSystem,
        file: FsObjectRef,
        task: &SimulationTask,
        time: f64,
    ) -> Vec<Migration>;

    /// Called once per file instance a finished task accessed.
    fn on_after_access(&mut self, dfs: &mut DistributedFileSystem, file: FsObjectRef, task: &SimulationTask, time: f64);

    /// Fastest storage `file` could be promoted to right now, without changing anything.
    fn highest_available_storage(&self, dfs: &DistributedFileSystem, file: FsObjectRef, time: f64) -> Option<StorageId>;
}
