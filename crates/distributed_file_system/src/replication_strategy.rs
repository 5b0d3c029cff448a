//! Trait for a replication strategy.

use crate::{dfs::DistributedFileSystem, registry::FsObjectRef, replicas::ReplicaTarget};

/// Trait for a replication strategy.
pub trait ReplicationStrategy {
    /// Function which is called once for every file created by an upload.
    /// * `file` --- the new primary file, already attached and sized.
    /// * `dfs` --- current state of the file system, including free space of every storage.
    ///
    /// Returned targets must be on distinct servers other than the primary's one.
    fn select_targets(&mut self, file: FsObjectRef, dfs: &DistributedFileSystem) -> Vec<ReplicaTarget>;
}
