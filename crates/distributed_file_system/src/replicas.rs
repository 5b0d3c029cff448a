//! Replicas of files on other servers.
//!
//! A replica is a plain file with the same path as its primary, mounted directly on the target storage.
//! Every operation either succeeds completely or leaves both the file system and the replica sets unchanged.

use std::collections::{BTreeMap, BTreeSet};

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::{
    dfs::DistributedFileSystem,
    error::FsError,
    fs_tree::{parent_and_name, split_path},
    registry::FsObjectRef,
    storage::{ServerId, StorageId},
    units::ByteSize,
};

/// Storage of a server that holds a replica.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ReplicaTarget {
    pub server: ServerId,
    pub storage: StorageId,
}

impl ReplicaTarget {
    pub fn new(server: ServerId, storage: StorageId) -> Self {
        Self { server, storage }
    }
}

/// Replica sets of primary files.
#[derive(Clone, Debug, Default)]
pub struct ReplicaManager {
    replicas: BTreeMap<FsObjectRef, BTreeMap<ReplicaTarget, FsObjectRef>>,
    primaries: BTreeMap<FsObjectRef, FsObjectRef>,
}

impl ReplicaManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_replicated(&self, file: FsObjectRef) -> bool {
        self.replicas.get(&file).is_some_and(|set| !set.is_empty())
    }

    pub fn is_replica(&self, object: FsObjectRef) -> bool {
        self.primaries.contains_key(&object)
    }

    pub fn primary_of(&self, replica: FsObjectRef) -> Option<FsObjectRef> {
        self.primaries.get(&replica).copied()
    }

    pub fn replicas_of(&self, file: FsObjectRef) -> Vec<FsObjectRef> {
        self.replicas
            .get(&file)
            .map(|set| set.values().copied().collect())
            .unwrap_or_default()
    }

    pub fn targets_of(&self, file: FsObjectRef) -> Vec<ReplicaTarget> {
        self.replicas
            .get(&file)
            .map(|set| set.keys().copied().collect())
            .unwrap_or_default()
    }

    /// All replica sets ordered by primary.
    pub fn replica_sets(&self) -> impl Iterator<Item = (FsObjectRef, &BTreeMap<ReplicaTarget, FsObjectRef>)> {
        self.replicas.iter().map(|(&primary, set)| (primary, set))
    }

    pub(crate) fn insert(&mut self, primary: FsObjectRef, target: ReplicaTarget, replica: FsObjectRef) {
        self.replicas.entry(primary).or_default().insert(target, replica);
        self.primaries.insert(replica, primary);
    }

    fn forget_replica(&mut self, replica: FsObjectRef) {
        let Some(primary) = self.primaries.remove(&replica) else {
            return;
        };
        if let Some(set) = self.replicas.get_mut(&primary) {
            set.retain(|_, &mut instance| instance != replica);
            if set.is_empty() {
                self.replicas.remove(&primary);
            }
        }
    }

    fn forget_primary(&mut self, primary: FsObjectRef) -> Vec<FsObjectRef> {
        let replicas = self.replicas.remove(&primary).unwrap_or_default();
        for replica in replicas.values() {
            self.primaries.remove(replica);
        }
        replicas.into_values().collect()
    }

    /// Creates replicas of an attached file on every target.
    pub fn replicate_file(
        &mut self,
        dfs: &mut DistributedFileSystem,
        file: FsObjectRef,
        targets: &[ReplicaTarget],
    ) -> Result<Vec<FsObjectRef>, FsError> {
        self.replicate(dfs, file, targets, false)
    }

    /// Creates replicas, growing target storages that are short of space.
    pub fn force_replicate_file(
        &mut self,
        dfs: &mut DistributedFileSystem,
        file: FsObjectRef,
        targets: &[ReplicaTarget],
    ) -> Result<Vec<FsObjectRef>, FsError> {
        self.replicate(dfs, file, targets, true)
    }

    fn replicate(
        &mut self,
        dfs: &mut DistributedFileSystem,
        file: FsObjectRef,
        targets: &[ReplicaTarget],
        force: bool,
    ) -> Result<Vec<FsObjectRef>, FsError> {
        let size = dfs.file_size(file)?;
        let path = self.primary_path(dfs, file)?;
        self.check_new_targets(dfs, file, &path, targets)?;
        let mut created = Vec::new();
        for &target in targets.iter() {
            let created_dir = Self::first_missing_directory(dfs, target.server, &path)?;
            match dfs.create_file_at(target.server, &path, size, Some(target.storage), force) {
                Ok(replica) => created.push((target, replica, created_dir)),
                Err(err) => {
                    for (target, replica, created_dir) in created {
                        Self::discard_replica(dfs, target.server, replica, created_dir.as_deref());
                    }
                    return Err(err);
                }
            }
        }
        for &(target, replica, _) in created.iter() {
            debug!("replicated {} to server {} storage {}", path, target.server, target.storage);
            self.insert(file, target, replica);
        }
        Ok(created.into_iter().map(|(_, replica, _)| replica).collect())
    }

    /// Checks that every replica of `file` can grow to `size` without forcing.
    pub fn can_replica_be_resized(
        &self,
        dfs: &DistributedFileSystem,
        file: FsObjectRef,
        size: ByteSize,
    ) -> Result<(), FsError> {
        for (target, replica) in self.replicas.get(&file).into_iter().flatten() {
            let shortfall = dfs.resize_shortfall(*replica, size)?;
            if !shortfall.is_zero() {
                let current = dfs.file_size(*replica)?;
                return Err(FsError::NotEnoughSpaceLeftReplica {
                    server: target.server,
                    storage: target.storage,
                    required: size.saturating_sub(current),
                    available: dfs.free_size(target.server, target.storage)?,
                });
            }
        }
        Ok(())
    }

    /// Resizes every replica to the current size of the primary.
    pub fn propagate_replica_resize(&self, dfs: &mut DistributedFileSystem, file: FsObjectRef) -> Result<(), FsError> {
        let size = dfs.file_size(file)?;
        self.can_replica_be_resized(dfs, file, size)?;
        for replica in self.replicas_of(file) {
            dfs.resize_to_fit(replica, size)?;
        }
        Ok(())
    }

    pub fn force_propagate_replica_resize(
        &self,
        dfs: &mut DistributedFileSystem,
        file: FsObjectRef,
    ) -> Result<(), FsError> {
        let size = dfs.file_size(file)?;
        for replica in self.replicas_of(file) {
            dfs.force_resize_to_fit(replica, size)?;
        }
        Ok(())
    }

    /// Makes `targets` the replica set of `file`: drops the others, creates missing ones, resizes kept ones to `size`.
    pub fn update_replica_targets(
        &mut self,
        dfs: &mut DistributedFileSystem,
        file: FsObjectRef,
        targets: &[ReplicaTarget],
        size: ByteSize,
    ) -> Result<(), FsError> {
        self.update_targets(dfs, file, targets, size, false)
    }

    pub fn force_update_replica_targets(
        &mut self,
        dfs: &mut DistributedFileSystem,
        file: FsObjectRef,
        targets: &[ReplicaTarget],
        size: ByteSize,
    ) -> Result<(), FsError> {
        self.update_targets(dfs, file, targets, size, true)
    }

    fn update_targets(
        &mut self,
        dfs: &mut DistributedFileSystem,
        file: FsObjectRef,
        targets: &[ReplicaTarget],
        size: ByteSize,
        force: bool,
    ) -> Result<(), FsError> {
        let wanted = targets.iter().copied().collect::<BTreeSet<_>>();
        let current = self.replicas.get(&file).cloned().unwrap_or_default();
        let mut trial_dfs = dfs.clone();
        let mut trial = self.clone();
        for (target, &replica) in current.iter().filter(|(target, _)| !wanted.contains(target)) {
            trial_dfs.remove_object(replica)?;
            trial.forget_replica(replica);
        }
        for replica in current.iter().filter(|(target, _)| wanted.contains(target)).map(|(_, &replica)| replica) {
            if force {
                trial_dfs.force_resize_to_fit(replica, size)?;
            } else {
                trial_dfs.resize_to_fit(replica, size)?;
            }
        }
        let added = wanted
            .iter()
            .filter(|target| !current.contains_key(target))
            .copied()
            .collect::<Vec<_>>();
        if !added.is_empty() {
            let path = trial.primary_path(&trial_dfs, file)?;
            trial.check_new_targets(&trial_dfs, file, &path, &added)?;
            for target in added {
                let replica = trial_dfs.create_file_at(target.server, &path, size, Some(target.storage), force)?;
                trial.insert(file, target, replica);
            }
        }
        *dfs = trial_dfs;
        *self = trial;
        Ok(())
    }

    /// Renames an object together with its instances on servers holding replicas.
    ///
    /// Renaming a replica renames its primary and all other replicas.
    pub fn rename_replicated_object(
        &mut self,
        dfs: &mut DistributedFileSystem,
        object: FsObjectRef,
        name: &str,
    ) -> Result<(), FsError> {
        let object = self.primary_of(object).unwrap_or(object);
        let mut instances = vec![object];
        if dfs.node(object)?.is_file() {
            instances.extend(self.replicas_of(object));
        } else if dfs.is_attached(object) {
            let path = dfs.path(object)?;
            let servers = dfs
                .files(object)?
                .into_iter()
                .flat_map(|file| self.targets_of(file))
                .map(|target| target.server)
                .collect::<BTreeSet<_>>();
            instances.extend(servers.into_iter().filter_map(|server| dfs.lookup(server, &path)));
        }
        for &instance in instances.iter() {
            let Some(parent) = dfs.node(instance)?.parent() else {
                continue;
            };
            let parent = FsObjectRef::new(instance.server, parent);
            if let Some(existing) = dfs.children(parent)?.into_iter().find(|&child| {
                child != instance && dfs.node(child).is_ok_and(|node| node.name() == name)
            }) {
                return Err(FsError::NameCollision {
                    path: dfs.path(existing)?,
                });
            }
        }
        for instance in instances {
            dfs.rename_object(instance, name)?;
        }
        Ok(())
    }

    /// Deletes an object and all replicas of files below it.
    ///
    /// Deleting a replica drops only that replica.
    pub fn delete_replicated_object(&mut self, dfs: &mut DistributedFileSystem, object: FsObjectRef) -> Result<(), FsError> {
        let files = dfs.files(object)?;
        if object.node == dfs.root(object.server)?.node {
            return Err(FsError::RootOperation("removed"));
        }
        let mut doomed = Vec::new();
        for &file in files.iter() {
            if self.is_replica(file) {
                self.forget_replica(file);
            } else {
                doomed.extend(self.forget_primary(file));
            }
        }
        for replica in doomed.into_iter() {
            if !dfs.contains(replica) {
                continue;
            }
            debug!("dropping replica on server {}", replica.server);
            dfs.remove_object(replica)?;
        }
        dfs.remove_object(object)
    }

    /// Topmost directory `create_file_at` would create on `server` for a file at `path`.
    fn first_missing_directory(
        dfs: &DistributedFileSystem,
        server: ServerId,
        path: &str,
    ) -> Result<Option<String>, FsError> {
        let Some((parent, _)) = parent_and_name(path) else {
            return Ok(None);
        };
        let components = split_path(&parent);
        let (_, matched) = dfs.server(server)?.tree().deepest_existing(&parent);
        Ok((matched < components.len()).then(|| format!("/{}", components[..=matched].join("/"))))
    }

    /// Removes a replica created by an unfinished replication together with the directories made for it.
    fn discard_replica(dfs: &mut DistributedFileSystem, server: ServerId, replica: FsObjectRef, created_dir: Option<&str>) {
        let object = created_dir
            .and_then(|dir| dfs.lookup(server, dir))
            .unwrap_or(replica);
        if let Err(err) = dfs.remove_object(object) {
            warn!("can't roll back replica on server {}: {}", server, err);
        }
    }

    fn primary_path(&self, dfs: &DistributedFileSystem, file: FsObjectRef) -> Result<String, FsError> {
        if !dfs.is_attached(file) {
            return Err(FsError::Detached);
        }
        dfs.path(file)
    }

    fn check_new_targets(
        &self,
        dfs: &DistributedFileSystem,
        file: FsObjectRef,
        path: &str,
        targets: &[ReplicaTarget],
    ) -> Result<(), FsError> {
        let (parent_path, _) = parent_and_name(path).ok_or_else(|| FsError::InvalidPath(path.to_string()))?;
        let taken = self
            .targets_of(file)
            .into_iter()
            .map(|target| target.server)
            .collect::<BTreeSet<_>>();
        let mut seen = BTreeSet::new();
        for target in targets.iter() {
            let invalid = |reason| FsError::InvalidReplicaTarget {
                server: target.server,
                storage: target.storage,
                reason,
            };
            if target.server == file.server {
                return Err(invalid("replica on the primary server"));
            }
            if !seen.insert(target.server) || taken.contains(&target.server) {
                return Err(invalid("server already holds a replica"));
            }
            if dfs.storage_server(target.storage) != Some(target.server) {
                return Err(invalid("storage does not belong to the server"));
            }
            let manager = dfs.server(target.server)?;
            manager.check_directory_path(&parent_path)?;
            if let Some(existing) = dfs.lookup(target.server, path) {
                return Err(FsError::NameCollision {
                    path: dfs.path(existing)?,
                });
            }
        }
        Ok(())
    }
}
