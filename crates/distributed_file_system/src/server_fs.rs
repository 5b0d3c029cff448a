//! Mount table and space accounting of a single server.

use std::collections::BTreeMap;

use log::debug;

use crate::{
    error::FsError,
    fs_tree::{split_path, FsNode, FsNodeId, FsTree},
    storage::{ServerId, StorageDevice, StorageId},
    units::ByteSize,
};

/// Result of adding a child to a directory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddChildOutcome {
    /// The child was attached, possibly replacing a file with the same name.
    Added,
    /// The child was a directory merged into an existing one.
    Merged,
    /// Names collide between a file and a directory, nothing changed.
    Refused,
}

/// Filesystem tree of a server together with its storages and direct mounts.
///
/// Used size of a storage is the sum of mount sizes of objects mounted directly on it.
#[derive(Clone, Debug)]
pub struct ServerFileSystemManager {
    server: ServerId,
    tree: FsTree,
    storages: BTreeMap<StorageId, StorageDevice>,
    mounts: BTreeMap<FsNodeId, StorageId>,
}

impl ServerFileSystemManager {
    pub fn new(server: ServerId) -> Self {
        Self {
            server,
            tree: FsTree::new(),
            storages: BTreeMap::new(),
            mounts: BTreeMap::new(),
        }
    }

    pub fn server(&self) -> ServerId {
        self.server
    }

    pub fn tree(&self) -> &FsTree {
        &self.tree
    }

    pub fn storages(&self) -> impl Iterator<Item = &StorageDevice> {
        self.storages.values()
    }

    pub fn storage(&self, storage: StorageId) -> Option<&StorageDevice> {
        self.storages.get(&storage)
    }

    /// Objects mounted directly on a storage, in handle order.
    pub fn direct_mounts(&self) -> impl Iterator<Item = (FsNodeId, StorageId)> + '_ {
        self.mounts.iter().map(|(&node, &storage)| (node, storage))
    }

    pub fn direct_mount(&self, node: FsNodeId) -> Option<StorageId> {
        self.mounts.get(&node).copied()
    }

    pub fn used_size(&self, storage: StorageId) -> ByteSize {
        self.mounts
            .iter()
            .filter(|&(_, &mounted_on)| mounted_on == storage)
            .filter_map(|(&node, _)| self.tree.node(node))
            .map(|node| node.mount_size())
            .sum()
    }

    pub fn free_size(&self, storage: StorageId) -> ByteSize {
        self.storages
            .get(&storage)
            .map(|device| device.capacity().saturating_sub(self.used_size(storage)))
            .unwrap_or(ByteSize::ZERO)
    }

    /// Walks up the parent chain and returns the first direct mount found.
    pub fn effective_mount_device(&self, node: FsNodeId) -> Option<StorageId> {
        let mut current = Some(node);
        while let Some(id) = current {
            if let Some(&storage) = self.mounts.get(&id) {
                return Some(storage);
            }
            current = self.tree.node(id)?.parent();
        }
        None
    }

    pub fn mountable_hierarchy(&self, node: FsNodeId) -> Result<Vec<FsNodeId>, FsError> {
        self.check_node(node)?;
        Ok(self.tree.mountable_hierarchy(node))
    }

    /// How many bytes the storage of a file lacks to grow it to `new_size`.
    pub fn resize_shortfall(&self, file: FsNodeId, new_size: ByteSize) -> Result<ByteSize, FsError> {
        let node = self.check_file(file)?;
        let Some(storage) = self.effective_mount_device(file) else {
            return Ok(ByteSize::ZERO);
        };
        let growth = new_size.saturating_sub(node.total_size());
        Ok(growth.saturating_sub(self.free_size(storage)))
    }

    /// Checks that `path` can be created as a chain of directories.
    pub fn check_directory_path(&self, path: &str) -> Result<(), FsError> {
        let mut current = self.tree.root();
        for name in split_path(path) {
            match self.tree.child(current, name) {
                Some(child) if self.tree.node(child).is_some_and(|node| node.is_directory()) => current = child,
                Some(child) => return Err(FsError::NotADirectory { path: self.tree.path(child) }),
                None => return Ok(()),
            }
        }
        Ok(())
    }

    pub(crate) fn add_storage(&mut self, device: StorageDevice) -> Result<(), FsError> {
        if self.storages.contains_key(&device.id()) {
            return Err(FsError::DuplicateStorage(device.id()));
        }
        self.storages.insert(device.id(), device);
        Ok(())
    }

    pub(crate) fn resize_storage(&mut self, storage: StorageId, capacity: ByteSize) -> Result<(), FsError> {
        self.check_storage(storage)?;
        let used = self.used_size(storage);
        if capacity < used {
            return Err(FsError::CapacityBelowUsage {
                storage,
                requested: capacity,
                used,
            });
        }
        if let Some(device) = self.storages.get_mut(&storage) {
            device.set_capacity(capacity);
        }
        Ok(())
    }

    pub(crate) fn create_directory(&mut self, name: &str) -> Result<FsNodeId, FsError> {
        self.tree.create_directory(name)
    }

    pub(crate) fn create_file(&mut self, name: &str, size: ByteSize) -> Result<FsNodeId, FsError> {
        self.tree.create_file(name, size)
    }

    /// Creates missing directories on the way to `path` and returns the last one.
    pub(crate) fn mkdirs(&mut self, path: &str) -> Result<FsNodeId, FsError> {
        self.check_directory_path(path)?;
        let mut current = self.tree.root();
        for name in split_path(path) {
            current = match self.tree.child(current, name) {
                Some(child) => child,
                None => {
                    let dir = self.tree.create_directory(name)?;
                    self.tree.attach(current, dir)?;
                    dir
                }
            };
        }
        Ok(current)
    }

    pub(crate) fn mount(&mut self, storage: StorageId, node: FsNodeId, force: bool) -> Result<(), FsError> {
        self.check_storage(storage)?;
        let size = self.check_node(node)?.mount_size();
        if self.mounts.get(&node) == Some(&storage) {
            return Ok(());
        }
        // Bytes already accounted on the same device through inheritance move along with the mount.
        let required = if self.effective_mount_device(node) == Some(storage) {
            ByteSize::ZERO
        } else {
            size
        };
        self.reserve(storage, required, force)?;
        self.mounts.insert(node, storage);
        self.tree.set_inherits_mount(node, false);
        self.tree.propagate_mount_device(node, Some(storage));
        debug!("server {}: mounted {} on storage {}", self.server, self.tree.path(node), storage);
        Ok(())
    }

    /// Drops a direct mount, the object inherits the device of its parent again.
    pub(crate) fn unmount(&mut self, node: FsNodeId) -> Result<(), FsError> {
        let size = self.check_node(node)?.mount_size();
        let Some(&storage) = self.mounts.get(&node) else {
            return Ok(());
        };
        let parent_device = self
            .tree
            .node(node)
            .and_then(|node| node.parent())
            .and_then(|parent| self.effective_mount_device(parent));
        if let Some(target) = parent_device.filter(|&target| target != storage) {
            self.reserve(target, size, false)?;
        }
        self.mounts.remove(&node);
        self.tree.set_inherits_mount(node, true);
        self.tree.propagate_mount_device(node, parent_device);
        debug!("server {}: unmounted {} from storage {}", self.server, self.tree.path(node), storage);
        Ok(())
    }

    /// Attaches a detached `child` to the directory `parent`.
    ///
    /// Directory name collisions are merged recursively, file collisions replace the existing file.
    /// Space needed on every affected device is checked before anything changes.
    pub(crate) fn add_child(
        &mut self,
        parent: FsNodeId,
        child: FsNodeId,
        force: bool,
    ) -> Result<AddChildOutcome, FsError> {
        if !self.check_node(parent)?.is_directory() {
            return Err(FsError::NotADirectory {
                path: self.tree.path(parent),
            });
        }
        let child_node = self.check_node(child)?;
        if child_node.parent().is_some() || child == self.tree.root() {
            return Err(FsError::InvalidPath(self.tree.path(child)));
        }
        let name = child_node.name().to_string();
        let mut deltas = BTreeMap::new();
        let outcome = match self.tree.child(parent, &name) {
            None => {
                self.plan_attach(parent, child, &mut deltas);
                AddChildOutcome::Added
            }
            Some(existing) => {
                if !self.plan_collision(existing, child, &mut deltas) {
                    return Ok(AddChildOutcome::Refused);
                }
                if self.tree.node(existing).is_some_and(|node| node.is_directory()) {
                    AddChildOutcome::Merged
                } else {
                    AddChildOutcome::Added
                }
            }
        };
        self.reserve_all(&deltas, force)?;
        match self.tree.child(parent, &name) {
            None => self.tree.attach(parent, child)?,
            Some(existing) => self.apply_collision(existing, child)?,
        }
        Ok(outcome)
    }

    /// Removes an object with its subtree and returns the freed handles.
    pub(crate) fn remove(&mut self, node: FsNodeId) -> Result<Vec<FsNodeId>, FsError> {
        let parent = self.check_node(node)?.parent();
        if node == self.tree.root() {
            return Err(FsError::RootOperation("removed"));
        }
        if parent.is_some() {
            self.tree.detach(node)?;
        }
        let freed = self.tree.free_subtree(node);
        for id in freed.iter() {
            self.mounts.remove(id);
        }
        Ok(freed)
    }

    pub(crate) fn rename(&mut self, node: FsNodeId, name: &str) -> Result<(), FsError> {
        self.check_node(node)?;
        self.tree.rename(node, name)
    }

    pub(crate) fn resize_to_fit(&mut self, file: FsNodeId, new_size: ByteSize, force: bool) -> Result<(), FsError> {
        let old_size = self.check_file(file)?.total_size();
        if let Some(storage) = self.effective_mount_device(file) {
            self.reserve(storage, new_size.saturating_sub(old_size), force)?;
        }
        self.tree.set_file_size(file, new_size);
        Ok(())
    }

    pub(crate) fn record_access(&mut self, file: FsNodeId) -> Result<(), FsError> {
        self.check_file(file)?;
        self.tree.record_access(file);
        Ok(())
    }

    pub(crate) fn set_access_count(&mut self, file: FsNodeId, count: u64) -> Result<(), FsError> {
        self.check_file(file)?;
        self.tree.set_access_count(file, count);
        Ok(())
    }

    /// Moves every file of `moves` to its storage as one operation.
    ///
    /// Only the final state is checked against capacities, so files may swap between full storages.
    pub(crate) fn relocate(&mut self, moves: &[(FsNodeId, StorageId)]) -> Result<(), FsError> {
        let mut trial = self.clone();
        for &(file, storage) in moves.iter() {
            trial.check_file(file)?;
            trial.check_storage(storage)?;
            trial.rehome(file, storage);
        }
        for device in trial.storages.values() {
            let used = trial.used_size(device.id());
            if used > device.capacity() {
                return Err(FsError::NotEnoughSpaceLeft {
                    server: self.server,
                    storage: device.id(),
                    required: used,
                    available: device.capacity(),
                });
            }
        }
        *self = trial;
        Ok(())
    }

    fn rehome(&mut self, file: FsNodeId, storage: StorageId) {
        let parent_device = self
            .tree
            .node(file)
            .and_then(|node| node.parent())
            .and_then(|parent| self.effective_mount_device(parent));
        if parent_device == Some(storage) {
            self.mounts.remove(&file);
            self.tree.set_inherits_mount(file, true);
        } else {
            self.mounts.insert(file, storage);
            self.tree.set_inherits_mount(file, false);
        }
        self.tree.propagate_mount_device(file, Some(storage));
    }

    /// Space a plain attach of `child` under `parent` needs.
    fn plan_attach(&self, parent: FsNodeId, child: FsNodeId, deltas: &mut BTreeMap<StorageId, i64>) {
        let Some(node) = self.tree.node(child) else {
            return;
        };
        if let (true, Some(storage)) = (node.inherits_mount(), self.effective_mount_device(parent)) {
            *deltas.entry(storage).or_default() += node.mount_size().bytes() as i64;
        }
    }

    /// Space changes of merging `incoming` into `existing`, `false` if a file meets a directory.
    fn plan_collision(
        &self,
        existing: FsNodeId,
        incoming: FsNodeId,
        deltas: &mut BTreeMap<StorageId, i64>,
    ) -> bool {
        let (Some(old), Some(new)) = (self.tree.node(existing), self.tree.node(incoming)) else {
            return false;
        };
        match (old.is_directory(), new.is_directory()) {
            (true, true) => self.tree.children(incoming).into_iter().all(|child| {
                let name = self.tree.node(child).map(|node| node.name()).unwrap_or_default();
                match self.tree.child(existing, name) {
                    None => {
                        self.plan_attach(existing, child, deltas);
                        true
                    }
                    Some(existing_child) => self.plan_collision(existing_child, child, deltas),
                }
            }),
            (false, false) => {
                if let Some(storage) = self.effective_mount_device(existing) {
                    let freed = old.total_size().bytes() as i64;
                    let taken = if self.mounts.contains_key(&incoming) {
                        0
                    } else {
                        new.total_size().bytes() as i64
                    };
                    *deltas.entry(storage).or_default() += taken - freed;
                }
                true
            }
            _ => false,
        }
    }

    fn apply_collision(&mut self, existing: FsNodeId, incoming: FsNodeId) -> Result<(), FsError> {
        if self.tree.node(existing).is_some_and(|node| node.is_directory()) {
            for child in self.tree.children(incoming) {
                self.tree.detach(child)?;
                let name = self.tree.node(child).map(|node| node.name().to_string()).unwrap_or_default();
                match self.tree.child(existing, &name) {
                    None => self.tree.attach(existing, child)?,
                    Some(existing_child) => self.apply_collision(existing_child, child)?,
                }
            }
            self.remove(incoming)?;
            return Ok(());
        }
        let parent = self.tree.node(existing).and_then(|node| node.parent()).ok_or(FsError::Detached)?;
        let old_mount = self.mounts.get(&existing).copied();
        self.remove(existing)?;
        self.tree.attach(parent, incoming)?;
        if let (Some(storage), false) = (old_mount, self.mounts.contains_key(&incoming)) {
            self.mounts.insert(incoming, storage);
            self.tree.set_inherits_mount(incoming, false);
            self.tree.propagate_mount_device(incoming, Some(storage));
        }
        Ok(())
    }

    fn reserve_all(&mut self, deltas: &BTreeMap<StorageId, i64>, force: bool) -> Result<(), FsError> {
        let required = deltas
            .iter()
            .filter(|&(_, &delta)| delta > 0)
            .map(|(&storage, &delta)| (storage, ByteSize::new(delta as u64)))
            .collect::<Vec<_>>();
        if !force {
            if let Some(&(storage, needed)) = required.iter().find(|&&(storage, needed)| needed > self.free_size(storage)) {
                return Err(self.shortage(storage, needed));
            }
        }
        for (storage, needed) in required {
            self.reserve(storage, needed, force)?;
        }
        Ok(())
    }

    /// Makes sure `required` bytes are free on a storage, growing it when `force` is set.
    fn reserve(&mut self, storage: StorageId, required: ByteSize, force: bool) -> Result<(), FsError> {
        let free = self.free_size(storage);
        if required <= free {
            return Ok(());
        }
        if !force {
            return Err(self.shortage(storage, required));
        }
        let device = self
            .storages
            .get_mut(&storage)
            .ok_or(FsError::UnknownStorage { server: self.server, storage })?;
        let grown = device.capacity() + (required - free);
        debug!(
            "server {}: expanding storage {} from {} to {}",
            self.server,
            storage,
            device.capacity(),
            grown
        );
        device.set_capacity(grown);
        Ok(())
    }

    fn shortage(&self, storage: StorageId, required: ByteSize) -> FsError {
        FsError::NotEnoughSpaceLeft {
            server: self.server,
            storage,
            required,
            available: self.free_size(storage),
        }
    }

    fn check_node(&self, node: FsNodeId) -> Result<&FsNode, FsError> {
        self.tree.node(node).ok_or(FsError::UnknownObject { server: self.server })
    }

    fn check_file(&self, file: FsNodeId) -> Result<&FsNode, FsError> {
        let node = self.check_node(file)?;
        if !node.is_file() {
            return Err(FsError::NotAFile {
                path: self.tree.path(file),
            });
        }
        Ok(node)
    }

    fn check_storage(&self, storage: StorageId) -> Result<&StorageDevice, FsError> {
        self.storages.get(&storage).ok_or(FsError::UnknownStorage {
            server: self.server,
            storage,
        })
    }
}
