//! Model of a distributed file system.

use std::collections::BTreeMap;

use log::debug;

use crate::{
    error::FsError,
    fs_tree::{normalize_path, parent_and_name, FsNode, FsNodeId},
    registry::{FsObjectRef, ObjectRegistry},
    server_fs::{AddChildOutcome, ServerFileSystemManager},
    storage::{ServerId, StorageDevice, StorageId},
    units::ByteSize,
};

/// Filesystems of all servers together with the global registry of object instances.
///
/// Every node reachable from the root of some server is registered under its full path.
/// Detached objects are not registered until they are added to a directory.
#[derive(Clone, Debug, Default)]
pub struct DistributedFileSystem {
    servers: BTreeMap<ServerId, ServerFileSystemManager>,
    storage_owner: BTreeMap<StorageId, ServerId>,
    registry: ObjectRegistry,
}

impl DistributedFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_server(&mut self, server: ServerId) {
        if self.servers.contains_key(&server) {
            return;
        }
        let manager = ServerFileSystemManager::new(server);
        let root = manager.tree().root();
        self.registry.register("/".to_string(), FsObjectRef::new(server, root));
        self.servers.insert(server, manager);
    }

    pub fn add_storage(&mut self, server: ServerId, device: StorageDevice) -> Result<(), FsError> {
        if self.storage_owner.contains_key(&device.id()) {
            return Err(FsError::DuplicateStorage(device.id()));
        }
        let id = device.id();
        self.server_mut(server)?.add_storage(device)?;
        self.storage_owner.insert(id, server);
        Ok(())
    }

    pub fn servers(&self) -> impl Iterator<Item = ServerId> + '_ {
        self.servers.keys().copied()
    }

    pub fn has_server(&self, server: ServerId) -> bool {
        self.servers.contains_key(&server)
    }

    pub fn server(&self, server: ServerId) -> Result<&ServerFileSystemManager, FsError> {
        self.servers.get(&server).ok_or(FsError::UnknownServer(server))
    }

    fn server_mut(&mut self, server: ServerId) -> Result<&mut ServerFileSystemManager, FsError> {
        self.servers.get_mut(&server).ok_or(FsError::UnknownServer(server))
    }

    pub fn registry(&self) -> &ObjectRegistry {
        &self.registry
    }

    pub fn storage(&self, storage: StorageId) -> Option<&StorageDevice> {
        let server = self.storage_owner.get(&storage)?;
        self.servers.get(server)?.storage(storage)
    }

    pub fn storage_server(&self, storage: StorageId) -> Option<ServerId> {
        self.storage_owner.get(&storage).copied()
    }

    pub fn root(&self, server: ServerId) -> Result<FsObjectRef, FsError> {
        Ok(FsObjectRef::new(server, self.server(server)?.tree().root()))
    }

    pub fn node(&self, object: FsObjectRef) -> Result<&FsNode, FsError> {
        self.server(object.server)?
            .tree()
            .node(object.node)
            .ok_or(FsError::UnknownObject { server: object.server })
    }

    pub fn contains(&self, object: FsObjectRef) -> bool {
        self.node(object).is_ok()
    }

    pub fn path(&self, object: FsObjectRef) -> Result<String, FsError> {
        self.node(object)?;
        Ok(self.server(object.server)?.tree().path(object.node))
    }

    pub fn is_attached(&self, object: FsObjectRef) -> bool {
        self.server(object.server)
            .map(|manager| manager.tree().is_attached(object.node))
            .unwrap_or(false)
    }

    pub fn lookup(&self, server: ServerId, path: &str) -> Option<FsObjectRef> {
        let node = self.servers.get(&server)?.tree().lookup(path)?;
        Some(FsObjectRef::new(server, node))
    }

    /// All instances registered under a path, ordered by server.
    pub fn instances(&self, path: &str) -> impl Iterator<Item = FsObjectRef> + '_ {
        self.registry.instances(path)
    }

    pub fn children(&self, object: FsObjectRef) -> Result<Vec<FsObjectRef>, FsError> {
        self.node(object)?;
        Ok(self
            .server(object.server)?
            .tree()
            .children(object.node)
            .into_iter()
            .map(|node| FsObjectRef::new(object.server, node))
            .collect())
    }

    /// Files of the subtree of an object in pre-order.
    pub fn files(&self, object: FsObjectRef) -> Result<Vec<FsObjectRef>, FsError> {
        self.node(object)?;
        Ok(self
            .server(object.server)?
            .tree()
            .files(object.node)
            .into_iter()
            .map(|node| FsObjectRef::new(object.server, node))
            .collect())
    }

    pub fn file_size(&self, file: FsObjectRef) -> Result<ByteSize, FsError> {
        let node = self.node(file)?;
        if !node.is_file() {
            return Err(FsError::NotAFile { path: self.path(file)? });
        }
        Ok(node.total_size())
    }

    pub fn capacity(&self, server: ServerId, storage: StorageId) -> Result<ByteSize, FsError> {
        let manager = self.server(server)?;
        manager
            .storage(storage)
            .map(|device| device.capacity())
            .ok_or(FsError::UnknownStorage { server, storage })
    }

    pub fn used_size(&self, server: ServerId, storage: StorageId) -> Result<ByteSize, FsError> {
        self.capacity(server, storage)?;
        Ok(self.server(server)?.used_size(storage))
    }

    pub fn free_size(&self, server: ServerId, storage: StorageId) -> Result<ByteSize, FsError> {
        self.capacity(server, storage)?;
        Ok(self.server(server)?.free_size(storage))
    }

    pub fn effective_mount_device(&self, object: FsObjectRef) -> Result<Option<StorageId>, FsError> {
        self.node(object)?;
        Ok(self.server(object.server)?.effective_mount_device(object.node))
    }

    /// Device of the object at `path` on `server`, resolved through the registry.
    pub fn mount_device_by_path(&self, server: ServerId, path: &str) -> Option<StorageId> {
        let path = normalize_path(path);
        let object = self.registry.instances(&path).find(|object| object.server == server)?;
        self.servers.get(&server)?.effective_mount_device(object.node)
    }

    pub fn mountable_hierarchy(&self, object: FsObjectRef) -> Result<Vec<FsObjectRef>, FsError> {
        Ok(self
            .server(object.server)?
            .mountable_hierarchy(object.node)?
            .into_iter()
            .map(|node| FsObjectRef::new(object.server, node))
            .collect())
    }

    pub fn resize_shortfall(&self, file: FsObjectRef, size: ByteSize) -> Result<ByteSize, FsError> {
        self.server(file.server)?.resize_shortfall(file.node, size)
    }

    /// Creates a detached directory.
    pub fn create_directory(&mut self, server: ServerId, name: &str) -> Result<FsObjectRef, FsError> {
        let node = self.server_mut(server)?.create_directory(name)?;
        Ok(FsObjectRef::new(server, node))
    }

    /// Creates a detached file.
    pub fn create_file(&mut self, server: ServerId, name: &str, size: ByteSize) -> Result<FsObjectRef, FsError> {
        let node = self.server_mut(server)?.create_file(name, size)?;
        Ok(FsObjectRef::new(server, node))
    }

    /// Creates all missing directories of `path` and returns the last one.
    pub fn mkdirs(&mut self, server: ServerId, path: &str) -> Result<FsObjectRef, FsError> {
        let manager = self.servers.get_mut(&server).ok_or(FsError::UnknownServer(server))?;
        let (existing, _) = manager.tree().deepest_existing(path);
        let node = manager.mkdirs(path)?;
        self.register_chain(server, existing, node);
        Ok(FsObjectRef::new(server, node))
    }

    /// Creates a file at `path`, mounted on `storage` if given, otherwise inheriting the parent device.
    ///
    /// Space is checked before any directory is created.
    pub fn create_file_at(
        &mut self,
        server: ServerId,
        path: &str,
        size: ByteSize,
        storage: Option<StorageId>,
        force: bool,
    ) -> Result<FsObjectRef, FsError> {
        let (parent_path, name) = parent_and_name(path).ok_or_else(|| FsError::InvalidPath(path.to_string()))?;
        let manager = self.server(server)?;
        manager.check_directory_path(&parent_path)?;
        if let Some(existing) = manager.tree().lookup(path) {
            return Err(FsError::NameCollision {
                path: manager.tree().path(existing),
            });
        }
        let device = match storage {
            Some(storage) => Some(storage),
            None => {
                let (deepest, _) = manager.tree().deepest_existing(&parent_path);
                manager.effective_mount_device(deepest)
            }
        };
        if let Some(device) = device {
            let free = self.free_size(server, device)?;
            if !force && size > free {
                return Err(FsError::NotEnoughSpaceLeft {
                    server,
                    storage: device,
                    required: size,
                    available: free,
                });
            }
        }
        let parent = self.mkdirs(server, &parent_path)?;
        let file = self.create_file(server, name, size)?;
        let attached = match storage {
            Some(storage) => self
                .mount_with(file, storage, force)
                .and_then(|_| self.add_child_with(parent, file, force)),
            None => self.add_child_with(parent, file, force),
        };
        if let Err(err) = attached {
            self.discard(file);
            return Err(err);
        }
        Ok(file)
    }

    pub fn mount(&mut self, object: FsObjectRef, storage: StorageId) -> Result<(), FsError> {
        self.mount_with(object, storage, false)
    }

    /// Mounts the object, growing the storage by the shortfall if needed.
    pub fn force_mount(&mut self, object: FsObjectRef, storage: StorageId) -> Result<(), FsError> {
        self.mount_with(object, storage, true)
    }

    fn mount_with(&mut self, object: FsObjectRef, storage: StorageId, force: bool) -> Result<(), FsError> {
        self.server_mut(object.server)?.mount(storage, object.node, force)
    }

    pub fn unmount(&mut self, object: FsObjectRef) -> Result<(), FsError> {
        self.server_mut(object.server)?.unmount(object.node)
    }

    pub fn add_child(&mut self, parent: FsObjectRef, child: FsObjectRef) -> Result<AddChildOutcome, FsError> {
        self.add_child_with(parent, child, false)
    }

    pub fn force_add_child(&mut self, parent: FsObjectRef, child: FsObjectRef) -> Result<AddChildOutcome, FsError> {
        self.add_child_with(parent, child, true)
    }

    fn add_child_with(
        &mut self,
        parent: FsObjectRef,
        child: FsObjectRef,
        force: bool,
    ) -> Result<AddChildOutcome, FsError> {
        if parent.server != child.server {
            return Err(FsError::UnknownObject { server: child.server });
        }
        let manager = self.servers.get(&parent.server).ok_or(FsError::UnknownServer(parent.server))?;
        let attached = manager.tree().is_attached(parent.node);
        if attached {
            self.registry.unregister_subtree(parent.server, manager.tree(), parent.node);
        }
        let manager = self.servers.get_mut(&parent.server).ok_or(FsError::UnknownServer(parent.server))?;
        let outcome = manager.add_child(parent.node, child.node, force);
        if attached {
            self.registry.register_subtree(parent.server, manager.tree(), parent.node);
        }
        if let Ok(outcome) = outcome {
            debug!("server {}: add child -> {:?}", parent.server, outcome);
        }
        outcome
    }

    /// Removes an object with its whole subtree.
    pub fn remove_object(&mut self, object: FsObjectRef) -> Result<(), FsError> {
        let manager = self.servers.get_mut(&object.server).ok_or(FsError::UnknownServer(object.server))?;
        if manager.tree().node(object.node).is_none() {
            return Err(FsError::UnknownObject { server: object.server });
        }
        if object.node == manager.tree().root() {
            return Err(FsError::RootOperation("removed"));
        }
        if manager.tree().is_attached(object.node) {
            self.registry.unregister_subtree(object.server, manager.tree(), object.node);
        }
        manager.remove(object.node)?;
        Ok(())
    }

    pub fn rename_object(&mut self, object: FsObjectRef, name: &str) -> Result<(), FsError> {
        let manager = self.servers.get_mut(&object.server).ok_or(FsError::UnknownServer(object.server))?;
        let attached = manager.tree().is_attached(object.node);
        if attached {
            self.registry.unregister_subtree(object.server, manager.tree(), object.node);
        }
        let result = manager.rename(object.node, name);
        if attached {
            self.registry.register_subtree(object.server, manager.tree(), object.node);
        }
        result
    }

    pub fn resize_storage(&mut self, server: ServerId, storage: StorageId, capacity: ByteSize) -> Result<(), FsError> {
        self.server_mut(server)?.resize_storage(storage, capacity)
    }

    pub fn resize_to_fit(&mut self, file: FsObjectRef, size: ByteSize) -> Result<(), FsError> {
        self.server_mut(file.server)?.resize_to_fit(file.node, size, false)
    }

    /// Resizes a file, growing its storage by the shortfall if needed.
    pub fn force_resize_to_fit(&mut self, file: FsObjectRef, size: ByteSize) -> Result<(), FsError> {
        self.server_mut(file.server)?.resize_to_fit(file.node, size, true)
    }

    /// Moves files of one server to new storages, all or nothing.
    pub fn relocate(&mut self, server: ServerId, moves: &[(FsNodeId, StorageId)]) -> Result<(), FsError> {
        self.server_mut(server)?.relocate(moves)
    }

    pub fn record_access(&mut self, file: FsObjectRef) -> Result<(), FsError> {
        self.server_mut(file.server)?.record_access(file.node)
    }

    pub fn set_access_count(&mut self, file: FsObjectRef, count: u64) -> Result<(), FsError> {
        self.server_mut(file.server)?.set_access_count(file.node, count)
    }

    /// Drops a detached object without touching the registry.
    fn discard(&mut self, object: FsObjectRef) {
        if let Some(manager) = self.servers.get_mut(&object.server) {
            let _ = manager.remove(object.node);
        }
    }

    /// Registers directories created by `mkdirs` between `existing` (exclusive) and `last`.
    fn register_chain(&mut self, server: ServerId, existing: FsNodeId, last: FsNodeId) {
        let Some(manager) = self.servers.get(&server) else {
            return;
        };
        let tree = manager.tree();
        let mut current = Some(last);
        while let Some(node) = current.filter(|&node| node != existing) {
            self.registry.register(tree.path(node), FsObjectRef::new(server, node));
            current = tree.node(node).and_then(|node| node.parent());
        }
    }
}
