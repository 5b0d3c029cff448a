//! Registry of filesystem object instances by path.
//!
//! The same logical path may exist on several servers as distinct object instances (replicas, upload targets),
//! so each path maps to the set of `(server, node)` pairs currently holding it.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::{
    fs_tree::{FsNodeId, FsTree},
    storage::ServerId,
};

/// Instance of a filesystem object on a particular server.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FsObjectRef {
    pub server: ServerId,
    pub node: FsNodeId,
}

impl FsObjectRef {
    pub fn new(server: ServerId, node: FsNodeId) -> Self {
        Self { server, node }
    }
}

/// Map from canonical full path to the instances sharing it.
#[derive(Clone, Debug, Default)]
pub struct ObjectRegistry {
    entries: BTreeMap<String, BTreeSet<FsObjectRef>>,
}

impl ObjectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, path: String, object: FsObjectRef) {
        self.entries.entry(path).or_default().insert(object);
    }

    /// Removes an instance, pruning the path once no instance is left.
    pub fn unregister(&mut self, path: &str, object: FsObjectRef) {
        if let Some(members) = self.entries.get_mut(path) {
            members.remove(&object);
            if members.is_empty() {
                self.entries.remove(path);
            }
        }
    }

    pub fn instances(&self, path: &str) -> impl Iterator<Item = FsObjectRef> + '_ {
        self.entries.get(path).into_iter().flat_map(|members| members.iter().copied())
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(|path| path.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn register_subtree(&mut self, server: ServerId, tree: &FsTree, node: FsNodeId) {
        for id in tree.descendants(node) {
            self.register(tree.path(id), FsObjectRef::new(server, id));
        }
    }

    pub(crate) fn unregister_subtree(&mut self, server: ServerId, tree: &FsTree, node: FsNodeId) {
        for id in tree.descendants(node) {
            self.unregister(&tree.path(id), FsObjectRef::new(server, id));
        }
    }
}
