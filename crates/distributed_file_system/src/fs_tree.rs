//! Filesystem tree of a single server.
//!
//! Nodes live in an arena and are addressed by [FsNodeId] handles. Parents own their children by name,
//! children keep a plain handle of their parent. Handles are never reused after a node is freed.
//!
//! Every directory caches two aggregates:
//! * total size --- sum of sizes of all descendant files;
//! * mount size --- sum of mount sizes of direct children that inherit the directory mount device.
//!
//! The cache of a directory is recomputed from its children when its child set changes and the
//! difference is pushed to the ancestors. File resizes and mount flag flips are pushed as deltas.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{error::FsError, storage::StorageId, units::ByteSize};

/// Handle of a node in [FsTree].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FsNodeId(usize);

impl FsNodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Clone, Debug)]
enum FsNodeKind {
    Directory {
        children: BTreeMap<String, FsNodeId>,
        total_size: u64,
        mount_size: u64,
    },
    File {
        size: u64,
        access_count: u64,
    },
}

/// Directory or file.
#[derive(Clone, Debug)]
pub struct FsNode {
    name: String,
    parent: Option<FsNodeId>,
    inherits_mount: bool,
    mount_device: Option<StorageId>,
    kind: FsNodeKind,
}

impl FsNode {
    fn new(name: &str, kind: FsNodeKind) -> Self {
        Self {
            name: name.to_string(),
            parent: None,
            inherits_mount: true,
            mount_device: None,
            kind,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<FsNodeId> {
        self.parent
    }

    /// `false` if the node is explicitly mounted, `true` if it uses the device of an ancestor.
    pub fn inherits_mount(&self) -> bool {
        self.inherits_mount
    }

    /// Resolved mount device, either explicit or inherited.
    pub fn mount_device(&self) -> Option<StorageId> {
        self.mount_device
    }

    pub fn is_directory(&self) -> bool {
        matches!(self.kind, FsNodeKind::Directory { .. })
    }

    pub fn is_file(&self) -> bool {
        matches!(self.kind, FsNodeKind::File { .. })
    }

    /// Size of a file or sum of all descendant file sizes of a directory.
    pub fn total_size(&self) -> ByteSize {
        match self.kind {
            FsNodeKind::Directory { total_size, .. } => ByteSize::new(total_size),
            FsNodeKind::File { size, .. } => ByteSize::new(size),
        }
    }

    /// Bytes the node occupies on its mount device together with descendants inheriting the device.
    pub fn mount_size(&self) -> ByteSize {
        match self.kind {
            FsNodeKind::Directory { mount_size, .. } => ByteSize::new(mount_size),
            FsNodeKind::File { size, .. } => ByteSize::new(size),
        }
    }

    pub fn access_count(&self) -> u64 {
        match self.kind {
            FsNodeKind::Directory { .. } => 0,
            FsNodeKind::File { access_count, .. } => access_count,
        }
    }
}

/// Splits a path into non-empty components.
pub fn split_path(path: &str) -> Vec<&str> {
    path.split('/').filter(|part| !part.is_empty()).collect()
}

/// Canonical form of a path: `/a/b`, the root is `/`.
pub fn normalize_path(path: &str) -> String {
    format!("/{}", split_path(path).join("/"))
}

/// Splits a path into its parent path and last component.
pub fn parent_and_name(path: &str) -> Option<(String, &str)> {
    let mut parts = split_path(path);
    let name = parts.pop()?;
    Some((format!("/{}", parts.join("/")), name))
}

fn validate_name(name: &str) -> Result<(), FsError> {
    if name.is_empty() || name.contains('/') {
        return Err(FsError::InvalidPath(name.to_string()));
    }
    Ok(())
}

/// Arena of filesystem nodes with a single root directory.
#[derive(Clone, Debug)]
pub struct FsTree {
    nodes: Vec<Option<FsNode>>,
    root: FsNodeId,
}

impl Default for FsTree {
    fn default() -> Self {
        Self::new()
    }
}

impl FsTree {
    pub fn new() -> Self {
        let root = FsNode::new(
            "",
            FsNodeKind::Directory {
                children: BTreeMap::new(),
                total_size: 0,
                mount_size: 0,
            },
        );
        Self {
            nodes: vec![Some(root)],
            root: FsNodeId(0),
        }
    }

    pub fn root(&self) -> FsNodeId {
        self.root
    }

    pub fn node(&self, id: FsNodeId) -> Option<&FsNode> {
        self.nodes.get(id.0).and_then(|node| node.as_ref())
    }

    pub fn contains(&self, id: FsNodeId) -> bool {
        self.node(id).is_some()
    }

    // Handles passed to the crate-internal mutators are validated by the callers.
    fn get(&self, id: FsNodeId) -> &FsNode {
        self.nodes[id.0].as_ref().expect("stale filesystem node handle")
    }

    fn get_mut(&mut self, id: FsNodeId) -> &mut FsNode {
        self.nodes[id.0].as_mut().expect("stale filesystem node handle")
    }

    /// Whether the node is reachable from the root.
    pub fn is_attached(&self, id: FsNodeId) -> bool {
        if !self.contains(id) {
            return false;
        }
        let mut current = id;
        while let Some(parent) = self.get(current).parent {
            current = parent;
        }
        current == self.root
    }

    pub(crate) fn create_directory(&mut self, name: &str) -> Result<FsNodeId, FsError> {
        validate_name(name)?;
        Ok(self.push(FsNode::new(
            name,
            FsNodeKind::Directory {
                children: BTreeMap::new(),
                total_size: 0,
                mount_size: 0,
            },
        )))
    }

    pub(crate) fn create_file(&mut self, name: &str, size: ByteSize) -> Result<FsNodeId, FsError> {
        validate_name(name)?;
        Ok(self.push(FsNode::new(
            name,
            FsNodeKind::File {
                size: size.bytes(),
                access_count: 0,
            },
        )))
    }

    fn push(&mut self, node: FsNode) -> FsNodeId {
        self.nodes.push(Some(node));
        FsNodeId(self.nodes.len() - 1)
    }

    /// Children of a directory in name order, empty for files.
    pub fn children(&self, dir: FsNodeId) -> Vec<FsNodeId> {
        match self.node(dir).map(|node| &node.kind) {
            Some(FsNodeKind::Directory { children, .. }) => children.values().copied().collect(),
            _ => Vec::new(),
        }
    }

    pub fn child(&self, dir: FsNodeId, name: &str) -> Option<FsNodeId> {
        match &self.node(dir)?.kind {
            FsNodeKind::Directory { children, .. } => children.get(name).copied(),
            FsNodeKind::File { .. } => None,
        }
    }

    /// Full path of a node. Nodes of a detached subtree get a path relative to the subtree top.
    pub fn path(&self, id: FsNodeId) -> String {
        let mut parts = Vec::new();
        let mut current = Some(id);
        while let Some(node_id) = current {
            let node = self.get(node_id);
            if node_id != self.root {
                parts.push(node.name.as_str());
            }
            current = node.parent;
        }
        parts.reverse();
        format!("/{}", parts.join("/"))
    }

    /// Path a child named `name` of `dir` has or would have.
    pub fn child_path(&self, dir: FsNodeId, name: &str) -> String {
        let base = self.path(dir);
        if base == "/" {
            format!("/{name}")
        } else {
            format!("{base}/{name}")
        }
    }

    pub fn lookup(&self, path: &str) -> Option<FsNodeId> {
        split_path(path)
            .into_iter()
            .try_fold(self.root, |dir, name| self.child(dir, name))
    }

    /// Deepest existing node on the way to `path` and the number of matched components.
    pub fn deepest_existing(&self, path: &str) -> (FsNodeId, usize) {
        let mut current = self.root;
        let mut matched = 0;
        for name in split_path(path) {
            match self.child(current, name) {
                Some(child) => {
                    current = child;
                    matched += 1;
                }
                None => break,
            }
        }
        (current, matched)
    }

    /// The node and all of its descendants in pre-order.
    pub fn descendants(&self, id: FsNodeId) -> Vec<FsNodeId> {
        let mut result = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            result.push(current);
            stack.extend(self.children(current).into_iter().rev());
        }
        result
    }

    /// Files of the subtree in pre-order.
    pub fn files(&self, id: FsNodeId) -> Vec<FsNodeId> {
        self.descendants(id)
            .into_iter()
            .filter(|&node| self.get(node).is_file())
            .collect()
    }

    /// Descendants that would newly inherit a mount if `id` were mounted.
    ///
    /// Children with a mount of their own are skipped together with their subtrees.
    pub fn mountable_hierarchy(&self, id: FsNodeId) -> Vec<FsNodeId> {
        let mut result = Vec::new();
        let mut stack = self.children(id);
        stack.reverse();
        while let Some(current) = stack.pop() {
            if !self.get(current).inherits_mount {
                continue;
            }
            result.push(current);
            stack.extend(self.children(current).into_iter().rev());
        }
        result
    }

    pub(crate) fn attach(&mut self, parent: FsNodeId, child: FsNodeId) -> Result<(), FsError> {
        if !self.get(parent).is_directory() {
            return Err(FsError::NotADirectory { path: self.path(parent) });
        }
        if child == self.root || self.get(child).parent.is_some() {
            return Err(FsError::InvalidPath(self.path(child)));
        }
        let mut ancestor = Some(parent);
        while let Some(current) = ancestor {
            if current == child {
                return Err(FsError::InvalidPath(self.path(child)));
            }
            ancestor = self.get(current).parent;
        }
        let name = self.get(child).name.clone();
        if self.child(parent, &name).is_some() {
            return Err(FsError::NameCollision {
                path: self.child_path(parent, &name),
            });
        }
        if let FsNodeKind::Directory { children, .. } = &mut self.get_mut(parent).kind {
            children.insert(name, child);
        }
        self.get_mut(child).parent = Some(parent);
        if self.get(child).inherits_mount {
            let device = self.get(parent).mount_device;
            self.propagate_mount_device(child, device);
        }
        let (d_total, d_mount) = self.recompute(parent);
        self.propagate(parent, d_total, d_mount);
        Ok(())
    }

    pub(crate) fn detach(&mut self, child: FsNodeId) -> Result<FsNodeId, FsError> {
        let parent = self.get(child).parent.ok_or(FsError::Detached)?;
        let name = self.get(child).name.clone();
        if let FsNodeKind::Directory { children, .. } = &mut self.get_mut(parent).kind {
            children.remove(&name);
        }
        self.get_mut(child).parent = None;
        if self.get(child).inherits_mount {
            self.propagate_mount_device(child, None);
        }
        let (d_total, d_mount) = self.recompute(parent);
        self.propagate(parent, d_total, d_mount);
        Ok(parent)
    }

    /// Frees a detached subtree and returns the freed handles.
    pub(crate) fn free_subtree(&mut self, id: FsNodeId) -> Vec<FsNodeId> {
        let freed = self.descendants(id);
        for &node in freed.iter() {
            self.nodes[node.0] = None;
        }
        freed
    }

    pub(crate) fn rename(&mut self, id: FsNodeId, new_name: &str) -> Result<(), FsError> {
        validate_name(new_name)?;
        if id == self.root {
            return Err(FsError::RootOperation("renamed"));
        }
        let old_name = self.get(id).name.clone();
        if old_name == new_name {
            return Ok(());
        }
        if let Some(parent) = self.get(id).parent {
            if let Some(existing) = self.child(parent, new_name) {
                return Err(FsError::NameCollision { path: self.path(existing) });
            }
            if let FsNodeKind::Directory { children, .. } = &mut self.get_mut(parent).kind {
                children.remove(&old_name);
                children.insert(new_name.to_string(), id);
            }
        }
        self.get_mut(id).name = new_name.to_string();
        Ok(())
    }

    pub(crate) fn set_file_size(&mut self, id: FsNodeId, new_size: ByteSize) {
        let delta = match &mut self.get_mut(id).kind {
            FsNodeKind::File { size, .. } => {
                let delta = new_size.bytes() as i64 - *size as i64;
                *size = new_size.bytes();
                delta
            }
            FsNodeKind::Directory { .. } => return,
        };
        self.propagate(id, delta, delta);
    }

    pub(crate) fn record_access(&mut self, id: FsNodeId) {
        if let FsNodeKind::File { access_count, .. } = &mut self.get_mut(id).kind {
            *access_count += 1;
        }
    }

    pub(crate) fn set_access_count(&mut self, id: FsNodeId, count: u64) {
        if let FsNodeKind::File { access_count, .. } = &mut self.get_mut(id).kind {
            *access_count = count;
        }
    }

    /// Flips the inheritance flag and patches the parent's mount size.
    pub(crate) fn set_inherits_mount(&mut self, id: FsNodeId, inherits: bool) {
        if self.get(id).inherits_mount == inherits {
            return;
        }
        self.get_mut(id).inherits_mount = inherits;
        let Some(parent) = self.get(id).parent else {
            return;
        };
        let own = self.get(id).mount_size().bytes() as i64;
        let delta = if inherits { own } else { -own };
        if let FsNodeKind::Directory { mount_size, .. } = &mut self.get_mut(parent).kind {
            *mount_size = mount_size.saturating_add_signed(delta);
        }
        self.propagate(parent, 0, delta);
    }

    /// Sets the device of `id` and of every descendant still inheriting it.
    pub(crate) fn propagate_mount_device(&mut self, id: FsNodeId, device: Option<StorageId>) {
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            self.get_mut(current).mount_device = device;
            stack.extend(
                self.children(current)
                    .into_iter()
                    .filter(|&child| self.get(child).inherits_mount),
            );
        }
    }

    /// Recomputes the aggregates of a directory from its direct children, returns the change.
    fn recompute(&mut self, dir: FsNodeId) -> (i64, i64) {
        let (total, mount) = self
            .children(dir)
            .into_iter()
            .map(|child| self.get(child))
            .fold((0u64, 0u64), |(total, mount), child| {
                let inherited = if child.inherits_mount {
                    child.mount_size().bytes()
                } else {
                    0
                };
                (total + child.total_size().bytes(), mount + inherited)
            });
        match &mut self.get_mut(dir).kind {
            FsNodeKind::Directory {
                total_size, mount_size, ..
            } => {
                let delta = (total as i64 - *total_size as i64, mount as i64 - *mount_size as i64);
                *total_size = total;
                *mount_size = mount;
                delta
            }
            FsNodeKind::File { .. } => (0, 0),
        }
    }

    /// Pushes a change of the aggregates of `from` to all of its ancestors.
    fn propagate(&mut self, from: FsNodeId, mut d_total: i64, mut d_mount: i64) {
        let mut child = from;
        while d_total != 0 || d_mount != 0 {
            let Some(parent) = self.get(child).parent else {
                break;
            };
            if !self.get(child).inherits_mount {
                d_mount = 0;
            }
            if let FsNodeKind::Directory {
                total_size, mount_size, ..
            } = &mut self.get_mut(parent).kind
            {
                *total_size = total_size.saturating_add_signed(d_total);
                *mount_size = mount_size.saturating_add_signed(d_mount);
            }
            child = parent;
        }
    }
}
