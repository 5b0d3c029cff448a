//! Export and import of the model into a generic attributed tree.
//!
//! Objects are referenced by server and path, node handles are not preserved by a round trip.

use std::{collections::BTreeMap, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    curve::Curve,
    dfs::DistributedFileSystem,
    error::FsError,
    registry::FsObjectRef,
    replicas::{ReplicaManager, ReplicaTarget},
    storage::{ServerId, StorageDevice},
    units::ByteSize,
};

/// Node of an attributed tree.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Element {
    pub name: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    #[serde(default)]
    pub children: Vec<Element>,
}

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("unexpected element <{found}>, expected <{expected}>")]
    UnexpectedElement { expected: &'static str, found: String },
    #[error("element <{element}> has no attribute '{attribute}'")]
    MissingAttribute { element: String, attribute: &'static str },
    #[error("invalid value '{value}' of attribute '{attribute}' of <{element}>")]
    InvalidAttribute {
        element: String,
        attribute: &'static str,
        value: String,
    },
    #[error("no object {path} on server {server}")]
    UnknownObject { server: ServerId, path: String },
    #[error("unknown node '{0}'")]
    UnknownNode(String),
    #[error(transparent)]
    Fs(#[from] FsError),
}

impl Element {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn with_attr(mut self, key: &str, value: impl ToString) -> Self {
        self.attributes.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_child(mut self, child: Element) -> Self {
        self.children.push(child);
        self
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(|value| value.as_str())
    }

    pub fn expect_name(&self, expected: &'static str) -> Result<(), ImportError> {
        if self.name != expected {
            return Err(ImportError::UnexpectedElement {
                expected,
                found: self.name.clone(),
            });
        }
        Ok(())
    }

    pub fn required_attr(&self, key: &'static str) -> Result<&str, ImportError> {
        self.attr(key).ok_or_else(|| ImportError::MissingAttribute {
            element: self.name.clone(),
            attribute: key,
        })
    }

    pub fn parse_attr<T: FromStr>(&self, key: &'static str) -> Result<T, ImportError> {
        let value = self.required_attr(key)?;
        value.parse().map_err(|_| self.invalid(key, value))
    }

    pub fn parse_optional_attr<T: FromStr>(&self, key: &'static str) -> Result<Option<T>, ImportError> {
        match self.attr(key) {
            None => Ok(None),
            Some(value) => value.parse().map(Some).map_err(|_| self.invalid(key, value)),
        }
    }

    pub fn invalid(&self, key: &'static str, value: &str) -> ImportError {
        ImportError::InvalidAttribute {
            element: self.name.clone(),
            attribute: key,
            value: value.to_string(),
        }
    }
}

/// `5` for a constant, `0:5;10:2` for steps.
pub fn format_curve(curve: &Curve) -> String {
    match curve {
        Curve::Constant(value) => value.to_string(),
        Curve::Steps(points) => points
            .iter()
            .map(|point| format!("{}:{}", point.time, point.value))
            .collect::<Vec<_>>()
            .join(";"),
    }
}

pub fn parse_curve(value: &str) -> Option<Curve> {
    if !value.contains(':') {
        return value.trim().parse().ok().map(Curve::Constant);
    }
    let points = value
        .split(';')
        .map(|step| {
            let (time, value) = step.split_once(':')?;
            Some((time.trim().parse().ok()?, value.trim().parse().ok()?))
        })
        .collect::<Option<Vec<(f64, f64)>>>()?;
    Some(Curve::steps(points))
}

pub fn export_dfs(dfs: &DistributedFileSystem) -> Element {
    let mut result = Element::new("dfs");
    for server in dfs.servers() {
        let Ok(manager) = dfs.server(server) else {
            continue;
        };
        let mut element = Element::new("server").with_attr("id", server);
        for device in manager.storages() {
            element.children.push(
                Element::new("storage")
                    .with_attr("id", device.id())
                    .with_attr("name", device.name())
                    .with_attr("capacity", device.capacity().bytes())
                    .with_attr("speed", format_curve(device.speed_curve())),
            );
        }
        element.children.push(export_node(dfs, FsObjectRef::new(server, manager.tree().root())));
        result.children.push(element);
    }
    result
}

fn export_node(dfs: &DistributedFileSystem, object: FsObjectRef) -> Element {
    let Ok(node) = dfs.node(object) else {
        return Element::new("directory");
    };
    let mut element = if node.is_file() {
        Element::new("file")
            .with_attr("size", node.total_size().bytes())
            .with_attr("access_count", node.access_count())
    } else {
        Element::new("directory")
    };
    element = element.with_attr("name", node.name());
    if let Some(storage) = dfs.server(object.server).ok().and_then(|manager| manager.direct_mount(object.node)) {
        element = element.with_attr("mount", storage);
    }
    for child in dfs.children(object).unwrap_or_default() {
        element.children.push(export_node(dfs, child));
    }
    element
}

/// Rebuilds a file system from [export_dfs] output.
pub fn import_dfs(element: &Element) -> Result<DistributedFileSystem, ImportError> {
    element.expect_name("dfs")?;
    let mut dfs = DistributedFileSystem::new();
    for server_element in element.children.iter() {
        server_element.expect_name("server")?;
        let server: ServerId = server_element.parse_attr("id")?;
        dfs.add_server(server);
        let mut root = None;
        for child in server_element.children.iter() {
            match child.name.as_str() {
                "storage" => {
                    let speed = child.required_attr("speed")?;
                    let speed = parse_curve(speed).ok_or_else(|| child.invalid("speed", speed))?;
                    let device = StorageDevice::new(
                        child.parse_attr("id")?,
                        child.required_attr("name")?,
                        ByteSize::new(child.parse_attr("capacity")?),
                        speed,
                    );
                    dfs.add_storage(server, device)?;
                }
                "directory" if root.is_none() => root = Some(child),
                _ => {
                    return Err(ImportError::UnexpectedElement {
                        expected: "storage",
                        found: child.name.clone(),
                    })
                }
            }
        }
        let Some(root_element) = root else {
            continue;
        };
        let root = dfs.root(server)?;
        let mut mounts = Vec::new();
        for child in root_element.children.iter() {
            let object = import_node(&mut dfs, server, child, &mut mounts)?;
            dfs.add_child(root, object)?;
        }
        if let Some(storage) = root_element.parse_optional_attr("mount")? {
            mounts.push((root, storage));
        }
        // Post-order: every mount is charged only for the part of its subtree not mounted elsewhere.
        for (object, storage) in mounts {
            dfs.mount(object, storage)?;
        }
    }
    Ok(dfs)
}

fn import_node(
    dfs: &mut DistributedFileSystem,
    server: ServerId,
    element: &Element,
    mounts: &mut Vec<(FsObjectRef, u32)>,
) -> Result<FsObjectRef, ImportError> {
    let name = element.required_attr("name")?;
    let object = match element.name.as_str() {
        "file" => {
            let file = dfs.create_file(server, name, ByteSize::new(element.parse_attr("size")?))?;
            if let Some(count) = element.parse_optional_attr("access_count")? {
                dfs.set_access_count(file, count)?;
            }
            file
        }
        "directory" => {
            let dir = dfs.create_directory(server, name)?;
            for child in element.children.iter() {
                let object = import_node(dfs, server, child, mounts)?;
                dfs.add_child(dir, object)?;
            }
            dir
        }
        _ => {
            return Err(ImportError::UnexpectedElement {
                expected: "directory",
                found: element.name.clone(),
            })
        }
    };
    if let Some(storage) = element.parse_optional_attr("mount")? {
        mounts.push((object, storage));
    }
    Ok(object)
}

pub fn export_replicas(dfs: &DistributedFileSystem, replicas: &ReplicaManager) -> Element {
    let mut result = Element::new("replicas");
    for (primary, set) in replicas.replica_sets() {
        let Ok(path) = dfs.path(primary) else {
            continue;
        };
        let mut element = Element::new("replica_set")
            .with_attr("server", primary.server)
            .with_attr("path", path);
        for target in set.keys() {
            element.children.push(
                Element::new("replica")
                    .with_attr("server", target.server)
                    .with_attr("storage", target.storage),
            );
        }
        result.children.push(element);
    }
    result
}

/// Restores replica sets over an already imported file system. Replica files must exist.
pub fn import_replicas(element: &Element, dfs: &DistributedFileSystem) -> Result<ReplicaManager, ImportError> {
    element.expect_name("replicas")?;
    let mut replicas = ReplicaManager::new();
    for set in element.children.iter() {
        set.expect_name("replica_set")?;
        let server: ServerId = set.parse_attr("server")?;
        let path = set.required_attr("path")?;
        let primary = resolve(dfs, server, path)?;
        for replica in set.children.iter() {
            replica.expect_name("replica")?;
            let target = ReplicaTarget::new(replica.parse_attr("server")?, replica.parse_attr("storage")?);
            let instance = resolve(dfs, target.server, path)?;
            replicas.insert(primary, target, instance);
        }
    }
    Ok(replicas)
}

fn resolve(dfs: &DistributedFileSystem, server: ServerId, path: &str) -> Result<FsObjectRef, ImportError> {
    dfs.lookup(server, path).ok_or_else(|| ImportError::UnknownObject {
        server,
        path: path.to_string(),
    })
}
