//! Description of a modeled system and the task plan run on it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use dfsim_dfs::{
    curve::Curve,
    dfs::DistributedFileSystem,
    error::FsError,
    replicas::{ReplicaManager, ReplicaTarget},
    storage::{StorageDevice, StorageId},
    units::ByteSize,
};

use crate::{
    task::{SimulationTask, TaskKind},
    topology::{NodeKind, Topology, TopologyError},
};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown node '{0}'")]
    UnknownNode(String),
    #[error("node '{0}' is not a server")]
    NotAServer(String),
    #[error("unknown storage '{storage}' on server '{server}'")]
    UnknownStorage { server: String, storage: String },
    #[error("no object at {path} on server '{server}'")]
    UnknownObject { server: String, path: String },
    #[error(transparent)]
    Topology(#[from] TopologyError),
    #[error(transparent)]
    Fs(#[from] FsError),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    pub name: String,
    pub capacity: ByteSize,
    /// Throughput in bytes per second.
    pub speed: Curve,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub storages: Vec<StorageConfig>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LinkConfig {
    pub from: String,
    pub to: String,
    /// Bandwidth in bytes per second.
    pub bandwidth: Curve,
    /// Latency in seconds.
    #[serde(default)]
    pub latency: f64,
}

/// Directory (created if missing) mounted on a storage of its server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MountConfig {
    pub server: String,
    pub path: String,
    pub storage: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FileConfig {
    pub server: String,
    pub path: String,
    pub size: ByteSize,
    /// Storage to mount the file on, otherwise it inherits the device of its directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReplicaTargetConfig {
    pub server: String,
    pub storage: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReplicaConfig {
    pub server: String,
    pub path: String,
    pub targets: Vec<ReplicaTargetConfig>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SystemConfig {
    pub nodes: Vec<NodeConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<LinkConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mounts: Vec<MountConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<FileConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub replicas: Vec<ReplicaConfig>,
}

/// Everything a simulation run mutates or reads.
#[derive(Clone, Debug)]
pub struct SystemModel {
    pub topology: Topology,
    pub dfs: DistributedFileSystem,
    pub replicas: ReplicaManager,
}

struct Names<'a> {
    topology: &'a Topology,
    storages: BTreeMap<(String, String), StorageId>,
}

impl Names<'_> {
    fn server(&self, name: &str) -> Result<u32, ConfigError> {
        let node = self
            .topology
            .node_by_name(name)
            .ok_or_else(|| ConfigError::UnknownNode(name.to_string()))?;
        if node.kind != NodeKind::Server {
            return Err(ConfigError::NotAServer(name.to_string()));
        }
        Ok(node.id)
    }

    fn storage(&self, server: &str, storage: &str) -> Result<StorageId, ConfigError> {
        self.storages
            .get(&(server.to_string(), storage.to_string()))
            .copied()
            .ok_or_else(|| ConfigError::UnknownStorage {
                server: server.to_string(),
                storage: storage.to_string(),
            })
    }
}

impl SystemConfig {
    /// Builds the topology, file systems and replicas.
    ///
    /// Nodes get ids in declaration order, server nodes share their id with their file system.
    /// Storage ids are assigned across all servers in declaration order. Mounts are applied before files.
    pub fn build(&self) -> Result<SystemModel, ConfigError> {
        let mut topology = Topology::new();
        let mut dfs = DistributedFileSystem::new();
        let mut storages = BTreeMap::new();
        let mut next_storage: StorageId = 0;
        for node in self.nodes.iter() {
            let id = topology.add_node(&node.name, node.kind)?;
            if node.kind != NodeKind::Server {
                continue;
            }
            dfs.add_server(id);
            for storage in node.storages.iter() {
                dfs.add_storage(
                    id,
                    StorageDevice::new(next_storage, &storage.name, storage.capacity, storage.speed.clone()),
                )?;
                storages.insert((node.name.clone(), storage.name.clone()), next_storage);
                next_storage += 1;
            }
        }
        for link in self.links.iter() {
            let from = topology
                .node_by_name(&link.from)
                .ok_or_else(|| ConfigError::UnknownNode(link.from.clone()))?
                .id;
            let to = topology
                .node_by_name(&link.to)
                .ok_or_else(|| ConfigError::UnknownNode(link.to.clone()))?
                .id;
            topology.add_link(from, to, link.bandwidth.clone(), link.latency)?;
        }

        let names = Names {
            topology: &topology,
            storages,
        };
        for mount in self.mounts.iter() {
            let server = names.server(&mount.server)?;
            let storage = names.storage(&mount.server, &mount.storage)?;
            let dir = dfs.mkdirs(server, &mount.path)?;
            dfs.mount(dir, storage)?;
        }
        for file in self.files.iter() {
            let server = names.server(&file.server)?;
            let storage = file
                .storage
                .as_ref()
                .map(|storage| names.storage(&file.server, storage))
                .transpose()?;
            dfs.create_file_at(server, &file.path, file.size, storage, false)?;
        }
        let mut replicas = ReplicaManager::new();
        for replica in self.replicas.iter() {
            let server = names.server(&replica.server)?;
            let primary = dfs.lookup(server, &replica.path).ok_or_else(|| ConfigError::UnknownObject {
                server: replica.server.clone(),
                path: replica.path.clone(),
            })?;
            let targets = replica
                .targets
                .iter()
                .map(|target| {
                    Ok(ReplicaTarget::new(
                        names.server(&target.server)?,
                        names.storage(&target.server, &target.storage)?,
                    ))
                })
                .collect::<Result<Vec<_>, ConfigError>>()?;
            replicas.replicate_file(&mut dfs, primary, &targets)?;
        }

        Ok(SystemModel {
            topology,
            dfs,
            replicas,
        })
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskConfig {
    pub kind: TaskKind,
    pub client: String,
    pub path: String,
    #[serde(default)]
    pub size: ByteSize,
}

/// Tasks in submission order.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TaskPlan {
    pub tasks: Vec<TaskConfig>,
}

impl TaskPlan {
    /// Resolves client names, tasks are numbered from zero.
    pub fn resolve(&self, topology: &Topology) -> Result<Vec<SimulationTask>, ConfigError> {
        self.tasks
            .iter()
            .enumerate()
            .map(|(id, task)| {
                let client = topology
                    .node_by_name(&task.client)
                    .ok_or_else(|| ConfigError::UnknownNode(task.client.clone()))?;
                Ok(SimulationTask {
                    id: id as u64,
                    kind: task.kind,
                    client: client.id,
                    path: task.path.clone(),
                    size: task.size,
                })
            })
            .collect()
    }
}
