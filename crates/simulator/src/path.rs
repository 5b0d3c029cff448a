//! Path search from a client to the server holding (or receiving) a file.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use dfsim_dfs::{
    fs_tree::{normalize_path, parent_and_name},
    registry::FsObjectRef,
    storage::{ServerId, StorageId},
    units::ByteSpeed,
};

use crate::{
    metric::{CandidateTarget, GraphMetric, MetricContext, MetricQuery, Weight},
    task::{SimulationTask, TaskKind, TaskState},
    topology::{LinkId, NodeId, NodeKind, Topology},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("client has no links")]
    NoNeighboursAvailable,
    #[error("no server is reachable")]
    NoPathAvailable,
    #[error("object does not exist")]
    ObjectNotFound,
    #[error("object is not mounted")]
    NotMounted,
}

impl From<PathError> for TaskState {
    fn from(err: PathError) -> Self {
        match err {
            PathError::NoNeighboursAvailable => TaskState::NoNeighboursAvailable,
            PathError::NoPathAvailable => TaskState::NoPathAvailable,
            PathError::ObjectNotFound => TaskState::ObjectNotFound,
            PathError::NotMounted => TaskState::NotMounted,
        }
    }
}

/// Route from a client to a storage of a server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DfsPath {
    /// Nodes from the client to the server.
    pub nodes: Vec<NodeId>,
    pub links: Vec<LinkId>,
    pub server: ServerId,
    pub storage: StorageId,
    /// File instance the path leads to, if it exists.
    pub file: Option<FsObjectRef>,
    pub weight: Weight,
}

impl PartialEq for DfsPath {
    fn eq(&self, other: &Self) -> bool {
        self.nodes == other.nodes
            && self.links == other.links
            && self.server == other.server
            && self.storage == other.storage
    }
}

impl DfsPath {
    pub fn latency(&self, topology: &Topology) -> f64 {
        self.links
            .iter()
            .filter_map(|&id| topology.link(id))
            .map(|link| link.latency)
            .sum()
    }

    /// Bottleneck bandwidth of the links at `time`.
    pub fn bandwidth(&self, topology: &Topology, time: f64) -> ByteSpeed {
        self.links
            .iter()
            .map(|&id| {
                topology
                    .link(id)
                    .map(|link| link.bandwidth_at(time))
                    .unwrap_or(ByteSpeed::ZERO)
            })
            .fold(ByteSpeed::INFINITE, ByteSpeed::min)
    }
}

struct Candidate {
    target: CandidateTarget,
    transfer_size: f64,
}

pub struct DfsPathPicker {
    metric: Box<dyn GraphMetric>,
}

impl DfsPathPicker {
    pub fn new(metric: Box<dyn GraphMetric>) -> Self {
        Self { metric }
    }

    pub fn metric(&self) -> &dyn GraphMetric {
        self.metric.as_ref()
    }

    /// Picks the best path for `task` under the metric.
    ///
    /// `fixed_target` pins the destination server and storage, only the route may change.
    pub fn select_path(
        &self,
        topology: &Topology,
        ctx: &MetricContext,
        task: &SimulationTask,
        fixed_target: Option<(ServerId, StorageId)>,
    ) -> Result<DfsPath, PathError> {
        if topology.neighbours(task.client).next().is_none() {
            return Err(PathError::NoNeighboursAvailable);
        }
        let candidates = match task.kind {
            TaskKind::Get => self.get_candidates(topology, ctx, task)?,
            TaskKind::Put => self.put_candidates(topology, ctx, task, fixed_target)?,
        };

        let mut best: Option<DfsPath> = None;
        for candidate in candidates {
            let disk = self.metric.possible_disk_bandwidth(ctx, &candidate.target);
            let query = MetricQuery {
                transfer_size: candidate.transfer_size,
                disk_bandwidth: disk.bytes_per_second(),
                time: ctx.time,
            };
            let Some((nodes, links, weight)) = self.search(topology, task.client, candidate.target.server, &query) else {
                continue;
            };
            let better = match &best {
                None => true,
                Some(current) => self.metric.compare(&weight, &current.weight).is_lt(),
            };
            if better {
                best = Some(DfsPath {
                    nodes,
                    links,
                    server: candidate.target.server,
                    storage: candidate.target.storage,
                    file: candidate.target.file,
                    weight,
                });
            }
        }
        best.ok_or(PathError::NoPathAvailable)
    }

    fn get_candidates(
        &self,
        topology: &Topology,
        ctx: &MetricContext,
        task: &SimulationTask,
    ) -> Result<Vec<Candidate>, PathError> {
        let path = normalize_path(&task.path);
        let files = ctx
            .dfs
            .instances(&path)
            .filter(|&object| topology.is_kind(object.server, NodeKind::Server))
            .filter(|&object| ctx.dfs.node(object).is_ok_and(|node| node.is_file()))
            .collect::<Vec<_>>();
        if files.is_empty() {
            return Err(PathError::ObjectNotFound);
        }
        let candidates = files
            .into_iter()
            .filter_map(|file| {
                let storage = ctx.dfs.effective_mount_device(file).ok().flatten()?;
                let size = ctx.dfs.file_size(file).ok()?;
                Some(Candidate {
                    target: CandidateTarget {
                        server: file.server,
                        storage,
                        file: Some(file),
                    },
                    transfer_size: size.bytes() as f64,
                })
            })
            .collect::<Vec<_>>();
        if candidates.is_empty() {
            return Err(PathError::NotMounted);
        }
        Ok(candidates)
    }

    fn put_candidates(
        &self,
        topology: &Topology,
        ctx: &MetricContext,
        task: &SimulationTask,
        fixed_target: Option<(ServerId, StorageId)>,
    ) -> Result<Vec<Candidate>, PathError> {
        let path = normalize_path(&task.path);
        let (parent_path, _) = parent_and_name(&path).ok_or(PathError::ObjectNotFound)?;
        let servers = topology
            .servers()
            .into_iter()
            .filter(|&server| ctx.dfs.has_server(server))
            .filter(|&server| fixed_target.map_or(true, |(fixed, _)| fixed == server))
            .collect::<Vec<_>>();

        // Overwriting goes to the primary instances of an existing file.
        let existing = servers
            .iter()
            .filter_map(|&server| ctx.dfs.lookup(server, &path))
            .filter(|&object| ctx.dfs.node(object).is_ok_and(|node| node.is_file()))
            .filter(|&object| !ctx.replicas.is_replica(object))
            .map(|object| (object, Some(object)))
            .collect::<Vec<_>>();
        let anchors = if existing.is_empty() {
            servers
                .iter()
                .filter_map(|&server| ctx.dfs.lookup(server, &parent_path))
                .filter(|&object| ctx.dfs.node(object).is_ok_and(|node| node.is_directory()))
                .filter(|&object| ctx.dfs.lookup(object.server, &path).is_none())
                .map(|object| (object, None))
                .collect::<Vec<_>>()
        } else {
            existing
        };
        if anchors.is_empty() {
            return Err(PathError::ObjectNotFound);
        }

        let mut targets = BTreeSet::new();
        let candidates = anchors
            .into_iter()
            .filter_map(|(anchor, file)| {
                let storage = match fixed_target {
                    Some((_, storage)) => storage,
                    None => ctx.dfs.effective_mount_device(anchor).ok().flatten()?,
                };
                targets.insert((anchor.server, storage)).then_some(Candidate {
                    target: CandidateTarget {
                        server: anchor.server,
                        storage,
                        file,
                    },
                    transfer_size: task.size.bytes() as f64,
                })
            })
            .collect::<Vec<_>>();
        if candidates.is_empty() {
            return Err(PathError::NotMounted);
        }
        Ok(candidates)
    }

    /// Dijkstra search from `source` to `target`, returns nodes, links and weight of the best path.
    ///
    /// Nodes with equal weights are settled in id order and a node keeps the first link that reached it,
    /// so the result depends only on the topology and the query. Clients other than `source` are not
    /// used for transit, links which are down at the query time are skipped.
    fn search(
        &self,
        topology: &Topology,
        source: NodeId,
        target: NodeId,
        query: &MetricQuery,
    ) -> Option<(Vec<NodeId>, Vec<LinkId>, Weight)> {
        let worst = self.metric.worst();
        let mut dist: BTreeMap<NodeId, Weight> = topology.node_ids().map(|id| (id, worst)).collect();
        let mut prev: BTreeMap<NodeId, (NodeId, LinkId)> = BTreeMap::new();
        let mut settled: BTreeSet<NodeId> = BTreeSet::new();
        dist.insert(source, self.metric.best(query));

        loop {
            let mut current: Option<(NodeId, Weight)> = None;
            for (&id, weight) in dist.iter() {
                if settled.contains(&id) || !self.metric.compare(weight, &worst).is_lt() {
                    continue;
                }
                if current.map_or(true, |(_, best)| self.metric.compare(weight, &best).is_lt()) {
                    current = Some((id, *weight));
                }
            }
            let Some((node, weight)) = current else {
                break;
            };
            if node == target {
                break;
            }
            settled.insert(node);
            if node != source && topology.is_kind(node, NodeKind::Client) {
                continue;
            }
            for link in topology.neighbours(node) {
                if !link.is_up(query.time) {
                    continue;
                }
                let next = link.other(node);
                if settled.contains(&next) {
                    continue;
                }
                let edge = self.metric.edge_weight(link, query);
                let candidate = self.metric.combine(&weight, edge, link, query);
                let known = dist.get(&next).copied().unwrap_or(worst);
                if self.metric.compare(&candidate, &known).is_lt() {
                    dist.insert(next, candidate);
                    prev.insert(next, (node, link.id));
                }
            }
        }

        let weight = *dist.get(&target)?;
        if target == source || !self.metric.compare(&weight, &worst).is_lt() {
            return None;
        }
        let mut nodes = vec![target];
        let mut links = Vec::new();
        let mut current = target;
        while let Some(&(from, link)) = prev.get(&current) {
            nodes.push(from);
            links.push(link);
            current = from;
        }
        nodes.reverse();
        links.reverse();
        Some((nodes, links, weight))
    }
}
