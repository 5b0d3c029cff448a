//! Network topology: clients, servers and routers joined by links.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use dfsim_dfs::{curve::Curve, units::ByteSpeed};

/// Node id. Server nodes use the same id as their file system server.
pub type NodeId = u32;
pub type LinkId = usize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    Client,
    Server,
    Router,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    pub kind: NodeKind,
}

/// Bidirectional link.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub id: LinkId,
    pub a: NodeId,
    pub b: NodeId,
    /// Bandwidth in bytes per second over simulated time. Zero means the link is down.
    pub bandwidth: Curve,
    /// Latency in seconds.
    pub latency: f64,
}

impl Link {
    /// The end of the link opposite to `node`.
    pub fn other(&self, node: NodeId) -> NodeId {
        if self.a == node {
            self.b
        } else {
            self.a
        }
    }

    pub fn bandwidth_at(&self, time: f64) -> ByteSpeed {
        ByteSpeed::new(self.bandwidth.value_at(time).max(0.))
    }

    pub fn is_up(&self, time: f64) -> bool {
        self.bandwidth_at(time).bytes_per_second() > 0.
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum TopologyError {
    #[error("node '{0}' already exists")]
    DuplicateNode(String),
    #[error("unknown node {0}")]
    UnknownNode(NodeId),
}

#[derive(Clone, Debug, Default)]
pub struct Topology {
    nodes: BTreeMap<NodeId, Node>,
    by_name: BTreeMap<String, NodeId>,
    links: Vec<Link>,
    adjacency: BTreeMap<NodeId, Vec<LinkId>>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node with the next free id.
    pub fn add_node(&mut self, name: &str, kind: NodeKind) -> Result<NodeId, TopologyError> {
        let id = self.nodes.keys().next_back().map(|&id| id + 1).unwrap_or(0);
        self.add_node_with_id(id, name, kind)?;
        Ok(id)
    }

    pub fn add_node_with_id(&mut self, id: NodeId, name: &str, kind: NodeKind) -> Result<(), TopologyError> {
        if self.by_name.contains_key(name) || self.nodes.contains_key(&id) {
            return Err(TopologyError::DuplicateNode(name.to_string()));
        }
        self.nodes.insert(
            id,
            Node {
                id,
                name: name.to_string(),
                kind,
            },
        );
        self.by_name.insert(name.to_string(), id);
        self.adjacency.insert(id, Vec::new());
        Ok(())
    }

    pub fn add_link(&mut self, a: NodeId, b: NodeId, bandwidth: Curve, latency: f64) -> Result<LinkId, TopologyError> {
        for node in [a, b] {
            if !self.nodes.contains_key(&node) {
                return Err(TopologyError::UnknownNode(node));
            }
        }
        let id = self.links.len();
        self.links.push(Link {
            id,
            a,
            b,
            bandwidth,
            latency,
        });
        self.adjacency.entry(a).or_default().push(id);
        if a != b {
            self.adjacency.entry(b).or_default().push(id);
        }
        Ok(id)
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn node_by_name(&self, name: &str) -> Option<&Node> {
        self.by_name.get(name).and_then(|id| self.nodes.get(id))
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.keys().copied()
    }

    pub fn is_kind(&self, id: NodeId, kind: NodeKind) -> bool {
        self.nodes.get(&id).is_some_and(|node| node.kind == kind)
    }

    pub fn servers(&self) -> Vec<NodeId> {
        self.of_kind(NodeKind::Server)
    }

    pub fn clients(&self) -> Vec<NodeId> {
        self.of_kind(NodeKind::Client)
    }

    fn of_kind(&self, kind: NodeKind) -> Vec<NodeId> {
        self.nodes
            .values()
            .filter(|node| node.kind == kind)
            .map(|node| node.id)
            .collect()
    }

    pub fn link(&self, id: LinkId) -> Option<&Link> {
        self.links.get(id)
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    /// Links of a node in id order.
    pub fn neighbours(&self, node: NodeId) -> impl Iterator<Item = &Link> {
        self.adjacency
            .get(&node)
            .into_iter()
            .flatten()
            .filter_map(|&id| self.links.get(id))
    }
}

/// Creates tree topology with `star_count` racks with `hosts_per_star` servers and one client on each one.
/// * `downlink_bw` corresponds to a link bandwidth between rack switch and each node.
/// * `latency` is the latency of every link.
pub fn make_tree_topology(
    star_count: usize,
    hosts_per_star: usize,
    downlink_bw: f64,
    latency: f64,
) -> Result<Topology, TopologyError> {
    let mut topology = Topology::new();
    let root_switch = topology.add_node("root_switch", NodeKind::Router)?;
    for i in 0..star_count {
        let switch = topology.add_node(&format!("switch_{}", i), NodeKind::Router)?;
        topology.add_link(
            root_switch,
            switch,
            Curve::Constant(downlink_bw * (hosts_per_star + 1) as f64),
            latency,
        )?;
        for j in 0..hosts_per_star {
            let host = topology.add_node(&format!("host_{}_{}", i, j), NodeKind::Server)?;
            topology.add_link(host, switch, Curve::Constant(downlink_bw), latency)?;
        }
        let client = topology.add_node(&format!("client_{}", i), NodeKind::Client)?;
        topology.add_link(client, switch, Curve::Constant(downlink_bw), latency)?;
    }
    Ok(topology)
}
