//! Trait for a path metric.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use dfsim_dfs::{
    dfs::DistributedFileSystem,
    registry::FsObjectRef,
    replicas::ReplicaManager,
    storage::{ServerId, StorageId},
    units::ByteSpeed,
};

use crate::{
    planner::HierarchicalPlanner,
    storage_ops::{OperationId, StorageOperations},
    topology::Link,
};

/// Weight of a path prefix.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Weight {
    /// Value compared by the metric.
    pub value: f64,
    /// Smallest link bandwidth on the prefix, bytes per second.
    pub bottleneck: f64,
    /// Sum of link latencies on the prefix, seconds.
    pub latency: f64,
}

impl Weight {
    pub fn new(value: f64) -> Self {
        Self {
            value,
            bottleneck: f64::INFINITY,
            latency: 0.,
        }
    }
}

/// Parameters of a single path search.
#[derive(Clone, Copy, Debug)]
pub struct MetricQuery {
    /// Bytes to transfer.
    pub transfer_size: f64,
    /// Share of the candidate storage, bytes per second.
    pub disk_bandwidth: f64,
    pub time: f64,
}

/// Server and storage a path may end at.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CandidateTarget {
    pub server: ServerId,
    pub storage: StorageId,
    /// Existing file instance the transfer would touch.
    pub file: Option<FsObjectRef>,
}

/// State of the model a metric may look at.
pub struct MetricContext<'a> {
    pub dfs: &'a DistributedFileSystem,
    pub replicas: &'a ReplicaManager,
    pub storage_ops: &'a StorageOperations,
    pub planner: Option<&'a dyn HierarchicalPlanner>,
    pub time: f64,
    /// Operation of the transfer being re-routed, not counted when sharing storages.
    pub exclude_operation: Option<OperationId>,
}

/// Trait for a metric used by the path search.
///
/// Path weights are built from [best](GraphMetric::best) at the client by [combine](GraphMetric::combine)
/// and must never get better along a path.
pub trait GraphMetric {
    fn name(&self) -> &'static str;

    fn edge_weight(&self, link: &Link, query: &MetricQuery) -> f64;

    /// Weight of a path extended by `link`, given the weight of the prefix and the edge weight of `link`.
    fn combine(&self, to_here: &Weight, edge: f64, link: &Link, query: &MetricQuery) -> Weight;

    /// Total order on weights, `Less` means `a` is better.
    fn compare(&self, a: &Weight, b: &Weight) -> Ordering;

    /// Weight of the empty path.
    fn best(&self, query: &MetricQuery) -> Weight;

    /// Weight of an unreachable node.
    fn worst(&self) -> Weight;

    /// Storage bandwidth a transfer to `target` would get.
    fn possible_disk_bandwidth(&self, ctx: &MetricContext, target: &CandidateTarget) -> ByteSpeed {
        ctx.storage_ops
            .share_for_new(ctx.dfs, target.storage, ctx.time, ctx.exclude_operation)
    }
}

pub(crate) fn compare_smaller(a: &Weight, b: &Weight) -> Ordering {
    a.value.total_cmp(&b.value)
}

pub(crate) fn compare_larger(a: &Weight, b: &Weight) -> Ordering {
    b.value.total_cmp(&a.value)
}

/// Extends bottleneck and latency of `to_here` by `link`.
pub(crate) fn extend(to_here: &Weight, link: &Link, query: &MetricQuery) -> Weight {
    Weight {
        value: to_here.value,
        bottleneck: to_here
            .bottleneck
            .min(link.bandwidth_at(query.time).bytes_per_second()),
        latency: to_here.latency + link.latency,
    }
}

/// Transfer time of `size` bytes at `speed`, zero-sized transfers take no time.
pub(crate) fn transfer_time(size: f64, speed: f64) -> f64 {
    if size <= 0. {
        0.
    } else if speed <= 0. {
        f64::INFINITY
    } else {
        size / speed
    }
}
