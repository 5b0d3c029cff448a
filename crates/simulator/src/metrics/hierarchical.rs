//! [ThroughputLatency] with the storage a file could be promoted to.

use std::cmp::Ordering;

use dfsim_dfs::units::ByteSpeed;

use crate::{
    metric::{CandidateTarget, GraphMetric, MetricContext, MetricQuery, Weight},
    metrics::throughput_latency::ThroughputLatency,
    topology::Link,
};

#[derive(Clone, Default)]
pub struct Hierarchical {
    inner: ThroughputLatency,
}

impl Hierarchical {
    pub fn new() -> Self {
        Self::default()
    }
}

impl GraphMetric for Hierarchical {
    fn name(&self) -> &'static str {
        "Hierarchical"
    }

    fn edge_weight(&self, link: &Link, query: &MetricQuery) -> f64 {
        self.inner.edge_weight(link, query)
    }

    fn combine(&self, to_here: &Weight, edge: f64, link: &Link, query: &MetricQuery) -> Weight {
        self.inner.combine(to_here, edge, link, query)
    }

    fn compare(&self, a: &Weight, b: &Weight) -> Ordering {
        self.inner.compare(a, b)
    }

    fn best(&self, query: &MetricQuery) -> Weight {
        self.inner.best(query)
    }

    fn worst(&self) -> Weight {
        self.inner.worst()
    }

    fn possible_disk_bandwidth(&self, ctx: &MetricContext, target: &CandidateTarget) -> ByteSpeed {
        let storage = match (ctx.planner, target.file) {
            (Some(planner), Some(file)) => planner
                .highest_available_storage(ctx.dfs, file, ctx.time)
                .unwrap_or(target.storage),
            _ => target.storage,
        };
        ctx.storage_ops
            .share_for_new(ctx.dfs, storage, ctx.time, ctx.exclude_operation)
    }
}
