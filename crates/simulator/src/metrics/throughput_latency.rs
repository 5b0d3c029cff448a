//! Estimated completion time: payload over the bottleneck of links and storage, plus latency.

use std::cmp::Ordering;

use crate::{
    metric::{compare_smaller, extend, transfer_time, GraphMetric, MetricQuery, Weight},
    topology::Link,
};

#[derive(Clone, Default)]
pub struct ThroughputLatency {}

impl ThroughputLatency {
    pub fn new() -> Self {
        Self {}
    }
}

pub(crate) fn estimate(weight: &Weight, query: &MetricQuery) -> f64 {
    transfer_time(query.transfer_size, weight.bottleneck.min(query.disk_bandwidth)) + weight.latency
}

impl GraphMetric for ThroughputLatency {
    fn name(&self) -> &'static str {
        "ThroughputLatency"
    }

    fn edge_weight(&self, link: &Link, query: &MetricQuery) -> f64 {
        link.bandwidth_at(query.time).bytes_per_second()
    }

    fn combine(&self, to_here: &Weight, _edge: f64, link: &Link, query: &MetricQuery) -> Weight {
        let mut weight = extend(to_here, link, query);
        weight.value = estimate(&weight, query);
        weight
    }

    fn compare(&self, a: &Weight, b: &Weight) -> Ordering {
        compare_smaller(a, b)
    }

    fn best(&self, query: &MetricQuery) -> Weight {
        let mut weight = Weight::new(0.);
        weight.value = estimate(&weight, query);
        weight
    }

    fn worst(&self) -> Weight {
        Weight::new(f64::INFINITY)
    }
}
