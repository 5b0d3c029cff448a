//! Sum of per-link transfer times and latencies.

use std::cmp::Ordering;

use crate::{
    metric::{compare_smaller, extend, transfer_time, GraphMetric, MetricQuery, Weight},
    topology::Link,
};

#[derive(Clone, Default)]
pub struct BandwidthLatency {}

impl BandwidthLatency {
    pub fn new() -> Self {
        Self {}
    }
}

impl GraphMetric for BandwidthLatency {
    fn name(&self) -> &'static str {
        "BandwidthLatency"
    }

    fn edge_weight(&self, link: &Link, query: &MetricQuery) -> f64 {
        transfer_time(query.transfer_size, link.bandwidth_at(query.time).bytes_per_second())
    }

    fn combine(&self, to_here: &Weight, edge: f64, link: &Link, query: &MetricQuery) -> Weight {
        let mut weight = extend(to_here, link, query);
        weight.value = to_here.value + edge + link.latency;
        weight
    }

    fn compare(&self, a: &Weight, b: &Weight) -> Ordering {
        compare_smaller(a, b)
    }

    fn best(&self, _query: &MetricQuery) -> Weight {
        Weight::new(0.)
    }

    fn worst(&self) -> Weight {
        Weight::new(f64::INFINITY)
    }
}
