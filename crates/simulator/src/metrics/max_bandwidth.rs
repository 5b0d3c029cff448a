//! Widest path.

use std::cmp::Ordering;

use crate::{
    metric::{compare_larger, extend, GraphMetric, MetricQuery, Weight},
    topology::Link,
};

#[derive(Clone, Default)]
pub struct MaxBandwidth {}

impl MaxBandwidth {
    pub fn new() -> Self {
        Self {}
    }
}

impl GraphMetric for MaxBandwidth {
    fn name(&self) -> &'static str {
        "MaxBandwidth"
    }

    fn edge_weight(&self, link: &Link, query: &MetricQuery) -> f64 {
        link.bandwidth_at(query.time).bytes_per_second()
    }

    fn combine(&self, to_here: &Weight, edge: f64, link: &Link, query: &MetricQuery) -> Weight {
        let mut weight = extend(to_here, link, query);
        weight.value = to_here.value.min(edge);
        weight
    }

    fn compare(&self, a: &Weight, b: &Weight) -> Ordering {
        compare_larger(a, b)
    }

    fn best(&self, _query: &MetricQuery) -> Weight {
        Weight::new(f64::INFINITY)
    }

    fn worst(&self) -> Weight {
        Weight::new(0.)
    }
}
