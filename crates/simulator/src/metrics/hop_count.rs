//! Path with the fewest links.

use std::cmp::Ordering;

use crate::{
    metric::{compare_smaller, extend, GraphMetric, MetricQuery, Weight},
    topology::Link,
};

#[derive(Clone, Default)]
pub struct HopCount {}

impl HopCount {
    pub fn new() -> Self {
        Self {}
    }
}

impl GraphMetric for HopCount {
    fn name(&self) -> &'static str {
        "HopCount"
    }

    fn edge_weight(&self, _link: &Link, _query: &MetricQuery) -> f64 {
        1.
    }

    fn combine(&self, to_here: &Weight, edge: f64, link: &Link, query: &MetricQuery) -> Weight {
        let mut weight = extend(to_here, link, query);
        weight.value += edge;
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
