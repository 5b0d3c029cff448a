use serde::{Deserialize, Serialize};

use crate::metric::GraphMetric;

pub mod bandwidth_latency;
pub mod hierarchical;
pub mod hop_count;
pub mod max_bandwidth;
pub mod throughput_latency;

/// Metric selected by a simulation mode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetricKind {
    HopCount,
    MaxBandwidth,
    BandwidthLatency,
    #[default]
    ThroughputLatency,
    Hierarchical,
}

impl MetricKind {
    pub fn build(self) -> Box<dyn GraphMetric> {
        match self {
            MetricKind::HopCount => Box::new(hop_count::HopCount::new()),
            MetricKind::MaxBandwidth => Box::new(max_bandwidth::MaxBandwidth::new()),
            MetricKind::BandwidthLatency => Box::new(bandwidth_latency::BandwidthLatency::new()),
            MetricKind::ThroughputLatency => Box::new(throughput_latency::ThroughputLatency::new()),
            MetricKind::Hierarchical => Box::new(hierarchical::Hierarchical::new()),
        }
    }
}
