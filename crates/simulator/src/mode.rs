//! Settings of a simulation run.

use serde::{Deserialize, Serialize};

use crate::metrics::MetricKind;

fn default_recalculation_interval() -> f64 {
    0.5
}

fn default_time_resolution() -> f64 {
    0.5
}

fn default_registry_query_time() -> f64 {
    0.001
}

fn is_false(b: &bool) -> bool {
    !b
}

/// How tasks are routed and transferred.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimulationMode {
    #[serde(default)]
    pub metric: MetricKind,
    /// Whether paths are recalculated during transfers.
    #[serde(default, skip_serializing_if = "is_false")]
    pub dynamic_routing: bool,
    /// Simulated seconds between path recalculations.
    #[serde(default = "default_recalculation_interval")]
    pub recalculation_interval: f64,
    /// Whether files are moved between storage tiers on access.
    #[serde(default, skip_serializing_if = "is_false")]
    pub hierarchical: bool,
    /// Length of a transfer slice in seconds.
    #[serde(default = "default_time_resolution")]
    pub time_resolution: f64,
    /// Time charged to a task whose path selection failed.
    #[serde(default = "default_registry_query_time")]
    pub registry_query_time: f64,
    /// Whether the last slice of a transfer takes the whole resolution.
    #[serde(default, skip_serializing_if = "is_false")]
    pub round_up_slices: bool,
    /// Whether storages grow instead of rejecting uploads and replicas.
    #[serde(default, skip_serializing_if = "is_false")]
    pub force_expansion: bool,
}

impl Default for SimulationMode {
    fn default() -> Self {
        Self {
            metric: MetricKind::default(),
            dynamic_routing: false,
            recalculation_interval: default_recalculation_interval(),
            hierarchical: false,
            time_resolution: default_time_resolution(),
            registry_query_time: default_registry_query_time(),
            round_up_slices: false,
            force_expansion: false,
        }
    }
}

impl SimulationMode {
    pub fn with_metric(mut self, metric: MetricKind) -> Self {
        self.metric = metric;
        self
    }

    pub fn with_dynamic_routing(mut self, recalculation_interval: f64) -> Self {
        self.dynamic_routing = true;
        self.recalculation_interval = recalculation_interval;
        self
    }

    pub fn with_hierarchical(mut self) -> Self {
        self.hierarchical = true;
        self
    }

    pub fn with_force_expansion(mut self) -> Self {
        self.force_expansion = true;
        self
    }

    /// Short description used in experiment results.
    pub fn label(&self) -> String {
        let mut label = format!("{:?}", self.metric);
        if self.dynamic_routing {
            label.push_str(&format!("[dynamic={}]", self.recalculation_interval));
        }
        if self.hierarchical {
            label.push_str("[hierarchical]");
        }
        if self.force_expansion {
            label.push_str("[force]");
        }
        label
    }
}
