//! Tools for loading systems, task plans and modes from YAML files.

use std::path::Path;

use serde::de::DeserializeOwned;

use crate::{
    mode::SimulationMode,
    system::{SystemConfig, TaskPlan},
};

fn read_yaml<T: DeserializeOwned, P: AsRef<Path>>(file: P) -> T {
    serde_yaml::from_str(
        &std::fs::read_to_string(&file).unwrap_or_else(|_| panic!("Can't read file {}", file.as_ref().display())),
    )
    .unwrap_or_else(|e| panic!("Can't parse YAML from file {}: {e:?}", file.as_ref().display()))
}

impl SystemConfig {
    /// Read [SystemConfig] from YAML file. Panic on error.
    pub fn from_yaml<P: AsRef<Path>>(file: P) -> Self {
        read_yaml(file)
    }
}

impl TaskPlan {
    /// Read [TaskPlan] from YAML file. Panic on error.
    pub fn from_yaml<P: AsRef<Path>>(file: P) -> Self {
        read_yaml(file)
    }
}

impl SimulationMode {
    /// Read [SimulationMode] from YAML file. Panic on error.
    pub fn from_yaml<P: AsRef<Path>>(file: P) -> Self {
        read_yaml(file)
    }
}
