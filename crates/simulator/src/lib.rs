#![doc = include_str!("../../../README.md")]

pub mod experiment;
pub mod logger;
pub mod metric;
pub mod metrics;
pub mod mode;
pub mod parser;
pub mod path;
pub mod persistence;
pub mod planner;
pub mod planners;
pub mod run_stats;
pub mod simulation;
pub mod simulator;
pub mod storage_ops;
pub mod system;
pub mod task;
pub mod topology;
pub mod trace;
