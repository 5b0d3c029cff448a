//! Capacity model of a tiered distributed file system.
//!
//! Every server has its own filesystem tree and a set of storage devices. Objects are mounted on devices
//! and occupy their space, files can be replicated to other servers.

pub mod curve;
pub mod dfs;
pub mod error;
pub mod fs_tree;
pub mod persistence;
pub mod registry;
pub mod replicas;
pub mod replication_strategies;
pub mod replication_strategy;
pub mod server_fs;
pub mod storage;
pub mod units;
