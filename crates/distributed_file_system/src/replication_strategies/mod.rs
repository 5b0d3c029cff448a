//! Implementations of some replication strategies.

pub mod random;
