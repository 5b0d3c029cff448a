//! Errors of the storage model.

use thiserror::Error;

use crate::{
    storage::{ServerId, StorageId},
    units::ByteSize,
};

/// Failure of a capacity model or replica manager operation.
///
/// Operations returning this error leave the model in its pre-operation state.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum FsError {
    #[error("not enough space left on storage {storage} of server {server}: required {required}, available {available}")]
    NotEnoughSpaceLeft {
        server: ServerId,
        storage: StorageId,
        required: ByteSize,
        available: ByteSize,
    },
    #[error("replica on storage {storage} of server {server} cannot be resized: required {required}, available {available}")]
    NotEnoughSpaceLeftReplica {
        server: ServerId,
        storage: StorageId,
        required: ByteSize,
        available: ByteSize,
    },
    #[error("unknown server {0}")]
    UnknownServer(ServerId),
    #[error("unknown storage {storage} on server {server}")]
    UnknownStorage { server: ServerId, storage: StorageId },
    #[error("storage {0} already exists")]
    DuplicateStorage(StorageId),
    #[error("unknown object on server {server}")]
    UnknownObject { server: ServerId },
    #[error("{path} is not a directory")]
    NotADirectory { path: String },
    #[error("{path} is not a file")]
    NotAFile { path: String },
    #[error("{path} already exists")]
    NameCollision { path: String },
    #[error("invalid path or name '{0}'")]
    InvalidPath(String),
    #[error("root directory cannot be {0}")]
    RootOperation(&'static str),
    #[error("object is not attached to a directory tree")]
    Detached,
    #[error("cannot shrink storage {storage} to {requested}, {used} is in use")]
    CapacityBelowUsage {
        storage: StorageId,
        requested: ByteSize,
        used: ByteSize,
    },
    #[error("invalid replica target: server {server}, storage {storage}: {reason}")]
    InvalidReplicaTarget {
        server: ServerId,
        storage: StorageId,
        reason: &'static str,
    },
}
