//! Model of a storage device on a server.

use serde::{Deserialize, Serialize};

use crate::{
    curve::Curve,
    units::{ByteSize, ByteSpeed},
};

/// Servers are identified by their topology node id.
pub type ServerId = u32;
/// Storage ids are unique across the whole system.
pub type StorageId = u32;

/// Finite-capacity, finite-throughput storage device.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StorageDevice {
    id: StorageId,
    name: String,
    capacity: ByteSize,
    speed: Curve,
}

impl StorageDevice {
    pub fn new(id: StorageId, name: &str, capacity: ByteSize, speed: Curve) -> Self {
        Self {
            id,
            name: name.to_string(),
            capacity,
            speed,
        }
    }

    pub fn id(&self) -> StorageId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> ByteSize {
        self.capacity
    }

    /// Maximum throughput curve of the device.
    pub fn speed_curve(&self) -> &Curve {
        &self.speed
    }

    /// Maximum throughput at simulated `time`.
    pub fn speed_at(&self, time: f64) -> ByteSpeed {
        ByteSpeed::new(self.speed.value_at(time).max(0.))
    }

    pub(crate) fn set_capacity(&mut self, capacity: ByteSize) {
        self.capacity = capacity;
    }
}
