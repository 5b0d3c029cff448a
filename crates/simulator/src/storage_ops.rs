//! Bookkeeping of operations sharing storage throughput.
//!
//! Every operation is registered on one or more storages, each storage splits its speed evenly between
//! the operations registered on it. Transfer placeholders only take a share, migrations also progress
//! at the share of the slowest storage they use.

use std::collections::BTreeMap;

use log::trace;

use dfsim_dfs::{dfs::DistributedFileSystem, storage::StorageId, units::ByteSpeed};

use crate::planner::Migration;

pub type OperationId = u64;

const EPS: f64 = 1e-9;

#[derive(Clone, Debug)]
struct StorageOperation {
    storages: Vec<StorageId>,
    migration: Option<ManagedOperation>,
}

#[derive(Clone, Debug)]
struct ManagedOperation {
    migration: Migration,
    remaining: f64,
    /// Progress is accounted from this time on.
    since: f64,
}

#[derive(Clone, Debug, Default)]
pub struct StorageOperations {
    operations: BTreeMap<OperationId, StorageOperation>,
    counts: BTreeMap<StorageId, usize>,
    next_id: OperationId,
    last_update: f64,
}

impl StorageOperations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an operation which only occupies a share of `storage`.
    pub fn add_unmanaged(&mut self, storage: StorageId) -> OperationId {
        self.add(vec![storage], None)
    }

    /// Registers a migration started at `time` on its source and destination storages.
    pub fn add_migration(&mut self, migration: Migration, time: f64) -> OperationId {
        let storages = if migration.from == migration.to {
            vec![migration.from]
        } else {
            vec![migration.from, migration.to]
        };
        let remaining = migration.size.bytes() as f64;
        self.add(
            storages,
            Some(ManagedOperation {
                migration,
                remaining,
                since: time,
            }),
        )
    }

    fn add(&mut self, storages: Vec<StorageId>, migration: Option<ManagedOperation>) -> OperationId {
        let id = self.next_id;
        self.next_id += 1;
        for &storage in storages.iter() {
            *self.counts.entry(storage).or_default() += 1;
        }
        self.operations.insert(id, StorageOperation { storages, migration });
        id
    }

    /// Removes a placeholder, returns `false` if there is no such unmanaged operation.
    pub fn remove_unmanaged(&mut self, id: OperationId) -> bool {
        match self.operations.get(&id) {
            Some(operation) if operation.migration.is_none() => {
                self.remove(id);
                true
            }
            _ => false,
        }
    }

    fn remove(&mut self, id: OperationId) -> Option<StorageOperation> {
        let operation = self.operations.remove(&id)?;
        for storage in operation.storages.iter() {
            if let Some(count) = self.counts.get_mut(storage) {
                *count -= 1;
                if *count == 0 {
                    self.counts.remove(storage);
                }
            }
        }
        Some(operation)
    }

    pub fn count_on(&self, storage: StorageId) -> usize {
        self.counts.get(&storage).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn pending_migrations(&self) -> usize {
        self.operations
            .values()
            .filter(|operation| operation.migration.is_some())
            .count()
    }

    /// Share one more operation would get on `storage`, not counting the `exclude` operation.
    pub fn share_for_new(
        &self,
        dfs: &DistributedFileSystem,
        storage: StorageId,
        time: f64,
        exclude: Option<OperationId>,
    ) -> ByteSpeed {
        let excluded = exclude
            .and_then(|id| self.operations.get(&id))
            .is_some_and(|operation| operation.storages.contains(&storage));
        let others = self.count_on(storage) - usize::from(excluded);
        self.speed(dfs, storage, time, others + 1)
    }

    /// Current share of a registered operation, limited by the slowest storage it uses.
    pub fn share_of(&self, dfs: &DistributedFileSystem, id: OperationId, time: f64) -> ByteSpeed {
        let Some(operation) = self.operations.get(&id) else {
            return ByteSpeed::ZERO;
        };
        operation
            .storages
            .iter()
            .map(|&storage| self.speed(dfs, storage, time, self.count_on(storage).max(1)))
            .fold(ByteSpeed::INFINITE, ByteSpeed::min)
    }

    fn speed(&self, dfs: &DistributedFileSystem, storage: StorageId, time: f64, sharers: usize) -> ByteSpeed {
        let speed = dfs
            .storage(storage)
            .map(|device| device.speed_at(time))
            .unwrap_or(ByteSpeed::ZERO);
        ByteSpeed::new(speed.bytes_per_second() / sharers as f64)
    }

    /// Advances migrations up to `time` and returns the finished ones.
    ///
    /// A migration is only credited for the time since it was registered.
    pub fn update(&mut self, dfs: &DistributedFileSystem, time: f64) -> Vec<Migration> {
        if time <= self.last_update {
            return Vec::new();
        }
        let last_update = self.last_update;
        self.last_update = time;
        let rates = self
            .operations
            .iter()
            .filter_map(|(&id, operation)| {
                let since = operation.migration.as_ref()?.since.max(last_update);
                Some((id, since, self.share_of(dfs, id, since)))
            })
            .collect::<Vec<_>>();
        let mut finished = Vec::new();
        for (id, since, rate) in rates {
            let Some(managed) = self.operations.get_mut(&id).and_then(|operation| operation.migration.as_mut()) else {
                continue;
            };
            if time <= since {
                continue;
            }
            managed.remaining -= rate.bytes_in(time - since);
            trace!("migration {} has {:.0} bytes left", managed.migration.path, managed.remaining);
            if managed.remaining <= EPS {
                finished.push(id);
            }
        }
        finished
            .into_iter()
            .filter_map(|id| self.remove(id))
            .filter_map(|operation| operation.migration.map(|managed| managed.migration))
            .collect()
    }

    /// Drops every operation and returns the migrations that were still in progress.
    pub fn finalize(&mut self) -> Vec<Migration> {
        let operations = std::mem::take(&mut self.operations);
        self.counts.clear();
        operations
            .into_values()
            .filter_map(|operation| operation.migration.map(|managed| managed.migration))
            .collect()
    }
}
