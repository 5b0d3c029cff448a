//! Promotion of accessed files to faster tiers with LRU eviction cascading down.

use std::collections::{BTreeMap, BTreeSet};

use log::{debug, warn};

use dfsim_dfs::{
    dfs::DistributedFileSystem,
    registry::FsObjectRef,
    storage::{ServerId, StorageId},
    units::ByteSize,
};

use crate::{
    planner::{HierarchicalPlanner, Migration},
    task::SimulationTask,
};

const EPS: f64 = 1e-9;

#[derive(Clone, Copy, Debug, PartialEq)]
struct Recency {
    time: f64,
    seq: u64,
}

const NEVER_ACCESSED: Recency = Recency {
    time: f64::NEG_INFINITY,
    seq: 0,
};

#[derive(Clone, Debug)]
struct Tier {
    storage: StorageId,
    speed: f64,
    capacity: ByteSize,
}

#[derive(Clone, Debug)]
struct PlannedFile {
    path: String,
    size: ByteSize,
    from: StorageId,
    tier: usize,
}

/// Scratch state of one planning attempt.
struct Plan<'a> {
    tiers: &'a [Tier],
    free: Vec<i128>,
    files: BTreeMap<FsObjectRef, PlannedFile>,
    moved: BTreeSet<FsObjectRef>,
    recency: &'a BTreeMap<FsObjectRef, Recency>,
    now: f64,
}

impl Plan<'_> {
    fn recency(&self, file: FsObjectRef) -> Recency {
        self.recency.get(&file).copied().unwrap_or(NEVER_ACCESSED)
    }

    fn victim(&self, tier: usize) -> Option<FsObjectRef> {
        self.files
            .iter()
            .filter(|(file, planned)| planned.tier == tier && !self.moved.contains(file))
            .filter(|(&file, _)| (self.now - self.recency(file).time).abs() > EPS)
            .min_by(|(&a, planned_a), (&b, planned_b)| {
                let (ra, rb) = (self.recency(a), self.recency(b));
                ra.time
                    .total_cmp(&rb.time)
                    .then(ra.seq.cmp(&rb.seq))
                    .then_with(|| planned_a.path.cmp(&planned_b.path))
            })
            .map(|(&file, _)| file)
    }

    /// Evicts files from `tier` until `needed` bytes are free, demoting each victim one tier down.
    fn make_room(&mut self, tier: usize, needed: ByteSize) -> bool {
        while self.free[tier] < needed.bytes() as i128 {
            let lower = tier + 1;
            if lower >= self.tiers.len() {
                return false;
            }
            let Some(victim) = self.victim(tier) else {
                return false;
            };
            let size = self.files[&victim].size;
            self.moved.insert(victim);
            self.free[tier] += size.bytes() as i128;
            if !self.make_room(lower, size) {
                return false;
            }
            self.free[lower] -= size.bytes() as i128;
            if let Some(planned) = self.files.get_mut(&victim) {
                planned.tier = lower;
            }
        }
        true
    }

    fn migrations(&self, server: ServerId) -> Vec<Migration> {
        self.files
            .iter()
            .filter_map(|(file, planned)| {
                let to = self.tiers[planned.tier].storage;
                (to != planned.from).then(|| Migration {
                    server,
                    file: file.node,
                    path: planned.path.clone(),
                    size: planned.size,
                    from: planned.from,
                    to,
                })
            })
            .collect()
    }
}

/// Planner keeping recently accessed files on the fastest storages of their server.
#[derive(Clone, Debug, Default)]
pub struct LruCascadePlanner {
    recency: BTreeMap<FsObjectRef, Recency>,
    next_seq: u64,
}

impl LruCascadePlanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Time of the last access to `file`, if it was accessed.
    pub fn last_access(&self, file: FsObjectRef) -> Option<f64> {
        self.recency.get(&file).map(|recency| recency.time)
    }

    fn tiers(dfs: &DistributedFileSystem, server: ServerId, time: f64) -> Vec<Tier> {
        let Ok(manager) = dfs.server(server) else {
            return Vec::new();
        };
        let mut tiers = manager
            .storages()
            .map(|device| Tier {
                storage: device.id(),
                speed: device.speed_at(time).bytes_per_second(),
                capacity: device.capacity(),
            })
            .collect::<Vec<_>>();
        tiers.sort_by(|a, b| b.speed.total_cmp(&a.speed).then(a.storage.cmp(&b.storage)));
        tiers
    }

    /// Moves promoting `file` to the fastest tier it can reach, or `None` when it stays.
    fn plan(&self, dfs: &DistributedFileSystem, file: FsObjectRef, time: f64) -> Option<(StorageId, Vec<Migration>)> {
        let node = dfs.node(file).ok()?;
        if !node.is_file() || !dfs.is_attached(file) {
            return None;
        }
        let size = node.total_size();
        let current_storage = dfs.effective_mount_device(file).ok().flatten()?;
        let tiers = Self::tiers(dfs, file.server, time);
        let current = tiers.iter().position(|tier| tier.storage == current_storage)?;
        let tier_index = tiers
            .iter()
            .enumerate()
            .map(|(index, tier)| (tier.storage, index))
            .collect::<BTreeMap<_, _>>();

        let root = dfs.root(file.server).ok()?;
        let mut files = BTreeMap::new();
        for object in dfs.files(root).ok()? {
            let Some(storage) = dfs.effective_mount_device(object).ok().flatten() else {
                continue;
            };
            let (Ok(path), Ok(size)) = (dfs.path(object), dfs.file_size(object)) else {
                continue;
            };
            if let Some(&tier) = tier_index.get(&storage) {
                files.insert(
                    object,
                    PlannedFile {
                        path,
                        size,
                        from: storage,
                        tier,
                    },
                );
            }
        }
        let free = tiers
            .iter()
            .map(|tier| {
                dfs.free_size(file.server, tier.storage)
                    .map(|free| free.bytes() as i128)
                    .unwrap_or(0)
            })
            .collect::<Vec<_>>();

        for (target, tier) in tiers.iter().enumerate().take(current) {
            if tier.speed <= tiers[current].speed || tier.capacity < size {
                continue;
            }
            let mut plan = Plan {
                tiers: &tiers,
                free: free.clone(),
                files: files.clone(),
                moved: BTreeSet::from([file]),
                recency: &self.recency,
                now: time,
            };
            plan.free[current] += size.bytes() as i128;
            if !plan.make_room(target, size) {
                continue;
            }
            plan.free[target] -= size.bytes() as i128;
            if let Some(planned) = plan.files.get_mut(&file) {
                planned.tier = target;
            }
            return Some((tier.storage, plan.migrations(file.server)));
        }
        None
    }
}

impl HierarchicalPlanner for LruCascadePlanner {
    fn on_before_access(
        &mut self,
        dfs: &mut DistributedFileSystem,
        file: FsObjectRef,
        task: &SimulationTask,
        time: f64,
    ) -> Vec<Migration> {
        let Some((storage, migrations)) = self.plan(dfs, file, time) else {
            return Vec::new();
        };
        let moves = migrations
            .iter()
            .map(|migration| (migration.file, migration.to))
            .collect::<Vec<_>>();
        match dfs.relocate(file.server, &moves) {
            Ok(()) => {
                debug!(
                    "task {}: {} promoted to storage {} with {} move(s)",
                    task.id,
                    task.path,
                    storage,
                    migrations.len()
                );
                migrations
            }
            Err(err) => {
                warn!("task {}: planned moves were rejected: {}", task.id, err);
                Vec::new()
            }
        }
    }

    fn on_after_access(&mut self, dfs: &mut DistributedFileSystem, file: FsObjectRef, task: &SimulationTask, time: f64) {
        self.recency.insert(
            file,
            Recency {
                time,
                seq: self.next_seq,
            },
        );
        self.next_seq += 1;
        if let Err(err) = dfs.record_access(file) {
            warn!("task {}: access to {} was not recorded: {}", task.id, task.path, err);
        }
    }

    fn highest_available_storage(&self, dfs: &DistributedFileSystem, file: FsObjectRef, time: f64) -> Option<StorageId> {
        match self.plan(dfs, file, time) {
            Some((storage, _)) => Some(storage),
            None => dfs.effective_mount_device(file).ok().flatten(),
        }
    }
}
