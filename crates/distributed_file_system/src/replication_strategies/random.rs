use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;

use crate::{
    dfs::DistributedFileSystem, registry::FsObjectRef, replicas::ReplicaTarget,
    replication_strategy::ReplicationStrategy, storage::StorageDevice,
};

/// How a storage is chosen on a picked server.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TargetDistribution {
    /// Random storage among the ones with enough free space.
    AnyStorage,
    /// Fastest storage at time zero among the ones with enough free space.
    FastestStorage,
}

pub struct RandomReplicationStrategy {
    replication_factor: usize,
    target_distribution: TargetDistribution,
    rng: Pcg64,
}

impl RandomReplicationStrategy {
    pub fn new(replication_factor: usize, target_distribution: TargetDistribution) -> Self {
        Self::with_seed(replication_factor, target_distribution, 123)
    }

    pub fn with_seed(replication_factor: usize, target_distribution: TargetDistribution, seed: u64) -> Self {
        Self {
            replication_factor,
            target_distribution,
            rng: Pcg64::seed_from_u64(seed),
        }
    }

    /// Picks `k` distinct indices out of `0..n` in increasing order.
    fn pick_random(&mut self, n: usize, k: usize) -> Vec<usize> {
        if k >= n {
            return (0..n).collect();
        }
        let mut result: Vec<usize> = Vec::new();
        for i in 0..k {
            let mut x = self.rng.gen_range(0..n - i);
            for &y in result.iter() {
                if y <= x {
                    x += 1;
                }
            }
            result.insert(result.partition_point(|&y| y < x), x);
        }
        result
    }

    fn pick_storage(&mut self, mut candidates: Vec<&StorageDevice>) -> Option<u32> {
        match self.target_distribution {
            TargetDistribution::AnyStorage => {
                if candidates.is_empty() {
                    return None;
                }
                let index = self.rng.gen_range(0..candidates.len());
                Some(candidates[index].id())
            }
            TargetDistribution::FastestStorage => {
                candidates.sort_by(|a, b| {
                    b.speed_at(0.)
                        .bytes_per_second()
                        .total_cmp(&a.speed_at(0.).bytes_per_second())
                        .then(a.id().cmp(&b.id()))
                });
                candidates.first().map(|device| device.id())
            }
        }
    }
}

impl ReplicationStrategy for RandomReplicationStrategy {
    fn select_targets(&mut self, file: FsObjectRef, dfs: &DistributedFileSystem) -> Vec<ReplicaTarget> {
        let Ok(size) = dfs.file_size(file) else {
            return Vec::new();
        };
        let Ok(path) = dfs.path(file) else {
            return Vec::new();
        };
        let servers = dfs
            .servers()
            .filter(|&server| server != file.server)
            .filter(|&server| dfs.lookup(server, &path).is_none())
            .filter_map(|server| {
                let manager = dfs.server(server).ok()?;
                let fitting = manager
                    .storages()
                    .filter(|device| manager.free_size(device.id()) >= size)
                    .collect::<Vec<_>>();
                (!fitting.is_empty()).then_some((server, fitting))
            })
            .collect::<Vec<_>>();
        let picked = self.pick_random(servers.len(), self.replication_factor);
        let mut result = Vec::new();
        for index in picked {
            let (server, fitting) = &servers[index];
            if let Some(storage) = self.pick_storage(fitting.clone()) {
                result.push(ReplicaTarget::new(*server, storage));
            }
        }
        result
    }
}
