use dfsim_dfs::{
    curve::Curve,
    dfs::DistributedFileSystem,
    error::FsError,
    persistence::{export_dfs, export_replicas, import_dfs, import_replicas, Element, ImportError},
    registry::FsObjectRef,
    replicas::{ReplicaManager, ReplicaTarget},
    replication_strategies::random::{RandomReplicationStrategy, TargetDistribution},
    replication_strategy::ReplicationStrategy,
    server_fs::AddChildOutcome,
    storage::StorageDevice,
    units::{ByteSize, ByteSpeed, Unit},
};

const HDD: u32 = 10;
const SSD: u32 = 11;

fn bytes(value: u64) -> ByteSize {
    ByteSize::new(value)
}

fn single_server() -> DistributedFileSystem {
    let mut dfs = DistributedFileSystem::new();
    dfs.add_server(1);
    dfs.add_storage(1, StorageDevice::new(HDD, "hdd", bytes(1000), Curve::Constant(100.)))
        .unwrap();
    dfs.add_storage(1, StorageDevice::new(SSD, "ssd", bytes(100), Curve::Constant(1000.)))
        .unwrap();
    let root = dfs.root(1).unwrap();
    dfs.mount(root, HDD).unwrap();
    dfs
}

fn total_size(dfs: &DistributedFileSystem, server: u32, path: &str) -> ByteSize {
    dfs.node(dfs.lookup(server, path).unwrap()).unwrap().total_size()
}

fn mount_size(dfs: &DistributedFileSystem, server: u32, path: &str) -> ByteSize {
    dfs.node(dfs.lookup(server, path).unwrap()).unwrap().mount_size()
}

#[test]
fn units() {
    assert_eq!(ByteSize::from_unit(1.5, Unit::MB), bytes(1_500_000));
    assert_eq!(bytes(1_500_000).to_string(), "1.50 MB");
    assert_eq!(bytes(500).to_string(), "500 B");
    let speed = ByteSpeed::from_unit(2., Unit::MB);
    assert_eq!(speed.to_string(), "2.00 MB/s");
    assert_eq!(speed.transfer_time(bytes(1_000_000)), 0.5);
    assert_eq!(ByteSpeed::ZERO.transfer_time(bytes(1)), f64::INFINITY);
}

#[test]
fn curve_values() {
    let curve = Curve::steps([(1., 5.), (0., 2.), (3., 0.)]);
    assert_eq!(curve.value_at(-1.), 2.);
    assert_eq!(curve.value_at(0.5), 2.);
    assert_eq!(curve.value_at(1.), 5.);
    assert_eq!(curve.value_at(10.), 0.);
    assert_eq!(Curve::Constant(7.).value_at(100.), 7.);
}

#[test]
fn aggregates_follow_files() {
    let mut dfs = single_server();
    dfs.create_file_at(1, "/a/b/f1", bytes(100), None, false).unwrap();
    dfs.create_file_at(1, "/a/f2", bytes(50), None, false).unwrap();

    assert_eq!(total_size(&dfs, 1, "/a"), bytes(150));
    assert_eq!(total_size(&dfs, 1, "/"), bytes(150));
    assert_eq!(mount_size(&dfs, 1, "/"), bytes(150));
    assert_eq!(dfs.used_size(1, HDD).unwrap(), bytes(150));

    let f1 = dfs.lookup(1, "/a/b/f1").unwrap();
    dfs.resize_to_fit(f1, bytes(300)).unwrap();
    assert_eq!(total_size(&dfs, 1, "/a/b"), bytes(300));
    assert_eq!(total_size(&dfs, 1, "/"), bytes(350));
    assert_eq!(dfs.used_size(1, HDD).unwrap(), bytes(350));

    let a = dfs.lookup(1, "/a").unwrap();
    dfs.remove_object(a).unwrap();
    assert_eq!(total_size(&dfs, 1, "/"), bytes(0));
    assert_eq!(dfs.used_size(1, HDD).unwrap(), bytes(0));
    assert_eq!(dfs.instances("/a/b/f1").count(), 0);
    assert_eq!(dfs.instances("/a").count(), 0);
    assert!(!dfs.contains(f1));
}

#[test]
fn mount_moves_accounting() {
    let mut dfs = single_server();
    dfs.create_file_at(1, "/a/b/f1", bytes(100), None, false).unwrap();
    dfs.create_file_at(1, "/a/f2", bytes(50), None, false).unwrap();
    let b = dfs.lookup(1, "/a/b").unwrap();
    let f1 = dfs.lookup(1, "/a/b/f1").unwrap();

    dfs.mount(b, SSD).unwrap();
    assert_eq!(dfs.used_size(1, SSD).unwrap(), bytes(100));
    assert_eq!(dfs.used_size(1, HDD).unwrap(), bytes(50));
    assert_eq!(mount_size(&dfs, 1, "/a"), bytes(50));
    assert_eq!(total_size(&dfs, 1, "/a"), bytes(150));
    assert_eq!(dfs.effective_mount_device(f1).unwrap(), Some(SSD));
    assert_eq!(dfs.node(f1).unwrap().mount_device(), Some(SSD));
    assert_eq!(dfs.mount_device_by_path(1, "/a/b/f1"), Some(SSD));

    // the second mount on the same device changes nothing
    dfs.mount(b, SSD).unwrap();
    assert_eq!(dfs.used_size(1, SSD).unwrap(), bytes(100));

    dfs.unmount(b).unwrap();
    assert_eq!(dfs.used_size(1, SSD).unwrap(), bytes(0));
    assert_eq!(dfs.used_size(1, HDD).unwrap(), bytes(150));
    assert_eq!(dfs.effective_mount_device(f1).unwrap(), Some(HDD));

    // unmounting an object without a direct mount is a no-op
    dfs.unmount(b).unwrap();
    assert_eq!(dfs.used_size(1, HDD).unwrap(), bytes(150));
}

#[test]
fn mount_rejects_and_force_expands() {
    let mut dfs = single_server();
    dfs.create_file_at(1, "/big", bytes(300), None, false).unwrap();
    let big = dfs.lookup(1, "/big").unwrap();

    let err = dfs.mount(big, SSD).unwrap_err();
    assert!(matches!(err, FsError::NotEnoughSpaceLeft { storage: SSD, .. }));
    assert_eq!(dfs.used_size(1, SSD).unwrap(), bytes(0));
    assert_eq!(dfs.effective_mount_device(big).unwrap(), Some(HDD));

    dfs.force_mount(big, SSD).unwrap();
    assert_eq!(dfs.capacity(1, SSD).unwrap(), bytes(300));
    assert_eq!(dfs.used_size(1, SSD).unwrap(), bytes(300));
    assert_eq!(dfs.free_size(1, SSD).unwrap(), bytes(0));
    assert_eq!(dfs.used_size(1, HDD).unwrap(), bytes(0));
}

#[test]
fn unmount_needs_room_on_parent_device() {
    let mut dfs = single_server();
    dfs.create_file_at(1, "/cache/f", bytes(80), Some(SSD), false).unwrap();
    dfs.resize_storage(1, HDD, bytes(50)).unwrap();
    let f = dfs.lookup(1, "/cache/f").unwrap();

    let err = dfs.unmount(f).unwrap_err();
    assert!(matches!(err, FsError::NotEnoughSpaceLeft { storage: HDD, .. }));
    assert_eq!(dfs.effective_mount_device(f).unwrap(), Some(SSD));
    assert_eq!(dfs.used_size(1, SSD).unwrap(), bytes(80));
}

#[test]
fn file_creation_respects_capacity() {
    let mut dfs = single_server();
    let err = dfs.create_file_at(1, "/a/huge", bytes(2000), None, false).unwrap_err();
    assert!(matches!(err, FsError::NotEnoughSpaceLeft { .. }));
    assert!(dfs.lookup(1, "/a").is_none());

    dfs.create_file_at(1, "/a/huge", bytes(2000), None, true).unwrap();
    assert_eq!(dfs.capacity(1, HDD).unwrap(), bytes(2000));
    assert_eq!(dfs.used_size(1, HDD).unwrap(), bytes(2000));
}

#[test]
fn add_child_merges_directories() {
    let mut dfs = single_server();
    dfs.create_file_at(1, "/a/f2", bytes(50), None, false).unwrap();
    dfs.create_file_at(1, "/a/b/f1", bytes(100), None, false).unwrap();

    let incoming = dfs.create_directory(1, "a").unwrap();
    let f2 = dfs.create_file(1, "f2", bytes(10)).unwrap();
    let g = dfs.create_file(1, "g", bytes(5)).unwrap();
    dfs.add_child(incoming, f2).unwrap();
    dfs.add_child(incoming, g).unwrap();

    let root = dfs.root(1).unwrap();
    assert_eq!(dfs.add_child(root, incoming).unwrap(), AddChildOutcome::Merged);
    assert!(!dfs.contains(incoming));
    assert_eq!(dfs.lookup(1, "/a/f2"), Some(f2));
    assert_eq!(dfs.lookup(1, "/a/g"), Some(g));
    assert_eq!(total_size(&dfs, 1, "/a"), bytes(115));
    assert_eq!(dfs.used_size(1, HDD).unwrap(), bytes(115));
    assert_eq!(dfs.instances("/a/g").collect::<Vec<_>>(), vec![g]);
    assert_eq!(dfs.instances("/a/f2").collect::<Vec<_>>(), vec![f2]);
}

#[test]
fn add_child_replaces_file_and_keeps_mount() {
    let mut dfs = single_server();
    let old = dfs.create_file_at(1, "/f", bytes(40), Some(SSD), false).unwrap();
    let root = dfs.root(1).unwrap();
    let new = dfs.create_file(1, "f", bytes(70)).unwrap();

    assert_eq!(dfs.add_child(root, new).unwrap(), AddChildOutcome::Added);
    assert!(!dfs.contains(old));
    assert_eq!(dfs.effective_mount_device(new).unwrap(), Some(SSD));
    assert_eq!(dfs.used_size(1, SSD).unwrap(), bytes(70));
    assert_eq!(dfs.used_size(1, HDD).unwrap(), bytes(0));
}

#[test]
fn add_child_refuses_file_directory_conflict() {
    let mut dfs = single_server();
    dfs.create_file_at(1, "/a/x", bytes(10), None, false).unwrap();
    dfs.create_file_at(1, "/a/y", bytes(10), None, false).unwrap();

    let incoming = dfs.create_directory(1, "a").unwrap();
    let y = dfs.create_file(1, "y", bytes(99)).unwrap();
    let x = dfs.create_directory(1, "x").unwrap();
    dfs.add_child(incoming, y).unwrap();
    dfs.add_child(incoming, x).unwrap();

    let root = dfs.root(1).unwrap();
    assert_eq!(dfs.add_child(root, incoming).unwrap(), AddChildOutcome::Refused);
    assert_eq!(total_size(&dfs, 1, "/a"), bytes(20));
    assert_eq!(dfs.file_size(dfs.lookup(1, "/a/y").unwrap()).unwrap(), bytes(10));
    assert!(dfs.contains(incoming));
}

#[test]
fn add_child_checks_space_before_merging() {
    let mut dfs = single_server();
    dfs.create_file_at(1, "/a/x", bytes(900), None, false).unwrap();
    let incoming = dfs.create_directory(1, "a").unwrap();
    let z = dfs.create_file(1, "z", bytes(200)).unwrap();
    dfs.add_child(incoming, z).unwrap();

    let root = dfs.root(1).unwrap();
    let err = dfs.add_child(root, incoming).unwrap_err();
    assert!(matches!(err, FsError::NotEnoughSpaceLeft { storage: HDD, .. }));
    assert!(dfs.lookup(1, "/a/z").is_none());

    assert_eq!(dfs.force_add_child(root, incoming).unwrap(), AddChildOutcome::Merged);
    assert_eq!(dfs.capacity(1, HDD).unwrap(), bytes(1100));
    assert_eq!(dfs.used_size(1, HDD).unwrap(), bytes(1100));
}

#[test]
fn mountable_hierarchy_stops_at_mounts() {
    let mut dfs = single_server();
    dfs.create_file_at(1, "/a/b/f1", bytes(10), None, false).unwrap();
    dfs.create_file_at(1, "/a/c/f2", bytes(10), None, false).unwrap();
    let b = dfs.lookup(1, "/a/b").unwrap();
    dfs.mount(b, SSD).unwrap();

    let a = dfs.lookup(1, "/a").unwrap();
    let paths = dfs
        .mountable_hierarchy(a)
        .unwrap()
        .into_iter()
        .map(|object| dfs.path(object).unwrap())
        .collect::<Vec<_>>();
    assert_eq!(paths, vec!["/a/c", "/a/c/f2"]);
}

#[test]
fn rename_updates_registry() {
    let mut dfs = single_server();
    dfs.create_file_at(1, "/a/f", bytes(10), None, false).unwrap();
    dfs.create_file_at(1, "/b", bytes(10), None, false).unwrap();
    let a = dfs.lookup(1, "/a").unwrap();

    let err = dfs.rename_object(a, "b").unwrap_err();
    assert!(matches!(err, FsError::NameCollision { .. }));

    dfs.rename_object(a, "c").unwrap();
    assert_eq!(dfs.instances("/a/f").count(), 0);
    assert_eq!(dfs.instances("/c/f").count(), 1);
    assert!(dfs.registry().contains("/c"));
    assert!(!dfs.registry().contains("/a"));

    let root = dfs.root(1).unwrap();
    assert_eq!(dfs.remove_object(root).unwrap_err(), FsError::RootOperation("removed"));
}

#[test]
fn storage_resize_and_shortfall() {
    let mut dfs = single_server();
    let f = dfs.create_file_at(1, "/f", bytes(600), None, false).unwrap();

    let err = dfs.resize_storage(1, HDD, bytes(500)).unwrap_err();
    assert!(matches!(err, FsError::CapacityBelowUsage { .. }));
    dfs.resize_storage(1, HDD, bytes(700)).unwrap();

    assert_eq!(dfs.resize_shortfall(f, bytes(650)).unwrap(), bytes(0));
    assert_eq!(dfs.resize_shortfall(f, bytes(800)).unwrap(), bytes(100));
    assert!(dfs.resize_to_fit(f, bytes(800)).is_err());
    assert_eq!(dfs.file_size(f).unwrap(), bytes(600));
    dfs.force_resize_to_fit(f, bytes(800)).unwrap();
    assert_eq!(dfs.capacity(1, HDD).unwrap(), bytes(800));
}

#[test]
fn relocate_allows_swaps() {
    let mut dfs = DistributedFileSystem::new();
    dfs.add_server(1);
    dfs.add_storage(1, StorageDevice::new(1, "a", bytes(100), Curve::Constant(1.)))
        .unwrap();
    dfs.add_storage(1, StorageDevice::new(2, "b", bytes(100), Curve::Constant(1.)))
        .unwrap();
    let x = dfs.create_file_at(1, "/x", bytes(100), Some(1), false).unwrap();
    let y = dfs.create_file_at(1, "/y", bytes(100), Some(2), false).unwrap();

    let err = dfs.relocate(1, &[(x.node, 2)]).unwrap_err();
    assert!(matches!(err, FsError::NotEnoughSpaceLeft { storage: 2, .. }));
    assert_eq!(dfs.effective_mount_device(x).unwrap(), Some(1));

    dfs.relocate(1, &[(x.node, 2), (y.node, 1)]).unwrap();
    assert_eq!(dfs.effective_mount_device(x).unwrap(), Some(2));
    assert_eq!(dfs.effective_mount_device(y).unwrap(), Some(1));
    assert_eq!(dfs.used_size(1, 1).unwrap(), bytes(100));
    assert_eq!(dfs.used_size(1, 2).unwrap(), bytes(100));
}

fn three_servers(third_capacity: u64) -> DistributedFileSystem {
    let mut dfs = DistributedFileSystem::new();
    for (server, storage, capacity) in [(1, 10, 1000), (2, 20, 1000), (3, 30, third_capacity)] {
        dfs.add_server(server);
        dfs.add_storage(server, StorageDevice::new(storage, "disk", bytes(capacity), Curve::Constant(10.)))
            .unwrap();
        let root = dfs.root(server).unwrap();
        dfs.mount(root, storage).unwrap();
    }
    dfs
}

#[test]
fn replication_is_all_or_nothing() {
    let mut dfs = three_servers(50);
    let mut replicas = ReplicaManager::new();
    let f = dfs.create_file_at(1, "/d/f", bytes(100), None, false).unwrap();

    let targets = [ReplicaTarget::new(2, 20), ReplicaTarget::new(3, 30)];
    let err = replicas.replicate_file(&mut dfs, f, &targets).unwrap_err();
    assert!(matches!(err, FsError::NotEnoughSpaceLeft { server: 3, .. }));
    assert!(dfs.lookup(2, "/d").is_none());
    assert!(!replicas.is_replicated(f));

    let created = replicas.replicate_file(&mut dfs, f, &targets[..1]).unwrap();
    assert_eq!(created.len(), 1);
    assert_eq!(dfs.lookup(2, "/d/f"), Some(created[0]));
    assert_eq!(dfs.used_size(2, 20).unwrap(), bytes(100));
    assert_eq!(replicas.primary_of(created[0]), Some(f));
    assert_eq!(replicas.targets_of(f), vec![ReplicaTarget::new(2, 20)]);
    assert_eq!(dfs.instances("/d/f").count(), 2);

    replicas.force_replicate_file(&mut dfs, f, &targets[1..]).unwrap();
    assert_eq!(dfs.capacity(3, 30).unwrap(), bytes(100));
}

#[test]
fn failed_replication_removes_created_directories() {
    let mut dfs = three_servers(50);
    let mut replicas = ReplicaManager::new();
    let f = dfs.create_file_at(1, "/a/b/f", bytes(100), None, false).unwrap();
    dfs.mkdirs(2, "/a").unwrap();

    let targets = [ReplicaTarget::new(2, 20), ReplicaTarget::new(3, 30)];
    let err = replicas.replicate_file(&mut dfs, f, &targets).unwrap_err();
    assert!(matches!(err, FsError::NotEnoughSpaceLeft { server: 3, .. }));
    assert!(dfs.lookup(2, "/a").is_some());
    assert!(dfs.lookup(2, "/a/b").is_none());
    assert!(dfs.lookup(3, "/a").is_none());
    assert_eq!(dfs.instances("/a/b/f").count(), 1);
    assert_eq!(dfs.used_size(2, 20).unwrap(), bytes(0));
    assert!(!replicas.is_replicated(f));
}

#[test]
fn forced_replication_commits_every_target() {
    let mut dfs = three_servers(50);
    let mut replicas = ReplicaManager::new();
    let f = dfs.create_file_at(1, "/d/f", bytes(100), None, false).unwrap();

    let targets = [ReplicaTarget::new(2, 20), ReplicaTarget::new(3, 30)];
    let created = replicas.force_replicate_file(&mut dfs, f, &targets).unwrap();
    assert_eq!(created.len(), 2);
    assert_eq!(dfs.used_size(2, 20).unwrap(), bytes(100));
    assert_eq!(dfs.capacity(3, 30).unwrap(), bytes(100));
    assert_eq!(dfs.used_size(3, 30).unwrap(), bytes(100));
    assert_eq!(replicas.targets_of(f).len(), 2);
    assert_eq!(dfs.instances("/d/f").count(), 3);
}

#[test]
fn replication_rejects_invalid_targets() {
    let mut dfs = three_servers(1000);
    let mut replicas = ReplicaManager::new();
    let f = dfs.create_file_at(1, "/f", bytes(10), None, false).unwrap();

    let err = replicas
        .replicate_file(&mut dfs, f, &[ReplicaTarget::new(1, 10)])
        .unwrap_err();
    assert!(matches!(err, FsError::InvalidReplicaTarget { server: 1, .. }));
    let err = replicas
        .replicate_file(&mut dfs, f, &[ReplicaTarget::new(2, 30)])
        .unwrap_err();
    assert!(matches!(err, FsError::InvalidReplicaTarget { server: 2, .. }));

    dfs.create_file_at(3, "/f", bytes(1), None, false).unwrap();
    let err = replicas
        .replicate_file(&mut dfs, f, &[ReplicaTarget::new(2, 20), ReplicaTarget::new(3, 30)])
        .unwrap_err();
    assert!(matches!(err, FsError::NameCollision { .. }));
    assert!(dfs.lookup(2, "/f").is_none());
}

#[test]
fn replica_resize_is_checked_everywhere() {
    let mut dfs = three_servers(150);
    let mut replicas = ReplicaManager::new();
    let f = dfs.create_file_at(1, "/f", bytes(100), None, false).unwrap();
    let created = replicas
        .replicate_file(&mut dfs, f, &[ReplicaTarget::new(2, 20), ReplicaTarget::new(3, 30)])
        .unwrap();

    dfs.resize_to_fit(f, bytes(500)).unwrap();
    let err = replicas.propagate_replica_resize(&mut dfs, f).unwrap_err();
    assert_eq!(
        err,
        FsError::NotEnoughSpaceLeftReplica {
            server: 3,
            storage: 30,
            required: bytes(400),
            available: bytes(50),
        }
    );
    assert_eq!(dfs.file_size(created[0]).unwrap(), bytes(100));

    replicas.force_propagate_replica_resize(&mut dfs, f).unwrap();
    assert_eq!(dfs.file_size(created[0]).unwrap(), bytes(500));
    assert_eq!(dfs.file_size(created[1]).unwrap(), bytes(500));
    assert_eq!(dfs.capacity(3, 30).unwrap(), bytes(500));
}

#[test]
fn replica_targets_are_reconciled() {
    let mut dfs = three_servers(60);
    let mut replicas = ReplicaManager::new();
    let f = dfs.create_file_at(1, "/f", bytes(50), None, false).unwrap();
    replicas
        .replicate_file(&mut dfs, f, &[ReplicaTarget::new(2, 20)])
        .unwrap();

    let err = replicas
        .update_replica_targets(&mut dfs, f, &[ReplicaTarget::new(3, 30)], bytes(100))
        .unwrap_err();
    assert!(matches!(err, FsError::NotEnoughSpaceLeft { server: 3, .. }));
    assert_eq!(replicas.targets_of(f), vec![ReplicaTarget::new(2, 20)]);
    assert!(dfs.lookup(2, "/f").is_some());

    replicas
        .update_replica_targets(&mut dfs, f, &[ReplicaTarget::new(3, 30)], bytes(60))
        .unwrap();
    assert_eq!(replicas.targets_of(f), vec![ReplicaTarget::new(3, 30)]);
    assert!(dfs.lookup(2, "/f").is_none());
    assert_eq!(dfs.used_size(3, 30).unwrap(), bytes(60));
}

#[test]
fn rename_and_delete_follow_replicas() {
    let mut dfs = three_servers(1000);
    let mut replicas = ReplicaManager::new();
    let f = dfs.create_file_at(1, "/d/f", bytes(100), None, false).unwrap();
    replicas
        .replicate_file(&mut dfs, f, &[ReplicaTarget::new(2, 20), ReplicaTarget::new(3, 30)])
        .unwrap();

    let d = dfs.lookup(1, "/d").unwrap();
    replicas.rename_replicated_object(&mut dfs, d, "e").unwrap();
    assert_eq!(dfs.instances("/d/f").count(), 0);
    assert_eq!(dfs.instances("/e/f").count(), 3);

    let replica = dfs.lookup(3, "/e/f").unwrap();
    replicas.rename_replicated_object(&mut dfs, replica, "g").unwrap();
    assert_eq!(dfs.instances("/e/g").count(), 3);

    replicas.delete_replicated_object(&mut dfs, replica).unwrap();
    assert_eq!(replicas.targets_of(f), vec![ReplicaTarget::new(2, 20)]);
    assert_eq!(dfs.instances("/e/g").count(), 2);

    let e = dfs.lookup(1, "/e").unwrap();
    replicas.delete_replicated_object(&mut dfs, e).unwrap();
    assert!(!replicas.is_replicated(f));
    assert_eq!(dfs.instances("/e/g").count(), 0);
    assert_eq!(dfs.used_size(2, 20).unwrap(), bytes(0));
}

#[test]
fn random_strategy_picks_other_servers() {
    let mut dfs = three_servers(10);
    let f = dfs.create_file_at(1, "/f", bytes(100), None, false).unwrap();
    let mut strategy = RandomReplicationStrategy::new(2, TargetDistribution::FastestStorage);
    // server 3 has no room for the file
    assert_eq!(strategy.select_targets(f, &dfs), vec![ReplicaTarget::new(2, 20)]);
}

#[test]
fn persistence_round_trip() {
    let mut dfs = three_servers(1000);
    dfs.add_storage(1, StorageDevice::new(11, "ssd", bytes(500), Curve::steps([(0., 5.), (10., 1.)])))
        .unwrap();
    let mut replicas = ReplicaManager::new();
    let f = dfs.create_file_at(1, "/a/b/f", bytes(100), None, false).unwrap();
    dfs.create_file_at(1, "/a/g", bytes(30), Some(11), false).unwrap();
    let b = dfs.lookup(1, "/a/b").unwrap();
    dfs.mount(b, 11).unwrap();
    dfs.record_access(f).unwrap();
    replicas
        .replicate_file(&mut dfs, f, &[ReplicaTarget::new(2, 20)])
        .unwrap();

    let exported = export_dfs(&dfs);
    let restored = import_dfs(&exported).unwrap();
    assert_eq!(export_dfs(&restored), exported);
    for (server, storage) in [(1, 10), (1, 11), (2, 20), (3, 30)] {
        assert_eq!(
            restored.used_size(server, storage).unwrap(),
            dfs.used_size(server, storage).unwrap()
        );
    }
    assert_eq!(total_size(&restored, 1, "/a"), bytes(130));
    assert_eq!(restored.mount_device_by_path(1, "/a/b/f"), Some(11));
    let restored_f = restored.lookup(1, "/a/b/f").unwrap();
    assert_eq!(restored.node(restored_f).unwrap().access_count(), 1);

    let restored_replicas = import_replicas(&export_replicas(&dfs, &replicas), &restored).unwrap();
    assert_eq!(restored_replicas.targets_of(restored_f), vec![ReplicaTarget::new(2, 20)]);
    assert_eq!(
        restored_replicas.replicas_of(restored_f),
        vec![FsObjectRef::new(2, restored.lookup(2, "/a/b/f").unwrap().node)]
    );
}

#[test]
fn malformed_import_is_reported() {
    let broken = Element::new("dfs").with_child(Element::new("server"));
    assert!(matches!(
        import_dfs(&broken),
        Err(ImportError::MissingAttribute { attribute: "id", .. })
    ));

    let broken = Element::new("dfs").with_child(Element::new("host").with_attr("id", 1));
    assert!(matches!(import_dfs(&broken), Err(ImportError::UnexpectedElement { .. })));

    let broken = Element::new("dfs").with_child(
        Element::new("server")
            .with_attr("id", 1)
            .with_child(Element::new("storage").with_attr("id", "x")),
    );
    assert!(matches!(import_dfs(&broken), Err(ImportError::InvalidAttribute { .. })
        | Err(ImportError::MissingAttribute { .. })));

    let dfs = three_servers(100);
    let replicas = Element::new("replicas").with_child(
        Element::new("replica_set")
            .with_attr("server", 1)
            .with_attr("path", "/missing"),
    );
    assert!(matches!(
        import_replicas(&replicas, &dfs),
        Err(ImportError::UnknownObject { server: 1, .. })
    ));
}
