use std::{cell::RefCell, io::Write, rc::Rc};

use env_logger::Builder;
use log::info;

use dfsim::{
    logger::StringLogger,
    metrics::MetricKind,
    mode::SimulationMode,
    simulation::DfsSimulation,
    system::SystemModel,
    task::{SimulationTask, TaskKind},
    topology::make_tree_topology,
};
use dfsim_dfs::{
    curve::Curve,
    dfs::DistributedFileSystem,
    registry::FsObjectRef,
    replicas::{ReplicaManager, ReplicaTarget},
    replication_strategy::ReplicationStrategy,
    storage::StorageDevice,
    units::{ByteSize, Unit},
};

/// Puts the only replica on the next server, on its slowest storage with enough space.
struct NextServerReplicationStrategy {}

impl ReplicationStrategy for NextServerReplicationStrategy {
    fn select_targets(&mut self, file: FsObjectRef, dfs: &DistributedFileSystem) -> Vec<ReplicaTarget> {
        let Ok(size) = dfs.file_size(file) else {
            return Vec::new();
        };
        let Ok(path) = dfs.path(file) else {
            return Vec::new();
        };
        let servers = dfs.servers().collect::<Vec<_>>();
        let Some(position) = servers.iter().position(|&server| server == file.server) else {
            return Vec::new();
        };
        let server = servers[(position + 1) % servers.len()];
        if server == file.server || dfs.lookup(server, &path).is_some() {
            return Vec::new();
        }
        let Ok(manager) = dfs.server(server) else {
            return Vec::new();
        };
        manager
            .storages()
            .filter(|storage| manager.free_size(storage.id()) >= size)
            .min_by(|a, b| a.speed_at(0.).bytes_per_second().total_cmp(&b.speed_at(0.).bytes_per_second()))
            .map(|storage| vec![ReplicaTarget::new(server, storage.id())])
            .unwrap_or_default()
    }
}

fn main() {
    Builder::from_default_env()
        .format(|buf, record| writeln!(buf, "{}", record.args()))
        .init();

    let topology = make_tree_topology(2, 2, 1e8, 0.0005).expect("Can't build topology");

    let mut dfs = DistributedFileSystem::new();
    let mut next_storage = 0;
    for server in topology.servers() {
        dfs.add_server(server);
        let ssd = StorageDevice::new(
            next_storage,
            "ssd",
            ByteSize::from_unit(1., Unit::GB),
            Curve::Constant(5e8),
        );
        let hdd = StorageDevice::new(
            next_storage + 1,
            "hdd",
            ByteSize::from_unit(10., Unit::GB),
            Curve::steps([(0., 1.5e8), (30., 5e7)]),
        );
        next_storage += 2;
        let hdd_id = hdd.id();
        dfs.add_storage(server, ssd).expect("Can't add storage");
        dfs.add_storage(server, hdd).expect("Can't add storage");
        let root = dfs.root(server).expect("Server without root");
        dfs.mount(root, hdd_id).expect("Can't mount root");
    }

    let servers = topology.servers();
    for (i, &server) in servers.iter().enumerate() {
        for j in 0..3 {
            dfs.create_file_at(
                server,
                &format!("/data/part_{}_{}", i, j),
                ByteSize::from_unit(200. + 100. * j as f64, Unit::MB),
                None,
                false,
            )
            .expect("Can't create file");
        }
    }
    info!("{} servers with {} files each", servers.len(), 3);

    let clients = topology.clients();
    let mut tasks = Vec::new();
    for round in 0..3 {
        for (i, &client) in clients.iter().enumerate() {
            tasks.push(SimulationTask {
                id: tasks.len() as u64,
                kind: TaskKind::Get,
                client,
                path: format!("/data/part_{}_{}", (i + round) % servers.len(), round),
                size: ByteSize::ZERO,
            });
        }
    }
    for (i, &client) in clients.iter().enumerate() {
        tasks.push(SimulationTask {
            id: tasks.len() as u64,
            kind: TaskKind::Put,
            client,
            path: format!("/results/client_{}", i),
            size: ByteSize::from_unit(50., Unit::MB),
        });
    }
    // Downloading the same file again shows the effect of the promotion.
    tasks.push(SimulationTask {
        id: tasks.len() as u64,
        kind: TaskKind::Get,
        client: clients[0],
        path: "/data/part_0_0".to_string(),
        size: ByteSize::ZERO,
    });

    let model = SystemModel {
        topology,
        dfs,
        replicas: ReplicaManager::new(),
    };
    let mode = SimulationMode::default()
        .with_metric(MetricKind::Hierarchical)
        .with_dynamic_routing(1.)
        .with_hierarchical();

    let logger = Rc::new(RefCell::new(StringLogger::new()));
    let mut sim = DfsSimulation::new(123, model, tasks, mode)
        .with_replication_strategy(Box::new(NextServerReplicationStrategy {}));
    sim.add_logger(logger.clone());
    let output = sim.run();

    println!("{}", logger.borrow().text());
    println!();
    for result in output.results.iter() {
        println!(
            "task {:>2} {:?} {:<22} {:?} in {:.3} s",
            result.task_id, result.kind, result.path, result.state, result.elapsed
        );
    }
    println!();
    print!(
        "{}",
        serde_yaml::to_string(&output.run_stats).expect("Can't serialize run stats")
    );
}
