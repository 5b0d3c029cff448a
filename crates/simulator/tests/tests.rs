use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};

use dfsim::{
    logger::StringLogger,
    metric::MetricContext,
    metrics::MetricKind,
    mode::SimulationMode,
    path::{DfsPathPicker, PathError},
    persistence::{export_snapshot, export_tasks, import_snapshot, import_tasks},
    planner::{HierarchicalPlanner, Migration},
    planners::lru_cascade::LruCascadePlanner,
    simulation::{DfsSimulation, SimulationOutput},
    storage_ops::StorageOperations,
    system::{SystemConfig, SystemModel, TaskPlan},
    task::{SimulationTask, TaskKind, TaskState},
    topology::{make_tree_topology, NodeKind, Topology},
    trace::{Trace, TraceEvent},
};
use dfsim_dfs::{
    curve::Curve,
    dfs::DistributedFileSystem,
    persistence::{Element, ImportError},
    registry::FsObjectRef,
    replicas::ReplicaManager,
    replication_strategies::random::{RandomReplicationStrategy, TargetDistribution},
    storage::{StorageDevice, StorageId},
    units::ByteSize,
};

const EPS: f64 = 1e-9;

fn model(yaml: &str) -> SystemModel {
    let config: SystemConfig = serde_yaml::from_str(yaml).unwrap();
    config.build().unwrap()
}

fn tasks(model: &SystemModel, yaml: &str) -> Vec<SimulationTask> {
    let plan: TaskPlan = serde_yaml::from_str(yaml).unwrap();
    plan.resolve(&model.topology).unwrap()
}

fn run(model: SystemModel, tasks: Vec<SimulationTask>, mode: SimulationMode) -> SimulationOutput {
    DfsSimulation::new(123, model, tasks, mode).run()
}

fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-6,
        "expected {}, got {}",
        expected,
        actual
    );
}

const SINGLE_SERVER: &str = "
nodes:
  - name: client
    type: Client
  - name: server
    type: Server
    storages:
      - name: disk
        capacity: 10000000
        speed: 1000000.0
links:
  - from: client
    to: server
    bandwidth: 1000000.0
    latency: 0.0
mounts:
  - server: server
    path: /
    storage: disk
files:
  - server: server
    path: /data/f
    size: 1000000
";

#[test]
fn simple_download() {
    let model = model(SINGLE_SERVER);
    let tasks = tasks(&model, "tasks: [{kind: Get, client: client, path: /data/f}]");
    let output = run(model, tasks, SimulationMode::default());

    assert_eq!(output.results.len(), 1);
    let result = &output.results[0];
    assert_eq!(result.state, TaskState::Done);
    assert_close(result.elapsed, 1.0);
    assert_close(result.average_speed, 1_000_000.);
    assert_close(result.transferred, 1_000_000.);
    assert_eq!(result.paths.len(), 1);
    assert_eq!(result.samples.len(), 2);

    let file = output.dfs.lookup(1, "/data/f").unwrap();
    assert_eq!(output.dfs.node(file).unwrap().access_count(), 1);
    assert_eq!(output.run_stats.completed_task_count, 1);
    assert_close(output.run_stats.total_time, 1.0);
}

#[test]
fn upload_is_rejected_without_space() {
    let yaml = SINGLE_SERVER.replace("capacity: 10000000", "capacity: 1000100");
    let model = model(&yaml);
    let tasks = tasks(&model, "tasks: [{kind: Put, client: client, path: /data/new, size: 200}]");
    let output = run(model, tasks, SimulationMode::default());

    let result = &output.results[0];
    assert_eq!(result.state, TaskState::NotEnoughSpaceOnDevice);
    assert_close(result.elapsed, 0.001);
    assert_eq!(result.transferred, 0.);
    assert!(output.dfs.lookup(1, "/data/new").is_none());
    assert_eq!(output.dfs.used_size(1, 0).unwrap(), ByteSize::new(1_000_000));
}

#[test]
fn forced_upload_expands_storage() {
    let yaml = SINGLE_SERVER.replace("capacity: 10000000", "capacity: 1000100");
    let model = model(&yaml);
    let tasks = tasks(&model, "tasks: [{kind: Put, client: client, path: /data/new, size: 200}]");
    let output = run(model, tasks, SimulationMode::default().with_force_expansion());

    let result = &output.results[0];
    assert_eq!(result.state, TaskState::Done);
    assert_close(result.elapsed, 0.0002);
    assert!(output.dfs.lookup(1, "/data/new").is_some());
    assert_eq!(output.dfs.capacity(1, 0).unwrap(), ByteSize::new(1_000_200));
}

#[test]
fn overwrite_resizes_existing_file() {
    let model = model(SINGLE_SERVER);
    let tasks = tasks(&model, "tasks: [{kind: Put, client: client, path: /data/f, size: 500000}]");
    let output = run(model, tasks, SimulationMode::default());

    assert_eq!(output.results[0].state, TaskState::Done);
    assert_close(output.results[0].elapsed, 0.5);
    let file = output.dfs.lookup(1, "/data/f").unwrap();
    assert_eq!(output.dfs.file_size(file).unwrap(), ByteSize::new(500_000));
    assert_eq!(output.dfs.used_size(1, 0).unwrap(), ByteSize::new(500_000));
}

#[test]
fn failed_selection_is_charged_query_time() {
    let yaml = SINGLE_SERVER.replace("links:", "  - {name: lonely, type: Client}\nlinks:");
    let model = model(&yaml);
    let tasks = tasks(
        &model,
        "
tasks:
  - {kind: Get, client: client, path: /missing}
  - {kind: Get, client: lonely, path: /data/f}
  - {kind: Get, client: client, path: /data/f}
  - {kind: Put, client: client, path: /nowhere/f, size: 10}
",
    );
    let output = run(model, tasks, SimulationMode::default());

    let states = output.results.iter().map(|result| result.state).collect::<Vec<_>>();
    assert_eq!(
        states,
        vec![
            TaskState::ObjectNotFound,
            TaskState::NoNeighboursAvailable,
            TaskState::Done,
            TaskState::ObjectNotFound
        ]
    );
    assert_close(output.results[0].elapsed, 0.001);
    assert_eq!(output.results[1].elapsed, 0.);
    assert_close(output.results[1].start_time, 0.001);
    assert_close(output.results[2].start_time, 0.001);
    assert_close(output.results[3].start_time, 1.001);
    for (i, result) in output.results.iter().enumerate() {
        assert_eq!(result.task_id, i as u64);
        if i > 0 {
            assert!(result.start_time >= output.results[i - 1].end_time() - EPS);
        }
    }
    assert_eq!(output.run_stats.count(TaskState::ObjectNotFound), 2);
}

#[test]
fn unmounted_file_is_reported() {
    let yaml = "
nodes:
  - {name: client, type: Client}
  - name: server
    type: Server
    storages: [{name: disk, capacity: 1000, speed: 100.0}]
links:
  - {from: client, to: server, bandwidth: 100.0}
files:
  - {server: server, path: /f, size: 10}
";
    let model = model(yaml);
    let tasks = tasks(&model, "tasks: [{kind: Get, client: client, path: /f}]");
    let output = run(model, tasks, SimulationMode::default());
    assert_eq!(output.results[0].state, TaskState::NotMounted);
}

const PARALLEL_LINKS: &str = "
nodes:
  - {name: client, type: Client}
  - name: server
    type: Server
    storages: [{name: disk, capacity: 100000000, speed: 1000000000.0}]
links:
  - from: client
    to: server
    bandwidth: [{time: 0.0, value: 2000000.0}, {time: 1.0, value: 0.0}]
    latency: 0.01
  - {from: client, to: server, bandwidth: 1000000.0, latency: 0.02}
mounts:
  - {server: server, path: /, storage: disk}
files:
  - {server: server, path: /f, size: 4000000}
";

#[test]
fn dynamic_routing_switches_path() {
    let model = model(PARALLEL_LINKS);
    let tasks = tasks(&model, "tasks: [{kind: Get, client: client, path: /f}]");
    let mode = SimulationMode::default()
        .with_metric(MetricKind::ThroughputLatency)
        .with_dynamic_routing(0.5);
    let output = run(model, tasks, mode);

    let result = &output.results[0];
    assert_eq!(result.state, TaskState::Done);
    assert_eq!(result.paths.len(), 2);
    assert_eq!(result.paths[0].links, vec![0]);
    assert_eq!(result.paths[1].links, vec![1]);
    assert_close(result.total_latency, 0.03);
    assert_close(result.end_time(), 3.03);
    assert_eq!(output.run_stats.reroute_count, 1);
}

#[test]
fn upload_reroute_keeps_destination() {
    let model = model(PARALLEL_LINKS);
    let tasks = tasks(&model, "tasks: [{kind: Put, client: client, path: /g, size: 4000000}]");
    let output = run(model, tasks, SimulationMode::default().with_dynamic_routing(0.5));

    let result = &output.results[0];
    assert_eq!(result.state, TaskState::Done);
    assert_eq!(result.paths.len(), 2);
    assert_eq!(result.paths[0].links, vec![0]);
    assert_eq!(result.paths[1].links, vec![1]);
    for path in result.paths.iter() {
        assert_eq!(path.server, 1);
        assert_eq!(path.storage, 0);
    }
    assert_close(result.total_latency, 0.01 + 0.02);
    assert_close(result.end_time(), 3.03);
    let file = output.dfs.lookup(1, "/g").unwrap();
    assert_eq!(output.dfs.effective_mount_device(file).unwrap(), Some(0));
    assert_eq!(output.dfs.file_size(file).unwrap(), ByteSize::new(4_000_000));
}

#[test]
fn slices_can_be_rounded_up() {
    let model = model(SINGLE_SERVER);
    let tasks = tasks(&model, "tasks: [{kind: Put, client: client, path: /data/g, size: 750000}]");
    let mode: SimulationMode = serde_yaml::from_str("round_up_slices: true").unwrap();
    let output = run(model, tasks, mode);

    let result = &output.results[0];
    assert_eq!(result.state, TaskState::Done);
    assert_close(result.elapsed, 1.0);
    assert_close((result.elapsed / 0.5).fract(), 0.);
    assert_close(result.average_speed, 750_000.);
}

#[test]
fn config_curve_steps_are_sorted() {
    let yaml = "
nodes:
  - {name: client, type: Client}
  - name: server
    type: Server
    storages:
      - name: disk
        capacity: 1000
        speed: [{time: 5.0, value: 10.0}, {time: 0.0, value: 100.0}]
links:
  - from: client
    to: server
    bandwidth: [{time: 1.0, value: 0.0}, {time: 0.0, value: 2000000.0}]
";
    let model = model(yaml);
    let link = model.topology.link(0).unwrap();
    assert_close(link.bandwidth_at(0.5).bytes_per_second(), 2_000_000.);
    assert_close(link.bandwidth_at(1.5).bytes_per_second(), 0.);
    let disk = model.dfs.storage(0).unwrap();
    assert_close(disk.speed_at(1.).bytes_per_second(), 100.);
    assert_close(disk.speed_at(6.).bytes_per_second(), 10.);
}

#[test]
fn static_routing_stalls_on_link_failure() {
    let model = model(PARALLEL_LINKS);
    let tasks = tasks(&model, "tasks: [{kind: Get, client: client, path: /f}]");
    let output = run(model, tasks, SimulationMode::default());

    let result = &output.results[0];
    assert_eq!(result.state, TaskState::TransferStalled);
    assert_close(result.transferred, 2_000_000.);
    assert_close(result.end_time(), 1.01);
}

#[test]
fn stalled_upload_is_rolled_back() {
    let model = model(PARALLEL_LINKS);
    let tasks = tasks(&model, "tasks: [{kind: Put, client: client, path: /g, size: 4000000}]");
    let output = run(model, tasks, SimulationMode::default());

    assert_eq!(output.results[0].state, TaskState::TransferStalled);
    assert!(output.dfs.lookup(1, "/g").is_none());
    assert_eq!(output.dfs.used_size(1, 0).unwrap(), ByteSize::new(4_000_000));
}

#[test]
fn metric_choice_changes_path() {
    let yaml = "
nodes:
  - {name: client, type: Client}
  - name: server
    type: Server
    storages: [{name: disk, capacity: 1000000, speed: 1000000000.0}]
links:
  - {from: client, to: server, bandwidth: 1000.0, latency: 0.001}
  - {from: client, to: server, bandwidth: 10000000.0, latency: 0.1}
mounts:
  - {server: server, path: /, storage: disk}
files:
  - {server: server, path: /f, size: 100000}
";
    let model = model(yaml);
    let task = tasks(&model, "tasks: [{kind: Get, client: client, path: /f}]").remove(0);
    let storage_ops = StorageOperations::new();
    let ctx = MetricContext {
        dfs: &model.dfs,
        replicas: &model.replicas,
        storage_ops: &storage_ops,
        planner: None,
        time: 0.,
        exclude_operation: None,
    };

    let hop_count = DfsPathPicker::new(MetricKind::HopCount.build());
    let first = hop_count.select_path(&model.topology, &ctx, &task, None).unwrap();
    let second = hop_count.select_path(&model.topology, &ctx, &task, None).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.links, vec![0]);
    assert_eq!(first.nodes, vec![0, 1]);

    let widest = DfsPathPicker::new(MetricKind::MaxBandwidth.build());
    assert_eq!(widest.select_path(&model.topology, &ctx, &task, None).unwrap().links, vec![1]);

    let throughput = DfsPathPicker::new(MetricKind::ThroughputLatency.build());
    let path = throughput.select_path(&model.topology, &ctx, &task, None).unwrap();
    assert_eq!(path.links, vec![1]);
    assert_close(path.weight.value, 0.11);
    assert_close(path.latency(&model.topology), 0.1);
    assert_close(path.bandwidth(&model.topology, 0.).bytes_per_second(), 1e7);
}

#[test]
fn path_search_routes_through_routers_only() {
    let yaml = "
nodes:
  - {name: client, type: Client}
  - {name: other_client, type: Client}
  - {name: router, type: Router}
  - name: server
    type: Server
    storages: [{name: disk, capacity: 1000, speed: 1000.0}]
links:
  - {from: client, to: other_client, bandwidth: 1000000.0}
  - {from: other_client, to: server, bandwidth: 1000000.0}
  - {from: client, to: router, bandwidth: 10.0}
  - {from: router, to: server, bandwidth: 10.0}
mounts:
  - {server: server, path: /, storage: disk}
files:
  - {server: server, path: /f, size: 100}
";
    let model = model(yaml);
    let task = tasks(&model, "tasks: [{kind: Get, client: client, path: /f}]").remove(0);
    let storage_ops = StorageOperations::new();
    let ctx = MetricContext {
        dfs: &model.dfs,
        replicas: &model.replicas,
        storage_ops: &storage_ops,
        planner: None,
        time: 0.,
        exclude_operation: None,
    };
    let picker = DfsPathPicker::new(MetricKind::HopCount.build());
    let path = picker.select_path(&model.topology, &ctx, &task, None).unwrap();
    assert_eq!(path.nodes, vec![0, 2, 3]);
    assert_eq!(path.links, vec![2, 3]);

    let missing = SimulationTask {
        path: "/nothing".to_string(),
        ..task
    };
    assert_eq!(
        picker.select_path(&model.topology, &ctx, &missing, None),
        Err(PathError::ObjectNotFound)
    );
}

const REPLICATED: &str = "
nodes:
  - {name: client, type: Client}
  - name: s1
    type: Server
    storages: [{name: disk, capacity: 1000, speed: 1000.0}]
  - name: s2
    type: Server
    storages: [{name: disk, capacity: 150, speed: 1000.0}]
links:
  - {from: client, to: s1, bandwidth: 1000.0}
  - {from: client, to: s2, bandwidth: 1000.0}
mounts:
  - {server: s1, path: /, storage: disk}
  - {server: s2, path: /, storage: disk}
files:
  - {server: s1, path: /f, size: 100}
replicas:
  - server: s1
    path: /f
    targets: [{server: s2, storage: disk}]
";

#[test]
fn upload_checks_replicas() {
    let model = model(REPLICATED);
    let primary = model.dfs.lookup(1, "/f").unwrap();
    assert_eq!(model.replicas.replicas_of(primary).len(), 1);
    let tasks = tasks(
        &model,
        "
tasks:
  - {kind: Put, client: client, path: /f, size: 200}
  - {kind: Put, client: client, path: /f, size: 140}
",
    );
    let output = run(model, tasks, SimulationMode::default());

    assert_eq!(output.results[0].state, TaskState::NotEnoughSpaceForReplica);
    assert_close(output.results[0].elapsed, 0.001);
    assert_eq!(output.results[1].state, TaskState::Done);
    assert_eq!(output.results[1].paths[0].server, 1);
    let replica = output.dfs.lookup(2, "/f").unwrap();
    assert_eq!(output.dfs.file_size(replica).unwrap(), ByteSize::new(140));
}

#[test]
fn uploads_are_replicated_by_strategy() {
    let model = model(REPLICATED);
    let tasks = tasks(&model, "tasks: [{kind: Put, client: client, path: /new, size: 10}]");
    let logger = Rc::new(RefCell::new(StringLogger::new()));
    let trace = Rc::new(RefCell::new(Trace::new()));
    let mut sim = DfsSimulation::new(123, model, tasks, SimulationMode::default()).with_replication_strategy(
        Box::new(RandomReplicationStrategy::new(1, TargetDistribution::AnyStorage)),
    );
    sim.add_logger(logger.clone());
    sim.add_logger(trace.clone());
    let output = sim.run();

    assert_eq!(output.results[0].state, TaskState::Done);
    let primary = output.dfs.lookup(1, "/new").unwrap();
    let replicas = output.replicas.replicas_of(primary);
    assert_eq!(replicas.len(), 1);
    assert_eq!(replicas[0].server, 2);
    assert_eq!(output.run_stats.replica_count, 1);

    let logger = logger.borrow();
    let lines = &logger.lines;
    assert!(lines[0].contains("simulation started with 1 task(s)"));
    assert!(lines.iter().any(|line| line.contains("replication of /new finished with 1 replica(s)")));
    assert!(lines.last().unwrap().contains("simulation finished"));
    let trace = trace.borrow();
    let events = &trace.events;
    assert!(matches!(events[0], TraceEvent::SimulationStarted { tasks: 1, .. }));
    assert!(events
        .iter()
        .any(|event| matches!(event, TraceEvent::ReplicationFinished { replicas: 1, .. })));
}

const FAST: u32 = 0;
const SLOW: u32 = 1;

fn tiered_dfs() -> DistributedFileSystem {
    let mut dfs = DistributedFileSystem::new();
    dfs.add_server(1);
    dfs.add_storage(1, StorageDevice::new(FAST, "fast", ByteSize::new(100), Curve::Constant(1000.)))
        .unwrap();
    dfs.add_storage(1, StorageDevice::new(SLOW, "slow", ByteSize::new(1000), Curve::Constant(100.)))
        .unwrap();
    for (path, size, storage) in [("/a1", 50, FAST), ("/a2", 50, FAST), ("/b", 50, SLOW), ("/c", 950, SLOW)] {
        dfs.create_file_at(1, path, ByteSize::new(size), Some(storage), false)
            .unwrap();
    }
    dfs
}

fn get(id: u64, path: &str) -> SimulationTask {
    SimulationTask {
        id,
        kind: TaskKind::Get,
        client: 0,
        path: path.to_string(),
        size: ByteSize::ZERO,
    }
}

#[test]
fn lru_cascade_promotes_and_demotes() {
    let mut dfs = tiered_dfs();
    let mut planner = LruCascadePlanner::new();
    let a1 = dfs.lookup(1, "/a1").unwrap();
    let a2 = dfs.lookup(1, "/a2").unwrap();
    let b = dfs.lookup(1, "/b").unwrap();
    let c = dfs.lookup(1, "/c").unwrap();
    planner.on_after_access(&mut dfs, a1, &get(0, "/a1"), 1.);
    planner.on_after_access(&mut dfs, a2, &get(1, "/a2"), 2.);

    assert_eq!(planner.highest_available_storage(&dfs, b, 10.), Some(FAST));
    assert_eq!(planner.highest_available_storage(&dfs, c, 10.), Some(SLOW));
    assert_eq!(dfs.effective_mount_device(b).unwrap(), Some(SLOW));

    let migrations = planner.on_before_access(&mut dfs, b, &get(2, "/b"), 10.);
    let moved = migrations
        .iter()
        .map(|migration| (migration.path.as_str(), migration.from, migration.to))
        .collect::<Vec<_>>();
    assert_eq!(moved, vec![("/a1", FAST, SLOW), ("/b", SLOW, FAST)]);
    assert_eq!(dfs.effective_mount_device(a1).unwrap(), Some(SLOW));
    assert_eq!(dfs.effective_mount_device(a2).unwrap(), Some(FAST));
    assert_eq!(dfs.effective_mount_device(b).unwrap(), Some(FAST));
    assert_eq!(dfs.used_size(1, FAST).unwrap(), ByteSize::new(100));
    assert_eq!(dfs.used_size(1, SLOW).unwrap(), ByteSize::new(1000));

    // Already on the fastest tier.
    assert!(planner.on_before_access(&mut dfs, b, &get(3, "/b"), 11.).is_empty());
    planner.on_after_access(&mut dfs, b, &get(3, "/b"), 11.);
    assert_eq!(planner.last_access(b), Some(11.));
    assert_eq!(dfs.node(b).unwrap().access_count(), 1);
}

#[test]
fn lru_cascade_keeps_files_accessed_now() {
    let mut dfs = tiered_dfs();
    let mut planner = LruCascadePlanner::new();
    let a1 = dfs.lookup(1, "/a1").unwrap();
    let a2 = dfs.lookup(1, "/a2").unwrap();
    let b = dfs.lookup(1, "/b").unwrap();
    planner.on_after_access(&mut dfs, a1, &get(0, "/a1"), 5.);
    planner.on_after_access(&mut dfs, a2, &get(1, "/a2"), 5.);

    assert!(planner.on_before_access(&mut dfs, b, &get(2, "/b"), 5.).is_empty());
    assert_eq!(dfs.effective_mount_device(b).unwrap(), Some(SLOW));
}

#[test]
fn hierarchical_mode_migrates_on_access() {
    let mut topology = Topology::new();
    let client = topology.add_node("client", NodeKind::Client).unwrap();
    topology.add_node_with_id(1, "server", NodeKind::Server).unwrap();
    topology.add_link(client, 1, Curve::Constant(1e6), 0.).unwrap();
    let model = SystemModel {
        topology,
        dfs: tiered_dfs(),
        replicas: ReplicaManager::new(),
    };
    let mode = SimulationMode::default()
        .with_metric(MetricKind::Hierarchical)
        .with_hierarchical();
    let output = run(model, vec![get(0, "/b")], mode);

    assert_eq!(output.results[0].state, TaskState::Done);
    assert_eq!(output.run_stats.migration_count, 2);
    let b = output.dfs.lookup(1, "/b").unwrap();
    assert_eq!(output.dfs.effective_mount_device(b).unwrap(), Some(FAST));
    assert_eq!(output.dfs.node(b).unwrap().access_count(), 1);
}

/// LRU cascade planner counting before-access calls.
struct CountingPlanner {
    inner: LruCascadePlanner,
    before_access_calls: Rc<Cell<usize>>,
}

impl HierarchicalPlanner for CountingPlanner {
    fn on_before_access(
        &mut self,
        dfs: &mut DistributedFileSystem,
        file: FsObjectRef,
        task: &SimulationTask,
        time: f64,
    ) -> Vec<Migration> {
        self.before_access_calls.set(self.before_access_calls.get() + 1);
        self.inner.on_before_access(dfs, file, task, time)
    }

    fn on_after_access(&mut self, dfs: &mut DistributedFileSystem, file: FsObjectRef, task: &SimulationTask, time: f64) {
        self.inner.on_after_access(dfs, file, task, time);
    }

    fn highest_available_storage(&self, dfs: &DistributedFileSystem, file: FsObjectRef, time: f64) -> Option<StorageId> {
        self.inner.highest_available_storage(dfs, file, time)
    }
}

#[test]
fn reroute_runs_before_access_hook() {
    let mut topology = Topology::new();
    let client = topology.add_node("client", NodeKind::Client).unwrap();
    topology.add_node_with_id(1, "server", NodeKind::Server).unwrap();
    topology
        .add_link(client, 1, Curve::steps([(0., 40.), (1., 0.)]), 0.01)
        .unwrap();
    topology.add_link(client, 1, Curve::Constant(10.), 0.02).unwrap();
    let model = SystemModel {
        topology,
        dfs: tiered_dfs(),
        replicas: ReplicaManager::new(),
    };
    let mode = SimulationMode::default()
        .with_metric(MetricKind::Hierarchical)
        .with_dynamic_routing(0.5)
        .with_hierarchical();
    let calls = Rc::new(Cell::new(0));
    let planner = CountingPlanner {
        inner: LruCascadePlanner::new(),
        before_access_calls: calls.clone(),
    };
    let output = DfsSimulation::new(123, model, vec![get(0, "/b")], mode)
        .with_planner(Box::new(planner))
        .run();

    let result = &output.results[0];
    assert_eq!(result.state, TaskState::Done);
    assert_eq!(result.paths.len(), 2);
    assert_eq!(output.run_stats.reroute_count, 1);
    assert_eq!(calls.get(), 2);
    assert_close(result.total_latency, 0.03);
    assert_close(result.end_time(), 2.03);
}

#[test]
fn migrations_are_not_credited_before_start() {
    let dfs = tiered_dfs();
    let mut ops = StorageOperations::new();
    assert!(ops.update(&dfs, 0.).is_empty());

    let migration = Migration {
        server: 1,
        file: dfs.lookup(1, "/a1").unwrap().node,
        path: "/a1".to_string(),
        size: ByteSize::new(150),
        from: FAST,
        to: SLOW,
    };
    ops.add_migration(migration, 10.);
    assert!(ops.update(&dfs, 10.5).is_empty());
    assert!(ops.update(&dfs, 11.).is_empty());
    let finished = ops.update(&dfs, 11.5);
    assert_eq!(finished.len(), 1);
    assert_eq!(finished[0].path, "/a1");
}

#[test]
fn storage_operations_share_throughput() {
    let dfs = tiered_dfs();
    let mut ops = StorageOperations::new();
    assert_close(ops.share_for_new(&dfs, FAST, 0., None).bytes_per_second(), 1000.);
    let first = ops.add_unmanaged(FAST);
    let second = ops.add_unmanaged(FAST);
    assert_close(ops.share_of(&dfs, first, 0.).bytes_per_second(), 500.);
    assert_close(ops.share_for_new(&dfs, FAST, 0., Some(second)).bytes_per_second(), 500.);
    assert!(ops.remove_unmanaged(second));
    assert!(!ops.remove_unmanaged(second));

    let migration = Migration {
        server: 1,
        file: dfs.lookup(1, "/a1").unwrap().node,
        path: "/x".to_string(),
        size: ByteSize::new(150),
        from: FAST,
        to: SLOW,
    };
    let id = ops.add_migration(migration, 0.);
    assert_close(ops.share_of(&dfs, id, 0.).bytes_per_second(), 100.);
    assert!(ops.update(&dfs, 1.).is_empty());
    assert_eq!(ops.update(&dfs, 2.).len(), 1);
    assert_eq!(ops.pending_migrations(), 0);
    assert_eq!(ops.count_on(FAST), 1);
    assert!(ops.finalize().is_empty());
    assert!(ops.is_empty());
}

#[test]
fn tasks_and_snapshots_persist() {
    let model = model(REPLICATED);
    let tasks = tasks(
        &model,
        "
tasks:
  - {kind: Get, client: client, path: /f}
  - {kind: Put, client: client, path: /g, size: 7}
",
    );
    let element = export_tasks(&tasks, &model.topology);
    assert_eq!(import_tasks(&element, &model.topology).unwrap(), tasks);

    let snapshot = export_snapshot(&model.dfs, &model.replicas, &tasks, &model.topology);
    let (dfs, replicas, restored) = import_snapshot(&snapshot, &model.topology).unwrap();
    assert_eq!(restored, tasks);
    let primary = dfs.lookup(1, "/f").unwrap();
    assert_eq!(replicas.targets_of(primary).len(), 1);
    assert_eq!(dfs.used_size(2, 1).unwrap(), ByteSize::new(100));

    let unknown = Element::new("tasks").with_child(
        Element::new("task")
            .with_attr("id", 0)
            .with_attr("kind", "get")
            .with_attr("client", "nobody")
            .with_attr("path", "/f"),
    );
    assert!(matches!(
        import_tasks(&unknown, &model.topology),
        Err(ImportError::UnknownNode(name)) if name == "nobody"
    ));
    let bad_kind = Element::new("tasks").with_child(Element::new("task").with_attr("kind", "copy"));
    assert!(matches!(
        import_tasks(&bad_kind, &model.topology),
        Err(ImportError::InvalidAttribute { attribute: "kind", .. })
    ));
}

#[test]
fn config_errors_are_reported() {
    let config: SystemConfig = serde_yaml::from_str(
        "
nodes:
  - {name: client, type: Client}
mounts:
  - {server: client, path: /, storage: disk}
",
    )
    .unwrap();
    assert!(matches!(config.build(), Err(dfsim::system::ConfigError::NotAServer(name)) if name == "client"));

    let config: SystemConfig = serde_yaml::from_str(
        "
nodes:
  - {name: client, type: Client}
links:
  - {from: client, to: nowhere, bandwidth: 1.0}
",
    )
    .unwrap();
    assert!(matches!(config.build(), Err(dfsim::system::ConfigError::UnknownNode(name)) if name == "nowhere"));
}

#[test]
fn mode_defaults() {
    let mode: SimulationMode = serde_yaml::from_str("metric: HopCount").unwrap();
    assert_eq!(mode.metric, MetricKind::HopCount);
    assert!(!mode.dynamic_routing);
    assert_eq!(mode.time_resolution, 0.5);
    assert_eq!(mode.recalculation_interval, 0.5);
    assert_eq!(mode.registry_query_time, 0.001);
    assert_eq!(SimulationMode::default().metric, MetricKind::ThroughputLatency);
}

#[test]
fn tree_topology_layout() {
    let topology = make_tree_topology(2, 3, 100., 0.001).unwrap();
    assert_eq!(topology.nodes().count(), 1 + 2 * (3 + 2));
    assert_eq!(topology.servers().len(), 6);
    assert_eq!(topology.clients().len(), 2);
    assert_eq!(topology.links().len(), 2 * (3 + 2));
    let root = topology.node_by_name("root_switch").unwrap().id;
    assert_eq!(topology.neighbours(root).count(), 2);
}
