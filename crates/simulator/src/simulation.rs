use std::{cell::RefCell, rc::Rc};

use dslab_core::Simulation;

use dfsim_dfs::{dfs::DistributedFileSystem, replicas::ReplicaManager, replication_strategy::ReplicationStrategy};

use crate::{
    logger::DfsSimulatorLogger,
    mode::SimulationMode,
    planner::HierarchicalPlanner,
    planners::lru_cascade::LruCascadePlanner,
    run_stats::RunStats,
    simulator::{DfsSimulator, Start},
    system::SystemModel,
    task::{SimulationTask, TaskResult},
};

/// State of the model and results after all tasks were processed.
pub struct SimulationOutput {
    pub results: Vec<TaskResult>,
    pub run_stats: RunStats,
    pub dfs: DistributedFileSystem,
    pub replicas: ReplicaManager,
}

/// One run of a task queue on a system.
pub struct DfsSimulation {
    pub sim: Simulation,
    model: SystemModel,
    tasks: Vec<SimulationTask>,
    mode: SimulationMode,
    replication_strategy: Option<Box<dyn ReplicationStrategy>>,
    planner: Option<Box<dyn HierarchicalPlanner>>,
    loggers: Vec<Rc<RefCell<dyn DfsSimulatorLogger>>>,
}

impl DfsSimulation {
    pub fn new(seed: u64, model: SystemModel, tasks: Vec<SimulationTask>, mode: SimulationMode) -> Self {
        DfsSimulation {
            sim: Simulation::new(seed),
            model,
            tasks,
            mode,
            replication_strategy: None,
            planner: None,
            loggers: Vec::new(),
        }
    }

    /// Strategy replicating files created by uploads.
    pub fn with_replication_strategy(mut self, replication_strategy: Box<dyn ReplicationStrategy>) -> Self {
        self.replication_strategy = Some(replication_strategy);
        self
    }

    /// Planner used in hierarchical mode instead of [LruCascadePlanner].
    pub fn with_planner(mut self, planner: Box<dyn HierarchicalPlanner>) -> Self {
        self.planner = Some(planner);
        self
    }

    pub fn add_logger(&mut self, logger: Rc<RefCell<dyn DfsSimulatorLogger>>) {
        self.loggers.push(logger);
    }

    pub fn run(mut self) -> SimulationOutput {
        let topology = Rc::new(self.model.topology);
        let dfs = Rc::new(RefCell::new(self.model.dfs));
        let replicas = Rc::new(RefCell::new(self.model.replicas));

        let mut simulator = DfsSimulator::new(
            topology,
            dfs.clone(),
            replicas.clone(),
            self.tasks,
            self.mode.clone(),
            self.sim.create_context("dfs_simulator"),
        );
        if self.mode.hierarchical {
            simulator = simulator.with_planner(
                self.planner
                    .unwrap_or_else(|| Box::new(LruCascadePlanner::new())),
            );
        }
        if let Some(replication_strategy) = self.replication_strategy {
            simulator = simulator.with_replication_strategy(replication_strategy);
        }
        for logger in self.loggers {
            simulator.add_logger(logger);
        }
        let simulator = Rc::new(RefCell::new(simulator));
        let simulator_id = self.sim.add_handler("dfs_simulator", simulator.clone());

        self.sim.create_context("root").emit_now(Start {}, simulator_id);
        self.sim.step_until_no_events();

        let simulator = simulator.borrow();
        let output = SimulationOutput {
            results: simulator.results().to_vec(),
            run_stats: simulator.run_stats().clone(),
            dfs: dfs.borrow().clone(),
            replicas: replicas.borrow().clone(),
        };
        output
    }
}
