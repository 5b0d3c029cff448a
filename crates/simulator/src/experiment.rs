use std::{
    cell::RefCell,
    io::Write,
    path::PathBuf,
    rc::Rc,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::{Duration, Instant},
};

use dfsim_dfs::replication_strategy::ReplicationStrategy;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use threadpool::ThreadPool;

use crate::{
    mode::SimulationMode,
    run_stats::RunStats,
    simulation::DfsSimulation,
    system::{SystemConfig, TaskPlan},
    trace::Trace,
};

#[derive(Clone)]
pub struct Plan {
    pub name: String,
    pub plan: TaskPlan,
}

struct Run {
    plan: Plan,
    system: (String, SystemConfig),
    mode: (String, SimulationMode),
    replication_strategy: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunResult {
    pub plan: String,
    pub system: String,
    pub mode: String,
    pub replication_strategy: String,
    pub run_stats: RunStats,
    /// Why the run could not start, if it did not.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Resolves a replication strategy name, `None` disables replication of uploads.
pub type ReplicationStrategyResolver = fn(&str) -> Option<Box<dyn ReplicationStrategy>>;

pub struct Experiment {
    seed: u64,
    plans: Vec<Plan>,
    systems: Vec<(String, SystemConfig)>,
    modes: Vec<(String, SimulationMode)>,
    replication_strategies: Vec<String>,
    replication_strategy_resolver: ReplicationStrategyResolver,
    traces_folder: Option<PathBuf>,
}

impl Experiment {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        seed: u64,
        plans: Vec<Plan>,
        systems: Vec<(String, SystemConfig)>,
        modes: Vec<(String, SimulationMode)>,
        replication_strategies: Vec<String>,
        replication_strategy_resolver: ReplicationStrategyResolver,
        traces_folder: Option<PathBuf>,
    ) -> Self {
        Self {
            seed,
            plans,
            systems,
            modes,
            replication_strategies,
            replication_strategy_resolver,
            traces_folder,
        }
    }

    pub fn run(self, threads: usize) -> Vec<RunResult> {
        if let Some(dir) = &self.traces_folder {
            std::fs::create_dir_all(dir).unwrap_or_else(|e| panic!("Can't create folder {}: {e:?}", dir.display()));
        }

        let runs = self
            .plans
            .into_iter()
            .cartesian_product(self.systems)
            .cartesian_product(self.modes)
            .cartesian_product(self.replication_strategies)
            .map(|(((plan, system), mode), replication_strategy)| Run {
                plan,
                system,
                mode,
                replication_strategy,
            })
            .collect::<Vec<_>>();

        let total_runs = runs.len();

        let finished_run_atomic = Arc::new(AtomicUsize::new(0));
        let results = Arc::new(Mutex::new(Vec::new()));

        let pool = ThreadPool::new(threads);
        let start_time = Instant::now();
        for run in runs.into_iter() {
            let finished_run_atomic = finished_run_atomic.clone();
            let results = results.clone();
            let traces_folder = self.traces_folder.clone();
            pool.execute(move || {
                let mut result = RunResult {
                    plan: run.plan.name.clone(),
                    system: run.system.0.clone(),
                    mode: run.mode.0.clone(),
                    replication_strategy: run.replication_strategy.clone(),
                    run_stats: RunStats::new(),
                    error: None,
                };

                let prepared = run.system.1.build().and_then(|model| {
                    let tasks = run.plan.plan.resolve(&model.topology)?;
                    Ok((model, tasks))
                });
                match prepared {
                    Ok((model, tasks)) => {
                        let mut sim = DfsSimulation::new(self.seed, model, tasks, run.mode.1);
                        if let Some(strategy) = (self.replication_strategy_resolver)(&run.replication_strategy) {
                            sim = sim.with_replication_strategy(strategy);
                        }
                        let trace = traces_folder.as_ref().map(|_| Rc::new(RefCell::new(Trace::new())));
                        if let Some(trace) = &trace {
                            sim.add_logger(trace.clone());
                        }

                        result.run_stats = sim.run().run_stats;

                        if let (Some(folder), Some(trace)) = (traces_folder, trace) {
                            trace.borrow().to_json(folder.join(format!(
                                "{}_{}_{}_{}.json",
                                run.plan.name, run.system.0, run.mode.0, run.replication_strategy
                            )));
                        }
                    }
                    Err(err) => result.error = Some(err.to_string()),
                }

                results.lock().unwrap().push(result);

                finished_run_atomic.fetch_add(1, Ordering::SeqCst);
                let finished_runs = finished_run_atomic.load(Ordering::SeqCst);

                let elapsed = start_time.elapsed();
                let remaining = Duration::from_secs_f64(
                    elapsed.as_secs_f64() / finished_runs as f64 * (total_runs - finished_runs) as f64,
                );
                print!("\r{}", " ".repeat(70));
                print!(
                    "\rFinished {}/{} [{}%] runs in {:.2?}, remaining time: {:.2?}",
                    finished_runs,
                    total_runs,
                    (finished_runs as f64 * 100. / total_runs as f64).round() as i32,
                    elapsed,
                    remaining
                );
                let _ = std::io::stdout().flush();
            });
        }

        pool.join();

        print!("\r{}", " ".repeat(70));
        println!("\rFinished {} runs in {:.2?}", total_runs, start_time.elapsed());

        let mut results = std::mem::take(&mut *results.lock().unwrap());
        results.sort_by_cached_key(|run| {
            (
                run.plan.clone(),
                run.system.clone(),
                run.mode.clone(),
                run.replication_strategy.clone(),
            )
        });
        results
    }
}
