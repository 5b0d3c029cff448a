use std::{
    collections::{BTreeMap, HashMap},
    fs::File,
    io::Write,
    path::{Path, PathBuf},
};

use clap::Parser;
use dfsim::{
    experiment::{Experiment, Plan, RunResult},
    mode::SimulationMode,
    run_stats::RunStats,
    system::{SystemConfig, TaskPlan},
};
use dfsim_dfs::{
    replication_strategies::random::{RandomReplicationStrategy, TargetDistribution},
    replication_strategy::ReplicationStrategy,
};
use env_logger::Builder;
use serde::Deserialize;

#[derive(Deserialize)]
struct Config {
    plans: Vec<PathBuf>,
    systems: Vec<PathBuf>,
    modes: Vec<PathBuf>,
    replication_strategies: Vec<String>,
}

/// Runs batch experiment.
#[derive(Parser, Debug)]
struct Args {
    /// Path to config.
    #[arg(short, long)]
    config: PathBuf,

    /// Path to folder with traces.
    #[arg(short, long, default_value = None)]
    traces: Option<PathBuf>,

    /// Path to file with results.
    #[arg(short, long)]
    output: PathBuf,

    /// Do not run experiments, just read results from --output.
    #[arg(long)]
    precalculated: bool,

    /// Number of threads.
    #[arg(long, default_value_t = std::thread::available_parallelism().unwrap().get())]
    threads: usize,
}

fn filename(path: impl AsRef<Path>) -> String {
    path.as_ref()
        .file_name()
        .unwrap()
        .to_str()
        .unwrap()
        .split('.')
        .next()
        .unwrap()
        .to_string()
}

fn read_name(name: &str) -> (&str, HashMap<&str, &str>) {
    let open = name.find('[');
    if open.is_none() {
        return (name, HashMap::new());
    }
    (
        &name[..open.unwrap()],
        name[open.unwrap() + 1..name.len() - 1]
            .split(',')
            .map(|s| s.split('=').collect::<Vec<_>>())
            .map(|v| (v[0], v[1]))
            .collect(),
    )
}

fn replication_strategy_resolver(name: &str) -> Option<Box<dyn ReplicationStrategy>> {
    let (name, args) = read_name(name);
    match name {
        "None" => None,
        "Random" => Some(Box::new(RandomReplicationStrategy::new(
            args["replication_factor"].parse().unwrap(),
            match args.get("target_distribution").copied().unwrap_or("AnyStorage") {
                "AnyStorage" => TargetDistribution::AnyStorage,
                "FastestStorage" => TargetDistribution::FastestStorage,
                x => panic!("Unknown target distribution {}", x),
            },
        ))),
        x => panic!("Unknown replication strategy {}", x),
    }
}

struct ResultRow {
    name: String,
    runs: usize,
    done_share: f64,
    avg_task_time: f64,
    avg_speed: f64,
    avg_slowdown: f64,
    reroutes: f64,
    migrations: f64,
}

fn main() {
    Builder::from_default_env()
        .format(|buf, record| writeln!(buf, "{}", record.args()))
        .init();

    let args = Args::parse();
    let config: Config = serde_yaml::from_str(&std::fs::read_to_string(args.config).expect("Can't read config file"))
        .expect("Can't parse config file");

    let result: Vec<RunResult> = if args.precalculated {
        serde_json::from_str(&std::fs::read_to_string(args.output).expect("Can't read file with result"))
            .expect("Can't parse file with result")
    } else {
        let experiment = Experiment::new(
            123,
            config
                .plans
                .into_iter()
                .enumerate()
                .map(|(i, path)| Plan {
                    name: format!("{}_{}", i, filename(&path)),
                    plan: TaskPlan::from_yaml(path),
                })
                .collect(),
            config
                .systems
                .into_iter()
                .enumerate()
                .map(|(i, path)| (format!("{}_{}", i, filename(&path)), SystemConfig::from_yaml(path)))
                .collect(),
            config
                .modes
                .into_iter()
                .map(|path| {
                    let mode = SimulationMode::from_yaml(path);
                    (mode.label(), mode)
                })
                .collect(),
            config.replication_strategies,
            replication_strategy_resolver,
            args.traces,
        );

        let result = experiment.run(args.threads);
        File::create(args.output)
            .expect("Can't create output file")
            .write_all(serde_json::to_string_pretty(&result).unwrap().as_bytes())
            .expect("Can't write to output file");
        result
    };

    for run in result.iter().filter(|run| run.error.is_some()) {
        eprintln!(
            "{} / {} / {} / {} failed: {}",
            run.plan,
            run.system,
            run.mode,
            run.replication_strategy,
            run.error.as_deref().unwrap_or_default()
        );
    }

    // Average task time of every setup is compared with the best mode on the same setup.
    type ExperimentSetup = (String, String, String);
    let mut setups: HashMap<ExperimentSetup, Vec<(String, RunStats)>> = HashMap::new();
    for run in result.into_iter().filter(|run| run.error.is_none()) {
        setups
            .entry((run.plan.clone(), run.system.clone(), run.replication_strategy.clone()))
            .or_default()
            .push((run.mode.clone(), run.run_stats));
    }

    let mut modes: BTreeMap<String, Vec<(RunStats, f64)>> = BTreeMap::new();
    for (_key, values) in setups.into_iter() {
        let best_time = values
            .iter()
            .map(|v| v.1.average_task_time)
            .filter(|&time| time > 0.)
            .min_by(|a, b| a.total_cmp(b))
            .unwrap_or(1.);
        for (mode, run_stats) in values.into_iter() {
            let slowdown = run_stats.average_task_time / best_time;
            modes.entry(mode).or_default().push((run_stats, slowdown));
        }
    }

    let mut result = modes
        .into_iter()
        .map(|(mode, runs)| {
            let n = runs.len() as f64;
            ResultRow {
                name: mode,
                runs: runs.len(),
                done_share: runs
                    .iter()
                    .map(|(run, _)| run.completed_task_count as f64 / run.task_count.max(1) as f64 * 100.)
                    .sum::<f64>()
                    / n,
                avg_task_time: runs.iter().map(|(run, _)| run.average_task_time).sum::<f64>() / n,
                avg_speed: runs.iter().map(|(run, _)| run.average_speed).sum::<f64>() / n,
                avg_slowdown: runs.iter().map(|(_, slowdown)| slowdown).sum::<f64>() / n,
                reroutes: runs.iter().map(|(run, _)| run.reroute_count as f64).sum::<f64>() / n,
                migrations: runs.iter().map(|(run, _)| run.migration_count as f64).sum::<f64>() / n,
            }
        })
        .collect::<Vec<_>>();

    result.sort_by(|a, b| a.avg_slowdown.total_cmp(&b.avg_slowdown).then(a.name.cmp(&b.name)));

    let width = result.iter().map(|x| x.name.len()).max().unwrap_or(0).max(4);
    println!(
        "| {: <width$} | runs |   done | avg task time |   avg speed, B/s | avg slowdown | reroutes | migrations |",
        "mode",
        width = width
    );
    println!(
        "|-{:-<width$}-|------|--------|---------------|------------------|--------------|----------|------------|",
        "",
        width = width
    );
    for row in result.into_iter() {
        println!(
            "| {: <width$} | {: >4} | {: >5.1}% | {: >13.3} | {: >16.0} | {: >12.3} | {: >8.1} | {: >10.1} |",
            row.name,
            row.runs,
            row.done_share,
            row.avg_task_time,
            row.avg_speed,
            row.avg_slowdown,
            row.reroutes,
            row.migrations,
            width = width
        );
    }
}
