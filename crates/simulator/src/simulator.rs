//! Component processing upload and download tasks one by one in time slices.

use std::{
    cell::RefCell,
    collections::{BTreeSet, VecDeque},
    rc::Rc,
};

use dslab_core::{cast, log_debug, log_error, log_info, Event, EventHandler, SimulationContext};
use serde::Serialize;

use dfsim_dfs::{
    dfs::DistributedFileSystem,
    error::FsError,
    registry::FsObjectRef,
    replicas::ReplicaManager,
    replication_strategy::ReplicationStrategy,
    storage::{ServerId, StorageId},
    units::ByteSize,
};

use crate::{
    logger::DfsSimulatorLogger,
    metric::MetricContext,
    mode::SimulationMode,
    path::{DfsPath, DfsPathPicker, PathError},
    planner::HierarchicalPlanner,
    run_stats::RunStats,
    storage_ops::{OperationId, StorageOperations},
    task::{SimulationTask, TaskKind, TaskResult, TaskState, ThroughputSample},
    topology::Topology,
};

const EPS: f64 = 1e-9;

#[derive(Clone, Serialize)]
pub struct Start {}

#[derive(Clone, Serialize)]
pub struct NextTask {}

#[derive(Clone, Serialize)]
pub struct TransferSlice {}

#[derive(Clone, Serialize)]
pub struct TransferCompleted {}

/// Space taken by an upload before its data arrived.
#[derive(Clone, Copy, Debug)]
enum Allocation {
    Created(FsObjectRef),
    Resized { file: FsObjectRef, previous: ByteSize },
}

impl Allocation {
    fn file(&self) -> FsObjectRef {
        match *self {
            Allocation::Created(file) => file,
            Allocation::Resized { file, .. } => file,
        }
    }
}

struct ActiveTransfer {
    task: SimulationTask,
    start_time: f64,
    path: DfsPath,
    paths: Vec<DfsPath>,
    file: Option<FsObjectRef>,
    storage: StorageId,
    placeholder: OperationId,
    allocation: Option<Allocation>,
    size: f64,
    remaining: f64,
    total_latency: f64,
    last_recalculation: f64,
    samples: Vec<ThroughputSample>,
    visited: BTreeSet<FsObjectRef>,
}

pub struct DfsSimulator {
    topology: Rc<Topology>,
    dfs: Rc<RefCell<DistributedFileSystem>>,
    replicas: Rc<RefCell<ReplicaManager>>,
    path_picker: DfsPathPicker,
    planner: Option<Box<dyn HierarchicalPlanner>>,
    replication_strategy: Option<Box<dyn ReplicationStrategy>>,
    loggers: Vec<Rc<RefCell<dyn DfsSimulatorLogger>>>,
    storage_ops: StorageOperations,
    mode: SimulationMode,
    queue: VecDeque<SimulationTask>,
    current: Option<ActiveTransfer>,
    results: Vec<TaskResult>,
    run_stats: RunStats,
    finished: bool,
    ctx: SimulationContext,
}

impl DfsSimulator {
    pub fn new(
        topology: Rc<Topology>,
        dfs: Rc<RefCell<DistributedFileSystem>>,
        replicas: Rc<RefCell<ReplicaManager>>,
        tasks: Vec<SimulationTask>,
        mode: SimulationMode,
        ctx: SimulationContext,
    ) -> Self {
        DfsSimulator {
            topology,
            dfs,
            replicas,
            path_picker: DfsPathPicker::new(mode.metric.build()),
            planner: None,
            replication_strategy: None,
            loggers: Vec::new(),
            storage_ops: StorageOperations::new(),
            mode,
            queue: tasks.into(),
            current: None,
            results: Vec::new(),
            run_stats: RunStats::new(),
            finished: false,
            ctx,
        }
    }

    pub fn with_planner(mut self, planner: Box<dyn HierarchicalPlanner>) -> Self {
        self.planner = Some(planner);
        self
    }

    pub fn with_replication_strategy(mut self, replication_strategy: Box<dyn ReplicationStrategy>) -> Self {
        self.replication_strategy = Some(replication_strategy);
        self
    }

    pub fn add_logger(&mut self, logger: Rc<RefCell<dyn DfsSimulatorLogger>>) {
        self.loggers.push(logger);
    }

    /// Results of finished tasks in submission order.
    pub fn results(&self) -> &[TaskResult] {
        &self.results
    }

    pub fn run_stats(&self) -> &RunStats {
        &self.run_stats
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn notify(&self, event: impl Fn(&mut dyn DfsSimulatorLogger)) {
        for logger in self.loggers.iter() {
            event(&mut *logger.borrow_mut());
        }
    }

    fn select_path(
        &self,
        task: &SimulationTask,
        exclude_operation: Option<OperationId>,
        fixed_target: Option<(ServerId, StorageId)>,
    ) -> Result<DfsPath, PathError> {
        let dfs = self.dfs.borrow();
        let replicas = self.replicas.borrow();
        let ctx = MetricContext {
            dfs: &dfs,
            replicas: &replicas,
            storage_ops: &self.storage_ops,
            planner: self.planner.as_deref(),
            time: self.ctx.time(),
            exclude_operation,
        };
        self.path_picker.select_path(&self.topology, &ctx, task, fixed_target)
    }

    fn resolve_storage(&self, file: Option<FsObjectRef>) -> Option<StorageId> {
        let file = file?;
        self.dfs.borrow().effective_mount_device(file).ok().flatten()
    }

    fn start_next_task(&mut self) {
        self.update_storage_ops();
        let Some(task) = self.queue.pop_front() else {
            self.finish();
            return;
        };
        let now = self.ctx.time();
        log_debug!(
            self.ctx,
            "task {}: {:?} {} from client {}",
            task.id,
            task.kind,
            task.path,
            task.client
        );
        self.notify(|logger| logger.task_started(now, &task));

        let path = match self.select_path(&task, None, None) {
            Ok(path) => path,
            Err(err) => {
                log_debug!(self.ctx, "task {}: no path: {}", task.id, err);
                let elapsed = match err {
                    PathError::NoNeighboursAvailable => 0.,
                    _ => self.mode.registry_query_time,
                };
                self.fail_before_transfer(&task, err.into(), now, elapsed);
                return;
            }
        };
        self.notify(|logger| logger.path_selected(now, &task, &path));

        let allocation = match task.kind {
            TaskKind::Get => None,
            TaskKind::Put => match self.allocate(&task, &path) {
                Ok(allocation) => Some(allocation),
                Err(state) => {
                    self.fail_before_transfer(&task, state, now, self.mode.registry_query_time);
                    return;
                }
            },
        };
        let file = allocation.map(|allocation| allocation.file()).or(path.file);
        if matches!(
            (task.kind, allocation),
            (TaskKind::Get, _) | (_, Some(Allocation::Resized { .. }))
        ) {
            if let Some(file) = file {
                self.before_access(file, &task);
            }
        }

        let storage = self.resolve_storage(file).unwrap_or(path.storage);
        let placeholder = self.storage_ops.add_unmanaged(storage);
        let size = match task.kind {
            TaskKind::Get => file
                .and_then(|file| self.dfs.borrow().file_size(file).ok())
                .unwrap_or(ByteSize::ZERO),
            TaskKind::Put => task.size,
        }
        .bytes() as f64;
        let latency = path.latency(&self.topology);
        log_debug!(
            self.ctx,
            "task {}: transferring {} bytes over {:?} to storage {}",
            task.id,
            size,
            path.nodes,
            storage
        );

        self.current = Some(ActiveTransfer {
            task,
            start_time: now,
            paths: vec![path.clone()],
            path,
            file,
            storage,
            placeholder,
            allocation,
            size,
            remaining: size,
            total_latency: latency,
            last_recalculation: now,
            samples: Vec::new(),
            visited: file.into_iter().collect(),
        });
        self.ctx.emit_self(TransferSlice {}, latency);
    }

    /// Takes space for an upload on the target storage.
    fn allocate(&self, task: &SimulationTask, path: &DfsPath) -> Result<Allocation, TaskState> {
        let force = self.mode.force_expansion;
        let mut dfs = self.dfs.borrow_mut();
        match path.file {
            Some(file) => {
                let previous = dfs.file_size(file).map_err(|_| TaskState::ObjectNotFound)?;
                if !force {
                    if let Err(err) = self.replicas.borrow().can_replica_be_resized(&dfs, file, task.size) {
                        log_debug!(self.ctx, "task {}: {}", task.id, err);
                        return Err(TaskState::NotEnoughSpaceForReplica);
                    }
                }
                let resized = if force {
                    dfs.force_resize_to_fit(file, task.size)
                } else {
                    dfs.resize_to_fit(file, task.size)
                };
                match resized {
                    Ok(()) => Ok(Allocation::Resized { file, previous }),
                    Err(err) => {
                        log_debug!(self.ctx, "task {}: {}", task.id, err);
                        Err(TaskState::NotEnoughSpaceOnDevice)
                    }
                }
            }
            None => match dfs.create_file_at(path.server, &task.path, task.size, None, force) {
                Ok(file) => Ok(Allocation::Created(file)),
                Err(err) => {
                    log_debug!(self.ctx, "task {}: {}", task.id, err);
                    match err {
                        FsError::NotEnoughSpaceLeft { .. } | FsError::NotEnoughSpaceLeftReplica { .. } => {
                            Err(TaskState::NotEnoughSpaceOnDevice)
                        }
                        _ => Err(TaskState::ObjectNotFound),
                    }
                }
            },
        }
    }

    fn rollback(&self, allocation: Allocation) {
        let mut dfs = self.dfs.borrow_mut();
        let result = match allocation {
            Allocation::Created(file) => dfs.remove_object(file),
            Allocation::Resized { file, previous } => dfs.force_resize_to_fit(file, previous),
        };
        if let Err(err) = result {
            log_error!(self.ctx, "can't roll back upload: {}", err);
        }
    }

    fn before_access(&mut self, file: FsObjectRef, task: &SimulationTask) {
        let now = self.ctx.time();
        let Some(planner) = self.planner.as_mut() else {
            return;
        };
        let migrations = planner.on_before_access(&mut self.dfs.borrow_mut(), file, task, now);
        for migration in migrations {
            log_debug!(
                self.ctx,
                "moving {} on server {} from storage {} to {}",
                migration.path,
                migration.server,
                migration.from,
                migration.to
            );
            self.notify(|logger| logger.migration_started(now, &migration));
            self.run_stats.register_migration(migration.size);
            self.storage_ops.add_migration(migration, now);
        }
    }

    fn update_storage_ops(&mut self) {
        let now = self.ctx.time();
        let finished = self.storage_ops.update(&self.dfs.borrow(), now);
        for migration in finished {
            log_debug!(self.ctx, "migration of {} finished", migration.path);
            self.notify(|logger| logger.migration_finished(now, &migration));
        }
    }

    fn on_slice(&mut self) {
        self.update_storage_ops();
        let now = self.ctx.time();
        let Some(mut transfer) = self.current.take() else {
            log_error!(self.ctx, "transfer slice without an active task");
            return;
        };

        if self.mode.dynamic_routing
            && now - transfer.last_recalculation + EPS >= self.mode.recalculation_interval
        {
            transfer.last_recalculation = now;
            if let Some(latency) = self.reroute(&mut transfer) {
                self.current = Some(transfer);
                self.ctx.emit_self(TransferSlice {}, latency);
                return;
            }
        }

        let bandwidth = transfer.path.bandwidth(&self.topology, now);
        let disk = self.storage_ops.share_of(&self.dfs.borrow(), transfer.placeholder, now);
        let throughput = bandwidth.min(disk).bytes_per_second();
        transfer.samples.push(ThroughputSample { time: now, speed: throughput });
        if throughput <= 0. {
            log_debug!(self.ctx, "task {}: transfer stalled", transfer.task.id);
            self.stall(transfer);
            return;
        }

        let resolution = self.mode.time_resolution;
        let window = throughput * resolution;
        if transfer.remaining <= window + EPS {
            let delay = if self.mode.round_up_slices {
                resolution
            } else {
                transfer.remaining / throughput
            };
            transfer.remaining = 0.;
            self.current = Some(transfer);
            self.ctx.emit_self(TransferCompleted {}, delay);
        } else {
            transfer.remaining -= window;
            self.current = Some(transfer);
            self.ctx.emit_self(TransferSlice {}, resolution);
        }
    }

    /// Switches the transfer to a better path, returns the latency of the new path if it changed.
    fn reroute(&mut self, transfer: &mut ActiveTransfer) -> Option<f64> {
        let now = self.ctx.time();
        let fixed_target = match transfer.task.kind {
            TaskKind::Get => None,
            TaskKind::Put => Some((transfer.path.server, transfer.storage)),
        };
        let path = match self.select_path(&transfer.task, Some(transfer.placeholder), fixed_target) {
            Ok(path) => path,
            Err(err) => {
                log_debug!(self.ctx, "task {}: keeping path, recalculation failed: {}", transfer.task.id, err);
                return None;
            }
        };
        if path == transfer.path {
            return None;
        }

        self.storage_ops.remove_unmanaged(transfer.placeholder);
        if transfer.task.kind == TaskKind::Get {
            transfer.file = path.file;
        }
        if let Some(file) = transfer.file {
            transfer.visited.insert(file);
            self.before_access(file, &transfer.task);
        }
        transfer.storage = self.resolve_storage(transfer.file).unwrap_or(path.storage);
        transfer.placeholder = self.storage_ops.add_unmanaged(transfer.storage);

        let latency = path.latency(&self.topology);
        transfer.total_latency += latency;
        log_debug!(
            self.ctx,
            "task {}: switched to {:?}, {} bytes left",
            transfer.task.id,
            path.nodes,
            transfer.remaining
        );
        self.notify(|logger| logger.path_selected(now, &transfer.task, &path));
        self.run_stats.register_reroute();
        if !transfer.paths.contains(&path) {
            transfer.paths.push(path.clone());
        }
        transfer.path = path;
        Some(latency)
    }

    fn stall(&mut self, transfer: ActiveTransfer) {
        self.storage_ops.remove_unmanaged(transfer.placeholder);
        if let Some(allocation) = transfer.allocation {
            self.rollback(allocation);
        }
        let state = TaskState::TransferStalled;
        let result = self.transfer_result(transfer, state);
        self.record(result);
        self.ctx.emit_now(NextTask {}, self.ctx.id());
    }

    fn on_completed(&mut self) {
        let now = self.ctx.time();
        let Some(transfer) = self.current.take() else {
            log_error!(self.ctx, "transfer completed without an active task");
            return;
        };
        self.update_storage_ops();
        if let Some(allocation) = transfer.allocation {
            self.after_upload(allocation, &transfer.task);
        }
        for &file in transfer.visited.iter() {
            match self.planner.as_mut() {
                Some(planner) => planner.on_after_access(&mut self.dfs.borrow_mut(), file, &transfer.task, now),
                None => {
                    if let Err(err) = self.dfs.borrow_mut().record_access(file) {
                        log_error!(self.ctx, "can't record access to {}: {}", transfer.task.path, err);
                    }
                }
            }
        }
        self.storage_ops.remove_unmanaged(transfer.placeholder);
        let result = self.transfer_result(transfer, TaskState::Done);
        log_debug!(
            self.ctx,
            "task {} done in {:.3} s at {:.0} B/s",
            result.task_id,
            result.elapsed,
            result.average_speed
        );
        self.record(result);
        self.ctx.emit_now(NextTask {}, self.ctx.id());
    }

    fn after_upload(&mut self, allocation: Allocation, task: &SimulationTask) {
        let now = self.ctx.time();
        match allocation {
            Allocation::Resized { file, .. } => {
                let propagated = {
                    let mut dfs = self.dfs.borrow_mut();
                    let replicas = self.replicas.borrow();
                    if self.mode.force_expansion {
                        replicas.force_propagate_replica_resize(&mut dfs, file)
                    } else {
                        replicas.propagate_replica_resize(&mut dfs, file)
                    }
                };
                if let Err(err) = propagated {
                    let message = format!("replicas of {} were not resized: {}", task.path, err);
                    log_error!(self.ctx, "{}", message);
                    self.notify(|logger| logger.error(now, &message));
                }
            }
            Allocation::Created(file) => self.replicate(file, task),
        }
    }

    fn replicate(&mut self, file: FsObjectRef, task: &SimulationTask) {
        let now = self.ctx.time();
        let targets = match self.replication_strategy.as_mut() {
            Some(strategy) => strategy.select_targets(file, &self.dfs.borrow()),
            None => return,
        };
        if targets.is_empty() {
            return;
        }
        self.notify(|logger| logger.replication_started(now, &task.path, &targets));
        let replicated = {
            let mut dfs = self.dfs.borrow_mut();
            let mut replicas = self.replicas.borrow_mut();
            if self.mode.force_expansion {
                replicas.force_replicate_file(&mut dfs, file, &targets)
            } else {
                replicas.replicate_file(&mut dfs, file, &targets)
            }
        };
        match replicated {
            Ok(created) => {
                log_debug!(self.ctx, "{} replicated to {} server(s)", task.path, created.len());
                self.run_stats.register_replicas(created.len());
                self.notify(|logger| logger.replication_finished(now, &task.path, created.len()));
            }
            Err(err) => {
                let message = format!("replication of {} failed: {}", task.path, err);
                log_error!(self.ctx, "{}", message);
                self.notify(|logger| logger.error(now, &message));
            }
        }
    }

    fn transfer_result(&self, transfer: ActiveTransfer, state: TaskState) -> TaskResult {
        let elapsed = self.ctx.time() - transfer.start_time;
        let transferred = transfer.size - transfer.remaining;
        TaskResult {
            task_id: transfer.task.id,
            kind: transfer.task.kind,
            path: transfer.task.path,
            state,
            start_time: transfer.start_time,
            elapsed,
            transferred,
            average_speed: if elapsed > 0. { transferred / elapsed } else { 0. },
            total_latency: transfer.total_latency,
            paths: transfer.paths,
            samples: transfer.samples,
        }
    }

    fn fail_before_transfer(&mut self, task: &SimulationTask, state: TaskState, start_time: f64, elapsed: f64) {
        log_debug!(self.ctx, "task {} failed with {:?}", task.id, state);
        self.record(TaskResult::failed(task, state, start_time, elapsed));
        self.ctx.emit_self(NextTask {}, elapsed);
    }

    fn record(&mut self, result: TaskResult) {
        self.run_stats.register_result(&result);
        self.notify(|logger| logger.task_finished(result.end_time(), &result));
        self.results.push(result);
    }

    fn finish(&mut self) {
        let now = self.ctx.time();
        for migration in self.storage_ops.finalize() {
            self.notify(|logger| logger.migration_finished(now, &migration));
        }
        self.run_stats.finalize(now);
        self.finished = true;
        log_info!(
            self.ctx,
            "all tasks processed: {} done, {} failed",
            self.run_stats.completed_task_count,
            self.run_stats.task_count - self.run_stats.completed_task_count
        );
        self.notify(|logger| logger.simulation_finished(now));
    }
}

impl EventHandler for DfsSimulator {
    fn on(&mut self, event: Event) {
        cast!(match event.data {
            Start {} => {
                let now = self.ctx.time();
                let tasks = self.queue.len();
                log_info!(self.ctx, "starting simulation of {} task(s)", tasks);
                self.notify(|logger| logger.simulation_started(now, tasks));
                self.start_next_task();
            }
            NextTask {} => {
                self.start_next_task();
            }
            TransferSlice {} => {
                self.on_slice();
            }
            TransferCompleted {} => {
                self.on_completed();
            }
        })
    }
}
