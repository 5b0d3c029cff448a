//! Export and import of task queues and whole snapshots into attributed trees.

use dfsim_dfs::{
    dfs::DistributedFileSystem,
    persistence::{export_dfs, export_replicas, import_dfs, import_replicas, Element, ImportError},
    replicas::ReplicaManager,
    units::ByteSize,
};

use crate::{
    task::{SimulationTask, TaskKind},
    topology::Topology,
};

/// Clients are stored by name.
pub fn export_tasks(tasks: &[SimulationTask], topology: &Topology) -> Element {
    let mut result = Element::new("tasks");
    for task in tasks.iter() {
        let client = topology
            .node(task.client)
            .map(|node| node.name.clone())
            .unwrap_or_else(|| task.client.to_string());
        result.children.push(
            Element::new("task")
                .with_attr("id", task.id)
                .with_attr(
                    "kind",
                    match task.kind {
                        TaskKind::Get => "get",
                        TaskKind::Put => "put",
                    },
                )
                .with_attr("client", client)
                .with_attr("path", &task.path)
                .with_attr("size", task.size.bytes()),
        );
    }
    result
}

pub fn import_tasks(element: &Element, topology: &Topology) -> Result<Vec<SimulationTask>, ImportError> {
    element.expect_name("tasks")?;
    let mut tasks = Vec::new();
    for task in element.children.iter() {
        task.expect_name("task")?;
        let kind = match task.required_attr("kind")? {
            "get" => TaskKind::Get,
            "put" => TaskKind::Put,
            other => return Err(task.invalid("kind", other)),
        };
        let client = task.required_attr("client")?;
        let client = topology
            .node_by_name(client)
            .ok_or_else(|| ImportError::UnknownNode(client.to_string()))?
            .id;
        tasks.push(SimulationTask {
            id: task.parse_attr("id")?,
            kind,
            client,
            path: task.required_attr("path")?.to_string(),
            size: ByteSize::new(task.parse_optional_attr("size")?.unwrap_or(0)),
        });
    }
    Ok(tasks)
}

/// File systems, replica sets and pending tasks of a run.
pub fn export_snapshot(
    dfs: &DistributedFileSystem,
    replicas: &ReplicaManager,
    tasks: &[SimulationTask],
    topology: &Topology,
) -> Element {
    Element::new("snapshot")
        .with_child(export_dfs(dfs))
        .with_child(export_replicas(dfs, replicas))
        .with_child(export_tasks(tasks, topology))
}

pub fn import_snapshot(
    element: &Element,
    topology: &Topology,
) -> Result<(DistributedFileSystem, ReplicaManager, Vec<SimulationTask>), ImportError> {
    element.expect_name("snapshot")?;
    let child = |index: usize, expected: &'static str| {
        element.children.get(index).ok_or_else(|| ImportError::UnexpectedElement {
            expected,
            found: String::new(),
        })
    };
    let dfs = import_dfs(child(0, "dfs")?)?;
    let replicas = import_replicas(child(1, "replicas")?, &dfs)?;
    let tasks = import_tasks(child(2, "tasks")?, topology)?;
    Ok((dfs, replicas, tasks))
}
