use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::info;

use trainyard_core::config::TrainyardConfig;
use trainyard_core::error::CoreError;
use trainyard_core::orchestrator::ClusterOrchestrator;

use crate::templates::{PlacementConstraint, TaskDefTemplate, Templates};

/// Outcome of one health-check round. Fire-and-forget: no ledger rows are
/// written for these tasks.
#[derive(Debug, Clone)]
pub struct HealthCheckReport {
    pub timestamp: String,
    pub host_file: PathBuf,
    pub artifact_dir: PathBuf,
    /// All submitted task IDs; the master's is last.
    pub task_ids: Vec<String>,
}

enum HealthRole {
    Master,
    Worker,
}

/// Submit one connectivity/health task per node: workers first, then the
/// master (node index 0) last, once every worker task exists for it to
/// probe.
///
/// The shared host-list file is a single well-known path; the caller's
/// submission lock keeps rounds from racing on it.
pub async fn run_health_check(
    orchestrator: &dyn ClusterOrchestrator,
    config: &TrainyardConfig,
    templates: &Templates,
    node_names: &[String],
) -> Result<HealthCheckReport, CoreError> {
    let (master, workers) = node_names
        .split_first()
        .ok_or_else(|| CoreError::Config("health check requires at least one node".to_string()))?;

    let timestamp = Utc::now().format("%Y%m%d-%H%M%S").to_string();
    let artifact_dir = config
        .launch
        .history_root
        .join(format!("output-healthcheck-{}", timestamp));
    std::fs::create_dir_all(&artifact_dir)?;

    write_host_file(&config.health_check.host_file, node_names)?;
    info!(
        "Health check round {} over {:?}, hosts at {:?}",
        timestamp, node_names, config.health_check.host_file
    );

    let mut task_ids = Vec::with_capacity(node_names.len());
    for worker in workers {
        let task_id =
            submit_check(orchestrator, config, templates, &artifact_dir, worker, HealthRole::Worker)
                .await?;
        task_ids.push(task_id);
    }
    let master_task_id =
        submit_check(orchestrator, config, templates, &artifact_dir, master, HealthRole::Master)
            .await?;
    task_ids.push(master_task_id);

    Ok(HealthCheckReport {
        timestamp,
        host_file: config.health_check.host_file.clone(),
        artifact_dir,
        task_ids,
    })
}

/// Write the shared host-list file the check scripts read: one node name
/// per line, master first.
pub fn write_host_file(path: &Path, node_names: &[String]) -> Result<(), CoreError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, node_names.join("\n"))?;
    Ok(())
}

async fn submit_check(
    orchestrator: &dyn ClusterOrchestrator,
    config: &TrainyardConfig,
    templates: &Templates,
    artifact_dir: &Path,
    node_name: &str,
    role: HealthRole,
) -> Result<String, CoreError> {
    let task_def = derive_health_task_definition(templates, config, node_name, &role);
    let role_name = match role {
        HealthRole::Master => "master",
        HealthRole::Worker => "worker",
    };
    let path = artifact_dir.join(format!("{}-{}-healthcheck-def.json", role_name, node_name));
    std::fs::write(&path, serde_json::to_string_pretty(&task_def)?)?;

    let registered = orchestrator
        .register_task_definition(&path, &task_def.family)
        .await?;
    let launched = orchestrator.run_task(&registered.arn, node_name).await?;
    info!(
        "Health check {} task for {} running as {}",
        role_name, node_name, launched.task_id
    );
    Ok(launched.task_id)
}

/// Derive a single-container health-check definition pinned to one node.
fn derive_health_task_definition(
    templates: &Templates,
    config: &TrainyardConfig,
    node_name: &str,
    role: &HealthRole,
) -> TaskDefTemplate {
    let mut task_def = templates.task_def.clone();
    task_def.family = config.health_check.family.clone();
    task_def.placement_constraints = vec![PlacementConstraint::member_of_node(
        &config.cluster.node_name_attribute,
        node_name,
    )];

    let mut container = templates.health_container.clone();
    container.command = vec![match role {
        HealthRole::Master => config.health_check.master_script.clone(),
        HealthRole::Worker => config.health_check.worker_script.clone(),
    }];
    task_def.container_definitions = vec![container];

    task_def
}
