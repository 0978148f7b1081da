use std::path::PathBuf;
use std::sync::Mutex;

use rusqlite::Connection;
use tracing::{error, info, warn};

use trainyard_core::ledger;
use trainyard_core::orchestrator::ClusterOrchestrator;
use trainyard_core::types::{now_timestamp, TaskRecord};

use crate::artifacts::JobArtifacts;

/// One successfully-submitted node task.
#[derive(Debug, Clone)]
pub struct LaunchedNode {
    pub node_name: String,
    pub node_index: u32,
    pub task_id: String,
    pub container_instance_id: String,
    /// Short "family:revision" reference of the registered definition.
    pub task_def_ref: String,
}

/// Per-node submission outcome. Failures carry the orchestrator's error
/// text verbatim.
#[derive(Debug, Clone)]
pub struct NodeLaunch {
    pub node_name: String,
    pub result: Result<LaunchedNode, String>,
}

/// Everything the caller needs to decide whether the job commits.
#[derive(Debug)]
pub struct SubmissionOutcome {
    /// One entry per attempted node, in rank order. Submission stops at the
    /// first failure; later nodes are never attempted (and never rolled
    /// back — tasks already launched stay live).
    pub results: Vec<NodeLaunch>,
    /// Exact orchestrator command lines in execution order (register, run,
    /// register, run, ...).
    pub raw_commands: Vec<String>,
}

impl SubmissionOutcome {
    pub fn all_succeeded(&self, num_nodes: usize) -> bool {
        self.results.len() == num_nodes && self.results.iter().all(|r| r.result.is_ok())
    }

    pub fn launched(&self) -> Vec<&LaunchedNode> {
        self.results
            .iter()
            .filter_map(|r| r.result.as_ref().ok())
            .collect()
    }
}

/// Register and run one task per node, recording each task in the ledger as
/// its submission succeeds. Ledger write failures are logged and do not
/// fail the submission (a running task without its record beats the
/// opposite).
pub async fn submit_job_tasks(
    orchestrator: &dyn ClusterOrchestrator,
    ledger: &Mutex<Connection>,
    cluster_name: &str,
    job_id: &str,
    job_timestamp: &str,
    artifacts: &JobArtifacts,
) -> SubmissionOutcome {
    let num_nodes = artifacts.nodes.len();
    let mut results = Vec::with_capacity(num_nodes);
    let mut raw_commands = Vec::new();

    for (index, artifact) in artifacts.nodes.iter().enumerate() {
        let registered = match orchestrator
            .register_task_definition(&artifact.task_def_path, &artifact.family)
            .await
        {
            Ok(registered) => registered,
            Err(e) => {
                error!("Registration failed for {}: {}", artifact.node_name, e);
                results.push(NodeLaunch {
                    node_name: artifact.node_name.clone(),
                    result: Err(e.to_string()),
                });
                break;
            }
        };
        raw_commands.push(registered.raw_command.clone());

        let launched = match orchestrator
            .run_task(&registered.arn, &artifact.node_name)
            .await
        {
            Ok(launched) => launched,
            Err(e) => {
                error!("Launch failed for {}: {}", artifact.node_name, e);
                results.push(NodeLaunch {
                    node_name: artifact.node_name.clone(),
                    result: Err(e.to_string()),
                });
                break;
            }
        };
        raw_commands.push(launched.raw_command.clone());
        info!(
            "Node {} (rank {}) running as task {}",
            artifact.node_name, index, launched.task_id
        );

        let now = now_timestamp();
        let record = TaskRecord {
            ecs_task_id: launched.task_id.clone(),
            node_name: artifact.node_name.clone(),
            node_index_in_job: index as u32,
            job_id: job_id.to_string(),
            job_timestamp: job_timestamp.to_string(),
            job_num_nodes: num_nodes as u32,
            task_def_arn: registered.short_ref(),
            task_def_name: registered.family.clone(),
            task_def_revision: registered.revision.to_string(),
            cluster_name: cluster_name.to_string(),
            container_instance_id: launched.container_instance_id.clone(),
            created_at: now.clone(),
            updated_at: now,
        };
        {
            let conn = ledger.lock().expect("ledger lock poisoned");
            if let Err(e) = ledger::record_task(&conn, &record) {
                warn!("Ledger write failed for task {}: {}", record.ecs_task_id, e);
            }
        }

        results.push(NodeLaunch {
            node_name: artifact.node_name.clone(),
            result: Ok(LaunchedNode {
                node_name: artifact.node_name.clone(),
                node_index: index as u32,
                task_id: launched.task_id,
                container_instance_id: launched.container_instance_id,
                task_def_ref: registered.short_ref(),
            }),
        });
    }

    SubmissionOutcome {
        results,
        raw_commands,
    }
}

/// Write the raw orchestrator command lines of a fully-submitted job, one
/// per line, for audit/debug replay.
pub fn write_execution_history(
    job_dir: &std::path::Path,
    raw_commands: &[String],
) -> Result<PathBuf, std::io::Error> {
    let path = job_dir.join("execution-history.txt");
    let mut contents = raw_commands.join("\n");
    contents.push('\n');
    std::fs::write(&path, contents)?;
    Ok(path)
}
