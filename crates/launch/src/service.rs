use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use tracing::{info, warn};

use trainyard_core::config::TrainyardConfig;
use trainyard_core::error::CoreError;
use trainyard_core::ledger;
use trainyard_core::orchestrator::ClusterOrchestrator;
use trainyard_core::types::{generate_job_id, now_timestamp, JobRecord, JobStatus, TaskRecord};
use trainyard_fleet::{refresh_fleet, usable_node_names, NodePool};

use crate::artifacts::write_job_artifacts;
use crate::healthcheck::{self, HealthCheckReport};
use crate::submitter::{submit_job_tasks, write_execution_history, NodeLaunch};
use crate::templates::Templates;

#[derive(Debug, Clone)]
pub struct LaunchRequest {
    pub base_name: String,
    pub num_nodes: usize,
    pub master_port: u16,
    /// User entry script, relative to the workspace mount.
    pub entry_script: String,
    /// Gate each training container on a health-check container.
    pub health_check: bool,
}

/// Outcome of one launch operation, successful or not. Per-node results are
/// reported individually: a partial submission leaves earlier tasks live
/// (no rollback) and the job unrecorded.
#[derive(Debug)]
pub struct LaunchReport {
    pub job_id: String,
    pub job_timestamp: String,
    pub assigned_nodes: Vec<String>,
    /// One entry per attempted node, rank order. Shorter than
    /// `assigned_nodes` when submission stopped early.
    pub node_results: Vec<NodeLaunch>,
    pub history_file: Option<PathBuf>,
    pub job_recorded: bool,
}

impl LaunchReport {
    pub fn all_succeeded(&self) -> bool {
        self.node_results.len() == self.assigned_nodes.len()
            && self.node_results.iter().all(|r| r.result.is_ok())
    }

    pub fn task_ids(&self) -> Vec<String> {
        self.node_results
            .iter()
            .filter_map(|r| r.result.as_ref().ok())
            .map(|launched| launched.task_id.clone())
            .collect()
    }
}

/// One row of the node-status table.
#[derive(Debug, Clone)]
pub struct NodeStatusRow {
    pub name: String,
    pub ip: String,
    pub num_gpus: u32,
    pub remaining_gpus: u32,
    pub agent_status: String,
    pub usable: bool,
    /// "spare", "assigned (job-id)" or "unusable".
    pub pool_state: String,
}

/// Facade over the whole orchestration core. Owns the submission lock: at
/// most one launch or health-check round is in flight; a second attempt
/// fails immediately instead of queueing.
pub struct LaunchService {
    config: TrainyardConfig,
    templates: Templates,
    pool: Arc<NodePool>,
    orchestrator: Arc<dyn ClusterOrchestrator>,
    ledger: Arc<Mutex<Connection>>,
    submission: tokio::sync::Mutex<()>,
}

impl LaunchService {
    pub fn new(
        config: TrainyardConfig,
        templates: Templates,
        pool: Arc<NodePool>,
        orchestrator: Arc<dyn ClusterOrchestrator>,
        ledger: Arc<Mutex<Connection>>,
    ) -> Self {
        Self {
            config,
            templates,
            pool,
            orchestrator,
            ledger,
            submission: tokio::sync::Mutex::new(()),
        }
    }

    /// Launch a multi-node training job: assign nodes, generate artifacts,
    /// submit one task per node, commit the job record once every node's
    /// task exists.
    ///
    /// On any per-node failure this job's nodes return to spare and no job
    /// record is written, but tasks already launched stay live — the report
    /// says which nodes made it.
    pub async fn launch_job(&self, req: LaunchRequest) -> Result<LaunchReport, CoreError> {
        let _guard = self
            .submission
            .try_lock()
            .map_err(|_| CoreError::SubmissionInProgress)?;

        if req.num_nodes == 0 {
            return Err(CoreError::Config("job requires at least one node".to_string()));
        }

        let (job_id, job_timestamp) = generate_job_id(&req.base_name);
        info!(
            "Launching job {} on {} node(s), master port {}",
            job_id, req.num_nodes, req.master_port
        );

        let nodes = self.pool.assign_job_nodes(&job_id, req.num_nodes)?;

        match self.submit_assigned(&job_id, &job_timestamp, &nodes, &req).await {
            Ok(report) => {
                if !report.all_succeeded() {
                    self.pool.release_job(&job_id);
                }
                Ok(report)
            }
            Err(e) => {
                self.pool.release_job(&job_id);
                Err(e)
            }
        }
    }

    async fn submit_assigned(
        &self,
        job_id: &str,
        job_timestamp: &str,
        nodes: &[String],
        req: &LaunchRequest,
    ) -> Result<LaunchReport, CoreError> {
        if req.health_check {
            healthcheck::write_host_file(&self.config.health_check.host_file, nodes)?;
        }

        let artifacts = write_job_artifacts(
            &self.config,
            &self.templates,
            job_id,
            nodes,
            req.master_port,
            &req.entry_script,
            req.health_check,
        )?;

        let outcome = submit_job_tasks(
            self.orchestrator.as_ref(),
            &self.ledger,
            &self.config.cluster.cluster_name,
            job_id,
            job_timestamp,
            &artifacts,
        )
        .await;

        let mut history_file = None;
        let mut job_recorded = false;
        if outcome.all_succeeded(nodes.len()) {
            match write_execution_history(&artifacts.job_dir, &outcome.raw_commands) {
                Ok(path) => history_file = Some(path),
                Err(e) => warn!("Could not write execution history: {}", e),
            }

            let launched = outcome.launched();
            let now = now_timestamp();
            let record = JobRecord {
                job_id: job_id.to_string(),
                job_timestamp: job_timestamp.to_string(),
                cluster_name: self.config.cluster.cluster_name.clone(),
                num_nodes: nodes.len() as u32,
                assigned_nodes: nodes.to_vec(),
                container_instance_ids: launched
                    .iter()
                    .map(|l| l.container_instance_id.clone())
                    .collect(),
                ecs_task_ids: launched.iter().map(|l| l.task_id.clone()).collect(),
                status: JobStatus::InProgress,
                retry: 0,
                created_at: now.clone(),
                updated_at: now,
            };
            let conn = self.ledger.lock().expect("ledger lock poisoned");
            match ledger::record_job(&conn, &record) {
                Ok(()) => job_recorded = true,
                Err(e) => warn!("Ledger write failed for job {}: {}", job_id, e),
            }
        } else {
            warn!(
                "Job {} incomplete: {}/{} node task(s) submitted; launched tasks stay live",
                job_id,
                outcome.launched().len(),
                nodes.len()
            );
        }

        Ok(LaunchReport {
            job_id: job_id.to_string(),
            job_timestamp: job_timestamp.to_string(),
            assigned_nodes: nodes.to_vec(),
            node_results: outcome.results,
            history_file,
            job_recorded,
        })
    }

    /// Refresh physical availability from the orchestrator and reset the
    /// pool partition from it. Soft reservations do not survive.
    pub async fn refresh_nodes(&self) -> Result<Vec<NodeStatusRow>, CoreError> {
        let fleet = refresh_fleet(self.orchestrator.as_ref(), &self.config.fleet).await?;
        self.pool.apply_refresh(usable_node_names(&fleet));

        let snapshot = self.pool.snapshot();
        Ok(fleet
            .values()
            .map(|node| {
                let pool_state = if let Some(job_id) = snapshot.assigned.get(&node.name) {
                    format!("assigned ({})", job_id)
                } else if snapshot.spare.contains(&node.name) {
                    "spare".to_string()
                } else {
                    "unusable".to_string()
                };
                NodeStatusRow {
                    name: node.name.clone(),
                    ip: node.ip.clone(),
                    num_gpus: node.num_gpus,
                    remaining_gpus: node.remaining_gpus,
                    agent_status: node.agent_status.clone().unwrap_or_else(|| "-".to_string()),
                    usable: node.usable,
                    pool_state,
                }
            })
            .collect())
    }

    /// Return every assigned node to spare, then refresh.
    pub async fn release_all_nodes(&self) -> Result<Vec<NodeStatusRow>, CoreError> {
        self.pool.release_all();
        self.refresh_nodes().await
    }

    /// Submit a health-check round. Shares the submission lock with
    /// launches so host-file writes never race.
    pub async fn run_health_check(
        &self,
        node_names: &[String],
    ) -> Result<HealthCheckReport, CoreError> {
        let _guard = self
            .submission
            .try_lock()
            .map_err(|_| CoreError::SubmissionInProgress)?;

        healthcheck::run_health_check(
            self.orchestrator.as_ref(),
            &self.config,
            &self.templates,
            node_names,
        )
        .await
    }

    /// Stop one task. When the ledger knows the task's job, the job is
    /// marked STOPPED (a status change, never a removal).
    pub async fn stop_task(&self, task_id: &str) -> Result<(), CoreError> {
        self.orchestrator.stop_task(task_id).await?;

        let conn = self.ledger.lock().expect("ledger lock poisoned");
        if let Some(job_id) = job_of_task(&conn, task_id) {
            if let Err(e) = ledger::update_job_status(&conn, &job_id, JobStatus::Stopped) {
                warn!("Could not mark job {} stopped: {}", job_id, e);
            }
        }
        Ok(())
    }

    pub async fn is_task_running(&self, task_id: &str) -> Result<bool, CoreError> {
        self.orchestrator.is_task_running(task_id).await
    }

    pub fn list_jobs(&self) -> anyhow::Result<Vec<JobRecord>> {
        let conn = self.ledger.lock().expect("ledger lock poisoned");
        ledger::load_jobs(&conn)
    }

    pub fn job_tasks(&self, job_id: &str) -> anyhow::Result<Vec<TaskRecord>> {
        let conn = self.ledger.lock().expect("ledger lock poisoned");
        ledger::load_tasks_for_job(&conn, job_id)
    }
}

fn job_of_task(conn: &Connection, task_id: &str) -> Option<String> {
    conn.query_row(
        "SELECT job_id FROM tasks WHERE ecs_task_id = ?1",
        rusqlite::params![task_id],
        |row| row.get(0),
    )
    .ok()
}
