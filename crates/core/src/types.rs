use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::NodeSpec;

/// Runtime view of one fleet node: static identity from configuration plus
/// volatile fields rewritten on every registry refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInfo {
    pub name: String,
    pub ip: String,
    /// InfiniBand device identifiers, in the order they appear in NCCL_IB_HCA.
    pub ibdevs: Vec<String>,
    pub num_gpus: u32,
    /// Short container-instance ID, populated on refresh.
    #[serde(default)]
    pub container_instance_id: Option<String>,
    /// Agent status reported by the orchestrator ("ACTIVE", "DRAINING", ...).
    #[serde(default)]
    pub agent_status: Option<String>,
    #[serde(default)]
    pub registered_gpus: u32,
    #[serde(default)]
    pub remaining_gpus: u32,
    /// True only when the agent is ACTIVE and no task holds any of the
    /// node's GPUs.
    #[serde(default)]
    pub usable: bool,
}

impl NodeInfo {
    /// Build the startup view of a node: static fields set, volatile fields
    /// empty until the first refresh.
    pub fn from_spec(name: &str, spec: &NodeSpec) -> Self {
        Self {
            name: name.to_string(),
            ip: spec.ip.clone(),
            ibdevs: spec.ibdevs.clone(),
            num_gpus: spec.num_gpus,
            container_instance_id: None,
            agent_status: None,
            registered_gpus: 0,
            remaining_gpus: 0,
            usable: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    InProgress,
    Stopped,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::InProgress => "IN_PROGRESS",
            JobStatus::Stopped => "STOPPED",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
        }
    }
}

/// One job as persisted in the ledger. `assigned_nodes`,
/// `container_instance_ids` and `ecs_task_ids` are parallel arrays; index 0
/// is the master node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: String,
    pub job_timestamp: String,
    pub cluster_name: String,
    pub num_nodes: u32,
    pub assigned_nodes: Vec<String>,
    pub container_instance_ids: Vec<String>,
    pub ecs_task_ids: Vec<String>,
    pub status: JobStatus,
    pub retry: u32,
    pub created_at: String,
    pub updated_at: String,
}

/// One submitted task as persisted in the ledger, keyed by the
/// orchestrator-assigned task ID.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub ecs_task_id: String,
    pub node_name: String,
    pub node_index_in_job: u32,
    pub job_id: String,
    pub job_timestamp: String,
    pub job_num_nodes: u32,
    /// Short "family:revision" reference of the registered definition.
    pub task_def_arn: String,
    pub task_def_name: String,
    pub task_def_revision: String,
    pub cluster_name: String,
    pub container_instance_id: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Generate a globally-unique job ID and its timestamp segment:
/// `{base}-{YYYYmmdd-HHMMSS}-{8 hex chars}`.
pub fn generate_job_id(base_name: &str) -> (String, String) {
    let timestamp = Utc::now().format("%Y%m%d-%H%M%S").to_string();
    let suffix = Uuid::new_v4().simple().to_string();
    let job_id = format!("{}-{}-{}", base_name, timestamp, &suffix[..8]);
    (job_id, timestamp)
}

/// Current UTC time as an RFC 3339 string, the format used for ledger
/// timestamp columns.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339()
}

// --- Display implementations ---

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::fmt::Display for NodeInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ({}) gpus={}/{} {}",
            self.name,
            self.ip,
            self.remaining_gpus,
            self.registered_gpus,
            if self.usable { "usable" } else { "unusable" }
        )
    }
}
