use std::path::Path;

use async_trait::async_trait;

use crate::error::CoreError;

/// One container instance as seen by the orchestrator, reduced to the
/// fields the registry needs.
#[derive(Debug, Clone)]
pub struct ContainerInstanceView {
    /// Short container-instance ID (trailing ARN segment).
    pub container_instance_id: String,
    /// Configured node name, read from the instance attribute; None when
    /// the instance carries no such attribute.
    pub node_name: Option<String>,
    /// "ACTIVE", "DRAINING", "DEREGISTERING", ...
    pub agent_status: String,
    pub registered_gpus: u32,
    pub remaining_gpus: u32,
}

/// Outcome of registering a task definition.
#[derive(Debug, Clone)]
pub struct RegisteredTaskDef {
    /// Full task-definition ARN, used verbatim when launching.
    pub arn: String,
    pub family: String,
    pub revision: i64,
    /// The exact command line issued, for the execution-history audit file.
    pub raw_command: String,
}

impl RegisteredTaskDef {
    /// Short "family:revision" reference, as stored in task records.
    pub fn short_ref(&self) -> String {
        format!("{}:{}", self.family, self.revision)
    }
}

/// Outcome of launching one task.
#[derive(Debug, Clone)]
pub struct LaunchedTask {
    /// Short task ID (trailing ARN segment).
    pub task_id: String,
    pub task_arn: String,
    /// Short "family:revision" reference of the definition that ran.
    pub task_definition: String,
    pub cluster_name: String,
    pub container_instance_id: String,
    pub raw_command: String,
}

/// Run-state of a task as reported by the orchestrator.
#[derive(Debug, Clone)]
pub struct TaskStateView {
    pub task_id: String,
    pub last_status: String,
    pub desired_status: String,
}

/// Seam to the cluster orchestrator. The production implementation drives
/// the AWS CLI; tests substitute a scripted double.
#[async_trait]
pub trait ClusterOrchestrator: Send + Sync {
    /// List the ARNs of every container instance registered in the cluster.
    async fn list_container_instances(&self) -> Result<Vec<String>, CoreError>;

    /// Describe the given container instances (agent status, node-name
    /// attribute, GPU accounting).
    async fn describe_container_instances(
        &self,
        arns: &[String],
    ) -> Result<Vec<ContainerInstanceView>, CoreError>;

    /// Register a task definition from a JSON artifact on disk. `family` is
    /// used for error attribution only; the document itself is
    /// authoritative.
    async fn register_task_definition(
        &self,
        input_path: &Path,
        family: &str,
    ) -> Result<RegisteredTaskDef, CoreError>;

    /// Launch exactly one instance of the given definition; placement is
    /// decided by the constraint baked into the definition. `node_name` is
    /// the pinned node, used for error attribution.
    async fn run_task(
        &self,
        task_definition: &str,
        node_name: &str,
    ) -> Result<LaunchedTask, CoreError>;

    /// Stop a task by its short ID.
    async fn stop_task(&self, task_id: &str) -> Result<(), CoreError>;

    /// Fetch a task's run-state; None when the orchestrator no longer knows
    /// the task.
    async fn describe_task(&self, task_id: &str) -> Result<Option<TaskStateView>, CoreError>;

    /// True only when both the observed and the desired state are RUNNING.
    /// Pending, stopping and stopped all collapse to false; callers needing
    /// finer-grained state use [`describe_task`](Self::describe_task).
    async fn is_task_running(&self, task_id: &str) -> Result<bool, CoreError> {
        let state = self.describe_task(task_id).await?;
        Ok(state
            .map(|s| s.last_status == "RUNNING" && s.desired_status == "RUNNING")
            .unwrap_or(false))
    }
}
