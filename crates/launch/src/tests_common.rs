use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use trainyard_core::config::{NodeSpec, TrainyardConfig};
use trainyard_core::error::CoreError;
use trainyard_core::ledger;
use trainyard_core::orchestrator::{
    ClusterOrchestrator, ContainerInstanceView, LaunchedTask, RegisteredTaskDef, TaskStateView,
};

use crate::templates::{ContainerTemplate, TaskDefTemplate, Templates};

/// Scripted orchestrator double. Records every call so tests can assert on
/// ordering, and fails on demand per family or node.
#[derive(Default)]
pub struct MockOrchestrator {
    /// Fail `register_task_definition` for this family.
    pub fail_register_on: Option<String>,
    /// Fail `run_task` for this node.
    pub fail_run_on: Option<String>,
    /// Instance views served to registry refreshes.
    pub instance_views: Vec<ContainerInstanceView>,
    /// task_id -> (lastStatus, desiredStatus) for describe_task.
    pub task_states: Mutex<HashMap<String, (String, String)>>,
    /// When set, `run_task` waits for a permit before returning; lets tests
    /// hold a launch in flight.
    pub run_gate: Option<Arc<tokio::sync::Notify>>,
    pub(crate) calls: Mutex<Vec<String>>,
    pub(crate) counter: AtomicU64,
}

impl MockOrchestrator {
    pub fn recorded_calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn next_id(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::SeqCst) + 1
    }
}

#[async_trait]
impl ClusterOrchestrator for MockOrchestrator {
    async fn list_container_instances(&self) -> Result<Vec<String>, CoreError> {
        self.record("list".to_string());
        Ok(self
            .instance_views
            .iter()
            .map(|v| {
                format!(
                    "arn:aws:ecs:test:1:container-instance/gpu-cluster/{}",
                    v.container_instance_id
                )
            })
            .collect())
    }

    async fn describe_container_instances(
        &self,
        _arns: &[String],
    ) -> Result<Vec<ContainerInstanceView>, CoreError> {
        self.record("describe-instances".to_string());
        Ok(self.instance_views.clone())
    }

    async fn register_task_definition(
        &self,
        input_path: &Path,
        family: &str,
    ) -> Result<RegisteredTaskDef, CoreError> {
        self.record(format!("register:{}", family));
        if self.fail_register_on.as_deref() == Some(family) {
            return Err(CoreError::Registration {
                family: family.to_string(),
                message: "ClientException: Role is not valid".to_string(),
            });
        }
        let revision = self.next_id() as i64;
        Ok(RegisteredTaskDef {
            arn: format!("arn:aws:ecs:test:1:task-definition/{}:{}", family, revision),
            family: family.to_string(),
            revision,
            raw_command: format!(
                "aws ecs register-task-definition --cli-input-json file://{} --output json",
                input_path.display()
            ),
        })
    }

    async fn run_task(
        &self,
        task_definition: &str,
        node_name: &str,
    ) -> Result<LaunchedTask, CoreError> {
        if let Some(gate) = &self.run_gate {
            gate.notified().await;
        }
        self.record(format!("run:{}", node_name));
        if self.fail_run_on.as_deref() == Some(node_name) {
            return Err(CoreError::Launch {
                node: node_name.to_string(),
                message: "RESOURCE:GPU (no container instance met all requirements)".to_string(),
            });
        }
        let id = self.next_id();
        Ok(LaunchedTask {
            task_id: format!("task-{:04}", id),
            task_arn: format!("arn:aws:ecs:test:1:task/gpu-cluster/task-{:04}", id),
            task_definition: task_definition
                .rsplit('/')
                .next()
                .unwrap_or(task_definition)
                .to_string(),
            cluster_name: "gpu-cluster".to_string(),
            container_instance_id: format!("ci-{}", node_name),
            raw_command: format!(
                "aws ecs run-task --cluster gpu-cluster --task-definition {} --count 1 --launch-type EC2 --output json",
                task_definition
            ),
        })
    }

    async fn stop_task(&self, task_id: &str) -> Result<(), CoreError> {
        self.record(format!("stop:{}", task_id));
        Ok(())
    }

    async fn describe_task(&self, task_id: &str) -> Result<Option<TaskStateView>, CoreError> {
        self.record(format!("describe-task:{}", task_id));
        Ok(self.task_states.lock().unwrap().get(task_id).map(|(last, desired)| {
            TaskStateView {
                task_id: task_id.to_string(),
                last_status: last.clone(),
                desired_status: desired.clone(),
            }
        }))
    }
}

/// Config fixture over a temp directory: given nodes at 10.0.0.{i+1}, all
/// artifact output under the directory.
pub fn sample_config(dir: &Path, nodes: &[&str]) -> TrainyardConfig {
    let mut config = TrainyardConfig::default();
    config.cluster.cluster_name = "gpu-cluster".to_string();
    config.launch.history_root = dir.join("_submit_history");
    config.ledger.db_path = dir.join("trainyard.db");
    config.health_check.host_file = dir.join("healthcheck/my_hosts");
    for (i, name) in nodes.iter().enumerate() {
        config.fleet.insert(
            name.to_string(),
            NodeSpec {
                ip: format!("10.0.0.{}", i + 1),
                ibdevs: vec!["mlx5_0".to_string(), "mlx5_1".to_string()],
                num_gpus: 8,
            },
        );
    }
    config
}

pub fn sample_templates() -> Templates {
    let task_def: TaskDefTemplate = serde_json::from_str(
        r#"{
            "family": "TrainingTask",
            "taskRoleArn": "arn:aws:iam::1:role/taskRole",
            "executionRoleArn": "arn:aws:iam::1:role/taskExecutionRole",
            "networkMode": "host",
            "requiresCompatibilities": ["EC2"],
            "volumes": [{"name": "mylustre", "host": {"sourcePath": "/fsx/workspace"}}]
        }"#,
    )
    .unwrap();

    let training_container: ContainerTemplate = serde_json::from_str(
        r#"{
            "name": "TrainingContainer",
            "image": "example/training:latest",
            "command": [],
            "portMappings": [{"containerPort": 10086, "hostPort": 10086, "protocol": "tcp"}],
            "essential": true,
            "privileged": true,
            "resourceRequirements": [{"value": "8", "type": "GPU"}]
        }"#,
    )
    .unwrap();

    let health_container: ContainerTemplate = serde_json::from_str(
        r#"{
            "name": "HealthCheckContainer",
            "image": "example/healthcheck:latest",
            "command": [],
            "essential": true
        }"#,
    )
    .unwrap();

    Templates {
        task_def,
        training_container,
        health_container,
    }
}

pub fn open_test_ledger() -> Mutex<rusqlite::Connection> {
    let conn = rusqlite::Connection::open_in_memory().unwrap();
    ledger::init_tables(&conn).unwrap();
    Mutex::new(conn)
}
