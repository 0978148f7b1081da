use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;

use trainyard_core::config::NodeSpec;
use trainyard_core::error::CoreError;
use trainyard_core::orchestrator::{
    ClusterOrchestrator, ContainerInstanceView, LaunchedTask, RegisteredTaskDef, TaskStateView,
};

pub fn make_fleet(names: &[&str]) -> BTreeMap<String, NodeSpec> {
    names
        .iter()
        .enumerate()
        .map(|(i, name)| {
            (
                name.to_string(),
                NodeSpec {
                    ip: format!("10.0.0.{}", i + 1),
                    ibdevs: vec!["mlx5_0".to_string()],
                    num_gpus: 8,
                },
            )
        })
        .collect()
}

pub fn view(
    instance_id: &str,
    node_name: Option<&str>,
    agent_status: &str,
    registered_gpus: u32,
    remaining_gpus: u32,
) -> ContainerInstanceView {
    ContainerInstanceView {
        container_instance_id: instance_id.to_string(),
        node_name: node_name.map(String::from),
        agent_status: agent_status.to_string(),
        registered_gpus,
        remaining_gpus,
    }
}

/// Registry-facing orchestrator double: serves a fixed set of instance
/// views, or fails every query with a fixed message.
pub struct StaticOrchestrator {
    views: Vec<ContainerInstanceView>,
    failure: Option<String>,
}

impl StaticOrchestrator {
    pub fn with_views(views: Vec<ContainerInstanceView>) -> Self {
        Self {
            views,
            failure: None,
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            views: Vec::new(),
            failure: Some(message.to_string()),
        }
    }
}

#[async_trait]
impl ClusterOrchestrator for StaticOrchestrator {
    async fn list_container_instances(&self) -> Result<Vec<String>, CoreError> {
        if let Some(message) = &self.failure {
            return Err(CoreError::Orchestrator(message.clone()));
        }
        Ok(self
            .views
            .iter()
            .map(|v| format!("arn:aws:ecs:test:1:container-instance/test/{}", v.container_instance_id))
            .collect())
    }

    async fn describe_container_instances(
        &self,
        _arns: &[String],
    ) -> Result<Vec<ContainerInstanceView>, CoreError> {
        if let Some(message) = &self.failure {
            return Err(CoreError::Orchestrator(message.clone()));
        }
        Ok(self.views.clone())
    }

    async fn register_task_definition(
        &self,
        _input_path: &Path,
        _family: &str,
    ) -> Result<RegisteredTaskDef, CoreError> {
        unreachable!("registry tests never register task definitions")
    }

    async fn run_task(
        &self,
        _task_definition: &str,
        _node_name: &str,
    ) -> Result<LaunchedTask, CoreError> {
        unreachable!("registry tests never run tasks")
    }

    async fn stop_task(&self, _task_id: &str) -> Result<(), CoreError> {
        unreachable!("registry tests never stop tasks")
    }

    async fn describe_task(&self, _task_id: &str) -> Result<Option<TaskStateView>, CoreError> {
        unreachable!("registry tests never describe tasks")
    }
}
