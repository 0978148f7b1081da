use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use trainyard_core::config::ClusterConfig;
use trainyard_core::error::CoreError;
use trainyard_core::orchestrator::{
    ClusterOrchestrator, ContainerInstanceView, LaunchedTask, RegisteredTaskDef, TaskStateView,
};

use crate::arn::arn_tail;

/// Maximum number of instance ARNs per describe call (ECS API limit).
const DESCRIBE_CHUNK: usize = 100;

/// `ClusterOrchestrator` backed by the AWS CLI. Every call spawns
/// `aws ecs ...` as a subprocess with a bounded timeout and parses the JSON
/// it prints.
pub struct AwsCliOrchestrator {
    cluster: String,
    region: Option<String>,
    profile: Option<String>,
    launch_type: String,
    node_name_attribute: String,
    call_timeout: Duration,
}

impl AwsCliOrchestrator {
    pub fn new(cluster: &ClusterConfig) -> Self {
        Self {
            cluster: cluster.cluster_name.clone(),
            region: cluster.region.clone(),
            profile: cluster.profile.clone(),
            launch_type: cluster.launch_type.clone(),
            node_name_attribute: cluster.node_name_attribute.clone(),
            call_timeout: Duration::from_secs(cluster.call_timeout_secs),
        }
    }

    /// Common tail of every invocation: region/profile overrides plus JSON
    /// output.
    fn common_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(region) = &self.region {
            args.push("--region".to_string());
            args.push(region.clone());
        }
        if let Some(profile) = &self.profile {
            args.push("--profile".to_string());
            args.push(profile.clone());
        }
        args.push("--output".to_string());
        args.push("json".to_string());
        args
    }

    /// Run `aws {args}`, returning stdout. Non-zero exit surfaces stderr as
    /// `CoreError::Orchestrator`; callers re-attribute it to the operation
    /// that failed.
    async fn invoke(&self, args: &[String]) -> Result<String, CoreError> {
        debug!("{}", render_command(args));

        let output = tokio::time::timeout(
            self.call_timeout,
            tokio::process::Command::new("aws").args(args).output(),
        )
        .await
        .map_err(|_| CoreError::Timeout(self.call_timeout))??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(CoreError::Orchestrator(stderr));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// The exact command line as recorded in execution-history files.
fn render_command(args: &[String]) -> String {
    let mut rendered = String::from("aws");
    for arg in args {
        rendered.push(' ');
        rendered.push_str(arg);
    }
    rendered
}

#[async_trait]
impl ClusterOrchestrator for AwsCliOrchestrator {
    async fn list_container_instances(&self) -> Result<Vec<String>, CoreError> {
        let mut arns = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let mut args = vec![
                "ecs".to_string(),
                "list-container-instances".to_string(),
                "--cluster".to_string(),
                self.cluster.clone(),
            ];
            if let Some(token) = &next_token {
                args.push("--next-token".to_string());
                args.push(token.clone());
            }
            args.extend(self.common_args());

            let stdout = self.invoke(&args).await?;
            let page = parse_list_response(&stdout)?;
            arns.extend(page.container_instance_arns);

            match page.next_token {
                Some(token) => next_token = Some(token),
                None => break,
            }
        }

        Ok(arns)
    }

    async fn describe_container_instances(
        &self,
        arns: &[String],
    ) -> Result<Vec<ContainerInstanceView>, CoreError> {
        let mut views = Vec::with_capacity(arns.len());

        for chunk in arns.chunks(DESCRIBE_CHUNK) {
            let mut args = vec![
                "ecs".to_string(),
                "describe-container-instances".to_string(),
                "--cluster".to_string(),
                self.cluster.clone(),
                "--container-instances".to_string(),
            ];
            args.extend(chunk.iter().cloned());
            args.extend(self.common_args());

            let stdout = self.invoke(&args).await?;
            views.extend(parse_describe_instances_response(
                &stdout,
                &self.node_name_attribute,
            )?);
        }

        Ok(views)
    }

    async fn register_task_definition(
        &self,
        input_path: &Path,
        family: &str,
    ) -> Result<RegisteredTaskDef, CoreError> {
        let mut args = vec![
            "ecs".to_string(),
            "register-task-definition".to_string(),
            "--cli-input-json".to_string(),
            format!("file://{}", input_path.display()),
        ];
        args.extend(self.common_args());
        let raw_command = render_command(&args);

        let stdout = match self.invoke(&args).await {
            Ok(stdout) => stdout,
            Err(CoreError::Orchestrator(message)) => {
                return Err(CoreError::Registration {
                    family: family.to_string(),
                    message,
                })
            }
            Err(e) => return Err(e),
        };

        let mut registered = parse_register_response(&stdout)?;
        registered.raw_command = raw_command;
        Ok(registered)
    }

    async fn run_task(
        &self,
        task_definition: &str,
        node_name: &str,
    ) -> Result<LaunchedTask, CoreError> {
        let mut args = vec![
            "ecs".to_string(),
            "run-task".to_string(),
            "--cluster".to_string(),
            self.cluster.clone(),
            "--task-definition".to_string(),
            task_definition.to_string(),
            "--count".to_string(),
            "1".to_string(),
            "--launch-type".to_string(),
            self.launch_type.clone(),
        ];
        args.extend(self.common_args());
        let raw_command = render_command(&args);

        let stdout = match self.invoke(&args).await {
            Ok(stdout) => stdout,
            Err(CoreError::Orchestrator(message)) => {
                return Err(CoreError::Launch {
                    node: node_name.to_string(),
                    message,
                })
            }
            Err(e) => return Err(e),
        };

        let mut launched = parse_run_task_response(&stdout, node_name)?;
        launched.raw_command = raw_command;
        Ok(launched)
    }

    async fn stop_task(&self, task_id: &str) -> Result<(), CoreError> {
        let mut args = vec![
            "ecs".to_string(),
            "stop-task".to_string(),
            "--cluster".to_string(),
            self.cluster.clone(),
            "--task".to_string(),
            task_id.to_string(),
        ];
        args.extend(self.common_args());

        self.invoke(&args).await?;
        Ok(())
    }

    async fn describe_task(&self, task_id: &str) -> Result<Option<TaskStateView>, CoreError> {
        let mut args = vec![
            "ecs".to_string(),
            "describe-tasks".to_string(),
            "--cluster".to_string(),
            self.cluster.clone(),
            "--tasks".to_string(),
            task_id.to_string(),
        ];
        args.extend(self.common_args());

        let stdout = self.invoke(&args).await?;
        parse_describe_tasks_response(&stdout)
    }
}

// --- Wire structs: only the fields this tool reads; everything else in the
// --- responses is ignored.

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    #[serde(default)]
    container_instance_arns: Vec<String>,
    #[serde(default)]
    next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DescribeInstancesResponse {
    #[serde(default)]
    container_instances: Vec<InstanceWire>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstanceWire {
    container_instance_arn: String,
    status: String,
    #[serde(default)]
    attributes: Vec<AttributeWire>,
    #[serde(default)]
    registered_resources: Vec<ResourceWire>,
    #[serde(default)]
    remaining_resources: Vec<ResourceWire>,
}

#[derive(Debug, Deserialize)]
struct AttributeWire {
    name: String,
    #[serde(default)]
    value: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResourceWire {
    name: String,
    /// GPU capacity is reported as one device ID per slot.
    #[serde(default)]
    string_set_value: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterResponse {
    task_definition: TaskDefinitionWire,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskDefinitionWire {
    task_definition_arn: String,
    family: String,
    revision: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunTaskResponse {
    #[serde(default)]
    tasks: Vec<TaskWire>,
    #[serde(default)]
    failures: Vec<FailureWire>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskWire {
    task_arn: String,
    #[serde(default)]
    cluster_arn: String,
    #[serde(default)]
    container_instance_arn: String,
    #[serde(default)]
    task_definition_arn: String,
    #[serde(default)]
    last_status: String,
    #[serde(default)]
    desired_status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FailureWire {
    #[serde(default)]
    arn: Option<String>,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    detail: Option<String>,
}

impl FailureWire {
    fn render(&self) -> String {
        let mut parts = Vec::new();
        if let Some(reason) = &self.reason {
            parts.push(reason.clone());
        }
        if let Some(detail) = &self.detail {
            parts.push(detail.clone());
        }
        if let Some(arn) = &self.arn {
            parts.push(format!("({})", arn));
        }
        parts.join(" ")
    }
}

fn malformed(what: &str, e: serde_json::Error) -> CoreError {
    CoreError::MalformedResponse(format!("{}: {}", what, e))
}

fn parse_list_response(stdout: &str) -> Result<ListResponse, CoreError> {
    serde_json::from_str(stdout).map_err(|e| malformed("list-container-instances", e))
}

fn parse_describe_instances_response(
    stdout: &str,
    node_name_attribute: &str,
) -> Result<Vec<ContainerInstanceView>, CoreError> {
    let response: DescribeInstancesResponse =
        serde_json::from_str(stdout).map_err(|e| malformed("describe-container-instances", e))?;

    let views = response
        .container_instances
        .into_iter()
        .map(|wire| {
            let node_name = wire
                .attributes
                .iter()
                .find(|attr| attr.name == node_name_attribute)
                .and_then(|attr| attr.value.clone());
            if node_name.is_none() {
                warn!(
                    "Container instance {} carries no {} attribute",
                    wire.container_instance_arn, node_name_attribute
                );
            }
            ContainerInstanceView {
                container_instance_id: arn_tail(&wire.container_instance_arn).to_string(),
                node_name,
                agent_status: wire.status,
                registered_gpus: gpu_count(&wire.registered_resources),
                remaining_gpus: gpu_count(&wire.remaining_resources),
            }
        })
        .collect();

    Ok(views)
}

fn gpu_count(resources: &[ResourceWire]) -> u32 {
    resources
        .iter()
        .find(|r| r.name == "GPU")
        .map(|r| r.string_set_value.len() as u32)
        .unwrap_or(0)
}

fn parse_register_response(stdout: &str) -> Result<RegisteredTaskDef, CoreError> {
    let response: RegisterResponse =
        serde_json::from_str(stdout).map_err(|e| malformed("register-task-definition", e))?;

    Ok(RegisteredTaskDef {
        arn: response.task_definition.task_definition_arn,
        family: response.task_definition.family,
        revision: response.task_definition.revision,
        raw_command: String::new(),
    })
}

fn parse_run_task_response(stdout: &str, node_name: &str) -> Result<LaunchedTask, CoreError> {
    let response: RunTaskResponse =
        serde_json::from_str(stdout).map_err(|e| malformed("run-task", e))?;

    let Some(task) = response.tasks.first() else {
        // No task placed: the failures array carries the reason verbatim.
        let message = if response.failures.is_empty() {
            "run-task returned no tasks and no failures".to_string()
        } else {
            response
                .failures
                .iter()
                .map(FailureWire::render)
                .collect::<Vec<_>>()
                .join("; ")
        };
        return Err(CoreError::Launch {
            node: node_name.to_string(),
            message,
        });
    };

    Ok(LaunchedTask {
        task_id: arn_tail(&task.task_arn).to_string(),
        task_arn: task.task_arn.clone(),
        task_definition: arn_tail(&task.task_definition_arn).to_string(),
        cluster_name: arn_tail(&task.cluster_arn).to_string(),
        container_instance_id: arn_tail(&task.container_instance_arn).to_string(),
        raw_command: String::new(),
    })
}

fn parse_describe_tasks_response(stdout: &str) -> Result<Option<TaskStateView>, CoreError> {
    let response: RunTaskResponse =
        serde_json::from_str(stdout).map_err(|e| malformed("describe-tasks", e))?;

    Ok(response.tasks.first().map(|task| TaskStateView {
        task_id: arn_tail(&task.task_arn).to_string(),
        last_status: task.last_status.clone(),
        desired_status: task.desired_status.clone(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_list_response_with_token() {
        let stdout = r#"{
            "containerInstanceArns": [
                "arn:aws:ecs:us-east-1:1:container-instance/gpu-cluster/aaa",
                "arn:aws:ecs:us-east-1:1:container-instance/gpu-cluster/bbb"
            ],
            "nextToken": "page2"
        }"#;
        let page = parse_list_response(stdout).unwrap();
        assert_eq!(page.container_instance_arns.len(), 2);
        assert_eq!(page.next_token.as_deref(), Some("page2"));
    }

    #[test]
    fn test_parse_describe_instances() {
        let stdout = r#"{
            "containerInstances": [{
                "containerInstanceArn": "arn:aws:ecs:us-east-1:1:container-instance/gpu-cluster/2c0cf099",
                "status": "ACTIVE",
                "attributes": [
                    {"name": "ecs.cpu-architecture", "value": "x86_64"},
                    {"name": "node_name", "value": "node-a"}
                ],
                "registeredResources": [
                    {"name": "GPU", "stringSetValue": ["GPU-0", "GPU-1", "GPU-2", "GPU-3"]}
                ],
                "remainingResources": [
                    {"name": "GPU", "stringSetValue": ["GPU-0", "GPU-1"]}
                ]
            }]
        }"#;
        let views = parse_describe_instances_response(stdout, "node_name").unwrap();
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].container_instance_id, "2c0cf099");
        assert_eq!(views[0].node_name.as_deref(), Some("node-a"));
        assert_eq!(views[0].agent_status, "ACTIVE");
        assert_eq!(views[0].registered_gpus, 4);
        assert_eq!(views[0].remaining_gpus, 2);
    }

    #[test]
    fn test_parse_describe_instances_missing_attribute() {
        let stdout = r#"{
            "containerInstances": [{
                "containerInstanceArn": "arn:aws:ecs:us-east-1:1:container-instance/gpu-cluster/ffff",
                "status": "DRAINING",
                "attributes": []
            }]
        }"#;
        let views = parse_describe_instances_response(stdout, "node_name").unwrap();
        assert!(views[0].node_name.is_none());
        assert_eq!(views[0].registered_gpus, 0);
    }

    #[test]
    fn test_parse_register_response() {
        let stdout = r#"{
            "taskDefinition": {
                "taskDefinitionArn": "arn:aws:ecs:us-east-1:1:task-definition/TrainingTask:453",
                "family": "TrainingTask",
                "revision": 453,
                "status": "ACTIVE"
            }
        }"#;
        let registered = parse_register_response(stdout).unwrap();
        assert_eq!(registered.family, "TrainingTask");
        assert_eq!(registered.revision, 453);
        assert_eq!(registered.short_ref(), "TrainingTask:453");
    }

    #[test]
    fn test_parse_run_task_success() {
        let stdout = r#"{
            "tasks": [{
                "taskArn": "arn:aws:ecs:us-east-1:1:task/gpu-cluster/595b16b4",
                "clusterArn": "arn:aws:ecs:us-east-1:1:cluster/gpu-cluster",
                "containerInstanceArn": "arn:aws:ecs:us-east-1:1:container-instance/gpu-cluster/2c0cf099",
                "taskDefinitionArn": "arn:aws:ecs:us-east-1:1:task-definition/TrainingTask:453",
                "lastStatus": "PENDING",
                "desiredStatus": "RUNNING"
            }],
            "failures": []
        }"#;
        let launched = parse_run_task_response(stdout, "node-a").unwrap();
        assert_eq!(launched.task_id, "595b16b4");
        assert_eq!(launched.cluster_name, "gpu-cluster");
        assert_eq!(launched.container_instance_id, "2c0cf099");
        assert_eq!(launched.task_definition, "TrainingTask:453");
    }

    #[test]
    fn test_parse_run_task_placement_failure() {
        let stdout = r#"{
            "tasks": [],
            "failures": [{
                "arn": "arn:aws:ecs:us-east-1:1:container-instance/gpu-cluster/2c0cf099",
                "reason": "RESOURCE:GPU"
            }]
        }"#;
        let err = parse_run_task_response(stdout, "node-b").unwrap_err();
        match err {
            CoreError::Launch { node, message } => {
                assert_eq!(node, "node-b");
                assert!(message.contains("RESOURCE:GPU"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_parse_describe_tasks_missing() {
        let stdout = r#"{"tasks": [], "failures": [{"reason": "MISSING"}]}"#;
        assert!(parse_describe_tasks_response(stdout).unwrap().is_none());
    }

    #[test]
    fn test_parse_describe_tasks_running() {
        let stdout = r#"{
            "tasks": [{
                "taskArn": "arn:aws:ecs:us-east-1:1:task/gpu-cluster/595b16b4",
                "lastStatus": "RUNNING",
                "desiredStatus": "RUNNING"
            }]
        }"#;
        let state = parse_describe_tasks_response(stdout).unwrap().unwrap();
        assert_eq!(state.last_status, "RUNNING");
        assert_eq!(state.desired_status, "RUNNING");
    }

    #[test]
    fn test_render_command() {
        let args = vec![
            "ecs".to_string(),
            "stop-task".to_string(),
            "--task".to_string(),
            "595b16b4".to_string(),
        ];
        assert_eq!(render_command(&args), "aws ecs stop-task --task 595b16b4");
    }

    #[test]
    fn test_malformed_response_is_typed() {
        let err = parse_register_response("not json").unwrap_err();
        assert!(matches!(err, CoreError::MalformedResponse(_)));
    }
}
