use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use trainyard_core::config::TemplateConfig;
use trainyard_core::error::CoreError;

/// Task-level fields this tool rewrites; everything else in the template
/// (role ARNs, volumes, network mode, ...) rides along untouched in `extra`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDefTemplate {
    pub family: String,
    #[serde(default)]
    pub placement_constraints: Vec<PlacementConstraint>,
    #[serde(default)]
    pub container_definitions: Vec<ContainerTemplate>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlacementConstraint {
    #[serde(rename = "type")]
    pub constraint_type: String,
    pub expression: String,
}

impl PlacementConstraint {
    /// Pin a task to the exact node carrying the given name attribute.
    pub fn member_of_node(attribute: &str, node_name: &str) -> Self {
        Self {
            constraint_type: "memberOf".to_string(),
            expression: format!("attribute:{}=={}", attribute, node_name),
        }
    }
}

/// Container-level fields this tool rewrites (image, log config, limits and
/// the rest pass through in `extra`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerTemplate {
    pub name: String,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub port_mappings: Vec<PortMapping>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub essential: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<Vec<ContainerDependency>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortMapping {
    pub container_port: u16,
    pub host_port: u16,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerDependency {
    pub container_name: String,
    pub condition: String,
}

/// The three immutable base documents every job derives from. Loaded once;
/// derivation always clones, never mutates these.
#[derive(Debug, Clone)]
pub struct Templates {
    pub task_def: TaskDefTemplate,
    pub training_container: ContainerTemplate,
    pub health_container: ContainerTemplate,
}

pub fn load_templates(config: &TemplateConfig) -> Result<Templates, CoreError> {
    Ok(Templates {
        task_def: load_json(&config.task_definition)?,
        training_container: load_json(&config.training_container)?,
        health_container: load_json(&config.health_container)?,
    })
}

fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, CoreError> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        CoreError::Config(format!("cannot read template {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&contents).map_err(|e| {
        CoreError::Config(format!("cannot parse template {}: {}", path.display(), e))
    })
}
