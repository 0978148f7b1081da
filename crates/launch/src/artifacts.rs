use std::path::PathBuf;

use tracing::debug;

use trainyard_core::config::{HealthCheckConfig, TrainyardConfig};
use trainyard_core::error::CoreError;

use crate::templates::{
    ContainerDependency, PlacementConstraint, TaskDefTemplate, Templates,
};

/// Inputs for one node's wrapper script.
pub struct WrapperScript<'a> {
    pub rank: usize,
    pub num_nodes: usize,
    /// IP of node index 0. Every node gets the same address; the entry
    /// script determines its role by comparing its own address to this.
    pub master_addr: &'a str,
    pub master_port: u16,
    /// Path of the user entry script, relative to the workspace mount.
    pub entry_script: &'a str,
    /// This node's own device list, verbatim.
    pub ibdevs: &'a [String],
    pub network_interface: &'a str,
    pub workspace_prefix: &'a str,
}

/// Render the shell wrapper that sets up the distributed-training
/// environment and hands over to the user entry script.
pub fn render_wrapper_script(p: &WrapperScript) -> String {
    let entry = format!("{}/{}", p.workspace_prefix, p.entry_script);
    format!(
        "#!/bin/bash\n\
         \n\
         echo '### Execution of trainyard wrapped entry ###'\n\
         \n\
         chmod +x {entry}\n\
         export NCCL_SOCKET_IFNAME={iface}\n\
         export NCCL_IB_DISABLE=0\n\
         export NCCL_DEBUG=INFO\n\
         export NCCL_IB_HCA={hca}\n\
         export ECS_NUM_NODES={num_nodes}\n\
         export ECS_NODE_RANK={rank}\n\
         export ECS_MASTER_ADDR={master_addr}\n\
         export ECS_MASTER_PORT={master_port}\n\
         {entry}\n",
        entry = entry,
        iface = p.network_interface,
        hca = p.ibdevs.join(","),
        num_nodes = p.num_nodes,
        rank = p.rank,
        master_addr = p.master_addr,
        master_port = p.master_port,
    )
}

/// Inputs for one node's task definition.
pub struct TaskDefParams<'a> {
    pub node_name: &'a str,
    pub node_index: usize,
    pub master_port: u16,
    /// Full in-container path of the generated wrapper script.
    pub container_command: &'a str,
    /// Container-instance attribute carrying the node name.
    pub node_name_attribute: &'a str,
    /// Some(_) injects a health-check container the training container must
    /// wait for.
    pub health_check: Option<&'a HealthCheckConfig>,
}

/// Derive one node's task definition from the immutable templates. Pure
/// clone-and-modify; the shared templates are never touched.
pub fn derive_task_definition(templates: &Templates, p: &TaskDefParams) -> TaskDefTemplate {
    let mut task_def = templates.task_def.clone();
    task_def.placement_constraints = vec![PlacementConstraint::member_of_node(
        p.node_name_attribute,
        p.node_name,
    )];

    let mut training = templates.training_container.clone();
    training.command = vec![p.container_command.to_string()];
    // Same port on every node; each runs on a distinct host.
    if let Some(mapping) = training.port_mappings.first_mut() {
        mapping.container_port = p.master_port;
        mapping.host_port = p.master_port;
    }

    match p.health_check {
        Some(health_cfg) => {
            let mut health = templates.health_container.clone();
            health.essential = Some(false);
            health.command = vec![if p.node_index == 0 {
                health_cfg.master_script.clone()
            } else {
                health_cfg.worker_script.clone()
            }];
            training.depends_on = Some(vec![ContainerDependency {
                container_name: health.name.clone(),
                condition: "COMPLETE".to_string(),
            }]);
            task_def.container_definitions = vec![health, training];
        }
        None => {
            task_def.container_definitions = vec![training];
        }
    }

    task_def
}

/// Per-node artifact paths of one job.
#[derive(Debug, Clone)]
pub struct NodeArtifact {
    pub node_name: String,
    pub script_path: PathBuf,
    pub task_def_path: PathBuf,
    /// Family the definition registers under.
    pub family: String,
}

#[derive(Debug, Clone)]
pub struct JobArtifacts {
    pub job_dir: PathBuf,
    pub nodes: Vec<NodeArtifact>,
}

/// Write every node's wrapper script and task-definition document under the
/// job's execution-history directory. Index 0 of `node_names` is the
/// master.
pub fn write_job_artifacts(
    config: &TrainyardConfig,
    templates: &Templates,
    job_id: &str,
    node_names: &[String],
    master_port: u16,
    entry_script: &str,
    health_check: bool,
) -> Result<JobArtifacts, CoreError> {
    let job_dir = config
        .launch
        .history_root
        .join(format!("output-scripts-{}", job_id));
    std::fs::create_dir_all(&job_dir)?;

    let master = node_names
        .first()
        .ok_or_else(|| CoreError::Config("job has no nodes".to_string()))?;
    let master_addr = node_spec(config, master)?.ip.clone();

    let mut nodes = Vec::with_capacity(node_names.len());
    for (rank, node_name) in node_names.iter().enumerate() {
        let spec = node_spec(config, node_name)?;

        let script = render_wrapper_script(&WrapperScript {
            rank,
            num_nodes: node_names.len(),
            master_addr: &master_addr,
            master_port,
            entry_script,
            ibdevs: &spec.ibdevs,
            network_interface: &config.launch.network_interface,
            workspace_prefix: &config.launch.workspace_prefix,
        });
        let script_path = job_dir.join(format!("training-{}.sh", node_name));
        write_executable(&script_path, &script)?;

        // The container reaches the script through the shared workspace
        // mount; history_root is relative to that mount.
        let container_command = format!(
            "{}/{}",
            config.launch.workspace_prefix,
            script_path.to_string_lossy()
        );
        let task_def = derive_task_definition(
            templates,
            &TaskDefParams {
                node_name,
                node_index: rank,
                master_port,
                container_command: &container_command,
                node_name_attribute: &config.cluster.node_name_attribute,
                health_check: health_check.then_some(&config.health_check),
            },
        );
        let task_def_path = job_dir.join(format!("task_def_{}.json", node_name));
        std::fs::write(&task_def_path, serde_json::to_string_pretty(&task_def)?)?;

        debug!(
            "Wrote artifacts for {} (rank {}): {:?}",
            node_name, rank, task_def_path
        );
        nodes.push(NodeArtifact {
            node_name: node_name.clone(),
            script_path,
            task_def_path,
            family: task_def.family,
        });
    }

    Ok(JobArtifacts { job_dir, nodes })
}

fn node_spec<'a>(
    config: &'a TrainyardConfig,
    node_name: &str,
) -> Result<&'a trainyard_core::config::NodeSpec, CoreError> {
    config
        .fleet
        .get(node_name)
        .ok_or_else(|| CoreError::UnknownNode(node_name.to_string()))
}

fn write_executable(path: &std::path::Path, contents: &str) -> Result<(), CoreError> {
    std::fs::write(path, contents)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))?;
    }
    Ok(())
}
