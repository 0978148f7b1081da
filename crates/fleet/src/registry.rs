use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, warn};

use trainyard_core::config::NodeSpec;
use trainyard_core::error::CoreError;
use trainyard_core::orchestrator::ClusterOrchestrator;
use trainyard_core::types::NodeInfo;

/// Rebuild the runtime view of the fleet from the orchestrator's live
/// container-instance state.
///
/// A node counts as usable only when its agent is ACTIVE and no task holds
/// any of its GPUs (registered capacity equals remaining capacity).
/// Configured nodes with no matching live instance come back with
/// `usable = false`.
///
/// Failure policy: fail hard. Any orchestrator query error aborts the whole
/// refresh as `RegistryRefresh`; callers keep their previous state rather
/// than acting on fabricated availability.
pub async fn refresh_fleet(
    orchestrator: &dyn ClusterOrchestrator,
    fleet: &BTreeMap<String, NodeSpec>,
) -> Result<BTreeMap<String, NodeInfo>, CoreError> {
    let mut nodes: BTreeMap<String, NodeInfo> = fleet
        .iter()
        .map(|(name, spec)| (name.clone(), NodeInfo::from_spec(name, spec)))
        .collect();

    let arns = orchestrator
        .list_container_instances()
        .await
        .map_err(|e| CoreError::RegistryRefresh(e.to_string()))?;

    if arns.is_empty() {
        warn!("No container instances registered in the cluster");
        return Ok(nodes);
    }

    let views = orchestrator
        .describe_container_instances(&arns)
        .await
        .map_err(|e| CoreError::RegistryRefresh(e.to_string()))?;

    for view in views {
        let Some(node_name) = view.node_name else {
            continue;
        };
        let Some(node) = nodes.get_mut(&node_name) else {
            warn!(
                "Container instance {} reports unconfigured node {}",
                view.container_instance_id, node_name
            );
            continue;
        };

        node.container_instance_id = Some(view.container_instance_id);
        node.agent_status = Some(view.agent_status.clone());
        node.registered_gpus = view.registered_gpus;
        node.remaining_gpus = view.remaining_gpus;
        node.usable = view.agent_status == "ACTIVE"
            && view.registered_gpus > 0
            && view.registered_gpus == view.remaining_gpus;

        debug!(
            "Refreshed {}: status={} gpus={}/{} usable={}",
            node.name, view.agent_status, node.remaining_gpus, node.registered_gpus, node.usable
        );
    }

    Ok(nodes)
}

/// Names of the physically-available nodes in a refresh result.
pub fn usable_node_names(nodes: &BTreeMap<String, NodeInfo>) -> BTreeSet<String> {
    nodes
        .values()
        .filter(|node| node.usable)
        .map(|node| node.name.clone())
        .collect()
}
