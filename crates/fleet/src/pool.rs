use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use tracing::{info, warn};

use trainyard_core::error::CoreError;

/// Read-only copy of the pool partition for status display.
#[derive(Debug, Clone)]
pub struct PoolSnapshot {
    pub spare: BTreeSet<String>,
    /// Node name -> job ID holding the reservation.
    pub assigned: BTreeMap<String, String>,
}

struct PoolState {
    spare: BTreeSet<String>,
    assigned: BTreeMap<String, String>,
}

/// In-memory spare/assigned partition over the physically-usable nodes of
/// the last registry refresh. This is a soft reservation layer: the
/// orchestrator's live resource view stays the only ground truth, and a
/// refresh discards the partition entirely.
///
/// Owned object, shared as `Arc<NodePool>`; the interior lock is never held
/// across an await point.
pub struct NodePool {
    state: Mutex<PoolState>,
}

impl NodePool {
    pub fn new(spare: BTreeSet<String>) -> Self {
        Self {
            state: Mutex::new(PoolState {
                spare,
                assigned: BTreeMap::new(),
            }),
        }
    }

    /// Assign `num_nodes` nodes to `job_id` in one critical section. The
    /// returned list is ordered; index 0 is the master. Nodes are taken in
    /// name order (lowest-sorted first), which keeps assignment
    /// deterministic for a given pool.
    ///
    /// On exhaustion nothing is retained: every node popped in this call
    /// goes back to spare before the error surfaces.
    pub fn assign_job_nodes(
        &self,
        job_id: &str,
        num_nodes: usize,
    ) -> Result<Vec<String>, CoreError> {
        let mut state = self.state.lock().expect("pool lock poisoned");

        if state.spare.len() < num_nodes {
            let available = state.spare.len();
            warn!(
                "Pool exhausted: job {} requested {} node(s), {} spare",
                job_id, num_nodes, available
            );
            return Err(CoreError::ExhaustedPool {
                requested: num_nodes,
                available,
            });
        }

        let mut nodes = Vec::with_capacity(num_nodes);
        for _ in 0..num_nodes {
            // Checked above; spare cannot run dry mid-loop while we hold
            // the lock.
            let name = state.spare.pop_first().expect("spare set underflow");
            state.assigned.insert(name.clone(), job_id.to_string());
            nodes.push(name);
        }

        info!("Assigned nodes {:?} to job {}", nodes, job_id);
        Ok(nodes)
    }

    /// Assign a single spare node to `job_id`, lowest-sorted name first.
    pub fn assign_one(&self, job_id: &str) -> Result<String, CoreError> {
        let mut state = self.state.lock().expect("pool lock poisoned");
        match state.spare.pop_first() {
            Some(name) => {
                state.assigned.insert(name.clone(), job_id.to_string());
                info!("Assigned node {} to job {}", name, job_id);
                Ok(name)
            }
            None => Err(CoreError::ExhaustedPool {
                requested: 1,
                available: 0,
            }),
        }
    }

    /// Return this job's nodes to spare. Unknown job IDs are a no-op.
    pub fn release_job(&self, job_id: &str) {
        let mut state = self.state.lock().expect("pool lock poisoned");

        let released: Vec<String> = state
            .assigned
            .iter()
            .filter(|(_, owner)| owner.as_str() == job_id)
            .map(|(name, _)| name.clone())
            .collect();

        for name in &released {
            state.assigned.remove(name);
            state.spare.insert(name.clone());
        }

        if !released.is_empty() {
            info!("Released nodes {:?} of job {}", released, job_id);
        }
    }

    /// Return every assigned node to spare.
    pub fn release_all(&self) {
        let mut state = self.state.lock().expect("pool lock poisoned");
        let released: Vec<String> = state.assigned.keys().cloned().collect();
        state.assigned.clear();
        state.spare.extend(released);
    }

    /// Reset the partition from a fresh registry view: all usable nodes
    /// spare, nothing assigned. Soft reservations do not survive a refresh.
    pub fn apply_refresh(&self, usable: BTreeSet<String>) {
        let mut state = self.state.lock().expect("pool lock poisoned");
        state.spare = usable;
        state.assigned.clear();
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        let state = self.state.lock().expect("pool lock poisoned");
        PoolSnapshot {
            spare: state.spare.clone(),
            assigned: state.assigned.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool_of(names: &[&str]) -> NodePool {
        NodePool::new(names.iter().map(|n| n.to_string()).collect())
    }

    #[test]
    fn test_assign_returns_distinct_nodes_in_name_order() {
        let pool = pool_of(&["node-c", "node-a", "node-b"]);

        let nodes = pool.assign_job_nodes("job-1", 2).unwrap();
        assert_eq!(nodes, ["node-a", "node-b"]);

        let snap = pool.snapshot();
        assert!(snap.spare.contains("node-c"));
        assert!(!snap.spare.contains("node-a"));
        assert_eq!(snap.assigned.get("node-a").map(String::as_str), Some("job-1"));
        assert_eq!(snap.assigned.get("node-b").map(String::as_str), Some("job-1"));
    }

    #[test]
    fn test_assign_one_pops_lowest_name() {
        let pool = pool_of(&["node-b", "node-a"]);

        assert_eq!(pool.assign_one("job-1").unwrap(), "node-a");
        assert_eq!(pool.assign_one("job-2").unwrap(), "node-b");
        assert!(matches!(
            pool.assign_one("job-3").unwrap_err(),
            CoreError::ExhaustedPool { requested: 1, available: 0 }
        ));
    }

    #[test]
    fn test_exhaustion_rolls_back_fully() {
        let pool = pool_of(&["node-a", "node-b"]);

        let err = pool.assign_job_nodes("job-1", 3).unwrap_err();
        match err {
            CoreError::ExhaustedPool {
                requested,
                available,
            } => {
                assert_eq!(requested, 3);
                assert_eq!(available, 2);
            }
            other => panic!("unexpected error: {other}"),
        }

        // Pool observably unchanged
        let snap = pool.snapshot();
        assert_eq!(snap.spare.len(), 2);
        assert!(snap.assigned.is_empty());
    }

    #[test]
    fn test_exhaustion_after_partial_assignment() {
        let pool = pool_of(&["node-a", "node-b", "node-c"]);
        pool.assign_job_nodes("job-1", 2).unwrap();

        assert!(pool.assign_job_nodes("job-2", 2).is_err());

        let snap = pool.snapshot();
        assert_eq!(snap.spare.iter().collect::<Vec<_>>(), ["node-c"]);
        assert_eq!(snap.assigned.len(), 2);
    }

    #[test]
    fn test_release_job_returns_only_that_job() {
        let pool = pool_of(&["node-a", "node-b", "node-c"]);
        pool.assign_job_nodes("job-1", 1).unwrap();
        pool.assign_job_nodes("job-2", 1).unwrap();

        pool.release_job("job-1");

        let snap = pool.snapshot();
        assert!(snap.spare.contains("node-a"));
        assert!(snap.assigned.contains_key("node-b"));
    }

    #[test]
    fn test_release_all() {
        let pool = pool_of(&["node-a", "node-b"]);
        pool.assign_job_nodes("job-1", 2).unwrap();

        pool.release_all();

        let snap = pool.snapshot();
        assert_eq!(snap.spare.len(), 2);
        assert!(snap.assigned.is_empty());
    }

    #[test]
    fn test_apply_refresh_resets_partition() {
        let pool = pool_of(&["node-a", "node-b", "node-c"]);
        pool.assign_job_nodes("job-1", 2).unwrap();

        // node-b became unusable; reservations are discarded
        let usable: BTreeSet<String> = ["node-a", "node-c"]
            .iter()
            .map(|n| n.to_string())
            .collect();
        pool.apply_refresh(usable.clone());

        let snap = pool.snapshot();
        assert_eq!(snap.spare, usable);
        assert!(snap.assigned.is_empty());
    }
}
