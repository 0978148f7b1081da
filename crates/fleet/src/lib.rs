pub mod pool;
pub mod registry;

#[cfg(test)]
pub(crate) mod tests_common;

pub use pool::{NodePool, PoolSnapshot};
pub use registry::{refresh_fleet, usable_node_names};
