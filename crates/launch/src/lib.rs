pub mod artifacts;
pub mod healthcheck;
pub mod service;
pub mod submitter;
pub mod templates;

#[cfg(test)]
pub(crate) mod tests_common;

pub use service::{LaunchReport, LaunchRequest, LaunchService, NodeStatusRow};
pub use submitter::{LaunchedNode, NodeLaunch};
