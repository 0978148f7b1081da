use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Pool exhausted: requested {requested} node(s), {available} spare")]
    ExhaustedPool { requested: usize, available: usize },

    #[error("Task definition registration failed for family {family}: {message}")]
    Registration { family: String, message: String },

    #[error("Task launch failed on node {node}: {message}")]
    Launch { node: String, message: String },

    #[error("Node registry refresh failed: {0}")]
    RegistryRefresh(String),

    #[error("Orchestrator call failed: {0}")]
    Orchestrator(String),

    #[error("Another job submission is in progress")]
    SubmissionInProgress,

    #[error("Timeout after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Malformed orchestrator response: {0}")]
    MalformedResponse(String),

    #[error("Node {0} is not in the configured fleet")]
    UnknownNode(String),

    #[error("Configuration error: {0}")]
    Config(String),
}
