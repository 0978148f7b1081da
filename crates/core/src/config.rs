use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Static description of one fleet node, keyed by node name in the
/// `[fleet]` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSpec {
    pub ip: String,
    /// InfiniBand device identifiers for this node, in NCCL_IB_HCA order.
    /// Device naming varies per node; never assume a uniform list.
    pub ibdevs: Vec<String>,
    #[serde(default = "default_num_gpus")]
    pub num_gpus: u32,
}

fn default_num_gpus() -> u32 {
    8
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub cluster_name: String,
    /// AWS region override; the CLI default applies when unset.
    pub region: Option<String>,
    /// AWS CLI profile override.
    pub profile: Option<String>,
    pub launch_type: String,
    /// Container-instance attribute holding the configured node name.
    pub node_name_attribute: String,
    /// Upper bound on any single orchestrator call.
    pub call_timeout_secs: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            cluster_name: "default-cluster".to_string(),
            region: None,
            profile: None,
            launch_type: "EC2".to_string(),
            node_name_attribute: "node_name".to_string(),
            call_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchConfig {
    /// Root of the per-job artifact tree, relative to the shared workspace
    /// mount. Containers address artifacts as `{workspace_prefix}/{path}`,
    /// so this must stay a relative path.
    pub history_root: PathBuf,
    /// Mount point of the shared workspace inside training containers.
    pub workspace_prefix: String,
    /// Interface exported as NCCL_SOCKET_IFNAME.
    pub network_interface: String,
    pub default_master_port: u16,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            history_root: PathBuf::from("_submit_history"),
            workspace_prefix: "/workspace".to_string(),
            network_interface: "bond0".to_string(),
            default_master_port: 29500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateConfig {
    pub task_definition: PathBuf,
    pub training_container: PathBuf,
    pub health_container: PathBuf,
}

impl Default for TemplateConfig {
    fn default() -> Self {
        let dir = config_dir().join("templates");
        Self {
            task_definition: dir.join("task-definition.json"),
            training_container: dir.join("training-container.json"),
            health_container: dir.join("health-container.json"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    /// Task-definition family used for health-check rounds.
    pub family: String,
    /// Shared host-list file read by the check scripts. Single well-known
    /// path; one health check at a time.
    pub host_file: PathBuf,
    pub master_script: String,
    pub worker_script: String,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            family: "NodeHealthAndConnectivityCheck".to_string(),
            host_file: PathBuf::from("/fsx/healthcheck/my_hosts"),
            master_script: "/healthcheck/healthCheckMaster.sh".to_string(),
            worker_script: "/healthcheck/healthCheckWorker.sh".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    pub db_path: PathBuf,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            db_path: data_dir().join("trainyard.db"),
        }
    }
}

/// Top-level configuration aggregating all sub-configs.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TrainyardConfig {
    #[serde(default)]
    pub cluster: ClusterConfig,
    /// Node name -> static node description. BTreeMap keeps iteration in
    /// name order, which the allocator's tie-break relies on.
    #[serde(default)]
    pub fleet: BTreeMap<String, NodeSpec>,
    #[serde(default)]
    pub launch: LaunchConfig,
    #[serde(default)]
    pub templates: TemplateConfig,
    #[serde(default)]
    pub health_check: HealthCheckConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
}

/// Returns the platform-specific config directory for trainyard.
///
/// - Linux/macOS: `~/.config/trainyard/`
/// - Windows: `%APPDATA%\trainyard\`
pub fn config_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata).join("trainyard");
        }
    }

    #[cfg(not(target_os = "windows"))]
    {
        if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
            return PathBuf::from(xdg).join("trainyard");
        }
    }

    // Fallback: ~/.config/trainyard
    if let Some(home) = home_dir() {
        return home.join(".config").join("trainyard");
    }

    // Last resort
    PathBuf::from(".trainyard")
}

/// Returns the full path to the config file.
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

/// Returns `~/.trainyard/` — the data directory for non-config files
/// (ledger database, logs).
pub fn data_dir() -> PathBuf {
    if let Some(home) = home_dir() {
        home.join(".trainyard")
    } else {
        PathBuf::from(".trainyard")
    }
}

/// Returns `~/.trainyard/logs/`.
pub fn log_dir() -> PathBuf {
    data_dir().join("logs")
}

/// Load configuration from the platform-specific path.
/// Creates the config file with defaults on first run.
pub fn load_or_create_config() -> TrainyardConfig {
    let path = config_path();

    if path.exists() {
        load_config(&path.to_string_lossy())
    } else {
        let config = TrainyardConfig::default();

        if let Err(e) = save_config(&config, &path.to_string_lossy()) {
            tracing::warn!("Could not create default config at {:?}: {}", path, e);
        } else {
            tracing::info!("Created default config at {:?}", path);
        }

        config
    }
}

/// Load configuration from a TOML file.
/// Falls back to defaults if the file doesn't exist.
pub fn load_config(path: &str) -> TrainyardConfig {
    match std::fs::read_to_string(path) {
        Ok(contents) => match toml::from_str(&contents) {
            Ok(config) => {
                tracing::info!("Loaded config from {}", path);
                config
            }
            Err(e) => {
                tracing::warn!("Failed to parse config {}: {}, using defaults", path, e);
                TrainyardConfig::default()
            }
        },
        Err(_) => {
            tracing::debug!("Config file {} not found, using defaults", path);
            TrainyardConfig::default()
        }
    }
}

/// Save configuration to a TOML file.
/// Creates parent directories if they don't exist.
pub fn save_config(config: &TrainyardConfig, path: &str) -> anyhow::Result<()> {
    let path = std::path::Path::new(path);

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let contents = toml::to_string_pretty(config)?;
    std::fs::write(path, contents)?;
    tracing::info!("Config saved to {:?}", path);
    Ok(())
}

/// Get the user's home directory.
fn home_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE").ok().map(PathBuf::from)
    }

    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME").ok().map(PathBuf::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fleet_table_parses_in_name_order() {
        let toml_text = r#"
            [cluster]
            cluster_name = "gpu-cluster"
            launch_type = "EC2"
            node_name_attribute = "node_name"
            call_timeout_secs = 60

            [fleet.node-c]
            ip = "10.0.0.3"
            ibdevs = ["mlx5_4"]

            [fleet.node-a]
            ip = "10.0.0.1"
            ibdevs = ["mlx5_0", "mlx5_1"]
            num_gpus = 4
        "#;

        let config: TrainyardConfig = toml::from_str(toml_text).unwrap();

        let names: Vec<&String> = config.fleet.keys().collect();
        assert_eq!(names, ["node-a", "node-c"]);
        assert_eq!(config.fleet["node-a"].num_gpus, 4);
        // num_gpus defaults to 8 when omitted
        assert_eq!(config.fleet["node-c"].num_gpus, 8);
        assert_eq!(config.cluster.cluster_name, "gpu-cluster");
    }

    #[test]
    fn test_save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = TrainyardConfig::default();
        config.cluster.cluster_name = "gpu-cluster".to_string();
        config.cluster.region = Some("us-east-1".to_string());
        config.fleet.insert(
            "node-a".to_string(),
            NodeSpec {
                ip: "10.0.0.1".to_string(),
                ibdevs: vec!["mlx5_0".to_string(), "mlx5_1".to_string()],
                num_gpus: 4,
            },
        );

        save_config(&config, &path.to_string_lossy()).unwrap();
        let loaded = load_config(&path.to_string_lossy());

        assert_eq!(loaded.cluster.cluster_name, "gpu-cluster");
        assert_eq!(loaded.cluster.region.as_deref(), Some("us-east-1"));
        assert_eq!(loaded.fleet["node-a"].ip, "10.0.0.1");
        assert_eq!(loaded.fleet["node-a"].ibdevs.len(), 2);
        assert_eq!(loaded.fleet["node-a"].num_gpus, 4);
        assert_eq!(loaded.launch.history_root, config.launch.history_root);
        assert_eq!(loaded.health_check.family, config.health_check.family);
    }
}
