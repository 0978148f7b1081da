use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use trainyard_ecs::AwsCliOrchestrator;
use trainyard_fleet::NodePool;
use trainyard_launch::templates::load_templates;
use trainyard_launch::{LaunchReport, LaunchRequest, LaunchService, NodeStatusRow};

#[derive(Parser)]
#[command(name = "trainyard", about = "Distributed-training control plane for a fixed ECS GPU fleet")]
struct Cli {
    #[arg(long, help = "Path to config file (default: ~/.config/trainyard/config.toml)")]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch a multi-node training job
    Launch {
        /// Base job name; the job ID appends a timestamp and random suffix
        job_name: String,

        /// User entry script, relative to the workspace mount
        entry_script: String,

        #[arg(short, long, default_value = "1")]
        nodes: usize,

        #[arg(long, help = "Rendezvous port on the master node (default from config)")]
        master_port: Option<u16>,

        #[arg(long, help = "Gate each training container on a health-check container")]
        health_check: bool,
    },

    /// Refresh and print the node-status table
    Nodes,

    /// Return every assigned node to spare
    ReleaseAll,

    /// Submit a connectivity/health-check round
    HealthCheck {
        /// Master node name
        master: String,

        /// Worker node names
        workers: Vec<String>,
    },

    /// List recorded jobs, newest first
    Jobs,

    /// List the tasks of one job
    Tasks { job_id: String },

    /// Stop a running task
    StopTask { task_id: String },

    /// Show whether a task is running
    TaskState { task_id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Log rotation: daily rolling logs to ~/.trainyard/logs/
    let log_dir = trainyard_core::config::log_dir();
    std::fs::create_dir_all(&log_dir)?;
    let file_appender = tracing_appender::rolling::daily(&log_dir, "console.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "trainyard=debug".into()),
        )
        .with_writer(non_blocking)
        .with_ansi(false)
        .init();

    let cli = Cli::parse();

    // Load config: --config flag > default platform path
    let config = match &cli.config {
        Some(path) => trainyard_core::config::load_config(path),
        None => trainyard_core::config::load_or_create_config(),
    };
    if config.fleet.is_empty() {
        anyhow::bail!(
            "No nodes configured; add a [fleet.<node>] table to {}",
            trainyard_core::config::config_path().display()
        );
    }

    let templates = load_templates(&config.templates).context("loading task templates")?;
    let ledger = trainyard_core::ledger::open_ledger(&config.ledger.db_path)
        .context("opening ledger database")?;
    let orchestrator = Arc::new(AwsCliOrchestrator::new(&config.cluster));
    let pool = Arc::new(NodePool::new(BTreeSet::new()));

    info!("Cluster: {}, fleet of {} node(s)", config.cluster.cluster_name, config.fleet.len());

    let default_master_port = config.launch.default_master_port;
    let service = LaunchService::new(
        config,
        templates,
        pool,
        orchestrator,
        Arc::new(Mutex::new(ledger)),
    );

    match cli.command {
        Commands::Launch {
            job_name,
            entry_script,
            nodes,
            master_port,
            health_check,
        } => {
            // Pool starts from live physical availability.
            match service.refresh_nodes().await {
                Ok(_) => {
                    let request = LaunchRequest {
                        base_name: job_name,
                        num_nodes: nodes,
                        master_port: master_port.unwrap_or(default_master_port),
                        entry_script,
                        health_check,
                    };
                    match service.launch_job(request).await {
                        Ok(report) => print_launch_report(&report),
                        Err(e) => print_error_banner(&e),
                    }
                }
                Err(e) => print_error_banner(&e),
            }
        }

        Commands::Nodes => match service.refresh_nodes().await {
            Ok(rows) => print_node_table(&rows),
            Err(e) => print_error_banner(&e),
        },

        Commands::ReleaseAll => match service.release_all_nodes().await {
            Ok(rows) => {
                println!("All nodes released.");
                print_node_table(&rows);
            }
            Err(e) => print_error_banner(&e),
        },

        Commands::HealthCheck { master, workers } => {
            let mut nodes = vec![master];
            nodes.extend(workers);
            match service.run_health_check(&nodes).await {
                Ok(report) => {
                    println!("Health check submitted for nodes: {}", nodes.join(", "));
                    println!("Host file: {}", report.host_file.display());
                    println!("Artifacts: {}", report.artifact_dir.display());
                    println!("Task IDs (master last): {}", report.task_ids.join(", "));
                }
                Err(e) => print_error_banner(&e),
            }
        }

        Commands::Jobs => match service.list_jobs() {
            Ok(jobs) => {
                if jobs.is_empty() {
                    println!("No jobs recorded.");
                }
                for job in jobs {
                    println!(
                        "{}  [{}]  {} node(s) on {}  tasks: {}",
                        job.job_id,
                        job.status,
                        job.num_nodes,
                        job.cluster_name,
                        job.ecs_task_ids.join(", ")
                    );
                }
            }
            Err(e) => print_error_banner(&e),
        },

        Commands::Tasks { job_id } => match service.job_tasks(&job_id) {
            Ok(tasks) => {
                if tasks.is_empty() {
                    println!("No tasks recorded for job {}.", job_id);
                }
                for task in tasks {
                    println!(
                        "rank {}  {}  task {}  def {}  instance {}",
                        task.node_index_in_job,
                        task.node_name,
                        task.ecs_task_id,
                        task.task_def_arn,
                        task.container_instance_id
                    );
                }
            }
            Err(e) => print_error_banner(&e),
        },

        Commands::StopTask { task_id } => match service.stop_task(&task_id).await {
            Ok(()) => println!("Stop requested for task {}.", task_id),
            Err(e) => print_error_banner(&e),
        },

        Commands::TaskState { task_id } => match service.is_task_running(&task_id).await {
            Ok(running) => println!(
                "Task {} is {}.",
                task_id,
                if running { "running" } else { "not running" }
            ),
            Err(e) => print_error_banner(&e),
        },
    }

    Ok(())
}

fn print_launch_report(report: &LaunchReport) {
    println!("Job ID: {}", report.job_id);
    for result in &report.node_results {
        match &result.result {
            Ok(launched) => println!(
                "  {} (rank {}) -> task {} on instance {}",
                result.node_name, launched.node_index, launched.task_id, launched.container_instance_id
            ),
            Err(message) => println!("  {} -> FAILED: {}", result.node_name, message),
        }
    }
    let attempted = report.node_results.len();
    for node in &report.assigned_nodes[attempted..] {
        println!("  {} -> skipped (submission stopped at first failure)", node);
    }

    if report.all_succeeded() {
        if let Some(history) = &report.history_file {
            println!("Execution history: {}", history.display());
        }
        if !report.job_recorded {
            println!("Warning: job record could not be written; tasks are running unrecorded.");
        }
    } else {
        println!(
            "Job incomplete: launched tasks stay live and no job record was written; \
             this job's nodes returned to spare."
        );
    }
}

fn print_node_table(rows: &[NodeStatusRow]) {
    println!(
        "{:<16} {:<15} {:>5} {:>9}  {:<10} {:<9} {}",
        "NODE", "IP", "GPUS", "REMAINING", "AGENT", "USABLE", "POOL"
    );
    for row in rows {
        println!(
            "{:<16} {:<15} {:>5} {:>9}  {:<10} {:<9} {}",
            row.name,
            row.ip,
            row.num_gpus,
            row.remaining_gpus,
            row.agent_status,
            if row.usable { "yes" } else { "no" },
            row.pool_state
        );
    }
}

fn error_banner(error: &dyn std::fmt::Display) -> String {
    format!("ERROR: {}", error)
}

fn print_error_banner(error: &dyn std::fmt::Display) {
    eprintln!("{}", error_banner(error));
}

#[cfg(test)]
mod tests {
    use super::*;
    use trainyard_core::error::CoreError;

    #[test]
    fn test_error_banner_renders_domain_and_boundary_errors() {
        let domain = CoreError::SubmissionInProgress;
        assert_eq!(
            error_banner(&domain),
            "ERROR: Another job submission is in progress"
        );

        let boundary = anyhow::anyhow!("ledger unavailable");
        assert_eq!(error_banner(&boundary), "ERROR: ledger unavailable");
    }
}
