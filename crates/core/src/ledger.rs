use std::path::Path;

use rusqlite::{params, Connection};
use tracing::info;

use crate::types::{now_timestamp, JobRecord, JobStatus, TaskRecord};

/// Open (or create) the SQLite ledger at the given path.
pub fn open_ledger(db_path: &Path) -> anyhow::Result<Connection> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let conn = Connection::open(db_path)?;

    // WAL mode for concurrent reads
    conn.pragma_update(None, "journal_mode", "WAL")?;

    init_tables(&conn)?;

    // File permissions: 0o600 (owner-only)
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        let _ = std::fs::set_permissions(db_path, perms);
    }

    info!("SQLite ledger opened at {:?}", db_path);
    Ok(conn)
}

pub fn init_tables(conn: &Connection) -> anyhow::Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS jobs (
            job_id TEXT PRIMARY KEY,
            job_timestamp TEXT NOT NULL,
            cluster_name TEXT NOT NULL,
            num_nodes INTEGER NOT NULL,
            assigned_nodes TEXT NOT NULL,
            container_instance_ids TEXT NOT NULL,
            ecs_task_ids TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'IN_PROGRESS',
            retry INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS tasks (
            ecs_task_id TEXT PRIMARY KEY,
            node_name TEXT NOT NULL,
            node_index_in_job INTEGER NOT NULL,
            job_id TEXT NOT NULL,
            job_timestamp TEXT NOT NULL,
            job_num_nodes INTEGER NOT NULL,
            task_def_arn TEXT NOT NULL,
            task_def_name TEXT NOT NULL,
            task_def_revision TEXT NOT NULL,
            cluster_name TEXT NOT NULL,
            container_instance_id TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_tasks_job ON tasks(job_id, node_index_in_job);
        ",
    )?;
    Ok(())
}

/// Record a job (UPSERT keyed by job_id). Called only once every node in
/// the job produced a task ID.
pub fn record_job(conn: &Connection, record: &JobRecord) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO jobs (job_id, job_timestamp, cluster_name, num_nodes, assigned_nodes, container_instance_ids, ecs_task_ids, status, retry, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
         ON CONFLICT(job_id) DO UPDATE SET
           assigned_nodes = excluded.assigned_nodes,
           container_instance_ids = excluded.container_instance_ids,
           ecs_task_ids = excluded.ecs_task_ids,
           status = excluded.status,
           retry = excluded.retry,
           updated_at = excluded.updated_at",
        params![
            record.job_id,
            record.job_timestamp,
            record.cluster_name,
            record.num_nodes as i64,
            serde_json::to_string(&record.assigned_nodes).unwrap_or_default(),
            serde_json::to_string(&record.container_instance_ids).unwrap_or_default(),
            serde_json::to_string(&record.ecs_task_ids).unwrap_or_default(),
            record.status.as_str(),
            record.retry as i64,
            record.created_at,
            record.updated_at,
        ],
    )?;
    Ok(())
}

/// Record a submitted task (UPSERT keyed by ecs_task_id).
pub fn record_task(conn: &Connection, record: &TaskRecord) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO tasks (ecs_task_id, node_name, node_index_in_job, job_id, job_timestamp, job_num_nodes, task_def_arn, task_def_name, task_def_revision, cluster_name, container_instance_id, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
         ON CONFLICT(ecs_task_id) DO UPDATE SET
           node_name = excluded.node_name,
           node_index_in_job = excluded.node_index_in_job,
           job_id = excluded.job_id,
           task_def_arn = excluded.task_def_arn,
           task_def_name = excluded.task_def_name,
           task_def_revision = excluded.task_def_revision,
           container_instance_id = excluded.container_instance_id,
           updated_at = excluded.updated_at",
        params![
            record.ecs_task_id,
            record.node_name,
            record.node_index_in_job as i64,
            record.job_id,
            record.job_timestamp,
            record.job_num_nodes as i64,
            record.task_def_arn,
            record.task_def_name,
            record.task_def_revision,
            record.cluster_name,
            record.container_instance_id,
            record.created_at,
            record.updated_at,
        ],
    )?;
    Ok(())
}

/// Atomically set a job's status, refreshing updated_at. Returns false when
/// the job is unknown.
pub fn update_job_status(
    conn: &Connection,
    job_id: &str,
    status: JobStatus,
) -> anyhow::Result<bool> {
    let updated = conn.execute(
        "UPDATE jobs SET status = ?1, updated_at = ?2 WHERE job_id = ?3",
        params![status.as_str(), now_timestamp(), job_id],
    )?;
    Ok(updated > 0)
}

/// Load all jobs, newest first.
pub fn load_jobs(conn: &Connection) -> anyhow::Result<Vec<JobRecord>> {
    let mut stmt = conn.prepare(
        "SELECT job_id, job_timestamp, cluster_name, num_nodes, assigned_nodes, container_instance_ids, ecs_task_ids, status, retry, created_at, updated_at
         FROM jobs ORDER BY created_at DESC",
    )?;
    let rows = stmt.query_map([], job_from_row)?;
    let mut result = Vec::new();
    for row in rows {
        result.push(row?);
    }
    Ok(result)
}

/// Load one job by ID.
pub fn load_job(conn: &Connection, job_id: &str) -> anyhow::Result<Option<JobRecord>> {
    let mut stmt = conn.prepare(
        "SELECT job_id, job_timestamp, cluster_name, num_nodes, assigned_nodes, container_instance_ids, ecs_task_ids, status, retry, created_at, updated_at
         FROM jobs WHERE job_id = ?1",
    )?;
    let mut rows = stmt.query_map(params![job_id], job_from_row)?;
    Ok(rows.next().transpose()?)
}

/// Load every task of a job, in rank order.
pub fn load_tasks_for_job(conn: &Connection, job_id: &str) -> anyhow::Result<Vec<TaskRecord>> {
    let mut stmt = conn.prepare(
        "SELECT ecs_task_id, node_name, node_index_in_job, job_id, job_timestamp, job_num_nodes, task_def_arn, task_def_name, task_def_revision, cluster_name, container_instance_id, created_at, updated_at
         FROM tasks WHERE job_id = ?1 ORDER BY node_index_in_job",
    )?;
    let rows = stmt.query_map(params![job_id], |row| {
        Ok(TaskRecord {
            ecs_task_id: row.get(0)?,
            node_name: row.get(1)?,
            node_index_in_job: row.get::<_, i64>(2)? as u32,
            job_id: row.get(3)?,
            job_timestamp: row.get(4)?,
            job_num_nodes: row.get::<_, i64>(5)? as u32,
            task_def_arn: row.get(6)?,
            task_def_name: row.get(7)?,
            task_def_revision: row.get(8)?,
            cluster_name: row.get(9)?,
            container_instance_id: row.get(10)?,
            created_at: row.get(11)?,
            updated_at: row.get(12)?,
        })
    })?;
    let mut result = Vec::new();
    for row in rows {
        result.push(row?);
    }
    Ok(result)
}

fn job_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<JobRecord> {
    let assigned: String = row.get(4)?;
    let instances: String = row.get(5)?;
    let task_ids: String = row.get(6)?;
    let status: String = row.get(7)?;
    Ok(JobRecord {
        job_id: row.get(0)?,
        job_timestamp: row.get(1)?,
        cluster_name: row.get(2)?,
        num_nodes: row.get::<_, i64>(3)? as u32,
        assigned_nodes: serde_json::from_str(&assigned).unwrap_or_default(),
        container_instance_ids: serde_json::from_str(&instances).unwrap_or_default(),
        ecs_task_ids: serde_json::from_str(&task_ids).unwrap_or_default(),
        status: job_status_from_str(&status),
        retry: row.get::<_, i64>(8)? as u32,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

fn job_status_from_str(s: &str) -> JobStatus {
    match s {
        "STOPPED" => JobStatus::Stopped,
        "COMPLETED" => JobStatus::Completed,
        "FAILED" => JobStatus::Failed,
        _ => JobStatus::InProgress,
    }
}
