//! Job commands (list, run now)

use std::collections::HashMap;

use anyhow::Result;
use packrat_core::{Database, Job, Run, RunExecutor, RunStatus};

use super::{format_size, truncate};

/// Resolve a job argument that may be an ID or a name
pub fn resolve_job_arg(db: &Database, arg: &str) -> Result<Job> {
    if let Ok(id) = arg.parse::<i64>() {
        if let Some(job) = db.get_job(id)? {
            return Ok(job);
        }
        tracing::debug!("No job with id {}, trying name lookup", id);
    }
    db.get_job_by_name(arg)?
        .ok_or_else(|| anyhow::anyhow!("Job not found: {}", arg))
}

/// List configured backup jobs with their last run
pub fn cmd_jobs(db: &Database) -> Result<()> {
    let jobs = db.list_jobs()?;

    if jobs.is_empty() {
        println!("No jobs configured. Create one through the API:");
        println!("  POST /api/jobs");
        return Ok(());
    }

    let last_runs: HashMap<i64, Run> = db
        .latest_run_per_job()?
        .into_iter()
        .map(|item| (item.run.job_id, item.run))
        .collect();

    println!();
    println!("📋 Backup jobs");
    println!();
    println!(
        "{:<4} {:<24} {:<6} {:<14} {:<17} {}",
        "ID", "NAME", "TYPE", "SCHEDULE", "LAST RUN", "STATUS"
    );
    println!("{}", "-".repeat(78));

    for job in jobs {
        let (last_at, last_status) = match last_runs.get(&job.id) {
            Some(run) => (
                run.started_at.format("%Y-%m-%d %H:%M").to_string(),
                run.status.to_string(),
            ),
            None => ("never".to_string(), "-".to_string()),
        };
        let disabled = if job.enabled { "" } else { " (disabled)" };

        println!(
            "{:<4} {:<24} {:<6} {:<14} {:<17} {}{}",
            job.id,
            truncate(&job.name, 24),
            job.source.kind().as_str(),
            truncate(&job.schedule_cron, 14),
            last_at,
            last_status,
            disabled
        );
    }

    Ok(())
}

/// Run a backup job inline and report the outcome
pub async fn cmd_run(db: &Database, job_arg: &str) -> Result<()> {
    let job = resolve_job_arg(db, job_arg)?;

    if db.has_active_run(job.id)? {
        anyhow::bail!("A run is already active for job '{}'", job.name);
    }

    println!("📦 Running backup for job '{}'...", job.name);

    let run = db.create_run(job.id)?;
    let executor = RunExecutor::new(db.clone());
    let status = executor.execute(run.id).await?;

    let finished = db
        .get_run(run.id)?
        .ok_or_else(|| anyhow::anyhow!("Run {} not found after execution", run.id))?;

    match status {
        RunStatus::Success => {
            println!("✅ Backup completed (run {})", run.id);
            if let Some(bytes) = finished.file_size_bytes {
                println!("   Size: {}", format_size(bytes as u64));
            }
            if let Some(key) = &finished.s3_key {
                println!("   S3 key: {}", key);
            }
            if let Some(path) = &finished.local_path {
                println!("   Local copy: {}", path);
            }
            if let Some(secs) = finished.duration_seconds() {
                println!("   Duration: {}s", secs);
            }
        }
        RunStatus::Cancelled => {
            println!("🛑 Backup cancelled (run {})", run.id);
        }
        _ => {
            println!("❌ Backup failed (run {})", run.id);
            if let Some(msg) = &finished.error_message {
                println!("   Error: {}", msg);
            }
            anyhow::bail!("Backup did not complete successfully");
        }
    }

    Ok(())
}
