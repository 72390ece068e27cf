//! Run history and retention commands

use anyhow::Result;
use chrono::Utc;
use packrat_core::db::RunFilter;
use packrat_core::{Database, RetentionEnforcer, RunStatus};

use super::{format_size, resolve_job_arg, truncate};

/// Show recent runs, newest first
pub fn cmd_history(db: &Database, job_arg: Option<&str>, limit: i64) -> Result<()> {
    let job_id = match job_arg {
        Some(arg) => Some(resolve_job_arg(db, arg)?.id),
        None => None,
    };

    let filter = RunFilter {
        job_id,
        status: None,
        limit: Some(limit),
        offset: None,
    };
    let runs = db.list_runs(&filter)?;

    if runs.is_empty() {
        println!("No runs recorded yet.");
        return Ok(());
    }

    println!();
    println!(
        "{:<6} {:<20} {:<10} {:<17} {:>9}  {}",
        "RUN", "JOB", "STATUS", "STARTED", "SIZE", "DETAIL"
    );
    println!("{}", "-".repeat(90));

    for item in runs {
        let run = item.run;
        let size = match run.file_size_bytes {
            Some(bytes) => format_size(bytes as u64),
            None => "-".to_string(),
        };
        // For failed runs the error is the interesting part, otherwise the key
        let detail = match run.status {
            RunStatus::Failed => run.error_message.as_deref().unwrap_or(""),
            _ => run.s3_key.as_deref().unwrap_or(""),
        };

        println!(
            "{:<6} {:<20} {:<10} {:<17} {:>9}  {}",
            run.id,
            truncate(&item.job_name, 20),
            run.status.as_str(),
            run.started_at.format("%Y-%m-%d %H:%M").to_string(),
            size,
            truncate(detail, 40)
        );
    }

    Ok(())
}

/// Apply every enabled job's retention policy immediately
pub async fn cmd_retention(db: &Database) -> Result<()> {
    println!("🧹 Applying retention policies...");

    let enforcer = RetentionEnforcer::new(db.clone());
    let report = enforcer.sweep(Utc::now()).await?;

    println!("✅ Retention sweep complete");
    println!("   S3 objects deleted: {}", report.s3.deleted);
    println!("   Local archives deleted: {}", report.local.deleted);
    if report.s3.failed > 0 || report.local.failed > 0 {
        println!(
            "   ⚠️  Failed deletions: {} S3, {} local (see logs)",
            report.s3.failed, report.local.failed
        );
    }

    Ok(())
}
