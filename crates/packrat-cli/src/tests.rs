//! CLI command tests
//!
//! This module contains all tests for the CLI commands.

use packrat_core::test_utils::test_job_config;
use packrat_core::{Database, RunStatus};

use crate::commands::{self, format_size, truncate};

fn setup_test_db() -> Database {
    Database::in_memory().unwrap()
}

/// Create a job with a single local source path, returning its id
fn create_test_job(db: &Database, name: &str) -> i64 {
    db.create_job(&test_job_config(name, vec!["/tmp".to_string()]))
        .unwrap()
}

/// Create a run and immediately finish it with the given outcome
fn create_finished_run(db: &Database, job_id: i64, status: RunStatus) -> i64 {
    let run = db.create_run(job_id).unwrap();
    let (size, s3_key, error) = match status {
        RunStatus::Success => (Some(1024 * 1024), Some("job/archive.tar.gz"), None),
        RunStatus::Failed => (None, None, Some("disk full")),
        _ => (None, None, None),
    };
    db.finish_run(run.id, status, size, s3_key, None, error)
        .unwrap();
    run.id
}

// ========== Jobs Command Tests ==========

#[test]
fn test_cmd_jobs_empty() {
    let db = setup_test_db();
    let result = commands::cmd_jobs(&db);
    assert!(result.is_ok());
}

#[test]
fn test_cmd_jobs_with_data() {
    let db = setup_test_db();
    let job_a = create_test_job(&db, "nightly-docs");
    let job_b = create_test_job(&db, "weekly-media");
    db.set_job_enabled(job_b, false).unwrap();
    create_finished_run(&db, job_a, RunStatus::Success);

    let result = commands::cmd_jobs(&db);
    assert!(result.is_ok());
}

#[test]
fn test_resolve_job_by_id() {
    let db = setup_test_db();
    let job_id = create_test_job(&db, "nightly-docs");

    let job = commands::resolve_job_arg(&db, &job_id.to_string());
    assert!(job.is_ok());
    assert_eq!(job.unwrap().name, "nightly-docs");
}

#[test]
fn test_resolve_job_by_name() {
    let db = setup_test_db();
    create_test_job(&db, "nightly-docs");

    let job = commands::resolve_job_arg(&db, "nightly-docs");
    assert!(job.is_ok());
    assert_eq!(job.unwrap().name, "nightly-docs");
}

#[test]
fn test_resolve_job_numeric_name_fallback() {
    let db = setup_test_db();
    // No job has id 42, but one is named "42"
    create_test_job(&db, "42");

    let job = commands::resolve_job_arg(&db, "42");
    assert!(job.is_ok());
    assert_eq!(job.unwrap().name, "42");
}

#[test]
fn test_resolve_job_not_found() {
    let db = setup_test_db();
    let result = commands::resolve_job_arg(&db, "no-such-job");
    assert!(result.is_err());
    assert!(result.unwrap_err().to_string().contains("Job not found"));
}

// ========== Run Command Tests ==========

#[tokio::test]
async fn test_cmd_run_rejects_active_run() {
    let db = setup_test_db();
    let job_id = create_test_job(&db, "nightly-docs");
    db.create_run(job_id).unwrap();

    let result = commands::cmd_run(&db, "nightly-docs").await;
    assert!(result.is_err());
    assert!(result.unwrap_err().to_string().contains("already active"));
}

#[tokio::test]
async fn test_cmd_run_unknown_job() {
    let db = setup_test_db();
    let result = commands::cmd_run(&db, "no-such-job").await;
    assert!(result.is_err());
    assert!(result.unwrap_err().to_string().contains("Job not found"));
}

// ========== History Command Tests ==========

#[test]
fn test_cmd_history_empty() {
    let db = setup_test_db();
    let result = commands::cmd_history(&db, None, 20);
    assert!(result.is_ok());
}

#[test]
fn test_cmd_history_with_data() {
    let db = setup_test_db();
    let job_id = create_test_job(&db, "nightly-docs");
    create_finished_run(&db, job_id, RunStatus::Success);
    create_finished_run(&db, job_id, RunStatus::Failed);

    let result = commands::cmd_history(&db, None, 20);
    assert!(result.is_ok());
}

#[test]
fn test_cmd_history_filters_by_job() {
    let db = setup_test_db();
    let job_a = create_test_job(&db, "nightly-docs");
    let job_b = create_test_job(&db, "weekly-media");
    create_finished_run(&db, job_a, RunStatus::Success);
    create_finished_run(&db, job_b, RunStatus::Success);

    let result = commands::cmd_history(&db, Some("weekly-media"), 20);
    assert!(result.is_ok());
}

#[test]
fn test_cmd_history_unknown_job() {
    let db = setup_test_db();
    let result = commands::cmd_history(&db, Some("no-such-job"), 20);
    assert!(result.is_err());
    assert!(result.unwrap_err().to_string().contains("Job not found"));
}

// ========== Retention Command Tests ==========

#[tokio::test]
async fn test_cmd_retention_nothing_configured() {
    // No S3 settings and no jobs: the sweep is a no-op
    let db = setup_test_db();
    let result = commands::cmd_retention(&db).await;
    assert!(result.is_ok());
}

// ========== Core Command Tests ==========

#[test]
fn test_cmd_init() {
    use tempfile::tempdir;

    let dir = tempdir().unwrap();
    let db_path = dir.path().join("test.db");

    let result = commands::cmd_init(&db_path, true);
    assert!(result.is_ok());

    // Verify database was created with the schema applied
    assert!(db_path.exists());
    let db = Database::new_unencrypted(db_path.to_str().unwrap()).unwrap();
    assert_eq!(db.count_jobs().unwrap(), 0);
}

#[test]
fn test_cmd_status() {
    use tempfile::tempdir;

    let dir = tempdir().unwrap();
    let db_path = dir.path().join("test.db");

    // Status on non-existent db
    let result = commands::cmd_status(&db_path, true);
    assert!(result.is_ok());

    // Create database with a job and a run
    let db = Database::new_unencrypted(db_path.to_str().unwrap()).unwrap();
    let job_id = create_test_job(&db, "nightly-docs");
    create_finished_run(&db, job_id, RunStatus::Success);
    drop(db);

    // Status on existing db
    let result = commands::cmd_status(&db_path, true);
    assert!(result.is_ok());
}

#[test]
fn test_open_db_unencrypted() {
    use tempfile::tempdir;

    let dir = tempdir().unwrap();
    let db_path = dir.path().join("test.db");

    // Create unencrypted
    let result = commands::open_db(&db_path, true);
    assert!(result.is_ok());

    // Open again unencrypted
    let result = commands::open_db(&db_path, true);
    assert!(result.is_ok());
}

// ========== Helper Function Tests ==========

#[test]
fn test_truncate() {
    assert_eq!(truncate("short", 10), "short");
    assert_eq!(truncate("a long string that exceeds", 10), "a long ...");
    assert_eq!(truncate("exact", 5), "exact");
    assert_eq!(truncate("toolong", 6), "too...");
}

#[test]
fn test_format_size() {
    assert_eq!(format_size(512), "512 B");
    assert_eq!(format_size(1536), "1.5 KB");
    assert_eq!(format_size(2 * 1024 * 1024), "2.0 MB");
    assert_eq!(format_size(3 * 1024 * 1024 * 1024), "3.0 GB");
}
