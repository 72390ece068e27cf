//! Run lifecycle, logs, and history queries
//!
//! Status transitions are compare-and-swap updates so that the executor,
//! the cancel endpoint, and startup recovery never clobber a terminal row.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde::Serialize;

use super::{invalid_column, parse_datetime, Database};
use crate::error::{Error, Result};
use crate::models::{Run, RunPhase, RunStatus};

/// Filters for run history queries
#[derive(Debug, Clone, Default)]
pub struct RunFilter {
    pub job_id: Option<i64>,
    pub status: Option<RunStatus>,
    /// Page size, clamped to 1..=200. Defaults to 50.
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// A run joined with its job's name, for list endpoints
#[derive(Debug, Clone, Serialize)]
pub struct RunListItem {
    #[serde(flatten)]
    pub run: Run,
    pub job_name: String,
}

/// Aggregate counts over the whole run history
#[derive(Debug, Clone, Serialize)]
pub struct HistorySummary {
    pub total: i64,
    pub success: i64,
    pub failed: i64,
    pub cancelled: i64,
    /// Runs still in flight (running or cancelling)
    pub active: i64,
    /// Share of terminal runs that succeeded, as a percentage
    pub success_rate: f64,
}

impl Database {
    /// Create a run row in `running`/`pending` state and return it
    pub fn create_run(&self, job_id: i64) -> Result<Run> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO backup_runs (job_id) VALUES (?)",
            params![job_id],
        )?;
        let id = conn.last_insert_rowid();

        self.get_run(id)?
            .ok_or_else(|| Error::NotFound(format!("run {} missing after insert", id)))
    }

    /// Get a run by ID (without its log text)
    pub fn get_run(&self, id: i64) -> Result<Option<Run>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, job_id, status, phase, started_at, completed_at,
                    file_size_bytes, s3_key, local_path, error_message
             FROM backup_runs WHERE id = ?",
        )?;

        let run = stmt
            .query_row(params![id], |row| Self::row_to_run(row))
            .optional()?;

        Ok(run)
    }

    /// Get the accumulated log text for a run
    pub fn get_run_logs(&self, id: i64) -> Result<Option<String>> {
        let conn = self.conn()?;
        let logs = conn
            .query_row(
                "SELECT logs FROM backup_runs WHERE id = ?",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(logs)
    }

    /// Append a chunk of log text to a run
    pub fn append_run_log(&self, id: i64, chunk: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE backup_runs SET logs = logs || ?1 WHERE id = ?2",
            params![chunk, id],
        )?;
        Ok(())
    }

    /// Record the phase a run has entered
    pub fn set_run_phase(&self, id: i64, phase: RunPhase) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE backup_runs SET phase = ? WHERE id = ?",
            params![phase.as_str(), id],
        )?;
        Ok(())
    }

    /// Current status of a run, if it exists
    pub fn run_status(&self, id: i64) -> Result<Option<RunStatus>> {
        let conn = self.conn()?;
        let status = conn
            .query_row(
                "SELECT status FROM backup_runs WHERE id = ?",
                params![id],
                |row| {
                    let s: String = row.get(0)?;
                    s.parse().map_err(|e| invalid_column(0, e))
                },
            )
            .optional()?;
        Ok(status)
    }

    /// Ask a running run to stop: `running` -> `cancelling`
    ///
    /// Returns false if the run was not in `running` state, in which case
    /// nothing changed.
    pub fn request_cancel(&self, id: i64) -> Result<bool> {
        let conn = self.conn()?;
        let rows = conn.execute(
            "UPDATE backup_runs SET status = 'cancelling' WHERE id = ? AND status = 'running'",
            params![id],
        )?;
        Ok(rows > 0)
    }

    /// Move a run to a terminal status and record its outcome
    ///
    /// Only applies while the run is still active, so a run that already
    /// reached a terminal state keeps it. Returns whether the update took.
    pub fn finish_run(
        &self,
        id: i64,
        status: RunStatus,
        file_size_bytes: Option<i64>,
        s3_key: Option<&str>,
        local_path: Option<&str>,
        error_message: Option<&str>,
    ) -> Result<bool> {
        let conn = self.conn()?;
        let rows = conn.execute(
            "UPDATE backup_runs
             SET status = ?1, completed_at = CURRENT_TIMESTAMP, file_size_bytes = ?2,
                 s3_key = ?3, local_path = ?4, error_message = ?5
             WHERE id = ?6 AND status IN ('running', 'cancelling')",
            params![
                status.as_str(),
                file_size_bytes,
                s3_key,
                local_path,
                error_message,
                id
            ],
        )?;
        Ok(rows > 0)
    }

    /// Whether the job has a run in flight
    pub fn has_active_run(&self, job_id: i64) -> Result<bool> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM backup_runs
             WHERE job_id = ? AND status IN ('running', 'cancelling')",
            params![job_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// The job's in-flight run, if any
    pub fn active_run_for_job(&self, job_id: i64) -> Result<Option<Run>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, job_id, status, phase, started_at, completed_at,
                    file_size_bytes, s3_key, local_path, error_message
             FROM backup_runs
             WHERE job_id = ? AND status IN ('running', 'cancelling')
             ORDER BY id DESC LIMIT 1",
        )?;

        let run = stmt
            .query_row(params![job_id], |row| Self::row_to_run(row))
            .optional()?;

        Ok(run)
    }

    /// List runs, newest first, with optional job and status filters
    pub fn list_runs(&self, filter: &RunFilter) -> Result<Vec<RunListItem>> {
        let conn = self.conn()?;

        let mut conditions: Vec<&str> = Vec::new();
        let mut query_params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(job_id) = filter.job_id {
            conditions.push("r.job_id = ?");
            query_params.push(Box::new(job_id));
        }
        if let Some(status) = filter.status {
            conditions.push("r.status = ?");
            query_params.push(Box::new(status.as_str().to_string()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let limit = filter.limit.unwrap_or(50).clamp(1, 200);
        let offset = filter.offset.unwrap_or(0).max(0);

        let sql = format!(
            "SELECT r.id, r.job_id, r.status, r.phase, r.started_at, r.completed_at,
                    r.file_size_bytes, r.s3_key, r.local_path, r.error_message, j.name
             FROM backup_runs r
             JOIN jobs j ON j.id = r.job_id
             {}
             ORDER BY r.started_at DESC, r.id DESC
             LIMIT ? OFFSET ?",
            where_clause
        );
        query_params.push(Box::new(limit));
        query_params.push(Box::new(offset));

        let mut stmt = conn.prepare(&sql)?;
        let params_refs: Vec<&dyn rusqlite::ToSql> =
            query_params.iter().map(|p| p.as_ref()).collect();

        let runs = stmt
            .query_map(params_refs.as_slice(), |row| {
                Ok(RunListItem {
                    run: Self::row_to_run(row)?,
                    job_name: row.get(10)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(runs)
    }

    /// Count runs matching a filter, ignoring its pagination fields
    pub fn count_runs(&self, filter: &RunFilter) -> Result<i64> {
        let conn = self.conn()?;

        let mut conditions: Vec<&str> = Vec::new();
        let mut query_params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(job_id) = filter.job_id {
            conditions.push("job_id = ?");
            query_params.push(Box::new(job_id));
        }
        if let Some(status) = filter.status {
            conditions.push("status = ?");
            query_params.push(Box::new(status.as_str().to_string()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let sql = format!("SELECT COUNT(*) FROM backup_runs {}", where_clause);
        let params_refs: Vec<&dyn rusqlite::ToSql> =
            query_params.iter().map(|p| p.as_ref()).collect();

        let count: i64 = conn.query_row(&sql, params_refs.as_slice(), |row| row.get(0))?;
        Ok(count)
    }

    /// Aggregate run counts and success rate
    pub fn history_summary(&self) -> Result<HistorySummary> {
        let conn = self.conn()?;
        let (total, success, failed, cancelled, active): (i64, i64, i64, i64, i64) = conn
            .query_row(
                "SELECT COUNT(*),
                        COALESCE(SUM(CASE WHEN status = 'success' THEN 1 ELSE 0 END), 0),
                        COALESCE(SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END), 0),
                        COALESCE(SUM(CASE WHEN status = 'cancelled' THEN 1 ELSE 0 END), 0),
                        COALESCE(SUM(CASE WHEN status IN ('running', 'cancelling') THEN 1 ELSE 0 END), 0)
                 FROM backup_runs",
                [],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                    ))
                },
            )?;

        let terminal = success + failed + cancelled;
        let success_rate = if terminal > 0 {
            (success as f64 / terminal as f64 * 1000.0).round() / 10.0
        } else {
            0.0
        };

        Ok(HistorySummary {
            total,
            success,
            failed,
            cancelled,
            active,
            success_rate,
        })
    }

    /// Delete terminal runs that completed more than `days` days ago
    pub fn delete_history_before(&self, days: i64) -> Result<usize> {
        let conn = self.conn()?;
        let rows = conn.execute(
            "DELETE FROM backup_runs
             WHERE status IN ('success', 'failed', 'cancelled')
               AND completed_at IS NOT NULL
               AND completed_at < datetime('now', ?)",
            params![format!("-{} days", days)],
        )?;
        Ok(rows)
    }

    /// Most recent run for every job that has one
    pub fn latest_run_per_job(&self) -> Result<Vec<RunListItem>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT r.id, r.job_id, r.status, r.phase, r.started_at, r.completed_at,
                    r.file_size_bytes, r.s3_key, r.local_path, r.error_message, j.name
             FROM backup_runs r
             JOIN jobs j ON j.id = r.job_id
             WHERE r.id IN (SELECT MAX(id) FROM backup_runs GROUP BY job_id)
             ORDER BY j.name",
        )?;

        let runs = stmt
            .query_map([], |row| {
                Ok(RunListItem {
                    run: Self::row_to_run(row)?,
                    job_name: row.get(10)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(runs)
    }

    /// Most recent runs across all jobs
    pub fn recent_runs(&self, limit: i64) -> Result<Vec<RunListItem>> {
        self.list_runs(&RunFilter {
            limit: Some(limit),
            ..Default::default()
        })
    }

    /// The run that completed most recently, regardless of outcome
    pub fn last_completed_run(&self) -> Result<Option<RunListItem>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT r.id, r.job_id, r.status, r.phase, r.started_at, r.completed_at,
                    r.file_size_bytes, r.s3_key, r.local_path, r.error_message, j.name
             FROM backup_runs r
             JOIN jobs j ON j.id = r.job_id
             WHERE r.completed_at IS NOT NULL
             ORDER BY r.completed_at DESC, r.id DESC
             LIMIT 1",
        )?;

        let item = stmt
            .query_row([], |row| {
                Ok(RunListItem {
                    run: Self::row_to_run(row)?,
                    job_name: row.get(10)?,
                })
            })
            .optional()?;

        Ok(item)
    }

    /// Completion time of the newest successful run
    pub fn last_successful_backup(&self) -> Result<Option<DateTime<Utc>>> {
        let conn = self.conn()?;
        let completed: Option<String> = conn.query_row(
            "SELECT MAX(completed_at) FROM backup_runs WHERE status = 'success'",
            [],
            |row| row.get(0),
        )?;
        Ok(completed.map(|s| parse_datetime(&s)))
    }

    /// Fail any runs left active by a previous process
    ///
    /// Called once at startup, before the scheduler starts. Returns the
    /// number of runs that were marked.
    pub fn mark_interrupted_runs_failed(&self) -> Result<usize> {
        let conn = self.conn()?;
        let rows = conn.execute(
            "UPDATE backup_runs
             SET status = 'failed', completed_at = CURRENT_TIMESTAMP,
                 error_message = 'Interrupted by server restart'
             WHERE status IN ('running', 'cancelling')",
            [],
        )?;
        Ok(rows)
    }

    /// Helper to convert a row to Run
    /// Column order: id, job_id, status, phase, started_at, completed_at,
    ///               file_size_bytes, s3_key, local_path, error_message
    pub(crate) fn row_to_run(row: &rusqlite::Row) -> rusqlite::Result<Run> {
        let status_str: String = row.get(2)?;
        let phase_str: String = row.get(3)?;
        let started_at_str: String = row.get(4)?;
        let completed_at_str: Option<String> = row.get(5)?;

        Ok(Run {
            id: row.get(0)?,
            job_id: row.get(1)?,
            status: status_str.parse().map_err(|e| invalid_column(2, e))?,
            phase: phase_str.parse().map_err(|e| invalid_column(3, e))?,
            started_at: parse_datetime(&started_at_str),
            completed_at: completed_at_str.map(|s| parse_datetime(&s)),
            file_size_bytes: row.get(6)?,
            s3_key: row.get(7)?,
            local_path: row.get(8)?,
            error_message: row.get(9)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CompressionFormat, JobConfig, JobSource, LocalSourceConfig};

    fn make_job(db: &Database, name: &str) -> i64 {
        db.create_job(&JobConfig {
            name: name.to_string(),
            description: None,
            enabled: true,
            source: JobSource::Local(LocalSourceConfig {
                paths: vec!["/tmp/data".to_string()],
            }),
            compression: CompressionFormat::TarGz,
            schedule_cron: "0 3 * * *".to_string(),
            retention_s3_days: 30,
            retention_local_days: 0,
            store_local: false,
        })
        .unwrap()
    }

    #[test]
    fn test_run_lifecycle() {
        let db = Database::in_memory().unwrap();
        let job_id = make_job(&db, "lifecycle");

        let run = db.create_run(job_id).unwrap();
        assert_eq!(run.status, RunStatus::Running);
        assert_eq!(run.phase, RunPhase::Pending);
        assert!(run.completed_at.is_none());

        db.set_run_phase(run.id, RunPhase::Acquiring).unwrap();
        db.append_run_log(run.id, "line one\n").unwrap();
        db.append_run_log(run.id, "line two\n").unwrap();
        assert_eq!(
            db.get_run_logs(run.id).unwrap().unwrap(),
            "line one\nline two\n"
        );

        let finished = db
            .finish_run(
                run.id,
                RunStatus::Success,
                Some(2048),
                Some("job/2026/01/backup.tar.gz"),
                None,
                None,
            )
            .unwrap();
        assert!(finished);

        let run = db.get_run(run.id).unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Success);
        assert_eq!(run.file_size_bytes, Some(2048));
        assert!(run.completed_at.is_some());

        // Terminal rows are immutable
        assert!(!db
            .finish_run(run.id, RunStatus::Failed, None, None, None, Some("nope"))
            .unwrap());
    }

    #[test]
    fn test_request_cancel_is_cas() {
        let db = Database::in_memory().unwrap();
        let job_id = make_job(&db, "cancel");
        let run = db.create_run(job_id).unwrap();

        assert!(db.request_cancel(run.id).unwrap());
        assert_eq!(
            db.run_status(run.id).unwrap().unwrap(),
            RunStatus::Cancelling
        );

        // Second request finds no 'running' row
        assert!(!db.request_cancel(run.id).unwrap());

        // The executor still finishes a cancelling run
        assert!(db
            .finish_run(run.id, RunStatus::Cancelled, None, None, None, None)
            .unwrap());
        assert!(!db.request_cancel(run.id).unwrap());
    }

    #[test]
    fn test_active_run_tracking() {
        let db = Database::in_memory().unwrap();
        let job_id = make_job(&db, "active");

        assert!(!db.has_active_run(job_id).unwrap());
        assert!(db.active_run_for_job(job_id).unwrap().is_none());

        let run = db.create_run(job_id).unwrap();
        assert!(db.has_active_run(job_id).unwrap());
        assert_eq!(db.active_run_for_job(job_id).unwrap().unwrap().id, run.id);

        db.finish_run(run.id, RunStatus::Failed, None, None, None, Some("boom"))
            .unwrap();
        assert!(!db.has_active_run(job_id).unwrap());
    }

    #[test]
    fn test_list_runs_filters() {
        let db = Database::in_memory().unwrap();
        let a = make_job(&db, "job-a");
        let b = make_job(&db, "job-b");

        let r1 = db.create_run(a).unwrap();
        db.finish_run(r1.id, RunStatus::Success, Some(10), None, None, None)
            .unwrap();
        let r2 = db.create_run(a).unwrap();
        db.finish_run(r2.id, RunStatus::Failed, None, None, None, Some("err"))
            .unwrap();
        let _r3 = db.create_run(b).unwrap();

        let all = db.list_runs(&RunFilter::default()).unwrap();
        assert_eq!(all.len(), 3);

        let for_a = db
            .list_runs(&RunFilter {
                job_id: Some(a),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(for_a.len(), 2);
        assert!(for_a.iter().all(|r| r.job_name == "job-a"));

        let failed = db
            .list_runs(&RunFilter {
                status: Some(RunStatus::Failed),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].run.id, r2.id);

        let one = db
            .list_runs(&RunFilter {
                limit: Some(1),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(one.len(), 1);

        // Counting matches the unpaged result set
        assert_eq!(db.count_runs(&RunFilter::default()).unwrap(), 3);
        assert_eq!(
            db.count_runs(&RunFilter {
                job_id: Some(a),
                limit: Some(1),
                ..Default::default()
            })
            .unwrap(),
            2
        );
        assert_eq!(
            db.count_runs(&RunFilter {
                status: Some(RunStatus::Failed),
                ..Default::default()
            })
            .unwrap(),
            1
        );
    }

    #[test]
    fn test_history_summary() {
        let db = Database::in_memory().unwrap();
        let job_id = make_job(&db, "summary");

        let r1 = db.create_run(job_id).unwrap();
        db.finish_run(r1.id, RunStatus::Success, None, None, None, None)
            .unwrap();
        let r2 = db.create_run(job_id).unwrap();
        db.finish_run(r2.id, RunStatus::Success, None, None, None, None)
            .unwrap();
        let r3 = db.create_run(job_id).unwrap();
        db.finish_run(r3.id, RunStatus::Failed, None, None, None, Some("x"))
            .unwrap();
        let _active = db.create_run(job_id).unwrap();

        let summary = db.history_summary().unwrap();
        assert_eq!(summary.total, 4);
        assert_eq!(summary.success, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.cancelled, 0);
        assert_eq!(summary.active, 1);
        assert!((summary.success_rate - 66.7).abs() < 0.01);
    }

    #[test]
    fn test_last_completed_run() {
        let db = Database::in_memory().unwrap();
        let job_a = make_job(&db, "job-a");
        let job_b = make_job(&db, "job-b");

        assert!(db.last_completed_run().unwrap().is_none());

        let r1 = db.create_run(job_a).unwrap();
        db.finish_run(r1.id, RunStatus::Success, Some(1024), None, None, None)
            .unwrap();
        let r2 = db.create_run(job_b).unwrap();
        db.finish_run(r2.id, RunStatus::Failed, None, None, None, Some("x"))
            .unwrap();

        // Active runs never win
        let _active = db.create_run(job_a).unwrap();

        let last = db.last_completed_run().unwrap().unwrap();
        assert_eq!(last.run.id, r2.id);
        assert_eq!(last.job_name, "job-b");
        assert_eq!(last.run.status, RunStatus::Failed);
    }

    #[test]
    fn test_delete_history_before() {
        let db = Database::in_memory().unwrap();
        let job_id = make_job(&db, "cleanup");

        let run = db.create_run(job_id).unwrap();
        db.finish_run(run.id, RunStatus::Success, None, None, None, None)
            .unwrap();

        // Fresh rows are untouched
        assert_eq!(db.delete_history_before(30).unwrap(), 0);

        // Age the row past the cutoff
        let conn = db.conn().unwrap();
        conn.execute(
            "UPDATE backup_runs SET completed_at = datetime('now', '-60 days') WHERE id = ?",
            params![run.id],
        )
        .unwrap();
        drop(conn);

        assert_eq!(db.delete_history_before(30).unwrap(), 1);
        assert!(db.get_run(run.id).unwrap().is_none());
    }

    #[test]
    fn test_mark_interrupted_runs_failed() {
        let db = Database::in_memory().unwrap();
        let job_id = make_job(&db, "restart");

        let stuck = db.create_run(job_id).unwrap();
        let done = db.create_run(job_id).unwrap();
        db.finish_run(done.id, RunStatus::Success, None, None, None, None)
            .unwrap();

        assert_eq!(db.mark_interrupted_runs_failed().unwrap(), 1);

        let stuck = db.get_run(stuck.id).unwrap().unwrap();
        assert_eq!(stuck.status, RunStatus::Failed);
        assert_eq!(
            stuck.error_message.as_deref(),
            Some("Interrupted by server restart")
        );

        let done = db.get_run(done.id).unwrap().unwrap();
        assert_eq!(done.status, RunStatus::Success);
    }

    #[test]
    fn test_job_delete_cascades_to_runs() {
        let db = Database::in_memory().unwrap();
        let job_id = make_job(&db, "cascade");
        let run = db.create_run(job_id).unwrap();

        db.delete_job(job_id).unwrap();
        assert!(db.get_run(run.id).unwrap().is_none());
    }
}
