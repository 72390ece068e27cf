//! Run execution
//!
//! `RunExecutor` drives one backup run through its phases inside a
//! scratch workspace, checking for a cancel request before every phase.
//! Blocking work (file copies, archiving) runs on the blocking pool;
//! uploads stay async. Whatever happens, the workspace directory is
//! removed on the way out and the run row gets a terminal status.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tracing::{info, warn};

use super::{
    archive, archive_basename, connect_object_store, format_size, object_key, source,
    LocalArchiveStore, ObjectStore,
};
use crate::db::Database;
use crate::error::{Error, Result};
use crate::models::{Job, Run, RunPhase, RunStatus};
use crate::paths;

/// Buffered log lines before a database write
const LOG_FLUSH_LINES: usize = 5;

/// Writes a run's log stream into its database row
///
/// Lines are stamped and buffered; the buffer flushes every few lines
/// so a chatty transfer doesn't become one UPDATE per file. Cloning is
/// cheap and clones share the buffer.
#[derive(Clone)]
pub struct RunLogger {
    inner: Arc<Mutex<LoggerInner>>,
}

struct LoggerInner {
    db: Database,
    run_id: i64,
    pending: Vec<String>,
}

impl RunLogger {
    pub fn new(db: Database, run_id: i64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(LoggerInner {
                db,
                run_id,
                pending: Vec::new(),
            })),
        }
    }

    /// Append a timestamped line to the run log
    pub fn log(&self, line: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.pending.push(stamp(line));
        if inner.pending.len() >= LOG_FLUSH_LINES {
            if let Err(e) = inner.flush() {
                warn!("Failed to flush run log: {}", e);
            }
        }
    }

    /// Record a phase transition, emitting its progress marker
    pub fn phase(&self, phase: RunPhase) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.db.set_run_phase(inner.run_id, phase)?;
        if let Some(marker) = phase.marker() {
            let line = format!("[PHASE:{}]", marker);
            inner.pending.push(stamp(&line));
        }
        inner.flush()
    }

    /// Push any buffered lines to the database
    pub fn flush(&self) -> Result<()> {
        self.inner.lock().unwrap().flush()
    }
}

impl LoggerInner {
    fn flush(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let chunk = self.pending.concat();
        self.db.append_run_log(self.run_id, &chunk)?;
        self.pending.clear();
        Ok(())
    }
}

fn stamp(line: &str) -> String {
    format!("[{}] {}\n", Utc::now().format("%Y-%m-%d %H:%M:%S UTC"), line)
}

/// Artifacts recorded as the pipeline progresses
///
/// Kept even when a later phase fails, so a run that uploaded and then
/// died still points at its S3 object.
#[derive(Default)]
struct RunArtifacts {
    file_size_bytes: Option<i64>,
    s3_key: Option<String>,
    local_path: Option<String>,
}

/// Executes backup runs
#[derive(Clone)]
pub struct RunExecutor {
    db: Database,
    staging_root: PathBuf,
    store_override: Option<Arc<dyn ObjectStore>>,
}

impl RunExecutor {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            staging_root: paths::staging_dir(),
            store_override: None,
        }
    }

    /// Use a specific staging directory instead of the default
    pub fn with_staging_root(db: Database, staging_root: impl Into<PathBuf>) -> Self {
        Self {
            db,
            staging_root: staging_root.into(),
            store_override: None,
        }
    }

    /// Use a fixed object store instead of the configured S3 target
    pub fn with_store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.store_override = Some(store);
        self
    }

    pub fn staging_root(&self) -> &Path {
        &self.staging_root
    }

    /// Drive the run to a terminal status and record the outcome
    ///
    /// Pipeline errors land in the run row as a failure; the returned
    /// `Err` is reserved for the bookkeeping itself going wrong.
    pub async fn execute(&self, run_id: i64) -> Result<RunStatus> {
        let run = self
            .db
            .get_run(run_id)?
            .ok_or_else(|| Error::NotFound(format!("run {}", run_id)))?;
        let job = self
            .db
            .get_job(run.job_id)?
            .ok_or_else(|| Error::NotFound(format!("job {}", run.job_id)))?;

        let logger = RunLogger::new(self.db.clone(), run_id);
        logger.log(&format!("Starting backup job: {}", job.name));

        let mut artifacts = RunArtifacts::default();
        let outcome = self
            .run_pipeline(&run, &job, &logger, &mut artifacts)
            .await;

        let (status, error_message) = match outcome {
            Ok(true) => (RunStatus::Success, None),
            Ok(false) => (RunStatus::Cancelled, None),
            Err(e) => {
                let message = e.to_string();
                logger.log(&format!("ERROR: {}", message));
                (RunStatus::Failed, Some(message))
            }
        };

        if let Err(e) = logger.flush() {
            warn!("Failed to flush run log: {}", e);
        }

        let finished = self.db.finish_run(
            run_id,
            status,
            artifacts.file_size_bytes,
            artifacts.s3_key.as_deref(),
            artifacts.local_path.as_deref(),
            error_message.as_deref(),
        )?;
        if !finished {
            warn!("Run {} was already in a terminal state", run_id);
        }

        info!("Run {} finished: {}", run_id, status);
        Ok(status)
    }

    async fn run_pipeline(
        &self,
        run: &Run,
        job: &Job,
        logger: &RunLogger,
        artifacts: &mut RunArtifacts,
    ) -> Result<bool> {
        let store = match &self.store_override {
            Some(store) => Some(store.clone()),
            None => connect_object_store(&self.db).await?,
        };
        let store = store.ok_or_else(|| {
            Error::InvalidConfiguration("S3 storage is not configured".to_string())
        })?;

        fs::create_dir_all(&self.staging_root)?;
        let workspace = tempfile::Builder::new()
            .prefix(&format!("run_{}_", run.id))
            .tempdir_in(&self.staging_root)?;
        let staged_dir = workspace.path().join("staged");
        fs::create_dir(&staged_dir)?;

        // Acquire
        if self.cancelled(run.id, logger)? {
            return Ok(false);
        }
        logger.phase(RunPhase::Acquiring)?;
        let files = {
            let job_source = job.source.clone();
            let staged = staged_dir.clone();
            let task_logger = logger.clone();
            spawn_pipeline_task(move || source::acquire(&job_source, &staged, &task_logger))
                .await?
        };
        logger.log(&format!("Acquired {} file(s) from source", files.len()));

        // Compress
        if self.cancelled(run.id, logger)? {
            return Ok(false);
        }
        logger.phase(RunPhase::Compressing)?;
        let started_at = Utc::now();
        let base_name = archive_basename(started_at);
        let (archive_path, archive_size) = {
            let staged = staged_dir.clone();
            let format = job.compression;
            let out_dir = workspace.path().to_path_buf();
            let base = base_name.clone();
            let task_logger = logger.clone();
            spawn_pipeline_task(move || {
                archive::create_archive(&staged, format, &out_dir, &base, &task_logger)
            })
            .await?
        };
        artifacts.file_size_bytes = Some(archive_size as i64);

        let archive_name = archive_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or(base_name);
        logger.log(&format!(
            "Archive created: {} ({})",
            archive_name,
            format_size(archive_size)
        ));

        // Upload
        if self.cancelled(run.id, logger)? {
            return Ok(false);
        }
        logger.phase(RunPhase::Uploading)?;
        let key = object_key(&job.name, started_at, &archive_name);
        let s3_key = store.upload(&archive_path, &key).await?;
        logger.log(&format!("Uploaded to S3: {}", s3_key));
        artifacts.s3_key = Some(s3_key);

        // Optional local copy
        if job.store_local {
            if self.cancelled(run.id, logger)? {
                return Ok(false);
            }
            logger.phase(RunPhase::StoringLocal)?;
            let root = self
                .db
                .get_local_archive_root()?
                .map(PathBuf::from)
                .unwrap_or_else(paths::default_archive_root);
            let local_path = {
                let archive_path = archive_path.clone();
                let key = key.clone();
                spawn_pipeline_task(move || {
                    let local = LocalArchiveStore::new(root)?;
                    local.store(&archive_path, &key)
                })
                .await?
            };
            logger.log(&format!("Stored local copy: {}", local_path.display()));
            artifacts.local_path = Some(local_path.to_string_lossy().to_string());
        }

        // Finalize
        if self.cancelled(run.id, logger)? {
            return Ok(false);
        }
        logger.phase(RunPhase::Finalizing)?;
        if let Err(e) = workspace.close() {
            warn!("Failed to remove run workspace: {}", e);
        }

        logger.phase(RunPhase::Done)?;
        logger.log("Backup completed successfully");
        Ok(true)
    }

    /// Cancel checkpoint. True when a cancel request came in.
    fn cancelled(&self, run_id: i64, logger: &RunLogger) -> Result<bool> {
        if self.db.run_status(run_id)? == Some(RunStatus::Cancelling) {
            logger.log("Cancellation requested, stopping run");
            return Ok(true);
        }
        Ok(false)
    }
}

async fn spawn_pipeline_task<T, F>(task: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| Error::Other(format!("backup task panicked: {}", e)))?
}

/// Remove `run_*` workspaces left behind by runs that died with the
/// process. Returns how many were removed.
pub fn clean_orphan_workspaces(staging_root: &Path) -> std::io::Result<usize> {
    if !staging_root.exists() {
        return Ok(0);
    }

    let mut removed = 0;
    for entry in fs::read_dir(staging_root)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name();
        if !name.to_string_lossy().starts_with("run_") {
            continue;
        }
        fs::remove_dir_all(entry.path())?;
        removed += 1;
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{test_db, test_job_config, DirObjectStore};
    use tempfile::TempDir;

    #[test]
    fn test_logger_stamps_and_buffers() {
        let db = test_db();
        let config = test_job_config("logger-buffer", vec!["/tmp/data".to_string()]);
        let job_id = db.create_job(&config).unwrap();
        let run = db.create_run(job_id).unwrap();

        let logger = RunLogger::new(db.clone(), run.id);
        logger.log("first line");
        logger.log("second line");

        // Below the flush threshold nothing is written yet
        assert_eq!(db.get_run_logs(run.id).unwrap().unwrap(), "");

        logger.flush().unwrap();
        let logs = db.get_run_logs(run.id).unwrap().unwrap();
        assert!(logs.contains("UTC] first line\n"));
        assert!(logs.contains("UTC] second line\n"));
        assert!(logs.starts_with('['));
    }

    #[test]
    fn test_logger_auto_flushes() {
        let db = test_db();
        let config = test_job_config("logger-auto", vec!["/tmp/data".to_string()]);
        let job_id = db.create_job(&config).unwrap();
        let run = db.create_run(job_id).unwrap();

        let logger = RunLogger::new(db.clone(), run.id);
        for i in 0..LOG_FLUSH_LINES {
            logger.log(&format!("line {}", i));
        }

        let logs = db.get_run_logs(run.id).unwrap().unwrap();
        assert_eq!(logs.lines().count(), LOG_FLUSH_LINES);
    }

    #[test]
    fn test_phase_sets_row_and_marker() {
        let db = test_db();
        let config = test_job_config("logger-phase", vec!["/tmp/data".to_string()]);
        let job_id = db.create_job(&config).unwrap();
        let run = db.create_run(job_id).unwrap();

        let logger = RunLogger::new(db.clone(), run.id);
        logger.phase(RunPhase::Acquiring).unwrap();

        let row = db.get_run(run.id).unwrap().unwrap();
        assert_eq!(row.phase, RunPhase::Acquiring);
        let logs = db.get_run_logs(run.id).unwrap().unwrap();
        assert!(logs.contains("[PHASE:ACQUIRING]"));

        // Local store phase has no marker but still moves the row
        logger.phase(RunPhase::StoringLocal).unwrap();
        let row = db.get_run(run.id).unwrap().unwrap();
        assert_eq!(row.phase, RunPhase::StoringLocal);
        let logs = db.get_run_logs(run.id).unwrap().unwrap();
        assert!(!logs.contains("[PHASE:STORING"));
    }

    #[tokio::test]
    async fn test_execute_cancel_before_first_phase() {
        let db = test_db();
        let config = test_job_config("exec-cancel", vec!["/tmp/data".to_string()]);
        let job_id = db.create_job(&config).unwrap();
        let run = db.create_run(job_id).unwrap();
        assert!(db.request_cancel(run.id).unwrap());

        let staging = TempDir::new().unwrap();
        let bucket = TempDir::new().unwrap();
        let store = Arc::new(DirObjectStore::new(bucket.path().join("bucket")));
        let executor = RunExecutor::with_staging_root(db.clone(), staging.path())
            .with_store(store.clone());

        let status = executor.execute(run.id).await.unwrap();
        assert_eq!(status, RunStatus::Cancelled);

        let row = db.get_run(run.id).unwrap().unwrap();
        assert_eq!(row.status, RunStatus::Cancelled);
        assert!(row.completed_at.is_some());
        assert!(row.s3_key.is_none());
        assert!(store.list("").await.unwrap().is_empty());

        let logs = db.get_run_logs(run.id).unwrap().unwrap();
        assert!(logs.contains("Cancellation requested, stopping run"));
    }

    #[tokio::test]
    async fn test_execute_fails_without_configured_store() {
        let db = test_db();
        let config = test_job_config("exec-no-store", vec!["/tmp/data".to_string()]);
        let job_id = db.create_job(&config).unwrap();
        let run = db.create_run(job_id).unwrap();

        let staging = TempDir::new().unwrap();
        let executor = RunExecutor::with_staging_root(db.clone(), staging.path());

        let status = executor.execute(run.id).await.unwrap();
        assert_eq!(status, RunStatus::Failed);

        let row = db.get_run(run.id).unwrap().unwrap();
        assert_eq!(row.status, RunStatus::Failed);
        let message = row.error_message.unwrap();
        assert!(message.contains("S3 storage is not configured"));
    }

    #[test]
    fn test_clean_orphan_workspaces() {
        let staging = TempDir::new().unwrap();
        fs::create_dir(staging.path().join("run_1_abcd")).unwrap();
        fs::create_dir(staging.path().join("run_7_wxyz")).unwrap();
        fs::create_dir(staging.path().join("unrelated")).unwrap();
        fs::write(staging.path().join("run_not_a_dir"), b"x").unwrap();

        let removed = clean_orphan_workspaces(staging.path()).unwrap();
        assert_eq!(removed, 2);
        assert!(staging.path().join("unrelated").exists());
        assert!(staging.path().join("run_not_a_dir").exists());
        assert!(!staging.path().join("run_1_abcd").exists());
    }

    #[test]
    fn test_clean_orphan_workspaces_missing_root() {
        let staging = TempDir::new().unwrap();
        let missing = staging.path().join("never_created");
        assert_eq!(clean_orphan_workspaces(&missing).unwrap(), 0);
    }
}
