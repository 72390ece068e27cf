//! Test utilities for packrat-core
//!
//! Fixtures shared by module and integration tests: an in-memory database
//! seeded with a job and an open run, plus a directory-backed `ObjectStore`
//! so pipeline tests never need network access.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use walkdir::WalkDir;

use crate::backup::executor::RunLogger;
use crate::backup::{ObjectStore, RemoteObject};
use crate::db::Database;
use crate::error::{Error, Result};
use crate::models::{CompressionFormat, JobConfig, JobSource, LocalSourceConfig, Run};

/// In-memory database with the schema applied
pub fn test_db() -> Database {
    Database::in_memory().unwrap()
}

/// A minimal valid local-source job config
pub fn test_job_config(name: &str, paths: Vec<String>) -> JobConfig {
    JobConfig {
        name: name.to_string(),
        description: None,
        enabled: true,
        source: JobSource::Local(LocalSourceConfig { paths }),
        compression: CompressionFormat::TarGz,
        schedule_cron: "0 3 * * *".to_string(),
        retention_s3_days: 30,
        retention_local_days: 0,
        store_local: false,
    }
}

/// Create a job and an open run, returning a logger bound to the run
pub fn test_logger(db: &Database, job_name: &str) -> (RunLogger, Run) {
    let job_id = db
        .create_job(&test_job_config(job_name, vec!["/tmp".to_string()]))
        .unwrap();
    let run = db.create_run(job_id).unwrap();
    (RunLogger::new(db.clone(), run.id), run)
}

/// Object store backed by a local directory
///
/// Keys map directly to paths under the root, so tests can inspect
/// uploaded archives with plain filesystem calls.
pub struct DirObjectStore {
    root: PathBuf,
}

impl DirObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        fs::create_dir_all(&root).unwrap();
        Self { root }
    }

    /// Where a key lands on disk
    pub fn object_path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

#[async_trait]
impl ObjectStore for DirObjectStore {
    async fn upload(&self, local_path: &Path, key: &str) -> Result<String> {
        let dest = self.object_path(key);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(local_path, &dest)?;
        Ok(key.to_string())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.object_path(key);
        if !path.exists() {
            return Err(Error::Storage(format!("no such object: {}", key)));
        }
        fs::remove_file(path)?;
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<RemoteObject>> {
        let mut objects = Vec::new();
        for entry in WalkDir::new(&self.root) {
            let entry = entry.map_err(|e| Error::Storage(e.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let key = entry
                .path()
                .strip_prefix(&self.root)
                .map_err(|e| Error::Storage(e.to_string()))?
                .to_string_lossy()
                .replace('\\', "/");
            if !key.starts_with(prefix) {
                continue;
            }

            let metadata = entry.metadata().map_err(|e| Error::Storage(e.to_string()))?;
            let modified = metadata
                .modified()
                .ok()
                .and_then(|m| m.duration_since(UNIX_EPOCH).ok())
                .and_then(|d| DateTime::<Utc>::from_timestamp(d.as_secs() as i64, 0))
                .unwrap_or_else(Utc::now);

            objects.push(RemoteObject {
                key,
                last_modified: modified,
                size: metadata.len() as i64,
            });
        }
        objects.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(objects)
    }

    async fn test_connection(&self) -> Result<()> {
        if self.root.is_dir() {
            Ok(())
        } else {
            Err(Error::Connection(format!(
                "store root missing: {}",
                self.root.display()
            )))
        }
    }
}
