//! Backup execution pipeline with pluggable object storage
//!
//! A run moves through staged phases: acquire source files into a scratch
//! workspace, archive them, upload the archive, optionally keep a local
//! copy, then clean up. The pieces:
//!
//! - `source` - Local and SSH/SFTP acquisition into the workspace
//! - `archive` - Archive creation for each supported format
//! - `s3` - The S3 `ObjectStore` implementation
//! - `local_store` - Local archive copies mirroring the remote key layout
//! - `executor` - The per-run state machine and its log writer
//! - `retention` - Age-based sweeps over both stores
//! - `progress` - Parses run logs back into progress for polling clients
//!
//! # Remote key layout
//!
//! `{job_name}/{YYYY}/{MM}/backup_{YYYYMMDD}_{HHMMSS}.{ext}` where the
//! job name is sanitized and ext matches the compression format.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::db::Database;
use crate::error::Result;

pub mod archive;
pub mod executor;
pub mod local_store;
pub mod progress;
pub mod retention;
pub mod s3;
pub mod source;

pub use executor::{clean_orphan_workspaces, RunExecutor, RunLogger};
pub use local_store::{LocalArchive, LocalArchiveStore};
pub use progress::{parse_run_log, RunProgress};
pub use retention::{RetentionEnforcer, SweepReport, SweepStats};
pub use s3::S3ObjectStore;

/// An archive sitting in a remote store
#[derive(Debug, Clone)]
pub struct RemoteObject {
    pub key: String,
    pub last_modified: DateTime<Utc>,
    pub size: i64,
}

/// Trait for archive storage backends
///
/// The S3 client implements this in production; tests substitute a
/// directory-backed store.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload a local file under the given key, returning the key
    async fn upload(&self, local_path: &Path, key: &str) -> Result<String>;

    /// Delete an object
    async fn delete(&self, key: &str) -> Result<()>;

    /// List objects under a key prefix
    async fn list(&self, prefix: &str) -> Result<Vec<RemoteObject>>;

    /// Verify the store is reachable without side effects
    async fn test_connection(&self) -> Result<()>;
}

/// Connect the configured S3 store, or None if S3 is not set up yet
pub async fn connect_object_store(db: &Database) -> Result<Option<Arc<dyn ObjectStore>>> {
    match db.get_s3_settings()? {
        Some(settings) => {
            let store = S3ObjectStore::connect(&settings).await;
            Ok(Some(Arc::new(store)))
        }
        None => Ok(None),
    }
}

/// Make a job name safe for use in object keys and directory names
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Timestamped base name for a run's archive, without extension
pub fn archive_basename(started_at: DateTime<Utc>) -> String {
    format!("backup_{}", started_at.format("%Y%m%d_%H%M%S"))
}

/// Remote key for an archive file
pub fn object_key(job_name: &str, started_at: DateTime<Utc>, file_name: &str) -> String {
    format!(
        "{}/{}/{}",
        sanitize_name(job_name),
        started_at.format("%Y/%m"),
        file_name
    )
}

/// Human-readable byte size for log lines
pub fn format_size(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;

    let b = bytes as f64;
    if b >= GB {
        format!("{:.1} GB", b / GB)
    } else if b >= MB {
        format!("{:.1} MB", b / MB)
    } else if b >= KB {
        format!("{:.1} KB", b / KB)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("nightly-db_1"), "nightly-db_1");
        assert_eq!(sanitize_name("My Job!"), "My_Job_");
        assert_eq!(sanitize_name("a/b\\c"), "a_b_c");
    }

    #[test]
    fn test_archive_basename() {
        let at = Utc.with_ymd_and_hms(2026, 1, 15, 14, 30, 22).unwrap();
        assert_eq!(archive_basename(at), "backup_20260115_143022");
    }

    #[test]
    fn test_object_key() {
        let at = Utc.with_ymd_and_hms(2026, 3, 5, 2, 0, 0).unwrap();
        assert_eq!(
            object_key("prod db", at, "backup_20260305_020000.tar.gz"),
            "prod_db/2026/03/backup_20260305_020000.tar.gz"
        );
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0 MB");
        assert_eq!(format_size(3 * 1024 * 1024 * 1024), "3.0 GB");
    }
}
