//! Local filesystem archive mirror
//!
//! Keeps finished archives on disk alongside the S3 copy, under the
//! same `{job}/{YYYY}/{MM}/` layout the remote keys use.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::info;
use walkdir::WalkDir;

use super::sanitize_name;
use crate::error::{Error, Result};

/// Archive kept on the local filesystem
#[derive(Debug, Clone)]
pub struct LocalArchive {
    pub path: PathBuf,
    pub modified: DateTime<Utc>,
}

/// Local filesystem archive store
pub struct LocalArchiveStore {
    /// Directory all local archives live under
    root: PathBuf,
}

impl LocalArchiveStore {
    /// Create a store rooted at the given directory
    ///
    /// Creates the directory if it doesn't exist.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();

        if !root.exists() {
            fs::create_dir_all(&root).map_err(|e| {
                Error::Storage(format!(
                    "Failed to create archive directory {}: {}",
                    root.display(),
                    e
                ))
            })?;
            info!("Created archive directory: {}", root.display());
        }

        Ok(Self { root })
    }

    /// Get the archive root path
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Copy an archive into the store under the given relative key
    ///
    /// The key is the same `{job}/{YYYY}/{MM}/{file}` path used for the
    /// remote object, so the mirror stays browsable next to the bucket.
    pub fn store(&self, local_path: &Path, key: &str) -> Result<PathBuf> {
        let dest_path = self.root.join(key);

        if let Some(parent) = dest_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(local_path, &dest_path)?;

        info!("Stored local archive: {}", dest_path.display());
        Ok(dest_path)
    }

    /// List all archives kept for a job, newest first
    pub fn list(&self, job_name: &str) -> Result<Vec<LocalArchive>> {
        let job_dir = self.root.join(sanitize_name(job_name));
        let mut archives = Vec::new();

        if !job_dir.exists() {
            return Ok(archives);
        }

        for entry in WalkDir::new(&job_dir) {
            let entry = entry.map_err(|e| {
                Error::Storage(format!("walk of {} failed: {}", job_dir.display(), e))
            })?;
            if !entry.file_type().is_file() {
                continue;
            }

            let metadata = entry.metadata().map_err(|e| {
                Error::Storage(format!("stat of {} failed: {}", entry.path().display(), e))
            })?;
            let modified = metadata
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());

            archives.push(LocalArchive {
                path: entry.path().to_path_buf(),
                modified,
            });
        }

        archives.sort_by(|a, b| b.modified.cmp(&a.modified));

        Ok(archives)
    }

    /// Delete an archive and prune any directories it leaves empty
    pub fn delete(&self, path: &Path) -> Result<()> {
        if !path.starts_with(&self.root) {
            return Err(Error::Storage(format!(
                "Refusing to delete outside archive root: {}",
                path.display()
            )));
        }
        if !path.exists() {
            return Err(Error::Storage(format!(
                "Archive not found: {}",
                path.display()
            )));
        }

        fs::remove_file(path)?;
        info!("Deleted local archive: {}", path.display());

        // Walk parents up to the root, removing any left empty
        let mut dir = path.parent();
        while let Some(current) = dir {
            if current == self.root || !current.starts_with(&self.root) {
                break;
            }
            if fs::read_dir(current)?.next().is_some() {
                break;
            }
            fs::remove_dir(current)?;
            dir = current.parent();
        }

        Ok(())
    }
}
