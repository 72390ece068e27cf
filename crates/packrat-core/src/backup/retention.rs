//! Retention sweeps
//!
//! Walks every enabled job and deletes archives older than the job's
//! retention window, remote and local independently. One bad object
//! never stops the sweep; failures are counted and logged.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{info, warn};

use super::{connect_object_store, sanitize_name, LocalArchiveStore, ObjectStore};
use crate::db::Database;
use crate::error::Result;
use crate::models::Job;
use crate::paths;

/// Counters for one sweep target
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SweepStats {
    pub deleted: usize,
    pub failed: usize,
}

/// Outcome of a full retention sweep
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SweepReport {
    pub s3: SweepStats,
    pub local: SweepStats,
}

/// Applies per-job retention windows to stored archives
pub struct RetentionEnforcer {
    db: Database,
    store_override: Option<Arc<dyn ObjectStore>>,
}

impl RetentionEnforcer {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            store_override: None,
        }
    }

    /// Use a fixed object store instead of the configured S3 target
    pub fn with_store(db: Database, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            db,
            store_override: Some(store),
        }
    }

    /// Sweep all enabled jobs, deleting archives older than each job's
    /// retention window relative to `now`
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let store = match &self.store_override {
            Some(store) => Some(store.clone()),
            None => connect_object_store(&self.db).await?,
        };

        let local_root = self
            .db
            .get_local_archive_root()?
            .map(PathBuf::from)
            .unwrap_or_else(paths::default_archive_root);

        let mut report = SweepReport::default();

        for job in self.db.list_enabled_jobs()? {
            if let Some(store) = &store {
                if job.retention_s3_days >= 1 {
                    let cutoff = now - Duration::days(job.retention_s3_days);
                    self.sweep_s3(store.as_ref(), &job, cutoff, &mut report.s3)
                        .await;
                }
            }

            if job.store_local && job.retention_local_days >= 1 {
                let cutoff = now - Duration::days(job.retention_local_days);
                self.sweep_local(&local_root, &job, cutoff, &mut report.local);
            }
        }

        info!(
            "Retention sweep finished: {} remote and {} local archives deleted ({} failures)",
            report.s3.deleted,
            report.local.deleted,
            report.s3.failed + report.local.failed
        );

        Ok(report)
    }

    async fn sweep_s3(
        &self,
        store: &dyn ObjectStore,
        job: &Job,
        cutoff: DateTime<Utc>,
        stats: &mut SweepStats,
    ) {
        let prefix = format!("{}/", sanitize_name(&job.name));

        let objects = match store.list(&prefix).await {
            Ok(objects) => objects,
            Err(e) => {
                warn!("Failed to list archives for job {}: {}", job.name, e);
                stats.failed += 1;
                return;
            }
        };

        for object in objects {
            if object.last_modified >= cutoff {
                continue;
            }
            if let Err(e) = store.delete(&object.key).await {
                warn!("Failed to delete {}: {}", object.key, e);
                stats.failed += 1;
                continue;
            }
            info!("Deleted expired archive: {}", object.key);
            stats.deleted += 1;
        }
    }

    fn sweep_local(
        &self,
        root: &std::path::Path,
        job: &Job,
        cutoff: DateTime<Utc>,
        stats: &mut SweepStats,
    ) {
        let store = match LocalArchiveStore::new(root) {
            Ok(store) => store,
            Err(e) => {
                warn!("Cannot open archive root {}: {}", root.display(), e);
                stats.failed += 1;
                return;
            }
        };

        let archives = match store.list(&job.name) {
            Ok(archives) => archives,
            Err(e) => {
                warn!("Failed to list local archives for job {}: {}", job.name, e);
                stats.failed += 1;
                return;
            }
        };

        for archive in archives {
            if archive.modified >= cutoff {
                continue;
            }
            if let Err(e) = store.delete(&archive.path) {
                warn!("Failed to delete {}: {}", archive.path.display(), e);
                stats.failed += 1;
                continue;
            }
            stats.deleted += 1;
        }
    }
}
