//! Backup job operations

use rusqlite::{params, OptionalExtension};

use super::{invalid_column, parse_datetime, Database};
use crate::error::Result;
use crate::models::{Job, JobConfig, JobSource, SourceKind};

impl Database {
    /// Create a new job, returning its id
    ///
    /// The caller validates the config first; the unique name constraint
    /// is enforced here by the schema.
    pub fn create_job(&self, config: &JobConfig) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO jobs (name, description, enabled, source_type, source_config,
                               compression_format, schedule_cron, retention_s3_days,
                               retention_local_days, store_local)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                config.name,
                config.description,
                config.enabled,
                config.source.kind().as_str(),
                config.source.to_config_json()?,
                config.compression.as_str(),
                config.schedule_cron,
                config.retention_s3_days,
                config.retention_local_days,
                config.store_local,
            ],
        )?;

        Ok(conn.last_insert_rowid())
    }

    /// Replace a job's config. Returns false if the job doesn't exist.
    pub fn update_job(&self, id: i64, config: &JobConfig) -> Result<bool> {
        let conn = self.conn()?;
        let rows = conn.execute(
            "UPDATE jobs SET name = ?, description = ?, enabled = ?, source_type = ?,
                    source_config = ?, compression_format = ?, schedule_cron = ?,
                    retention_s3_days = ?, retention_local_days = ?, store_local = ?,
                    updated_at = CURRENT_TIMESTAMP
             WHERE id = ?",
            params![
                config.name,
                config.description,
                config.enabled,
                config.source.kind().as_str(),
                config.source.to_config_json()?,
                config.compression.as_str(),
                config.schedule_cron,
                config.retention_s3_days,
                config.retention_local_days,
                config.store_local,
                id,
            ],
        )?;

        Ok(rows > 0)
    }

    /// Delete a job and (via cascade) its run history
    pub fn delete_job(&self, id: i64) -> Result<bool> {
        let conn = self.conn()?;
        let rows = conn.execute("DELETE FROM jobs WHERE id = ?", params![id])?;
        Ok(rows > 0)
    }

    /// Get a job by ID
    pub fn get_job(&self, id: i64) -> Result<Option<Job>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, description, enabled, source_type, source_config,
                    compression_format, schedule_cron, retention_s3_days,
                    retention_local_days, store_local, created_at, updated_at
             FROM jobs WHERE id = ?",
        )?;

        let job = stmt
            .query_row(params![id], |row| Self::row_to_job(row))
            .optional()?;

        Ok(job)
    }

    /// Get a job by its unique name
    pub fn get_job_by_name(&self, name: &str) -> Result<Option<Job>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, description, enabled, source_type, source_config,
                    compression_format, schedule_cron, retention_s3_days,
                    retention_local_days, store_local, created_at, updated_at
             FROM jobs WHERE name = ?",
        )?;

        let job = stmt
            .query_row(params![name], |row| Self::row_to_job(row))
            .optional()?;

        Ok(job)
    }

    /// List all jobs, enabled or not
    pub fn list_jobs(&self) -> Result<Vec<Job>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, description, enabled, source_type, source_config,
                    compression_format, schedule_cron, retention_s3_days,
                    retention_local_days, store_local, created_at, updated_at
             FROM jobs ORDER BY name",
        )?;

        let jobs = stmt
            .query_map([], |row| Self::row_to_job(row))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(jobs)
    }

    /// List jobs the scheduler should consider
    pub fn list_enabled_jobs(&self) -> Result<Vec<Job>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, description, enabled, source_type, source_config,
                    compression_format, schedule_cron, retention_s3_days,
                    retention_local_days, store_local, created_at, updated_at
             FROM jobs WHERE enabled = 1 ORDER BY name",
        )?;

        let jobs = stmt
            .query_map([], |row| Self::row_to_job(row))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(jobs)
    }

    /// Flip a job's enabled flag. Returns false if the job doesn't exist.
    pub fn set_job_enabled(&self, id: i64, enabled: bool) -> Result<bool> {
        let conn = self.conn()?;
        let rows = conn.execute(
            "UPDATE jobs SET enabled = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
            params![enabled, id],
        )?;
        Ok(rows > 0)
    }

    /// Count all jobs
    pub fn count_jobs(&self) -> Result<i64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM jobs", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Count enabled jobs
    pub fn count_enabled_jobs(&self) -> Result<i64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM jobs WHERE enabled = 1",
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Helper to convert a row to Job
    /// Column order: id, name, description, enabled, source_type, source_config,
    ///               compression_format, schedule_cron, retention_s3_days,
    ///               retention_local_days, store_local, created_at, updated_at
    pub(crate) fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<Job> {
        let enabled_int: i64 = row.get(3)?;
        let source_type_str: String = row.get(4)?;
        let source_config: String = row.get(5)?;
        let compression_str: String = row.get(6)?;
        let store_local_int: i64 = row.get(10)?;
        let created_at_str: String = row.get(11)?;
        let updated_at_str: String = row.get(12)?;

        let kind = source_type_str
            .parse::<SourceKind>()
            .map_err(|e| invalid_column(4, e))?;
        let source =
            JobSource::from_parts(kind, &source_config).map_err(|e| invalid_column(5, e.to_string()))?;

        Ok(Job {
            id: row.get(0)?,
            name: row.get(1)?,
            description: row.get(2)?,
            enabled: enabled_int != 0,
            source,
            compression: compression_str.parse().map_err(|e| invalid_column(6, e))?,
            schedule_cron: row.get(7)?,
            retention_s3_days: row.get(8)?,
            retention_local_days: row.get(9)?,
            store_local: store_local_int != 0,
            created_at: parse_datetime(&created_at_str),
            updated_at: parse_datetime(&updated_at_str),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CompressionFormat, LocalSourceConfig};

    fn sample_config(name: &str) -> JobConfig {
        JobConfig {
            name: name.to_string(),
            description: Some("nightly app data".to_string()),
            enabled: true,
            source: JobSource::Local(LocalSourceConfig {
                paths: vec!["/srv/app/data".to_string()],
            }),
            compression: CompressionFormat::TarGz,
            schedule_cron: "0 3 * * *".to_string(),
            retention_s3_days: 30,
            retention_local_days: 7,
            store_local: true,
        }
    }

    #[test]
    fn test_create_and_get_job() {
        let db = Database::in_memory().unwrap();
        let id = db.create_job(&sample_config("nightly")).unwrap();

        let job = db.get_job(id).unwrap().unwrap();
        assert_eq!(job.name, "nightly");
        assert_eq!(job.compression, CompressionFormat::TarGz);
        assert_eq!(job.source.paths(), ["/srv/app/data"]);
        assert!(job.enabled);
        assert!(job.store_local);
        assert_eq!(job.retention_s3_days, 30);

        assert!(db.get_job(id + 100).unwrap().is_none());
    }

    #[test]
    fn test_job_name_is_unique() {
        let db = Database::in_memory().unwrap();
        db.create_job(&sample_config("dup")).unwrap();
        assert!(db.create_job(&sample_config("dup")).is_err());
    }

    #[test]
    fn test_get_job_by_name() {
        let db = Database::in_memory().unwrap();
        let id = db.create_job(&sample_config("by-name")).unwrap();

        let job = db.get_job_by_name("by-name").unwrap().unwrap();
        assert_eq!(job.id, id);
        assert!(db.get_job_by_name("missing").unwrap().is_none());
    }

    #[test]
    fn test_update_job() {
        let db = Database::in_memory().unwrap();
        let id = db.create_job(&sample_config("update-me")).unwrap();

        let mut config = sample_config("update-me");
        config.compression = CompressionFormat::Zip;
        config.retention_s3_days = 14;
        assert!(db.update_job(id, &config).unwrap());

        let job = db.get_job(id).unwrap().unwrap();
        assert_eq!(job.compression, CompressionFormat::Zip);
        assert_eq!(job.retention_s3_days, 14);

        assert!(!db.update_job(id + 100, &config).unwrap());
    }

    #[test]
    fn test_delete_job() {
        let db = Database::in_memory().unwrap();
        let id = db.create_job(&sample_config("doomed")).unwrap();

        assert!(db.delete_job(id).unwrap());
        assert!(db.get_job(id).unwrap().is_none());
        assert!(!db.delete_job(id).unwrap());
    }

    #[test]
    fn test_list_enabled_jobs() {
        let db = Database::in_memory().unwrap();
        let a = db.create_job(&sample_config("alpha")).unwrap();
        let b = db.create_job(&sample_config("beta")).unwrap();

        assert_eq!(db.list_jobs().unwrap().len(), 2);
        assert_eq!(db.count_jobs().unwrap(), 2);

        db.set_job_enabled(b, false).unwrap();
        let enabled = db.list_enabled_jobs().unwrap();
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].id, a);
        assert_eq!(db.count_enabled_jobs().unwrap(), 1);
    }
}
