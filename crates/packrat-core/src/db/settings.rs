//! Service settings: S3 credentials and the local archive root
//!
//! Stored as key/value rows so partial updates don't need schema changes.
//! S3 keys live under the `s3.` prefix.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use super::{parse_datetime, Database};
use crate::error::Result;
use crate::models::S3Settings;

const KEY_S3_ACCESS_KEY: &str = "s3.access_key";
const KEY_S3_SECRET_KEY: &str = "s3.secret_key";
const KEY_S3_BUCKET: &str = "s3.bucket";
const KEY_S3_REGION: &str = "s3.region";
const KEY_S3_ENDPOINT: &str = "s3.endpoint";
/// Directory that receives local archive copies
const KEY_LOCAL_ARCHIVE_ROOT: &str = "local.archive_root";

impl Database {
    /// Get a raw setting value
    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn()?;
        let value = conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    /// Set a raw setting value, inserting or replacing
    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO settings (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value,
                 updated_at = CURRENT_TIMESTAMP",
            params![key, value],
        )?;
        Ok(())
    }

    /// Remove a setting if present
    pub fn delete_setting(&self, key: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM settings WHERE key = ?", params![key])?;
        Ok(())
    }

    /// The configured S3 target, or None until all required fields are set
    pub fn get_s3_settings(&self) -> Result<Option<S3Settings>> {
        let access_key = self.get_setting(KEY_S3_ACCESS_KEY)?;
        let secret_key = self.get_setting(KEY_S3_SECRET_KEY)?;
        let bucket = self.get_setting(KEY_S3_BUCKET)?;
        let region = self.get_setting(KEY_S3_REGION)?;

        match (access_key, secret_key, bucket, region) {
            (Some(access_key), Some(secret_key), Some(bucket), Some(region)) => {
                Ok(Some(S3Settings {
                    access_key,
                    secret_key,
                    bucket,
                    region,
                    endpoint: self.get_setting(KEY_S3_ENDPOINT)?,
                }))
            }
            _ => Ok(None),
        }
    }

    /// Store the S3 target. An empty endpoint clears any stored one.
    pub fn set_s3_settings(&self, settings: &S3Settings) -> Result<()> {
        self.set_setting(KEY_S3_ACCESS_KEY, &settings.access_key)?;
        self.set_setting(KEY_S3_SECRET_KEY, &settings.secret_key)?;
        self.set_setting(KEY_S3_BUCKET, &settings.bucket)?;
        self.set_setting(KEY_S3_REGION, &settings.region)?;

        match &settings.endpoint {
            Some(endpoint) if !endpoint.trim().is_empty() => {
                self.set_setting(KEY_S3_ENDPOINT, endpoint)?;
            }
            _ => self.delete_setting(KEY_S3_ENDPOINT)?,
        }
        Ok(())
    }

    /// When any S3 setting last changed
    pub fn s3_settings_updated_at(&self) -> Result<Option<DateTime<Utc>>> {
        let conn = self.conn()?;
        let updated: Option<String> = conn.query_row(
            "SELECT MAX(updated_at) FROM settings WHERE key LIKE 's3.%'",
            [],
            |row| row.get(0),
        )?;
        Ok(updated.map(|s| parse_datetime(&s)))
    }

    /// Directory for local archive copies, if one has been set
    pub fn get_local_archive_root(&self) -> Result<Option<String>> {
        self.get_setting(KEY_LOCAL_ARCHIVE_ROOT)
    }

    pub fn set_local_archive_root(&self, path: &str) -> Result<()> {
        self.set_setting(KEY_LOCAL_ARCHIVE_ROOT, path)
    }
}
