//! Domain models for Packrat

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Where a job's data comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Paths on the host running the service
    Local,
    /// Paths on a remote host, fetched over SFTP
    Ssh,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Ssh => "ssh",
        }
    }
}

impl std::str::FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "ssh" | "sftp" => Ok(Self::Ssh),
            _ => Err(format!("Unknown source type: {}", s)),
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Archive format produced by the compression phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompressionFormat {
    #[serde(rename = "zip")]
    Zip,
    #[serde(rename = "tar.gz")]
    TarGz,
    #[serde(rename = "tar.bz2")]
    TarBz2,
    #[serde(rename = "tar.xz")]
    TarXz,
    /// No archive: the staged file is shipped as-is
    #[serde(rename = "none")]
    None,
}

impl CompressionFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Zip => "zip",
            Self::TarGz => "tar.gz",
            Self::TarBz2 => "tar.bz2",
            Self::TarXz => "tar.xz",
            Self::None => "none",
        }
    }

    /// File extension for the produced archive. `None` for the `none`
    /// format, which keeps the staged file's own extension.
    pub fn extension(&self) -> Option<&'static str> {
        match self {
            Self::Zip => Some("zip"),
            Self::TarGz => Some("tar.gz"),
            Self::TarBz2 => Some("tar.bz2"),
            Self::TarXz => Some("tar.xz"),
            Self::None => None,
        }
    }
}

impl std::str::FromStr for CompressionFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "zip" => Ok(Self::Zip),
            "tar.gz" | "tgz" => Ok(Self::TarGz),
            "tar.bz2" | "tbz2" => Ok(Self::TarBz2),
            "tar.xz" | "txz" => Ok(Self::TarXz),
            "none" => Ok(Self::None),
            _ => Err(format!("Unknown compression format: {}", s)),
        }
    }
}

impl std::fmt::Display for CompressionFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle status of a backup run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Success,
    Failed,
    /// Cancel requested; the executor has not yet reached a checkpoint
    Cancelling,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Cancelling => "cancelling",
            Self::Cancelled => "cancelled",
        }
    }

    /// Terminal statuses never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Cancelled)
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running | Self::Cancelling)
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "running" => Ok(Self::Running),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            "cancelling" => Ok(Self::Cancelling),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Unknown run status: {}", s)),
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Pipeline phase a run is currently in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Pending,
    Acquiring,
    Compressing,
    Uploading,
    StoringLocal,
    Finalizing,
    Done,
}

impl RunPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Acquiring => "acquiring",
            Self::Compressing => "compressing",
            Self::Uploading => "uploading",
            Self::StoringLocal => "storing_local",
            Self::Finalizing => "finalizing",
            Self::Done => "done",
        }
    }

    /// Marker name written into the run log when the phase is entered.
    /// Phases without a marker do not move the parsed progress value.
    pub fn marker(&self) -> Option<&'static str> {
        match self {
            Self::Pending => None,
            Self::Acquiring => Some("ACQUIRING"),
            Self::Compressing => Some("COMPRESSING"),
            Self::Uploading => Some("UPLOADING"),
            Self::StoringLocal => None,
            Self::Finalizing => Some("FINALIZING"),
            Self::Done => Some("COMPLETE"),
        }
    }
}

impl std::str::FromStr for RunPhase {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "acquiring" => Ok(Self::Acquiring),
            "compressing" => Ok(Self::Compressing),
            "uploading" => Ok(Self::Uploading),
            "storing_local" => Ok(Self::StoringLocal),
            "finalizing" => Ok(Self::Finalizing),
            "done" => Ok(Self::Done),
            _ => Err(format!("Unknown run phase: {}", s)),
        }
    }
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Source config for local-path jobs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalSourceConfig {
    pub paths: Vec<String>,
}

/// Source config for SSH/SFTP jobs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshSourceConfig {
    pub paths: Vec<String>,
    pub host: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// PEM-encoded private key material
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
}

fn default_ssh_port() -> u16 {
    22
}

/// A job's data source: the kind plus its kind-specific config
#[derive(Debug, Clone, PartialEq)]
pub enum JobSource {
    Local(LocalSourceConfig),
    Ssh(SshSourceConfig),
}

impl JobSource {
    pub fn kind(&self) -> SourceKind {
        match self {
            Self::Local(_) => SourceKind::Local,
            Self::Ssh(_) => SourceKind::Ssh,
        }
    }

    pub fn paths(&self) -> &[String] {
        match self {
            Self::Local(c) => &c.paths,
            Self::Ssh(c) => &c.paths,
        }
    }

    /// Serialize the kind-specific config for the `source_config` column.
    pub fn to_config_json(&self) -> Result<String> {
        let json = match self {
            Self::Local(c) => serde_json::to_string(c)?,
            Self::Ssh(c) => serde_json::to_string(c)?,
        };
        Ok(json)
    }

    /// Rebuild a source from the stored `source_type` + `source_config` pair.
    pub fn from_parts(kind: SourceKind, config_json: &str) -> Result<Self> {
        match kind {
            SourceKind::Local => Ok(Self::Local(serde_json::from_str(config_json)?)),
            SourceKind::Ssh => Ok(Self::Ssh(serde_json::from_str(config_json)?)),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.paths().is_empty() {
            return Err(Error::InvalidConfiguration(
                "at least one source path is required".to_string(),
            ));
        }
        for path in self.paths() {
            if !path.starts_with('/') {
                return Err(Error::InvalidConfiguration(format!(
                    "source path must be absolute: {}",
                    path
                )));
            }
        }
        if let Self::Ssh(c) = self {
            if c.host.trim().is_empty() {
                return Err(Error::InvalidConfiguration(
                    "SSH host is required".to_string(),
                ));
            }
            if c.username.trim().is_empty() {
                return Err(Error::InvalidConfiguration(
                    "SSH username is required".to_string(),
                ));
            }
            if c.port == 0 {
                return Err(Error::InvalidConfiguration(
                    "SSH port must be between 1 and 65535".to_string(),
                ));
            }
            match (&c.password, &c.private_key) {
                (Some(_), Some(_)) => {
                    return Err(Error::InvalidConfiguration(
                        "provide either an SSH password or a private key, not both".to_string(),
                    ));
                }
                (None, None) => {
                    return Err(Error::InvalidConfiguration(
                        "SSH requires a password or a private key".to_string(),
                    ));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// A configured backup job
#[derive(Debug, Clone)]
pub struct Job {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub enabled: bool,
    pub source: JobSource,
    pub compression: CompressionFormat,
    /// Crontab expression (5-field, UTC)
    pub schedule_cron: String,
    /// Days to keep uploaded archives in the bucket (minimum 1)
    pub retention_s3_days: i64,
    /// Days to keep local archive copies; 0 keeps them forever
    pub retention_local_days: i64,
    /// Also keep a copy of the archive under the local archive root
    pub store_local: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The mutable subset of a job, used for create and update
#[derive(Debug, Clone)]
pub struct JobConfig {
    pub name: String,
    pub description: Option<String>,
    pub enabled: bool,
    pub source: JobSource,
    pub compression: CompressionFormat,
    pub schedule_cron: String,
    pub retention_s3_days: i64,
    pub retention_local_days: i64,
    pub store_local: bool,
}

impl JobConfig {
    /// Field-level validation. Cron syntax is checked where the
    /// scheduler can parse it, not here.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidConfiguration(
                "job name is required".to_string(),
            ));
        }
        if self.schedule_cron.trim().is_empty() {
            return Err(Error::InvalidConfiguration(
                "cron schedule is required".to_string(),
            ));
        }
        if self.retention_s3_days < 1 {
            return Err(Error::InvalidConfiguration(
                "retention_s3_days must be at least 1".to_string(),
            ));
        }
        if self.retention_local_days < 0 {
            return Err(Error::InvalidConfiguration(
                "retention_local_days cannot be negative".to_string(),
            ));
        }
        self.source.validate()
    }
}

/// A single execution of a job
#[derive(Debug, Clone, Serialize)]
pub struct Run {
    pub id: i64,
    pub job_id: i64,
    pub status: RunStatus,
    pub phase: RunPhase,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Size of the produced archive in bytes
    pub file_size_bytes: Option<i64>,
    /// Object key the archive was uploaded under
    pub s3_key: Option<String>,
    /// Path of the local archive copy, when store_local is set
    pub local_path: Option<String>,
    pub error_message: Option<String>,
}

impl Run {
    pub fn duration_seconds(&self) -> Option<i64> {
        self.completed_at.map(|c| (c - self.started_at).num_seconds())
    }
}

/// S3 credentials and target bucket, stored in settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Settings {
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
    pub region: String,
    /// Custom endpoint for S3-compatible stores (MinIO etc.)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compression_format_as_str() {
        assert_eq!(CompressionFormat::Zip.as_str(), "zip");
        assert_eq!(CompressionFormat::TarGz.as_str(), "tar.gz");
        assert_eq!(CompressionFormat::TarBz2.as_str(), "tar.bz2");
        assert_eq!(CompressionFormat::TarXz.as_str(), "tar.xz");
        assert_eq!(CompressionFormat::None.as_str(), "none");
    }

    #[test]
    fn test_compression_format_from_str() {
        assert_eq!(
            "tar.gz".parse::<CompressionFormat>().unwrap(),
            CompressionFormat::TarGz
        );
        assert_eq!(
            "TGZ".parse::<CompressionFormat>().unwrap(),
            CompressionFormat::TarGz
        );
        assert_eq!(
            "none".parse::<CompressionFormat>().unwrap(),
            CompressionFormat::None
        );
        assert!("rar".parse::<CompressionFormat>().is_err());
    }

    #[test]
    fn test_compression_format_serde() {
        let json = serde_json::to_string(&CompressionFormat::TarBz2).unwrap();
        assert_eq!(json, r#""tar.bz2""#);

        let parsed: CompressionFormat = serde_json::from_str(r#""tar.xz""#).unwrap();
        assert_eq!(parsed, CompressionFormat::TarXz);
    }

    #[test]
    fn test_compression_format_extension() {
        assert_eq!(CompressionFormat::Zip.extension(), Some("zip"));
        assert_eq!(CompressionFormat::TarGz.extension(), Some("tar.gz"));
        assert_eq!(CompressionFormat::None.extension(), None);
    }

    #[test]
    fn test_run_status_transitions() {
        assert!(RunStatus::Running.is_active());
        assert!(RunStatus::Cancelling.is_active());
        assert!(!RunStatus::Success.is_active());

        assert!(RunStatus::Success.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(RunStatus::Cancelled.is_terminal());
        assert!(!RunStatus::Cancelling.is_terminal());
    }

    #[test]
    fn test_run_status_from_str() {
        assert_eq!("running".parse::<RunStatus>().unwrap(), RunStatus::Running);
        assert_eq!(
            "CANCELLING".parse::<RunStatus>().unwrap(),
            RunStatus::Cancelling
        );
        assert!("paused".parse::<RunStatus>().is_err());
    }

    #[test]
    fn test_run_phase_markers() {
        assert_eq!(RunPhase::Acquiring.marker(), Some("ACQUIRING"));
        assert_eq!(RunPhase::Compressing.marker(), Some("COMPRESSING"));
        assert_eq!(RunPhase::Uploading.marker(), Some("UPLOADING"));
        assert_eq!(RunPhase::Finalizing.marker(), Some("FINALIZING"));
        assert_eq!(RunPhase::Done.marker(), Some("COMPLETE"));
        assert_eq!(RunPhase::Pending.marker(), None);
        assert_eq!(RunPhase::StoringLocal.marker(), None);
    }

    #[test]
    fn test_run_phase_round_trip() {
        for phase in [
            RunPhase::Pending,
            RunPhase::Acquiring,
            RunPhase::Compressing,
            RunPhase::Uploading,
            RunPhase::StoringLocal,
            RunPhase::Finalizing,
            RunPhase::Done,
        ] {
            assert_eq!(phase.as_str().parse::<RunPhase>().unwrap(), phase);
        }
    }

    #[test]
    fn test_source_config_json_round_trip() {
        let source = JobSource::Ssh(SshSourceConfig {
            paths: vec!["/var/lib/data".to_string()],
            host: "db1.example.com".to_string(),
            port: 2222,
            username: "backup".to_string(),
            password: Some("hunter2".to_string()),
            private_key: None,
        });

        let json = source.to_config_json().unwrap();
        let rebuilt = JobSource::from_parts(SourceKind::Ssh, &json).unwrap();
        assert_eq!(rebuilt, source);
    }

    #[test]
    fn test_ssh_port_defaults() {
        let config: SshSourceConfig = serde_json::from_str(
            r#"{"paths": ["/etc"], "host": "h", "username": "u", "password": "p"}"#,
        )
        .unwrap();
        assert_eq!(config.port, 22);
    }

    #[test]
    fn test_source_validation() {
        let ok = JobSource::Local(LocalSourceConfig {
            paths: vec!["/etc/nginx".to_string()],
        });
        assert!(ok.validate().is_ok());

        let empty = JobSource::Local(LocalSourceConfig { paths: vec![] });
        assert!(empty.validate().is_err());

        let relative = JobSource::Local(LocalSourceConfig {
            paths: vec!["etc/nginx".to_string()],
        });
        assert!(relative.validate().is_err());
    }

    #[test]
    fn test_ssh_validation_requires_exactly_one_credential() {
        let mut config = SshSourceConfig {
            paths: vec!["/data".to_string()],
            host: "h".to_string(),
            port: 22,
            username: "u".to_string(),
            password: None,
            private_key: None,
        };
        assert!(JobSource::Ssh(config.clone()).validate().is_err());

        config.password = Some("p".to_string());
        assert!(JobSource::Ssh(config.clone()).validate().is_ok());

        config.private_key = Some("key".to_string());
        assert!(JobSource::Ssh(config.clone()).validate().is_err());

        config.password = None;
        assert!(JobSource::Ssh(config).validate().is_ok());
    }

    #[test]
    fn test_job_config_validation() {
        let mut config = JobConfig {
            name: "nightly".to_string(),
            description: None,
            enabled: true,
            source: JobSource::Local(LocalSourceConfig {
                paths: vec!["/srv/app".to_string()],
            }),
            compression: CompressionFormat::TarGz,
            schedule_cron: "0 3 * * *".to_string(),
            retention_s3_days: 30,
            retention_local_days: 0,
            store_local: false,
        };
        assert!(config.validate().is_ok());

        config.retention_s3_days = 0;
        assert!(config.validate().is_err());

        config.retention_s3_days = 30;
        config.name = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_run_duration() {
        let started = Utc::now();
        let run = Run {
            id: 1,
            job_id: 1,
            status: RunStatus::Success,
            phase: RunPhase::Done,
            started_at: started,
            completed_at: Some(started + chrono::Duration::seconds(90)),
            file_size_bytes: Some(1024),
            s3_key: None,
            local_path: None,
            error_message: None,
        };
        assert_eq!(run.duration_seconds(), Some(90));

        let open = Run {
            completed_at: None,
            ..run
        };
        assert_eq!(open.duration_seconds(), None);
    }
}
