//! Packrat Core Library
//!
//! Shared functionality for the packrat backup service:
//! - Database access and migrations (jobs, runs, settings)
//! - Source acquisition from local paths and remote hosts over SFTP
//! - Archive creation in zip, tar.gz, tar.bz2, tar.xz and raw formats
//! - S3-compatible object storage with multipart upload
//! - Run execution with phase tracking and cooperative cancellation
//! - Retention sweeps over remote and local archive stores
//! - Run-log progress parsing for polling clients

pub mod backup;
pub mod db;
pub mod error;
pub mod models;
pub mod paths;

/// Test utilities including a directory-backed object store
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use backup::{
    clean_orphan_workspaces, connect_object_store, parse_run_log, LocalArchiveStore, ObjectStore,
    RemoteObject, RetentionEnforcer, RunExecutor, RunLogger, RunProgress, S3ObjectStore,
    SweepReport, SweepStats,
};
pub use db::Database;
pub use error::{Error, Result};
pub use models::{
    CompressionFormat, Job, JobConfig, JobSource, Run, RunPhase, RunStatus, S3Settings, SourceKind,
};
