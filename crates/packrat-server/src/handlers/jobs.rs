//! Backup job management endpoints

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use packrat_core::{CompressionFormat, Job, JobConfig, JobSource, RunStatus, SourceKind};

use crate::handlers::history::{HistoryLimitQuery, RunSummary};
use crate::{parse_cron, AppError, AppState, SuccessResponse};

/// Request body for creating a job
#[derive(Debug, Deserialize)]
pub struct CreateJobRequest {
    pub name: String,
    pub description: Option<String>,
    pub source_type: String,
    pub source_config: Value,
    pub compression: Option<String>,
    pub schedule_cron: String,
    pub retention_s3_days: Option<i64>,
    pub retention_local_days: Option<i64>,
    pub store_local: Option<bool>,
    pub enabled: Option<bool>,
}

/// Request body for updating a job. Absent fields keep their value.
#[derive(Debug, Deserialize)]
pub struct UpdateJobRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub source_type: Option<String>,
    pub source_config: Option<Value>,
    pub compression: Option<String>,
    pub schedule_cron: Option<String>,
    pub retention_s3_days: Option<i64>,
    pub retention_local_days: Option<i64>,
    pub store_local: Option<bool>,
    pub enabled: Option<bool>,
}

/// Job details with credentials redacted
#[derive(Debug, Serialize)]
pub struct JobResponse {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub enabled: bool,
    pub source_type: SourceKind,
    pub source_config: Value,
    pub compression: CompressionFormat,
    pub schedule_cron: String,
    pub retention_s3_days: i64,
    pub retention_local_days: i64,
    pub store_local: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobResponse {
    fn from_job(job: Job) -> Self {
        Self {
            id: job.id,
            name: job.name,
            description: job.description,
            enabled: job.enabled,
            source_type: job.source.kind(),
            source_config: redacted_source_config(&job.source),
            compression: job.compression,
            schedule_cron: job.schedule_cron,
            retention_s3_days: job.retention_s3_days,
            retention_local_days: job.retention_local_days,
            store_local: job.store_local,
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

/// Compact job row for the list view
#[derive(Debug, Serialize)]
pub struct JobSummary {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub enabled: bool,
    pub source_type: SourceKind,
    pub compression: CompressionFormat,
    pub schedule_cron: String,
    pub store_local: bool,
    pub last_run_status: Option<RunStatus>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct CreateJobResponse {
    pub id: i64,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ToggleJobResponse {
    pub enabled: bool,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct RunNowResponse {
    pub run_id: i64,
    pub message: String,
}

/// Kind-specific config with credentials replaced by presence flags
fn redacted_source_config(source: &JobSource) -> Value {
    match source {
        JobSource::Local(c) => serde_json::json!({ "paths": c.paths }),
        JobSource::Ssh(c) => serde_json::json!({
            "paths": c.paths,
            "host": c.host,
            "port": c.port,
            "username": c.username,
            "has_password": c.password.is_some(),
            "has_private_key": c.private_key.is_some(),
        }),
    }
}

fn parse_source(source_type: &str, source_config: &Value) -> Result<JobSource, AppError> {
    let kind: SourceKind = source_type
        .parse()
        .map_err(|e: String| AppError::bad_request(&e))?;
    let config_json = serde_json::to_string(source_config)
        .map_err(|_| AppError::bad_request("Invalid source configuration"))?;
    JobSource::from_parts(kind, &config_json)
        .map_err(|e| AppError::bad_request(&format!("Invalid source configuration: {}", e)))
}

fn parse_compression(value: &str) -> Result<CompressionFormat, AppError> {
    value.parse().map_err(|e: String| AppError::bad_request(&e))
}

/// Field validation plus a cron parse so bad schedules never reach the
/// scheduler.
fn validate_config(config: &JobConfig) -> Result<(), AppError> {
    config
        .validate()
        .map_err(|e| AppError::bad_request(&e.to_string()))?;
    parse_cron(&config.schedule_cron).map_err(|e| AppError::bad_request(&e))?;
    Ok(())
}

/// GET /api/jobs - List all jobs with their latest run
pub async fn list_jobs(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<JobSummary>>, AppError> {
    let jobs = state.db.list_jobs()?;

    let latest: HashMap<i64, (RunStatus, DateTime<Utc>)> = state
        .db
        .latest_run_per_job()?
        .into_iter()
        .map(|item| (item.run.job_id, (item.run.status, item.run.started_at)))
        .collect();

    let summaries = jobs
        .into_iter()
        .map(|job| {
            let last = latest.get(&job.id);
            JobSummary {
                id: job.id,
                name: job.name,
                description: job.description,
                enabled: job.enabled,
                source_type: job.source.kind(),
                compression: job.compression,
                schedule_cron: job.schedule_cron,
                store_local: job.store_local,
                last_run_status: last.map(|(status, _)| *status),
                last_run_at: last.map(|(_, at)| *at),
                created_at: job.created_at,
                updated_at: job.updated_at,
            }
        })
        .collect();

    Ok(Json(summaries))
}

/// POST /api/jobs - Create a backup job
pub async fn create_job(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateJobRequest>,
) -> Result<(StatusCode, Json<CreateJobResponse>), AppError> {
    let source = parse_source(&req.source_type, &req.source_config)?;
    let compression = match req.compression.as_deref() {
        Some(value) => parse_compression(value)?,
        None => CompressionFormat::TarGz,
    };

    let config = JobConfig {
        name: req.name,
        description: req.description,
        enabled: req.enabled.unwrap_or(true),
        source,
        compression,
        schedule_cron: req.schedule_cron,
        retention_s3_days: req.retention_s3_days.unwrap_or(30),
        retention_local_days: req.retention_local_days.unwrap_or(0),
        store_local: req.store_local.unwrap_or(false),
    };
    validate_config(&config)?;

    if state.db.get_job_by_name(&config.name)?.is_some() {
        return Err(AppError::bad_request("Job name already exists"));
    }

    let id = state.db.create_job(&config)?;
    state.scheduler.sync();

    Ok((
        StatusCode::CREATED,
        Json(CreateJobResponse {
            id,
            message: format!("Job '{}' created", config.name),
        }),
    ))
}

/// GET /api/jobs/:id - Get a single job
pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<JobResponse>, AppError> {
    let job = state
        .db
        .get_job(id)?
        .ok_or_else(|| AppError::not_found(&format!("Job {} not found", id)))?;

    Ok(Json(JobResponse::from_job(job)))
}

/// PUT /api/jobs/:id - Update a job
pub async fn update_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateJobRequest>,
) -> Result<Json<JobResponse>, AppError> {
    let existing = state
        .db
        .get_job(id)?
        .ok_or_else(|| AppError::not_found(&format!("Job {} not found", id)))?;

    let source = match (&req.source_type, &req.source_config) {
        (None, None) => existing.source.clone(),
        (source_type, source_config) => {
            // Either half of the pair may be reused from the stored job
            let kind = source_type
                .as_deref()
                .unwrap_or(existing.source.kind().as_str());
            let stored_config: Value = match source_config {
                Some(value) => value.clone(),
                None => serde_json::from_str(
                    &existing
                        .source
                        .to_config_json()
                        .map_err(|e| AppError::bad_request(&e.to_string()))?,
                )?,
            };
            parse_source(kind, &stored_config)?
        }
    };

    let compression = match req.compression.as_deref() {
        Some(value) => parse_compression(value)?,
        None => existing.compression,
    };

    let config = JobConfig {
        name: req.name.unwrap_or(existing.name),
        description: req.description.or(existing.description),
        enabled: req.enabled.unwrap_or(existing.enabled),
        source,
        compression,
        schedule_cron: req.schedule_cron.unwrap_or(existing.schedule_cron),
        retention_s3_days: req.retention_s3_days.unwrap_or(existing.retention_s3_days),
        retention_local_days: req
            .retention_local_days
            .unwrap_or(existing.retention_local_days),
        store_local: req.store_local.unwrap_or(existing.store_local),
    };
    validate_config(&config)?;

    if let Some(other) = state.db.get_job_by_name(&config.name)? {
        if other.id != id {
            return Err(AppError::bad_request("Job name already exists"));
        }
    }

    state.db.update_job(id, &config)?;
    state.scheduler.sync();

    let updated = state
        .db
        .get_job(id)?
        .ok_or_else(|| AppError::internal("Job not found after update"))?;

    Ok(Json(JobResponse::from_job(updated)))
}

/// DELETE /api/jobs/:id - Delete a job and its run history
pub async fn delete_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<SuccessResponse>, AppError> {
    let deleted = state.db.delete_job(id)?;
    if !deleted {
        return Err(AppError::not_found(&format!("Job {} not found", id)));
    }

    state.scheduler.sync();
    Ok(Json(SuccessResponse { success: true }))
}

/// POST /api/jobs/:id/toggle - Enable or disable a job
pub async fn toggle_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<ToggleJobResponse>, AppError> {
    let job = state
        .db
        .get_job(id)?
        .ok_or_else(|| AppError::not_found(&format!("Job {} not found", id)))?;

    let enabled = !job.enabled;
    state.db.set_job_enabled(id, enabled)?;
    state.scheduler.sync();

    let verb = if enabled { "enabled" } else { "disabled" };
    Ok(Json(ToggleJobResponse {
        enabled,
        message: format!("Job '{}' {}", job.name, verb),
    }))
}

/// POST /api/jobs/:id/run - Start a run immediately
///
/// Returns 202 with the new run id. A job with an active run gets 409;
/// schedules and manual triggers never stack runs for the same job.
pub async fn run_job_now(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<(StatusCode, Json<RunNowResponse>), AppError> {
    let job = state
        .db
        .get_job(id)?
        .ok_or_else(|| AppError::not_found(&format!("Job {} not found", id)))?;

    let run_id = state
        .scheduler
        .run_now(id)?
        .ok_or_else(|| AppError::conflict(&format!("A run is already active for job '{}'", job.name)))?;

    Ok((
        StatusCode::ACCEPTED,
        Json(RunNowResponse {
            run_id,
            message: format!("Backup started for job '{}'", job.name),
        }),
    ))
}

/// GET /api/jobs/:id/history - Recent runs for one job
pub async fn job_history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Query(query): Query<HistoryLimitQuery>,
) -> Result<Json<Vec<RunSummary>>, AppError> {
    if state.db.get_job(id)?.is_none() {
        return Err(AppError::not_found(&format!("Job {} not found", id)));
    }

    let filter = packrat_core::db::RunFilter {
        job_id: Some(id),
        limit: query.limit,
        ..Default::default()
    };
    let runs = state
        .db
        .list_runs(&filter)?
        .into_iter()
        .map(RunSummary::from_item)
        .collect();

    Ok(Json(runs))
}
