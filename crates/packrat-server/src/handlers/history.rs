//! Run history and individual run endpoints

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use packrat_core::db::{HistorySummary, RunFilter, RunListItem};
use packrat_core::{parse_run_log, RunPhase, RunStatus};

use crate::{AppError, AppState, MAX_PAGE_LIMIT};

/// History rows newer than this many days are protected from cleanup
const MIN_CLEANUP_DAYS: i64 = 30;

/// Bytes to megabytes, rounded to two decimals
pub(crate) fn file_size_mb(bytes: i64) -> f64 {
    (bytes as f64 / 1024.0 / 1024.0 * 100.0).round() / 100.0
}

/// One run in a history listing
#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub id: i64,
    pub job_id: i64,
    pub job_name: String,
    pub status: RunStatus,
    pub phase: RunPhase,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<i64>,
    pub file_size_bytes: Option<i64>,
    pub file_size_mb: Option<f64>,
    pub s3_key: Option<String>,
    pub local_path: Option<String>,
    pub error_message: Option<String>,
}

impl RunSummary {
    pub(crate) fn from_item(item: RunListItem) -> Self {
        let run = item.run;
        let duration_seconds = run.duration_seconds();
        let size_mb = run.file_size_bytes.map(file_size_mb);
        Self {
            id: run.id,
            job_id: run.job_id,
            job_name: item.job_name,
            status: run.status,
            phase: run.phase,
            started_at: run.started_at,
            completed_at: run.completed_at,
            duration_seconds,
            file_size_bytes: run.file_size_bytes,
            file_size_mb: size_mb,
            s3_key: run.s3_key,
            local_path: run.local_path,
            error_message: run.error_message,
        }
    }
}

/// Query parameters for the history listing
#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub job_id: Option<i64>,
    pub status: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Query parameters carrying just a page size
#[derive(Debug, Default, Deserialize)]
pub struct HistoryLimitQuery {
    pub limit: Option<i64>,
}

/// One page of run history
#[derive(Debug, Serialize)]
pub struct HistoryPage {
    pub records: Vec<RunSummary>,
    /// Total rows matching the filter, across all pages
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

/// GET /api/history - List runs across all jobs
pub async fn list_history(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryPage>, AppError> {
    let status = match query.status.as_deref() {
        Some(value) => Some(value.parse::<RunStatus>().map_err(|_| {
            AppError::bad_request(&format!("Invalid status filter: {}", value))
        })?),
        None => None,
    };

    let limit = query.limit.unwrap_or(50).clamp(1, MAX_PAGE_LIMIT);
    let offset = query.offset.unwrap_or(0).max(0);

    let filter = RunFilter {
        job_id: query.job_id,
        status,
        limit: Some(limit),
        offset: Some(offset),
    };

    let total = state.db.count_runs(&filter)?;
    let records = state
        .db
        .list_runs(&filter)?
        .into_iter()
        .map(RunSummary::from_item)
        .collect();

    Ok(Json(HistoryPage {
        records,
        total,
        limit,
        offset,
    }))
}

/// Aggregate statistics plus the most recent run
#[derive(Debug, Serialize)]
pub struct HistorySummaryResponse {
    #[serde(flatten)]
    pub summary: HistorySummary,
    pub most_recent: Option<MostRecentRun>,
}

#[derive(Debug, Serialize)]
pub struct MostRecentRun {
    pub job_name: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
}

/// GET /api/history/summary - Aggregate run statistics
pub async fn history_summary(
    State(state): State<Arc<AppState>>,
) -> Result<Json<HistorySummaryResponse>, AppError> {
    let summary = state.db.history_summary()?;
    let most_recent = state
        .db
        .recent_runs(1)?
        .into_iter()
        .next()
        .map(|item| MostRecentRun {
            job_name: item.job_name,
            status: item.run.status,
            started_at: item.run.started_at,
        });

    Ok(Json(HistorySummaryResponse {
        summary,
        most_recent,
    }))
}

/// Request body for history cleanup
#[derive(Debug, Deserialize)]
pub struct CleanupRequest {
    pub days: i64,
}

#[derive(Debug, Serialize)]
pub struct CleanupResponse {
    pub deleted_count: usize,
    pub message: String,
}

/// DELETE /api/history/cleanup - Purge old terminal run records
pub async fn cleanup_history(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CleanupRequest>,
) -> Result<Json<CleanupResponse>, AppError> {
    if req.days < MIN_CLEANUP_DAYS {
        return Err(AppError::bad_request(&format!(
            "Cannot delete records newer than {} days",
            MIN_CLEANUP_DAYS
        )));
    }

    let deleted_count = state.db.delete_history_before(req.days)?;
    Ok(Json(CleanupResponse {
        deleted_count,
        message: format!(
            "Deleted {} run record(s) older than {} days",
            deleted_count, req.days
        ),
    }))
}

/// Full run detail including the log text
#[derive(Debug, Serialize)]
pub struct RunDetail {
    #[serde(flatten)]
    pub summary: RunSummary,
    pub logs: Option<String>,
}

/// GET /api/runs/:id - Run detail with logs
pub async fn get_run(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<RunDetail>, AppError> {
    let run = state
        .db
        .get_run(id)?
        .ok_or_else(|| AppError::not_found(&format!("Run {} not found", id)))?;

    let job_name = state
        .db
        .get_job(run.job_id)?
        .map(|job| job.name)
        .unwrap_or_else(|| format!("job {}", run.job_id));

    let logs = state.db.get_run_logs(id)?;

    Ok(Json(RunDetail {
        summary: RunSummary::from_item(RunListItem { run, job_name }),
        logs,
    }))
}

/// Progress snapshot for a polling client
#[derive(Debug, Serialize)]
pub struct RunProgressResponse {
    pub run_id: i64,
    pub status: RunStatus,
    pub phase: RunPhase,
    pub percent: u8,
    pub recent_files: Vec<String>,
}

/// GET /api/runs/:id/progress - Poll progress for a run
///
/// Percent comes from phase markers in the run log, so it moves in
/// steps rather than continuously.
pub async fn run_progress(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<RunProgressResponse>, AppError> {
    let run = state
        .db
        .get_run(id)?
        .ok_or_else(|| AppError::not_found(&format!("Run {} not found", id)))?;

    let log = state.db.get_run_logs(id)?.unwrap_or_default();
    let progress = parse_run_log(&log);

    Ok(Json(RunProgressResponse {
        run_id: run.id,
        status: run.status,
        phase: run.phase,
        percent: progress.percent,
        recent_files: progress.recent_files,
    }))
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub run_id: i64,
    pub message: String,
}

/// POST /api/runs/:id/cancel - Request cooperative cancellation
///
/// The run keeps executing until it reaches its next checkpoint, so a
/// successful cancel leaves the run in `cancelling` for a while.
pub async fn cancel_run(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<(StatusCode, Json<CancelResponse>), AppError> {
    let run = state
        .db
        .get_run(id)?
        .ok_or_else(|| AppError::not_found(&format!("Run {} not found", id)))?;

    match run.status {
        RunStatus::Running => {}
        RunStatus::Cancelling => {
            return Err(AppError::conflict("Cancellation already requested"));
        }
        status => {
            return Err(AppError::conflict(&format!(
                "Cannot cancel a run with status: {}",
                status
            )));
        }
    }

    if !state.db.request_cancel(id)? {
        // Lost the race with the run finishing
        return Err(AppError::conflict("Run is no longer running"));
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(CancelResponse {
            run_id: id,
            message: "Cancellation requested. The backup will stop at the next safe checkpoint."
                .to_string(),
        }),
    ))
}
