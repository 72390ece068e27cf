//! Dashboard and health endpoints

use std::sync::Arc;

use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;

use packrat_core::RunStatus;

use crate::handlers::history::{file_size_mb, RunSummary};
use crate::{AppError, AppState};

/// Runs shown in the dashboard activity feed
const RECENT_ACTIVITY_LIMIT: i64 = 10;

#[derive(Debug, Serialize)]
pub struct DashboardOverview {
    pub total_jobs: i64,
    pub active_jobs: i64,
    pub last_backup: Option<LastBackupInfo>,
    pub scheduler_status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct LastBackupInfo {
    pub job_name: String,
    pub status: RunStatus,
    pub completed_at: Option<DateTime<Utc>>,
    pub file_size_mb: Option<f64>,
}

/// GET /api/dashboard/overview - Headline stats
pub async fn dashboard_overview(
    State(state): State<Arc<AppState>>,
) -> Result<Json<DashboardOverview>, AppError> {
    let total_jobs = state.db.count_jobs()?;
    let active_jobs = state.db.count_enabled_jobs()?;

    let last_backup = state.db.last_completed_run()?.map(|item| LastBackupInfo {
        job_name: item.job_name,
        status: item.run.status,
        completed_at: item.run.completed_at,
        file_size_mb: item.run.file_size_bytes.map(file_size_mb),
    });

    let scheduler_status = if state.scheduler.is_running() {
        "running"
    } else {
        "stopped"
    };

    Ok(Json(DashboardOverview {
        total_jobs,
        active_jobs,
        last_backup,
        scheduler_status,
    }))
}

/// GET /api/dashboard/recent - Most recent runs across all jobs
pub async fn dashboard_recent(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<RunSummary>>, AppError> {
    let runs = state
        .db
        .recent_runs(RECENT_ACTIVITY_LIMIT)?
        .into_iter()
        .map(RunSummary::from_item)
        .collect();

    Ok(Json(runs))
}

/// GET /api/health - Liveness probe, outside the auth wall
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
