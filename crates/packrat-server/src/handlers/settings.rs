//! S3 settings endpoints
//!
//! Credentials never leave the server. GET responses carry hints that
//! are recognizable to whoever set them without being recoverable.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use packrat_core::{ObjectStore, S3ObjectStore, S3Settings};

use crate::{AppError, AppState};

/// S3 configuration with credentials reduced to hints
#[derive(Debug, Serialize)]
pub struct S3SettingsResponse {
    pub configured: bool,
    pub bucket: Option<String>,
    pub region: Option<String>,
    pub endpoint: Option<String>,
    pub access_key_hint: Option<String>,
    pub secret_key_hint: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// First and last three characters of the access key, middle masked
fn access_key_hint(access_key: &str) -> String {
    let chars: Vec<char> = access_key.chars().collect();
    if chars.len() > 6 {
        let head: String = chars[..3].iter().collect();
        let tail: String = chars[chars.len() - 3..].iter().collect();
        format!("{}***{}", head, tail)
    } else {
        "***".to_string()
    }
}

/// A run of asterisks bounded in length, never the key itself
fn secret_key_hint(secret_key: &str) -> String {
    format!("***{}", "*".repeat(secret_key.chars().count().min(20)))
}

/// GET /api/settings/s3 - Current S3 configuration, redacted
pub async fn get_s3_settings(
    State(state): State<Arc<AppState>>,
) -> Result<Json<S3SettingsResponse>, AppError> {
    let settings = match state.db.get_s3_settings()? {
        Some(settings) => settings,
        None => {
            return Ok(Json(S3SettingsResponse {
                configured: false,
                bucket: None,
                region: None,
                endpoint: None,
                access_key_hint: None,
                secret_key_hint: None,
                updated_at: None,
            }));
        }
    };

    let updated_at = state.db.s3_settings_updated_at()?;

    Ok(Json(S3SettingsResponse {
        configured: true,
        access_key_hint: Some(access_key_hint(&settings.access_key)),
        secret_key_hint: Some(secret_key_hint(&settings.secret_key)),
        bucket: Some(settings.bucket),
        region: Some(settings.region),
        endpoint: settings.endpoint,
        updated_at,
    }))
}

/// Request body for updating S3 settings
#[derive(Debug, Deserialize)]
pub struct UpdateS3SettingsRequest {
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub bucket: Option<String>,
    pub region: Option<String>,
    pub endpoint: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

fn require(value: Option<String>, name: &str) -> Result<String, AppError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(AppError::bad_request(&format!("{} is required", name))),
    }
}

/// PUT /api/settings/s3 - Store S3 credentials and target bucket
pub async fn update_s3_settings(
    State(state): State<Arc<AppState>>,
    Json(req): Json<UpdateS3SettingsRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    let settings = S3Settings {
        access_key: require(req.access_key, "access_key")?,
        secret_key: require(req.secret_key, "secret_key")?,
        bucket: require(req.bucket, "bucket")?,
        region: require(req.region, "region")?,
        endpoint: req.endpoint.filter(|e| !e.trim().is_empty()),
    };

    state.db.set_s3_settings(&settings)?;

    Ok(Json(MessageResponse {
        message: "S3 settings updated successfully".to_string(),
    }))
}

/// Request body for a connection test. A fully specified body is tested
/// as-is; anything less falls back to the stored settings.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct TestConnectionRequest {
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub bucket: Option<String>,
    pub region: Option<String>,
    pub endpoint: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TestConnectionResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// POST /api/settings/s3/test - Probe the bucket with a HeadBucket call
pub async fn test_s3_connection(
    State(state): State<Arc<AppState>>,
    body: Option<Json<TestConnectionRequest>>,
) -> Result<(StatusCode, Json<TestConnectionResponse>), AppError> {
    let req = body.map(|Json(req)| req).unwrap_or_default();

    let settings = match (req.access_key, req.secret_key, req.bucket, req.region) {
        (Some(access_key), Some(secret_key), Some(bucket), Some(region)) => S3Settings {
            access_key,
            secret_key,
            bucket,
            region,
            endpoint: req.endpoint,
        },
        _ => state
            .db
            .get_s3_settings()?
            .ok_or_else(|| AppError::bad_request("S3 settings not configured"))?,
    };

    let bucket = settings.bucket.clone();
    let store = S3ObjectStore::connect(&settings).await;

    match store.test_connection().await {
        Ok(()) => Ok((
            StatusCode::OK,
            Json(TestConnectionResponse {
                success: true,
                message: Some(format!("Successfully connected to S3 bucket: {}", bucket)),
                error: None,
            }),
        )),
        Err(e) => Ok((
            StatusCode::BAD_REQUEST,
            Json(TestConnectionResponse {
                success: false,
                message: None,
                error: Some(e.to_string()),
            }),
        )),
    }
}
