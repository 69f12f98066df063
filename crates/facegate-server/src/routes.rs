use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::Json;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::error;

use facegate_core::{ServiceError, ServiceResult};

use crate::error::{self, ApiError};
use crate::state::AppState;

pub const SERVICE_NAME: &str = "facegate";

#[derive(Debug, Deserialize)]
pub struct EnrollRequest {
    pub user_id: Option<String>,
    pub image: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DetectRequest {
    pub image: Option<String>,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub timestamp: String,
    pub cache_connected: bool,
}

#[derive(Serialize)]
pub struct EnrollResponse {
    pub success: bool,
    pub message: String,
    pub user_id: String,
}

#[derive(Serialize)]
pub struct VerifyResponse {
    pub success: bool,
    pub verified: bool,
    pub confidence: f64,
    pub distance: f64,
    pub threshold: f64,
}

#[derive(Serialize)]
pub struct DeleteResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Serialize)]
pub struct DetectResponse {
    pub success: bool,
    pub face_detected: bool,
    pub face_count: usize,
    /// Wire order is `[top, right, bottom, left]`.
    pub face_locations: Vec<[i64; 4]>,
}

/// Liveness probe. Never errors; the cache flag reflects a live ping.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let service = state.service.clone();
    let cache_connected = tokio::task::spawn_blocking(move || service.cache_connected())
        .await
        .unwrap_or(false);

    Json(HealthResponse {
        status: "healthy",
        service: SERVICE_NAME,
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        cache_connected,
    })
}

pub async fn enroll(
    State(state): State<AppState>,
    payload: Result<Json<EnrollRequest>, JsonRejection>,
) -> Result<Json<EnrollResponse>, ApiError> {
    let (user_id, image) = require_user_and_image(payload)?;

    let service = state.service.clone();
    let outcome = run_blocking(move || service.enroll(&user_id, &image)).await?;
    let enrolled = outcome.map_err(|err| match err {
        // Enrollment gets the more instructive message.
        ServiceError::NoFaceDetected => ApiError::bad_request(error::NO_FACE_ENROLL),
        other => ApiError::from(other),
    })?;

    Ok(Json(EnrollResponse {
        success: true,
        message: "Face enrolled successfully".into(),
        user_id: enrolled.user_id,
    }))
}

pub async fn verify(
    State(state): State<AppState>,
    payload: Result<Json<EnrollRequest>, JsonRejection>,
) -> Result<Json<VerifyResponse>, ApiError> {
    let (user_id, image) = require_user_and_image(payload)?;

    let service = state.service.clone();
    let verification = run_blocking(move || service.verify(&user_id, &image)).await??;

    Ok(Json(VerifyResponse {
        success: true,
        verified: verification.matched,
        confidence: round4(verification.confidence),
        distance: round4(verification.distance),
        threshold: verification.tolerance,
    }))
}

pub async fn delete_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<DeleteResponse>, ApiError> {
    let service = state.service.clone();
    let outcome = run_blocking(move || service.delete(&user_id)).await?;
    outcome.map_err(|err| match err {
        ServiceError::UserNotEnrolled { .. } => ApiError::not_found(error::NO_FACE_DATA),
        other => ApiError::from(other),
    })?;

    Ok(Json(DeleteResponse {
        success: true,
        message: "Face data deleted successfully".into(),
    }))
}

pub async fn detect(
    State(state): State<AppState>,
    payload: Result<Json<DetectRequest>, JsonRejection>,
) -> Result<Json<DetectResponse>, ApiError> {
    let image = payload
        .ok()
        .and_then(|Json(request)| request.image)
        .ok_or_else(|| ApiError::bad_request(error::MISSING_IMAGE))?;

    let service = state.service.clone();
    let detection = run_blocking(move || service.detect(&image)).await??;

    Ok(Json(DetectResponse {
        success: true,
        face_detected: detection.face_count > 0,
        face_count: detection.face_count,
        face_locations: detection
            .boxes
            .iter()
            .map(|b| [b.top, b.right, b.bottom, b.left])
            .collect(),
    }))
}

pub async fn endpoint_not_found() -> ApiError {
    ApiError::not_found(error::ENDPOINT_NOT_FOUND)
}

fn require_user_and_image(
    payload: Result<Json<EnrollRequest>, JsonRejection>,
) -> Result<(String, String), ApiError> {
    let Json(request) =
        payload.map_err(|_| ApiError::bad_request(error::MISSING_USER_AND_IMAGE))?;
    match (request.user_id, request.image) {
        (Some(user_id), Some(image)) => Ok((user_id, image)),
        _ => Err(ApiError::bad_request(error::MISSING_USER_AND_IMAGE)),
    }
}

/// The core is synchronous (extraction is CPU-bound, store I/O blocks); run
/// it off the async workers.
async fn run_blocking<T, F>(task: F) -> Result<ServiceResult<T>, ApiError>
where
    F: FnOnce() -> ServiceResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task).await.map_err(|err| {
        error!(error = %err, "blocking task failed");
        ApiError::internal()
    })
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}
