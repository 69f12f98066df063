use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::error;

use facegate_core::ServiceError;

pub const MISSING_USER_AND_IMAGE: &str = "Missing required fields: user_id and image";
pub const MISSING_IMAGE: &str = "Missing required field: image";
pub const INTERNAL_ERROR: &str = "Internal server error";
pub const NOT_ENROLLED: &str = "No face enrolled for this user";
pub const NO_FACE_DATA: &str = "No face data found for this user";
pub const ENDPOINT_NOT_FOUND: &str = "Endpoint not found";
pub const NO_FACE: &str = "No face detected in the image";
pub const NO_FACE_ENROLL: &str =
    "No face detected in the image. Please ensure your face is clearly visible.";

/// API-level error: a status code plus the wire message. Every error body
/// has the shape `{"success": false, "error": "..."}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    pub fn internal() -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: INTERNAL_ERROR.into(),
        }
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::InvalidImage(message) => {
                Self::bad_request(format!("Invalid image data: {message}"))
            }
            ServiceError::NoFaceDetected => Self::bad_request(NO_FACE),
            err @ ServiceError::InvalidUserId { .. } => Self::bad_request(err.to_string()),
            ServiceError::UserNotEnrolled { .. } => Self::not_found(NOT_ENROLLED),
            other => {
                error!(error = %other, "internal service error");
                Self::internal()
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorBody {
                success: false,
                error: self.message,
            }),
        )
            .into_response()
    }
}
