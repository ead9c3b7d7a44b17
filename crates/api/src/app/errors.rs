use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;
use tracing::{debug, error, warn};

use multiroom_core::ServiceError;

/// Map the service error taxonomy to an HTTP response.
///
/// Bodies carry only the sanitized public message; the full error is logged.
pub fn service_error_to_response(err: ServiceError) -> axum::response::Response {
    let status = match &err {
        ServiceError::Unauthorized => StatusCode::UNAUTHORIZED,
        ServiceError::Forbidden(_) => StatusCode::FORBIDDEN,
        ServiceError::NotFound => StatusCode::NOT_FOUND,
        ServiceError::Upstream { status } => {
            StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
        }
        ServiceError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    match &err {
        ServiceError::Internal(_) => error!(error = %err, "request failed"),
        ServiceError::ServiceUnavailable(_) | ServiceError::Upstream { .. } => {
            warn!(error = %err, "request failed")
        }
        _ => debug!(error = %err, "request rejected"),
    }

    json_error(status, err.code(), err.public_message())
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
