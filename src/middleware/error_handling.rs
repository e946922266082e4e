use crate::error::{AppError, ErrorBody};
use axum::{http::StatusCode, response::IntoResponse, Json};

/// Map domain errors to HTTP responses with the shared JSON envelope.
pub fn map_error(err: &AppError) -> (StatusCode, ErrorBody) {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let (error_type, code) = match err {
        AppError::Validation(_) => ("validation_error", "VALIDATION_ERROR"),
        AppError::Unauthorized => ("authentication_error", "UNAUTHORIZED"),
        AppError::Forbidden => ("authorization_error", "FORBIDDEN"),
        AppError::NotFound(_) => ("not_found_error", "NOT_FOUND"),
        AppError::Conflict => ("conflict_error", "CONFLICT"),
        AppError::Database(_) => ("server_error", "DATABASE_ERROR"),
        AppError::Store(_) => ("server_error", "STORE_ERROR"),
        AppError::Config(_) | AppError::StartServer(_) => ("server_error", "INTERNAL_ERROR"),
    };

    let body = ErrorBody {
        error: match status {
            StatusCode::BAD_REQUEST => "Bad Request",
            StatusCode::UNAUTHORIZED => "Unauthorized",
            StatusCode::FORBIDDEN => "Forbidden",
            StatusCode::NOT_FOUND => "Not Found",
            StatusCode::CONFLICT => "Conflict",
            _ => "Internal Server Error",
        }
        .to_string(),
        message: err.to_string(),
        status: status.as_u16(),
        error_type: error_type.to_string(),
        code: code.to_string(),
    };

    (status, body)
}

pub fn into_response(err: AppError) -> impl IntoResponse {
    if err.status_code() >= 500 {
        tracing::error!(error = %err, "request failed");
    }
    let (status, body) = map_error(&err);
    (status, Json(body))
}
