use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::queue::AdmitError;

#[derive(Debug)]
pub enum AppError {
    NotFound(String),
    BadRequest(String),
    RateLimited(u64),
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AppError::NotFound(msg) => write!(f, "Not Found: {msg}"),
            AppError::BadRequest(msg) => write!(f, "Bad Request: {msg}"),
            AppError::RateLimited(secs) => write!(f, "Rate Limited: retry after {secs}s"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::RateLimited(secs) => {
                let body = json!({ "error": format!("Too many requests. Retry after {secs}s") });
                return (
                    StatusCode::TOO_MANY_REQUESTS,
                    [("retry-after", secs.to_string())],
                    axum::Json(body),
                )
                    .into_response();
            }
        };

        let body = json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

impl From<AdmitError> for AppError {
    fn from(err: AdmitError) -> Self {
        AppError::BadRequest(err.to_string())
    }
}
