use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Errors surfaced to HTTP clients.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("not found")]
    NotFound,

    #[error("path parts may not start with a period")]
    HiddenPath,

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("requested range contains holes")]
    ContainsHoles,

    #[error("internal error: {0}")]
    Internal(String),
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::HiddenPath => StatusCode::FORBIDDEN,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::ContainsHoles => StatusCode::NOT_ACCEPTABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}

impl From<segments::SegmentError> for ApiError {
    fn from(e: segments::SegmentError) -> Self {
        match e {
            segments::SegmentError::ContainsHoles => ApiError::ContainsHoles,
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<cutter::CutError> for ApiError {
    fn from(e: cutter::CutError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl From<std::io::Error> for ApiError {
    fn from(e: std::io::Error) -> Self {
        ApiError::Internal(e.to_string())
    }
}
