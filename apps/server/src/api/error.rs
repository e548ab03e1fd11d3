use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use gantry_core::{ErrorKind, JobError};
use serde::{Deserialize, Serialize};

/// Error body returned by every failing endpoint.
#[derive(Debug, Deserialize, Serialize)]
pub struct ErrorBody {
    /// Human readable message.
    pub error: String,
}

/// A [`JobError`] rendered as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub JobError);

impl ApiError {
    /// HTTP status for the error kind.
    pub fn status(&self) -> StatusCode {
        match self.0.kind() {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::AlreadyExists => StatusCode::CONFLICT,
            ErrorKind::Backend | ErrorKind::PartialFailure => StatusCode::BAD_GATEWAY,
        }
    }
}

impl From<JobError> for ApiError {
    fn from(err: JobError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() || self.0.rollback_error().is_some() {
            tracing::error!(error = %self.0, "Request failed");
        }
        (status, Json(ErrorBody { error: self.0.to_string() })).into_response()
    }
}
