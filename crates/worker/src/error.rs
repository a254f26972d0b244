use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use runcomfy_comfyui::job::JobError;
use runcomfy_core::error::CoreError;
use serde_json::json;

/// Error type for a run and its HTTP handler.
///
/// Wraps [`CoreError`] and [`JobError`] unchanged and implements
/// [`IntoResponse`] to produce `{"error", "code"}` JSON bodies.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// A graph, override, media or workflow-store error.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A submission or lifecycle error from the backend.
    #[error(transparent)]
    Job(#[from] JobError),

    /// A request that names no workflow while no default is configured.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// An internal error with a human-readable message.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Convenience type alias for run results.
pub type RunResult<T> = Result<T, RunError>;

impl RunError {
    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            RunError::Core(core) => match core {
                CoreError::WorkflowNotFound(_) => "WORKFLOW_NOT_FOUND",
                CoreError::MalformedGraph(_) => "MALFORMED_GRAPH",
                CoreError::FieldIndexOutOfRange { .. } => "FIELD_INDEX_OUT_OF_RANGE",
                CoreError::InvalidEncoding { .. } => "INVALID_ENCODING",
                CoreError::InvalidMediaName(_) => "INVALID_MEDIA_NAME",
                CoreError::Io { .. } => "INTERNAL_ERROR",
            },
            RunError::Job(job) => match job {
                JobError::Submission(_) => "SUBMISSION_ERROR",
                JobError::Failed { .. } => "JOB_FAILED",
                JobError::Timeout { .. } => "JOB_TIMEOUT",
                JobError::Cancelled { .. } => "JOB_CANCELLED",
            },
            RunError::BadRequest(_) => "BAD_REQUEST",
            RunError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            RunError::Core(core) => match core {
                CoreError::WorkflowNotFound(_) => StatusCode::NOT_FOUND,
                CoreError::MalformedGraph(_) | CoreError::FieldIndexOutOfRange { .. } => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }
                CoreError::InvalidEncoding { .. } | CoreError::InvalidMediaName(_) => {
                    StatusCode::BAD_REQUEST
                }
                CoreError::Io { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            },
            RunError::Job(job) => match job {
                JobError::Submission(_) | JobError::Failed { .. } => StatusCode::BAD_GATEWAY,
                JobError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
                JobError::Cancelled { .. } => StatusCode::SERVICE_UNAVAILABLE,
            },
            RunError::BadRequest(_) => StatusCode::BAD_REQUEST,
            RunError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for RunError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();

        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "Internal error");
            "An internal error occurred".to_string()
        } else {
            self.to_string()
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}
