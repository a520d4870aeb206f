//! JSON error responses.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use fixbot::AgentError;
use serde_json::json;
use tracing::warn;

/// Handler error: an [`AgentError`] rendered as `{error, code}`.
#[derive(Debug)]
pub struct ApiError(pub AgentError);

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self(AgentError::InvalidRequest(message.into()))
    }

    pub fn status(&self) -> StatusCode {
        match &self.0 {
            AgentError::NotFound(_) => StatusCode::NOT_FOUND,
            AgentError::InvalidState { .. } => StatusCode::CONFLICT,
            AgentError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<AgentError> for ApiError {
    fn from(err: AgentError) -> Self {
        Self(err)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self(AgentError::Collaborator(err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!(code = self.0.code(), err = %self.0, "request failed");
        }
        let body = json!({
            "success": false,
            "error": self.0.to_string(),
            "code": self.0.code(),
        });
        (status, Json(body)).into_response()
    }
}
