use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use codegate_core::{domain::SessionId, Error, ErrorKind};

/// A failed API call, rendered as `{"error": <kind>}` with a matching status.
#[derive(Debug)]
pub enum ApiError {
    Unauthorized,
    EmptyMessage,
    Core {
        error: Error,
        session_id: Option<SessionId>,
    },
}

impl ApiError {
    pub fn with_session(error: Error, session_id: &SessionId) -> Self {
        ApiError::Core {
            error,
            session_id: Some(session_id.clone()),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::EmptyMessage => StatusCode::BAD_REQUEST,
            ApiError::Core { error, .. } => match error.kind() {
                ErrorKind::InvalidCode => StatusCode::FORBIDDEN,
                ErrorKind::SessionNotFound => StatusCode::UNAUTHORIZED,
                ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
                ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
                ErrorKind::External => StatusCode::BAD_GATEWAY,
                ErrorKind::Storage | ErrorKind::Config => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::Unauthorized => "unauthorized",
            ApiError::EmptyMessage => "empty_message",
            ApiError::Core { error, .. } => error.kind().as_str(),
        }
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        ApiError::Core {
            error,
            session_id: None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = ?self, "api request failed");
        }

        let mut body = json!({ "error": self.code() });
        if let ApiError::Core {
            session_id: Some(session_id),
            ..
        } = &self
        {
            body["session_id"] = json!(session_id.as_str());
        }
        (status, Json(body)).into_response()
    }
}
