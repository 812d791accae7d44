use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use scribe_core::StreamError;

/// Error returned by HTTP handlers.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Stream(StreamError),
}

impl From<StreamError> for ApiError {
    fn from(err: StreamError) -> Self {
        Self::Stream(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Stream(err) => match err {
                StreamError::StreamNotFound(_) | StreamError::AssociationNotFound(_) => {
                    StatusCode::NOT_FOUND
                }
                StreamError::AlreadyStarted(_) | StreamError::StreamNotAcceptingWrites { .. } => {
                    StatusCode::CONFLICT
                }
                StreamError::GenerationFailure(_) => StatusCode::BAD_GATEWAY,
                StreamError::TransportWriteFailure(_)
                | StreamError::PersistenceFailure(_)
                | StreamError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            // Clients tell "already started" apart by status alone; they then
            // switch to polling the read endpoint.
            Self::Stream(StreamError::AlreadyStarted(_)) => return status.into_response(),
            Self::BadRequest(message) => message,
            Self::Stream(err) => {
                if status.is_server_error() {
                    tracing::error!(error = %err, "request failed");
                }
                err.to_string()
            }
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}
