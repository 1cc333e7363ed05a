//! Error types for the chat delivery pipeline.
//!
//! This module defines the central `Error` enum, which captures all
//! recoverable and reportable error cases within the pipeline. It implements
//! `IntoResponse` so HTTP handlers propagate failures with appropriate
//! status codes wrapped in the standard [`ApiResponse`] envelope.
//!
//! ## Error Cases
//! - `Conflict`: a push channel is already open for the request id.
//! - `InvalidRequest`: the submission was malformed or exceeded bounds.
//! - `QueuePublish`: the transport rejected the publish; nothing was
//!   enqueued.
//! - `Generation`: the generation backend failed mid-stream.
//! - `Interrupted`: shutdown reached a worker mid-request.
//! - `ServiceShutdown`: a request arrived while the service was shutting
//!   down.

use crate::response::ApiResponse;
use crate::types::RequestId;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the chat delivery pipeline.
#[derive(Clone, thiserror::Error, Debug)]
pub enum Error {
    /// A push channel for this request id is already open.
    #[error("connection already open for request {request_id}")]
    Conflict { request_id: RequestId },

    /// The client submission was invalid or exceeded constraints.
    #[error("invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// Publishing to the queue failed; the submission left no state behind.
    #[error("queue publish failed: {context}")]
    QueuePublish { context: String },

    /// The generation backend reported a failure.
    #[error("generation failed: {reason}")]
    Generation { reason: String },

    /// Shutdown interrupted the request mid-wait or mid-call.
    #[error("processing interrupted")]
    Interrupted,

    /// The service is in the process of shutting down.
    #[error("service is shutting down")]
    ServiceShutdown,
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Conflict { .. } => StatusCode::CONFLICT,
            Error::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            Error::ServiceShutdown => StatusCode::SERVICE_UNAVAILABLE,
            Error::QueuePublish { .. } | Error::Generation { .. } | Error::Interrupted => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(ApiResponse::<()>::error(status.as_u16(), self.to_string()));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_the_taxonomy() {
        let conflict = Error::Conflict {
            request_id: RequestId::from("r1"),
        };
        assert_eq!(conflict.status_code(), StatusCode::CONFLICT);

        let invalid = Error::InvalidRequest {
            reason: "question must not be empty".into(),
        };
        assert_eq!(invalid.status_code(), StatusCode::BAD_REQUEST);

        assert_eq!(
            Error::ServiceShutdown.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            Error::Interrupted.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn conflict_renders_the_request_id() {
        let err = Error::Conflict {
            request_id: RequestId::from("deadbeef"),
        };
        assert_eq!(
            err.to_string(),
            "connection already open for request deadbeef"
        );
    }
}
