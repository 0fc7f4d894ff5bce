//! Error taxonomy for the relay core.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::session::SessionId;

/// Errors raised by session registration, routing and delivery.
#[derive(Error, Debug)]
pub enum RelayError {
    /// A session id collided with a live registry entry.
    #[error("session '{0}' is already registered")]
    DuplicateSession(SessionId),

    /// No open connection could be resolved for an inbound message.
    #[error("no active connection for session {}", .0.as_deref().unwrap_or("<none>"))]
    NoActiveConnection(Option<String>),

    /// The protocol handler or the channel failed while delivering a payload.
    #[error("delivery to session '{session_id}' failed: {source}")]
    DeliveryFailed {
        session_id: SessionId,
        #[source]
        source: anyhow::Error,
    },

    /// The protocol handler could not be bound to a fresh connection.
    #[error("failed to bind protocol handler to session '{session_id}': {source}")]
    HandlerBind {
        session_id: SessionId,
        #[source]
        source: anyhow::Error,
    },
}

impl RelayError {
    /// Machine-readable code used in JSON error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::DuplicateSession(_) => "duplicate_session",
            Self::NoActiveConnection(_) => "no_active_connection",
            Self::DeliveryFailed { .. } => "delivery_failed",
            Self::HandlerBind { .. } => "handler_bind_failed",
        }
    }

    /// HTTP status the message-delivery endpoint reports for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NoActiveConnection(_) => StatusCode::BAD_REQUEST,
            Self::DuplicateSession(_) | Self::DeliveryFailed { .. } | Self::HandlerBind { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.code(),
            message: self.to_string(),
        });
        (self.status(), body).into_response()
    }
}
