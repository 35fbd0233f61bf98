use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::auth::AuthError;
use crate::payload::DecodeError;

#[derive(Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct IngestResponse {
    pub id: String,
}

#[derive(Error, Debug)]
pub enum IngestError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    // The decode cause is logged where it happens, clients get a generic message
    #[error("failed to decode request")]
    BadRequestData(#[from] DecodeError),

    #[error("transient error, please retry")]
    RetryableSinkError,
    #[error("maximum event size exceeded")]
    EventTooBig,
    #[error("invalid event could not be processed")]
    NonRetryableSinkError,
}

impl IngestError {
    pub fn status(&self) -> StatusCode {
        match self {
            IngestError::Auth(AuthError::InvalidHeader)
            | IngestError::Auth(AuthError::Unauthorized)
            | IngestError::Auth(AuthError::InvalidTimestamp)
            | IngestError::Auth(AuthError::TimestampExpired) => StatusCode::UNAUTHORIZED,
            IngestError::Auth(AuthError::Forbidden(_)) => StatusCode::FORBIDDEN,

            IngestError::BadRequestData(_) | IngestError::NonRetryableSinkError => {
                StatusCode::BAD_REQUEST
            }
            IngestError::EventTooBig => StatusCode::PAYLOAD_TOO_LARGE,

            IngestError::Auth(AuthError::StoreUnavailable) | IngestError::RetryableSinkError => {
                StatusCode::SERVICE_UNAVAILABLE
            }
        }
    }
}

impl IngestError {
    /// Whether resending the same event later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            IngestError::RetryableSinkError | IngestError::Auth(AuthError::StoreUnavailable)
        )
    }
}

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}
