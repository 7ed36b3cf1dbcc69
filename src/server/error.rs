//! Request-level errors and their HTTP mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::auth::AuthError;
use super::json_response;
use crate::record::BodyError;
use crate::store::StoreError;

/// Every way a request can fail. Each variant is terminal for the request.
#[derive(Debug, Error)]
pub enum SyncError {
    /// No shared secret configured on the server.
    #[error("shared secret is not configured")]
    Config,
    /// Credential missing or wrong.
    #[error("invalid key")]
    Auth(#[source] AuthError),
    /// Body missing fields or not valid JSON.
    #[error("{0}")]
    Validation(String),
    /// No route for the path.
    #[error("not found")]
    NotFound,
    /// Known path, unsupported verb.
    #[error("method not allowed")]
    Method,
    /// Store adapter failure.
    #[error("store error: {0}")]
    Store(#[source] StoreError),
    /// The share export has nothing stored yet.
    #[error("empty data")]
    EmptyData,
}

impl SyncError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            SyncError::Config => StatusCode::SERVICE_UNAVAILABLE,
            SyncError::Auth(_) => StatusCode::FORBIDDEN,
            SyncError::Validation(_) => StatusCode::BAD_REQUEST,
            SyncError::NotFound => StatusCode::NOT_FOUND,
            SyncError::Method => StatusCode::METHOD_NOT_ALLOWED,
            SyncError::Store(_) | SyncError::EmptyData => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<AuthError> for SyncError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::NotConfigured => SyncError::Config,
            other => SyncError::Auth(other),
        }
    }
}

impl From<BodyError> for SyncError {
    fn from(err: BodyError) -> Self {
        SyncError::Validation(err.to_string())
    }
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        if let StoreError::InvalidKey(_) = &err {
            return SyncError::Validation(err.to_string());
        }
        SyncError::Store(err)
    }
}

/// JSON error body: `{"message": "..."}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
}

impl IntoResponse for SyncError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        match &self {
            SyncError::Config => tracing::error!("rejecting request: no shared secret configured"),
            SyncError::Auth(reason) => tracing::warn!(%reason, "rejecting request"),
            SyncError::Store(e) => tracing::error!(error = %e, "store failure"),
            SyncError::EmptyData => tracing::warn!("share export requested before any data"),
            _ => tracing::debug!(%status, error = %self, "request failed"),
        }

        json_response(
            status,
            &ErrorBody {
                message: self.to_string(),
            },
        )
    }
}
