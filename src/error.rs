// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Error types.
//!
//! Errors from the two external collaborators (auth provider and profile
//! table) are `StoreError`s. The auth context normalizes them into
//! `AuthError { message, kind }` before anything page-facing sees them, and
//! `AppError` turns failures into consistent JSON API responses.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

/// Failure talking to the auth provider or the profile table.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The provider rejected the credentials (or the refresh token).
    #[error("Invalid credentials: {0}")]
    Credentials(String),

    /// Connectivity problem, timeout, rate limit or 5xx; worth retrying.
    #[error("Network error: {0}")]
    Network(String),

    /// The provider answered with something we cannot use.
    #[error("Provider error: {0}")]
    Provider(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Network(_))
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            StoreError::Provider(err.to_string())
        } else {
            StoreError::Network(err.to_string())
        }
    }
}

/// Normalized error category handed to pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
#[serde(rename_all = "snake_case")]
pub enum AuthErrorKind {
    /// Sign-in rejected. Shown on the login form, never retried.
    Credential,
    /// Connectivity failure after the bounded retries.
    Network,
    /// Authenticated, but the resolved role is not allowed here.
    AuthorizationGap,
    /// Role could not be determined within the wait bound.
    IndeterminateRole,
    /// Malformed input (bad email, empty password).
    InvalidInput,
    /// Unexpected provider response.
    Provider,
}

/// Page-facing auth error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
#[error("{message}")]
pub struct AuthError {
    pub message: String,
    pub kind: AuthErrorKind,
}

impl AuthError {
    pub fn new(kind: AuthErrorKind, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind,
        }
    }

    pub fn unverified_access() -> Self {
        Self::new(
            AuthErrorKind::IndeterminateRole,
            "Unable to verify access right now. Please retry.",
        )
    }

    /// HTTP status used when this error is returned from an endpoint.
    pub fn status(&self) -> StatusCode {
        match self.kind {
            AuthErrorKind::Credential => StatusCode::UNAUTHORIZED,
            AuthErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
            AuthErrorKind::AuthorizationGap => StatusCode::FORBIDDEN,
            AuthErrorKind::Network | AuthErrorKind::IndeterminateRole => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            AuthErrorKind::Provider => StatusCode::BAD_GATEWAY,
        }
    }
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Credentials(msg) => Self::new(AuthErrorKind::Credential, msg),
            StoreError::Network(msg) => {
                tracing::warn!(error = %msg, "Auth provider unreachable");
                Self::new(
                    AuthErrorKind::Network,
                    "Could not reach the sign-in service. Please retry.",
                )
            }
            StoreError::Provider(msg) => {
                tracing::error!(error = %msg, "Unexpected auth provider response");
                Self::new(AuthErrorKind::Provider, "Sign-in service returned an error.")
            }
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut response = (status, Json(self)).into_response();
        if status == StatusCode::SERVICE_UNAVAILABLE {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from_static("3"));
        }
        response
    }
}

/// Application error type that converts to HTTP responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Authentication required")]
    Unauthorized,

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// JSON error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, details) = match self {
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized", None),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", Some(msg)),
            AppError::Auth(err) => return err.into_response(),
            AppError::Internal(err) => {
                tracing::error!(error = %err, "Internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None)
            }
        };

        let body = ErrorResponse {
            error: error.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for handlers
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_error_status_mapping() {
        let cases = [
            (AuthErrorKind::Credential, StatusCode::UNAUTHORIZED),
            (AuthErrorKind::InvalidInput, StatusCode::BAD_REQUEST),
            (AuthErrorKind::AuthorizationGap, StatusCode::FORBIDDEN),
            (AuthErrorKind::Network, StatusCode::SERVICE_UNAVAILABLE),
            (AuthErrorKind::IndeterminateRole, StatusCode::SERVICE_UNAVAILABLE),
            (AuthErrorKind::Provider, StatusCode::BAD_GATEWAY),
        ];
        for (kind, status) in cases {
            assert_eq!(AuthError::new(kind, "x").status(), status);
        }
    }

    #[test]
    fn test_unverified_response_has_retry_after() {
        let response = AuthError::unverified_access().into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "3");

        let response = AuthError::new(AuthErrorKind::Credential, "nope").into_response();
        assert!(response.headers().get(header::RETRY_AFTER).is_none());
    }

    #[test]
    fn test_store_errors_normalize() {
        let err = AuthError::from(StoreError::Credentials("Invalid login credentials".into()));
        assert_eq!(err.kind, AuthErrorKind::Credential);
        assert_eq!(err.message, "Invalid login credentials");

        // Upstream details stay in the logs.
        let err = AuthError::from(StoreError::Network("dns failure for db.internal".into()));
        assert_eq!(err.kind, AuthErrorKind::Network);
        assert!(!err.message.contains("db.internal"));
    }

    #[test]
    fn test_auth_error_json_shape() {
        let json = serde_json::to_value(AuthError::unverified_access()).unwrap();
        assert_eq!(json["kind"], "indeterminate_role");
        assert!(json["message"].as_str().unwrap().contains("retry"));
    }
}
