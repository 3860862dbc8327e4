// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! API routes for signed-in users.

use crate::error::{AppError, AuthError, Result};
use crate::middleware::auth::session_from_request;
use crate::middleware::EdgeUser;
use crate::routes::auth::sync_session_cookies;
use crate::services::{AuthPhase, AuthSnapshot};
use crate::time_utils::format_unix_rfc3339;
use crate::AppState;
use axum::{extract::State, http::HeaderMap, routing::get, Extension, Json, Router};
use axum_extra::extract::cookie::CookieJar;
use serde::Serialize;
use std::sync::Arc;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

/// API routes (require a session).
/// The edge guard in routes/mod.rs rejects requests without one.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/api/session", get(get_session))
}

// ─── Session ─────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct SessionUser {
    pub id: String,
    pub email: Option<String>,
}

/// Current session, role and auth phase.
#[derive(Debug, Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct SessionResponse {
    pub user: Option<SessionUser>,
    /// `null` until resolved, and for profiles without a role
    pub role: Option<String>,
    #[cfg_attr(feature = "binding-generation", ts(type = "string"))]
    pub phase: AuthPhase,
    /// Access token expiry (RFC 3339)
    pub expires_at: Option<String>,
    /// Seconds until the access token expires
    #[cfg_attr(feature = "binding-generation", ts(type = "number | null"))]
    pub expires_in: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<AuthError>,
}

impl SessionResponse {
    pub fn from_snapshot(snapshot: &AuthSnapshot) -> Self {
        Self {
            user: snapshot.user.as_ref().map(|u| SessionUser {
                id: u.id.clone(),
                email: u.email.clone(),
            }),
            role: snapshot.role().map(|r| r.as_str().to_string()),
            phase: snapshot.phase,
            expires_at: snapshot
                .session
                .as_ref()
                .and_then(|s| format_unix_rfc3339(s.expires_at)),
            expires_in: snapshot.session.as_ref().map(|s| s.remaining_secs()),
            error: snapshot.error.clone(),
        }
    }
}

/// Get the current session with its resolved role.
async fn get_session(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<EdgeUser>,
    jar: CookieJar,
    headers: HeaderMap,
) -> Result<(CookieJar, Json<SessionResponse>)> {
    let session =
        session_from_request(&state.config, &jar, &headers, false).ok_or(AppError::Unauthorized)?;
    let original_token = session.access_token.clone();

    let context = state.auth_context(Some(session));
    context.initialize().await;
    let snapshot = context.wait_for_role().await;

    tracing::debug!(user_id = %user.id, phase = ?snapshot.phase, "Session lookup");

    let jar = sync_session_cookies(
        jar,
        &original_token,
        snapshot.session.as_ref(),
        state.config.secure_cookies(),
    );
    Ok((jar, Json(SessionResponse::from_snapshot(&snapshot))))
}
