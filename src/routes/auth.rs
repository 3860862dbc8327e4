// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Password login, logout and session refresh routes.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::Serialize;
use std::sync::Arc;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

use crate::config::{ACCESS_TOKEN_COOKIE, REFRESH_TOKEN_COOKIE};
use crate::error::{AppError, Result};
use crate::middleware::auth::session_from_request;
use crate::models::{Role, Session};
use crate::routes::api::SessionResponse;
use crate::services::{LoginFlow, LoginForm, LoginOutcome};
use crate::AppState;

/// Session cookies outlive the access token; the refresh token renews it.
const SESSION_COOKIE_MAX_AGE: time::Duration = time::Duration::days(30);

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
        .route("/auth/refresh", post(refresh))
}

/// Successful login.
#[derive(Debug, Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct LoginResponse {
    pub redirect_to: String,
    #[cfg_attr(feature = "binding-generation", ts(type = "string | null"))]
    pub role: Option<Role>,
}

/// Sign in with email and password, then set the session cookies.
///
/// If the role cannot be verified the session is still kept (cookies set)
/// and a 503 tells the client to retry instead of redirecting.
async fn login(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    payload: std::result::Result<Json<LoginForm>, JsonRejection>,
) -> Result<Response> {
    let Json(form) = payload.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let context = state.auth_context(None);
    let secure = state.config.secure_cookies();

    match LoginFlow::new(&context).submit(&form).await? {
        LoginOutcome::Redirect { to, session, role } => {
            let jar = set_session_cookies(jar, &session, secure);
            Ok((
                jar,
                Json(LoginResponse {
                    redirect_to: to,
                    role,
                }),
            )
                .into_response())
        }
        LoginOutcome::Unverified { session, error } => {
            tracing::warn!(user_id = %session.user.id, "Signed in but role unverified");
            let jar = set_session_cookies(jar, &session, secure);
            Ok((jar, error).into_response())
        }
    }
}

/// Sign out with the provider (best effort) and clear the session cookies.
async fn logout(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    headers: HeaderMap,
) -> (StatusCode, CookieJar) {
    if let Some(session) = session_from_request(&state.config, &jar, &headers, true) {
        let user_id = session.user.id.clone();
        let context = state.auth_context(Some(session));
        match context.sign_out().await {
            Ok(()) => tracing::info!(user_id = %user_id, "Signed out"),
            Err(e) => tracing::warn!(user_id = %user_id, error = %e, "Provider sign-out failed"),
        }
    }

    let jar = clear_session_cookies(jar, state.config.secure_cookies());
    (StatusCode::NO_CONTENT, jar)
}

/// Refresh the session once using the refresh cookie.
async fn refresh(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    headers: HeaderMap,
) -> Result<Response> {
    let secure = state.config.secure_cookies();
    let session = session_from_request(&state.config, &jar, &headers, true)
        .filter(|s| !s.refresh_token.is_empty())
        .ok_or(AppError::Unauthorized)?;

    let context = state.auth_context(Some(session));
    match context.refresh_session().await? {
        Some(session) => {
            let jar = set_session_cookies(jar, &session, secure);
            let snapshot = context.wait_for_role().await;
            Ok((jar, Json(SessionResponse::from_snapshot(&snapshot))).into_response())
        }
        None => {
            let jar = clear_session_cookies(jar, secure);
            Ok((jar, AppError::Unauthorized).into_response())
        }
    }
}

fn session_cookie(name: &'static str, value: String, secure: bool) -> Cookie<'static> {
    Cookie::build((name, value))
        .http_only(true)
        .same_site(SameSite::Lax)
        .path("/")
        .secure(secure)
        .max_age(SESSION_COOKIE_MAX_AGE)
        .build()
}

/// Write both session cookies.
pub(crate) fn set_session_cookies(jar: CookieJar, session: &Session, secure: bool) -> CookieJar {
    jar.add(session_cookie(
        ACCESS_TOKEN_COOKIE,
        session.access_token.clone(),
        secure,
    ))
    .add(session_cookie(
        REFRESH_TOKEN_COOKIE,
        session.refresh_token.clone(),
        secure,
    ))
}

/// Expire both session cookies, with the attributes they were set with.
pub(crate) fn clear_session_cookies(jar: CookieJar, secure: bool) -> CookieJar {
    let expired = |name: &'static str| {
        let mut cookie = session_cookie(name, String::new(), secure);
        cookie.set_max_age(time::Duration::ZERO);
        cookie
    };
    jar.add(expired(ACCESS_TOKEN_COOKIE))
        .add(expired(REFRESH_TOKEN_COOKIE))
}

/// Bring the cookies in line with the session the request ended with.
///
/// A session refreshed during the request gets new cookies; a session that
/// is gone (refresh token rejected) gets its cookies cleared.
pub(crate) fn sync_session_cookies(
    jar: CookieJar,
    original_access_token: &str,
    current: Option<&Session>,
    secure: bool,
) -> CookieJar {
    match current {
        Some(session) if session.access_token != original_access_token => {
            set_session_cookies(jar, session, secure)
        }
        Some(_) => jar,
        None => clear_session_cookies(jar, secure),
    }
}
