// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Guarded page shells.
//!
//! The edge guard has already checked the session cookie; these handlers
//! resolve the role and apply the page-level guard.

use crate::middleware::auth::session_from_request;
use crate::routes::auth::{clear_session_cookies, sync_session_cookies};
use crate::services::route_guard::{login_url, HOME_PATH};
use crate::services::{decide, GuardDecision, Requirement};
use crate::AppState;
use axum::{
    extract::State,
    http::{HeaderMap, Uri},
    response::{Html, IntoResponse, Redirect, Response},
    routing::get,
    Router,
};
use axum_extra::extract::cookie::CookieJar;
use std::sync::Arc;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/login", get(login_page))
        .route("/admin", get(guarded_page))
        .route("/admin/{*rest}", get(guarded_page))
        .route("/account", get(guarded_page))
        .route("/account/{*rest}", get(guarded_page))
        .route("/orders", get(guarded_page))
        .route("/orders/{*rest}", get(guarded_page))
}

async fn login_page() -> Html<&'static str> {
    Html(concat!(
        "<!doctype html><html><head><title>Sign in</title></head><body>",
        "<main id=\"login\" data-action=\"/auth/login\"></main>",
        "</body></html>"
    ))
}

async fn guarded_page(
    State(state): State<Arc<AppState>>,
    uri: Uri,
    jar: CookieJar,
    headers: HeaderMap,
) -> Response {
    let path = uri.path();
    let secure = state.config.secure_cookies();

    let Some(session) = session_from_request(&state.config, &jar, &headers, false) else {
        return (clear_session_cookies(jar, secure), Redirect::to(&login_url(path))).into_response();
    };
    let original_token = session.access_token.clone();

    let context = state.auth_context(Some(session));
    context.initialize().await;
    let snapshot = context.wait_for_role().await;
    let jar = sync_session_cookies(jar, &original_token, snapshot.session.as_ref(), secure);

    match decide(&snapshot, &Requirement::for_path(path)) {
        GuardDecision::Render => (jar, Html(page_shell(path))).into_response(),
        GuardDecision::RedirectToLogin => {
            (clear_session_cookies(jar, secure), Redirect::to(&login_url(path))).into_response()
        }
        GuardDecision::RedirectHome => {
            tracing::info!(path, user_id = ?snapshot.user_id(), "Role not allowed, sending home");
            (jar, Redirect::to(HOME_PATH)).into_response()
        }
        GuardDecision::Unverified(error) => (jar, error).into_response(),
        GuardDecision::Loading => {
            // wait_for_role only returns pending state once it has given up.
            tracing::warn!(path, phase = ?snapshot.phase, "Auth state still loading");
            (jar, crate::error::AuthError::unverified_access()).into_response()
        }
    }
}

/// Placeholder shell named after the top-level section.
fn page_shell(path: &str) -> String {
    let name = path
        .trim_start_matches('/')
        .split('/')
        .next()
        .unwrap_or_default();
    format!(
        "<!doctype html><html><head><title>{name}</title></head><body>\
         <main id=\"{name}\"></main></body></html>"
    )
}
