// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Edge route guard.
//!
//! Runs before any page code. Protected paths need a valid access token in
//! the session cookie (or a bearer header); without one, pages redirect to
//! login and API paths get a 401. No role checks happen here, those need
//! the profile table and belong to the page-level guard.

use crate::config::{Config, ACCESS_TOKEN_COOKIE, REFRESH_TOKEN_COOKIE};
use crate::error::AppError;
use crate::models::{Session, User};
use crate::services::route_guard::{login_url, path_is_under};
use crate::AppState;
use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::CookieJar;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Audience the auth provider stamps on user access tokens.
pub const TOKEN_AUDIENCE: &str = "authenticated";

/// Access token claims issued by the auth provider.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub aud: String,
    /// Database role of the token (`authenticated`), not the app role
    #[serde(default)]
    pub role: Option<String>,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issued at (Unix timestamp)
    #[serde(default)]
    pub iat: i64,
}

/// Signed-in user as seen by the edge guard.
#[derive(Debug, Clone)]
pub struct EdgeUser {
    pub id: String,
    pub email: Option<String>,
    pub expires_at: i64,
}

impl From<Claims> for EdgeUser {
    fn from(claims: Claims) -> Self {
        Self {
            id: claims.sub,
            email: claims.email,
            expires_at: claims.exp,
        }
    }
}

/// Verify an access token and return its claims.
///
/// `allow_expired` skips the expiry check; used where the refresh token
/// is about to be spent anyway (refresh, logout).
pub fn verify_access_token(
    token: &str,
    secret: &[u8],
    allow_expired: bool,
) -> Result<Claims, jsonwebtoken::errors::Error> {
    let key = DecodingKey::from_secret(secret);
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_audience(&[TOKEN_AUDIENCE]);
    if allow_expired {
        validation.validate_exp = false;
    }

    let token_data = decode::<Claims>(token, &key, &validation)?;
    if token_data.claims.sub.is_empty() {
        return Err(jsonwebtoken::errors::ErrorKind::InvalidSubject.into());
    }
    Ok(token_data.claims)
}

/// Access token from the session cookie, falling back to a bearer header.
pub fn access_token(jar: &CookieJar, headers: &HeaderMap) -> Option<String> {
    if let Some(cookie) = jar.get(ACCESS_TOKEN_COOKIE) {
        return Some(cookie.value().to_string()).filter(|v| !v.is_empty());
    }

    headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

/// Rebuild the provider session carried by the request, if any.
///
/// The refresh token is only available from its cookie; a bearer-only
/// request yields a session that cannot be refreshed.
pub fn session_from_request(
    config: &Config,
    jar: &CookieJar,
    headers: &HeaderMap,
    allow_expired: bool,
) -> Option<Session> {
    let token = access_token(jar, headers)?;
    let claims = match verify_access_token(&token, &config.jwt_secret, allow_expired) {
        Ok(claims) => claims,
        Err(e) => {
            tracing::debug!(error = %e, "Ignoring invalid access token");
            return None;
        }
    };

    let refresh_token = jar
        .get(REFRESH_TOKEN_COOKIE)
        .map(|c| c.value().to_string())
        .unwrap_or_default();

    Some(Session {
        access_token: token,
        refresh_token,
        expires_at: claims.exp,
        user: User {
            id: claims.sub,
            email: claims.email,
            email_confirmed_at: None,
        },
    })
}

/// Middleware that gates protected paths on a valid session.
pub async fn edge_guard(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    if !state.config.is_protected(&path) {
        return next.run(request).await;
    }

    let verified = access_token(&jar, request.headers())
        .map(|token| verify_access_token(&token, &state.config.jwt_secret, false));

    match verified {
        Some(Ok(claims)) => {
            request.extensions_mut().insert(EdgeUser::from(claims));
            next.run(request).await
        }
        rejected => {
            if let Some(Err(e)) = rejected {
                tracing::debug!(path = %path, error = %e, "Rejected access token");
            }
            if path_is_under(&path, "/api") {
                AppError::Unauthorized.into_response()
            } else {
                Redirect::to(&login_url(&path)).into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time_utils::now_unix;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &[u8] = b"test_jwt_secret_32_bytes_minimum";

    fn mint(sub: &str, aud: &str, exp: i64) -> String {
        let claims = Claims {
            sub: sub.to_string(),
            email: Some("owner@example.com".to_string()),
            aud: aud.to_string(),
            role: Some("authenticated".to_string()),
            exp,
            iat: now_unix(),
        };
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(SECRET),
        )
        .unwrap()
    }

    #[test]
    fn test_verify_accepts_provider_token() {
        let token = mint("user-1", TOKEN_AUDIENCE, now_unix() + 600);
        let claims = verify_access_token(&token, SECRET, false).unwrap();
        assert_eq!(claims.sub, "user-1");
        assert_eq!(claims.email.as_deref(), Some("owner@example.com"));
    }

    #[test]
    fn test_verify_rejects_wrong_audience_and_secret() {
        let token = mint("user-1", "anon", now_unix() + 600);
        assert!(verify_access_token(&token, SECRET, false).is_err());

        let token = mint("user-1", TOKEN_AUDIENCE, now_unix() + 600);
        assert!(verify_access_token(&token, b"some_other_secret_of_32_bytes___", false).is_err());
    }

    #[test]
    fn test_expired_token_only_passes_when_allowed() {
        let token = mint("user-1", TOKEN_AUDIENCE, now_unix() - 3600);
        assert!(verify_access_token(&token, SECRET, false).is_err());
        assert!(verify_access_token(&token, SECRET, true).is_ok());
    }

    #[test]
    fn test_empty_subject_rejected() {
        let token = mint("", TOKEN_AUDIENCE, now_unix() + 600);
        assert!(verify_access_token(&token, SECRET, false).is_err());
    }

    #[test]
    fn test_bearer_header_fallback() {
        let jar = CookieJar::new();
        let mut headers = HeaderMap::new();
        assert_eq!(access_token(&jar, &headers), None);

        headers.insert(header::AUTHORIZATION, "Bearer abc".parse().unwrap());
        assert_eq!(access_token(&jar, &headers).as_deref(), Some("abc"));

        let jar = jar.add(axum_extra::extract::cookie::Cookie::new(
            ACCESS_TOKEN_COOKIE,
            "from-cookie",
        ));
        assert_eq!(access_token(&jar, &headers).as_deref(), Some("from-cookie"));
    }

    #[test]
    fn test_session_from_request_reads_both_cookies() {
        let config = Config::test_default();
        let token = mint("user-9", TOKEN_AUDIENCE, now_unix() + 600);
        let jar = CookieJar::new()
            .add(axum_extra::extract::cookie::Cookie::new(
                ACCESS_TOKEN_COOKIE,
                token.clone(),
            ))
            .add(axum_extra::extract::cookie::Cookie::new(
                REFRESH_TOKEN_COOKIE,
                "refresh-9",
            ));

        let session = session_from_request(&config, &jar, &HeaderMap::new(), false).unwrap();
        assert_eq!(session.access_token, token);
        assert_eq!(session.refresh_token, "refresh-9");
        assert_eq!(session.user.id, "user-9");
    }
}
