// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Session store backed by the Supabase auth (GoTrue) REST API.
//!
//! Handles:
//! - Password sign-in
//! - Session refresh (explicit, and automatic when close to expiry)
//! - Sign-out
//! - Change notifications for everything above

use crate::error::StoreError;
use crate::models::{Session, User};
use crate::time_utils::now_unix;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, RwLock};

/// Margin before access token expiry when `get_session` refreshes (1 minute).
const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;

/// Fallback lifetime when the provider omits both `expires_at` and `expires_in`.
const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3600;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Kinds of session change notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthChangeEvent {
    SignedIn,
    SignedOut,
    TokenRefreshed,
    UserUpdated,
}

/// A session change notification.
#[derive(Debug, Clone)]
pub struct AuthChange {
    pub event: AuthChangeEvent,
    /// The session after the change; `None` means signed out.
    pub session: Option<Session>,
}

/// The auth provider's session API, as seen by the auth context.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Current session, refreshed first if it is about to expire.
    async fn get_session(&self) -> Result<Option<Session>, StoreError>;

    /// Exchange email + password for a session. Fails with
    /// `StoreError::Credentials` when the provider rejects them.
    async fn sign_in_with_password(&self, email: &str, password: &str)
        -> Result<Session, StoreError>;

    /// Drop the local session and revoke it with the provider.
    async fn sign_out(&self) -> Result<(), StoreError>;

    /// One refresh attempt. `Ok(None)` when there is no session or the
    /// provider rejected the refresh token (the session is then cleared).
    async fn refresh_session(&self) -> Result<Option<Session>, StoreError>;

    /// Subscribe to session change notifications.
    fn subscribe(&self) -> broadcast::Receiver<AuthChange>;
}

/// Builds a session store seeded with an existing session.
///
/// The server builds one store per request from the session cookies.
pub trait SessionStoreFactory: Send + Sync {
    fn session_store(&self, session: Option<Session>) -> Arc<dyn SessionStore>;
}

// ─────────────────────────────────────────────────────────────────────────────
// SupabaseAuthClient - stateless REST client
// ─────────────────────────────────────────────────────────────────────────────

/// Supabase auth REST client (cheap to clone).
#[derive(Clone)]
pub struct SupabaseAuthClient {
    http: reqwest::Client,
    auth_url: String,
    anon_key: String,
}

impl SupabaseAuthClient {
    pub fn new(http: reqwest::Client, supabase_url: &str, anon_key: &str) -> Self {
        Self {
            http,
            auth_url: format!("{}/auth/v1", supabase_url.trim_end_matches('/')),
            anon_key: anon_key.to_string(),
        }
    }

    /// POST /token?grant_type=password
    pub async fn password_grant(&self, email: &str, password: &str) -> Result<Session, StoreError> {
        let body = serde_json::json!({ "email": email, "password": password });
        self.token_grant("password", &body).await
    }

    /// POST /token?grant_type=refresh_token
    pub async fn refresh_grant(&self, refresh_token: &str) -> Result<Session, StoreError> {
        let body = serde_json::json!({ "refresh_token": refresh_token });
        self.token_grant("refresh_token", &body).await
    }

    /// POST /logout with the user's access token.
    pub async fn logout(&self, access_token: &str) -> Result<(), StoreError> {
        let response = self
            .http
            .post(format!("{}/logout", self.auth_url))
            .timeout(REQUEST_TIMEOUT)
            .header("apikey", &self.anon_key)
            .bearer_auth(access_token)
            .send()
            .await?;

        let status = response.status();
        // Already expired or revoked upstream: nothing left to revoke.
        if status.is_success() || status.as_u16() == 401 || status.as_u16() == 404 {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(classify_failure(status, &body))
    }

    async fn token_grant(
        &self,
        grant_type: &str,
        body: &serde_json::Value,
    ) -> Result<Session, StoreError> {
        let response = self
            .http
            .post(format!("{}/token", self.auth_url))
            .timeout(REQUEST_TIMEOUT)
            .query(&[("grant_type", grant_type)])
            .header("apikey", &self.anon_key)
            .json(body)
            .send()
            .await?;

        let token: TokenResponse = check_response_json(response).await?;
        Ok(token.into_session())
    }
}

impl SessionStoreFactory for SupabaseAuthClient {
    fn session_store(&self, session: Option<Session>) -> Arc<dyn SessionStore> {
        Arc::new(SupabaseSessionStore::new(self.clone(), session))
    }
}

/// Token response from the password and refresh grants.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    user: User,
}

impl TokenResponse {
    fn into_session(self) -> Session {
        let expires_at = self
            .expires_at
            .or_else(|| self.expires_in.map(|secs| now_unix() + secs))
            .unwrap_or_else(|| now_unix() + DEFAULT_TOKEN_LIFETIME_SECS);

        Session {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at,
            user: self.user,
        }
    }
}

/// Error bodies differ between endpoints; take whichever field is present.
#[derive(Debug, Default, Deserialize)]
struct ProviderErrorBody {
    error: Option<String>,
    error_description: Option<String>,
    msg: Option<String>,
    message: Option<String>,
}

impl ProviderErrorBody {
    fn into_message(self) -> Option<String> {
        self.error_description
            .or(self.msg)
            .or(self.message)
            .or(self.error)
    }
}

/// Check response status and parse JSON body.
async fn check_response_json<T: for<'de> Deserialize<'de>>(
    response: reqwest::Response,
) -> Result<T, StoreError> {
    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(classify_failure(status, &body));
    }

    response
        .json()
        .await
        .map_err(|e| StoreError::Provider(format!("JSON parse error: {}", e)))
}

fn classify_failure(status: reqwest::StatusCode, body: &str) -> StoreError {
    let message = serde_json::from_str::<ProviderErrorBody>(body)
        .ok()
        .and_then(ProviderErrorBody::into_message)
        .unwrap_or_else(|| format!("HTTP {}", status));

    match status.as_u16() {
        400 | 401 | 403 | 422 => StoreError::Credentials(message),
        429 => {
            tracing::warn!("Auth provider rate limit hit (429)");
            StoreError::Network(message)
        }
        s if s >= 500 => StoreError::Network(format!("HTTP {}: {}", status, message)),
        _ => StoreError::Provider(format!("HTTP {}: {}", status, message)),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SupabaseSessionStore - one session's worth of state
// ─────────────────────────────────────────────────────────────────────────────

/// Session store for a single browser session.
pub struct SupabaseSessionStore {
    client: SupabaseAuthClient,
    session: RwLock<Option<Session>>,
    events: broadcast::Sender<AuthChange>,
    /// Serializes refresh calls so a refresh token is never spent twice.
    refresh_lock: Mutex<()>,
}

impl SupabaseSessionStore {
    pub fn new(client: SupabaseAuthClient, session: Option<Session>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            client,
            session: RwLock::new(session),
            events,
            refresh_lock: Mutex::new(()),
        }
    }

    fn emit(&self, event: AuthChangeEvent, session: Option<Session>) {
        // No subscribers is fine.
        let _ = self.events.send(AuthChange { event, session });
    }
}

#[async_trait]
impl SessionStore for SupabaseSessionStore {
    async fn get_session(&self) -> Result<Option<Session>, StoreError> {
        let current = self.session.read().await.clone();
        match current {
            Some(session) if session.expires_within(TOKEN_REFRESH_MARGIN_SECS) => {
                tracing::debug!(user_id = %session.user.id, "Access token expiring, refreshing");
                self.refresh_session().await
            }
            other => Ok(other),
        }
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, StoreError> {
        let session = self.client.password_grant(email, password).await?;
        *self.session.write().await = Some(session.clone());
        self.emit(AuthChangeEvent::SignedIn, Some(session.clone()));
        Ok(session)
    }

    async fn sign_out(&self) -> Result<(), StoreError> {
        let Some(session) = self.session.write().await.take() else {
            return Ok(());
        };
        self.emit(AuthChangeEvent::SignedOut, None);
        self.client.logout(&session.access_token).await
    }

    async fn refresh_session(&self) -> Result<Option<Session>, StoreError> {
        let _guard = self.refresh_lock.lock().await;

        let refresh_token = self
            .session
            .read()
            .await
            .as_ref()
            .map(|s| s.refresh_token.clone())
            .filter(|t| !t.is_empty());

        let Some(refresh_token) = refresh_token else {
            return Ok(None);
        };

        match self.client.refresh_grant(&refresh_token).await {
            Ok(session) => {
                *self.session.write().await = Some(session.clone());
                self.emit(AuthChangeEvent::TokenRefreshed, Some(session.clone()));
                Ok(Some(session))
            }
            Err(StoreError::Credentials(reason)) => {
                tracing::info!(reason = %reason, "Refresh token rejected, clearing session");
                *self.session.write().await = None;
                self.emit(AuthChangeEvent::SignedOut, None);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthChange> {
        self.events.subscribe()
    }
}
