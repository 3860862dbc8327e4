// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Shared test fixtures: in-memory auth provider and profile table.

#![allow(dead_code)]

use async_trait::async_trait;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use storefront_auth::config::Config;
use storefront_auth::db::ProfileStore;
use storefront_auth::error::StoreError;
use storefront_auth::middleware::auth::{Claims, TOKEN_AUDIENCE};
use storefront_auth::models::{Role, RoleLookup, Session, User};
use storefront_auth::routes::create_router;
use storefront_auth::services::{
    AuthChange, AuthChangeEvent, AuthContext, AuthOptions, RetryPolicy, RoleFetches, SessionStore,
    SessionStoreFactory,
};
use storefront_auth::time_utils::now_unix;
use storefront_auth::AppState;
use tokio::sync::broadcast;
use tokio::time::Instant;

pub const ADMIN_ID: &str = "6f1c2a4e-0000-4000-8000-00000000a001";
pub const ADMIN_EMAIL: &str = "owner@fixit.example";
pub const CUSTOMER_ID: &str = "6f1c2a4e-0000-4000-8000-00000000c001";
pub const CUSTOMER_EMAIL: &str = "customer@fixit.example";
pub const PASSWORD: &str = "correct horse";

/// Secret shared by `Config::test_default()` and the fake provider.
pub fn jwt_secret() -> Vec<u8> {
    Config::test_default().jwt_secret
}

/// Mint an access token the way the auth provider does.
pub fn mint_token(user_id: &str, email: &str, exp: i64) -> String {
    let claims = Claims {
        sub: user_id.to_string(),
        email: Some(email.to_string()),
        aud: TOKEN_AUDIENCE.to_string(),
        role: Some("authenticated".to_string()),
        exp,
        iat: now_unix(),
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(&jwt_secret()),
    )
    .expect("Failed to mint token")
}

pub fn session_for(user_id: &str, email: &str) -> Session {
    let expires_at = now_unix() + 3600;
    Session {
        access_token: mint_token(user_id, email, expires_at),
        refresh_token: format!("refresh-{user_id}"),
        expires_at,
        user: User {
            id: user_id.to_string(),
            email: Some(email.to_string()),
            email_confirmed_at: None,
        },
    }
}

/// Cookie header carrying a session.
pub fn session_cookie_header(session: &Session) -> String {
    format!(
        "sb-access-token={}; sb-refresh-token={}",
        session.access_token, session.refresh_token
    )
}

// ─── Fake auth provider ──────────────────────────────────────

#[derive(Default)]
struct FakeAuthState {
    /// email -> (password, user id)
    accounts: Mutex<HashMap<String, (String, String)>>,
    sign_in_delay: Mutex<Duration>,
    network_down: AtomicBool,
    /// Session reads that fail with a network error before succeeding.
    failing_reads: AtomicU32,
    session_reads: AtomicU32,
    reject_refresh: AtomicBool,
    sign_in_calls: AtomicU32,
    sign_out_calls: AtomicU32,
    refresh_calls: AtomicU32,
    token_serial: AtomicU64,
}

/// In-memory auth provider; hands out one session store per client.
#[derive(Clone, Default)]
pub struct FakeAuth {
    state: Arc<FakeAuthState>,
}

impl FakeAuth {
    pub fn new() -> Self {
        let auth = Self::default();
        auth.add_account(ADMIN_EMAIL, PASSWORD, ADMIN_ID);
        auth.add_account(CUSTOMER_EMAIL, PASSWORD, CUSTOMER_ID);
        auth
    }

    pub fn add_account(&self, email: &str, password: &str, user_id: &str) {
        self.state.accounts.lock().unwrap().insert(
            email.to_string(),
            (password.to_string(), user_id.to_string()),
        );
    }

    pub fn set_sign_in_delay(&self, delay: Duration) {
        *self.state.sign_in_delay.lock().unwrap() = delay;
    }

    pub fn set_network_down(&self, down: bool) {
        self.state.network_down.store(down, Ordering::SeqCst);
    }

    pub fn fail_next_session_reads(&self, count: u32) {
        self.state.failing_reads.store(count, Ordering::SeqCst);
    }

    pub fn session_reads(&self) -> u32 {
        self.state.session_reads.load(Ordering::SeqCst)
    }

    pub fn set_reject_refresh(&self, reject: bool) {
        self.state.reject_refresh.store(reject, Ordering::SeqCst);
    }

    pub fn sign_in_calls(&self) -> u32 {
        self.state.sign_in_calls.load(Ordering::SeqCst)
    }

    pub fn sign_out_calls(&self) -> u32 {
        self.state.sign_out_calls.load(Ordering::SeqCst)
    }

    pub fn refresh_calls(&self) -> u32 {
        self.state.refresh_calls.load(Ordering::SeqCst)
    }

    /// A fresh session with a token that differs from every earlier one.
    fn issue(&self, user_id: &str, email: &str) -> Session {
        let serial = self.state.token_serial.fetch_add(1, Ordering::SeqCst) as i64 + 1;
        let expires_at = now_unix() + 3600 + serial;
        Session {
            access_token: mint_token(user_id, email, expires_at),
            refresh_token: format!("refresh-{user_id}-{serial}"),
            expires_at,
            user: User {
                id: user_id.to_string(),
                email: Some(email.to_string()),
                email_confirmed_at: None,
            },
        }
    }

    pub fn store(&self, session: Option<Session>) -> Arc<FakeSessionStore> {
        let (events, _) = broadcast::channel(16);
        Arc::new(FakeSessionStore {
            auth: self.clone(),
            session: Mutex::new(session),
            events,
        })
    }
}

impl SessionStoreFactory for FakeAuth {
    fn session_store(&self, session: Option<Session>) -> Arc<dyn SessionStore> {
        self.store(session)
    }
}

pub struct FakeSessionStore {
    auth: FakeAuth,
    session: Mutex<Option<Session>>,
    events: broadcast::Sender<AuthChange>,
}

impl FakeSessionStore {
    fn emit(&self, event: AuthChangeEvent, session: Option<Session>) {
        let _ = self.events.send(AuthChange { event, session });
    }

    fn check_network(&self) -> Result<(), StoreError> {
        if self.auth.state.network_down.load(Ordering::SeqCst) {
            return Err(StoreError::Network("connection refused".to_string()));
        }
        Ok(())
    }

    pub fn current(&self) -> Option<Session> {
        self.session.lock().unwrap().clone()
    }
}

#[async_trait]
impl SessionStore for FakeSessionStore {
    async fn get_session(&self) -> Result<Option<Session>, StoreError> {
        self.auth.state.session_reads.fetch_add(1, Ordering::SeqCst);
        self.check_network()?;
        let failing = &self.auth.state.failing_reads;
        if failing
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(StoreError::Network("connection reset".to_string()));
        }
        Ok(self.current())
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, StoreError> {
        self.auth.state.sign_in_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.auth.state.sign_in_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.check_network()?;

        let account = self.auth.state.accounts.lock().unwrap().get(email).cloned();
        let user_id = match account {
            Some((expected, user_id)) if expected == password => user_id,
            _ => return Err(StoreError::Credentials("Invalid login credentials".to_string())),
        };

        let session = self.auth.issue(&user_id, email);
        *self.session.lock().unwrap() = Some(session.clone());
        self.emit(AuthChangeEvent::SignedIn, Some(session.clone()));
        Ok(session)
    }

    async fn sign_out(&self) -> Result<(), StoreError> {
        self.auth.state.sign_out_calls.fetch_add(1, Ordering::SeqCst);
        let had_session = self.session.lock().unwrap().take().is_some();
        if had_session {
            self.emit(AuthChangeEvent::SignedOut, None);
        }
        Ok(())
    }

    async fn refresh_session(&self) -> Result<Option<Session>, StoreError> {
        self.auth.state.refresh_calls.fetch_add(1, Ordering::SeqCst);
        self.check_network()?;

        let Some(current) = self.current() else {
            return Ok(None);
        };

        if self.auth.state.reject_refresh.load(Ordering::SeqCst) {
            *self.session.lock().unwrap() = None;
            self.emit(AuthChangeEvent::SignedOut, None);
            return Ok(None);
        }

        let email = current.user.email.clone().unwrap_or_default();
        let session = self.auth.issue(&current.user.id, &email);
        *self.session.lock().unwrap() = Some(session.clone());
        self.emit(AuthChangeEvent::TokenRefreshed, Some(session.clone()));
        Ok(Some(session))
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthChange> {
        self.events.subscribe()
    }
}

// ─── Fake profile table ──────────────────────────────────────

/// How the profile row for one user behaves.
#[derive(Debug, Clone)]
pub struct ProfileScript {
    pub role: Option<Role>,
    /// Row only exists this long after the script was installed.
    pub appears_after: Duration,
    /// The first N lookups fail with a network error.
    pub network_failures: u32,
    /// Every lookup takes this long.
    pub delay: Duration,
}

impl ProfileScript {
    pub fn with_role(role: Role) -> Self {
        Self {
            role: Some(role),
            appears_after: Duration::ZERO,
            network_failures: 0,
            delay: Duration::ZERO,
        }
    }

    pub fn without_role() -> Self {
        Self {
            role: None,
            ..Self::with_role(Role::User)
        }
    }

    pub fn appears_after(mut self, after: Duration) -> Self {
        self.appears_after = after;
        self
    }

    pub fn network_failures(mut self, failures: u32) -> Self {
        self.network_failures = failures;
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[derive(Default)]
pub struct FakeProfiles {
    rows: Mutex<HashMap<String, (ProfileScript, Instant)>>,
    calls: Mutex<HashMap<String, u32>>,
}

impl FakeProfiles {
    pub fn new() -> Arc<Self> {
        let profiles = Arc::new(Self::default());
        profiles.set(ADMIN_ID, ProfileScript::with_role(Role::Admin));
        profiles.set(CUSTOMER_ID, ProfileScript::with_role(Role::User));
        profiles
    }

    pub fn set(&self, user_id: &str, script: ProfileScript) {
        self.rows
            .lock()
            .unwrap()
            .insert(user_id.to_string(), (script, Instant::now()));
    }

    pub fn remove(&self, user_id: &str) {
        self.rows.lock().unwrap().remove(user_id);
    }

    pub fn calls(&self, user_id: &str) -> u32 {
        self.calls.lock().unwrap().get(user_id).copied().unwrap_or(0)
    }
}

#[async_trait]
impl ProfileStore for FakeProfiles {
    async fn select_role_by_user_id(&self, user_id: &str) -> Result<RoleLookup, StoreError> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            let count = calls.entry(user_id.to_string()).or_insert(0);
            *count += 1;
            *count
        };

        let row = self.rows.lock().unwrap().get(user_id).cloned();
        let Some((script, installed_at)) = row else {
            return Ok(RoleLookup::NotFound);
        };

        if !script.delay.is_zero() {
            tokio::time::sleep(script.delay).await;
        }
        if call <= script.network_failures {
            return Err(StoreError::Network("upstream timed out".to_string()));
        }
        if installed_at.elapsed() < script.appears_after {
            return Ok(RoleLookup::NotFound);
        }
        Ok(RoleLookup::Found(script.role))
    }
}

// ─── Contexts and apps ───────────────────────────────────────

pub fn fetches(profiles: &Arc<FakeProfiles>) -> Arc<RoleFetches> {
    RoleFetches::new(profiles.clone(), RetryPolicy::default())
}

/// Auth context over the fake provider, seeded with `session`.
pub fn context(auth: &FakeAuth, roles: &Arc<RoleFetches>, session: Option<Session>) -> AuthContext {
    AuthContext::new(
        auth.session_store(session),
        Arc::clone(roles),
        AuthOptions::default(),
    )
}

pub struct TestApp {
    pub router: axum::Router,
    pub state: Arc<AppState>,
    pub auth: FakeAuth,
    pub profiles: Arc<FakeProfiles>,
}

/// Create a test app with in-memory provider and profile table.
pub fn create_test_app() -> TestApp {
    create_test_app_with_frontend_url("http://localhost:3000")
}

pub fn create_test_app_with_frontend_url(frontend_url: &str) -> TestApp {
    let mut config = Config::test_default();
    config.frontend_url = frontend_url.to_string();

    let auth = FakeAuth::new();
    let profiles = FakeProfiles::new();
    let role_fetches = RoleFetches::new(profiles.clone(), config.retry_policy());

    let state = Arc::new(AppState {
        config,
        sessions: Arc::new(auth.clone()),
        role_fetches,
    });

    TestApp {
        router: create_router(state.clone()),
        state,
        auth,
        profiles,
    }
}
