// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Auth context: the single owner of session and role state.
//!
//! ```text
//! Initializing ──► Unauthenticated ──sign_in──► Authenticating
//!      │                 ▲                           │
//!      │                 │ sign_out / no session     │ ok
//!      ▼                 │                           ▼
//!  RolePending ◄─────────┴───────────────────── RolePending
//!      │
//!      ├─ role found ──────────────► Resolved
//!      └─ retries / wait exhausted ─► AccessUnverified ──retry──► RolePending
//! ```
//!
//! Every snapshot carries an epoch that is bumped whenever the identity
//! changes. A role lookup result is applied only if its epoch and user ID
//! still match, so a response for a signed-out (or replaced) user is dropped.

use crate::error::AuthError;
use crate::models::{Role, Session, User};
use crate::services::role_fetch::{RoleFetchResult, RoleFetches};
use crate::services::session_store::{AuthChange, AuthChangeEvent, SessionStore};
use serde::Serialize;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::AbortHandle;

/// Where the auth state machine currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthPhase {
    Initializing,
    Authenticating,
    Unauthenticated,
    RolePending,
    Resolved,
    AccessUnverified,
}

/// Role as known to the auth context.
///
/// `Unknown` is "not resolved yet", never "not an admin".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleState {
    Unknown,
    /// Resolved from the profile row; `None` if the row has no role.
    Resolved(Option<Role>),
}

/// Point-in-time view of the auth state, as handed to guards and pages.
#[derive(Debug, Clone)]
pub struct AuthSnapshot {
    pub phase: AuthPhase,
    pub user: Option<User>,
    pub session: Option<Session>,
    pub role: RoleState,
    pub error: Option<AuthError>,
    epoch: u64,
}

impl AuthSnapshot {
    fn initial() -> Self {
        Self {
            phase: AuthPhase::Initializing,
            user: None,
            session: None,
            role: RoleState::Unknown,
            error: None,
            epoch: 0,
        }
    }

    /// Snapshot not tied to any context (no session, no error).
    pub fn from_parts(phase: AuthPhase, user: Option<User>, role: RoleState) -> Self {
        Self {
            phase,
            user,
            role,
            ..Self::initial()
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(
            self.phase,
            AuthPhase::Initializing | AuthPhase::Authenticating
        )
    }

    pub fn is_fetching_role(&self) -> bool {
        self.phase == AuthPhase::RolePending
    }

    /// Neither loading nor waiting on a role.
    pub fn is_settled(&self) -> bool {
        !self.is_loading() && !self.is_fetching_role()
    }

    /// The resolved role, if any.
    pub fn role(&self) -> Option<&Role> {
        match &self.role {
            RoleState::Resolved(Some(role)) => Some(role),
            _ => None,
        }
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user.as_ref().map(|u| u.id.as_str())
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    fn clear_identity(&mut self) {
        self.epoch += 1;
        self.user = None;
        self.session = None;
        self.role = RoleState::Unknown;
        self.error = None;
    }
}

/// Bounds for waiting on role resolution.
#[derive(Debug, Clone)]
pub struct AuthOptions {
    /// How long one wait round lasts.
    pub role_wait: Duration,
    /// Rounds before access is reported as unverifiable.
    pub role_wait_rounds: u32,
}

impl Default for AuthOptions {
    fn default() -> Self {
        Self {
            role_wait: Duration::from_secs(3),
            role_wait_rounds: 2,
        }
    }
}

/// Successful sign-in.
#[derive(Debug, Clone)]
pub struct SignedIn {
    pub user: User,
    pub session: Session,
}

/// State shared with the event listener and role lookup tasks.
struct Core {
    store: Arc<dyn SessionStore>,
    roles: Arc<RoleFetches>,
    state: watch::Sender<AuthSnapshot>,
}

impl Core {
    /// Apply a session (or its absence) reported by the store.
    ///
    /// A session for the user we already track keeps the role unless
    /// `refetch_role` is set; anything else starts a new epoch and a lookup.
    fn apply_session(self: &Arc<Self>, session: Option<Session>, refetch_role: bool) {
        let mut start_fetch = None;

        self.state.send_if_modified(|s| match session {
            None => {
                if s.phase == AuthPhase::Unauthenticated && s.user.is_none() {
                    return false;
                }
                s.clear_identity();
                s.phase = AuthPhase::Unauthenticated;
                true
            }
            Some(session) => {
                let same_user = s.user_id() == Some(session.user.id.as_str());
                let keep_role = same_user
                    && !refetch_role
                    && matches!(s.phase, AuthPhase::RolePending | AuthPhase::Resolved);

                s.user = Some(session.user.clone());
                s.session = Some(session);

                if !keep_role {
                    s.epoch += 1;
                    s.phase = AuthPhase::RolePending;
                    s.role = RoleState::Unknown;
                    s.error = None;
                    start_fetch = s.user_id().map(|id| (s.epoch, id.to_string()));
                }
                true
            }
        });

        if let Some((epoch, user_id)) = start_fetch {
            self.spawn_role_fetch(epoch, user_id);
        }
    }

    fn handle_change(self: &Arc<Self>, change: AuthChange) {
        tracing::debug!(event = ?change.event, "Auth state change");
        match change.event {
            AuthChangeEvent::SignedOut => self.apply_session(None, false),
            AuthChangeEvent::SignedIn
            | AuthChangeEvent::TokenRefreshed
            | AuthChangeEvent::UserUpdated => self.apply_session(change.session, false),
        }
    }

    /// Re-read the session from the store (after init or a lagged listener).
    ///
    /// Transient failures, including a failed automatic token refresh, get
    /// the same small retry budget as role lookups.
    async fn sync_from_store(self: &Arc<Self>) {
        let policy = self.roles.policy().clone();
        let mut attempt = 0;
        let result = loop {
            attempt += 1;
            match self.store.get_session().await {
                Err(e) if e.is_transient() && attempt <= policy.network_retries => {
                    tracing::warn!(attempt, error = %e, "Session read failed, retrying");
                    tokio::time::sleep(policy.delay_for(attempt)).await;
                }
                other => break other,
            }
        };

        match result {
            Ok(session) => self.apply_session(session, false),
            Err(e) => {
                let err = AuthError::from(e);
                self.state.send_modify(|s| {
                    if s.is_loading() {
                        // No identity to fall back on; the guard shows a retry.
                        s.phase = AuthPhase::AccessUnverified;
                    }
                    s.error = Some(err);
                });
            }
        }
    }

    /// Drive the (possibly shared) lookup for `user_id` and apply its result.
    fn spawn_role_fetch(self: &Arc<Self>, epoch: u64, user_id: String) {
        let fetch = self.roles.fetch(&user_id);
        let core = Arc::clone(self);
        tokio::spawn(async move {
            let result = fetch.await;
            core.apply_role(epoch, &user_id, result);
        });
    }

    fn apply_role(&self, epoch: u64, user_id: &str, result: RoleFetchResult) {
        let applied = self.state.send_if_modified(|s| {
            if s.epoch != epoch || s.user_id() != Some(user_id) {
                return false;
            }
            if !matches!(
                s.phase,
                AuthPhase::RolePending | AuthPhase::AccessUnverified
            ) {
                return false;
            }
            match result {
                Ok(role) => {
                    tracing::info!(user_id, role = ?role, "Role resolved");
                    s.phase = AuthPhase::Resolved;
                    s.role = RoleState::Resolved(role);
                    s.error = None;
                }
                Err(e) => {
                    tracing::warn!(user_id, error = %e, "Role could not be resolved");
                    s.phase = AuthPhase::AccessUnverified;
                    s.role = RoleState::Unknown;
                    s.error = Some(e.into());
                }
            }
            true
        });

        if !applied {
            tracing::debug!(user_id, epoch, "Discarded stale role result");
        }
    }

    /// Re-attempt the lookup for the current user if it is still pending.
    fn refetch_pending(self: &Arc<Self>) {
        let pending = {
            let s = self.state.borrow();
            match (s.phase, s.user_id()) {
                (AuthPhase::RolePending, Some(id)) => Some((s.epoch, id.to_string())),
                _ => None,
            }
        };
        if let Some((epoch, user_id)) = pending {
            self.spawn_role_fetch(epoch, user_id);
        }
    }

    fn mark_unverified(&self, epoch: u64) {
        self.state.send_if_modified(|s| {
            if s.epoch != epoch || s.phase != AuthPhase::RolePending {
                return false;
            }
            s.phase = AuthPhase::AccessUnverified;
            s.error = Some(AuthError::unverified_access());
            true
        });
    }
}

/// Owned auth state for one client (a browser session, or one request on
/// the server).
pub struct AuthContext {
    core: Arc<Core>,
    options: AuthOptions,
    listener: OnceLock<AbortHandle>,
}

impl AuthContext {
    pub fn new(
        store: Arc<dyn SessionStore>,
        roles: Arc<RoleFetches>,
        options: AuthOptions,
    ) -> Self {
        let (state, _) = watch::channel(AuthSnapshot::initial());
        Self {
            core: Arc::new(Core {
                store,
                roles,
                state,
            }),
            options,
            listener: OnceLock::new(),
        }
    }

    /// Current state.
    pub fn snapshot(&self) -> AuthSnapshot {
        self.core.state.borrow().clone()
    }

    /// Receive every state change.
    pub fn subscribe(&self) -> watch::Receiver<AuthSnapshot> {
        self.core.state.subscribe()
    }

    /// Subscribe to store events, then read the current session once.
    ///
    /// Calling this again only returns the current snapshot.
    pub async fn initialize(&self) -> AuthSnapshot {
        let mut events = self.core.store.subscribe();
        let core = Arc::clone(&self.core);
        let listener = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(change) => core.handle_change(change),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Auth event listener lagged, resyncing");
                        core.sync_from_store().await;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        if self.listener.set(listener.abort_handle()).is_err() {
            listener.abort();
            return self.snapshot();
        }

        self.core.sync_from_store().await;
        self.snapshot()
    }

    /// Sign in with email and password.
    ///
    /// Resolves only once the provider has answered. Does not redirect;
    /// callers react to the resulting state (or use `LoginFlow`).
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<SignedIn, AuthError> {
        self.core.state.send_modify(|s| {
            if s.user.is_some() {
                // Switching accounts: whatever was in flight for the old user is stale.
                s.clear_identity();
            }
            s.phase = AuthPhase::Authenticating;
            s.error = None;
        });

        match self.core.store.sign_in_with_password(email, password).await {
            Ok(session) => {
                tracing::info!(user_id = %session.user.id, "Signed in");
                self.core.apply_session(Some(session.clone()), false);
                Ok(SignedIn {
                    user: session.user.clone(),
                    session,
                })
            }
            Err(e) => {
                let err = AuthError::from(e);
                tracing::info!(kind = ?err.kind, "Sign-in failed");
                self.core.state.send_modify(|s| {
                    if s.phase == AuthPhase::Authenticating {
                        s.clear_identity();
                        s.phase = AuthPhase::Unauthenticated;
                    }
                    s.error = Some(err.clone());
                });
                Err(err)
            }
        }
    }

    /// Sign out. Local state is cleared even if the provider call fails.
    pub async fn sign_out(&self) -> Result<(), AuthError> {
        self.core.apply_session(None, false);
        self.core.store.sign_out().await.map_err(|e| {
            tracing::warn!(error = %e, "Provider sign-out failed");
            AuthError::from(e)
        })
    }

    /// Force a single session refresh and re-fetch the role.
    pub async fn refresh_session(&self) -> Result<Option<Session>, AuthError> {
        match self.core.store.refresh_session().await {
            Ok(Some(session)) => {
                self.core.apply_session(Some(session.clone()), true);
                Ok(Some(session))
            }
            Ok(None) => {
                self.core.apply_session(None, false);
                Ok(None)
            }
            Err(e) => Err(AuthError::from(e)),
        }
    }

    /// Wait (bounded) until the role is resolved or clearly unavailable.
    ///
    /// Each round waits `role_wait`; between rounds the lookup is re-attempted
    /// (joining it if still running). After the last round a pending role
    /// becomes `AccessUnverified`. A role is never assumed.
    pub async fn wait_for_role(&self) -> AuthSnapshot {
        let mut rx = self.core.state.subscribe();
        let rounds = self.options.role_wait_rounds.max(1);

        for round in 1..=rounds {
            let waited =
                tokio::time::timeout(self.options.role_wait, rx.wait_for(AuthSnapshot::is_settled))
                    .await;

            match waited {
                Ok(Ok(snapshot)) => return (*snapshot).clone(),
                Ok(Err(_)) => break,
                Err(_) => {
                    let current = self.snapshot();
                    tracing::warn!(round, phase = ?current.phase, "Role still unresolved after wait");
                    if round < rounds {
                        self.core.refetch_pending();
                    } else {
                        self.core.mark_unverified(current.epoch);
                    }
                }
            }
        }

        self.snapshot()
    }

    /// The "retry" affordance for an unverified state.
    pub async fn retry(&self) -> AuthSnapshot {
        let mut start_fetch = None;
        self.core.state.send_if_modified(|s| {
            if s.phase != AuthPhase::AccessUnverified {
                return false;
            }
            let Some(user_id) = s.user_id().map(str::to_string) else {
                return false;
            };
            s.phase = AuthPhase::RolePending;
            s.error = None;
            start_fetch = Some((s.epoch, user_id));
            true
        });

        match start_fetch {
            Some((epoch, user_id)) => self.core.spawn_role_fetch(epoch, user_id),
            // Unverified before any session was read: start over from the store.
            None if self.snapshot().phase == AuthPhase::AccessUnverified => {
                self.core.sync_from_store().await;
            }
            None => {}
        }

        self.snapshot()
    }
}

impl Drop for AuthContext {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.get() {
            listener.abort();
        }
    }
}
