// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Role lookups with bounded retry and per-user request sharing.
//!
//! A profile row is created asynchronously after sign-up, so "no row yet"
//! is polled with backoff instead of being read as "no role". Network
//! failures get a smaller retry budget. Concurrent requests for the same
//! user join the lookup already in flight instead of issuing a duplicate.

use crate::db::ProfileStore;
use crate::error::{AuthError, AuthErrorKind, StoreError};
use crate::models::{Role, RoleLookup};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Backoff policy for role lookups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total lookups allowed while the profile row is missing.
    pub max_attempts: u32,
    /// Extra attempts allowed after network failures.
    pub network_retries: u32,
    /// Delay after the first attempt; doubles each attempt.
    pub base_delay: Duration,
    /// Upper bound for a single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            network_retries: 2,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after `attempt` (1-based) before the next lookup.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Why a role could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoleFetchError {
    #[error("no profile row after {attempts} lookups")]
    ProfileMissing { attempts: u32 },

    #[error("role lookup failed after {attempts} attempts: {last_error}")]
    Store { attempts: u32, last_error: StoreError },
}

impl From<RoleFetchError> for AuthError {
    fn from(err: RoleFetchError) -> Self {
        match err {
            RoleFetchError::ProfileMissing { .. } => AuthError::unverified_access(),
            RoleFetchError::Store {
                last_error: StoreError::Network(_),
                ..
            } => AuthError::new(
                AuthErrorKind::Network,
                "Could not reach the account service. Please retry.",
            ),
            RoleFetchError::Store { last_error, .. } => {
                tracing::error!(error = %last_error, "Role lookup rejected");
                AuthError::new(AuthErrorKind::Provider, "Could not load your account.")
            }
        }
    }
}

/// `Ok(None)` means the profile exists without a role.
pub type RoleFetchResult = Result<Option<Role>, RoleFetchError>;

/// Handle to a (possibly shared) role lookup.
pub type RoleFetch = Shared<BoxFuture<'static, RoleFetchResult>>;

/// Look up a user's role, polling while the profile row does not exist and
/// retrying transient failures.
pub async fn resolve_role(
    profiles: &dyn ProfileStore,
    policy: &RetryPolicy,
    user_id: &str,
) -> RoleFetchResult {
    let mut attempt = 0u32;
    let mut network_failures = 0u32;

    loop {
        attempt += 1;

        match profiles.select_role_by_user_id(user_id).await {
            Ok(RoleLookup::Found(role)) => {
                tracing::debug!(user_id, attempt, role = ?role, "Role resolved");
                return Ok(role);
            }
            Ok(RoleLookup::NotFound) => {
                if attempt >= policy.max_attempts {
                    tracing::warn!(user_id, attempt, "Profile row still missing, giving up");
                    return Err(RoleFetchError::ProfileMissing { attempts: attempt });
                }
                tracing::debug!(user_id, attempt, "Profile row not found yet, polling again");
            }
            Err(e) if e.is_transient() => {
                network_failures += 1;
                if network_failures > policy.network_retries {
                    tracing::warn!(user_id, attempt, error = %e, "Role lookup failed, giving up");
                    return Err(RoleFetchError::Store {
                        attempts: attempt,
                        last_error: e,
                    });
                }
                tracing::warn!(user_id, attempt, error = %e, "Role lookup failed, retrying");
            }
            Err(e) => {
                return Err(RoleFetchError::Store {
                    attempts: attempt,
                    last_error: e,
                });
            }
        }

        tokio::time::sleep(policy.delay_for(attempt)).await;
    }
}

/// Registry of in-flight role lookups, keyed by user ID.
///
/// Shared by every auth context in the process. A lookup removes itself when
/// it completes; callers holding the handle still get the result.
pub struct RoleFetches {
    profiles: Arc<dyn ProfileStore>,
    policy: RetryPolicy,
    in_flight: DashMap<String, (u64, RoleFetch)>,
    next_id: AtomicU64,
}

impl RoleFetches {
    pub fn new(profiles: Arc<dyn ProfileStore>, policy: RetryPolicy) -> Arc<Self> {
        Arc::new(Self {
            profiles,
            policy,
            in_flight: DashMap::new(),
            next_id: AtomicU64::new(0),
        })
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Start a lookup for `user_id`, or join the one already running.
    ///
    /// The returned future must be polled (the auth context spawns it) for
    /// the lookup to make progress.
    pub fn fetch(self: &Arc<Self>, user_id: &str) -> RoleFetch {
        match self.in_flight.entry(user_id.to_string()) {
            Entry::Occupied(entry) => {
                tracing::debug!(user_id, "Joining in-flight role lookup");
                entry.get().1.clone()
            }
            Entry::Vacant(entry) => {
                let fetch_id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let registry = Arc::clone(self);
                let owned_id = user_id.to_string();

                let fetch = async move {
                    let result =
                        resolve_role(registry.profiles.as_ref(), &registry.policy, &owned_id).await;
                    registry
                        .in_flight
                        .remove_if(&owned_id, |_, (id, _)| *id == fetch_id);
                    result
                }
                .boxed()
                .shared();

                entry.insert((fetch_id, fetch.clone()));
                fetch
            }
        }
    }

    /// Whether a lookup for `user_id` is currently running.
    pub fn is_in_flight(&self, user_id: &str) -> bool {
        self.in_flight.contains_key(user_id)
    }
}
