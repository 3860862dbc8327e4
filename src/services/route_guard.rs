// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Page-level route guard.
//!
//! The one place that turns auth state into "render / wait / redirect".
//! While the session is loading or a role lookup is pending the answer is
//! always `Loading`; redirects only happen on settled state.

use crate::error::AuthError;
use crate::models::Role;
use crate::services::auth_context::{AuthPhase, AuthSnapshot};

pub const HOME_PATH: &str = "/";
pub const LOGIN_PATH: &str = "/login";
pub const ADMIN_PATH: &str = "/admin";

/// What a page needs before it may render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requirement {
    Public,
    Authenticated,
    Role(Role),
}

impl Requirement {
    /// Requirement for a page path.
    pub fn for_path(path: &str) -> Self {
        if path_is_under(path, ADMIN_PATH) {
            Requirement::Role(Role::Admin)
        } else if path_is_under(path, "/account") || path_is_under(path, "/orders") {
            Requirement::Authenticated
        } else {
            Requirement::Public
        }
    }
}

/// Outcome of a guard check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    /// Show a loading placeholder.
    Loading,
    /// Not signed in.
    RedirectToLogin,
    /// Signed in but not allowed here.
    RedirectHome,
    Render,
    /// Access could not be verified; offer a retry, do not redirect.
    Unverified(AuthError),
}

impl GuardDecision {
    pub fn is_redirect(&self) -> bool {
        matches!(
            self,
            GuardDecision::RedirectToLogin | GuardDecision::RedirectHome
        )
    }
}

/// Decide what to do with a page given the current auth state.
pub fn decide(snapshot: &AuthSnapshot, requirement: &Requirement) -> GuardDecision {
    if *requirement == Requirement::Public {
        return GuardDecision::Render;
    }

    match snapshot.phase {
        AuthPhase::Initializing | AuthPhase::Authenticating => GuardDecision::Loading,
        AuthPhase::Unauthenticated => GuardDecision::RedirectToLogin,
        AuthPhase::RolePending => match requirement {
            Requirement::Authenticated => GuardDecision::Render,
            _ => GuardDecision::Loading,
        },
        AuthPhase::Resolved => match requirement {
            Requirement::Role(required) if snapshot.role() != Some(required) => {
                tracing::debug!(
                    user_id = snapshot.user_id().unwrap_or("<none>"),
                    required = %required,
                    "Role does not grant access"
                );
                GuardDecision::RedirectHome
            }
            _ => GuardDecision::Render,
        },
        AuthPhase::AccessUnverified => match requirement {
            Requirement::Authenticated if snapshot.user.is_some() => GuardDecision::Render,
            _ => GuardDecision::Unverified(
                snapshot
                    .error
                    .clone()
                    .unwrap_or_else(AuthError::unverified_access),
            ),
        },
    }
}

/// Login URL that brings the user back to `path` afterwards.
pub fn login_url(path: &str) -> String {
    // `/` is legal in a query component; keeping it readable.
    let encoded = urlencoding::encode(path).replace("%2F", "/");
    format!("{}?redirectTo={}", LOGIN_PATH, encoded)
}

/// Segment-aware prefix match: `/admin` covers `/admin/x` but not `/admins`.
pub fn path_is_under(path: &str, prefix: &str) -> bool {
    path.strip_prefix(prefix)
        .map(|rest| rest.is_empty() || rest.starts_with('/'))
        .unwrap_or(false)
}
