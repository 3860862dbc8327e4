// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - auth state, role resolution and login logic.

pub mod auth_context;
pub mod login;
pub mod role_fetch;
pub mod route_guard;
pub mod session_store;

pub use auth_context::{AuthContext, AuthOptions, AuthPhase, AuthSnapshot, RoleState, SignedIn};
pub use login::{LoginFlow, LoginForm, LoginOutcome};
pub use role_fetch::{RetryPolicy, RoleFetchError, RoleFetches};
pub use route_guard::{decide, GuardDecision, Requirement};
pub use session_store::{
    AuthChange, AuthChangeEvent, SessionStore, SessionStoreFactory, SupabaseAuthClient,
};
