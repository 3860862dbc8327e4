// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Storefront auth gate: session and role resolution for the repair shop
//! storefront.
//!
//! This crate owns the client-side auth state machine (session tracking and
//! role lookup against the profile table), the page-level route guard, the
//! login flow, and the edge middleware that gates protected pages on the
//! session cookie before any page code runs.

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod time_utils;

use config::Config;
use models::Session;
use services::{AuthContext, RoleFetches, SessionStoreFactory};
use std::sync::Arc;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub sessions: Arc<dyn SessionStoreFactory>,
    pub role_fetches: Arc<RoleFetches>,
}

impl AppState {
    /// Build a fresh auth context for one request, seeded with the session
    /// recovered from the request cookies (if any).
    pub fn auth_context(&self, session: Option<Session>) -> AuthContext {
        AuthContext::new(
            self.sessions.session_store(session),
            Arc::clone(&self.role_fetches),
            self.config.auth_options(),
        )
    }
}
