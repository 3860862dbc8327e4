// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Database layer (profile table behind PostgREST).

pub mod postgrest;

pub use postgrest::PostgrestProfiles;

use crate::error::StoreError;
use crate::models::RoleLookup;
use async_trait::async_trait;

/// Table names as constants.
pub mod tables {
    /// One row per user, keyed by the auth user ID; carries `role`
    pub const PROFILES: &str = "profiles";
}

/// Read access to the profile table.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Single-row role lookup.
    ///
    /// `Ok(RoleLookup::NotFound)` is a valid answer (the row is created
    /// asynchronously after sign-up) and must stay distinct from `Err`.
    async fn select_role_by_user_id(&self, user_id: &str) -> Result<RoleLookup, StoreError>;
}
