// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! PostgREST client for the profile table.

use crate::db::{tables, ProfileStore};
use crate::error::StoreError;
use crate::models::{Role, RoleLookup};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Row shape returned by `select=role`.
#[derive(Debug, Deserialize)]
struct ProfileRoleRow {
    role: Option<String>,
}

/// Profile table client.
#[derive(Clone)]
pub struct PostgrestProfiles {
    http: reqwest::Client,
    rest_url: String,
    api_key: String,
}

impl PostgrestProfiles {
    /// Create a client for `{supabase_url}/rest/v1`.
    pub fn new(http: reqwest::Client, supabase_url: &str, api_key: &str) -> Self {
        Self {
            http,
            rest_url: format!("{}/rest/v1", supabase_url.trim_end_matches('/')),
            api_key: api_key.to_string(),
        }
    }
}

#[async_trait]
impl ProfileStore for PostgrestProfiles {
    async fn select_role_by_user_id(&self, user_id: &str) -> Result<RoleLookup, StoreError> {
        let url = format!("{}/{}", self.rest_url, tables::PROFILES);
        let id_filter = format!("eq.{}", user_id);

        let response = self
            .http
            .get(&url)
            .timeout(REQUEST_TIMEOUT)
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .query(&[("id", id_filter.as_str()), ("select", "role"), ("limit", "1")])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_failure(status, body));
        }

        let rows: Vec<ProfileRoleRow> = response
            .json()
            .await
            .map_err(|e| StoreError::Provider(format!("Profile row parse error: {}", e)))?;

        Ok(lookup_from_rows(rows))
    }
}

fn lookup_from_rows(rows: Vec<ProfileRoleRow>) -> RoleLookup {
    match rows.into_iter().next() {
        None => RoleLookup::NotFound,
        Some(row) => RoleLookup::Found(
            row.role
                .filter(|r| !r.trim().is_empty())
                .map(|r| Role::parse(&r)),
        ),
    }
}

fn classify_failure(status: reqwest::StatusCode, body: String) -> StoreError {
    if status.as_u16() == 429 || status.is_server_error() {
        tracing::warn!(status = %status, "Profile lookup failed (retryable)");
        return StoreError::Network(format!("HTTP {}", status));
    }
    if status.as_u16() == 401 || status.as_u16() == 403 {
        return StoreError::Credentials(format!("HTTP {}: {}", status, body));
    }
    StoreError::Provider(format!("HTTP {}: {}", status, body))
}
