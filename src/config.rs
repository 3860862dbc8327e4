// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application configuration loaded from environment variables.

use crate::services::route_guard::path_is_under;
use crate::services::{AuthOptions, RetryPolicy};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Default cookie names written by the auth provider's cookie sync.
pub const ACCESS_TOKEN_COOKIE: &str = "sb-access-token";
pub const REFRESH_TOKEN_COOKIE: &str = "sb-refresh-token";

const DEFAULT_PROTECTED_PREFIXES: &str = "/admin,/account,/orders,/api";

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    // --- Environment Variables (non-sensitive) ---
    /// Supabase project URL (e.g. https://xyz.supabase.co)
    pub supabase_url: String,
    /// Public anon key, sent as `apikey` on every provider request
    pub supabase_anon_key: String,
    /// Frontend URL (CORS origin, cookie `Secure` flag)
    pub frontend_url: String,
    /// Server port
    pub port: u16,
    /// Path prefixes that require a session cookie
    pub protected_prefixes: Vec<String>,

    // --- Secrets ---
    /// Service role key for profile lookups (falls back to the anon key)
    pub supabase_service_key: Option<String>,
    /// JWT secret used by the provider to sign access tokens (raw bytes)
    pub jwt_secret: Vec<u8>,

    // --- Role resolution tuning ---
    /// Lookups allowed while the profile row does not exist yet
    pub role_fetch_max_attempts: u32,
    /// Retries after a network failure during a role lookup
    pub role_fetch_network_retries: u32,
    /// First backoff delay; doubles per attempt
    pub role_fetch_base_delay: Duration,
    /// Bounded wait for role resolution per round
    pub role_wait: Duration,
    /// Wait rounds before access is reported as unverifiable
    pub role_wait_rounds: u32,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let protected_prefixes = env::var("PROTECTED_PREFIXES")
            .unwrap_or_else(|_| DEFAULT_PROTECTED_PREFIXES.to_string());

        Ok(Self {
            supabase_url: env::var("SUPABASE_URL")
                .map(|v| v.trim().trim_end_matches('/').to_string())
                .map_err(|_| ConfigError::Missing("SUPABASE_URL"))?,
            supabase_anon_key: env::var("SUPABASE_ANON_KEY")
                .map(|v| v.trim().to_string())
                .map_err(|_| ConfigError::Missing("SUPABASE_ANON_KEY"))?,
            frontend_url: env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            port: parse_or("PORT", 8080)?,
            protected_prefixes: parse_prefixes(&protected_prefixes),

            supabase_service_key: env::var("SUPABASE_SERVICE_ROLE_KEY")
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty()),
            jwt_secret: env::var("SUPABASE_JWT_SECRET")
                .map_err(|_| ConfigError::Missing("SUPABASE_JWT_SECRET"))?
                .into_bytes(),

            role_fetch_max_attempts: parse_or("ROLE_FETCH_MAX_ATTEMPTS", 5)?,
            role_fetch_network_retries: parse_or("ROLE_FETCH_NETWORK_RETRIES", 2)?,
            role_fetch_base_delay: Duration::from_millis(parse_or(
                "ROLE_FETCH_BASE_DELAY_MS",
                250,
            )?),
            role_wait: Duration::from_secs(parse_or("ROLE_WAIT_SECS", 3)?),
            role_wait_rounds: parse_or("ROLE_WAIT_ROUNDS", 2)?,
        })
    }

    /// Config for tests only.
    pub fn test_default() -> Self {
        Self {
            supabase_url: "http://localhost:54321".to_string(),
            supabase_anon_key: "test_anon_key".to_string(),
            frontend_url: "http://localhost:3000".to_string(),
            port: 8080,
            protected_prefixes: parse_prefixes(DEFAULT_PROTECTED_PREFIXES),
            supabase_service_key: None,
            jwt_secret: b"test_jwt_secret_32_bytes_minimum".to_vec(),
            role_fetch_max_attempts: 5,
            role_fetch_network_retries: 2,
            role_fetch_base_delay: Duration::from_millis(250),
            role_wait: Duration::from_secs(3),
            role_wait_rounds: 2,
        }
    }

    /// Whether `path` needs a session at the edge.
    ///
    /// Prefixes match on segment boundaries: `/admin` covers `/admin` and
    /// `/admin/orders` but not `/administrator`.
    pub fn is_protected(&self, path: &str) -> bool {
        self.protected_prefixes
            .iter()
            .any(|prefix| path_is_under(path, prefix))
    }

    /// Cookies get the `Secure` attribute when the frontend is served over https.
    pub fn secure_cookies(&self) -> bool {
        self.frontend_url.starts_with("https://")
    }

    /// Key used for profile table lookups.
    pub fn profile_api_key(&self) -> &str {
        self.supabase_service_key
            .as_deref()
            .unwrap_or(&self.supabase_anon_key)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.role_fetch_max_attempts.max(1),
            network_retries: self.role_fetch_network_retries,
            base_delay: self.role_fetch_base_delay,
            ..RetryPolicy::default()
        }
    }

    pub fn auth_options(&self) -> AuthOptions {
        AuthOptions {
            role_wait: self.role_wait,
            role_wait_rounds: self.role_wait_rounds.max(1),
        }
    }
}

fn parse_or<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(name)),
        Err(_) => Ok(default),
    }
}

fn parse_prefixes(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|p| p.trim().trim_end_matches('/'))
        .filter(|p| p.starts_with('/') && p.len() > 1)
        .map(str::to_string)
        .collect()
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),
}
