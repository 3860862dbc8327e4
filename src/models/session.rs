// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Session and user models issued by the auth provider.

use crate::time_utils::now_unix;
use serde::{Deserialize, Serialize};

/// Authenticated identity as reported by the auth provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Provider user ID (UUID), also the primary key of the profile row
    pub id: String,
    /// Email address
    #[serde(default)]
    pub email: Option<String>,
    /// When the email was confirmed (RFC 3339), if ever
    #[serde(default)]
    pub email_confirmed_at: Option<String>,
}

/// Provider-issued credential bundle.
///
/// The auth provider owns and refreshes sessions; everything else holds a
/// read-only copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    /// Access token expiry (Unix timestamp, seconds)
    pub expires_at: i64,
    pub user: User,
}

impl Session {
    /// True if the access token expires within `margin_secs` from now.
    pub fn expires_within(&self, margin_secs: i64) -> bool {
        now_unix() + margin_secs >= self.expires_at
    }

    /// Seconds of validity left on the access token (zero once expired).
    pub fn remaining_secs(&self) -> i64 {
        (self.expires_at - now_unix()).max(0)
    }
}
