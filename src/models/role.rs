// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application roles stored on the profile row.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Authorization tag from the `profiles.role` column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Role {
    Admin,
    User,
    /// Any role value this service does not know about.
    Other(String),
}

impl Role {
    pub fn parse(value: &str) -> Self {
        match value.trim() {
            "admin" => Role::Admin,
            "user" => Role::User,
            other => Role::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Role::Admin => "admin",
            Role::User => "user",
            Role::Other(value) => value,
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Role::Admin)
    }
}

impl From<String> for Role {
    fn from(value: String) -> Self {
        Role::parse(&value)
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        role.as_str().to_string()
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a single-row role lookup.
///
/// `NotFound` means the profile row does not exist (yet); it is not the same
/// thing as a row whose role column is null, which is `Found(None)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleLookup {
    NotFound,
    Found(Option<Role>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_roles() {
        assert_eq!(Role::parse("admin"), Role::Admin);
        assert_eq!(Role::parse(" user "), Role::User);
        assert_eq!(Role::parse("technician"), Role::Other("technician".into()));
    }

    #[test]
    fn test_role_serializes_as_plain_string() {
        let json = serde_json::to_string(&Role::Admin).unwrap();
        assert_eq!(json, "\"admin\"");

        let role: Role = serde_json::from_str("\"user\"").unwrap();
        assert_eq!(role, Role::User);
    }
}
