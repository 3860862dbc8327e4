// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Data models for the application.

pub mod role;
pub mod session;

pub use role::{Role, RoleLookup};
pub use session::{Session, User};
