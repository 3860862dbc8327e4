// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Login flow: sign in, wait for the role, then pick where to go.

use crate::error::{AuthError, AuthErrorKind};
use crate::models::{Role, Session};
use crate::services::auth_context::{AuthContext, AuthPhase};
use crate::services::route_guard::{
    path_is_under, Requirement, ADMIN_PATH, HOME_PATH, LOGIN_PATH,
};
use serde::Deserialize;
use validator::{Validate, ValidationErrors};

/// Login form as posted by the storefront.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct LoginForm {
    #[validate(email(message = "Enter a valid email address"))]
    pub email: String,
    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
    /// Page the user was bounced from, if any.
    #[serde(default, alias = "redirectTo")]
    pub redirect_to: Option<String>,
}

/// How a login attempt ended (failures are `Err(AuthError)`).
#[derive(Debug, Clone)]
pub enum LoginOutcome {
    /// Signed in and the role is known.
    Redirect {
        to: String,
        session: Session,
        role: Option<Role>,
    },
    /// Signed in, but the role could not be verified in time. No redirect.
    Unverified { session: Session, error: AuthError },
}

/// Drives one login attempt against an auth context.
pub struct LoginFlow<'a> {
    context: &'a AuthContext,
}

impl<'a> LoginFlow<'a> {
    pub fn new(context: &'a AuthContext) -> Self {
        Self { context }
    }

    pub async fn submit(&self, form: &LoginForm) -> Result<LoginOutcome, AuthError> {
        form.validate()
            .map_err(|e| AuthError::new(AuthErrorKind::InvalidInput, first_message(&e)))?;

        let signed_in = self
            .context
            .sign_in(form.email.trim(), &form.password)
            .await?;

        let snapshot = self.context.wait_for_role().await;

        match snapshot.phase {
            AuthPhase::Resolved => {
                let role = snapshot.role().cloned();
                let to = redirect_target(form.redirect_to.as_deref(), role.as_ref());
                tracing::info!(
                    user_id = %signed_in.user.id,
                    role = ?role,
                    redirect = %to,
                    "Login complete"
                );
                Ok(LoginOutcome::Redirect {
                    to,
                    session: snapshot.session.unwrap_or(signed_in.session),
                    role,
                })
            }
            AuthPhase::Unauthenticated => Err(AuthError::new(
                AuthErrorKind::Credential,
                "Your session ended. Please sign in again.",
            )),
            _ => Ok(LoginOutcome::Unverified {
                session: snapshot.session.unwrap_or(signed_in.session),
                error: snapshot.error.unwrap_or_else(AuthError::unverified_access),
            }),
        }
    }
}

/// Keep only same-site relative paths, and never bounce back to login.
pub fn sanitize_redirect(raw: Option<&str>) -> Option<String> {
    let path = raw?.trim();
    // Browsers drop tabs and newlines inside URLs, so "/\t/host" becomes "//host".
    if !path.chars().all(|c| c.is_ascii_graphic()) {
        return None;
    }
    if !path.starts_with('/')
        || path.starts_with("//")
        || path.contains('\\')
        || path.contains("://")
        || path_is_under(path, LOGIN_PATH)
    {
        return None;
    }
    Some(path.to_string())
}

/// Where to send a freshly signed-in user.
///
/// The requested page wins when the role allows it; otherwise admins land on
/// the dashboard and everybody else on the storefront.
pub fn redirect_target(requested: Option<&str>, role: Option<&Role>) -> String {
    if let Some(path) = sanitize_redirect(requested) {
        match Requirement::for_path(&path) {
            Requirement::Role(required) if role != Some(&required) => {}
            _ => return path,
        }
    }

    if role.map(Role::is_admin).unwrap_or(false) {
        ADMIN_PATH.to_string()
    } else {
        HOME_PATH.to_string()
    }
}

fn first_message(errors: &ValidationErrors) -> String {
    errors
        .field_errors()
        .values()
        .flat_map(|errs| errs.iter())
        .find_map(|e| e.message.as_ref().map(|m| m.to_string()))
        .unwrap_or_else(|| "Invalid login request".to_string())
}
