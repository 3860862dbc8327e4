// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Storefront Auth Server
//!
//! Gates the repair shop storefront's admin and account pages on a Supabase
//! session and the role stored on the user's profile row.

use std::sync::Arc;
use storefront_auth::{
    config::Config,
    db::PostgrestProfiles,
    services::{RoleFetches, SupabaseAuthClient},
    AppState,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize structured JSON logging
    init_logging()?;

    // Load configuration from environment
    let config = Config::from_env()?;
    tracing::info!(port = config.port, supabase_url = %config.supabase_url, "Starting storefront auth server");

    let http = reqwest::Client::builder()
        .user_agent(concat!("storefront-auth/", env!("CARGO_PKG_VERSION")))
        .build()?;

    let sessions = SupabaseAuthClient::new(http.clone(), &config.supabase_url, &config.supabase_anon_key);

    if config.supabase_service_key.is_none() {
        tracing::warn!("SUPABASE_SERVICE_ROLE_KEY not set, profile lookups use the anon key");
    }
    let profiles = PostgrestProfiles::new(http, &config.supabase_url, config.profile_api_key());

    // Shared by every request so concurrent lookups for one user are joined
    let role_fetches = RoleFetches::new(Arc::new(profiles), config.retry_policy());
    tracing::info!(policy = ?role_fetches.policy(), "Role lookups configured");

    // Build shared state
    let state = Arc::new(AppState {
        config: config.clone(),
        sessions: Arc::new(sessions),
        role_fetches,
    });

    // Build router
    let app = storefront_auth::routes::create_router(state);

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Server listening");

    axum::serve(listener, app).await?;
    Ok(())
}

/// Initialize structured JSON logging.
fn init_logging() -> anyhow::Result<()> {
    let format = tracing_subscriber::fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(true)
        .flatten_event(true);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("storefront_auth=debug".parse()?)
                .add_directive("info".parse()?),
        )
        .with(format)
        .init();
    Ok(())
}
