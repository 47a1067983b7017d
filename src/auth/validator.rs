//! Server-side session check
//!
//! A stored session is only trusted after the service provider confirms it:
//! the target page is requested with the stored cookies and the
//! `X-Is-Logged-In` response header decides.

use reqwest::cookie::Jar;
use reqwest::header::HeaderMap;
use std::sync::Arc;

use super::error::AuthError;
use super::helpers::{create_http_client, parse_url, seed_jar};
use super::session::Session;
use crate::config::Config;

/// Response header the service provider uses to report login state
pub const LOGGED_IN_HEADER: &str = "x-is-logged-in";

/// True only when the header is present and exactly `true`
pub fn is_logged_in(headers: &HeaderMap) -> bool {
    headers
        .get(LOGGED_IN_HEADER)
        .and_then(|v| v.to_str().ok())
        .map_or(false, |v| v == "true")
}

/// Ask the service provider whether `session` is still live
///
/// Sessions without the distinguished cookie are rejected without a request.
/// Transport failures are returned as errors rather than folded into `false`.
pub async fn validate_session(config: &Config, session: &Session) -> Result<bool, AuthError> {
    if !session.is_authenticated() {
        tracing::debug!("Session has no glide_session_store; skipping validation request");
        return Ok(false);
    }

    let target = parse_url("service provider", &config.target_url())?;
    let jar = Arc::new(Jar::default());
    seed_jar(&jar, &target, session.cookies());
    let client = create_http_client(config, jar)?;

    let response = client.get(target).send().await?;
    let valid = is_logged_in(response.headers());
    tracing::info!(
        status = response.status().as_u16(),
        valid = valid,
        "Session validation"
    );
    Ok(valid)
}
