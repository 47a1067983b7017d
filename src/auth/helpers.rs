//! Shared helpers for the handshake
//!
//! This module contains HTTP client builders, cookie jar access, redirect
//! following and small formatting helpers used by every leg of the flow.
//!
//! All functions are pure except the async ones, which perform HTTP requests.

use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::LOCATION;
use reqwest::{Response, StatusCode};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use super::error::AuthError;
use crate::config::Config;

/// Upper bound on redirects followed for a single navigation
pub const MAX_REDIRECTS: usize = 10;

/// Number of characters of a response body kept in error messages
pub const SNIPPET_LEN: usize = 200;

// =============================================================================
// HTTP Client Builders
// =============================================================================

/// Create a reqwest client that stores cookies in `jar` and never follows
/// redirects on its own; every leg follows redirects explicitly.
pub fn create_http_client(
    config: &Config,
    jar: Arc<Jar>,
) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::ClientBuilder::new()
        .redirect(reqwest::redirect::Policy::none())
        .cookie_provider(jar)
        .user_agent(config.user_agent.as_str())
        .connect_timeout(Duration::from_secs(config.http_connect_timeout_secs))
        .timeout(Duration::from_secs(config.http_request_timeout_secs))
        .build()
}

/// Parse a configured URL, reporting which setting was invalid
pub fn parse_url(name: &str, value: &str) -> Result<Url, AuthError> {
    Url::parse(value)
        .map_err(|e| AuthError::Authentication(format!("Invalid {name} URL {value:?}: {e}")))
}

// =============================================================================
// Cookie Jar Access
// =============================================================================

/// Parse a `Cookie` header value into name/value pairs
///
/// The first occurrence of a name wins, matching how servers read the header.
pub fn parse_cookie_header(header: &str) -> BTreeMap<String, String> {
    let mut cookies = BTreeMap::new();
    for pair in header.split(';').map(|c| c.trim()).filter(|c| !c.is_empty()) {
        let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
        cookies
            .entry(name.trim().to_string())
            .or_insert_with(|| value.trim().to_string());
    }
    cookies
}

/// Every cookie the jar would send to `url`
pub fn jar_cookies(jar: &Jar, url: &Url) -> BTreeMap<String, String> {
    jar.cookies(url)
        .and_then(|value| value.to_str().ok().map(parse_cookie_header))
        .unwrap_or_default()
}

/// Load stored cookies into a jar, scoped to the host of `url`
pub fn seed_jar(jar: &Jar, url: &Url, cookies: &BTreeMap<String, String>) {
    for (name, value) in cookies {
        jar.add_cookie_str(&format!("{}={}; Path=/", name, value), url);
    }
}

/// Key used for per-domain cookie maps: host, plus port when explicit
pub fn host_key(url: &Url) -> String {
    match (url.host_str(), url.port()) {
        (Some(host), Some(port)) => format!("{}:{}", host, port),
        (Some(host), None) => host.to_string(),
        (None, _) => String::new(),
    }
}

/// Short md5 fingerprint of a secret value, safe to log
pub fn fingerprint(value: &str) -> String {
    let digest = format!("{:x}", md5::compute(value));
    digest[..12].to_string()
}

// =============================================================================
// Responses and Redirects
// =============================================================================

/// Truncate a response body for error messages
pub fn snippet(body: &str) -> &str {
    match body.char_indices().nth(SNIPPET_LEN) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

/// Statuses the handshake treats as "follow the Location header"
pub fn is_redirect(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND | StatusCode::SEE_OTHER
    )
}

/// Resolve a Location header value against the URL that produced it
pub fn resolve_location(base: &Url, location: &str) -> Result<Url, AuthError> {
    base.join(location).map_err(|e| {
        AuthError::Authentication(format!("Invalid redirect location {:?}: {}", location, e))
    })
}

/// The absolute target of a redirect response
pub fn redirect_target(response: &Response) -> Result<Url, AuthError> {
    let location = response
        .headers()
        .get(LOCATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            AuthError::Authentication(format!(
                "Redirect from {} without a Location header",
                response.url().path()
            ))
        })?;
    resolve_location(response.url(), location)
}

/// Follow 301/302/303 responses with GETs until a non-redirect arrives
pub async fn follow_redirects(
    client: &reqwest::Client,
    mut response: Response,
) -> Result<Response, AuthError> {
    for _ in 0..MAX_REDIRECTS {
        if !is_redirect(response.status()) {
            return Ok(response);
        }
        let next = redirect_target(&response)?;
        // Only the path is logged: redirect URLs carry short-lived tokens
        tracing::debug!(
            status = response.status().as_u16(),
            host = ?next.host_str(),
            path = %next.path(),
            "Following redirect"
        );
        response = client.get(next).send().await?;
    }

    if is_redirect(response.status()) {
        return Err(AuthError::Authentication(format!(
            "Too many redirects (more than {}) starting from {}",
            MAX_REDIRECTS,
            response.url().path()
        )));
    }
    Ok(response)
}

/// Reject anything that is neither 2xx nor 3xx
pub async fn ensure_ok(step: &'static str, response: Response) -> Result<Response, AuthError> {
    let status = response.status();
    if status.is_success() || status.is_redirection() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    tracing::warn!(
        step = step,
        status = status.as_u16(),
        "Unexpected status during handshake"
    );
    Err(AuthError::Authentication(format!(
        "{} failed: {} - {}",
        step,
        status.as_u16(),
        snippet(&body)
    )))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cookie_header_finds_values() {
        let cookies = parse_cookie_header("foo=bar; glide_session_store=abc123; baz=qux");
        assert_eq!(cookies.len(), 3);
        assert_eq!(cookies["glide_session_store"], "abc123");
    }

    #[test]
    fn test_parse_cookie_header_first_occurrence_wins() {
        let cookies = parse_cookie_header("JSESSIONID=first; JSESSIONID=second");
        assert_eq!(cookies["JSESSIONID"], "first");
    }

    #[test]
    fn test_parse_cookie_header_keeps_equals_in_value() {
        let cookies = parse_cookie_header("token=a=b==; empty=");
        assert_eq!(cookies["token"], "a=b==");
        assert_eq!(cookies["empty"], "");
    }

    #[test]
    fn test_parse_cookie_header_empty() {
        assert!(parse_cookie_header("").is_empty());
        assert!(parse_cookie_header(" ; ").is_empty());
    }

    #[test]
    fn test_seed_and_read_jar() {
        let jar = Jar::default();
        let url = Url::parse("https://sp.example.com/customer_center").unwrap();
        let mut cookies = BTreeMap::new();
        cookies.insert("glide_session_store".to_string(), "abc".to_string());
        cookies.insert("JSESSIONID".to_string(), "xyz".to_string());

        seed_jar(&jar, &url, &cookies);

        assert_eq!(jar_cookies(&jar, &url), cookies);
        let other = Url::parse("https://other.example.com/").unwrap();
        assert!(jar_cookies(&jar, &other).is_empty());
    }

    #[test]
    fn test_host_key() {
        let url = Url::parse("https://sso.example.com/app/x").unwrap();
        assert_eq!(host_key(&url), "sso.example.com");
        let url = Url::parse("http://127.0.0.1:8080/").unwrap();
        assert_eq!(host_key(&url), "127.0.0.1:8080");
    }

    #[test]
    fn test_fingerprint_hides_value() {
        let fp = fingerprint("secret-session-value");
        assert_eq!(fp.len(), 12);
        assert_eq!(fp, fingerprint("secret-session-value"));
        assert_ne!(fp, fingerprint("other-session-value"));
        assert!(!fp.contains("secret"));
    }

    #[test]
    fn test_snippet_respects_char_boundaries() {
        let body = "é".repeat(300);
        let cut = snippet(&body);
        assert_eq!(cut.chars().count(), SNIPPET_LEN);
        assert_eq!(snippet("short"), "short");
    }

    #[test]
    fn test_is_redirect() {
        assert!(is_redirect(StatusCode::MOVED_PERMANENTLY));
        assert!(is_redirect(StatusCode::FOUND));
        assert!(is_redirect(StatusCode::SEE_OTHER));
        assert!(!is_redirect(StatusCode::OK));
        assert!(!is_redirect(StatusCode::NOT_MODIFIED));
    }

    #[test]
    fn test_resolve_location_relative_and_absolute() {
        let base = Url::parse("https://sp.example.com/login_with_sso.do?x=1").unwrap();
        assert_eq!(
            resolve_location(&base, "/auth_redirect.do?sysparm=1")
                .unwrap()
                .as_str(),
            "https://sp.example.com/auth_redirect.do?sysparm=1"
        );
        assert_eq!(
            resolve_location(&base, "https://sso.example.com/app/abc")
                .unwrap()
                .as_str(),
            "https://sso.example.com/app/abc"
        );
    }

    #[test]
    fn test_parse_url_invalid() {
        assert!(parse_url("identity provider", "not a url").is_err());
        assert!(parse_url("identity provider", "https://sso.example.com").is_ok());
    }
}
