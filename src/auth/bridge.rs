//! Service-provider legs of the federated login
//!
//! The bridge owns the single cookie-jar client used for the whole handshake:
//! ServiceNow SSO initiation, the Okta sign-in page, the IDX exchange (see
//! [`super::idx`]), and the SAML POST-back. `authenticate` consumes the bridge,
//! so the client is released on every exit path while the resulting
//! [`Session`] outlives it.

use reqwest::cookie::Jar;
use reqwest::header::{ACCEPT, CONTENT_TYPE, ORIGIN, REFERER};
use reqwest::{Response, StatusCode};
use std::sync::{Arc, Mutex};
use tracing::Instrument;
use url::Url;

use super::error::AuthError;
use super::extract::{self, SamlForm};
use super::helpers::{
    create_http_client, ensure_ok, fingerprint, follow_redirects, host_key, jar_cookies,
    parse_url, redirect_target,
};
use super::idx::{IdxStepper, MfaProvider};
use super::session::{Session, SESSION_COOKIE};
use super::validator::LOGGED_IN_HEADER;
use crate::config::{Config, Credentials};

/// Cookie that carries the service provider's pre-login session; the SAML
/// response is bound to it, so it must not change during the flow.
pub const AFFINITY_COOKIE: &str = "JSESSIONID";

const BROWSER_ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

pub struct FederationBridge<'a> {
    config: &'a Config,
    credentials: &'a Credentials,
    client: reqwest::Client,
    jar: Arc<Jar>,
    target_url: Url,
    idp_base: Url,
    /// Steps after which JSESSIONID no longer matched the baseline
    rotations: Mutex<Vec<&'static str>>,
}

impl<'a> FederationBridge<'a> {
    /// Build a bridge with a fresh client and an empty cookie jar
    pub fn new(config: &'a Config, credentials: &'a Credentials) -> Result<Self, AuthError> {
        let jar = Arc::new(Jar::default());
        let client = create_http_client(config, jar.clone())?;
        let target_url = parse_url("service provider", &config.target_url())?;
        let idp_base = parse_url("identity provider", &config.idp_base_url)?;

        Ok(FederationBridge {
            config,
            credentials,
            client,
            jar,
            target_url,
            idp_base,
            rotations: Mutex::new(Vec::new()),
        })
    }

    /// Run the whole handshake; all-or-nothing, no retries
    pub async fn authenticate<M: MfaProvider>(self, mfa: &M) -> Result<Session, AuthError> {
        let span = tracing::info_span!("federated_login", user = %self.credentials.username);
        self.handshake(mfa).instrument(span).await
    }

    /// Run the handshake without consuming the bridge, so that
    /// [`affinity_rotations`](Self::affinity_rotations) can be read afterwards
    pub async fn handshake<M: MfaProvider>(&self, mfa: &M) -> Result<Session, AuthError> {
        let baseline = self.establish_baseline().await?;
        let idp_url = self.initiate_sso(baseline.as_deref()).await?;
        let state_token = self.fetch_state_token(&idp_url).await?;

        let href = IdxStepper::new(&self.client, self.config, self.credentials, mfa)
            .run(state_token)
            .await?;

        let form = self.fetch_saml_assertion(&href).await?;
        self.check_affinity(baseline.as_deref(), "SAML POST");
        let response = self.post_assertion(&form).await?;
        self.land_on_target(response).await?;

        self.collect_session()
    }

    /// Step 1: visit the target page so the SP issues its session cookie
    async fn establish_baseline(&self) -> Result<Option<String>, AuthError> {
        tracing::info!(step = "target", "Initiating SSO");
        let response = self.client.get(self.target_url.clone()).send().await?;
        tracing::debug!(status = response.status().as_u16(), "Target page visited");

        let baseline = self.affinity_cookie();
        if let Some(value) = &baseline {
            tracing::debug!(jsessionid = %fingerprint(value), "Baseline session cookie");
        }
        Ok(baseline)
    }

    /// Steps 2-4: SSO initiation, one redirect, IdP URL extraction
    async fn initiate_sso(&self, baseline: Option<&str>) -> Result<String, AuthError> {
        // ServiceNow derives RelayState from the Referer header, not from a
        // query parameter. Browsers send the target page here; so must we.
        let response = self
            .client
            .get(self.config.sso_url())
            .header(REFERER, self.target_url.as_str())
            .send()
            .await?;
        let mut response = ensure_ok("SSO initiation", response).await?;
        self.check_affinity(baseline, "login_with_sso.do");

        if response.status() == StatusCode::FOUND {
            let next = redirect_target(&response)?;
            tracing::debug!(path = %next.path(), "Following SSO redirect");
            response = ensure_ok("SSO redirect", self.client.get(next).send().await?).await?;
            self.check_affinity(baseline, "auth_redirect.do");
        }

        let html = response.text().await?;
        extract::saml_redirect_url(&html, &self.config.idp_base_url)
            .ok_or_else(|| AuthError::Authentication("Could not find SAML redirect URL".to_string()))
    }

    /// Step 5: load the Okta sign-in page and pull out the bootstrap token
    async fn fetch_state_token(&self, idp_url: &str) -> Result<String, AuthError> {
        tracing::info!(step = "idp", "Loading Okta sign-in page");
        let response = self.client.get(idp_url).send().await?;
        let response = follow_redirects(&self.client, response).await?;
        let response = ensure_ok("Okta sign-in page", response).await?;

        let html = response.text().await?;
        extract::state_token(&html)
            .ok_or_else(|| AuthError::Authentication("Could not extract Okta state token".to_string()))
    }

    /// Step 6: exchange `success.href` for the auto-submitting SAML form
    async fn fetch_saml_assertion(&self, href: &str) -> Result<SamlForm, AuthError> {
        tracing::info!(step = "assertion", "Getting SAML assertion");
        let response = self.client.get(href).send().await?;
        let response = follow_redirects(&self.client, response).await?;
        let response = ensure_ok("SAML assertion", response).await?;

        let html = response.text().await?;
        extract::saml_form(&html)
            .ok_or_else(|| AuthError::Authentication("Could not extract SAML response".to_string()))
    }

    /// Step 7: POST the assertion to the SP with browser-equivalent headers
    ///
    /// ServiceNow checks Origin, Referer and Sec-Fetch-*; without them the
    /// POST "succeeds" but no session is created.
    async fn post_assertion(&self, form: &SamlForm) -> Result<Response, AuthError> {
        tracing::info!(step = "acs", "Completing SSO callback");
        let idp_origin = self.config.idp_base_url.as_str();
        let response = self
            .client
            .post(self.config.acs_url())
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .header(ORIGIN, idp_origin)
            .header(REFERER, format!("{}/", idp_origin))
            .header(ACCEPT, BROWSER_ACCEPT)
            .header("Upgrade-Insecure-Requests", "1")
            .header("Sec-Fetch-Dest", "document")
            .header("Sec-Fetch-Mode", "navigate")
            .header("Sec-Fetch-Site", "cross-site")
            .form(&[
                ("SAMLResponse", form.saml_response.as_str()),
                ("RelayState", form.relay_state.as_str()),
            ])
            .send()
            .await?;

        tracing::debug!(status = response.status().as_u16(), "SAML consumer responded");
        ensure_ok("SAML POST", response).await
    }

    /// Step 8: follow the post-login redirects and make sure the target page
    /// itself is fetched, since only that page sets the session cookie
    async fn land_on_target(&self, response: Response) -> Result<(), AuthError> {
        let response = follow_redirects(&self.client, response).await?;
        let mut response = ensure_ok("post-login redirect", response).await?;

        if response.url().path() != self.target_url.path() {
            tracing::debug!(path = %response.url().path(), "Visiting target page to establish session");
            response = ensure_ok(
                "target page",
                self.client.get(self.target_url.clone()).send().await?,
            )
            .await?;
        }

        tracing::debug!(
            logged_in = ?response.headers().get(LOGGED_IN_HEADER),
            "Landed on target page"
        );
        Ok(())
    }

    /// Step 9: copy the jar into a Session; no distinguished cookie is an error
    fn collect_session(&self) -> Result<Session, AuthError> {
        let sp_cookies = jar_cookies(&self.jar, &self.target_url);
        let idp_cookies = jar_cookies(&self.jar, &self.idp_base);

        if sp_cookies.get(SESSION_COOKIE).map_or(true, |v| v.is_empty()) {
            let mut present: Vec<&str> = sp_cookies
                .keys()
                .chain(idp_cookies.keys())
                .map(String::as_str)
                .collect();
            present.sort_unstable();
            present.dedup();
            tracing::error!(cookies = ?present, "Handshake finished without a session cookie");
            return Err(AuthError::Authentication(format!(
                "Authentication completed but no {} cookie (cookies present: {})",
                SESSION_COOKIE,
                if present.is_empty() {
                    "none".to_string()
                } else {
                    present.join(", ")
                }
            )));
        }

        let mut session = Session::from_cookies(sp_cookies.clone(), &self.credentials.username);
        session
            .domain_cookies
            .insert(host_key(&self.target_url), sp_cookies);
        if !idp_cookies.is_empty() {
            session
                .domain_cookies
                .insert(host_key(&self.idp_base), idp_cookies);
        }

        tracing::info!(cookies = session.cookies().len(), "Authentication successful");
        Ok(session)
    }

    fn affinity_cookie(&self) -> Option<String> {
        jar_cookies(&self.jar, &self.target_url).remove(AFFINITY_COOKIE)
    }

    /// Steps after which the SP session cookie was found rotated
    pub fn affinity_rotations(&self) -> Vec<&'static str> {
        self.rotations
            .lock()
            .map(|rotations| rotations.clone())
            .unwrap_or_default()
    }

    /// Warn when the SP session cookie rotated; a rotated cookie means the
    /// SAML response will not be accepted for this session
    fn check_affinity(&self, baseline: Option<&str>, after: &'static str) {
        let now = self.affinity_cookie();
        if !affinity_rotated(baseline, now.as_deref()) {
            return;
        }

        tracing::warn!(
            after = after,
            before = %baseline.map(fingerprint).unwrap_or_default(),
            now = %now.as_deref().map(fingerprint).unwrap_or_default(),
            "JSESSIONID changed during handshake"
        );
        if let Ok(mut rotations) = self.rotations.lock() {
            rotations.push(after);
        }
    }
}

/// A cookie that appears where there was none is not a rotation
fn affinity_rotated(baseline: Option<&str>, now: Option<&str>) -> bool {
    matches!((baseline, now), (Some(before), Some(now)) if before != now)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_affinity_rotated() {
        assert!(affinity_rotated(Some("a"), Some("b")));
        assert!(!affinity_rotated(Some("a"), Some("a")));
        assert!(!affinity_rotated(None, Some("b")));
        assert!(!affinity_rotated(Some("a"), None));
        assert!(!affinity_rotated(None, None));
    }
}
