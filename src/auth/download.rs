//! IdP-initiated SAML login to the download portal
//!
//! Reuses the identity-provider cookies captured by the main handshake, so no
//! credentials or MFA are needed while the IdP session is alive.

use reqwest::cookie::Jar;
use reqwest::header::{ACCEPT, CONTENT_TYPE, ORIGIN, REFERER};
use std::sync::Arc;
use url::Url;

use super::error::AuthError;
use super::extract;
use super::helpers::{
    create_http_client, ensure_ok, follow_redirects, host_key, jar_cookies, parse_url,
    resolve_location, seed_jar,
};
use super::session::Session;
use crate::config::Config;

pub struct DownloadBridge<'a> {
    config: &'a Config,
    client: reqwest::Client,
    jar: Arc<Jar>,
    idp_base: Url,
    portal_base: Url,
}

impl<'a> DownloadBridge<'a> {
    /// Build a client whose jar holds the session's identity-provider cookies
    pub fn new(config: &'a Config, session: &Session) -> Result<Self, AuthError> {
        let idp_base = parse_url("identity provider", &config.idp_base_url)?;
        let portal_base = parse_url("download portal", &config.download_base_url)?;

        // Older session files only carry the flat cookie map
        let idp_cookies = match session.domain_cookies(&host_key(&idp_base)) {
            Some(cookies) => cookies,
            None => {
                tracing::debug!("No per-host IdP cookies stored; seeding from flat cookie map");
                session.cookies()
            }
        };
        if idp_cookies.is_empty() {
            return Err(AuthError::Authentication(
                "No identity provider cookies in session; log in again".to_string(),
            ));
        }

        let jar = Arc::new(Jar::default());
        seed_jar(&jar, &idp_base, idp_cookies);
        let client = create_http_client(config, jar.clone())?;

        Ok(DownloadBridge {
            config,
            client,
            jar,
            idp_base,
            portal_base,
        })
    }

    /// Run the portal leg and return `session` with the portal cookies added
    pub async fn authenticate(self, mut session: Session) -> Result<Session, AuthError> {
        tracing::info!(step = "download_app", "Opening download portal app link");
        let response = self.client.get(&self.config.download_sso_url).send().await?;
        let response = follow_redirects(&self.client, response).await?;
        let response = ensure_ok("download app link", response).await?;
        let page_url = response.url().clone();

        let html = response.text().await?;
        let form = extract::saml_form(&html).ok_or_else(|| {
            AuthError::Authentication(
                "Could not extract SAML form for download portal (IdP session expired?)"
                    .to_string(),
            )
        })?;
        let action = form.action.as_deref().ok_or_else(|| {
            AuthError::Authentication("SAML form for download portal has no action".to_string())
        })?;
        let action = resolve_location(&page_url, action)?;

        tracing::info!(step = "download_acs", path = %action.path(), "Posting SAML response to download portal");
        let idp_origin = self.idp_base.origin().ascii_serialization();
        let response = self
            .client
            .post(action)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .header(ORIGIN, idp_origin.as_str())
            .header(REFERER, format!("{}/", idp_origin))
            .header(ACCEPT, "text/html,application/xhtml+xml")
            .form(&[
                ("SAMLResponse", form.saml_response.as_str()),
                ("RelayState", form.relay_state.as_str()),
            ])
            .send()
            .await?;
        let response = follow_redirects(&self.client, response).await?;
        ensure_ok("download portal SAML POST", response).await?;

        let portal_cookies = jar_cookies(&self.jar, &self.portal_base);
        if portal_cookies.is_empty() {
            return Err(AuthError::Authentication(
                "Download portal login completed but no cookies were set".to_string(),
            ));
        }

        tracing::info!(
            cookies = portal_cookies.len(),
            host = %host_key(&self.portal_base),
            "Download portal session established"
        );
        session
            .domain_cookies
            .insert(host_key(&self.portal_base), portal_cookies);

        // The IdP may have refreshed its own cookies along the way
        let idp_cookies = jar_cookies(&self.jar, &self.idp_base);
        if !idp_cookies.is_empty() {
            session
                .domain_cookies
                .insert(host_key(&self.idp_base), idp_cookies);
        }
        Ok(session)
    }
}
