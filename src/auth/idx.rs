//! Okta IDX protocol stepper
//!
//! Drives the identity provider's interactive authentication as an explicit
//! state machine. Each state has one transition function; the `stateHandle`
//! returned by introspect is threaded through every later call.
//!
//! ```text
//! Introspecting -> Identifying -> [SelectingAuthenticator] -> AwaitingChallenge -> Succeeded
//!                      |                                                              ^
//!                      +---------------------- success (no MFA) ---------------------+
//! ```
//!
//! Any failure ends the machine with an [`AuthError`]. The only output is the
//! `success.href` URL; a raw `stateHandle` is never turned into a redirect.

use reqwest::header::{ACCEPT, CONTENT_TYPE, ORIGIN};
use reqwest::StatusCode;
use secrecy::ExposeSecret;
use serde_json::{json, Value};
use std::future::Future;

use super::error::AuthError;
use super::helpers::snippet;
use crate::config::{Config, Credentials};

/// Media type for both `Accept` and `Content-Type` on IDX calls
pub const ION_JSON: &str = "application/ion+json; okta-version=1.0.0";

/// Client identity the sign-in widget declares
pub const CLIENT_IDENTITY: &str = "okta-auth-js/7.14.0 okta-signin-widget-7.37.1";

const CLIENT_IDENTITY_HEADER: &str = "X-Okta-User-Agent-Extended";

/// Source of one-time MFA codes
///
/// This is the only suspension point of the handshake. No timeout is applied
/// here; callers that want one wrap the whole handshake.
pub trait MfaProvider {
    fn mfa_code(&self) -> impl Future<Output = Result<String, AuthError>> + Send;
}

/// A fixed code, e.g. from `--mfa-code` or a TOTP generator run beforehand
#[derive(Debug, Clone)]
pub struct StaticMfaCode(pub String);

impl MfaProvider for StaticMfaCode {
    async fn mfa_code(&self) -> Result<String, AuthError> {
        Ok(self.0.clone())
    }
}

/// States of the IDX exchange
#[derive(Debug, Clone, PartialEq)]
pub enum IdxState {
    Introspecting {
        state_token: String,
    },
    Identifying {
        state_handle: String,
    },
    SelectingAuthenticator {
        state_handle: String,
        /// Body of the identify response holding `remediation`/`authenticators`
        identify: Value,
    },
    AwaitingChallenge {
        state_handle: String,
    },
    Succeeded {
        href: String,
    },
}

/// How the TOTP authenticator is recognised in the remediation tree
#[derive(Debug, Clone)]
pub struct TotpMatcher {
    /// Display label of the authenticator option, e.g. "Okta Verify"
    pub label: String,
    /// Key in the flat `authenticators` list, e.g. "okta_verify"
    pub key: String,
}

impl TotpMatcher {
    pub fn from_config(config: &Config) -> Self {
        TotpMatcher {
            label: config.mfa_authenticator_label.clone(),
            key: config.mfa_authenticator_key.clone(),
        }
    }
}

pub struct IdxStepper<'a, M> {
    client: &'a reqwest::Client,
    config: &'a Config,
    credentials: &'a Credentials,
    totp: TotpMatcher,
    mfa: &'a M,
}

impl<'a, M: MfaProvider> IdxStepper<'a, M> {
    /// The client must be the same one (same cookie jar) used for the rest of
    /// the handshake: the identity provider keys its session on cookies.
    pub fn new(
        client: &'a reqwest::Client,
        config: &'a Config,
        credentials: &'a Credentials,
        mfa: &'a M,
    ) -> Self {
        IdxStepper {
            client,
            config,
            credentials,
            totp: TotpMatcher::from_config(config),
            mfa,
        }
    }

    /// Run the machine from a bootstrap `stateToken` to the `success.href` URL
    pub async fn run(&self, state_token: String) -> Result<String, AuthError> {
        let mut state = IdxState::Introspecting { state_token };
        loop {
            state = match state {
                IdxState::Introspecting { state_token } => self.introspect(&state_token).await?,
                IdxState::Identifying { state_handle } => self.identify(&state_handle).await?,
                IdxState::SelectingAuthenticator {
                    state_handle,
                    identify,
                } => self.select_authenticator(state_handle, &identify).await?,
                IdxState::AwaitingChallenge { state_handle } => {
                    self.answer_challenge(&state_handle).await?
                }
                IdxState::Succeeded { href } => return Ok(href),
            };
        }
    }

    /// Introspecting -> Identifying
    pub async fn introspect(&self, state_token: &str) -> Result<IdxState, AuthError> {
        tracing::info!(step = "introspect", "Introspecting Okta state token");
        let (status, body) = self
            .post("introspect", json!({ "stateToken": state_token }))
            .await?;

        if status != StatusCode::OK {
            return Err(AuthError::Authentication(format!(
                "Introspect failed: {} - {}",
                status.as_u16(),
                snippet(&body)
            )));
        }

        let data = parse_body("introspect", &body)?;
        match state_handle(&data) {
            Some(state_handle) => Ok(IdxState::Identifying { state_handle }),
            None => Err(AuthError::Authentication(
                "Could not get stateHandle from introspect".to_string(),
            )),
        }
    }

    /// Identifying -> Succeeded | SelectingAuthenticator
    pub async fn identify(&self, state_handle: &str) -> Result<IdxState, AuthError> {
        tracing::info!(step = "identify", "Submitting credentials");
        let (status, body) = self
            .post(
                "identify",
                json!({
                    "identifier": self.credentials.username,
                    "credentials": { "passcode": self.credentials.password.expose_secret() },
                    "stateHandle": state_handle,
                }),
            )
            .await?;

        if status != StatusCode::OK {
            return Err(AuthError::Authentication(format!(
                "Login failed: {} - {}",
                status.as_u16(),
                snippet(&body)
            )));
        }

        classify_identify(parse_body("identify", &body)?, state_handle, &body)
    }

    /// SelectingAuthenticator -> AwaitingChallenge
    ///
    /// Failing to find or select the TOTP authenticator is not terminal: the
    /// identity provider may still accept the answer with its default method.
    pub async fn select_authenticator(
        &self,
        state_handle: String,
        identify: &Value,
    ) -> Result<IdxState, AuthError> {
        let Some(authenticator_id) = find_totp_authenticator(identify, &self.totp) else {
            tracing::warn!(
                step = "challenge",
                label = %self.totp.label,
                "TOTP authenticator not found in remediation; answering with provider default"
            );
            return Ok(IdxState::AwaitingChallenge { state_handle });
        };

        tracing::info!(step = "challenge", "Selecting TOTP authenticator");
        let (status, body) = self
            .post(
                "challenge",
                json!({
                    "authenticator": { "id": authenticator_id, "methodType": "totp" },
                    "stateHandle": state_handle,
                }),
            )
            .await?;

        if status != StatusCode::OK {
            tracing::warn!(
                step = "challenge",
                status = status.as_u16(),
                body = %snippet(&body),
                "Authenticator selection rejected; continuing with current stateHandle"
            );
            return Ok(IdxState::AwaitingChallenge { state_handle });
        }

        let refreshed = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|data| self::state_handle(&data));
        Ok(IdxState::AwaitingChallenge {
            state_handle: refreshed.unwrap_or(state_handle),
        })
    }

    /// AwaitingChallenge -> Succeeded
    pub async fn answer_challenge(&self, state_handle: &str) -> Result<IdxState, AuthError> {
        let code = self.mfa.mfa_code().await?;
        let code = code.trim();

        tracing::info!(step = "challenge/answer", "Submitting MFA code");
        let (status, body) = self
            .post(
                "challenge/answer",
                json!({
                    "credentials": { "totp": code },
                    "stateHandle": state_handle,
                }),
            )
            .await?;

        if status != StatusCode::OK {
            tracing::warn!(
                step = "challenge/answer",
                status = status.as_u16(),
                "MFA code rejected"
            );
            return Err(AuthError::MfaRejected {
                status: status.as_u16(),
                body,
            });
        }

        let data = parse_body("challenge/answer", &body)?;
        match success_href(&data) {
            Some(href) => Ok(IdxState::Succeeded { href }),
            None => Err(AuthError::UnexpectedResponse {
                step: "challenge/answer",
                body,
            }),
        }
    }

    async fn post(&self, endpoint: &str, payload: Value) -> Result<(StatusCode, String), AuthError> {
        let response = self
            .client
            .post(self.config.idx_url(endpoint))
            .header(ACCEPT, ION_JSON)
            .header(CONTENT_TYPE, ION_JSON)
            .header(ORIGIN, self.config.idp_base_url.as_str())
            .header(CLIENT_IDENTITY_HEADER, CLIENT_IDENTITY)
            .body(payload.to_string())
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        tracing::debug!(endpoint = endpoint, status = status.as_u16(), "IDX response");
        Ok((status, body))
    }
}

// =============================================================================
// Response inspection (pure)
// =============================================================================

fn parse_body(step: &'static str, body: &str) -> Result<Value, AuthError> {
    serde_json::from_str(body).map_err(|_| AuthError::UnexpectedResponse {
        step,
        body: body.to_string(),
    })
}

/// `stateHandle` of an IDX response, if non-empty
pub fn state_handle(data: &Value) -> Option<String> {
    data.get("stateHandle")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// `success.href` of an IDX response, if present
pub fn success_href(data: &Value) -> Option<String> {
    data.get("success")
        .and_then(|s| s.get("href"))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Decide where a successful identify response leads
///
/// `success` means no MFA is configured; `remediation` means MFA is required.
/// A response with neither is preserved in the error for debugging.
pub fn classify_identify(
    data: Value,
    previous_handle: &str,
    raw_body: &str,
) -> Result<IdxState, AuthError> {
    if let Some(href) = success_href(&data) {
        return Ok(IdxState::Succeeded { href });
    }

    if data.get("remediation").is_some() {
        tracing::info!("MFA required");
        let state_handle = state_handle(&data).unwrap_or_else(|| previous_handle.to_string());
        return Ok(IdxState::SelectingAuthenticator {
            state_handle,
            identify: data,
        });
    }

    Err(AuthError::UnexpectedResponse {
        step: "identify",
        body: raw_body.to_string(),
    })
}

/// Locate the TOTP authenticator id in an identify response
///
/// Searches the `select-authenticator-authenticate` remediation for an option
/// labelled `matcher.label`, then falls back to the flat `authenticators` list.
pub fn find_totp_authenticator(data: &Value, matcher: &TotpMatcher) -> Option<String> {
    from_remediation(data, &matcher.label).or_else(|| from_authenticators(data, &matcher.key))
}

fn from_remediation(data: &Value, label: &str) -> Option<String> {
    let forms = data.get("remediation")?.get("value")?.as_array()?;
    let select = forms
        .iter()
        .find(|form| form.get("name").and_then(Value::as_str) == Some("select-authenticator-authenticate"))?;

    let field = select
        .get("value")?
        .as_array()?
        .iter()
        .find(|field| field.get("name").and_then(Value::as_str) == Some("authenticator"))?;

    let option = field
        .get("options")?
        .as_array()?
        .iter()
        .find(|opt| opt.get("label").and_then(Value::as_str) == Some(label))?;

    option
        .get("value")?
        .get("form")?
        .get("value")?
        .as_array()?
        .iter()
        .find(|fv| fv.get("name").and_then(Value::as_str) == Some("id"))?
        .get("value")?
        .as_str()
        .map(str::to_string)
}

fn from_authenticators(data: &Value, key: &str) -> Option<String> {
    data.get("authenticators")?
        .get("value")?
        .as_array()?
        .iter()
        .find(|auth| auth.get("key").and_then(Value::as_str) == Some(key))?
        .get("id")?
        .as_str()
        .map(str::to_string)
}
