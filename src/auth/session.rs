//! Persisted session
//!
//! A [`Session`] is the only durable state: the cookies accumulated during the
//! handshake, the identity they belong to, and the distinguished
//! `glide_session_store` cookie whose presence is the authentication predicate.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use super::error::AuthError;

/// Cookie the service provider sets once the SAML login has completed
pub const SESSION_COOKIE: &str = "glide_session_store";

pub type CookieMap = BTreeMap<String, String>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Cookies for the service-provider domain
    pub(crate) cookies: CookieMap,
    pub(crate) user_email: String,
    pub(crate) user_id: String,
    /// Value of the `glide_session_store` cookie; empty means unauthenticated
    pub(crate) glide_session_store: String,
    /// Cookies per host (SP, IdP and any portal reached through the IdP)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub(crate) domain_cookies: BTreeMap<String, CookieMap>,
}

impl Session {
    /// Build a session from the service-provider cookie jar contents
    pub(crate) fn from_cookies(cookies: CookieMap, user_email: &str) -> Self {
        let glide_session_store = cookies.get(SESSION_COOKIE).cloned().unwrap_or_default();
        Session {
            cookies,
            user_email: user_email.to_string(),
            user_id: String::new(),
            glide_session_store,
            domain_cookies: BTreeMap::new(),
        }
    }

    /// Necessary (not sufficient) condition for a usable session
    pub fn is_authenticated(&self) -> bool {
        !self.glide_session_store.is_empty()
    }

    pub fn cookies(&self) -> &CookieMap {
        &self.cookies
    }

    pub fn user_email(&self) -> &str {
        &self.user_email
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Cookies recorded for a specific host (`host` or `host:port`)
    pub fn domain_cookies(&self, host: &str) -> Option<&CookieMap> {
        self.domain_cookies.get(host)
    }

    /// Hosts with recorded cookies
    pub fn domains(&self) -> impl Iterator<Item = &str> {
        self.domain_cookies.keys().map(String::as_str)
    }

    /// `Cookie` header value for the service provider, or for `host` if given
    pub fn cookie_header(&self, host: Option<&str>) -> Option<String> {
        let cookies = match host {
            Some(host) => self.domain_cookies.get(host)?,
            None => &self.cookies,
        };
        Some(
            cookies
                .iter()
                .map(|(name, value)| format!("{}={}", name, value))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    /// Load a session file; any problem reading or parsing it means "no session"
    pub fn load(path: &Path) -> Option<Self> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "No readable session file");
                return None;
            }
        };

        match serde_json::from_str::<Session>(&raw) {
            Ok(session) => Some(session),
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "Ignoring malformed session file");
                None
            }
        }
    }

    /// Persist the session, replacing any previous file (last write wins)
    pub fn save(&self, path: &Path) -> Result<(), AuthError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(self).map_err(io::Error::from)?;

        // Write beside the target and rename so readers never see a partial file
        let tmp = temp_path(path);
        fs::write(&tmp, json)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&tmp, fs::Permissions::from_mode(0o600))?;
        }

        fs::rename(&tmp, path)?;
        tracing::debug!(path = %path.display(), cookies = self.cookies.len(), "Session saved");
        Ok(())
    }

    /// Delete the session file; succeeds when it is already absent
    pub fn clear(path: &Path) -> Result<(), AuthError> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}
