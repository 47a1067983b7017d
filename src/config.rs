use secrecy::SecretString;
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};

pub const DEFAULT_SP_URL: &str = "https://elluciansupport.service-now.com";
pub const DEFAULT_IDP_URL: &str = "https://sso.ellucian.com";
pub const DEFAULT_SSO_ID: &str = "7d6eb13447c309500cf60562846d430c";
pub const DEFAULT_DOWNLOAD_SSO_URL: &str =
    "https://sso.ellucian.com/home/ellucian_downloadcenter20_1/0oa18z5zf4pSkesMA0h8/aln18z7oubt9eltsk0h8";
pub const DEFAULT_DOWNLOAD_BASE_URL: &str = "https://ellucian.flexnetoperations.com";
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) Gecko/20100101 Firefox/145.0";

/// Name of the optional dotenv-style file consulted for missing variables
pub const LOCAL_ENV_FILE: &str = "local.env";

/// Page on the service provider that every leg of the handshake returns to
pub const TARGET_PATH: &str = "/customer_center?id=customer_center_home";

/// Login credentials for the identity provider
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: SecretString,
}

#[derive(Debug, Clone)]
pub struct Config {
    // Login credentials (only required by `login`)
    pub credentials: Option<Credentials>,

    // Service provider (ServiceNow) and identity provider (Okta) base URLs
    pub sp_base_url: String,
    pub idp_base_url: String,
    pub sso_id: String,

    // Where the session is persisted
    pub session_file: PathBuf,

    // How the TOTP authenticator is recognised in the IDX remediation tree
    pub mfa_authenticator_label: String,
    pub mfa_authenticator_key: String,

    // Download portal (IdP-initiated SAML app)
    pub download_sso_url: String,
    pub download_base_url: String,

    // HTTP client configuration
    pub http_connect_timeout_secs: u64,
    pub http_request_timeout_secs: u64,
    pub user_agent: String,
}

impl Config {
    /// Load configuration from the process environment, falling back to a
    /// `local.env` file in the working directory or up to three parents.
    ///
    /// The file is only read, never exported into the process environment.
    pub fn load() -> anyhow::Result<Self> {
        let cwd = env::current_dir()?;
        let file_vars = read_local_env(&cwd);
        if !file_vars.is_empty() {
            tracing::debug!(variables = file_vars.len(), "Loaded fallback values from local.env");
        }

        Self::from_lookup(|key| env::var(key).ok().or_else(|| file_vars.get(key).cloned()))
    }

    /// Build configuration from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|s| !s.trim().is_empty());

        let credentials = match (
            non_empty("ELLUCIAN_SUPPORT_USER"),
            non_empty("ELLUCIAN_SUPPORT_PW"),
        ) {
            (Some(username), Some(password)) => Some(Credentials {
                username,
                password: SecretString::from(password),
            }),
            _ => None,
        };

        // Normalize URLs by trimming trailing slashes so paths can be appended
        let base_url = |key: &str, default: &str| {
            non_empty(key)
                .unwrap_or_else(|| default.to_string())
                .trim_end_matches('/')
                .to_string()
        };

        let sp_base_url = base_url("SUPPORT_SP_URL", DEFAULT_SP_URL);
        let idp_base_url = base_url("SUPPORT_IDP_URL", DEFAULT_IDP_URL);
        let download_base_url = base_url("DOWNLOAD_BASE_URL", DEFAULT_DOWNLOAD_BASE_URL);

        let sso_id = non_empty("SUPPORT_SSO_ID").unwrap_or_else(|| DEFAULT_SSO_ID.to_string());

        let session_file = match non_empty("SUPPORT_SESSION_FILE") {
            Some(path) => PathBuf::from(path),
            None => default_session_file().ok_or_else(|| {
                anyhow::anyhow!(
                    "Could not determine home directory; set SUPPORT_SESSION_FILE explicitly"
                )
            })?,
        };

        let mfa_authenticator_label =
            non_empty("SUPPORT_MFA_LABEL").unwrap_or_else(|| "Okta Verify".to_string());
        let mfa_authenticator_key =
            non_empty("SUPPORT_MFA_KEY").unwrap_or_else(|| "okta_verify".to_string());

        let download_sso_url =
            non_empty("DOWNLOAD_SSO_URL").unwrap_or_else(|| DEFAULT_DOWNLOAD_SSO_URL.to_string());

        let http_connect_timeout_secs = non_empty("HTTP_CONNECT_TIMEOUT_SECS")
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(10);

        let http_request_timeout_secs = non_empty("HTTP_REQUEST_TIMEOUT_SECS")
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(30);

        let user_agent = non_empty("USER_AGENT").unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());

        Ok(Config {
            credentials,
            sp_base_url,
            idp_base_url,
            sso_id,
            session_file,
            mfa_authenticator_label,
            mfa_authenticator_key,
            download_sso_url,
            download_base_url,
            http_connect_timeout_secs,
            http_request_timeout_secs,
            user_agent,
        })
    }

    /// Credentials for a fresh login, or an error naming the missing variables
    pub fn credentials(&self) -> anyhow::Result<&Credentials> {
        self.credentials.as_ref().ok_or_else(|| {
            anyhow::anyhow!(
                "ELLUCIAN_SUPPORT_USER and ELLUCIAN_SUPPORT_PW must be set in the environment or local.env"
            )
        })
    }

    /// Representative authenticated page on the service provider
    pub fn target_url(&self) -> String {
        format!("{}{}", self.sp_base_url, TARGET_PATH)
    }

    /// SSO initiation endpoint on the service provider
    pub fn sso_url(&self) -> String {
        format!(
            "{}/login_with_sso.do?glide_sso_id={}",
            self.sp_base_url,
            urlencoding::encode(&self.sso_id)
        )
    }

    /// SAML assertion consumer endpoint on the service provider
    pub fn acs_url(&self) -> String {
        format!("{}/nav_to.do", self.sp_base_url)
    }

    /// Okta IDX endpoint, e.g. `idx_url("introspect")`
    pub fn idx_url(&self, endpoint: &str) -> String {
        format!("{}/idp/idx/{}", self.idp_base_url, endpoint)
    }
}

fn default_session_file() -> Option<PathBuf> {
    dirs::home_dir().map(|home| {
        home.join(".config")
            .join("stibbons")
            .join("ellucian_cookies.json")
    })
}

/// Find and parse the nearest `local.env`, searching `start` and three parents
///
/// Values are collected into a map; the process environment is left untouched.
/// The first definition of a key wins.
pub fn read_local_env(start: &Path) -> HashMap<String, String> {
    for dir in start.ancestors().take(4) {
        let candidate = dir.join(LOCAL_ENV_FILE);
        let entries = match dotenvy::from_path_iter(&candidate) {
            Ok(entries) => entries,
            Err(_) => continue,
        };
        tracing::debug!(path = %candidate.display(), "Found local.env");

        let mut vars = HashMap::new();
        for entry in entries {
            match entry {
                Ok((key, value)) => {
                    vars.entry(key).or_insert(value);
                }
                Err(e) => {
                    tracing::warn!(path = %candidate.display(), error = %e, "Skipping malformed local.env line");
                }
            }
        }
        return vars;
    }
    HashMap::new()
}
