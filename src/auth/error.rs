//! Handshake error type

use thiserror::Error;

use super::helpers::snippet;

/// Errors raised while obtaining or validating a session
///
/// Every variant except [`AuthError::Transport`] is fatal to the current
/// handshake attempt; recovery is running the whole handshake again.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Any failure during the federated handshake
    #[error("{0}")]
    Authentication(String),

    /// The identity provider refused the MFA code
    #[error("MFA verification failed ({status}): {}", snippet(.body))]
    MfaRejected { status: u16, body: String },

    /// A response was missing a key the protocol requires
    #[error("Unexpected {step} response: {}", snippet(.body))]
    UnexpectedResponse { step: &'static str, body: String },

    /// The MFA code could not be read from the operator
    #[error("Could not read MFA code: {0}")]
    Prompt(String),

    /// No usable stored session
    #[error("No valid session. Run 'support-sso login' first.")]
    NotLoggedIn,

    /// DNS, TLS, connect or timeout failure
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Session file could not be written or removed
    #[error("Session file error: {0}")]
    Io(#[from] std::io::Error),
}

impl AuthError {
    /// Whether the failure points at the environment rather than the session
    pub fn is_transport(&self) -> bool {
        matches!(self, AuthError::Transport(_))
    }
}
