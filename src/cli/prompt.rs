//! Interactive MFA prompt

use dialoguer::Input;
use std::io::IsTerminal;

use crate::auth::{AuthError, MfaProvider};

/// Reads the TOTP code from the controlling terminal
#[derive(Debug, Default, Clone)]
pub struct TerminalPrompt;

impl MfaProvider for TerminalPrompt {
    async fn mfa_code(&self) -> Result<String, AuthError> {
        if !std::io::stdin().is_terminal() {
            return Err(AuthError::Prompt(
                "MFA code required but stdin is not a terminal; use --mfa-code".to_string(),
            ));
        }

        // dialoguer blocks on the terminal; keep it off the runtime threads
        tokio::task::spawn_blocking(|| {
            Input::<String>::new()
                .with_prompt("Enter MFA code from Okta Verify")
                .validate_with(|input: &String| validate_code(input))
                .interact_text()
                .map_err(|e| AuthError::Prompt(e.to_string()))
        })
        .await
        .map_err(|e| AuthError::Prompt(e.to_string()))?
    }
}

/// TOTP codes are six digits; surrounding whitespace is tolerated
pub fn validate_code(input: &str) -> Result<(), String> {
    let code = input.trim();
    if code.len() == 6 && code.chars().all(|c| c.is_ascii_digit()) {
        Ok(())
    } else {
        Err("Enter the 6-digit code".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_code() {
        assert!(validate_code("123456").is_ok());
        assert!(validate_code(" 123456\n").is_ok());
        assert!(validate_code("12345").is_err());
        assert!(validate_code("12345a").is_err());
        assert!(validate_code("").is_err());
    }
}
