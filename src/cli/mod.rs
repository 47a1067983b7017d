//! Command-line interface
//!
//! Thin layer over [`SessionManager`]: parses arguments, picks the MFA source
//! and maps errors to exit codes. Command output goes to stdout, logs to stderr.

pub mod prompt;

use clap::{Parser, Subcommand};

use crate::auth::{AuthError, SessionManager, SessionSource, StaticMfaCode};
use crate::config::Config;
use prompt::TerminalPrompt;

/// Exit code for authentication failures and anything unclassified
pub const EXIT_FAILURE: u8 = 1;
/// Exit code when a command needs a stored session and there is none
pub const EXIT_NOT_LOGGED_IN: u8 = 2;
/// Exit code for network-level failures
pub const EXIT_TRANSPORT: u8 = 3;

/// Ellucian Support (ServiceNow) login through Okta SSO
#[derive(Debug, Parser)]
#[command(name = "support-sso")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Obtain a session, reusing the stored one when it is still valid
    Login {
        /// Ignore any stored session and run the full handshake
        #[arg(long)]
        force: bool,

        /// MFA code to submit instead of prompting
        #[arg(long, value_name = "CODE")]
        mfa_code: Option<String>,
    },

    /// Check the stored session against the service provider
    Status,

    /// Delete the stored session
    Logout,

    /// Log in to the download portal using the stored IdP session
    DownloadLogin,

    /// Print a Cookie header value from the stored session
    Cookies {
        /// Host to print cookies for (defaults to the service provider)
        #[arg(long, value_name = "HOST")]
        domain: Option<String>,
    },
}

/// Execute a parsed command
pub async fn run(cli: Cli, config: &Config) -> anyhow::Result<()> {
    let manager = SessionManager::new(config);

    match cli.command {
        Command::Login { force, mfa_code } => {
            let credentials = config.credentials()?;
            let (session, source) = match mfa_code {
                Some(code) => {
                    manager
                        .obtain(credentials, &StaticMfaCode(code), force)
                        .await?
                }
                None => manager.obtain(credentials, &TerminalPrompt, force).await?,
            };
            match source {
                SessionSource::Stored => {
                    println!("Already logged in as {}", session.user_email())
                }
                SessionSource::Fresh => println!(
                    "Logged in as {}; session saved to {}",
                    session.user_email(),
                    config.session_file.display()
                ),
            }
        }

        Command::Status => {
            let session = manager.require()?;
            if !manager.validate(&session).await? {
                return Err(AuthError::NotLoggedIn.into());
            }
            println!("Logged in as {}", session.user_email());
            for domain in session.domains() {
                println!("  cookies for {}", domain);
            }
        }

        Command::Logout => {
            manager.logout()?;
            println!("Logged out");
        }

        Command::DownloadLogin => {
            let session = manager.download_login().await?;
            println!(
                "Download portal session saved ({} hosts)",
                session.domains().count()
            );
        }

        Command::Cookies { domain } => {
            let session = manager.require()?;
            let header = session.cookie_header(domain.as_deref()).ok_or_else(|| {
                anyhow::anyhow!(
                    "No cookies stored for {}",
                    domain.as_deref().unwrap_or("the service provider")
                )
            })?;
            println!("{}", header);
        }
    }

    Ok(())
}

/// Map an error to the process exit code
pub fn exit_code(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<AuthError>() {
        Some(AuthError::NotLoggedIn) => EXIT_NOT_LOGGED_IN,
        Some(e) if e.is_transport() => EXIT_TRANSPORT,
        _ => EXIT_FAILURE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_login_flags() {
        let cli = Cli::try_parse_from(["support-sso", "login", "--force", "--mfa-code", "123456"])
            .unwrap();
        match cli.command {
            Command::Login { force, mfa_code } => {
                assert!(force);
                assert_eq!(mfa_code.as_deref(), Some("123456"));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_kebab_case_commands() {
        let cli = Cli::try_parse_from(["support-sso", "download-login"]).unwrap();
        assert!(matches!(cli.command, Command::DownloadLogin));

        let cli = Cli::try_parse_from(["support-sso", "cookies", "--domain", "sso.example.com"])
            .unwrap();
        match cli.command {
            Command::Cookies { domain } => assert_eq!(domain.as_deref(), Some("sso.example.com")),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_rejects_unknown_command() {
        assert!(Cli::try_parse_from(["support-sso", "whoami"]).is_err());
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(
            exit_code(&anyhow::Error::from(AuthError::NotLoggedIn)),
            EXIT_NOT_LOGGED_IN
        );
        assert_eq!(
            exit_code(&anyhow::Error::from(AuthError::Authentication("x".into()))),
            EXIT_FAILURE
        );
        assert_eq!(
            exit_code(&anyhow::Error::from(AuthError::MfaRejected {
                status: 403,
                body: String::new()
            })),
            EXIT_FAILURE
        );
        assert_eq!(exit_code(&anyhow::anyhow!("config problem")), EXIT_FAILURE);
    }
}
