//! Ellucian Support SSO library
//!
//! Obtains and maintains an authenticated ServiceNow session through Okta SAML
//! federation (IDX sign-in with TOTP MFA) and persists it for other tools.

#![deny(dead_code)]

pub mod auth;
pub mod cli;
pub mod config;
