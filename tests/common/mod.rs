//! Shared fixtures for the HTTP-level tests: a mock service provider and a
//! mock identity provider on separate wiremock servers.

#![allow(dead_code)]

use serde_json::{json, Value};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use support_sso::auth::{AuthError, MfaProvider};
use support_sso::config::{Config, DEFAULT_SSO_ID};

pub const USERNAME: &str = "jdoe@example.edu";
pub const PASSWORD: &str = "correct horse";
pub const TOTP: &str = "123456";
pub const GLIDE: &str = "glide-abc123";

/// Config pointing at the two mock servers
pub fn config(sp: &MockServer, idp: &MockServer, session_file: &Path) -> Config {
    let sp = sp.uri();
    let idp = idp.uri();
    let session_file = session_file.display().to_string();
    Config::from_lookup(move |key| match key {
        "ELLUCIAN_SUPPORT_USER" => Some(USERNAME.to_string()),
        "ELLUCIAN_SUPPORT_PW" => Some(PASSWORD.to_string()),
        "SUPPORT_SP_URL" => Some(sp.clone()),
        "SUPPORT_IDP_URL" => Some(idp.clone()),
        "SUPPORT_SESSION_FILE" => Some(session_file.clone()),
        "DOWNLOAD_SSO_URL" => Some(format!("{}/home/downloadcenter/0oa1/aln1", idp)),
        _ => None,
    })
    .expect("config")
}

/// MFA provider that counts how often it is asked
#[derive(Default)]
pub struct CountingMfa {
    calls: AtomicUsize,
}

impl CountingMfa {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl MfaProvider for CountingMfa {
    async fn mfa_code(&self) -> Result<String, AuthError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!(" {}\n", TOTP))
    }
}

// =============================================================================
// Service provider
// =============================================================================

/// Target page; sets the pre-login session cookie and reports `logged_in`
pub async fn mount_target(sp: &MockServer, logged_in: &str) {
    Mock::given(method("GET"))
        .and(path("/customer_center"))
        .and(query_param("id", "customer_center_home"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Set-Cookie", "JSESSIONID=sp-session-1; Path=/")
                .insert_header("X-Is-Logged-In", logged_in)
                .set_body_string("<html>Customer Center</html>"),
        )
        .mount(sp)
        .await;
}

/// SSO initiation (only answered when the Referer names the target page)
/// and the auth redirect page carrying the IdP app URL
pub async fn mount_sso_initiation(sp: &MockServer, idp: &MockServer) {
    let target = format!("{}/customer_center?id=customer_center_home", sp.uri());
    Mock::given(method("GET"))
        .and(path("/login_with_sso.do"))
        .and(query_param("glide_sso_id", DEFAULT_SSO_ID))
        .and(header("Referer", target.as_str()))
        .respond_with(
            ResponseTemplate::new(302).insert_header("Location", "/auth_redirect.do?sysparm_x=1"),
        )
        .mount(sp)
        .await;

    mount_auth_redirect(sp, &auth_redirect_page(idp)).await;
}

/// SP page that hands the browser over to the IdP app URL
pub fn auth_redirect_page(idp: &MockServer) -> String {
    format!(
        r#"<html><script>
            var redirect = "{}/app/servicenow/exk1/sso/saml?SAMLRequest=abc&amp;RelayState=xyz";
            top.location.href = redirect;
        </script></html>"#,
        idp.uri()
    )
}

pub async fn mount_auth_redirect(sp: &MockServer, page: &str) {
    Mock::given(method("GET"))
        .and(path("/auth_redirect.do"))
        .respond_with(ResponseTemplate::new(200).set_body_string(page))
        .mount(sp)
        .await;
}

/// SAML consumer; `glide` controls whether the session cookie is issued
pub async fn mount_acs(sp: &MockServer, idp: &MockServer, glide: bool, expected: u64) {
    let mut response = ResponseTemplate::new(302)
        .insert_header("Location", "/customer_center?id=customer_center_home");
    if glide {
        response = response.insert_header(
            "Set-Cookie",
            format!("glide_session_store={}; Path=/; HttpOnly", GLIDE).as_str(),
        );
    }
    Mock::given(method("POST"))
        .and(path("/nav_to.do"))
        .and(header("Origin", idp.uri().as_str()))
        .and(header("Sec-Fetch-Site", "cross-site"))
        .respond_with(response)
        .expect(expected)
        .mount(sp)
        .await;
}

// =============================================================================
// Identity provider
// =============================================================================

pub async fn mount_signin_page(idp: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/app/servicenow/exk1/sso/saml"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Set-Cookie", "idx=okta-idx-1; Path=/")
                .set_body_string(
                    r#"<script>var oktaData = {"signIn":{"stateToken":"02\x2Dbootstrap\x5Ftoken"}};</script>"#,
                ),
        )
        .mount(idp)
        .await;
}

pub async fn mount_introspect(idp: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/idp/idx/introspect"))
        .and(body_partial_json(json!({ "stateToken": "02-bootstrap_token" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "stateHandle": "h1" })))
        .mount(idp)
        .await;
}

pub fn success_body(idp: &MockServer) -> Value {
    json!({
        "stateHandle": "h-final",
        "success": {
            "name": "success-redirect",
            "href": format!("{}/login/token/redirect?stateToken=final", idp.uri())
        }
    })
}

pub fn remediation_body() -> Value {
    json!({
        "stateHandle": "h2",
        "remediation": {
            "value": [{
                "name": "select-authenticator-authenticate",
                "value": [{
                    "name": "authenticator",
                    "options": [{
                        "label": "Okta Verify",
                        "value": { "form": { "value": [
                            { "name": "id", "value": "aut-okta-verify" },
                            { "name": "methodType", "value": "totp" }
                        ]}}
                    }]
                }]
            }]
        }
    })
}

pub async fn mount_identify(idp: &MockServer, body: Value) {
    Mock::given(method("POST"))
        .and(path("/idp/idx/identify"))
        .and(body_partial_json(json!({
            "identifier": USERNAME,
            "credentials": { "passcode": PASSWORD },
            "stateHandle": "h1"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(idp)
        .await;
}

pub async fn mount_challenge(idp: &MockServer, expected: u64) {
    Mock::given(method("POST"))
        .and(path("/idp/idx/challenge"))
        .and(body_partial_json(json!({
            "authenticator": { "id": "aut-okta-verify", "methodType": "totp" },
            "stateHandle": "h2"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "stateHandle": "h3" })))
        .expect(expected)
        .mount(idp)
        .await;
}

pub async fn mount_answer(idp: &MockServer, response: ResponseTemplate, expected: u64) {
    Mock::given(method("POST"))
        .and(path("/idp/idx/challenge/answer"))
        .and(body_partial_json(json!({
            "credentials": { "totp": TOTP },
            "stateHandle": "h3"
        })))
        .respond_with(response)
        .expect(expected)
        .mount(idp)
        .await;
}

pub async fn mount_saml_form(idp: &MockServer, sp: &MockServer) {
    let form = format!(
        r#"<html><body onload="document.forms[0].submit()">
        <form id="appForm" action="{}/nav_to.do" method="POST">
            <input name="SAMLResponse" type="hidden" value="PHNhbWw&#x2B;YXNzZXJ0aW9u&#x3d;"/>
            <input name="RelayState" type="hidden" value="relay&#x2f;target"/>
        </form></body></html>"#,
        sp.uri()
    );
    Mock::given(method("GET"))
        .and(path("/login/token/redirect"))
        .respond_with(ResponseTemplate::new(200).set_body_string(form))
        .mount(idp)
        .await;
}

/// Every IdP endpoint of the MFA path
pub async fn mount_idp_with_mfa(idp: &MockServer, sp: &MockServer) {
    mount_signin_page(idp).await;
    mount_introspect(idp).await;
    mount_identify(idp, remediation_body()).await;
    mount_challenge(idp, 1).await;
    mount_answer(
        idp,
        ResponseTemplate::new(200).set_body_json(success_body(idp)),
        1,
    )
    .await;
    mount_saml_form(idp, sp).await;
}
