//! Shared infrastructure for integration tests
//!
//! A wiremock-backed identity provider tenant serving discovery, token,
//! userinfo, revocation and JWKS endpoints on loopback.

#![allow(dead_code)]

use std::sync::Arc;

use rivalsdb_auth::provider::{AuthorizationResponse, CallbackAuthorizer, InteractiveAuthorizer};
use rivalsdb_auth::test_utils::test_jwks;
use rivalsdb_auth::{ClientConfig, ServerConfig};
use serde_json::{Value, json};
use url::Url;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const CLIENT_ID: &str = "rivalsdb-web";
pub const AUDIENCE: &str = "https://api.rivalsdb.app";

/// Mock identity provider tenant
pub struct MockTenant {
    pub server: MockServer,
}

impl MockTenant {
    /// Start a tenant with a discovery document (revocation advertised)
    pub async fn start() -> Self {
        Self::start_with_revocation(true).await
    }

    /// Start a tenant, advertising a revocation endpoint or not
    pub async fn start_with_revocation(revocation: bool) -> Self {
        let server = MockServer::start().await;
        let base = server.uri();

        let mut discovery = json!({
            "issuer": format!("{base}/"),
            "authorization_endpoint": format!("{base}/authorize"),
            "token_endpoint": format!("{base}/oauth/token"),
            "userinfo_endpoint": format!("{base}/userinfo"),
            "jwks_uri": format!("{base}/.well-known/jwks.json"),
        });
        if revocation {
            discovery["revocation_endpoint"] = json!(format!("{base}/oauth/revoke"));
        }

        Mock::given(method("GET"))
            .and(path("/.well-known/openid-configuration"))
            .respond_with(ResponseTemplate::new(200).set_body_json(discovery))
            .mount(&server)
            .await;

        Self { server }
    }

    /// Tenant domain as configured by applications (scheme included)
    pub fn domain(&self) -> String {
        self.server.uri()
    }

    /// Expected `iss` claim
    pub fn issuer(&self) -> String {
        format!("{}/", self.server.uri())
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig::new(self.domain(), CLIENT_ID, AUDIENCE)
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig::new(self.domain(), AUDIENCE)
    }

    /// Authorization-code grant answers with these tokens
    pub async fn mount_code_exchange(
        &self,
        access_token: &str,
        refresh_token: Option<&str>,
        expires_in: u64,
    ) {
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .respond_with(token_response(access_token, refresh_token, expires_in))
            .mount(&self.server)
            .await;
    }

    /// Refresh-token grant answers with a new access token
    pub async fn mount_refresh(&self, access_token: &str, expires_in: u64) {
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .respond_with(token_response(access_token, None, expires_in))
            .mount(&self.server)
            .await;
    }

    /// Refresh-token grant is rejected with `error`
    pub async fn mount_refresh_error(&self, error: &str) {
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": error,
                "error_description": "refresh token revoked",
            })))
            .mount(&self.server)
            .await;
    }

    pub async fn mount_userinfo(&self, profile: Value) {
        Mock::given(method("GET"))
            .and(path("/userinfo"))
            .respond_with(ResponseTemplate::new(200).set_body_json(profile))
            .mount(&self.server)
            .await;
    }

    /// Revocation endpoint, expected to be hit `times` times
    pub async fn mount_revocation(&self, times: u64) {
        self.mount_revocation_status(200, times).await;
    }

    /// Revocation endpoint answering with `status`
    pub async fn mount_revocation_status(&self, status: u16, times: u64) {
        Mock::given(method("POST"))
            .and(path("/oauth/revoke"))
            .and(header("content-type", "application/x-www-form-urlencoded"))
            .respond_with(ResponseTemplate::new(status))
            .expect(times)
            .mount(&self.server)
            .await;
    }

    /// JWKS publishing the primary test key, expected to be fetched `times` times
    pub async fn mount_jwks(&self, times: u64) {
        Mock::given(method("GET"))
            .and(path("/.well-known/jwks.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(test_jwks()))
            .expect(times)
            .mount(&self.server)
            .await;
    }
}

fn token_response(access_token: &str, refresh_token: Option<&str>, expires_in: u64) -> ResponseTemplate {
    let mut body = json!({
        "access_token": access_token,
        "token_type": "Bearer",
        "expires_in": expires_in,
        "scope": "openid profile email",
    });
    if let Some(refresh) = refresh_token {
        body["refresh_token"] = json!(refresh);
    }
    ResponseTemplate::new(200).set_body_json(body)
}

/// `state` query parameter of an authorization URL
pub fn state_of(url: &Url) -> String {
    url.query_pairs()
        .find(|(key, _)| key == "state")
        .map(|(_, value)| value.into_owned())
        .expect("authorization URL carries state")
}

/// User agent that approves immediately with `code`
pub fn approving_authorizer(code: &'static str) -> Arc<dyn InteractiveAuthorizer> {
    Arc::new(CallbackAuthorizer::new(move |url: Url| async move {
        Ok(AuthorizationResponse::success(code, state_of(&url)))
    }))
}

/// User agent where the user declines
pub fn declining_authorizer() -> Arc<dyn InteractiveAuthorizer> {
    Arc::new(CallbackAuthorizer::new(|url: Url| async move {
        Ok(AuthorizationResponse::error(
            "access_denied",
            Some(state_of(&url)),
        ))
    }))
}
