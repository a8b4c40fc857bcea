//! OpenID Connect discovery document
//!
//! Fetched once when the provider session is created. Any failure here is
//! reported as [`AuthError::ProviderInit`] since no session can exist without
//! the provider's endpoints.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, error};
use url::Url;

use crate::error::{AuthError, AuthResult};

/// The subset of OIDC provider metadata the session needs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderMetadata {
    /// Issuer identifier
    pub issuer: String,
    /// Authorization endpoint (interactive sign-in)
    pub authorization_endpoint: String,
    /// Token endpoint (code exchange and refresh)
    pub token_endpoint: String,
    /// Userinfo endpoint (profile)
    pub userinfo_endpoint: String,
    /// Signing-key set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwks_uri: Option<String>,
    /// RFC 7009 revocation endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revocation_endpoint: Option<String>,
    /// RP-initiated logout endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_session_endpoint: Option<String>,
    /// Everything else the provider advertises
    #[serde(flatten)]
    pub additional_fields: HashMap<String, serde_json::Value>,
}

impl ProviderMetadata {
    /// Fetch and parse the discovery document
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::ProviderInit`] when the document is unreachable,
    /// answers with a non-success status, does not parse, or names an endpoint
    /// that is not a URL.
    pub async fn fetch(client: &reqwest::Client, discovery_url: &str) -> AuthResult<Self> {
        debug!(discovery_url, "Fetching OIDC discovery document");

        let response = client.get(discovery_url).send().await.map_err(|e| {
            error!(discovery_url, error = %e, "Discovery endpoint unreachable");
            AuthError::provider_init(format!("discovery endpoint unreachable: {e}"))
        })?;

        if !response.status().is_success() {
            error!(discovery_url, status = %response.status(), "Discovery endpoint returned error status");
            return Err(AuthError::provider_init(format!(
                "discovery endpoint returned status {}",
                response.status()
            )));
        }

        let metadata: Self = response.json().await.map_err(|e| {
            AuthError::provider_init(format!("invalid discovery document: {e}"))
        })?;
        metadata.validate()?;

        debug!(issuer = %metadata.issuer, "Discovered provider endpoints");
        Ok(metadata)
    }

    fn validate(&self) -> AuthResult<()> {
        let endpoints = [
            ("authorization_endpoint", Some(&self.authorization_endpoint)),
            ("token_endpoint", Some(&self.token_endpoint)),
            ("userinfo_endpoint", Some(&self.userinfo_endpoint)),
            ("revocation_endpoint", self.revocation_endpoint.as_ref()),
        ];

        for (name, value) in endpoints {
            if let Some(value) = value {
                Url::parse(value).map_err(|e| {
                    AuthError::provider_init(format!("discovery field {name} is not a URL: {e}"))
                })?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parses_auth0_style_document() {
        let doc = json!({
            "issuer": "https://tenant.auth0.com/",
            "authorization_endpoint": "https://tenant.auth0.com/authorize",
            "token_endpoint": "https://tenant.auth0.com/oauth/token",
            "userinfo_endpoint": "https://tenant.auth0.com/userinfo",
            "jwks_uri": "https://tenant.auth0.com/.well-known/jwks.json",
            "revocation_endpoint": "https://tenant.auth0.com/oauth/revoke",
            "scopes_supported": ["openid", "profile", "email"],
        });

        let metadata: ProviderMetadata = serde_json::from_value(doc).unwrap();
        assert!(metadata.validate().is_ok());
        assert_eq!(
            metadata.revocation_endpoint.as_deref(),
            Some("https://tenant.auth0.com/oauth/revoke")
        );
        assert!(metadata.additional_fields.contains_key("scopes_supported"));
    }

    #[test]
    fn test_rejects_relative_endpoint() {
        let doc = json!({
            "issuer": "https://tenant.auth0.com/",
            "authorization_endpoint": "/authorize",
            "token_endpoint": "https://tenant.auth0.com/oauth/token",
            "userinfo_endpoint": "https://tenant.auth0.com/userinfo",
        });

        let metadata: ProviderMetadata = serde_json::from_value(doc).unwrap();
        assert!(metadata.validate().unwrap_err().is_fatal());
    }
}
