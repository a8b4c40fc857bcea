//! Identity provider session
//!
//! [`IdentityProvider`] is the seam between the session lifecycle and whatever
//! actually talks to the provider. [`OidcProvider`] is the production
//! implementation (OIDC discovery, authorization code + PKCE, refresh tokens,
//! RFC 7009 revocation); tests substitute a scripted one.
//!
//! Interactive sign-in needs a user agent. [`InteractiveAuthorizer`] hands the
//! authorization URL to one and waits for the redirect back.

pub mod authorizer;
pub mod cache;
pub mod discovery;
pub mod http_client;
pub mod oidc;

pub use authorizer::{CallbackAuthorizer, LoopbackAuthorizer};
pub use cache::{CredentialCache, StoredSession};
pub use discovery::ProviderMetadata;
pub use http_client::OAuth2HttpClient;
pub use oidc::OidcProvider;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::AuthResult;
use crate::types::UserProfile;

/// Provider session operations the lifecycle manager depends on
#[async_trait]
pub trait IdentityProvider: Send + Sync + fmt::Debug {
    /// Whether the provider holds credentials that can yield a token
    async fn is_authenticated(&self) -> AuthResult<bool>;

    /// Access token for the configured audience, refreshing silently if needed
    ///
    /// Fails with [`AuthError::LoginRequired`](crate::AuthError::LoginRequired)
    /// when only an interactive sign-in could produce one.
    async fn get_token_silently(&self) -> AuthResult<String>;

    /// Profile of the signed-in user, if any
    async fn get_user(&self) -> AuthResult<Option<UserProfile>>;

    /// Run the interactive sign-in flow to completion
    ///
    /// Fails with [`AuthError::SignInCancelled`](crate::AuthError::SignInCancelled)
    /// when the user abandons it.
    async fn login_interactive(&self) -> AuthResult<()>;

    /// Complete a redirect-based sign-in with the returned `code` and `state`
    async fn handle_redirect_callback(&self, code: &str, state: &str) -> AuthResult<()>;

    /// Clear the session; also revoke provider-side unless `local_only`
    async fn logout(&self, local_only: bool) -> AuthResult<()>;
}

/// Parameters the provider sent back to the redirect URI
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationResponse {
    /// Authorization code
    #[serde(default)]
    pub code: Option<String>,
    /// Echoed state
    #[serde(default)]
    pub state: Option<String>,
    /// OAuth error code (e.g. `access_denied`)
    #[serde(default)]
    pub error: Option<String>,
    /// Human-readable error detail
    #[serde(default)]
    pub error_description: Option<String>,
}

impl AuthorizationResponse {
    /// Successful response
    pub fn success(code: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            state: Some(state.into()),
            ..Self::default()
        }
    }

    /// Error response
    pub fn error(error: impl Into<String>, state: Option<String>) -> Self {
        Self {
            state,
            error: Some(error.into()),
            ..Self::default()
        }
    }

    /// Read the response out of a redirect URL's query string
    pub fn from_url(url: &Url) -> Self {
        let mut response = Self::default();
        for (key, value) in url.query_pairs() {
            let slot = match key.as_ref() {
                "code" => &mut response.code,
                "state" => &mut response.state,
                "error" => &mut response.error,
                "error_description" => &mut response.error_description,
                _ => continue,
            };
            *slot = Some(value.into_owned());
        }
        response
    }
}

/// User agent that performs the interactive part of sign-in
#[async_trait]
pub trait InteractiveAuthorizer: Send + Sync + fmt::Debug {
    /// Send the user to `authorization_url` and return what arrives at
    /// `redirect_uri`
    ///
    /// A closed window or a timeout should be reported as
    /// [`AuthError::SignInCancelled`](crate::AuthError::SignInCancelled).
    async fn authorize(
        &self,
        authorization_url: Url,
        redirect_uri: &Url,
    ) -> AuthResult<AuthorizationResponse>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_from_success_url() {
        let url = Url::parse("http://127.0.0.1:8765/callback?code=abc&state=xyz").unwrap();
        assert_eq!(
            AuthorizationResponse::from_url(&url),
            AuthorizationResponse::success("abc", "xyz")
        );
    }

    #[test]
    fn test_response_from_error_url() {
        let url = Url::parse(
            "http://127.0.0.1:8765/callback?error=access_denied&error_description=User%20cancelled&state=xyz",
        )
        .unwrap();
        let response = AuthorizationResponse::from_url(&url);
        assert_eq!(response.error.as_deref(), Some("access_denied"));
        assert_eq!(response.error_description.as_deref(), Some("User cancelled"));
        assert!(response.code.is_none());
    }
}
