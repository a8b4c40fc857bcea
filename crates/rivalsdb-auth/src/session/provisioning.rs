//! User registration after interactive sign-in
//!
//! One authenticated `POST /api/v2/users` with the signed-in email. The session
//! manager fires it and does not wait: its outcome never changes whether the
//! sign-in counts as complete.

use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use url::Url;

use crate::error::{AuthError, AuthResult};
use crate::types::IdentityClaims;

/// Registration endpoint path, relative to the API origin
pub const USERS_PATH: &str = "/api/v2/users";

#[derive(Debug, Serialize)]
struct RegisterUser<'a> {
    email: &'a str,
}

/// Client for the user-registration endpoint
#[derive(Debug, Clone)]
pub struct UserProvisioner {
    client: reqwest::Client,
    endpoint: Url,
}

impl UserProvisioner {
    /// Target `{api_base_url}/api/v2/users`
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] when the base URL does not parse,
    /// or an HTTP error when the client cannot be built.
    pub fn new(api_base_url: &str) -> AuthResult<Self> {
        let endpoint = Url::parse(api_base_url)
            .and_then(|base| base.join(USERS_PATH))
            .map_err(|e| {
                AuthError::configuration("api_base_url", format!("invalid API base URL: {e}"))
            })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self { client, endpoint })
    }

    /// Registration endpoint
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Register the user and wait for the answer
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Provisioning`] when the request fails or the
    /// endpoint answers with a non-success status.
    pub async fn provision(&self, claims: &IdentityClaims) -> AuthResult<()> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(&claims.token)
            .json(&RegisterUser {
                email: &claims.email,
            })
            .send()
            .await
            .map_err(|e| AuthError::provisioning(e.to_string(), None))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::provisioning(
                format!("registration endpoint returned {status}"),
                Some(status.as_u16()),
            ));
        }

        debug!(user_id = %claims.user_id, "User registered");
        Ok(())
    }

    /// Register in the background; failures are logged, never returned
    pub fn spawn(&self, claims: IdentityClaims) -> JoinHandle<()> {
        let provisioner = self.clone();
        tokio::spawn(async move {
            if let Err(e) = provisioner.provision(&claims).await {
                let status = match &e {
                    AuthError::Provisioning { status, .. } => *status,
                    _ => None,
                };
                warn!(
                    user_id = %claims.user_id,
                    endpoint = %provisioner.endpoint,
                    status = ?status,
                    error = %e,
                    "User provisioning failed"
                );
            }
        })
    }
}
