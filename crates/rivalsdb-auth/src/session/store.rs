//! Token store adapter
//!
//! A thin, forgiving layer over an [`IdentityProvider`]. Everything the
//! refresh loop calls here is infallible: provider trouble becomes "not
//! authenticated" or "no identity right now".

use std::sync::Arc;

use tracing::{debug, info};

use super::redirect::{Location, RedirectParams, strip_redirect_params};
use crate::config::ClientConfig;
use crate::error::AuthResult;
use crate::provider::{IdentityProvider, InteractiveAuthorizer, LoopbackAuthorizer, OidcProvider};
use crate::types::IdentityClaims;

/// How an interactive sign-in ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignInStatus {
    /// The provider now holds a session
    Completed,
    /// The user abandoned the flow
    Cancelled,
}

/// Handle to the provider session
#[derive(Debug, Clone)]
pub struct TokenStore {
    provider: Arc<dyn IdentityProvider>,
}

impl TokenStore {
    /// Establish or restore a provider session, signing in via the loopback
    /// redirect listener
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::ProviderInit`](crate::AuthError::ProviderInit) when
    /// the config is malformed or the provider is unreachable.
    pub async fn initialize(config: ClientConfig) -> AuthResult<Self> {
        Self::initialize_with(config, Arc::new(LoopbackAuthorizer::new())).await
    }

    /// Like [`TokenStore::initialize`] with a custom interactive authorizer
    ///
    /// # Errors
    ///
    /// Same as [`TokenStore::initialize`].
    pub async fn initialize_with(
        config: ClientConfig,
        authorizer: Arc<dyn InteractiveAuthorizer>,
    ) -> AuthResult<Self> {
        let provider = OidcProvider::connect(config, authorizer).await?;
        Ok(Self::from_provider(Arc::new(provider)))
    }

    /// Wrap an existing provider
    pub fn from_provider(provider: Arc<dyn IdentityProvider>) -> Self {
        Self { provider }
    }

    /// Underlying provider
    pub fn provider(&self) -> &Arc<dyn IdentityProvider> {
        &self.provider
    }

    /// Whether a session exists; `false` on any provider error
    pub async fn is_authenticated(&self) -> bool {
        match self.provider.is_authenticated().await {
            Ok(authenticated) => authenticated,
            Err(e) => {
                debug!(error = %e, "Authentication check failed, treating as signed out");
                false
            }
        }
    }

    /// Fresh token plus profile, fetched concurrently
    ///
    /// `None` when either fetch fails or the profile lacks `sub` or `email`.
    pub async fn fetch_identity(&self) -> Option<IdentityClaims> {
        let (token, user) = tokio::join!(
            self.provider.get_token_silently(),
            self.provider.get_user()
        );

        let token = token
            .inspect_err(|e| debug!(error = %e, "Silent token fetch failed"))
            .ok()?;
        let profile = user
            .inspect_err(|e| debug!(error = %e, "Profile fetch failed"))
            .ok()??;

        IdentityClaims::from_profile(token, &profile)
            .inspect_err(|e| debug!(error = %e, "Profile unusable"))
            .ok()
    }

    /// Run the interactive sign-in until it completes or the user cancels
    ///
    /// # Errors
    ///
    /// Any provider failure other than user cancellation.
    pub async fn begin_interactive_sign_in(&self) -> AuthResult<SignInStatus> {
        match self.provider.login_interactive().await {
            Ok(()) => Ok(SignInStatus::Completed),
            Err(e) if e.is_cancellation() => {
                info!("Interactive sign-in cancelled");
                Ok(SignInStatus::Cancelled)
            }
            Err(e) => Err(e),
        }
    }

    /// End the session; `local_only` skips provider-side revocation
    ///
    /// # Errors
    ///
    /// Returns the provider's error when clearing or revoking fails.
    pub async fn end_session(&self, local_only: bool) -> AuthResult<()> {
        self.provider.logout(local_only).await
    }

    /// Complete a redirect sign-in carried by `location`, then strip its
    /// parameters
    ///
    /// Returns whether a handshake ran. Without both `code` and `state` this is
    /// a no-op. The parameters are stripped even when the handshake fails, since
    /// an authorization code is single-use.
    ///
    /// # Errors
    ///
    /// Returns the provider's error when the handshake fails.
    pub async fn consume_redirect_callback(&self, location: &mut dyn Location) -> AuthResult<bool> {
        let Some(params) = RedirectParams::from_url(location.current()) else {
            return Ok(false);
        };

        debug!("Consuming redirect callback parameters");
        let result = self
            .provider
            .handle_redirect_callback(&params.code, &params.state)
            .await;

        let stripped = strip_redirect_params(location.current());
        location.replace(stripped);

        result.map(|()| true)
    }
}
