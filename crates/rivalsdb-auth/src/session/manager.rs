//! Client session lifecycle
//!
//! Boot: restore the provider session; if it is authenticated, fetch the
//! initial identity, otherwise consume any redirect parameters and fetch the
//! identity they produced. The refresh
//! loop starts immediately in both cases. After boot the manager offers
//! interactive sign-in, local sign-out and subscriber registration.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::broadcaster::IdentityBroadcaster;
use super::provisioning::UserProvisioner;
use super::redirect::Location;
use super::refresh::{RefreshHandle, RefreshLoop};
use super::store::{SignInStatus, TokenStore};
use crate::config::{ClientConfig, DEFAULT_REFRESH_INTERVAL};
use crate::error::{AuthError, AuthResult};
use crate::provider::{InteractiveAuthorizer, LoopbackAuthorizer};
use crate::types::IdentityClaims;

/// Result of [`SessionManager::sign_in`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignInOutcome {
    /// Signed in; the identity was delivered and provisioning dispatched
    SignedIn(IdentityClaims),
    /// The user abandoned the flow
    Cancelled,
    /// The flow completed but no usable identity could be fetched
    NoIdentity,
}

/// A booted session plus the identity known at boot
#[derive(Debug)]
pub struct SessionBootstrap {
    /// The running session
    pub manager: SessionManager,
    /// Identity restored at boot, if any
    pub identity: Option<IdentityClaims>,
}

/// Builder for [`SessionManager`]
#[derive(Debug)]
pub struct SessionManagerBuilder {
    store: TokenStore,
    broadcaster: IdentityBroadcaster,
    refresh_interval: Duration,
    provisioner: Option<UserProvisioner>,
}

impl SessionManagerBuilder {
    /// Set the silent refresh period (default 60s)
    #[must_use]
    pub fn refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    /// Register users with this provisioner after interactive sign-in
    #[must_use]
    pub fn provisioner(mut self, provisioner: UserProvisioner) -> Self {
        self.provisioner = Some(provisioner);
        self
    }

    /// Register the identity subscriber before boot
    #[must_use]
    pub fn on_identity<F>(self, callback: F) -> Self
    where
        F: Fn(IdentityClaims) + Send + Sync + 'static,
    {
        self.broadcaster.set_callback(callback);
        self
    }

    /// Boot the session
    ///
    /// The identity known at boot is returned and also delivered to a
    /// subscriber registered with [`on_identity`](Self::on_identity). A failed
    /// redirect handshake is logged and the session boots without an identity.
    pub async fn start(self, location: &mut dyn Location) -> SessionBootstrap {
        let refresh = RefreshLoop::new(
            self.store.clone(),
            self.broadcaster.clone(),
            self.refresh_interval,
        )
        .spawn();

        let identity = if self.store.is_authenticated().await {
            debug!("Restored authenticated session");
            self.store.fetch_identity().await
        } else {
            match self.store.consume_redirect_callback(location).await {
                Ok(true) => self.store.fetch_identity().await,
                Ok(false) => None,
                Err(e) => {
                    warn!(error = %e, "Redirect sign-in could not be completed");
                    None
                }
            }
        };

        if let Some(claims) = &identity {
            self.broadcaster.notify(claims.clone());
        }
        info!(signed_in = identity.is_some(), "Session booted");

        SessionBootstrap {
            manager: SessionManager {
                store: self.store,
                broadcaster: self.broadcaster,
                provisioner: self.provisioner,
                refresh,
            },
            identity,
        }
    }
}

/// The client-side session lifecycle
#[derive(Debug)]
pub struct SessionManager {
    store: TokenStore,
    broadcaster: IdentityBroadcaster,
    provisioner: Option<UserProvisioner>,
    refresh: RefreshHandle,
}

impl SessionManager {
    /// Start configuring a session over an existing store
    pub fn builder(store: TokenStore) -> SessionManagerBuilder {
        SessionManagerBuilder {
            store,
            broadcaster: IdentityBroadcaster::new(),
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            provisioner: None,
        }
    }

    /// Connect to the provider and boot, signing in via the loopback listener
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::ProviderInit`](crate::AuthError::ProviderInit) for
    /// malformed config or an unreachable provider; no session exists
    /// afterwards.
    pub async fn create(
        config: ClientConfig,
        location: &mut dyn Location,
    ) -> AuthResult<SessionBootstrap> {
        Self::create_with(config, Arc::new(LoopbackAuthorizer::new()), location).await
    }

    /// Like [`SessionManager::create`] with a custom interactive authorizer
    ///
    /// # Errors
    ///
    /// Same as [`SessionManager::create`].
    pub async fn create_with(
        config: ClientConfig,
        authorizer: Arc<dyn InteractiveAuthorizer>,
        location: &mut dyn Location,
    ) -> AuthResult<SessionBootstrap> {
        let api_base_url = config.api_base_url.clone();
        let refresh_interval = config.refresh_interval;
        // Validates the whole config, api_base_url included
        let store = TokenStore::initialize_with(config, authorizer).await?;
        let provisioner = api_base_url
            .as_deref()
            .map(UserProvisioner::new)
            .transpose()
            .map_err(|e| AuthError::provider_init(e.to_string()))?;

        let mut builder = Self::builder(store).refresh_interval(refresh_interval);
        if let Some(provisioner) = provisioner {
            builder = builder.provisioner(provisioner);
        }
        Ok(builder.start(location).await)
    }

    /// Interactive sign-in
    ///
    /// On success the identity is delivered to the subscriber and user
    /// provisioning is dispatched without waiting for it.
    ///
    /// # Errors
    ///
    /// Provider failures other than user cancellation.
    pub async fn sign_in(&self) -> AuthResult<SignInOutcome> {
        if self.store.begin_interactive_sign_in().await? == SignInStatus::Cancelled {
            return Ok(SignInOutcome::Cancelled);
        }

        let Some(claims) = self.store.fetch_identity().await else {
            warn!("Sign-in completed but no usable identity was returned");
            return Ok(SignInOutcome::NoIdentity);
        };

        self.broadcaster.notify(claims.clone());
        if let Some(provisioner) = &self.provisioner {
            provisioner.spawn(claims.clone());
        }
        info!(user_id = %claims.user_id, "Signed in");
        Ok(SignInOutcome::SignedIn(claims))
    }

    /// Clear the local session without contacting the provider
    ///
    /// # Errors
    ///
    /// Returns the provider's error when the local cache cannot be cleared.
    pub async fn sign_out(&self) -> AuthResult<()> {
        self.store.end_session(true).await?;
        info!("Signed out");
        Ok(())
    }

    /// Clear the local session and revoke it at the provider
    ///
    /// # Errors
    ///
    /// Returns the provider's error when revocation fails.
    pub async fn sign_out_everywhere(&self) -> AuthResult<()> {
        self.store.end_session(false).await?;
        info!("Signed out and revoked provider session");
        Ok(())
    }

    /// Register the identity subscriber, replacing any previous one
    pub fn set_identity_callback<F>(&self, callback: F) -> &Self
    where
        F: Fn(IdentityClaims) + Send + Sync + 'static,
    {
        self.broadcaster.set_callback(callback);
        self
    }

    /// Fetch the current identity without notifying
    pub async fn fetch_identity(&self) -> Option<IdentityClaims> {
        self.store.fetch_identity().await
    }

    /// Whether a session exists
    pub async fn is_authenticated(&self) -> bool {
        self.store.is_authenticated().await
    }

    /// The token store
    pub fn store(&self) -> &TokenStore {
        &self.store
    }

    /// The identity broadcaster
    pub fn broadcaster(&self) -> &IdentityBroadcaster {
        &self.broadcaster
    }

    /// Stop the refresh loop and wait for it
    pub async fn shutdown(self) {
        self.refresh.shutdown().await;
    }
}
