//! OpenID Connect provider session
//!
//! Public-client flows only (no client secret): authorization code with PKCE
//! and an `audience` parameter, refresh-token grant, RFC 7009 revocation.
//! Revocation is a plain form POST held to the same HTTPS-or-loopback rule as
//! key fetching.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use oauth2::basic::{BasicClient, BasicErrorResponse, BasicErrorResponseType, BasicTokenResponse};
use oauth2::{
    AuthUrl, AuthorizationCode, ClientId, CsrfToken, EndpointNotSet, EndpointSet,
    PkceCodeChallenge, PkceCodeVerifier, RedirectUrl, RefreshToken, RequestTokenError, Scope,
    TokenResponse, TokenUrl,
};
use tracing::{debug, info, warn};
use url::Url;

use super::cache::{CredentialCache, PendingAuthorization, StoredSession};
use super::discovery::ProviderMetadata;
use super::http_client::OAuth2HttpClient;
use super::{IdentityProvider, InteractiveAuthorizer};
use crate::config::{ClientConfig, is_secure_endpoint};
use crate::error::{AuthError, AuthResult};
use crate::types::UserProfile;

/// Access tokens expiring within this window are refreshed before use
pub const REFRESH_MARGIN_SECS: i64 = 60;

/// Lifetime assumed when the token response carries no `expires_in`
const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3600;

type OidcClient =
    BasicClient<EndpointSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

/// Provider session backed by an OIDC tenant
pub struct OidcProvider {
    config: ClientConfig,
    metadata: ProviderMetadata,
    client: OidcClient,
    http: OAuth2HttpClient,
    cache: CredentialCache,
    authorizer: Arc<dyn InteractiveAuthorizer>,
    refresh_lock: tokio::sync::Mutex<()>,
}

impl fmt::Debug for OidcProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OidcProvider")
            .field("issuer", &self.metadata.issuer)
            .field("client_id", &self.config.client_id)
            .field("audience", &self.config.audience)
            .field("cache", &self.cache.location())
            .field("authorizer", &self.authorizer)
            .field("pending", &self.cache.pending_transactions())
            .finish_non_exhaustive()
    }
}

impl OidcProvider {
    /// Discover the provider and restore any cached session
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::ProviderInit`] when the config is malformed or
    /// discovery fails. The message names the offending config key.
    pub async fn connect(
        config: ClientConfig,
        authorizer: Arc<dyn InteractiveAuthorizer>,
    ) -> AuthResult<Self> {
        config
            .validate()
            .map_err(|e| AuthError::provider_init(format!("malformed client config: {e}")))?;

        let http = OAuth2HttpClient::new()
            .map_err(|e| AuthError::provider_init(format!("HTTP client unavailable: {e}")))?;
        let metadata = ProviderMetadata::fetch(http.reqwest(), &config.discovery_url()).await?;
        let client = build_client(&config, &metadata)?;
        let cache = CredentialCache::open(config.cache_location.clone()).await?;

        info!(
            issuer = %metadata.issuer,
            client_id = %config.client_id,
            restored = cache.get().is_some(),
            "Provider session initialized"
        );

        Ok(Self {
            config,
            metadata,
            client,
            http,
            cache,
            authorizer,
            refresh_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Discovered provider endpoints
    pub fn metadata(&self) -> &ProviderMetadata {
        &self.metadata
    }

    /// Start a redirect-based sign-in
    ///
    /// Returns the URL to send the user to. The matching
    /// [`handle_redirect_callback`](IdentityProvider::handle_redirect_callback)
    /// call completes it, possibly in another process sharing the same
    /// local-storage cache.
    ///
    /// # Errors
    ///
    /// Returns an error when the pending transaction cannot be persisted.
    pub async fn begin_redirect(&self) -> AuthResult<Url> {
        Ok(self.authorization_url().await?.0)
    }

    async fn authorization_url(&self) -> AuthResult<(Url, CsrfToken)> {
        let (challenge, verifier) = PkceCodeChallenge::new_random_sha256();
        let (url, state) = self
            .client
            .authorize_url(CsrfToken::new_random)
            .add_scopes(self.config.scopes.iter().cloned().map(Scope::new))
            .add_extra_param("audience", self.config.audience.as_str())
            .set_pkce_challenge(challenge)
            .url();

        self.cache
            .begin_transaction(
                state.secret().clone(),
                PendingAuthorization::new(verifier.secret().clone()),
            )
            .await?;
        Ok((url, state))
    }

    async fn forget_pending(&self, state: &str) {
        if let Err(e) = self.cache.take_transaction(state).await {
            warn!(error = %e, "Failed to drop abandoned sign-in transaction");
        }
    }

    async fn fetch_userinfo(&self, access_token: &str) -> AuthResult<UserProfile> {
        let response = self
            .http
            .reqwest()
            .get(&self.metadata.userinfo_endpoint)
            .bearer_auth(access_token)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AuthError::provider(format!(
                "userinfo endpoint returned status {}",
                response.status()
            )));
        }
        Ok(response.json::<UserProfile>().await?)
    }

    /// RFC 7009 revocation of the refresh token, or the access token when
    /// there is none
    async fn revoke(&self, endpoint: &str, session: StoredSession) -> AuthResult<()> {
        let url = Url::parse(endpoint)
            .map_err(|e| AuthError::provider(format!("invalid revocation endpoint: {e}")))?;
        if !is_secure_endpoint(&url) {
            return Err(AuthError::provider(
                "revocation endpoint must use HTTPS (HTTP only allowed for loopback hosts)",
            ));
        }

        let (token, hint) = match session.refresh_token {
            Some(refresh) => (refresh, "refresh_token"),
            None => (session.access_token, "access_token"),
        };
        let form = [
            ("token", token.as_str()),
            ("token_type_hint", hint),
            ("client_id", self.config.client_id.as_str()),
        ];

        let response = self
            .http
            .reqwest()
            .post(url)
            .form(&form)
            .send()
            .await
            .map_err(|e| AuthError::provider(format!("token revocation failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::provider(format!(
                "revocation endpoint returned {status}: {body}"
            )));
        }

        info!(issuer = %self.metadata.issuer, hint, "Provider session revoked");
        Ok(())
    }
}

#[async_trait]
impl IdentityProvider for OidcProvider {
    async fn is_authenticated(&self) -> AuthResult<bool> {
        Ok(self
            .cache
            .get()
            .is_some_and(|session| session.is_usable(Utc::now())))
    }

    async fn get_token_silently(&self) -> AuthResult<String> {
        // One refresh at a time; refresh tokens may rotate
        let _guard = self.refresh_lock.lock().await;

        let session = self.cache.get().ok_or(AuthError::LoginRequired)?;
        let margin = chrono::Duration::seconds(REFRESH_MARGIN_SECS);
        if session.access_token_valid_for(margin, Utc::now()) {
            return Ok(session.access_token);
        }

        let Some(refresh_token) = session.refresh_token.clone() else {
            debug!("Access token expiring and no refresh token cached");
            return Err(AuthError::LoginRequired);
        };

        debug!(expires_at = %session.expires_at, "Refreshing access token");
        let response = match self
            .client
            .exchange_refresh_token(&RefreshToken::new(refresh_token.clone()))
            .request_async(&self.http)
            .await
        {
            Ok(response) => response,
            Err(e) => {
                let err = token_error(e);
                if matches!(err, AuthError::LoginRequired) {
                    warn!("Refresh token rejected, clearing cached session");
                    self.cache.clear().await?;
                }
                return Err(err);
            }
        };

        let refreshed = stored_session(&response, Some(refresh_token), session.user);
        let token = refreshed.access_token.clone();
        self.cache.store(refreshed).await?;
        Ok(token)
    }

    async fn get_user(&self) -> AuthResult<Option<UserProfile>> {
        let now = Utc::now();
        Ok(self
            .cache
            .get()
            .filter(|session| session.is_usable(now))
            .and_then(|session| session.user))
    }

    async fn login_interactive(&self) -> AuthResult<()> {
        let redirect_uri = Url::parse(&self.config.redirect_uri).map_err(|e| {
            AuthError::configuration("redirect_uri", format!("invalid redirect URI: {e}"))
        })?;
        let (url, state) = self.authorization_url().await?;
        let state = state.secret().clone();

        let response = match self.authorizer.authorize(url, &redirect_uri).await {
            Ok(response) => response,
            Err(e) => {
                self.forget_pending(&state).await;
                return Err(e);
            }
        };

        if let Some(error) = response.error {
            self.forget_pending(&state).await;
            if error == "access_denied" {
                debug!("User declined sign-in");
                return Err(AuthError::SignInCancelled);
            }
            let detail = response.error_description.unwrap_or_default();
            return Err(AuthError::provider(format!(
                "authorization failed: {error} {detail}"
            )));
        }

        if response.state.as_deref() != Some(state.as_str()) {
            self.forget_pending(&state).await;
            warn!("Authorization response state mismatch");
            return Err(AuthError::provider("authorization response state mismatch"));
        }

        let Some(code) = response.code else {
            self.forget_pending(&state).await;
            return Err(AuthError::provider("authorization response carried no code"));
        };

        self.handle_redirect_callback(&code, &state).await
    }

    async fn handle_redirect_callback(&self, code: &str, state: &str) -> AuthResult<()> {
        let pending = self
            .cache
            .take_transaction(state)
            .await?
            .ok_or_else(|| {
                AuthError::provider("unknown, expired or already used authorization state")
            })?;
        let verifier = PkceCodeVerifier::new(pending.code_verifier);

        let response = self
            .client
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .set_pkce_verifier(verifier)
            .request_async(&self.http)
            .await
            .map_err(token_error)?;

        let user = self.fetch_userinfo(response.access_token().secret()).await?;
        debug!(subject = ?user.subject(), "Fetched user profile");

        self.cache
            .store(stored_session(&response, None, Some(user)))
            .await?;
        info!("Sign-in completed");
        Ok(())
    }

    async fn logout(&self, local_only: bool) -> AuthResult<()> {
        let session = self.cache.get();
        self.cache.clear_transactions().await?;
        self.cache.clear().await?;

        if local_only {
            debug!("Session cleared locally");
            return Ok(());
        }

        match (session, &self.metadata.revocation_endpoint) {
            (Some(session), Some(endpoint)) => self.revoke(endpoint, session).await,
            (Some(_), None) => {
                warn!("Provider has no revocation endpoint, session cleared locally only");
                Ok(())
            }
            (None, _) => Ok(()),
        }
    }
}

fn build_client(config: &ClientConfig, metadata: &ProviderMetadata) -> AuthResult<OidcClient> {
    let auth_url = AuthUrl::new(metadata.authorization_endpoint.clone())
        .map_err(|e| AuthError::provider_init(format!("invalid authorization endpoint: {e}")))?;
    let token_url = TokenUrl::new(metadata.token_endpoint.clone())
        .map_err(|e| AuthError::provider_init(format!("invalid token endpoint: {e}")))?;
    let redirect_url = RedirectUrl::new(config.redirect_uri.clone())
        .map_err(|e| AuthError::provider_init(format!("invalid redirect_uri: {e}")))?;

    Ok(BasicClient::new(ClientId::new(config.client_id.clone()))
        .set_auth_uri(auth_url)
        .set_token_uri(token_url)
        .set_redirect_uri(redirect_url))
}

fn stored_session(
    response: &BasicTokenResponse,
    previous_refresh_token: Option<String>,
    user: Option<UserProfile>,
) -> StoredSession {
    let lifetime = response
        .expires_in()
        .and_then(|d| chrono::Duration::from_std(d).ok())
        .unwrap_or_else(|| chrono::Duration::seconds(DEFAULT_TOKEN_LIFETIME_SECS));

    StoredSession {
        access_token: response.access_token().secret().clone(),
        // A response without a refresh token keeps the one we already hold
        refresh_token: response
            .refresh_token()
            .map(|t| t.secret().clone())
            .or(previous_refresh_token),
        expires_at: Utc::now() + lifetime,
        scopes: response
            .scopes()
            .map(|scopes| scopes.iter().map(|s| s.as_str().to_owned()).collect())
            .unwrap_or_default(),
        user,
    }
}

fn token_error<E>(err: RequestTokenError<E, BasicErrorResponse>) -> AuthError
where
    E: std::error::Error + 'static,
{
    match err {
        RequestTokenError::ServerResponse(response)
            if *response.error() == BasicErrorResponseType::InvalidGrant =>
        {
            AuthError::LoginRequired
        }
        RequestTokenError::ServerResponse(response) => {
            AuthError::provider(format!("token endpoint rejected request: {response}"))
        }
        RequestTokenError::Request(e) => AuthError::provider(format!("token request failed: {e}")),
        RequestTokenError::Parse(e, _) => {
            AuthError::provider(format!("invalid token response: {e}"))
        }
        RequestTokenError::Other(message) => AuthError::provider(message),
    }
}
