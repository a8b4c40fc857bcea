//! Signing-key set (JWKS) fetching and caching
//!
//! The key set is the only process-wide shared state on the server side. It is
//! read-mostly: every request reads it, and a refetch happens only when the TTL
//! lapses or a token names a key id we have not seen (key rotation).
//!
//! - **TTL-based caching**: default 10 minutes
//! - **Rate-limited forced refresh**: at most one every 5 seconds
//! - **HTTPS only**, except loopback hosts

use std::sync::Arc;
use std::time::{Duration, Instant};

use jsonwebtoken::jwk::JwkSet;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::config::is_secure_endpoint;
use crate::error::{AuthError, AuthResult};

/// Default key-set TTL
pub const DEFAULT_JWKS_TTL: Duration = Duration::from_secs(600);

/// Minimum spacing between forced refreshes
pub const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
struct CachedJwks {
    jwks: JwkSet,
    cached_at: Instant,
    ttl: Duration,
}

impl CachedJwks {
    fn is_valid(&self) -> bool {
        self.cached_at.elapsed() < self.ttl
    }
}

/// Client for fetching and caching the provider's signing-key set
///
/// Cloning is cheap and clones share the cache.
///
/// # Example
///
/// ```rust,no_run
/// # use rivalsdb_auth::jwt::JwksClient;
/// # async fn example() -> rivalsdb_auth::AuthResult<()> {
/// let client = JwksClient::new("https://tenant.auth0.com/.well-known/jwks.json")?;
/// let jwks = client.get_jwks().await?;
/// if let Some(key) = jwks.find("key-id-123") {
///     // verify with key
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct JwksClient {
    jwks_uri: String,
    cache: Arc<RwLock<Option<CachedJwks>>>,
    http_client: reqwest::Client,
    cache_ttl: Duration,
    min_refresh_interval: Duration,
    last_refresh: Arc<RwLock<Option<Instant>>>,
}

impl JwksClient {
    /// Create a client with the default TTL
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] when the URI is not HTTPS (loopback
    /// hosts may use HTTP) or the HTTP client cannot be built.
    pub fn new(jwks_uri: impl Into<String>) -> AuthResult<Self> {
        Self::with_ttl(jwks_uri, DEFAULT_JWKS_TTL)
    }

    /// Create a client with a custom TTL
    ///
    /// # Errors
    ///
    /// Same as [`JwksClient::new`].
    pub fn with_ttl(jwks_uri: impl Into<String>, cache_ttl: Duration) -> AuthResult<Self> {
        let jwks_uri = jwks_uri.into();
        ensure_secure_uri(&jwks_uri)?;

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            jwks_uri,
            cache: Arc::new(RwLock::new(None)),
            http_client,
            cache_ttl,
            min_refresh_interval: MIN_REFRESH_INTERVAL,
            last_refresh: Arc::new(RwLock::new(None)),
        })
    }

    /// Get the key set, from cache when fresh
    ///
    /// # Errors
    ///
    /// Returns an error when the endpoint is unreachable, answers with a
    /// non-success status, or the body is not a key set.
    pub async fn get_jwks(&self) -> AuthResult<JwkSet> {
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.as_ref()
                && cached.is_valid()
            {
                debug!(jwks_uri = %self.jwks_uri, "Using cached JWKS");
                return Ok(cached.jwks.clone());
            }
        }

        self.fetch_and_cache().await
    }

    /// Force a refetch, ignoring the TTL
    ///
    /// Rate limited: within [`MIN_REFRESH_INTERVAL`] of the previous fetch this
    /// returns whatever [`JwksClient::get_jwks`] returns.
    ///
    /// # Errors
    ///
    /// Same as [`JwksClient::get_jwks`].
    pub async fn refresh(&self) -> AuthResult<JwkSet> {
        {
            let last_refresh = self.last_refresh.read().await;
            if let Some(last) = *last_refresh
                && last.elapsed() < self.min_refresh_interval
            {
                warn!(
                    jwks_uri = %self.jwks_uri,
                    since_last_ms = last.elapsed().as_millis(),
                    "JWKS refresh rate limited, using cache"
                );
                return self.get_jwks().await;
            }
        }

        self.fetch_and_cache().await
    }

    async fn fetch_and_cache(&self) -> AuthResult<JwkSet> {
        info!(jwks_uri = %self.jwks_uri, "Fetching JWKS from endpoint");

        // Record the attempt up front so a failing endpoint is rate limited too
        *self.last_refresh.write().await = Some(Instant::now());

        let response = self
            .http_client
            .get(&self.jwks_uri)
            .send()
            .await
            .map_err(|e| {
                error!(jwks_uri = %self.jwks_uri, error = %e, "Failed to fetch JWKS");
                AuthError::provider(format!("JWKS fetch failed: {e}"))
            })?;

        if !response.status().is_success() {
            error!(
                jwks_uri = %self.jwks_uri,
                status = %response.status(),
                "JWKS endpoint returned error status"
            );
            return Err(AuthError::provider(format!(
                "JWKS endpoint returned status {}",
                response.status()
            )));
        }

        let jwks: JwkSet = response.json().await.map_err(|e| {
            error!(jwks_uri = %self.jwks_uri, error = %e, "Failed to parse JWKS JSON");
            AuthError::provider(format!("Invalid JWKS format: {e}"))
        })?;

        info!(
            jwks_uri = %self.jwks_uri,
            key_count = jwks.keys.len(),
            "Successfully fetched JWKS"
        );

        *self.cache.write().await = Some(CachedJwks {
            jwks: jwks.clone(),
            cached_at: Instant::now(),
            ttl: self.cache_ttl,
        });

        Ok(jwks)
    }

    /// The key-set endpoint
    pub fn jwks_uri(&self) -> &str {
        &self.jwks_uri
    }

    /// Drop the cached key set
    pub async fn clear_cache(&self) {
        *self.cache.write().await = None;
        debug!(jwks_uri = %self.jwks_uri, "JWKS cache cleared");
    }
}

fn ensure_secure_uri(uri: &str) -> AuthResult<()> {
    let parsed = Url::parse(uri)
        .map_err(|e| AuthError::configuration("jwks_uri", format!("invalid JWKS URI: {e}")))?;

    if !is_secure_endpoint(&parsed) {
        return Err(AuthError::configuration(
            "jwks_uri",
            "JWKS endpoint must use HTTPS (HTTP only allowed for loopback hosts)",
        ));
    }
    Ok(())
}
