//! Bearer access-token validation against the provider's signing keys
//!
//! Checks, in order, failing on the first that does not hold:
//! 1. the token decodes as a compact JWS
//! 2. the header algorithm is allowlisted
//! 3. the header names a key id
//! 4. the key id resolves in the signing-key set (one forced refresh on miss)
//! 5. the signature verifies
//! 6. `exp`, `nbf`, `iss` and `aud` hold

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use tracing::{debug, warn};

use super::{AccessTokenClaims, JwksClient};
use crate::config::ServerConfig;
use crate::error::{AuthResult, VerificationFailure};
use crate::gate::TokenVerifier;
use crate::types::VerifiedPrincipal;

const REQUIRED_CLAIMS: [&str; 4] = ["exp", "iss", "aud", "sub"];

/// JWT validator bound to one issuer and one audience
///
/// # Example
///
/// ```rust,no_run
/// # use rivalsdb_auth::{ServerConfig, jwt::JwtValidator};
/// # async fn example() -> rivalsdb_auth::AuthResult<()> {
/// let config = ServerConfig::new("tenant.auth0.com", "https://api.rivalsdb.app");
/// let validator = JwtValidator::from_config(&config)?;
///
/// match validator.validate("eyJ0eXAi...").await {
///     Ok(principal) => println!("Valid token for: {}", principal.subject),
///     Err(e) => println!("Invalid token: {e}"),
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct JwtValidator {
    expected_issuer: String,
    expected_audience: String,
    jwks_client: JwksClient,
    clock_skew_leeway: Duration,
    allowed_algorithms: Vec<Algorithm>,
}

impl fmt::Debug for JwtValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtValidator")
            .field("expected_issuer", &self.expected_issuer)
            .field("expected_audience", &self.expected_audience)
            .field("jwks_uri", &self.jwks_client.jwks_uri())
            .field("clock_skew_leeway", &self.clock_skew_leeway)
            .field("allowed_algorithms", &self.allowed_algorithms)
            .finish()
    }
}

impl JwtValidator {
    /// Build a validator from server configuration
    ///
    /// The key set is fetched lazily on the first request.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the config is invalid or the key-set
    /// endpoint is not acceptable.
    pub fn from_config(config: &ServerConfig) -> AuthResult<Self> {
        config.validate()?;
        let jwks_client = JwksClient::with_ttl(config.jwks_uri(), config.jwks_cache_ttl)?;

        Ok(Self::with_jwks_client(
            config.issuer_url(),
            config.audience.clone(),
            jwks_client,
        )
        .with_clock_skew(config.clock_skew)
        .with_algorithms(config.algorithms.clone()))
    }

    /// Build a validator around an existing key-set client
    ///
    /// Validators built from clones of the same client share its cache.
    pub fn with_jwks_client(
        expected_issuer: impl Into<String>,
        expected_audience: impl Into<String>,
        jwks_client: JwksClient,
    ) -> Self {
        Self {
            expected_issuer: expected_issuer.into(),
            expected_audience: expected_audience.into(),
            jwks_client,
            clock_skew_leeway: Duration::ZERO,
            allowed_algorithms: vec![Algorithm::RS256, Algorithm::ES256, Algorithm::PS256],
        }
    }

    /// Set clock skew tolerance for `exp`/`nbf`
    #[must_use]
    pub fn with_clock_skew(mut self, leeway: Duration) -> Self {
        self.clock_skew_leeway = leeway;
        self
    }

    /// Set allowed algorithms
    ///
    /// Only asymmetric algorithms make sense here; the key set never carries
    /// shared secrets.
    #[must_use]
    pub fn with_algorithms(mut self, algorithms: Vec<Algorithm>) -> Self {
        self.allowed_algorithms = algorithms;
        self
    }

    /// Validate a bearer token
    ///
    /// # Errors
    ///
    /// Returns the [`VerificationFailure`] of the first check that failed.
    pub async fn validate(&self, token: &str) -> Result<VerifiedPrincipal, VerificationFailure> {
        let header = decode_header(token).map_err(|e| {
            debug!(error = %e, "Failed to decode JWT header");
            VerificationFailure::Malformed(e.to_string())
        })?;

        if !self.allowed_algorithms.contains(&header.alg) {
            warn!(
                algorithm = ?header.alg,
                allowed = ?self.allowed_algorithms,
                "JWT algorithm not allowed"
            );
            return Err(VerificationFailure::AlgorithmNotAllowed(format!(
                "{:?}",
                header.alg
            )));
        }

        let key_id = header.kid.ok_or(VerificationFailure::MissingKeyId)?;
        let decoding_key = self.decoding_key(&key_id).await?;

        let mut validation = Validation::new(header.alg);
        validation.set_audience(&[&self.expected_audience]);
        validation.set_issuer(&[&self.expected_issuer]);
        validation.set_required_spec_claims(&REQUIRED_CLAIMS);
        validation.validate_nbf = true;
        validation.leeway = self.clock_skew_leeway.as_secs();

        let token_data = decode::<AccessTokenClaims>(token, &decoding_key, &validation)
            .map_err(|e| {
                debug!(
                    error = %e,
                    issuer = %self.expected_issuer,
                    audience = %self.expected_audience,
                    "JWT validation failed"
                );
                VerificationFailure::from(e)
            })?;

        debug!(
            subject = %token_data.claims.sub,
            algorithm = ?header.alg,
            key_id = %key_id,
            "JWT validation successful"
        );

        token_data.claims.into_principal(Some(key_id))
    }

    /// Resolve a key id, forcing one key-set refresh when it is unknown
    async fn decoding_key(&self, key_id: &str) -> Result<DecodingKey, VerificationFailure> {
        let jwks = self
            .jwks_client
            .get_jwks()
            .await
            .map_err(|e| VerificationFailure::KeySetUnavailable(e.to_string()))?;

        let jwk = match jwks.find(key_id) {
            Some(jwk) => jwk.clone(),
            None => {
                debug!(key_id, "Key ID not cached, refreshing JWKS");
                let refreshed = self
                    .jwks_client
                    .refresh()
                    .await
                    .map_err(|e| VerificationFailure::KeySetUnavailable(e.to_string()))?;
                refreshed
                    .find(key_id)
                    .cloned()
                    .ok_or_else(|| VerificationFailure::UnknownKeyId(key_id.to_string()))?
            }
        };

        DecodingKey::from_jwk(&jwk).map_err(|e| {
            warn!(key_id, error = %e, "Failed to create decoding key from JWK");
            VerificationFailure::KeySetUnavailable(format!("invalid JWK '{key_id}': {e}"))
        })
    }

    /// Expected `iss` claim
    pub fn expected_issuer(&self) -> &str {
        &self.expected_issuer
    }

    /// Expected `aud` claim
    pub fn expected_audience(&self) -> &str {
        &self.expected_audience
    }
}

#[async_trait]
impl TokenVerifier for JwtValidator {
    async fn verify(&self, token: &str) -> Result<VerifiedPrincipal, VerificationFailure> {
        self.validate(token).await
    }
}
