//! Access-token verification
//!
//! - `jwks` - signing-key set fetching and caching
//! - `validator` - signature and claim checks producing a [`VerifiedPrincipal`]
//!
//! Tokens are compact JWS access tokens issued by the provider for this API's
//! audience. Verification is stateless apart from the shared key-set cache.

pub mod jwks;
pub mod validator;

pub use jwks::JwksClient;
pub use validator::JwtValidator;

use std::collections::HashMap;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::VerificationFailure;
use crate::types::VerifiedPrincipal;

/// `aud` claim: a single string or an array of strings (RFC 7519 §4.1.3)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    /// Single audience
    One(String),
    /// Multiple audiences
    Many(Vec<String>),
}

impl Audience {
    /// Normalize to a list
    pub fn into_vec(self) -> Vec<String> {
        match self {
            Self::One(aud) => vec![aud],
            Self::Many(auds) => auds,
        }
    }
}

/// Claims carried by a provider access token
///
/// `exp`, `iss`, `aud` and `sub` are required; the validator rejects tokens
/// without them before this struct is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    /// Issuer
    pub iss: String,
    /// Subject (user id)
    pub sub: String,
    /// Audience
    pub aud: Audience,
    /// Expiration, Unix seconds
    pub exp: i64,
    /// Issued at, Unix seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    /// Not before, Unix seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,
    /// Space-delimited granted scopes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Authorized party (client id the token was issued to)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub azp: Option<String>,
    /// Everything else
    #[serde(flatten)]
    pub additional: HashMap<String, serde_json::Value>,
}

impl AccessTokenClaims {
    /// Turn verified claims into the principal attached to a request
    ///
    /// # Errors
    ///
    /// Returns [`VerificationFailure::Malformed`] when a timestamp is out of range.
    pub fn into_principal(
        self,
        key_id: Option<String>,
    ) -> Result<VerifiedPrincipal, VerificationFailure> {
        let expires_at = timestamp("exp", self.exp)?;
        let issued_at = self.iat.map(|iat| timestamp("iat", iat)).transpose()?;
        let scopes = self
            .scope
            .as_deref()
            .map(|s| s.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();

        Ok(VerifiedPrincipal {
            subject: self.sub,
            issuer: self.iss,
            audience: self.aud.into_vec(),
            expires_at,
            issued_at,
            scopes,
            authorized_party: self.azp,
            key_id,
            additional: self.additional,
        })
    }
}

fn timestamp(claim: &str, secs: i64) -> Result<DateTime<Utc>, VerificationFailure> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .ok_or_else(|| VerificationFailure::Malformed(format!("`{claim}` out of range")))
}
