//! Core identity types
//!
//! - [`IdentityClaims`]: what the client session hands to the host application
//! - [`UserProfile`]: the raw profile returned by the provider
//! - [`VerifiedPrincipal`]: what the server gate attaches to a verified request
//! - [`Anonymous`]: what the gate attaches when verification did not succeed

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AuthError, AuthResult, VerificationFailure};

/// Identity delivered to the host application
///
/// Both `user_id` and `email` are always present; a profile missing either is
/// never turned into a partial value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityClaims {
    /// Short-lived bearer credential
    pub token: String,
    /// Provider subject id
    pub user_id: String,
    /// Verified email address
    pub email: String,
}

impl IdentityClaims {
    /// Build claims from a bearer token and a provider profile
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::ClaimsIncomplete`] when `email` or `sub` is missing
    /// or is not a string.
    pub fn from_profile(token: impl Into<String>, profile: &UserProfile) -> AuthResult<Self> {
        let email = profile
            .string_claim("email")
            .ok_or(AuthError::ClaimsIncomplete { field: "email" })?;
        let user_id = profile
            .string_claim("sub")
            .ok_or(AuthError::ClaimsIncomplete { field: "sub" })?;

        Ok(Self {
            token: token.into(),
            user_id: user_id.to_string(),
            email: email.to_string(),
        })
    }
}

/// Provider user profile (OIDC `userinfo` response)
///
/// Kept as raw JSON so that a missing or mistyped field is detected when the
/// claims are built rather than rejected while deserializing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserProfile(pub serde_json::Map<String, serde_json::Value>);

impl UserProfile {
    /// Look up a claim that must be a string
    pub fn string_claim(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(serde_json::Value::as_str)
    }

    /// Subject id, if present and a string
    pub fn subject(&self) -> Option<&str> {
        self.string_claim("sub")
    }

    /// Email, if present and a string
    pub fn email(&self) -> Option<&str> {
        self.string_claim("email")
    }
}

impl From<serde_json::Value> for UserProfile {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Object(map) => Self(map),
            _ => Self::default(),
        }
    }
}

/// Identity attached to a request after successful verification
///
/// Computed once per request and dropped with it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifiedPrincipal {
    /// `sub` claim
    pub subject: String,
    /// `iss` claim
    pub issuer: String,
    /// `aud` claim (always normalized to a list)
    pub audience: Vec<String>,
    /// `exp` claim
    pub expires_at: DateTime<Utc>,
    /// `iat` claim
    pub issued_at: Option<DateTime<Utc>>,
    /// Space-delimited `scope` claim, split
    pub scopes: Vec<String>,
    /// `azp` claim
    pub authorized_party: Option<String>,
    /// Key id the signature was verified with
    pub key_id: Option<String>,
    /// Claims not modeled above
    #[serde(default)]
    pub additional: HashMap<String, serde_json::Value>,
}

impl VerifiedPrincipal {
    /// Check whether the token granted a scope
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }
}

/// Why a request proceeded without a principal
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnauthenticatedReason {
    /// No bearer token was presented
    MissingToken,
    /// A token was presented but failed verification
    Invalid(VerificationFailure),
}

/// Marker attached to requests the optional stage could not authenticate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Anonymous {
    /// Why verification did not produce a principal
    pub reason: UnauthenticatedReason,
}

impl Anonymous {
    /// Whether a token was presented at all
    pub fn token_presented(&self) -> bool {
        !matches!(self.reason, UnauthenticatedReason::MissingToken)
    }
}
