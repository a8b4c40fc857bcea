//! Error types for rivalsdb-auth
//!
//! Two tiers:
//! - [`AuthError`]: everything the client-side session lifecycle and provider
//!   plumbing can report
//! - [`VerificationFailure`]: why a bearer token was rejected by the server gate
//!
//! Only [`AuthError::ProviderInit`] and [`AuthError::Configuration`] are fatal.
//! Everything else is absorbed by the refresh loop or surfaced as a status code.

use thiserror::Error;

/// Result type for auth operations
pub type AuthResult<T> = std::result::Result<T, AuthError>;

/// Main error type for rivalsdb-auth
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum AuthError {
    /// The provider session could not be established at startup
    ///
    /// Raised when the discovery endpoint is unreachable or returns a document
    /// we cannot use. No session can exist after this error.
    #[error("Provider initialization failed: {message}")]
    ProviderInit {
        /// What went wrong
        message: String,
    },

    /// The profile lacks a field required to build identity claims
    ///
    /// Non-fatal; the session layer treats this as "no usable identity right now".
    #[error("Identity claims incomplete: missing or non-string `{field}`")]
    ClaimsIncomplete {
        /// Name of the offending profile field
        field: &'static str,
    },

    /// A bearer token failed verification
    #[error("Token verification failed: {0}")]
    Verification(#[from] VerificationFailure),

    /// The user abandoned the interactive sign-in flow
    #[error("Sign-in cancelled by the user")]
    SignInCancelled,

    /// The user-registration call did not succeed
    #[error("User provisioning failed: {message}")]
    Provisioning {
        /// What went wrong
        message: String,
        /// HTTP status returned by the registration endpoint, if any
        status: Option<u16>,
    },

    /// No cached credentials can produce a token without user interaction
    #[error("Login required")]
    LoginRequired,

    /// The provider rejected or failed a request after initialization
    #[error("Provider error: {message}")]
    Provider {
        /// What went wrong
        message: String,
    },

    /// Invalid configuration (missing required fields, malformed URLs)
    #[error("Configuration error: {message}")]
    Configuration {
        /// What went wrong
        message: String,
        /// The configuration key at fault
        key: Option<String>,
    },

    /// Transport-level HTTP failure
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AuthError {
    /// Create a provider initialization error
    pub fn provider_init(message: impl Into<String>) -> Self {
        Self::ProviderInit {
            message: message.into(),
        }
    }

    /// Create a provider error
    pub fn provider(message: impl Into<String>) -> Self {
        Self::Provider {
            message: message.into(),
        }
    }

    /// Create a configuration error for a specific key
    pub fn configuration(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
            key: Some(key.into()),
        }
    }

    /// Create a provisioning error
    pub fn provisioning(message: impl Into<String>, status: Option<u16>) -> Self {
        Self::Provisioning {
            message: message.into(),
            status,
        }
    }

    /// Whether this error prevents any session from being established
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ProviderInit { .. } | Self::Configuration { .. })
    }

    /// Whether this error is a user-initiated abort
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::SignInCancelled)
    }
}

/// Reason a bearer token was not accepted
///
/// Any single failed check invalidates the whole token.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum VerificationFailure {
    /// No `Authorization: Bearer` header on the request
    #[error("no bearer token presented")]
    MissingToken,

    /// Not a decodable compact JWS, or the claims did not deserialize
    #[error("malformed token: {0}")]
    Malformed(String),

    /// Header algorithm is not in the allowlist
    #[error("algorithm {0} not allowed")]
    AlgorithmNotAllowed(String),

    /// Header carries no `kid`
    #[error("token header has no key id")]
    MissingKeyId,

    /// `kid` is not present in the signing-key set, even after a refresh
    #[error("key id '{0}' not found in signing-key set")]
    UnknownKeyId(String),

    /// Signing-key set could not be fetched or parsed
    #[error("signing-key set unavailable: {0}")]
    KeySetUnavailable(String),

    /// Signature did not verify against the selected key
    #[error("invalid signature")]
    InvalidSignature,

    /// `exp` has passed
    #[error("token expired")]
    Expired,

    /// `nbf` is still in the future
    #[error("token not yet valid")]
    Immature,

    /// `iss` does not match the configured issuer
    #[error("issuer mismatch")]
    InvalidIssuer,

    /// `aud` does not contain the configured audience
    #[error("audience mismatch")]
    InvalidAudience,
}

impl From<jsonwebtoken::errors::Error> for VerificationFailure {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::ExpiredSignature => Self::Expired,
            ErrorKind::ImmatureSignature => Self::Immature,
            ErrorKind::InvalidIssuer => Self::InvalidIssuer,
            ErrorKind::InvalidAudience => Self::InvalidAudience,
            ErrorKind::InvalidSignature => Self::InvalidSignature,
            ErrorKind::InvalidAlgorithm => Self::AlgorithmNotAllowed(err.to_string()),
            ErrorKind::MissingRequiredClaim(claim) => {
                Self::Malformed(format!("missing required claim `{claim}`"))
            }
            _ => Self::Malformed(err.to_string()),
        }
    }
}
