//! # Server verification gate
//!
//! Two composable request-pipeline stages:
//!
//! - [`VerifyLayer`] reads `Authorization: Bearer <token>`, verifies it with a
//!   [`TokenVerifier`] and attaches either a [`VerifiedPrincipal`] or an
//!   [`Anonymous`] marker to the request extensions. It never rejects.
//! - [`RequireAuthLayer`] rejects with `401` and an empty body when no
//!   principal is attached. It must run after `VerifyLayer`.
//!
//! [`Tier`] wires the stages onto an axum router in the right order.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use axum::{Router, routing::post};
//! use rivalsdb_auth::{ServerConfig, Tier, gate::Principal, jwt::JwtValidator};
//!
//! async fn create_user(Principal(principal): Principal) -> String {
//!     principal.subject
//! }
//!
//! # fn build() -> rivalsdb_auth::AuthResult<Router> {
//! let validator = Arc::new(JwtValidator::from_config(&ServerConfig::from_env()?)?);
//! let protected = Tier::Required.apply(Router::new().route("/api/v2/users", post(create_user)), validator);
//! # Ok(protected)
//! # }
//! ```
//!
//! ## Request Extensions
//!
//! Exactly one of these is present after [`VerifyLayer`] ran:
//!
//! ```rust,ignore
//! if let Some(principal) = req.extensions().get::<VerifiedPrincipal>() {
//!     println!("Authenticated user: {}", principal.subject);
//! } else if let Some(anon) = req.extensions().get::<Anonymous>() {
//!     println!("Unauthenticated: {:?}", anon.reason);
//! }
//! ```

mod extract;
mod layer;
mod service;

pub use extract::{MaybePrincipal, Principal, Unauthorized};
pub use layer::{RequireAuthLayer, VerifyLayer};
pub use service::{RequireAuthService, VerifyService, VerifyServiceFuture};

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use http::HeaderMap;
use http::header::AUTHORIZATION;

use crate::error::VerificationFailure;
use crate::types::VerifiedPrincipal;

#[cfg(doc)]
use crate::types::Anonymous;

/// Verifies bearer tokens
///
/// Implemented by [`JwtValidator`](crate::jwt::JwtValidator); tests can plug in
/// their own.
#[async_trait]
pub trait TokenVerifier: Send + Sync + fmt::Debug {
    /// Verify a raw bearer token
    async fn verify(&self, token: &str) -> Result<VerifiedPrincipal, VerificationFailure>;
}

#[async_trait]
impl<T: TokenVerifier + ?Sized> TokenVerifier for Arc<T> {
    async fn verify(&self, token: &str) -> Result<VerifiedPrincipal, VerificationFailure> {
        (**self).verify(token).await
    }
}

/// Per-route enforcement level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    /// Verify when a token is presented; always pass the request through
    Optional,
    /// Verify, then reject requests without a verified principal
    Required,
}

impl Tier {
    /// Attach this tier's stages to every route of `router`
    ///
    /// Routes added to the router afterwards are not covered.
    pub fn apply<S>(self, router: Router<S>, verifier: Arc<dyn TokenVerifier>) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        match self {
            // Router::layer wraps outermost last, so verification runs first
            Self::Optional => router.layer(VerifyLayer::new(verifier)),
            Self::Required => router
                .layer(RequireAuthLayer::new())
                .layer(VerifyLayer::new(verifier)),
        }
    }
}

/// Extract the token from an `Authorization: Bearer` header
///
/// The scheme is matched case-insensitively. Empty tokens count as absent.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn headers(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static(value));
        headers
    }

    #[test]
    fn test_bearer_token_extraction() {
        assert_eq!(bearer_token(&headers("Bearer abc.def.ghi")), Some("abc.def.ghi"));
        assert_eq!(bearer_token(&headers("bearer   abc")), Some("abc"));
    }

    #[test]
    fn test_bearer_token_rejects_other_schemes() {
        assert_eq!(bearer_token(&headers("Basic dXNlcjpwYXNz")), None);
        assert_eq!(bearer_token(&headers("Bearer")), None);
        assert_eq!(bearer_token(&headers("Bearer   ")), None);
        assert_eq!(bearer_token(&HeaderMap::new()), None);
    }
}
