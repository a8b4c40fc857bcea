//! Axum extractors for the verified principal

use std::convert::Infallible;

use axum::body::Body;
use axum::extract::FromRequestParts;
use axum::response::{IntoResponse, Response};
use http::request::Parts;

use super::service::unauthorized;
use crate::types::{Anonymous, VerifiedPrincipal};

/// Extractor for authenticated requests
///
/// Rejects with an empty `401` when the gate attached no principal.
///
/// ```rust,ignore
/// async fn handler(Principal(principal): Principal) -> impl IntoResponse {
///     format!("Hello, {}", principal.subject)
/// }
/// ```
#[derive(Debug, Clone)]
pub struct Principal(pub VerifiedPrincipal);

impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = Unauthorized;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<VerifiedPrincipal>()
            .cloned()
            .map(Principal)
            .ok_or_else(|| Unauthorized {
                token_presented: parts
                    .extensions
                    .get::<Anonymous>()
                    .is_some_and(Anonymous::token_presented),
            })
    }
}

/// Extractor for optionally authenticated requests
#[derive(Debug, Clone)]
pub struct MaybePrincipal(pub Option<VerifiedPrincipal>);

impl<S> FromRequestParts<S> for MaybePrincipal
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(MaybePrincipal(
            parts.extensions.get::<VerifiedPrincipal>().cloned(),
        ))
    }
}

/// Rejection produced by [`Principal`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unauthorized {
    /// Whether a bearer token was presented and failed verification
    pub token_presented: bool,
}

impl IntoResponse for Unauthorized {
    fn into_response(self) -> Response {
        unauthorized::<Body>(self.token_presented)
    }
}
