//! Tower layers for the verification gate

use std::fmt;
use std::sync::Arc;

use tower::Layer;

use super::TokenVerifier;
use super::service::{RequireAuthService, VerifyService};

/// Layer that verifies bearer tokens and annotates the request
///
/// # Example
///
/// ```rust,ignore
/// use tower::ServiceBuilder;
/// use rivalsdb_auth::gate::{RequireAuthLayer, VerifyLayer};
///
/// let service = ServiceBuilder::new()
///     .layer(VerifyLayer::new(verifier))
///     .layer(RequireAuthLayer::new())
///     .service(my_inner_service);
/// ```
#[derive(Clone)]
pub struct VerifyLayer {
    verifier: Arc<dyn TokenVerifier>,
}

impl VerifyLayer {
    /// Create a verification layer
    pub fn new(verifier: Arc<dyn TokenVerifier>) -> Self {
        Self { verifier }
    }
}

impl fmt::Debug for VerifyLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerifyLayer")
            .field("verifier", &self.verifier)
            .finish()
    }
}

impl<S> Layer<S> for VerifyLayer {
    type Service = VerifyService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        VerifyService::new(inner, Arc::clone(&self.verifier))
    }
}

/// Layer that rejects requests without a verified principal
#[derive(Debug, Clone, Copy, Default)]
pub struct RequireAuthLayer;

impl RequireAuthLayer {
    /// Create an enforcement layer
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for RequireAuthLayer {
    type Service = RequireAuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequireAuthService::new(inner)
    }
}
