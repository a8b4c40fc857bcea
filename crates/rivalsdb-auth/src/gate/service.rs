//! Tower services for the verification gate
//!
//! [`VerifyService`] never fails a request: every outcome becomes a request
//! extension. [`RequireAuthService`] is the only place a `401` is produced.

use std::fmt;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::{BoxFuture, Either, Ready, ready};
use http::header::WWW_AUTHENTICATE;
use http::{HeaderValue, StatusCode};
use tower::Service;
use tracing::debug;

use super::{TokenVerifier, bearer_token};
use crate::types::{Anonymous, UnauthenticatedReason, VerifiedPrincipal};

/// Tower service that verifies the bearer token and annotates the request
#[derive(Clone)]
pub struct VerifyService<S> {
    inner: S,
    verifier: Arc<dyn TokenVerifier>,
}

impl<S> VerifyService<S> {
    /// Create a verification service
    pub fn new(inner: S, verifier: Arc<dyn TokenVerifier>) -> Self {
        Self { inner, verifier }
    }

    /// Get a reference to the inner service
    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S: fmt::Debug> fmt::Debug for VerifyService<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerifyService")
            .field("inner", &self.inner)
            .field("verifier", &self.verifier)
            .finish()
    }
}

/// Future returned by [`VerifyService`]
pub type VerifyServiceFuture<T, E> = BoxFuture<'static, Result<T, E>>;

impl<S, B> Service<http::Request<B>> for VerifyService<S>
where
    S: Service<http::Request<B>> + Clone + Send + 'static,
    S::Future: Send,
    B: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = VerifyServiceFuture<S::Response, S::Error>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: http::Request<B>) -> Self::Future {
        // The clone is not ready; keep the one poll_ready was called on
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let verifier = Arc::clone(&self.verifier);
        let token = bearer_token(req.headers()).map(str::to_owned);

        Box::pin(async move {
            let extensions = req.extensions_mut();
            // Never trust an identity attached before this stage
            extensions.remove::<VerifiedPrincipal>();

            match token {
                None => {
                    extensions.insert(Anonymous {
                        reason: UnauthenticatedReason::MissingToken,
                    });
                }
                Some(token) => match verifier.verify(&token).await {
                    Ok(principal) => {
                        debug!(subject = %principal.subject, "Bearer token verified");
                        extensions.remove::<Anonymous>();
                        extensions.insert(principal);
                    }
                    Err(failure) => {
                        debug!(reason = %failure, "Bearer token rejected, continuing anonymously");
                        extensions.insert(Anonymous {
                            reason: UnauthenticatedReason::Invalid(failure),
                        });
                    }
                },
            }

            inner.call(req).await
        })
    }
}

/// Tower service that short-circuits with `401` when no principal is attached
#[derive(Debug, Clone)]
pub struct RequireAuthService<S> {
    inner: S,
}

impl<S> RequireAuthService<S> {
    /// Create an enforcement service
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    /// Get a reference to the inner service
    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S, B, ResBody> Service<http::Request<B>> for RequireAuthService<S>
where
    S: Service<http::Request<B>, Response = http::Response<ResBody>>,
    ResBody: Default,
{
    type Response = http::Response<ResBody>;
    type Error = S::Error;
    type Future = Either<Ready<Result<Self::Response, Self::Error>>, S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: http::Request<B>) -> Self::Future {
        if req.extensions().get::<VerifiedPrincipal>().is_some() {
            return Either::Right(self.inner.call(req));
        }

        let token_presented = req
            .extensions()
            .get::<Anonymous>()
            .is_some_and(Anonymous::token_presented);
        debug!(
            path = %req.uri().path(),
            token_presented,
            "Rejecting request without verified principal"
        );

        Either::Left(ready(Ok(unauthorized(token_presented))))
    }
}

/// Empty-bodied `401` with a bearer challenge
pub(crate) fn unauthorized<B: Default>(token_presented: bool) -> http::Response<B> {
    let challenge = if token_presented {
        HeaderValue::from_static(r#"Bearer error="invalid_token""#)
    } else {
        HeaderValue::from_static("Bearer")
    };

    let mut response = http::Response::new(B::default());
    *response.status_mut() = StatusCode::UNAUTHORIZED;
    response.headers_mut().insert(WWW_AUTHENTICATE, challenge);
    response
}
