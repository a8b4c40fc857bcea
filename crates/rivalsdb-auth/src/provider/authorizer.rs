//! [`InteractiveAuthorizer`] implementations
//!
//! - [`LoopbackAuthorizer`] listens on the redirect URI's loopback port for a
//!   single callback, the native-app pattern from RFC 8252
//! - [`CallbackAuthorizer`] delegates to a closure, for embedding in a host
//!   that already owns a user agent

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::extract::{Query, State};
use axum::response::Html;
use axum::routing::get;
use futures::future::BoxFuture;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use super::{AuthorizationResponse, InteractiveAuthorizer};
use crate::error::{AuthError, AuthResult};

/// How long the loopback listener waits before treating sign-in as abandoned
pub const DEFAULT_SIGN_IN_TIMEOUT: Duration = Duration::from_secs(300);

const CALLBACK_PAGE: &str =
    "<!doctype html><title>RivalsDB</title><p>Sign-in finished. You can close this window.</p>";

type UrlOpener = Arc<dyn Fn(&Url) + Send + Sync>;

/// Receives the redirect on a one-shot loopback HTTP listener
#[derive(Clone)]
pub struct LoopbackAuthorizer {
    timeout: Duration,
    open_url: UrlOpener,
}

impl LoopbackAuthorizer {
    /// Create an authorizer that logs the sign-in URL for the user to open
    pub fn new() -> Self {
        Self {
            timeout: DEFAULT_SIGN_IN_TIMEOUT,
            open_url: Arc::new(|url: &Url| {
                info!(%url, "Open this URL in a browser to sign in");
            }),
        }
    }

    /// Set how long to wait for the redirect
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set how the authorization URL reaches the user
    #[must_use]
    pub fn with_opener<F>(mut self, open_url: F) -> Self
    where
        F: Fn(&Url) + Send + Sync + 'static,
    {
        self.open_url = Arc::new(open_url);
        self
    }
}

impl Default for LoopbackAuthorizer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for LoopbackAuthorizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopbackAuthorizer")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

async fn receive_callback(
    State(tx): State<mpsc::Sender<AuthorizationResponse>>,
    Query(response): Query<AuthorizationResponse>,
) -> Html<&'static str> {
    // Only the first callback matters; later ones find the channel full or closed
    if tx.try_send(response).is_err() {
        debug!("Ignoring duplicate authorization callback");
    }
    Html(CALLBACK_PAGE)
}

#[async_trait]
impl InteractiveAuthorizer for LoopbackAuthorizer {
    async fn authorize(
        &self,
        authorization_url: Url,
        redirect_uri: &Url,
    ) -> AuthResult<AuthorizationResponse> {
        let host = redirect_uri
            .host_str()
            .ok_or_else(|| AuthError::configuration("redirect_uri", "redirect URI has no host"))?;
        let port = redirect_uri.port_or_known_default().ok_or_else(|| {
            AuthError::configuration("redirect_uri", "redirect URI has no port")
        })?;

        let listener = TcpListener::bind((host, port)).await?;
        let (tx, mut rx) = mpsc::channel(1);
        let app = Router::new()
            .route(redirect_uri.path(), get(receive_callback))
            .with_state(tx);

        let shutdown = CancellationToken::new();
        let server = tokio::spawn(
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown.clone().cancelled_owned())
                .into_future(),
        );

        debug!(%redirect_uri, "Waiting for authorization callback");
        (self.open_url)(&authorization_url);

        let outcome = tokio::select! {
            response = rx.recv() => response.ok_or(AuthError::SignInCancelled),
            () = tokio::time::sleep(self.timeout) => {
                warn!(timeout_secs = self.timeout.as_secs(), "Sign-in timed out");
                Err(AuthError::SignInCancelled)
            }
        };

        shutdown.cancel();
        match server.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Loopback listener failed"),
            Err(e) => warn!(error = %e, "Loopback listener task failed"),
        }

        outcome
    }
}

type AuthorizeFn = dyn Fn(Url) -> BoxFuture<'static, AuthResult<AuthorizationResponse>> + Send + Sync;

/// Delegates the interactive step to a closure
///
/// # Example
///
/// ```rust
/// use rivalsdb_auth::provider::{AuthorizationResponse, CallbackAuthorizer};
///
/// let authorizer = CallbackAuthorizer::new(|url| async move {
///     let state = url
///         .query_pairs()
///         .find(|(k, _)| k == "state")
///         .map(|(_, v)| v.into_owned())
///         .unwrap_or_default();
///     Ok(AuthorizationResponse::success("code-from-host", state))
/// });
/// # let _ = authorizer;
/// ```
#[derive(Clone)]
pub struct CallbackAuthorizer {
    authorize: Arc<AuthorizeFn>,
}

impl CallbackAuthorizer {
    /// Wrap an async closure receiving the authorization URL
    pub fn new<F, Fut>(authorize: F) -> Self
    where
        F: Fn(Url) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = AuthResult<AuthorizationResponse>> + Send + 'static,
    {
        Self {
            authorize: Arc::new(move |url| Box::pin(authorize(url))),
        }
    }
}

impl fmt::Debug for CallbackAuthorizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackAuthorizer").finish_non_exhaustive()
    }
}

#[async_trait]
impl InteractiveAuthorizer for CallbackAuthorizer {
    async fn authorize(
        &self,
        authorization_url: Url,
        _redirect_uri: &Url,
    ) -> AuthResult<AuthorizationResponse> {
        (self.authorize)(authorization_url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn free_port() -> u16 {
        std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }

    #[tokio::test]
    async fn test_loopback_receives_callback() {
        let port = free_port();
        let redirect = Url::parse(&format!("http://127.0.0.1:{port}/callback")).unwrap();
        let callback = format!("{redirect}?code=abc&state=xyz");

        let authorizer = LoopbackAuthorizer::new().with_opener(move |_url| {
            let callback = callback.clone();
            tokio::spawn(async move {
                // Retry until the listener is accepting
                for _ in 0..50 {
                    if reqwest::get(&callback).await.is_ok() {
                        break;
                    }
                    tokio::time::sleep(Duration::from_millis(20)).await;
                }
            });
        });

        let auth_url = Url::parse("https://tenant.auth0.com/authorize?state=xyz").unwrap();
        let response = authorizer.authorize(auth_url, &redirect).await.unwrap();
        assert_eq!(response, AuthorizationResponse::success("abc", "xyz"));
    }

    #[tokio::test]
    async fn test_loopback_timeout_is_cancellation() {
        let port = free_port();
        let redirect = Url::parse(&format!("http://127.0.0.1:{port}/callback")).unwrap();
        let authorizer = LoopbackAuthorizer::new()
            .with_timeout(Duration::from_millis(50))
            .with_opener(|_| {});

        let auth_url = Url::parse("https://tenant.auth0.com/authorize").unwrap();
        let err = authorizer.authorize(auth_url, &redirect).await.unwrap_err();
        assert!(err.is_cancellation());
    }

    #[tokio::test]
    async fn test_callback_authorizer_delegates() {
        let authorizer = CallbackAuthorizer::new(|url: Url| async move {
            Ok(AuthorizationResponse::success(url.path().to_string(), "s"))
        });
        let redirect = Url::parse("http://127.0.0.1/callback").unwrap();
        let response = authorizer
            .authorize(Url::parse("https://idp/authorize").unwrap(), &redirect)
            .await
            .unwrap();
        assert_eq!(response.code.as_deref(), Some("/authorize"));
    }
}
