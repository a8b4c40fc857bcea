//! reqwest adapter for the `oauth2` crate
//!
//! `oauth2` 5.0 only ships an `AsyncHttpClient` impl for the reqwest version it
//! was built against. This adapter implements the trait over the workspace's
//! reqwest so token, refresh, userinfo and revocation requests share one
//! connection pool.
//!
//! Redirects are never followed on token endpoints.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use oauth2::AsyncHttpClient;
use oauth2::http::{self, HeaderValue, StatusCode};
use thiserror::Error;

/// Request type used by `oauth2`
pub type HttpRequest = http::Request<Vec<u8>>;
/// Response type used by `oauth2`
pub type HttpResponse = http::Response<Vec<u8>>;

/// Errors from [`OAuth2HttpClient`]
#[derive(Debug, Error)]
pub enum OAuth2HttpError {
    /// Request execution failed
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Method, status or header could not be converted between `http` versions
    #[error("Invalid HTTP message: {0}")]
    InvalidMessage(String),
}

/// `AsyncHttpClient` over the workspace reqwest client
#[derive(Clone)]
pub struct OAuth2HttpClient {
    inner: reqwest::Client,
}

impl OAuth2HttpClient {
    /// Create a client with redirects disabled and a 30s timeout
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialized.
    pub fn new() -> Result<Self, reqwest::Error> {
        let inner = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self { inner })
    }

    /// Wrap an existing client
    ///
    /// The client should be configured with `redirect::Policy::none()`.
    pub fn from_client(client: reqwest::Client) -> Self {
        Self { inner: client }
    }

    /// The underlying reqwest client, for plain JSON calls (userinfo, discovery)
    pub fn reqwest(&self) -> &reqwest::Client {
        &self.inner
    }

    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, OAuth2HttpError> {
        let (parts, body) = request.into_parts();

        let method = reqwest::Method::from_bytes(parts.method.as_str().as_bytes())
            .map_err(|_| OAuth2HttpError::InvalidMessage(format!("method {}", parts.method)))?;

        let mut builder = self.inner.request(method, parts.uri.to_string());
        for (name, value) in &parts.headers {
            builder = builder.header(name.as_str(), value.as_bytes());
        }

        let response = builder.body(body).send().await?;

        let status = StatusCode::from_u16(response.status().as_u16())
            .map_err(|e| OAuth2HttpError::InvalidMessage(e.to_string()))?;

        let mut converted = http::Response::builder().status(status);
        for (name, value) in response.headers() {
            let value = HeaderValue::from_bytes(value.as_bytes())
                .map_err(|e| OAuth2HttpError::InvalidMessage(e.to_string()))?;
            converted = converted.header(name.as_str(), value);
        }

        let body = response.bytes().await?;
        converted
            .body(body.to_vec())
            .map_err(|e| OAuth2HttpError::InvalidMessage(e.to_string()))
    }
}

impl std::fmt::Debug for OAuth2HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuth2HttpClient")
            .field("inner", &"<reqwest::Client>")
            .finish()
    }
}

/// Future returned by [`OAuth2HttpClient`]
pub type OAuth2HttpFuture<'c> =
    Pin<Box<dyn Future<Output = Result<HttpResponse, OAuth2HttpError>> + Send + 'c>>;

impl<'c> AsyncHttpClient<'c> for OAuth2HttpClient {
    type Error = OAuth2HttpError;
    type Future = OAuth2HttpFuture<'c>;

    fn call(&'c self, request: HttpRequest) -> Self::Future {
        Box::pin(self.execute(request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_client_creation() {
        assert!(OAuth2HttpClient::new().is_ok());
    }

    #[test]
    fn test_error_display() {
        let err = OAuth2HttpError::InvalidMessage("status 1000".to_string());
        assert!(err.to_string().contains("Invalid HTTP message"));
    }

    #[tokio::test]
    async fn test_round_trips_request_and_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .respond_with(
                ResponseTemplate::new(400)
                    .insert_header("x-trace", "abc")
                    .set_body_string("{\"error\":\"invalid_grant\"}"),
            )
            .mount(&server)
            .await;

        let client = OAuth2HttpClient::new().unwrap();
        let request = http::Request::builder()
            .method(http::Method::POST)
            .uri(format!("{}/oauth/token", server.uri()))
            .header(
                http::header::CONTENT_TYPE,
                "application/x-www-form-urlencoded",
            )
            .body(b"grant_type=refresh_token&refresh_token=r1".to_vec())
            .unwrap();

        let response = client.call(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(response.headers()["x-trace"], "abc");
        assert_eq!(response.body(), b"{\"error\":\"invalid_grant\"}");
    }
}
