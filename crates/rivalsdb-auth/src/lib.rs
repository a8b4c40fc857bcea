//! # RivalsDB Auth
//!
//! Authentication for RivalsDB: a client-side session lifecycle against an
//! OpenID Connect identity provider, and a server-side gate that verifies
//! bearer tokens against the provider's published signing keys.
//!
//! ## Architecture
//!
//! - [`session`] - Client session: boot, redirect completion, interactive
//!   sign-in, periodic silent refresh, identity broadcasting, user provisioning
//! - [`provider`] - [`IdentityProvider`](provider::IdentityProvider) seam and
//!   the OIDC implementation (discovery, PKCE, refresh tokens, revocation)
//! - [`jwt`] - JWKS cache and access-token validation
//! - [`gate`] - Tower layers and axum extractors for the `optional` and
//!   `required` authentication tiers
//! - [`config`] - Client and server configuration
//! - [`types`] - Identity types shared by both sides
//! - [`error`] - Error taxonomy
//!
//! ## Server Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use axum::{Json, Router, routing::post};
//! use rivalsdb_auth::{ServerConfig, Tier, gate::Principal, jwt::JwtValidator};
//!
//! async fn create_user(Principal(principal): Principal) -> Json<String> {
//!     Json(principal.subject)
//! }
//!
//! # async fn example() -> rivalsdb_auth::AuthResult<()> {
//! let config = ServerConfig::new("rivalsdb.eu.auth0.com", "https://api.rivalsdb.app");
//! let verifier = Arc::new(JwtValidator::from_config(&config)?);
//!
//! let app: Router = Tier::Required.apply(
//!     Router::new().route("/api/v2/users", post(create_user)),
//!     verifier,
//! );
//! # let _ = app;
//! # Ok(())
//! # }
//! ```
//!
//! ## Client Quick Start
//!
//! ```rust,no_run
//! use rivalsdb_auth::{ClientConfig, SessionManager, session::MemoryLocation};
//!
//! # async fn example() -> rivalsdb_auth::AuthResult<()> {
//! let config = ClientConfig::new("rivalsdb.eu.auth0.com", "client-id", "https://api.rivalsdb.app")
//!     .with_api_base_url("https://rivalsdb.app");
//! let mut location = MemoryLocation::parse("http://127.0.0.1:8765/")?;
//!
//! let boot = SessionManager::create(config, &mut location).await?;
//! boot.manager
//!     .set_identity_callback(|claims| println!("signed in as {}", claims.email));
//!
//! if boot.identity.is_none() {
//!     boot.manager.sign_in().await?;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - `test-utils` - Scripted [`IdentityProvider`](provider::IdentityProvider)
//!   and ES256 token helpers for downstream tests

pub mod config;
pub mod error;
pub mod gate;
pub mod jwt;
pub mod logging;
pub mod provider;
pub mod session;
pub mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

#[doc(inline)]
pub use config::{CacheLocation, ClientConfig, ServerConfig};
#[doc(inline)]
pub use error::{AuthError, AuthResult, VerificationFailure};
#[doc(inline)]
pub use gate::{MaybePrincipal, Principal, Tier, TokenVerifier};
pub use logging::LoggingConfig;
#[doc(inline)]
pub use session::{IdentityBroadcaster, SessionBootstrap, SessionManager, SignInOutcome, TokenStore};
#[doc(inline)]
pub use types::{Anonymous, IdentityClaims, UnauthenticatedReason, UserProfile, VerifiedPrincipal};
