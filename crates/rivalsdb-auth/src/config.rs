//! Configuration types for the client session and the server verifier
//!
//! Both sides are configured from the same provider tenant: `domain` identifies
//! the identity provider and `audience` identifies this API.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use jsonwebtoken::Algorithm;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{AuthError, AuthResult};

/// Environment variable names recognized by the `from_env` constructors
pub mod env {
    /// Provider tenant domain (e.g. `example.us.auth0.com`)
    pub const DOMAIN: &str = "RIVALSDB_AUTH_DOMAIN";
    /// OAuth client id of the client application
    pub const CLIENT_ID: &str = "RIVALSDB_AUTH_CLIENT_ID";
    /// API audience tokens must be issued for
    pub const AUDIENCE: &str = "RIVALSDB_AUTH_AUDIENCE";
    /// `memory` or `localstorage`
    pub const CACHE_LOCATION: &str = "RIVALSDB_AUTH_CACHE_LOCATION";
    /// File backing the `localstorage` cache
    pub const CACHE_PATH: &str = "RIVALSDB_AUTH_CACHE_PATH";
    /// Redirect URI registered with the provider
    pub const REDIRECT_URI: &str = "RIVALSDB_AUTH_REDIRECT_URI";
    /// Base URL of the RivalsDB API (user registration)
    pub const API_BASE_URL: &str = "RIVALSDB_API_BASE_URL";
}

/// Default silent refresh period
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(60);

/// Default redirect URI for the loopback authorizer
pub const DEFAULT_REDIRECT_URI: &str = "http://127.0.0.1:8765/callback";

/// Default file used by [`CacheLocation::LocalStorage`] when none is configured
pub const DEFAULT_CACHE_FILE: &str = "rivalsdb-auth-session.json";

/// Build the issuer URL for a provider domain
///
/// A bare domain becomes `https://{domain}/`. A domain that already carries a
/// scheme is used as-is. The result always ends with a slash, matching the
/// `iss` claim the provider puts in its tokens.
pub fn issuer_url(domain: &str) -> String {
    let trimmed = domain.trim().trim_end_matches('/');
    if trimmed.starts_with("https://") || trimmed.starts_with("http://") {
        format!("{trimmed}/")
    } else {
        format!("https://{trimmed}/")
    }
}

/// Whether an endpoint may receive credentials: HTTPS, or plain HTTP to a
/// loopback host
pub(crate) fn is_secure_endpoint(url: &Url) -> bool {
    let loopback = match url.host() {
        Some(url::Host::Domain(host)) => host == "localhost",
        Some(url::Host::Ipv4(ip)) => ip.is_loopback(),
        Some(url::Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    };
    match url.scheme() {
        "https" => true,
        "http" => loopback,
        _ => false,
    }
}

/// Where the provider's credentials are cached between process runs
///
/// Deserializes from a bare `"memory"` / `"localstorage"` string or from the
/// tagged form `{"kind": "localstorage", "path": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "lowercase", try_from = "CacheLocationRepr")]
pub enum CacheLocation {
    /// Credentials live only as long as the process
    #[default]
    Memory,
    /// Credentials persist to a JSON file and are restored at boot
    #[serde(rename = "localstorage")]
    LocalStorage {
        /// Backing file
        path: PathBuf,
    },
}

impl CacheLocation {
    /// Local storage backed by the default cache file
    pub fn local_storage() -> Self {
        Self::LocalStorage {
            path: default_cache_path(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CacheLocationRepr {
    Name(String),
    Tagged(TaggedCacheLocation),
}

#[derive(Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
enum TaggedCacheLocation {
    Memory,
    #[serde(rename = "localstorage")]
    LocalStorage {
        #[serde(default = "default_cache_path")]
        path: PathBuf,
    },
}

fn default_cache_path() -> PathBuf {
    PathBuf::from(DEFAULT_CACHE_FILE)
}

impl TryFrom<CacheLocationRepr> for CacheLocation {
    type Error = AuthError;

    fn try_from(repr: CacheLocationRepr) -> Result<Self, Self::Error> {
        match repr {
            CacheLocationRepr::Name(name) => name.parse(),
            CacheLocationRepr::Tagged(TaggedCacheLocation::Memory) => Ok(Self::Memory),
            CacheLocationRepr::Tagged(TaggedCacheLocation::LocalStorage { path }) => {
                Ok(Self::LocalStorage { path })
            }
        }
    }
}

impl FromStr for CacheLocation {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "localstorage" => Ok(Self::local_storage()),
            other => Err(AuthError::configuration(
                env::CACHE_LOCATION,
                format!("unknown cache location '{other}' (expected memory or localstorage)"),
            )),
        }
    }
}

/// Client-side provider session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Provider tenant domain
    pub domain: String,
    /// OAuth client id
    pub client_id: String,
    /// API audience requested for access tokens
    pub audience: String,
    /// Credential cache location
    #[serde(default)]
    pub cache_location: CacheLocation,
    /// Redirect URI registered with the provider
    #[serde(default = "default_redirect_uri")]
    pub redirect_uri: String,
    /// Scopes requested at sign-in
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
    /// Base URL of the RivalsDB API; provisioning is disabled when absent
    #[serde(default)]
    pub api_base_url: Option<String>,
    /// Silent refresh period
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval: Duration,
}

fn default_redirect_uri() -> String {
    DEFAULT_REDIRECT_URI.to_string()
}

fn default_scopes() -> Vec<String> {
    vec![
        "openid".to_string(),
        "profile".to_string(),
        "email".to_string(),
    ]
}

fn default_refresh_interval() -> Duration {
    DEFAULT_REFRESH_INTERVAL
}

impl ClientConfig {
    /// Create a client configuration with defaults for the optional fields
    pub fn new(
        domain: impl Into<String>,
        client_id: impl Into<String>,
        audience: impl Into<String>,
    ) -> Self {
        Self {
            domain: domain.into(),
            client_id: client_id.into(),
            audience: audience.into(),
            cache_location: CacheLocation::default(),
            redirect_uri: default_redirect_uri(),
            scopes: default_scopes(),
            api_base_url: None,
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
        }
    }

    /// Load from the `RIVALSDB_AUTH_*` environment variables
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] when a required variable is missing
    /// or a value does not parse.
    pub fn from_env() -> AuthResult<Self> {
        let mut config = Self::new(
            required_env(env::DOMAIN)?,
            required_env(env::CLIENT_ID)?,
            required_env(env::AUDIENCE)?,
        );

        if let Some(location) = optional_env(env::CACHE_LOCATION) {
            config.cache_location = match location.parse()? {
                CacheLocation::LocalStorage { .. } => match optional_env(env::CACHE_PATH) {
                    Some(path) => CacheLocation::LocalStorage { path: path.into() },
                    None => CacheLocation::local_storage(),
                },
                memory => memory,
            };
        }
        if let Some(redirect) = optional_env(env::REDIRECT_URI) {
            config.redirect_uri = redirect;
        }
        config.api_base_url = optional_env(env::API_BASE_URL);

        config.validate()?;
        Ok(config)
    }

    /// Set the credential cache location
    #[must_use]
    pub fn with_cache_location(mut self, location: CacheLocation) -> Self {
        self.cache_location = location;
        self
    }

    /// Set the redirect URI
    #[must_use]
    pub fn with_redirect_uri(mut self, uri: impl Into<String>) -> Self {
        self.redirect_uri = uri.into();
        self
    }

    /// Set the scopes requested at sign-in
    #[must_use]
    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    /// Set the API base URL used for user provisioning
    #[must_use]
    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = Some(url.into());
        self
    }

    /// Set the silent refresh period
    #[must_use]
    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    /// Issuer URL derived from the domain
    pub fn issuer_url(&self) -> String {
        issuer_url(&self.domain)
    }

    /// OpenID Connect discovery document URL
    pub fn discovery_url(&self) -> String {
        format!("{}.well-known/openid-configuration", self.issuer_url())
    }

    /// Check the configuration for obvious mistakes
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] naming the first invalid field.
    pub fn validate(&self) -> AuthResult<()> {
        non_empty("domain", &self.domain)?;
        non_empty("client_id", &self.client_id)?;
        non_empty("audience", &self.audience)?;
        parse_url("domain", &self.issuer_url())?;
        parse_url("redirect_uri", &self.redirect_uri)?;
        if let Some(base) = &self.api_base_url {
            parse_url("api_base_url", base)?;
        }
        if self.refresh_interval.is_zero() {
            return Err(AuthError::configuration(
                "refresh_interval",
                "refresh interval must be non-zero",
            ));
        }
        Ok(())
    }
}

/// Server-side bearer verification configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Provider tenant domain
    pub domain: String,
    /// Audience every accepted token must carry
    pub audience: String,
    /// How long a fetched signing-key set stays fresh
    #[serde(default = "default_jwks_cache_ttl")]
    pub jwks_cache_ttl: Duration,
    /// Tolerance applied to `exp`/`nbf`
    #[serde(default)]
    pub clock_skew: Duration,
    /// Accepted signature algorithms
    #[serde(default = "default_algorithms")]
    pub algorithms: Vec<Algorithm>,
}

fn default_jwks_cache_ttl() -> Duration {
    Duration::from_secs(600)
}

fn default_algorithms() -> Vec<Algorithm> {
    vec![Algorithm::RS256, Algorithm::ES256, Algorithm::PS256]
}

impl ServerConfig {
    /// Create a server configuration with default key-set caching
    pub fn new(domain: impl Into<String>, audience: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            audience: audience.into(),
            jwks_cache_ttl: default_jwks_cache_ttl(),
            clock_skew: Duration::ZERO,
            algorithms: default_algorithms(),
        }
    }

    /// Load from `RIVALSDB_AUTH_DOMAIN` and `RIVALSDB_AUTH_AUDIENCE`
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] when a variable is missing or empty.
    pub fn from_env() -> AuthResult<Self> {
        let config = Self::new(required_env(env::DOMAIN)?, required_env(env::AUDIENCE)?);
        config.validate()?;
        Ok(config)
    }

    /// Set the signing-key set cache TTL
    #[must_use]
    pub fn with_jwks_cache_ttl(mut self, ttl: Duration) -> Self {
        self.jwks_cache_ttl = ttl;
        self
    }

    /// Set the clock skew tolerance
    #[must_use]
    pub fn with_clock_skew(mut self, leeway: Duration) -> Self {
        self.clock_skew = leeway;
        self
    }

    /// Set the accepted signature algorithms
    #[must_use]
    pub fn with_algorithms(mut self, algorithms: Vec<Algorithm>) -> Self {
        self.algorithms = algorithms;
        self
    }

    /// Expected `iss` claim
    pub fn issuer_url(&self) -> String {
        issuer_url(&self.domain)
    }

    /// Signing-key set endpoint
    pub fn jwks_uri(&self) -> String {
        format!("{}.well-known/jwks.json", self.issuer_url())
    }

    /// Check the configuration for obvious mistakes
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] naming the first invalid field.
    pub fn validate(&self) -> AuthResult<()> {
        non_empty("domain", &self.domain)?;
        non_empty("audience", &self.audience)?;
        parse_url("domain", &self.issuer_url())?;
        if self.algorithms.is_empty() {
            return Err(AuthError::configuration(
                "algorithms",
                "at least one algorithm must be allowed",
            ));
        }
        Ok(())
    }
}

fn required_env(key: &str) -> AuthResult<String> {
    optional_env(key)
        .ok_or_else(|| AuthError::configuration(key, format!("{key} must be set")))
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn non_empty(key: &str, value: &str) -> AuthResult<()> {
    if value.trim().is_empty() {
        return Err(AuthError::configuration(key, format!("{key} must not be empty")));
    }
    Ok(())
}

fn parse_url(key: &str, value: &str) -> AuthResult<Url> {
    Url::parse(value)
        .map_err(|e| AuthError::configuration(key, format!("invalid URL '{value}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issuer_url_from_bare_domain() {
        assert_eq!(
            issuer_url("dev-tenant.us.auth0.com"),
            "https://dev-tenant.us.auth0.com/"
        );
        assert_eq!(
            issuer_url("dev-tenant.us.auth0.com/"),
            "https://dev-tenant.us.auth0.com/"
        );
    }

    #[test]
    fn test_issuer_url_keeps_explicit_scheme() {
        assert_eq!(issuer_url("http://127.0.0.1:9999"), "http://127.0.0.1:9999/");
    }

    #[test]
    fn test_secure_endpoint_rule() {
        let secure = |s: &str| is_secure_endpoint(&Url::parse(s).unwrap());
        assert!(secure("https://tenant.auth0.com/oauth/revoke"));
        assert!(secure("http://127.0.0.1:9999/oauth/revoke"));
        assert!(secure("http://localhost/oauth/revoke"));
        assert!(secure("http://[::1]:8080/"));
        assert!(!secure("http://tenant.auth0.com/oauth/revoke"));
        assert!(!secure("ftp://127.0.0.1/"));
    }

    #[test]
    fn test_client_config_defaults() {
        let config = ClientConfig::new("tenant.auth0.com", "client", "https://api.example.com");
        assert_eq!(config.cache_location, CacheLocation::Memory);
        assert_eq!(config.refresh_interval, Duration::from_secs(60));
        assert_eq!(config.scopes, vec!["openid", "profile", "email"]);
        assert!(config.api_base_url.is_none());
        assert!(config.validate().is_ok());
        assert_eq!(
            config.discovery_url(),
            "https://tenant.auth0.com/.well-known/openid-configuration"
        );
    }

    #[test]
    fn test_client_config_rejects_empty_client_id() {
        let config = ClientConfig::new("tenant.auth0.com", " ", "https://api.example.com");
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            AuthError::Configuration { key: Some(ref k), .. } if k == "client_id"
        ));
    }

    #[test]
    fn test_client_config_rejects_bad_api_base() {
        let config = ClientConfig::new("tenant.auth0.com", "client", "aud")
            .with_api_base_url("not a url");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_client_config_rejects_zero_interval() {
        let config = ClientConfig::new("tenant.auth0.com", "client", "aud")
            .with_refresh_interval(Duration::ZERO);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cache_location_parsing() {
        assert_eq!("memory".parse::<CacheLocation>().unwrap(), CacheLocation::Memory);
        assert_eq!(
            "LocalStorage".parse::<CacheLocation>().unwrap(),
            CacheLocation::local_storage()
        );
        assert!("cookie".parse::<CacheLocation>().is_err());
    }

    #[test]
    fn test_cache_location_serde() {
        let json = serde_json::json!({"kind": "localstorage", "path": "/tmp/session.json"});
        let location: CacheLocation = serde_json::from_value(json).unwrap();
        assert_eq!(
            location,
            CacheLocation::LocalStorage {
                path: PathBuf::from("/tmp/session.json")
            }
        );
    }

    #[test]
    fn test_cache_location_from_bare_string() {
        let memory: CacheLocation = serde_json::from_value(serde_json::json!("memory")).unwrap();
        assert_eq!(memory, CacheLocation::Memory);

        let local: CacheLocation =
            serde_json::from_value(serde_json::json!("localstorage")).unwrap();
        assert_eq!(local, CacheLocation::local_storage());

        assert!(serde_json::from_value::<CacheLocation>(serde_json::json!("cookie")).is_err());
    }

    #[test]
    fn test_client_config_accepts_string_cache_location() {
        let json = serde_json::json!({
            "domain": "tenant.auth0.com",
            "client_id": "abc",
            "audience": "https://api.example.com",
            "cache_location": "localstorage",
        });
        let config: ClientConfig = serde_json::from_value(json).unwrap();
        assert_eq!(config.cache_location, CacheLocation::local_storage());

        // Serialized form reads back
        let again: CacheLocation =
            serde_json::from_value(serde_json::to_value(&config.cache_location).unwrap()).unwrap();
        assert_eq!(again, config.cache_location);
    }

    #[test]
    fn test_server_config_endpoints() {
        let config = ServerConfig::new("tenant.auth0.com", "https://api.example.com");
        assert_eq!(config.issuer_url(), "https://tenant.auth0.com/");
        assert_eq!(
            config.jwks_uri(),
            "https://tenant.auth0.com/.well-known/jwks.json"
        );
        assert_eq!(config.clock_skew, Duration::ZERO);
        assert_eq!(config.jwks_cache_ttl, Duration::from_secs(600));
    }

    #[test]
    fn test_server_config_requires_algorithms() {
        let config = ServerConfig::new("tenant.auth0.com", "aud").with_algorithms(vec![]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_client_config_deserialize_with_defaults() {
        let json = serde_json::json!({
            "domain": "tenant.auth0.com",
            "client_id": "abc",
            "audience": "https://api.example.com",
        });
        let config: ClientConfig = serde_json::from_value(json).unwrap();
        assert_eq!(config.redirect_uri, DEFAULT_REDIRECT_URI);
        assert_eq!(config.refresh_interval, DEFAULT_REFRESH_INTERVAL);
    }
}
