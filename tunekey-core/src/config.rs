//! Credential-manager configuration.
//!
//! Configuration is explicit and validated once at manager construction;
//! a missing or unusable field fails fast with
//! [`AuthError::ConfigMissing`] instead of deferring the failure to the
//! first credentialed call.

use chrono::Duration as ChronoDuration;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

use crate::error::AuthError;
use crate::model::ScopeSet;
use crate::retry::RetryPolicy;
use crate::secret::Secret;

/// Default consent endpoint (Spotify accounts service).
pub const DEFAULT_AUTH_URL: &str = "https://accounts.spotify.com/authorize";

/// Default token endpoint (Spotify accounts service).
pub const DEFAULT_TOKEN_URL: &str = "https://accounts.spotify.com/api/token";

/// Default scope: private playlist modification.
pub const DEFAULT_SCOPE: &str = "playlist-modify-private";

const DEFAULT_SAFETY_MARGIN_SECS: i64 = 60;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;
const DEFAULT_AUTHORIZE_TIMEOUT_SECS: u64 = 120;

/// Configuration for a [`TokenManager`](crate::TokenManager).
///
/// # Example
///
/// ```
/// use tunekey_core::{AuthConfig, ScopeSet};
///
/// let config = AuthConfig::new(
///     "my-client-id",
///     "my-client-secret",
///     "http://127.0.0.1:8888/callback",
/// )
/// .with_scopes(ScopeSet::parse("playlist-modify-private"));
///
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Client identifier issued by the remote service.
    pub client_id: String,

    /// Client secret; only ever transmitted over the token-exchange channel.
    pub client_secret: Secret,

    /// Redirect URI, exactly as registered with the remote service.
    pub redirect_uri: String,

    /// Scopes requested at authorization time.
    pub scopes: ScopeSet,

    /// Consent (authorization) endpoint.
    pub auth_url: String,

    /// Token endpoint.
    pub token_url: String,

    /// Minimum remaining validity below which a refresh is triggered.
    pub safety_margin: ChronoDuration,

    /// Bound on any single token-endpoint call.
    pub http_timeout: Duration,

    /// Bound on waiting for the authorization callback.
    pub authorize_timeout: Duration,

    /// Backoff schedule for transient refresh failures.
    pub retry: RetryPolicy,
}

impl AuthConfig {
    /// Create a configuration with the default Spotify endpoints, the
    /// default write scope, and the default timing policy.
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<Secret>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_uri: redirect_uri.into(),
            scopes: ScopeSet::parse(DEFAULT_SCOPE),
            auth_url: DEFAULT_AUTH_URL.to_string(),
            token_url: DEFAULT_TOKEN_URL.to_string(),
            safety_margin: ChronoDuration::seconds(DEFAULT_SAFETY_MARGIN_SECS),
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
            authorize_timeout: Duration::from_secs(DEFAULT_AUTHORIZE_TIMEOUT_SECS),
            retry: RetryPolicy::default(),
        }
    }

    /// Set the requested scopes.
    pub fn with_scopes(mut self, scopes: ScopeSet) -> Self {
        self.scopes = scopes;
        self
    }

    /// Set the consent and token endpoints.
    pub fn with_endpoints(
        mut self,
        auth_url: impl Into<String>,
        token_url: impl Into<String>,
    ) -> Self {
        self.auth_url = auth_url.into();
        self.token_url = token_url.into();
        self
    }

    /// Set the safety margin.
    pub fn with_safety_margin(mut self, margin: ChronoDuration) -> Self {
        self.safety_margin = margin;
        self
    }

    /// Set the per-call HTTP timeout.
    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    /// Set the authorization-callback wait timeout.
    pub fn with_authorize_timeout(mut self, timeout: Duration) -> Self {
        self.authorize_timeout = timeout;
        self
    }

    /// Set the refresh retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Load configuration from the environment.
    ///
    /// Required: `TUNEKEY_CLIENT_ID`, `TUNEKEY_CLIENT_SECRET`,
    /// `TUNEKEY_REDIRECT_URI`. Optional: `TUNEKEY_SCOPES`
    /// (whitespace- or comma-separated).
    pub fn from_env() -> Result<Self, AuthError> {
        fn required(name: &'static str) -> Result<String, AuthError> {
            std::env::var(name)
                .ok()
                .filter(|v| !v.is_empty())
                .ok_or(AuthError::ConfigMissing { field: name })
        }

        let mut config = Self::new(
            required("TUNEKEY_CLIENT_ID")?,
            required("TUNEKEY_CLIENT_SECRET")?,
            required("TUNEKEY_REDIRECT_URI")?,
        );

        if let Ok(raw) = std::env::var("TUNEKEY_SCOPES") {
            let scopes = ScopeSet::parse(&raw);
            if !scopes.is_empty() {
                config.scopes = scopes;
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// Empty required fields and unparseable URIs are both reported as
    /// [`AuthError::ConfigMissing`]: either way the field is unusable and
    /// needs operator correction before startup.
    pub fn validate(&self) -> Result<(), AuthError> {
        if self.client_id.is_empty() {
            return Err(AuthError::ConfigMissing { field: "client_id" });
        }
        if self.client_secret.is_empty() {
            return Err(AuthError::ConfigMissing {
                field: "client_secret",
            });
        }
        if Url::parse(&self.redirect_uri).is_err() {
            return Err(AuthError::ConfigMissing {
                field: "redirect_uri",
            });
        }
        if Url::parse(&self.auth_url).is_err() {
            return Err(AuthError::ConfigMissing { field: "auth_url" });
        }
        if Url::parse(&self.token_url).is_err() {
            return Err(AuthError::ConfigMissing { field: "token_url" });
        }
        if self.scopes.is_empty() {
            return Err(AuthError::ConfigMissing { field: "scopes" });
        }
        Ok(())
    }

    /// Default location for the persisted credential record.
    pub fn default_cache_path() -> PathBuf {
        directories::ProjectDirs::from("com", "tunekey", "tunekey")
            .map(|dirs| dirs.data_dir().join("credentials.json"))
            .unwrap_or_else(|| PathBuf::from(".tunekey/credentials.json"))
    }
}
