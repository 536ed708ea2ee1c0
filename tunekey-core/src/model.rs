//! Domain types for the credential lifecycle.
//!
//! This module defines:
//! - [`ScopeSet`] - the set of capability strings requested or granted
//! - [`Credentials`] - the persisted access/refresh token record
//! - [`TokenStatus`] - introspection snapshot of the manager's state

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::secret::Secret;

/// An ordered, de-duplicated set of OAuth scope strings.
///
/// Scopes are compared as opaque strings. The set is immutable for the
/// lifetime of a token pair: a refresh never widens it.
///
/// # Examples
///
/// ```
/// use tunekey_core::ScopeSet;
///
/// let scopes = ScopeSet::parse("playlist-modify-private user-read-email");
/// assert!(scopes.missing_from(&["playlist-modify-private"]).is_empty());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScopeSet(Vec<String>);

impl ScopeSet {
    /// Create a scope set from individual scope strings.
    ///
    /// Duplicates are dropped; insertion order is preserved.
    pub fn new<I, S>(scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut inner: Vec<String> = Vec::new();
        for scope in scopes {
            let scope = scope.into();
            if !scope.is_empty() && !inner.contains(&scope) {
                inner.push(scope);
            }
        }
        Self(inner)
    }

    /// Parse a scope set from the OAuth wire format (whitespace-separated),
    /// also accepting commas for convenience in configuration values.
    pub fn parse(raw: &str) -> Self {
        Self::new(raw.split([' ', ',', '\t']).filter(|s| !s.is_empty()))
    }

    /// The scopes that `required` asks for but this set does not grant.
    ///
    /// An empty result means this set is a superset of `required`.
    pub fn missing_from(&self, required: &[&str]) -> Vec<String> {
        required
            .iter()
            .filter(|r| !self.0.iter().any(|have| have == *r))
            .map(|r| r.to_string())
            .collect()
    }

    /// Iterate over the scope strings.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|s| s.as_str())
    }

    /// The scopes as a slice.
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl fmt::Display for ScopeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join(" "))
    }
}

/// The persisted credential record: exactly one current token pair.
///
/// `access_token`/`expires_at` are replaced by every refresh; the whole
/// record is destroyed only by explicit invalidation or remote revocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    /// Short-lived bearer token for API calls.
    pub access_token: Secret,

    /// Long-lived token used to mint new access tokens.
    ///
    /// Only ever transmitted to the token endpoint, never logged.
    pub refresh_token: Secret,

    /// Absolute time after which `access_token` is invalid.
    pub expires_at: DateTime<Utc>,

    /// Scopes granted with this token pair.
    pub scopes: ScopeSet,
}

impl Credentials {
    /// Check if the access token is already past its expiry.
    pub fn is_expired(&self) -> bool {
        self.expires_at < Utc::now()
    }

    /// Check if the access token expires within the given margin.
    ///
    /// A token inside the margin must be refreshed before it is handed out.
    pub fn expires_within(&self, margin: Duration) -> bool {
        self.expires_at < Utc::now() + margin
    }

    /// Remaining validity. Negative once expired.
    pub fn remaining(&self) -> Duration {
        self.expires_at - Utc::now()
    }
}

/// Introspection snapshot of the manager's credential state.
#[derive(Debug, Clone, Serialize)]
pub struct TokenStatus {
    /// Whether the manager holds a credential record at all.
    pub authenticated: bool,

    /// Whether the access token is outside the safety margin (usable as-is).
    pub active: bool,

    /// When the current access token expires.
    pub expires_at: Option<DateTime<Utc>>,

    /// Scopes granted with the current token pair.
    pub scopes: Vec<String>,
}
