//! The credential manager.
//!
//! [`TokenManager`] owns the OAuth2 state machine: obtaining an
//! authorization code, exchanging it for an access/refresh token pair,
//! persisting the pair, and transparently refreshing it before expiry on
//! every credentialed call.
//!
//! # Concurrency
//!
//! Credential state sits behind a single async mutex that is held only for
//! short, non-network sections. A refresh runs as a detached task: the
//! first caller to observe an expiring token spawns it and records a watch
//! handle to its outcome; callers arriving meanwhile pick up the same
//! handle, so exactly one refresh reaches the token endpoint no matter how
//! many callers race. Because the task is detached, a caller that abandons
//! its wait affects neither the in-flight refresh (and any refresh-token
//! rotation it carries) nor the other waiters.
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), tunekey_core::AuthError> {
//! use tunekey_core::{AuthConfig, FileCache, TokenManager};
//!
//! let config = AuthConfig::from_env()?;
//! let manager = TokenManager::restore(config, FileCache::at_default_location()).await?;
//!
//! let token = manager.valid_token().await?;
//! // Use token.expose() as the bearer credential for API calls.
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use tokio::sync::{Mutex, oneshot, watch};

use crate::cache::TokenCache;
use crate::config::AuthConfig;
use crate::error::{AuthError, RefreshErrorKind};
use crate::model::{Credentials, ScopeSet, TokenStatus};
use crate::oauth;
use crate::secret::Secret;

/// Outcome of a detached refresh, cloneable so every waiter can observe it.
type RefreshOutcome = Result<Credentials, (RefreshErrorKind, String)>;

/// Credential state. `Refreshing` is not a stored state: an in-flight
/// refresh is the `inflight` handle next to it, so observers only ever see
/// the states below.
enum AuthState {
    Unauthenticated,
    Authenticated(Credentials),
}

struct ManagerState {
    auth: AuthState,
    /// Handle to the outcome of the current detached refresh, if one is
    /// running. `invalidate` and `authorize` clear this to orphan the task.
    inflight: Option<watch::Receiver<Option<RefreshOutcome>>>,
}

struct Inner<C: TokenCache> {
    config: AuthConfig,
    cache: C,
    state: Mutex<ManagerState>,
}

/// What the external callback receiver observed on the redirect.
#[derive(Debug)]
pub struct AuthCallback {
    /// Authorization code, when consent was granted.
    pub code: Option<String>,

    /// CSRF `state` parameter echoed by the consent endpoint.
    pub state: Option<String>,

    /// OAuth error code, when consent was declined or the request was bad.
    pub error: Option<String>,

    /// The URI (without query) on which the callback was received.
    pub received_uri: String,
}

/// Completion side of a pending authorization; handed to whatever external
/// collaborator captures the redirect.
pub type CallbackSender = oneshot::Sender<AuthCallback>;

/// An authorization flow that has been started but not yet completed.
///
/// Send the user to [`consent_url`](Self::consent_url), have the callback
/// receiver deliver the redirect through the paired [`CallbackSender`], then
/// pass this back to [`TokenManager::authorize`].
pub struct PendingAuthorization {
    consent_url: String,
    state: String,
    verifier: oauth2::PkceCodeVerifier,
    callback: oneshot::Receiver<AuthCallback>,
}

impl PendingAuthorization {
    /// The consent URL the user must visit.
    pub fn consent_url(&self) -> &str {
        &self.consent_url
    }

    /// The CSRF state the redirect must echo.
    pub fn state(&self) -> &str {
        &self.state
    }
}

/// OAuth2 authorization-code + refresh credential manager.
///
/// Guarantees that any caller asking for a valid access token receives one
/// with at least the configured safety margin of remaining validity,
/// refreshing transparently when needed, and never exposes a half-updated
/// credential to a concurrent caller.
///
/// Constructed explicitly and passed by reference to whatever needs
/// credentialed calls; lifecycle is owned by the composition root.
pub struct TokenManager<C: TokenCache> {
    inner: Arc<Inner<C>>,
}

impl<C: TokenCache + 'static> TokenManager<C> {
    /// Create a manager with no credentials loaded.
    ///
    /// Fails fast with [`AuthError::ConfigMissing`] when the configuration
    /// is unusable.
    pub fn new(config: AuthConfig, cache: C) -> Result<Self, AuthError> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                cache,
                state: Mutex::new(ManagerState {
                    auth: AuthState::Unauthenticated,
                    inflight: None,
                }),
            }),
        })
    }

    /// Create a manager and restore any persisted credential record.
    pub async fn restore(config: AuthConfig, cache: C) -> Result<Self, AuthError> {
        let manager = Self::new(config, cache)?;
        if let Some(credentials) = manager.inner.cache.load().await? {
            tracing::debug!(
                expires_at = %credentials.expires_at,
                "restored persisted credentials"
            );
            manager.inner.state.lock().await.auth = AuthState::Authenticated(credentials);
        }
        Ok(manager)
    }

    /// The configuration this manager was built with.
    pub fn config(&self) -> &AuthConfig {
        &self.inner.config
    }

    /// Start the interactive consent flow.
    ///
    /// Returns the pending authorization (consent URL, CSRF state) and the
    /// one-shot sender the external callback receiver uses to deliver the
    /// redirect. Completing the flow is [`authorize`](Self::authorize).
    pub fn begin_authorization(
        &self,
    ) -> Result<(PendingAuthorization, CallbackSender), AuthError> {
        let request = oauth::consent_request(&self.inner.config)?;
        let (tx, rx) = oneshot::channel();

        tracing::info!("authorization flow started");

        Ok((
            PendingAuthorization {
                consent_url: request.url,
                state: request.state,
                verifier: request.verifier,
                callback: rx,
            },
            tx,
        ))
    }

    /// Complete the interactive consent flow.
    ///
    /// Suspends until the callback receiver delivers the redirect or the
    /// configured authorize timeout elapses, verifies the redirect, then
    /// exchanges the code (one internal retry) and persists the resulting
    /// credential record before transitioning to `Authenticated`.
    pub async fn authorize(
        &self,
        pending: PendingAuthorization,
    ) -> Result<Credentials, AuthError> {
        let config = &self.inner.config;
        let PendingAuthorization {
            state,
            verifier,
            callback,
            ..
        } = pending;

        let callback = match tokio::time::timeout(config.authorize_timeout, callback).await {
            Err(_) => {
                return Err(AuthError::AuthExchangeFailed {
                    message: format!(
                        "no authorization callback within {:?}",
                        config.authorize_timeout
                    ),
                    code: None,
                });
            }
            Ok(Err(_)) => {
                return Err(AuthError::AuthExchangeFailed {
                    message: "authorization callback channel closed before a redirect arrived"
                        .to_string(),
                    code: None,
                });
            }
            Ok(Ok(callback)) => callback,
        };

        if let Some(error) = callback.error {
            tracing::warn!(error = %error, "consent declined");
            return Err(AuthError::AuthDenied { reason: error });
        }

        if !redirect_uri_matches(&config.redirect_uri, &callback.received_uri) {
            return Err(AuthError::RedirectMismatch {
                expected: config.redirect_uri.clone(),
                received: callback.received_uri,
            });
        }

        match callback.state.as_deref() {
            Some(received) if received == state => {}
            _ => {
                return Err(AuthError::AuthExchangeFailed {
                    message: "state parameter mismatch on authorization callback".to_string(),
                    code: None,
                });
            }
        }

        let code = callback.code.ok_or_else(|| AuthError::AuthExchangeFailed {
            message: "authorization callback carried neither code nor error".to_string(),
            code: None,
        })?;

        // The exchange is retryable once before the failure is surfaced.
        let credentials = match oauth::exchange_code(
            config,
            &code,
            oauth2::PkceCodeVerifier::new(verifier.secret().to_string()),
        )
        .await
        {
            Ok(credentials) => credentials,
            Err(first) => {
                tracing::warn!(error = %first, "code exchange failed, retrying once");
                oauth::exchange_code(config, &code, verifier).await?
            }
        };

        let mut guard = self.inner.state.lock().await;
        self.inner.cache.store(&credentials).await?;
        guard.auth = AuthState::Authenticated(credentials.clone());
        guard.inflight = None;

        tracing::info!(
            expires_at = %credentials.expires_at,
            scopes = %credentials.scopes,
            "authorization complete"
        );

        Ok(credentials)
    }

    /// Return an access token with at least the safety margin of remaining
    /// validity, refreshing synchronously first when needed.
    ///
    /// While unauthenticated (including after a revocation) this fails with
    /// [`AuthError::RefreshFailed`] of kind `Revoked` until a new
    /// [`authorize`](Self::authorize) succeeds.
    pub async fn valid_token(&self) -> Result<Secret, AuthError> {
        self.valid_token_checked(&[]).await
    }

    /// Like [`valid_token`](Self::valid_token), but first verifies that the
    /// granted scope covers `required`, failing fast with
    /// [`AuthError::ScopeNotGranted`] instead of attempting an under-scoped
    /// call.
    pub async fn token_for_scopes(&self, required: &[&str]) -> Result<Secret, AuthError> {
        self.valid_token_checked(required).await
    }

    async fn valid_token_checked(&self, required: &[&str]) -> Result<Secret, AuthError> {
        let mut outcome_rx = {
            let mut guard = self.inner.state.lock().await;

            let current = match &guard.auth {
                AuthState::Unauthenticated => {
                    return Err(AuthError::RefreshFailed {
                        kind: RefreshErrorKind::Revoked,
                        message: "not authenticated; authorization required".to_string(),
                    });
                }
                AuthState::Authenticated(credentials) => credentials,
            };

            let missing = current.scopes.missing_from(required);
            if !missing.is_empty() {
                return Err(AuthError::ScopeNotGranted { missing });
            }

            if !current.expires_within(self.inner.config.safety_margin) {
                tracing::debug!("access token outside safety margin, no refresh needed");
                return Ok(current.access_token.clone());
            }

            let refresh_token = current.refresh_token.clone();
            let prior_scopes = current.scopes.clone();
            let expires_at = current.expires_at;

            match &guard.inflight {
                Some(rx) => {
                    tracing::debug!("joining in-flight refresh");
                    rx.clone()
                }
                None => {
                    tracing::info!(
                        expires_at = %expires_at,
                        "access token inside safety margin, refreshing"
                    );
                    let (tx, rx) = watch::channel(None);
                    guard.inflight = Some(rx.clone());

                    let inner = Arc::clone(&self.inner);
                    tokio::spawn(async move {
                        inner.run_refresh(tx, refresh_token, prior_scopes).await;
                    });
                    rx
                }
            }
        };

        // The lock is released here; the refresh belongs to the spawned
        // task, so abandoning this wait leaves it and other waiters intact.
        let outcome = loop {
            if let Some(outcome) = outcome_rx.borrow_and_update().clone() {
                break outcome;
            }
            if outcome_rx.changed().await.is_err() {
                return Err(AuthError::RefreshFailed {
                    kind: RefreshErrorKind::Transient,
                    message: "refresh task ended without reporting an outcome".to_string(),
                });
            }
        };

        match outcome {
            Ok(credentials) => Ok(credentials.access_token),
            Err((kind, message)) => Err(AuthError::RefreshFailed { kind, message }),
        }
    }

    /// Discard current credentials, transitioning to `Unauthenticated`.
    ///
    /// Any in-flight refresh is orphaned: its outcome is discarded rather
    /// than resurrecting the invalidated credentials.
    pub async fn invalidate(&self) -> Result<(), AuthError> {
        let mut guard = self.inner.state.lock().await;
        guard.auth = AuthState::Unauthenticated;
        guard.inflight = None;
        self.inner.cache.clear().await?;
        tracing::info!("credentials invalidated");
        Ok(())
    }

    /// Snapshot of the current credential state.
    pub async fn status(&self) -> TokenStatus {
        let guard = self.inner.state.lock().await;
        match &guard.auth {
            AuthState::Unauthenticated => TokenStatus {
                authenticated: false,
                active: false,
                expires_at: None,
                scopes: Vec::new(),
            },
            AuthState::Authenticated(credentials) => TokenStatus {
                authenticated: true,
                active: !credentials.expires_within(self.inner.config.safety_margin),
                expires_at: Some(credentials.expires_at),
                scopes: credentials.scopes.iter().map(|s| s.to_string()).collect(),
            },
        }
    }
}

impl<C: TokenCache> Inner<C> {
    /// Drive one refresh to completion and broadcast the outcome.
    ///
    /// Runs detached from any caller. State is only committed while this
    /// refresh is still the registered in-flight one; if `invalidate` or a
    /// new `authorize` ran meanwhile, the outcome is broadcast to waiters
    /// but the state they installed is left untouched.
    async fn run_refresh(
        &self,
        tx: watch::Sender<Option<RefreshOutcome>>,
        refresh_token: Secret,
        prior_scopes: ScopeSet,
    ) {
        let outcome = match self.refresh_with_retry(&refresh_token, &prior_scopes).await {
            Ok(fresh) => {
                let mut guard = self.state.lock().await;
                if self.owns_inflight(&guard, &tx) {
                    if let Err(store_err) = self.cache.store(&fresh).await {
                        tracing::warn!(
                            error = %store_err,
                            "failed to persist refreshed credentials"
                        );
                    }
                    guard.auth = AuthState::Authenticated(fresh.clone());
                    guard.inflight = None;
                    tracing::info!(expires_at = %fresh.expires_at, "access token refreshed");
                }
                Ok(fresh)
            }
            Err(err) => {
                let (kind, message) = match err {
                    AuthError::RefreshFailed { kind, message } => (kind, message),
                    other => (RefreshErrorKind::Transient, other.to_string()),
                };

                let mut guard = self.state.lock().await;
                if self.owns_inflight(&guard, &tx) {
                    guard.inflight = None;
                    if kind == RefreshErrorKind::Revoked {
                        tracing::error!(
                            %message,
                            "refresh token revoked, re-authorization required"
                        );
                        guard.auth = AuthState::Unauthenticated;
                        if let Err(clear_err) = self.cache.clear().await {
                            tracing::warn!(
                                error = %clear_err,
                                "failed to clear persisted credentials"
                            );
                        }
                    } else {
                        // Transient with retries exhausted: the stale record
                        // stays in place so the next call is retry-eligible.
                        tracing::error!(%message, "refresh failed after retries");
                    }
                }
                Err((kind, message))
            }
        };

        let _ = tx.send(Some(outcome));
    }

    fn owns_inflight(
        &self,
        guard: &ManagerState,
        tx: &watch::Sender<Option<RefreshOutcome>>,
    ) -> bool {
        guard
            .inflight
            .as_ref()
            .is_some_and(|rx| rx.same_channel(&tx.subscribe()))
    }

    async fn refresh_with_retry(
        &self,
        refresh_token: &Secret,
        prior_scopes: &ScopeSet,
    ) -> Result<Credentials, AuthError> {
        let policy = &self.config.retry;
        let mut attempt = 1;

        loop {
            match oauth::exchange_refresh(&self.config, refresh_token, prior_scopes).await {
                Ok(credentials) => return Ok(credentials),
                Err(err) if err.is_refresh_failure(RefreshErrorKind::Transient) => {
                    match policy.delay_before(attempt + 1) {
                        Some(delay) => {
                            tracing::warn!(
                                attempt,
                                max_attempts = policy.max_attempts,
                                delay_ms = delay.as_millis() as u64,
                                error = %err,
                                "transient refresh failure, backing off"
                            );
                            tokio::time::sleep(delay).await;
                            attempt += 1;
                        }
                        None => return Err(err),
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Compare redirect URIs on scheme, host, port, and path, ignoring any
/// query the callback carried.
fn redirect_uri_matches(expected: &str, received: &str) -> bool {
    use url::Url;

    match (Url::parse(expected), Url::parse(received)) {
        (Ok(a), Ok(b)) => {
            a.scheme() == b.scheme()
                && a.host_str() == b.host_str()
                && a.port_or_known_default() == b.port_or_known_default()
                && a.path().trim_end_matches('/') == b.path().trim_end_matches('/')
        }
        _ => expected == received,
    }
}
