//! Core credential-management library for tunekey.
//!
//! tunekey keeps one OAuth2 authorization-code credential alive for
//! unattended use: it walks the user through consent once, then hands out
//! access tokens that are guaranteed fresh, refreshing behind the scenes
//! and persisting the credential record across restarts.
//!
//! # Architecture
//!
//! - [`TokenManager`] - the state machine: authorize, refresh, hand out
//!   tokens
//! - [`AuthConfig`] - explicit configuration, validated at construction
//! - [`TokenCache`] - storage seam, with [`FileCache`] and [`MemoryCache`]
//!   implementations
//! - [`Credentials`] / [`ScopeSet`] / [`Secret`] - the credential data model
//! - [`AuthError`] - the error taxonomy, including the
//!   transient-vs-revoked refresh distinction
//!
//! # Example
//!
//! ```rust,no_run
//! use tunekey_core::{AuthConfig, FileCache, TokenManager};
//!
//! # async fn example() -> Result<(), tunekey_core::AuthError> {
//! let config = AuthConfig::from_env()?;
//! let manager = TokenManager::restore(config, FileCache::at_default_location()).await?;
//!
//! if !manager.status().await.authenticated {
//!     let (pending, callback) = manager.begin_authorization()?;
//!     println!("visit: {}", pending.consent_url());
//!     // ... deliver the redirect through `callback`, then:
//!     manager.authorize(pending).await?;
//! }
//!
//! let token = manager.valid_token().await?;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod manager;
pub mod model;
pub mod retry;
pub mod secret;

mod oauth;

pub use cache::{FileCache, MemoryCache, StoreError, TokenCache};
pub use config::{AuthConfig, DEFAULT_AUTH_URL, DEFAULT_SCOPE, DEFAULT_TOKEN_URL};
pub use error::{AuthError, RefreshErrorKind};
pub use manager::{AuthCallback, CallbackSender, PendingAuthorization, TokenManager};
pub use model::{Credentials, ScopeSet, TokenStatus};
pub use retry::RetryPolicy;
pub use secret::Secret;
