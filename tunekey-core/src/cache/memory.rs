//! In-memory credential cache.

use async_trait::async_trait;
use std::sync::RwLock;

use super::{StoreError, TokenCache};
use crate::model::Credentials;

/// In-memory credential cache for tests and ephemeral use.
///
/// Not persistent; the record is lost when the process exits.
pub struct MemoryCache {
    record: RwLock<Option<Credentials>>,
}

impl MemoryCache {
    /// Create a new empty cache.
    pub fn new() -> Self {
        Self {
            record: RwLock::new(None),
        }
    }

    /// Create a cache pre-seeded with a credential record.
    pub fn with_credentials(credentials: Credentials) -> Self {
        Self {
            record: RwLock::new(Some(credentials)),
        }
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let populated = self.record.read().map(|r| r.is_some()).unwrap_or(false);
        f.debug_struct("MemoryCache")
            .field("populated", &populated)
            .finish()
    }
}

#[async_trait]
impl TokenCache for MemoryCache {
    async fn load(&self) -> Result<Option<Credentials>, StoreError> {
        let record = self.record.read().map_err(|e| StoreError::Backend {
            message: format!("lock poisoned: {}", e),
        })?;
        Ok(record.clone())
    }

    async fn store(&self, credentials: &Credentials) -> Result<(), StoreError> {
        let mut record = self.record.write().map_err(|e| StoreError::Backend {
            message: format!("lock poisoned: {}", e),
        })?;
        *record = Some(credentials.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        let mut record = self.record.write().map_err(|e| StoreError::Backend {
            message: format!("lock poisoned: {}", e),
        })?;
        *record = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ScopeSet;
    use crate::secret::Secret;
    use chrono::{Duration, Utc};

    fn credentials() -> Credentials {
        Credentials {
            access_token: Secret::new("access"),
            refresh_token: Secret::new("refresh"),
            expires_at: Utc::now() + Duration::hours(1),
            scopes: ScopeSet::parse("playlist-modify-private"),
        }
    }

    #[tokio::test]
    async fn test_store_and_load() {
        let cache = MemoryCache::new();
        assert!(cache.load().await.unwrap().is_none());

        cache.store(&credentials()).await.unwrap();
        let loaded = cache.load().await.unwrap().unwrap();
        assert_eq!(loaded.access_token.expose(), "access");
    }

    #[tokio::test]
    async fn test_clear() {
        let cache = MemoryCache::with_credentials(credentials());
        assert!(cache.load().await.unwrap().is_some());

        cache.clear().await.unwrap();
        assert!(cache.load().await.unwrap().is_none());

        // Clearing again is a no-op.
        cache.clear().await.unwrap();
    }
}
