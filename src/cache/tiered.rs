// ABOUTME: Two-tier cache composing the process-local LRU over an optional remote tier
// ABOUTME: Remote failures degrade to misses with a warning and never fail the caller
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nixopus

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::memory::InMemoryCache;
use super::redis::RedisCache;
use super::{CacheConfig, CacheKey, CacheProvider, CacheTtlConfig};
use crate::errors::{AppError, AppResult};
use nixopus_core::constants::limits::BACKEND_CALL_TIMEOUT_SECS;

/// Local tier (L1) over an optional remote tier (L2).
///
/// Reads consult L1, then L2; an L2 hit is copied into L1 with the remaining
/// remote lifetime so the two tiers expire together. Writes and invalidations
/// go L1 first, then L2, and always delete before writing.
#[derive(Clone)]
pub struct TieredCache<R = RedisCache> {
    local: InMemoryCache,
    remote: Option<R>,
    ttl: CacheTtlConfig,
    call_timeout: Duration,
}

impl TieredCache<RedisCache> {
    /// Build the tiers from configuration.
    ///
    /// When a Redis URL is configured but unreachable at startup, the cache runs
    /// with the local tier only and logs a warning.
    pub async fn from_config(config: CacheConfig) -> Self {
        let local = InMemoryCache::new_with_config(&config);
        let ttl = config.ttl.clone();
        let remote = if config.redis_url.is_some() {
            match RedisCache::new(config).await {
                Ok(remote) => Some(remote),
                Err(e) => {
                    warn!(error = %e, "Remote cache unavailable, continuing with local tier only");
                    None
                }
            }
        } else {
            None
        };
        Self::new(local, remote, ttl)
    }
}

impl<R: CacheProvider> TieredCache<R> {
    /// Compose existing tiers
    #[must_use]
    pub fn new(local: InMemoryCache, remote: Option<R>, ttl: CacheTtlConfig) -> Self {
        Self {
            local,
            remote,
            ttl,
            call_timeout: Duration::from_secs(BACKEND_CALL_TIMEOUT_SECS),
        }
    }

    /// Override the per-call timeout applied to the remote tier
    #[must_use]
    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    /// Whether a remote tier is attached
    #[must_use]
    pub const fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    /// TTL configured for the entity behind `key`
    #[must_use]
    pub const fn ttl_for(&self, key: &CacheKey) -> Duration {
        self.ttl.ttl_for(key)
    }

    async fn remote_call<T, F>(&self, operation: &str, key: &str, call: F) -> Option<T>
    where
        F: std::future::Future<Output = AppResult<T>> + Send,
    {
        match tokio::time::timeout(self.call_timeout, call).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(e)) => {
                warn!(operation, cache_key = key, error = %e, "Remote cache call failed, degrading");
                None
            }
            Err(_) => {
                warn!(operation, cache_key = key, "Remote cache call timed out, degrading");
                None
            }
        }
    }

    /// Read a value. Undecodable or unreachable entries are misses.
    pub async fn get<T>(&self, key: &CacheKey) -> Option<T>
    where
        T: for<'de> Deserialize<'de> + Serialize + Send + Sync,
    {
        match self.local.get::<T>(key).await {
            Ok(Some(value)) => return Some(value),
            Ok(None) => {}
            Err(e) => {
                debug!(cache_key = %key, error = %e, "Dropping undecodable local entry");
                self.local_invalidate(key).await;
            }
        }

        let remote = self.remote.as_ref()?;
        let rendered = key.to_string();
        let (value, remaining) = self
            .remote_call("get", &rendered, remote.get_with_ttl::<T>(key))
            .await??;

        if let Err(e) = self.local.set(key, &value, remaining).await {
            debug!(cache_key = %key, error = %e, "Failed to promote remote hit to local tier");
        }
        Some(value)
    }

    /// Write a value to both tiers with the entity's configured TTL
    pub async fn put<T: Serialize + Send + Sync>(&self, key: &CacheKey, value: &T) {
        let ttl = self.ttl.ttl_for(key);
        self.local_invalidate(key).await;
        if let Err(e) = self.local.set(key, value, ttl).await {
            warn!(cache_key = %key, error = %e, "Local cache write failed");
        }

        if let Some(remote) = &self.remote {
            let rendered = key.to_string();
            self.remote_call("invalidate", &rendered, remote.invalidate(key))
                .await;
            self.remote_call("set", &rendered, remote.set(key, value, ttl))
                .await;
        }
    }

    /// Remove one entry from both tiers
    pub async fn invalidate(&self, key: &CacheKey) {
        self.local_invalidate(key).await;
        if let Some(remote) = &self.remote {
            let rendered = key.to_string();
            self.remote_call("invalidate", &rendered, remote.invalidate(key))
                .await;
        }
    }

    /// Remove every entry matching a glob pattern from both tiers
    pub async fn invalidate_pattern(&self, pattern: &str) {
        if let Err(e) = self.local.invalidate_pattern(pattern).await {
            warn!(pattern, error = %e, "Local cache pattern invalidation failed");
        }
        if let Some(remote) = &self.remote {
            self.remote_call(
                "invalidate_pattern",
                pattern,
                remote.invalidate_pattern(pattern),
            )
            .await;
        }
    }

    /// Verify the remote tier, if any, is reachable
    ///
    /// # Errors
    ///
    /// Returns an error if the remote tier fails its health check or times out
    pub async fn health_check(&self) -> AppResult<()> {
        let Some(remote) = &self.remote else {
            return Ok(());
        };
        tokio::time::timeout(self.call_timeout, remote.health_check())
            .await
            .map_err(|_| AppError::cache("remote cache health check timed out"))?
    }

    async fn local_invalidate(&self, key: &CacheKey) {
        if let Err(e) = self.local.invalidate(key).await {
            warn!(cache_key = %key, error = %e, "Local cache invalidation failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn local_only() -> TieredCache<InMemoryCache> {
        let config = CacheConfig {
            enable_background_cleanup: false,
            ..Default::default()
        };
        TieredCache::new(InMemoryCache::new_with_config(&config), None, config.ttl)
    }

    #[tokio::test]
    async fn test_local_only_round_trip() {
        let cache = local_only();
        let key = CacheKey::membership(Uuid::new_v4(), Uuid::new_v4());

        assert_eq!(cache.get::<bool>(&key).await, None);
        cache.put(&key, &false).await;
        assert_eq!(cache.get::<bool>(&key).await, Some(false));

        cache.invalidate(&key).await;
        assert_eq!(cache.get::<bool>(&key).await, None);
    }

    #[tokio::test]
    async fn test_remote_hit_is_promoted_to_local() -> AppResult<()> {
        let config = CacheConfig {
            enable_background_cleanup: false,
            ..Default::default()
        };
        let local = InMemoryCache::new_with_config(&config);
        let remote = InMemoryCache::new_with_config(&config);
        let cache = TieredCache::new(local.clone(), Some(remote.clone()), config.ttl);

        let key = CacheKey::principal("u1@x.test");
        remote
            .set(&key, &"from-remote", Duration::from_secs(120))
            .await?;

        assert_eq!(
            cache.get::<String>(&key).await.as_deref(),
            Some("from-remote")
        );
        let (_, ttl) = local
            .get_with_ttl::<String>(&key)
            .await?
            .ok_or_else(|| AppError::internal("not promoted"))?;
        assert!(ttl <= Duration::from_secs(120));
        Ok(())
    }
}
