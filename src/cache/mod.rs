// ABOUTME: Cache abstraction for principals, memberships and permission snapshots
// ABOUTME: Pluggable backends (in-memory LRU, Redis) composed into a two-tier cache
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nixopus

/// In-memory cache implementation
pub mod memory;
/// Redis cache implementation
pub mod redis;
/// Coalescing of concurrent backend fetches per key
pub mod single_flight;
/// Two-tier composition of the local and remote caches
pub mod tiered;

pub use single_flight::SingleFlight;
pub use tiered::TieredCache;

use crate::config::RedisConnectionConfig;
use crate::errors::AppResult;
use nixopus_core::constants::cache::{
    DEFAULT_CACHE_MAX_ENTRIES, DEFAULT_CLEANUP_INTERVAL_SECS, MEMBERSHIP_KEY_PREFIX,
    PERMISSIONS_KEY_PREFIX, PRINCIPAL_KEY_PREFIX, TTL_MEMBERSHIP_SECS, TTL_PERMISSIONS_SECS,
    TTL_PRINCIPAL_SECS,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Cache provider trait for pluggable backend implementations
///
/// Values are stored as JSON so the remote tier stays readable by the rest of
/// the platform, which shares the same key layout.
///
/// # Examples
///
/// ```rust,no_run
/// use nixopus_mcp_server::cache::{CacheConfig, CacheKey, CacheProvider};
/// use nixopus_mcp_server::cache::memory::InMemoryCache;
/// use std::time::Duration;
/// use uuid::Uuid;
/// # async fn example() -> Result<(), nixopus_mcp_server::errors::AppError> {
///
/// let cache = InMemoryCache::new(CacheConfig {
///     enable_background_cleanup: false,
///     ..Default::default()
/// })
/// .await?;
///
/// let key = CacheKey::membership(Uuid::new_v4(), Uuid::new_v4());
/// cache.set(&key, &true, Duration::from_secs(1800)).await?;
///
/// let member: Option<bool> = cache.get(&key).await?;
/// assert_eq!(member, Some(true));
///
/// cache.invalidate(&key).await?;
/// # Ok(())
/// # }
/// ```
#[async_trait::async_trait]
pub trait CacheProvider: Send + Sync + Clone {
    /// Create new cache instance with configuration
    ///
    /// # Errors
    ///
    /// Returns an error if cache initialization fails
    async fn new(config: CacheConfig) -> AppResult<Self>
    where
        Self: Sized;

    /// Store value in cache with TTL
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or storage fails
    async fn set<T: Serialize + Send + Sync>(
        &self,
        key: &CacheKey,
        value: &T,
        ttl: Duration,
    ) -> AppResult<()>;

    /// Retrieve value from cache. Expired entries are misses.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend or deserialization fails
    async fn get<T: for<'de> Deserialize<'de>>(&self, key: &CacheKey) -> AppResult<Option<T>>;

    /// Retrieve value together with its remaining time to live
    ///
    /// # Errors
    ///
    /// Returns an error if the backend or deserialization fails
    async fn get_with_ttl<T: for<'de> Deserialize<'de>>(
        &self,
        key: &CacheKey,
    ) -> AppResult<Option<(T, Duration)>>;

    /// Remove single cache entry
    ///
    /// # Errors
    ///
    /// Returns an error if invalidation fails
    async fn invalidate(&self, key: &CacheKey) -> AppResult<()>;

    /// Remove all cache entries matching a glob pattern (e.g. `rbac:<user>:*`)
    ///
    /// # Errors
    ///
    /// Returns an error if pattern invalidation fails
    async fn invalidate_pattern(&self, pattern: &str) -> AppResult<u64>;

    /// Verify cache backend is healthy
    ///
    /// # Errors
    ///
    /// Returns an error if health check fails
    async fn health_check(&self) -> AppResult<()>;

    /// Clear all entries owned by this server
    ///
    /// # Errors
    ///
    /// Returns an error if clear operation fails
    async fn clear_all(&self) -> AppResult<()>;
}

/// Cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of entries (for in-memory cache)
    pub max_entries: usize,
    /// Redis connection URL; `None` runs with the local tier only
    pub redis_url: Option<String>,
    /// Cleanup interval for expired entries
    pub cleanup_interval: Duration,
    /// Enable background cleanup task (should be false in tests to avoid runtime conflicts)
    pub enable_background_cleanup: bool,
    /// Redis connection and retry configuration
    pub redis_connection: RedisConnectionConfig,
    /// Cache TTL configuration
    pub ttl: CacheTtlConfig,
}

/// TTLs per cached entity
#[derive(Debug, Clone)]
pub struct CacheTtlConfig {
    /// Principal by email (default: 10 minutes)
    pub principal_secs: u64,
    /// Membership flag (default: 30 minutes)
    pub membership_secs: u64,
    /// Permission snapshot (default: 30 minutes)
    pub permissions_secs: u64,
}

impl Default for CacheTtlConfig {
    fn default() -> Self {
        Self {
            principal_secs: TTL_PRINCIPAL_SECS,
            membership_secs: TTL_MEMBERSHIP_SECS,
            permissions_secs: TTL_PERMISSIONS_SECS,
        }
    }
}

impl CacheTtlConfig {
    /// TTL for the entity stored under `key`
    #[must_use]
    pub const fn ttl_for(&self, key: &CacheKey) -> Duration {
        match key {
            CacheKey::Principal { .. } => Duration::from_secs(self.principal_secs),
            CacheKey::Membership { .. } => Duration::from_secs(self.membership_secs),
            CacheKey::Permissions { .. } => Duration::from_secs(self.permissions_secs),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_CACHE_MAX_ENTRIES,
            redis_url: None,
            cleanup_interval: Duration::from_secs(DEFAULT_CLEANUP_INTERVAL_SECS),
            // Tests can explicitly disable by setting to false
            enable_background_cleanup: true,
            redis_connection: RedisConnectionConfig::default(),
            ttl: CacheTtlConfig::default(),
        }
    }
}

/// Structured cache key.
///
/// The rendered form is shared with the rest of the platform:
/// `user:<email>`, `org_membership:<userId>:<orgId>`, `rbac:<userId>:<orgId>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// Principal looked up by login email
    Principal {
        /// Normalized (trimmed, lowercase) email
        email: String,
    },
    /// Membership flag for one (user, organization) pair
    Membership {
        /// Member user id
        user_id: Uuid,
        /// Organization id
        organization_id: Uuid,
    },
    /// Permission snapshot for one (user, organization) pair
    Permissions {
        /// User id
        user_id: Uuid,
        /// Organization id
        organization_id: Uuid,
    },
}

impl CacheKey {
    /// Principal key; the email is normalized so lookups are case-insensitive
    #[must_use]
    pub fn principal(email: &str) -> Self {
        Self::Principal {
            email: email.trim().to_lowercase(),
        }
    }

    /// Membership key
    #[must_use]
    pub const fn membership(user_id: Uuid, organization_id: Uuid) -> Self {
        Self::Membership {
            user_id,
            organization_id,
        }
    }

    /// Permissions key
    #[must_use]
    pub const fn permissions(user_id: Uuid, organization_id: Uuid) -> Self {
        Self::Permissions {
            user_id,
            organization_id,
        }
    }

    /// Patterns covering every membership and permission entry of a user
    #[must_use]
    pub fn user_patterns(user_id: Uuid) -> [String; 2] {
        [
            format!("{MEMBERSHIP_KEY_PREFIX}:{user_id}:*"),
            format!("{PERMISSIONS_KEY_PREFIX}:{user_id}:*"),
        ]
    }

    /// Prefix patterns of every key family this server writes
    #[must_use]
    pub fn owned_patterns() -> [String; 3] {
        [
            format!("{PRINCIPAL_KEY_PREFIX}:*"),
            format!("{MEMBERSHIP_KEY_PREFIX}:*"),
            format!("{PERMISSIONS_KEY_PREFIX}:*"),
        ]
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Principal { email } => write!(f, "{PRINCIPAL_KEY_PREFIX}:{email}"),
            Self::Membership {
                user_id,
                organization_id,
            } => write!(f, "{MEMBERSHIP_KEY_PREFIX}:{user_id}:{organization_id}"),
            Self::Permissions {
                user_id,
                organization_id,
            } => write!(f, "{PERMISSIONS_KEY_PREFIX}:{user_id}:{organization_id}"),
        }
    }
}
