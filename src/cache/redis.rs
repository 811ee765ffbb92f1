// ABOUTME: Redis cache tier with connection management and millisecond TTLs
// ABOUTME: Shares the platform key layout (user:, org_membership:, rbac:) with the API server
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nixopus

use super::{CacheConfig, CacheKey, CacheProvider};
use crate::config::RedisConnectionConfig;
use crate::errors::{AppError, AppResult};
use nixopus_core::constants::cache::REDIS_SCAN_BATCH;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info, warn};

/// Redis cache implementation
///
/// Uses Redis `ConnectionManager` for automatic reconnection. Keys are written
/// without a server-specific prefix because the API server invalidates the same
/// entries when roles, memberships or users change.
#[derive(Clone)]
pub struct RedisCache {
    manager: ConnectionManager,
}

impl RedisCache {
    /// Create new Redis cache instance
    ///
    /// # Errors
    ///
    /// Returns an error if Redis connection fails
    async fn new_with_config(config: &CacheConfig) -> AppResult<Self> {
        let redis_url = config
            .redis_url
            .as_ref()
            .ok_or_else(|| AppError::config("Redis URL is required for Redis cache backend"))?;

        let conn_config = &config.redis_connection;

        info!(
            "Connecting to Redis (timeout={}s, response_timeout={}s, retries={})",
            conn_config.connection_timeout_secs,
            conn_config.response_timeout_secs,
            conn_config.initial_connection_retries
        );

        let client = redis::Client::open(redis_url.as_str())
            .map_err(|e| AppError::config(format!("Failed to create Redis client: {e}")))?;

        let manager = Self::connect_with_retry(&client, conn_config).await?;

        info!("Successfully connected to Redis");

        Ok(Self { manager })
    }

    /// Connect to Redis with exponential backoff retry on failure
    async fn connect_with_retry(
        client: &redis::Client,
        conn_config: &RedisConnectionConfig,
    ) -> AppResult<ConnectionManager> {
        let manager_config = ConnectionManagerConfig::new()
            .set_connection_timeout(Duration::from_secs(conn_config.connection_timeout_secs))
            .set_response_timeout(Duration::from_secs(conn_config.response_timeout_secs))
            .set_number_of_retries(conn_config.reconnection_retries)
            .set_exponent_base(conn_config.retry_exponent_base)
            .set_max_delay(conn_config.max_retry_delay_ms);

        let max_retries = conn_config.initial_connection_retries;
        let max_delay_ms = conn_config.max_retry_delay_ms;

        let mut last_error = None;
        let mut delay_ms = conn_config.initial_retry_delay_ms;

        for attempt in 0..=max_retries {
            match ConnectionManager::new_with_config(client.clone(), manager_config.clone()).await {
                Ok(manager) => {
                    if attempt > 0 {
                        info!("Redis connection established after {} retries", attempt);
                    }
                    return Ok(manager);
                }
                Err(e) => {
                    if attempt < max_retries {
                        warn!(
                            "Redis connection attempt {}/{} failed, retrying in {}ms: {}",
                            attempt + 1,
                            max_retries + 1,
                            delay_ms,
                            e
                        );
                        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                        delay_ms = (delay_ms * 2).min(max_delay_ms);
                    }
                    last_error = Some(e);
                }
            }
        }

        Err(AppError::cache(format!(
            "Failed to connect to Redis after {} attempts: {}",
            max_retries + 1,
            last_error.map_or_else(|| "unknown error".to_owned(), |e| e.to_string())
        )))
    }

    fn cache_error(operation: &str, e: &redis::RedisError) -> AppError {
        error!("Redis {} operation failed: {}", operation, e);
        AppError::cache(format!("Redis {operation} failed: {e}"))
    }

    /// Delete every key matching `pattern` using cursor-based SCAN
    async fn delete_matching(&self, pattern: &str) -> AppResult<u64> {
        let mut conn = self.manager.clone();
        let mut count = 0u64;
        let mut cursor = 0u64;

        loop {
            let (new_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(REDIS_SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .map_err(|e| Self::cache_error("SCAN", &e))?;

            if !keys.is_empty() {
                let deleted: u64 = conn
                    .del(&keys)
                    .await
                    .map_err(|e| Self::cache_error("DEL", &e))?;
                count += deleted;
            }

            cursor = new_cursor;
            if cursor == 0 {
                break;
            }
        }

        Ok(count)
    }
}

#[async_trait::async_trait]
impl CacheProvider for RedisCache {
    async fn new(config: CacheConfig) -> AppResult<Self>
    where
        Self: Sized,
    {
        Self::new_with_config(&config).await
    }

    async fn set<T: Serialize + Send + Sync>(
        &self,
        key: &CacheKey,
        value: &T,
        ttl: Duration,
    ) -> AppResult<()> {
        let serialized = serde_json::to_vec(value)?;
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);

        let mut conn = self.manager.clone();

        // PSETEX keeps the remaining lifetime exact when an L1 hit is written back
        conn.pset_ex::<_, _, ()>(key.to_string(), serialized, ttl_ms)
            .await
            .map_err(|e| Self::cache_error("PSETEX", &e))
    }

    async fn get<T: for<'de> Deserialize<'de>>(&self, key: &CacheKey) -> AppResult<Option<T>> {
        let mut conn = self.manager.clone();

        let data: Option<Vec<u8>> = conn
            .get(key.to_string())
            .await
            .map_err(|e| Self::cache_error("GET", &e))?;

        data.map(|bytes| serde_json::from_slice(&bytes))
            .transpose()
            .map_err(AppError::from)
    }

    async fn get_with_ttl<T: for<'de> Deserialize<'de>>(
        &self,
        key: &CacheKey,
    ) -> AppResult<Option<(T, Duration)>> {
        let rendered = key.to_string();
        let mut conn = self.manager.clone();

        let (data, ttl_ms): (Option<Vec<u8>>, i64) = redis::pipe()
            .get(&rendered)
            .cmd("PTTL")
            .arg(&rendered)
            .query_async(&mut conn)
            .await
            .map_err(|e| Self::cache_error("GET/PTTL", &e))?;

        // PTTL is -2 for a missing key and -1 for a key without expiry;
        // entries without expiry are not ours and are treated as misses
        let Some(bytes) = data else {
            return Ok(None);
        };
        if ttl_ms <= 0 {
            return Ok(None);
        }

        let value = serde_json::from_slice(&bytes)?;
        Ok(Some((value, Duration::from_millis(ttl_ms as u64))))
    }

    async fn invalidate(&self, key: &CacheKey) -> AppResult<()> {
        let mut conn = self.manager.clone();

        conn.del::<_, ()>(key.to_string())
            .await
            .map_err(|e| Self::cache_error("DEL", &e))
    }

    async fn invalidate_pattern(&self, pattern: &str) -> AppResult<u64> {
        // glob and Redis MATCH use the same wildcard syntax
        self.delete_matching(pattern).await
    }

    async fn health_check(&self) -> AppResult<()> {
        let mut conn = self.manager.clone();

        let response: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| Self::cache_error("PING", &e))?;

        if response == "PONG" {
            Ok(())
        } else {
            Err(AppError::cache(format!(
                "unexpected PING response '{response}'"
            )))
        }
    }

    async fn clear_all(&self) -> AppResult<()> {
        for pattern in CacheKey::owned_patterns() {
            self.delete_matching(&pattern).await?;
        }
        Ok(())
    }
}
