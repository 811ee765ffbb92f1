// ABOUTME: Redis connection configuration and environment loading for the cache tiers
// ABOUTME: Covers timeouts, reconnection backoff and startup connection retries
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nixopus

use std::time::Duration;

use nixopus_core::constants::cache as constants;
use serde::{Deserialize, Serialize};

use super::{env_opt, env_parse};
use crate::cache::{CacheConfig, CacheTtlConfig};

/// Redis connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConnectionConfig {
    /// Connection timeout in seconds
    pub connection_timeout_secs: u64,
    /// Response/command timeout in seconds
    pub response_timeout_secs: u64,
    /// Number of reconnection retries after connection drop
    pub reconnection_retries: usize,
    /// Exponential backoff base for retry delays
    pub retry_exponent_base: u64,
    /// Maximum retry delay in milliseconds
    pub max_retry_delay_ms: u64,
    /// Number of retries for initial connection at startup
    pub initial_connection_retries: u32,
    /// Initial retry delay in milliseconds (doubles with exponential backoff)
    pub initial_retry_delay_ms: u64,
}

impl Default for RedisConnectionConfig {
    fn default() -> Self {
        Self {
            connection_timeout_secs: constants::REDIS_CONNECT_TIMEOUT_SECS,
            response_timeout_secs: constants::REDIS_RESPONSE_TIMEOUT_SECS,
            reconnection_retries: constants::REDIS_RECONNECTION_RETRIES,
            retry_exponent_base: constants::REDIS_RETRY_EXPONENT_BASE,
            max_retry_delay_ms: constants::REDIS_MAX_RETRY_DELAY_MS,
            initial_connection_retries: constants::REDIS_INITIAL_CONNECTION_RETRIES,
            initial_retry_delay_ms: constants::REDIS_INITIAL_RETRY_DELAY_MS,
        }
    }
}

impl RedisConnectionConfig {
    /// Load Redis connection configuration from environment
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            connection_timeout_secs: env_parse(
                "REDIS_CONNECTION_TIMEOUT_SECS",
                defaults.connection_timeout_secs,
            ),
            response_timeout_secs: env_parse(
                "REDIS_RESPONSE_TIMEOUT_SECS",
                defaults.response_timeout_secs,
            ),
            reconnection_retries: env_parse(
                "REDIS_RECONNECTION_RETRIES",
                defaults.reconnection_retries,
            ),
            retry_exponent_base: env_parse(
                "REDIS_RETRY_EXPONENT_BASE",
                defaults.retry_exponent_base,
            ),
            max_retry_delay_ms: env_parse("REDIS_MAX_RETRY_DELAY_MS", defaults.max_retry_delay_ms),
            initial_connection_retries: env_parse(
                "REDIS_INITIAL_CONNECTION_RETRIES",
                defaults.initial_connection_retries,
            ),
            initial_retry_delay_ms: env_parse(
                "REDIS_INITIAL_RETRY_DELAY_MS",
                defaults.initial_retry_delay_ms,
            ),
        }
    }
}

impl CacheTtlConfig {
    /// Load cache TTL configuration from environment
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            principal_secs: env_parse("CACHE_TTL_PRINCIPAL_SECS", defaults.principal_secs),
            membership_secs: env_parse("CACHE_TTL_MEMBERSHIP_SECS", defaults.membership_secs),
            permissions_secs: env_parse("CACHE_TTL_PERMISSIONS_SECS", defaults.permissions_secs),
        }
    }
}

impl CacheConfig {
    /// Load cache configuration from environment
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            max_entries: env_parse("CACHE_MAX_ENTRIES", constants::DEFAULT_CACHE_MAX_ENTRIES),
            redis_url: env_opt("REDIS_URL"),
            cleanup_interval: Duration::from_secs(env_parse(
                "CACHE_CLEANUP_INTERVAL_SECS",
                constants::DEFAULT_CLEANUP_INTERVAL_SECS,
            )),
            enable_background_cleanup: true,
            redis_connection: RedisConnectionConfig::from_env(),
            ttl: CacheTtlConfig::from_env(),
        }
    }
}
