// ABOUTME: Cache-related constants for TTL, capacity, key prefixes and cleanup intervals
// ABOUTME: Shared by the process-local tier and the Redis tier so both agree on keys and expiry
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nixopus

/// Default maximum cache entries for the in-memory tier
pub const DEFAULT_CACHE_MAX_ENTRIES: usize = 10_000;

/// Default cleanup interval in seconds for expired entries
pub const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 60;

/// Principal cache TTL (10 minutes) - invalidated on user update
pub const TTL_PRINCIPAL_SECS: u64 = 600;

/// Organization membership cache TTL (30 minutes)
pub const TTL_MEMBERSHIP_SECS: u64 = 1_800;

/// RBAC permission snapshot cache TTL (30 minutes)
pub const TTL_PERMISSIONS_SECS: u64 = 1_800;

/// Key prefix for cached principals (`user:<email>`)
pub const PRINCIPAL_KEY_PREFIX: &str = "user";

/// Key prefix for cached memberships (`org_membership:<userId>:<orgId>`)
pub const MEMBERSHIP_KEY_PREFIX: &str = "org_membership";

/// Key prefix for cached permission snapshots (`rbac:<userId>:<orgId>`)
pub const PERMISSIONS_KEY_PREFIX: &str = "rbac";

/// Redis connection timeout in seconds
pub const REDIS_CONNECT_TIMEOUT_SECS: u64 = 5;

/// Redis response timeout in seconds
pub const REDIS_RESPONSE_TIMEOUT_SECS: u64 = 5;

/// Reconnection attempts made by the connection manager after a drop
pub const REDIS_RECONNECTION_RETRIES: usize = 3;

/// Exponential backoff base for reconnection
pub const REDIS_RETRY_EXPONENT_BASE: u64 = 2;

/// Upper bound on reconnection delay in milliseconds
pub const REDIS_MAX_RETRY_DELAY_MS: u64 = 2_000;

/// Attempts made when establishing the first connection
pub const REDIS_INITIAL_CONNECTION_RETRIES: u32 = 3;

/// Delay before the first reconnection attempt in milliseconds
pub const REDIS_INITIAL_RETRY_DELAY_MS: u64 = 250;

/// Keys scanned per SCAN iteration during pattern invalidation
pub const REDIS_SCAN_BATCH: usize = 100;
