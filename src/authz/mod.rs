// ABOUTME: Membership and permission lookups layered over the two-tier cache with single-flight
// ABOUTME: Invalidation bumps a per-user generation so in-flight fetches cannot repopulate stale data
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nixopus

//! # Membership & Permission Cache
//!
//! Answers "is U a member of O" and "what may U do in O" for the middleware
//! chain. Misses on the same key coalesce into one backend read. Cache-layer
//! failures degrade to backend reads; backend failures fail the call
//! (authorization is fail-closed).

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::cache::redis::RedisCache;
use crate::cache::{CacheKey, CacheProvider, SingleFlight, TieredCache};
use crate::database::AccessDirectory;
use crate::errors::{AppError, AppResult};
use nixopus_core::constants::limits::BACKEND_CALL_TIMEOUT_SECS;
use nixopus_core::models::PermissionSet;

/// Tenancy and RBAC queries used by the middleware chain
#[async_trait]
pub trait AccessControl: Send + Sync {
    /// Whether the user belongs to the organization
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store fails or times out
    async fn is_member(&self, user_id: Uuid, organization_id: Uuid) -> AppResult<bool>;

    /// The user's permission snapshot within the organization
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store fails or times out
    async fn permissions_of(&self, user_id: Uuid, organization_id: Uuid)
        -> AppResult<PermissionSet>;

    /// Forget everything cached about a user (role or user change)
    async fn invalidate_user(&self, user_id: Uuid);

    /// Forget what is cached about a user in one organization (membership change)
    async fn invalidate_membership(&self, user_id: Uuid, organization_id: Uuid);
}

/// Cached access control over an [`AccessDirectory`]
pub struct AccessCache<R = RedisCache> {
    directory: Arc<dyn AccessDirectory>,
    cache: TieredCache<R>,
    membership_flights: SingleFlight<bool>,
    permission_flights: SingleFlight<PermissionSet>,
    generations: DashMap<Uuid, u64>,
    backend_timeout: Duration,
}

impl<R: CacheProvider> AccessCache<R> {
    /// Create a cache over `directory`
    pub fn new(directory: Arc<dyn AccessDirectory>, cache: TieredCache<R>) -> Self {
        Self {
            directory,
            cache,
            membership_flights: SingleFlight::new(),
            permission_flights: SingleFlight::new(),
            generations: DashMap::new(),
            backend_timeout: Duration::from_secs(BACKEND_CALL_TIMEOUT_SECS),
        }
    }

    /// Override the per-call backend timeout
    #[must_use]
    pub fn with_backend_timeout(mut self, backend_timeout: Duration) -> Self {
        self.backend_timeout = backend_timeout;
        self
    }

    fn generation(&self, user_id: Uuid) -> u64 {
        self.generations.get(&user_id).map_or(0, |g| *g)
    }

    fn bump_generation(&self, user_id: Uuid) {
        *self.generations.entry(user_id).or_insert(0) += 1;
    }

    /// Cache-aside read of `key`, coalescing concurrent misses into one `fetch`.
    ///
    /// The fetched value is written back only if no invalidation for the user
    /// happened while the fetch was running.
    async fn cached<V, F, Fut>(
        &self,
        flights: &SingleFlight<V>,
        key: CacheKey,
        user_id: Uuid,
        fetch: F,
    ) -> AppResult<V>
    where
        V: Clone + Send + Sync + Serialize + for<'de> Deserialize<'de>,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = AppResult<V>> + Send,
    {
        if let Some(value) = self.cache.get::<V>(&key).await {
            return Ok(value);
        }

        let generation = self.generation(user_id);
        let rendered = key.to_string();
        let flight_key = rendered.clone();
        flights
            .run(&flight_key, move || async move {
                // A flight that settled just before ours may have filled the cache
                if let Some(value) = self.cache.get::<V>(&key).await {
                    return Ok(value);
                }

                let value = tokio::time::timeout(self.backend_timeout, fetch())
                    .await
                    .map_err(|_| AppError::deadline(format!("backend read for {rendered} timed out")))??;

                if self.generation(user_id) == generation {
                    self.cache.put(&key, &value).await;
                } else {
                    debug!(cache_key = %rendered, "Skipping cache fill after concurrent invalidation");
                }
                Ok(value)
            })
            .await
    }
}

#[async_trait]
impl<R: CacheProvider + 'static> AccessControl for AccessCache<R> {
    async fn is_member(&self, user_id: Uuid, organization_id: Uuid) -> AppResult<bool> {
        let directory = Arc::clone(&self.directory);
        self.cached(
            &self.membership_flights,
            CacheKey::membership(user_id, organization_id),
            user_id,
            move || async move {
                Ok(directory
                    .membership(user_id, organization_id)
                    .await?
                    .is_some())
            },
        )
        .await
    }

    async fn permissions_of(
        &self,
        user_id: Uuid,
        organization_id: Uuid,
    ) -> AppResult<PermissionSet> {
        let directory = Arc::clone(&self.directory);
        self.cached(
            &self.permission_flights,
            CacheKey::permissions(user_id, organization_id),
            user_id,
            move || async move { directory.permissions(user_id, organization_id).await },
        )
        .await
    }

    async fn invalidate_user(&self, user_id: Uuid) {
        self.bump_generation(user_id);
        let needle = user_id.to_string();
        self.membership_flights
            .forget_matching(|key| key.contains(&needle));
        self.permission_flights
            .forget_matching(|key| key.contains(&needle));
        for pattern in CacheKey::user_patterns(user_id) {
            self.cache.invalidate_pattern(&pattern).await;
        }
    }

    async fn invalidate_membership(&self, user_id: Uuid, organization_id: Uuid) {
        self.bump_generation(user_id);
        let membership = CacheKey::membership(user_id, organization_id);
        let permissions = CacheKey::permissions(user_id, organization_id);
        self.membership_flights.forget(&membership.to_string());
        self.permission_flights.forget(&permissions.to_string());
        self.cache.invalidate(&membership).await;
        self.cache.invalidate(&permissions).await;
    }
}
