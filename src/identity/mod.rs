// ABOUTME: Identity resolver mapping an opaque bearer credential to a verified Principal
// ABOUTME: The session store is authoritative; user records come through the principal cache
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nixopus

//! # Identity Resolution
//!
//! The resolver never parses the credential. It asks the session store who the
//! credential belongs to, loads the user record by email through the two-tier
//! cache, and only then cross-checks the record's id against the session
//! subject. A mismatch means the cache or the user table disagrees with the
//! session store; the cached record is dropped and the call is rejected.

/// `SuperTokens` core session store
pub mod supertokens;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cache::redis::RedisCache;
use crate::cache::{CacheKey, CacheProvider, TieredCache};
use crate::database::UserDirectory;
use crate::errors::{AppError, AppResult};
use nixopus_core::constants::limits::{BACKEND_CALL_TIMEOUT_SECS, SESSION_VERIFY_TIMEOUT_SECS};
use nixopus_core::errors::AuthError;
use nixopus_core::models::Principal;

/// What the session store knows about a valid credential
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    /// Session subject (user id as issued by the session store)
    pub subject: String,
    /// Login email of the subject
    pub email: String,
}

/// External session store
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Verify a bearer credential
    ///
    /// # Errors
    ///
    /// Returns an `AuthError`-derived error when the credential is rejected, or an
    /// external service error when the store cannot be reached
    async fn verify(&self, credential: &str) -> AppResult<SessionInfo>;
}

/// Resolves credentials to principals; the seam the middleware chain depends on
#[async_trait]
pub trait PrincipalResolver: Send + Sync {
    /// Resolve a credential to a verified principal
    ///
    /// # Errors
    ///
    /// Returns an `UNAUTHENTICATED` error for missing or rejected credentials and
    /// an `INTERNAL` error when a backend fails
    async fn resolve(&self, credential: Option<&str>) -> AppResult<Principal>;
}

/// Production identity resolver
pub struct IdentityResolver<R = RedisCache> {
    sessions: Arc<dyn SessionStore>,
    users: Arc<dyn UserDirectory>,
    cache: TieredCache<R>,
    verify_timeout: Duration,
    backend_timeout: Duration,
}

impl<R: CacheProvider> IdentityResolver<R> {
    /// Create a resolver over the given session store, user table and cache
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        users: Arc<dyn UserDirectory>,
        cache: TieredCache<R>,
    ) -> Self {
        Self {
            sessions,
            users,
            cache,
            verify_timeout: Duration::from_secs(SESSION_VERIFY_TIMEOUT_SECS),
            backend_timeout: Duration::from_secs(BACKEND_CALL_TIMEOUT_SECS),
        }
    }

    /// Override the session verification and user lookup timeouts
    #[must_use]
    pub fn with_timeouts(mut self, verify_timeout: Duration, backend_timeout: Duration) -> Self {
        self.verify_timeout = verify_timeout;
        self.backend_timeout = backend_timeout;
        self
    }

    /// Drop the cached principal for `email`; called after user updates
    pub async fn invalidate_principal(&self, email: &str) {
        self.cache.invalidate(&CacheKey::principal(email)).await;
    }

    async fn verify_session(&self, credential: &str) -> AppResult<SessionInfo> {
        tokio::time::timeout(self.verify_timeout, self.sessions.verify(credential))
            .await
            .map_err(|_| AppError::deadline("session verification timed out"))?
    }

    async fn load_principal(&self, email: &str) -> AppResult<Principal> {
        let key = CacheKey::principal(email);
        if let Some(principal) = self.cache.get::<Principal>(&key).await {
            return Ok(principal);
        }

        let found = tokio::time::timeout(self.backend_timeout, self.users.find_by_email(email))
            .await
            .map_err(|_| AppError::deadline("user lookup timed out"))??;

        let principal =
            found.ok_or_else(|| AppError::from(AuthError::invalid("no user for session email")))?;
        self.cache.put(&key, &principal).await;
        debug!(user_id = %principal.user_id, "Principal loaded from user table");
        Ok(principal)
    }
}

#[async_trait]
impl<R: CacheProvider + 'static> PrincipalResolver for IdentityResolver<R> {
    async fn resolve(&self, credential: Option<&str>) -> AppResult<Principal> {
        let credential = credential
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| AppError::from(AuthError::missing()))?;

        let session = self.verify_session(credential).await?;
        let principal = self.load_principal(&session.email).await?;

        let subject_matches = Uuid::parse_str(&session.subject)
            .is_ok_and(|subject| subject == principal.user_id);
        if principal.user_id.is_nil() || !subject_matches {
            warn!(
                user_id = %principal.user_id,
                "User record disagrees with session subject, dropping cached principal"
            );
            self.invalidate_principal(&session.email).await;
            return Err(AuthError::invalid("user record does not match session subject").into());
        }

        Ok(principal)
    }
}
