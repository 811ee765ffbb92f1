// ABOUTME: Organization resolution and tenancy guards of the tool middleware chain
// ABOUTME: Picks the target organization, then checks membership and feature flags
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nixopus

//! Organization Resolution
//!
//! The target organization comes from, in order:
//! 1. `arguments.organization_id`
//! 2. `_meta.organization_id`
//! 3. the principal's primary organization
//!
//! Membership is always verified afterwards; a hint never grants access.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use super::Guard;
use crate::authz::AccessControl;
use crate::database::FeatureFlagStore;
use crate::errors::{AppError, AppResult, ErrorCode};
use crate::mcp::context::{CallEnvelope, RequestContext};
use nixopus_core::models::Principal;

/// Pick the organization a call acts in.
///
/// # Errors
///
/// `INVALID_FORMAT` when a supplied id is not a UUID, `NOT_MEMBER` when no
/// organization was supplied and the principal has no primary organization
pub fn resolve_organization(envelope: &CallEnvelope, principal: &Principal) -> AppResult<Uuid> {
    let hint = envelope
        .argument_organization()
        .filter(|v| !v.is_null())
        .or_else(|| envelope.meta_organization().filter(|v| !v.is_null()));

    match hint {
        Some(value) => parse_organization(value),
        None => principal.primary_org_id.ok_or_else(|| {
            AppError::new(
                ErrorCode::NotMember,
                "no organization_id supplied and the user has no organization",
            )
        }),
    }
}

fn parse_organization(value: &Value) -> AppResult<Uuid> {
    let raw = value
        .as_str()
        .ok_or_else(|| AppError::invalid_format("organization_id must be a UUID string"))?;
    let id = Uuid::parse_str(raw.trim()).map_err(|_| {
        AppError::invalid_format(format!("organization_id '{raw}' is not a valid UUID"))
    })?;
    if id.is_nil() {
        return Err(AppError::invalid_format("organization_id must not be nil"));
    }
    Ok(id)
}

/// Caller must belong to the target organization
pub struct MembershipGuard {
    access: Arc<dyn AccessControl>,
}

impl MembershipGuard {
    /// Guard backed by `access`
    #[must_use]
    pub fn new(access: Arc<dyn AccessControl>) -> Self {
        Self { access }
    }
}

#[async_trait]
impl Guard for MembershipGuard {
    fn name(&self) -> &'static str {
        "membership"
    }

    async fn check(&self, ctx: &RequestContext) -> AppResult<()> {
        if self
            .access
            .is_member(ctx.principal.user_id, ctx.organization_id)
            .await?
        {
            Ok(())
        } else {
            Err(AppError::not_member(ctx.organization_id))
        }
    }
}

/// Organization must have a feature enabled.
///
/// A missing flag row counts as enabled, and so does a flag store failure.
pub struct FeatureGuard {
    flags: Arc<dyn FeatureFlagStore>,
    feature: String,
}

impl FeatureGuard {
    /// Guard on `feature`
    pub fn new(flags: Arc<dyn FeatureFlagStore>, feature: impl Into<String>) -> Self {
        Self {
            flags,
            feature: feature.into(),
        }
    }
}

#[async_trait]
impl Guard for FeatureGuard {
    fn name(&self) -> &'static str {
        "feature"
    }

    async fn check(&self, ctx: &RequestContext) -> AppResult<()> {
        match self.flags.is_enabled(ctx.organization_id, &self.feature).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(AppError::feature_disabled(&self.feature)),
            Err(e) => {
                warn!(
                    feature = %self.feature,
                    org_id = %ctx.organization_id,
                    error = %e,
                    "Feature flag lookup failed, treating as enabled"
                );
                Ok(())
            }
        }
    }
}
