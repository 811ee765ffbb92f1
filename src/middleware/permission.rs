// ABOUTME: RBAC stage of the tool middleware chain
// ABOUTME: Checks the declared (resource, action) against the caller's permission snapshot
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nixopus

use std::sync::Arc;

use async_trait::async_trait;

use super::Guard;
use crate::authz::AccessControl;
use crate::errors::{AppError, AppResult};
use crate::logging::AppLogger;
use crate::mcp::context::RequestContext;

/// Role must grant the tool's action on its resource. Fails closed.
pub struct PermissionGuard {
    access: Arc<dyn AccessControl>,
}

impl PermissionGuard {
    /// Guard backed by `access`
    #[must_use]
    pub fn new(access: Arc<dyn AccessControl>) -> Self {
        Self { access }
    }
}

#[async_trait]
impl Guard for PermissionGuard {
    fn name(&self) -> &'static str {
        "rbac"
    }

    async fn check(&self, ctx: &RequestContext) -> AppResult<()> {
        let permissions = self
            .access
            .permissions_of(ctx.principal.user_id, ctx.organization_id)
            .await?;

        if permissions.allows(&ctx.required_resource, ctx.required_action) {
            return Ok(());
        }

        AppLogger::log_access_denied(
            &ctx.principal.user_id.to_string(),
            &ctx.organization_id.to_string(),
            &ctx.required_resource,
            ctx.required_action.as_str(),
        );
        Err(AppError::permission_denied(
            &ctx.required_resource,
            ctx.required_action,
        ))
    }
}
