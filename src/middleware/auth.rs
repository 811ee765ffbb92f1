// ABOUTME: Identity stage of the tool middleware chain
// ABOUTME: Resolves `_meta.auth_token` to a principal and logs failures without the credential
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nixopus

use tracing::debug;

use crate::errors::{AppResult, ErrorKind};
use crate::identity::PrincipalResolver;
use crate::logging::AppLogger;
use crate::mcp::context::CallEnvelope;
use nixopus_core::models::Principal;

/// Resolve the caller of `envelope`.
///
/// # Errors
///
/// Returns an `UNAUTHENTICATED` error for a missing, expired, invalid or revoked
/// credential, or `INTERNAL`/`DEADLINE` when the session store or user table fail
pub async fn authenticate(
    resolver: &dyn PrincipalResolver,
    envelope: &CallEnvelope,
) -> AppResult<Principal> {
    let credential = envelope.auth_token();
    match resolver.resolve(credential).await {
        Ok(principal) => {
            debug!(user_id = %principal.user_id, "Caller authenticated");
            Ok(principal)
        }
        Err(e) => {
            if e.kind() == ErrorKind::Unauthenticated {
                let details = &e.context.details;
                AppLogger::log_auth_failure(
                    details
                        .get("auth_kind")
                        .and_then(serde_json::Value::as_str)
                        .unwrap_or("unknown"),
                    credential.is_some(),
                    details
                        .get("reason")
                        .and_then(serde_json::Value::as_str)
                        .unwrap_or_default(),
                );
            }
            Err(e)
        }
    }
}
