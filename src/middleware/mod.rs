// ABOUTME: Middleware chain composed around every tool handler at registration time
// ABOUTME: identity -> organization -> membership -> feature -> RBAC -> audit-open -> handler -> audit-close
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nixopus

//! # Tool Middleware Chain
//!
//! [`ComposedTool::compose`] runs once per tool when the registry is built and
//! yields a single callable. Per call, [`ComposedTool::call`]:
//!
//! 1. resolves the caller from `_meta.auth_token` (no audit row on failure)
//! 2. resolves the target organization
//! 3. runs the guards (membership, optional feature flag, RBAC)
//! 4. opens the audit record
//! 5. validates the arguments and runs the handler under the call's deadline
//!    and cancellation signal
//! 6. closes the audit record with the outcome
//!
//! Failures in steps 2 and 3 write a single rejection record instead, as does
//! a cancellation or deadline that interrupts step 4.

/// Identity stage
pub mod auth;
/// RBAC guard
pub mod permission;
/// Organization resolution, membership and feature guards
pub mod tenant;

pub use permission::PermissionGuard;
pub use tenant::{resolve_organization, FeatureGuard, MembershipGuard};

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use jsonschema::{Draft, Validator};
use serde_json::Value;
use tracing::{debug, Instrument};

use crate::audit::AuditOrigin;
use crate::errors::{AppError, AppResult, ErrorKind, ToolError};
use crate::mcp::context::{CallEnvelope, CallScope, RequestContext};
use crate::mcp::resources::Services;
use crate::tools::{ToolDescriptor, ToolHandler, ToolOutput};
use nixopus_core::models::{Action, AuditAction, AuditStatus, Principal};

/// A check that runs after the organization is known and before the handler
#[async_trait]
pub trait Guard: Send + Sync {
    /// Stage name for logs
    fn name(&self) -> &'static str;

    /// Pass or fail the call
    async fn check(&self, ctx: &RequestContext) -> AppResult<()>;
}

/// A handler wrapped in the full middleware chain
pub struct ComposedTool {
    descriptor: ToolDescriptor,
    action: Action,
    validator: Validator,
    guards: Vec<Arc<dyn Guard>>,
    handler: Arc<dyn ToolHandler>,
    services: Services,
}

impl ComposedTool {
    /// Wrap `handler` in the middleware chain.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::UnknownAction`] when the declared action is not
    /// grantable, and [`ToolError::InvalidSchema`] when a schema does not compile
    pub fn compose(handler: Arc<dyn ToolHandler>, services: Services) -> Result<Self, ToolError> {
        let descriptor = handler.descriptor();
        let action: Action = descriptor
            .required_action
            .parse()
            .map_err(|_| ToolError::unknown_action(&descriptor.name, &descriptor.required_action))?;

        let validator = compile_schema(&descriptor.input_schema)
            .map_err(|details| ToolError::invalid_schema(&descriptor.name, details))?;
        if let Some(output_schema) = &descriptor.output_schema {
            compile_schema(output_schema)
                .map_err(|details| ToolError::invalid_schema(&descriptor.name, details))?;
        }

        let mut guards: Vec<Arc<dyn Guard>> =
            vec![Arc::new(MembershipGuard::new(Arc::clone(&services.access)))];
        if let Some(feature) = &descriptor.feature {
            guards.push(Arc::new(FeatureGuard::new(
                Arc::clone(&services.features),
                feature.clone(),
            )));
        }
        guards.push(Arc::new(PermissionGuard::new(Arc::clone(&services.access))));

        Ok(Self {
            descriptor,
            action,
            validator,
            guards,
            handler,
            services,
        })
    }

    /// Declaration of the wrapped tool
    #[must_use]
    pub const fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    /// Required action, parsed at composition
    #[must_use]
    pub const fn action(&self) -> Action {
        self.action
    }

    /// Run one call through the chain.
    ///
    /// # Errors
    ///
    /// Any stage failure, already mapped to a client-visible kind
    pub async fn call(&self, scope: &CallScope, envelope: CallEnvelope) -> AppResult<ToolOutput> {
        let span = scope.span.clone();
        self.run_chain(scope, envelope).instrument(span).await
    }

    async fn run_chain(&self, scope: &CallScope, envelope: CallEnvelope) -> AppResult<ToolOutput> {
        let principal = bounded(
            scope,
            auth::authenticate(self.services.identity.as_ref(), &envelope),
        )
        .await?;

        let organization_id = match resolve_organization(&envelope, &principal) {
            Ok(id) => id,
            Err(e) => {
                let origin = self.unresolved_origin(scope, &principal);
                self.reject(&origin, &e, &envelope.arguments).await;
                return Err(e);
            }
        };

        let ctx = RequestContext::new(
            scope,
            principal,
            organization_id,
            &self.descriptor.required_resource,
            self.action,
        );

        for guard in &self.guards {
            if let Err(e) = bounded(scope, guard.check(&ctx)).await {
                debug!(guard = guard.name(), error = %e, "Guard rejected call");
                self.reject(&AuditOrigin::from(&ctx), &e, &envelope.arguments)
                    .await;
                return Err(e);
            }
        }

        let opened = bounded(
            scope,
            self.services.audit.open(
                &ctx,
                AuditAction::for_tool(self.action),
                &self.descriptor.required_resource,
                None,
                None,
            ),
        )
        .await;
        let mut audit = match opened {
            Ok(handle) => handle,
            Err(e) => {
                // Interrupted while waiting for queue space; the call still leaves a row
                if matches!(e.kind(), ErrorKind::Cancelled | ErrorKind::Deadline) {
                    self.reject(&AuditOrigin::from(&ctx), &e, &envelope.arguments)
                        .await;
                }
                return Err(e);
            }
        };
        audit.annotate("arguments", &envelope.arguments);

        if let Err(e) = self.validate(&envelope.arguments) {
            audit.close(AuditStatus::Error, None, Some(&e));
            return Err(e);
        }

        let result = bounded(scope, self.handler.call(&ctx, envelope.arguments)).await;
        match result {
            Ok(output) => {
                for (key, value) in &output.audit_metadata {
                    audit.annotate(key, value);
                }
                let status = if output.partial {
                    AuditStatus::Partial
                } else {
                    AuditStatus::Success
                };
                audit.close(status, output.audit_values.clone(), None);
                Ok(output)
            }
            Err(e) => {
                audit.close(failure_status(&e), None, Some(&e));
                Err(e)
            }
        }
    }

    /// Messages name the failing location and rule, never the submitted value
    fn validate(&self, arguments: &Value) -> AppResult<()> {
        let errors: Vec<String> = self
            .validator
            .iter_errors(arguments)
            .map(|err| {
                let location = err.instance_path().as_str();
                let location = if location.is_empty() { "/" } else { location };
                format!("{location}: {}", err.masked_with("the value"))
            })
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(AppError::invalid_input(format!(
                "invalid arguments for '{}': {}",
                self.descriptor.name,
                errors.join("; ")
            )))
        }
    }

    fn unresolved_origin(&self, scope: &CallScope, principal: &Principal) -> AuditOrigin {
        AuditOrigin {
            request_id: scope.request_id,
            user_id: principal.user_id,
            organization_id: None,
            tool_name: scope.tool_name.clone(),
            mutation: self.action.is_mutation(),
            ip_address: scope.client_address.clone(),
            user_agent: scope.user_agent.clone(),
            started_at: scope.started_at,
        }
    }

    async fn reject(&self, origin: &AuditOrigin, error: &AppError, arguments: &Value) {
        self.services
            .audit
            .record_rejection(
                origin,
                AuditAction::for_tool(self.action),
                &self.descriptor.required_resource,
                failure_status(error),
                error,
                Some(arguments),
            )
            .await;
    }
}

/// Audit status of a failed call
fn failure_status(error: &AppError) -> AuditStatus {
    match error.kind() {
        ErrorKind::Forbidden => AuditStatus::Denied,
        ErrorKind::Cancelled => AuditStatus::Cancelled,
        _ => AuditStatus::Error,
    }
}

/// Race `stage` against the call's cancellation and deadline
async fn bounded<T, F>(scope: &CallScope, stage: F) -> AppResult<T>
where
    F: Future<Output = AppResult<T>>,
{
    tokio::select! {
        biased;
        () = scope.cancellation.cancelled() => Err(AppError::cancelled("call cancelled")),
        () = tokio::time::sleep_until(scope.deadline) => Err(AppError::deadline(format!(
            "'{}' did not complete before its deadline",
            scope.tool_name
        ))),
        result = stage => result,
    }
}

fn compile_schema(schema: &Value) -> Result<Validator, String> {
    jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(schema)
        .map_err(|e| e.to_string())
}
