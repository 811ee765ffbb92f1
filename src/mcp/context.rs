// ABOUTME: Per-call envelopes threaded from the dispatch loop through the middleware chain
// ABOUTME: CallEnvelope carries the raw call, CallScope the lifecycle, RequestContext the verified identity
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nixopus

//! # Request Context
//!
//! A tool call moves through three shapes:
//!
//! - [`CallEnvelope`]: the parsed `tools/call` parameters (name, arguments, `_meta`)
//! - [`CallScope`]: request id, deadline and cancellation, created by the dispatch
//!   loop before anything is known about the caller
//! - [`RequestContext`]: the scope plus a verified principal and a resolved
//!   organization. Handlers only ever receive this one.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Span;
use uuid::Uuid;

use crate::errors::{AppError, AppResult};
use crate::mcp::schema::CallToolParams;
use nixopus_core::constants::protocol::{
    META_AUTH_TOKEN, META_CLIENT_ADDRESS, META_ORGANIZATION_ID, META_USER_AGENT,
};
use nixopus_core::models::{Action, Principal};

/// Parsed `tools/call` parameters
#[derive(Debug, Clone)]
pub struct CallEnvelope {
    /// Requested tool
    pub tool_name: String,
    /// Arguments object (`{}` when absent)
    pub arguments: Value,
    /// Call metadata
    pub meta: Map<String, Value>,
}

impl CallEnvelope {
    /// Validate the structural shape of a call.
    ///
    /// # Errors
    ///
    /// Returns `INVALID_INPUT` when the tool name is empty or `arguments` is
    /// present but not a JSON object
    pub fn from_params(params: CallToolParams) -> AppResult<Self> {
        if params.name.trim().is_empty() {
            return Err(AppError::missing_field("name"));
        }
        let arguments = match params.arguments {
            None | Some(Value::Null) => Value::Object(Map::new()),
            Some(Value::Object(map)) => Value::Object(map),
            Some(other) => {
                return Err(AppError::invalid_input(format!(
                    "arguments must be an object, got {}",
                    json_type_name(&other)
                )))
            }
        };
        Ok(Self {
            tool_name: params.name,
            arguments,
            meta: params.meta.unwrap_or_default(),
        })
    }

    /// Bearer credential from `_meta.auth_token`
    #[must_use]
    pub fn auth_token(&self) -> Option<&str> {
        self.meta_str(META_AUTH_TOKEN)
    }

    /// Organization hint from `_meta.organization_id`
    #[must_use]
    pub fn meta_organization(&self) -> Option<&Value> {
        self.meta.get(META_ORGANIZATION_ID)
    }

    /// Organization from `arguments.organization_id`
    #[must_use]
    pub fn argument_organization(&self) -> Option<&Value> {
        self.arguments.get(META_ORGANIZATION_ID)
    }

    /// Caller address forwarded by the client bridge
    #[must_use]
    pub fn client_address(&self) -> Option<&str> {
        self.meta_str(META_CLIENT_ADDRESS)
    }

    /// Caller user agent forwarded by the client bridge
    #[must_use]
    pub fn user_agent(&self) -> Option<&str> {
        self.meta_str(META_USER_AGENT)
    }

    fn meta_str(&self, key: &str) -> Option<&str> {
        self.meta
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

const fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Lifecycle of one call before the caller is known
#[derive(Debug, Clone)]
pub struct CallScope {
    /// Unique invocation id
    pub request_id: Uuid,
    /// Requested tool
    pub tool_name: String,
    /// Absolute deadline
    pub deadline: Instant,
    /// Fires on client disconnect, explicit cancel or shutdown
    pub cancellation: CancellationToken,
    /// Wall-clock start
    pub started_at: DateTime<Utc>,
    /// Caller address from metadata
    pub client_address: Option<String>,
    /// Caller user agent from metadata
    pub user_agent: Option<String>,
    /// `tool_call` span
    pub span: Span,
}

impl CallScope {
    /// Start a scope for `envelope` with the given timeout
    #[must_use]
    pub fn new(
        request_id: Uuid,
        envelope: &CallEnvelope,
        timeout: Duration,
        cancellation: CancellationToken,
    ) -> Self {
        let span = tracing::info_span!(
            "tool_call",
            request_id = %request_id,
            tool_name = %envelope.tool_name,
            user_id = tracing::field::Empty,
            org_id = tracing::field::Empty,
        );
        Self {
            request_id,
            tool_name: envelope.tool_name.clone(),
            deadline: Instant::now() + timeout,
            cancellation,
            started_at: Utc::now(),
            client_address: envelope.client_address().map(str::to_owned),
            user_agent: envelope.user_agent().map(str::to_owned),
            span,
        }
    }

    /// Time left before the deadline
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}

/// Immutable per-call envelope handed to tool handlers
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Unique invocation id
    pub request_id: Uuid,
    /// Verified caller
    pub principal: Principal,
    /// Organization the call acts in; membership was checked
    pub organization_id: Uuid,
    /// Tool name
    pub tool_name: String,
    /// RBAC resource the tool declared
    pub required_resource: String,
    /// RBAC action the tool declared
    pub required_action: Action,
    /// Absolute deadline
    pub deadline: Instant,
    /// Cancellation signal to propagate into downstream calls
    pub cancellation: CancellationToken,
    /// Wall-clock start
    pub started_at: DateTime<Utc>,
    /// Caller address
    pub client_address: Option<String>,
    /// Caller user agent
    pub user_agent: Option<String>,
    /// `tool_call` span
    pub span: Span,
}

impl RequestContext {
    /// Bind a scope to a verified principal and organization
    #[must_use]
    pub fn new(
        scope: &CallScope,
        principal: Principal,
        organization_id: Uuid,
        required_resource: &str,
        required_action: Action,
    ) -> Self {
        scope
            .span
            .record("user_id", tracing::field::display(principal.user_id));
        scope
            .span
            .record("org_id", tracing::field::display(organization_id));
        Self {
            request_id: scope.request_id,
            principal,
            organization_id,
            tool_name: scope.tool_name.clone(),
            required_resource: required_resource.to_owned(),
            required_action,
            deadline: scope.deadline,
            cancellation: scope.cancellation.clone(),
            started_at: scope.started_at,
            client_address: scope.client_address.clone(),
            user_agent: scope.user_agent.clone(),
            span: scope.span.clone(),
        }
    }

    /// Time left before the deadline
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Whether the call was cancelled
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}
