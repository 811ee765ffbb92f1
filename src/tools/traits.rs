// ABOUTME: ToolHandler trait, ToolDescriptor and ToolOutput for the tool registry
// ABOUTME: Handlers hold business logic only; auth, RBAC and audit are composed around them
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nixopus

//! # Tool Handler Trait
//!
//! A tool is a [`ToolHandler`] plus the [`ToolDescriptor`] it declares. The
//! handler receives a [`RequestContext`] whose principal is already verified
//! and whose organization membership and RBAC grant were already checked. It
//! must not repeat those checks.
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use nixopus_mcp_server::errors::AppResult;
//! use nixopus_mcp_server::mcp::context::RequestContext;
//! use nixopus_mcp_server::tools::{ToolDescriptor, ToolHandler, ToolOutput};
//! use nixopus_core::models::Action;
//! use serde_json::{json, Value};
//!
//! struct Echo;
//!
//! #[async_trait]
//! impl ToolHandler for Echo {
//!     fn descriptor(&self) -> ToolDescriptor {
//!         ToolDescriptor::new("echo", "Echo the arguments", "dashboard")
//!             .with_action(Action::Read)
//!             .with_input_schema(json!({"type": "object"}))
//!     }
//!
//!     async fn call(&self, _ctx: &RequestContext, arguments: Value) -> AppResult<ToolOutput> {
//!         Ok(ToolOutput::structured(arguments))
//!     }
//! }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::errors::AppResult;
use crate::mcp::context::RequestContext;
use crate::mcp::schema::{Content, ToolSchema};
use nixopus_core::models::Action;

/// Static declaration of a tool
#[derive(Debug, Clone)]
pub struct ToolDescriptor {
    /// Globally unique tool name
    pub name: String,
    /// Human-readable description for `tools/list`
    pub description: String,
    /// JSON Schema of the arguments
    pub input_schema: Value,
    /// JSON Schema of `structuredContent`
    pub output_schema: Option<Value>,
    /// RBAC resource checked before the handler runs
    pub required_resource: String,
    /// RBAC action name; parsed and rejected at registration when unknown
    pub required_action: String,
    /// Feature flag the organization must have enabled
    pub feature: Option<String>,
    /// Per-tool deadline overriding the dispatch default
    pub timeout: Option<Duration>,
}

impl ToolDescriptor {
    /// Descriptor with the default `execute` action and an open object schema
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        required_resource: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: json!({"type": "object"}),
            output_schema: None,
            required_resource: required_resource.into(),
            required_action: Action::default().as_str().to_owned(),
            feature: None,
            timeout: None,
        }
    }

    /// Set the required action
    #[must_use]
    pub fn with_action(mut self, action: Action) -> Self {
        action.as_str().clone_into(&mut self.required_action);
        self
    }

    /// Set the required action by name, validated at registration
    #[must_use]
    pub fn with_action_name(mut self, action: impl Into<String>) -> Self {
        self.required_action = action.into();
        self
    }

    /// Set the input schema
    #[must_use]
    pub fn with_input_schema(mut self, schema: Value) -> Self {
        self.input_schema = schema;
        self
    }

    /// Set the output schema
    #[must_use]
    pub fn with_output_schema(mut self, schema: Value) -> Self {
        self.output_schema = Some(schema);
        self
    }

    /// Require a feature flag
    #[must_use]
    pub fn with_feature(mut self, feature: impl Into<String>) -> Self {
        self.feature = Some(feature.into());
        self
    }

    /// Override the call deadline
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Listing entry for `tools/list`
    #[must_use]
    pub fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: self.input_schema.clone(),
            output_schema: self.output_schema.clone(),
        }
    }
}

/// What a handler returns on success
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    /// Content blocks for the client
    pub content: Vec<Content>,
    /// Machine-readable payload
    pub structured: Option<Value>,
    /// `new_values` of the audit record
    pub audit_values: Option<Value>,
    /// Extra audit metadata (redacted before storage)
    pub audit_metadata: Map<String, Value>,
    /// The payload is incomplete (e.g. truncated output)
    pub partial: bool,
}

impl ToolOutput {
    /// Output whose text block is the serialized payload
    #[must_use]
    pub fn structured(payload: Value) -> Self {
        let text = serde_json::to_string_pretty(&payload).unwrap_or_else(|_| payload.to_string());
        Self {
            content: vec![Content::text(text)],
            structured: Some(payload),
            ..Self::default()
        }
    }

    /// Record `new_values` in the audit record
    #[must_use]
    pub fn with_audit_values(mut self, values: Value) -> Self {
        self.audit_values = Some(values);
        self
    }

    /// Add an audit metadata entry
    #[must_use]
    pub fn annotate(mut self, key: &str, value: Value) -> Self {
        self.audit_metadata.insert(key.to_owned(), value);
        self
    }

    /// Mark the payload incomplete
    #[must_use]
    pub const fn partial(mut self, partial: bool) -> Self {
        self.partial = partial;
        self
    }
}

/// Leaf business logic of a tool
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Static declaration; read once at registration
    fn descriptor(&self) -> ToolDescriptor;

    /// Run the tool. `arguments` already passed the input schema.
    ///
    /// Implementations propagate `ctx.cancellation` into child processes and
    /// remote calls; the surrounding chain drops this future on cancel or deadline.
    async fn call(&self, ctx: &RequestContext, arguments: Value) -> AppResult<ToolOutput>;
}
