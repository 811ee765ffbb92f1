// ABOUTME: Central registry of composed MCP tools, built once at startup
// ABOUTME: Registration wraps each handler in the middleware chain and rejects duplicate names
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nixopus

//! # Tool Registry
//!
//! Maps tool names to [`ComposedTool`]s. The registry is mutable only while the
//! server starts; afterwards it is shared behind an `Arc` and only read.
//!
//! ```rust,no_run
//! # use std::sync::Arc;
//! # use nixopus_mcp_server::mcp::resources::Services;
//! # use nixopus_mcp_server::tools::{register_builtin_tools, registry::ToolRegistry, BuiltinBackends};
//! # fn demo(services: Services, backends: BuiltinBackends) -> Result<(), nixopus_mcp_server::errors::ToolError> {
//! let mut registry = ToolRegistry::new(services);
//! register_builtin_tools(&mut registry, backends)?;
//! assert!(registry.lookup("get_system_stats").is_ok());
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::errors::ToolError;
use crate::mcp::resources::Services;
use crate::mcp::schema::ToolSchema;
use crate::middleware::ComposedTool;

use super::traits::{ToolDescriptor, ToolHandler};

/// Registry of composed tools
pub struct ToolRegistry {
    tools: HashMap<String, Arc<ComposedTool>>,
    services: Services,
}

impl ToolRegistry {
    /// Empty registry whose tools will share `services`
    #[must_use]
    pub fn new(services: Services) -> Self {
        Self {
            tools: HashMap::new(),
            services,
        }
    }

    /// Compose and register a handler.
    ///
    /// # Errors
    ///
    /// [`ToolError::AlreadyRegistered`] for a duplicate name,
    /// [`ToolError::UnknownAction`] or [`ToolError::InvalidSchema`] for a bad descriptor.
    /// All of them are fatal at startup.
    pub fn register(&mut self, handler: Arc<dyn ToolHandler>) -> Result<(), ToolError> {
        let composed = ComposedTool::compose(handler, self.services.clone())?;
        let name = composed.descriptor().name.clone();

        if self.tools.contains_key(&name) {
            return Err(ToolError::already_registered(name));
        }

        debug!(
            tool = %name,
            resource = %composed.descriptor().required_resource,
            action = %composed.action(),
            "Registered tool"
        );
        self.tools.insert(name, Arc::new(composed));
        Ok(())
    }

    /// Find a tool by name.
    ///
    /// # Errors
    ///
    /// [`ToolError::NotFound`] when no tool has that name
    pub fn lookup(&self, name: &str) -> Result<Arc<ComposedTool>, ToolError> {
        self.tools
            .get(name)
            .cloned()
            .ok_or_else(|| ToolError::not_found(name))
    }

    /// Descriptors of every tool, sorted by name
    #[must_use]
    pub fn list(&self) -> Vec<&ToolDescriptor> {
        let mut descriptors: Vec<&ToolDescriptor> =
            self.tools.values().map(|tool| tool.descriptor()).collect();
        descriptors.sort_by(|a, b| a.name.cmp(&b.name));
        descriptors
    }

    /// `tools/list` entries, sorted by name
    #[must_use]
    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.list().into_iter().map(ToolDescriptor::schema).collect()
    }

    /// Number of registered tools
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether no tool is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Log the final tool set
    pub fn log_summary(&self) {
        let names: Vec<&str> = self.list().iter().map(|d| d.name.as_str()).collect();
        info!(count = names.len(), tools = ?names, "Tool registry ready");
    }
}
