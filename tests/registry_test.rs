// ABOUTME: Integration tests for tool registration and listing
// ABOUTME: Covers duplicate names, undeclarable actions, invalid schemas and tools/list order
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nixopus

mod common;

use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use common::{EchoTool, Harness, ScriptedRunner};
use nixopus_core::models::Action;
use nixopus_mcp_server::errors::{AppResult, ToolError};
use nixopus_mcp_server::mcp::RequestContext;
use nixopus_mcp_server::tools::registry::ToolRegistry;
use nixopus_mcp_server::tools::{ToolDescriptor, ToolHandler, ToolOutput};
use serde_json::{json, Value};

/// Handler whose descriptor is supplied by the test
struct Declared(ToolDescriptor);

#[async_trait]
impl ToolHandler for Declared {
    fn descriptor(&self) -> ToolDescriptor {
        self.0.clone()
    }

    async fn call(&self, _ctx: &RequestContext, _arguments: Value) -> AppResult<ToolOutput> {
        Ok(ToolOutput::default())
    }
}

#[tokio::test]
async fn test_duplicate_name_is_rejected() -> Result<()> {
    let h = Harness::new();
    let mut registry = ToolRegistry::new(h.services.clone());

    registry.register(Arc::new(EchoTool))?;
    let err = registry
        .register(Arc::new(EchoTool))
        .err()
        .ok_or_else(|| anyhow!("duplicate accepted"))?;
    assert!(matches!(err, ToolError::AlreadyRegistered { .. }));
    assert_eq!(registry.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_unknown_action_is_rejected() -> Result<()> {
    let h = Harness::new();
    let mut registry = ToolRegistry::new(h.services.clone());

    let err = registry
        .register(Arc::new(Declared(
            ToolDescriptor::new("restart_everything", "?", "deploy").with_action_name("obliterate"),
        )))
        .err()
        .ok_or_else(|| anyhow!("unknown action accepted"))?;
    assert!(matches!(err, ToolError::UnknownAction { ref action, .. } if action == "obliterate"));
    assert!(registry.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_invalid_input_schema_is_rejected() -> Result<()> {
    let h = Harness::new();
    let mut registry = ToolRegistry::new(h.services.clone());

    let err = registry
        .register(Arc::new(Declared(
            ToolDescriptor::new("broken", "?", "dashboard")
                .with_action(Action::Read)
                .with_input_schema(json!({"type": 12})),
        )))
        .err()
        .ok_or_else(|| anyhow!("invalid schema accepted"))?;
    assert!(matches!(err, ToolError::InvalidSchema { .. }));
    Ok(())
}

#[tokio::test]
async fn test_lookup_and_listing() -> Result<()> {
    let h = Harness::new();
    let registry = h.registry(Arc::new(ScriptedRunner::new("", 0)))?;

    let names: Vec<&str> = registry.list().iter().map(|d| d.name.as_str()).collect();
    assert_eq!(
        names,
        ["echo", "get_container_logs", "get_system_stats", "run_command"]
    );

    let run_command = registry.lookup("run_command")?;
    assert_eq!(run_command.action(), Action::Execute);
    assert_eq!(run_command.descriptor().required_resource, "ssh");

    let logs = registry.lookup("get_container_logs")?;
    assert_eq!(logs.action(), Action::Read);
    assert_eq!(logs.descriptor().required_resource, "container");

    assert!(matches!(
        registry.lookup("does_not_exist"),
        Err(ToolError::NotFound { .. })
    ));

    let schemas = serde_json::to_value(registry.schemas())?;
    assert_eq!(schemas[3]["name"], "run_command");
    assert_eq!(schemas[3]["inputSchema"]["required"], json!(["command"]));
    Ok(())
}
