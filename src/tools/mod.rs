// ABOUTME: Tool handlers, the tool registry and the built-in tool set
// ABOUTME: get_system_stats, get_container_logs and run_command with injectable backends
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nixopus

//! # Tools
//!
//! Handlers implement [`ToolHandler`]; the [`registry::ToolRegistry`] wraps
//! each one in the middleware chain. The built-in tools reach the host through
//! traits so tests can substitute scripted backends.

/// `run_command` and command runners
pub mod command;
/// `get_container_logs` and container runtimes
pub mod containers;
/// Child process helpers
pub mod process;
/// Registry of composed tools
pub mod registry;
/// `get_system_stats` and stats sources
pub mod system_stats;
/// Handler trait, descriptor and output
pub mod traits;

pub use traits::{ToolDescriptor, ToolHandler, ToolOutput};

use std::sync::Arc;

use tracing::info;

use crate::config::ServerConfig;
use crate::errors::ToolError;
use command::{CommandRunner, LocalShellRunner, OpenSshRunner, RunCommandTool};
use containers::{ContainerLogsTool, ContainerRuntime, DockerCli};
use registry::ToolRegistry;
use system_stats::{ProcStatsSource, SystemStatsSource, SystemStatsTool};

/// Host access used by the built-in tools
#[derive(Clone)]
pub struct BuiltinBackends {
    /// Source of `get_system_stats`
    pub stats: Arc<dyn SystemStatsSource>,
    /// Runtime of `get_container_logs`
    pub containers: Arc<dyn ContainerRuntime>,
    /// Runner of `run_command`
    pub commands: Arc<dyn CommandRunner>,
}

impl BuiltinBackends {
    /// Production backends: `/proc`, the docker CLI, and SSH when a target is configured
    #[must_use]
    pub fn from_config(config: &ServerConfig) -> Self {
        let commands: Arc<dyn CommandRunner> = match &config.ssh {
            Some(target) => Arc::new(OpenSshRunner::new(target.clone())),
            None => Arc::new(LocalShellRunner::default()),
        };
        info!(target = %commands.target(), "Command runner configured");
        Self {
            stats: Arc::new(ProcStatsSource::default()),
            containers: Arc::new(DockerCli::new(config.docker_binary.clone())),
            commands,
        }
    }
}

/// Register `get_system_stats`, `get_container_logs` and `run_command`
///
/// # Errors
///
/// Propagates registration failures, which are fatal at startup
pub fn register_builtin_tools(
    registry: &mut ToolRegistry,
    backends: BuiltinBackends,
) -> Result<(), ToolError> {
    registry.register(Arc::new(SystemStatsTool::new(backends.stats)))?;
    registry.register(Arc::new(ContainerLogsTool::new(backends.containers)))?;
    registry.register(Arc::new(RunCommandTool::new(backends.commands)))?;
    Ok(())
}
