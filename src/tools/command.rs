// ABOUTME: run_command tool executing a shell command locally or on the organization's SSH target
// ABOUTME: CommandRunner trait with a local shell runner and an OpenSSH runner
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nixopus

//! # `run_command`
//!
//! Requires `execute` on `ssh`. A non-zero exit status is not a tool failure:
//! the result carries `exitCode` and the audit record stores `exit_code`.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::process::{run_captured, ProcessOutput};
use super::traits::{ToolDescriptor, ToolHandler, ToolOutput};
use crate::errors::{AppError, AppResult};
use crate::mcp::context::RequestContext;
use nixopus_core::constants::limits::MAX_OUTPUT_BYTES;
use nixopus_core::constants::protocol::TOOL_RUN_COMMAND;
use nixopus_core::models::Action;

/// Remote host commands are executed on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshTarget {
    /// Hostname or address
    pub host: String,
    /// Login user
    pub user: String,
    /// SSH port
    pub port: u16,
    /// Private key file passed to `ssh -i`
    pub private_key_path: PathBuf,
}

/// Executes a shell command line
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Where commands run, for logs and audit metadata
    fn target(&self) -> String;

    /// Run `command` until it exits or `cancellation` fires
    async fn run(&self, command: &str, cancellation: &CancellationToken) -> AppResult<ProcessOutput>;
}

/// Runs commands with `/bin/sh -c` on the server host
pub struct LocalShellRunner {
    shell: PathBuf,
    max_output_bytes: usize,
}

impl Default for LocalShellRunner {
    fn default() -> Self {
        Self {
            shell: PathBuf::from("/bin/sh"),
            max_output_bytes: MAX_OUTPUT_BYTES,
        }
    }
}

impl LocalShellRunner {
    /// Runner with a custom output cap
    #[must_use]
    pub fn with_max_output(mut self, max_output_bytes: usize) -> Self {
        self.max_output_bytes = max_output_bytes;
        self
    }
}

#[async_trait]
impl CommandRunner for LocalShellRunner {
    fn target(&self) -> String {
        "local".to_owned()
    }

    async fn run(&self, command: &str, cancellation: &CancellationToken) -> AppResult<ProcessOutput> {
        let mut child = Command::new(&self.shell);
        child.arg("-c").arg(command);
        run_captured(child, "sh", cancellation, self.max_output_bytes).await
    }
}

/// Runs commands through the `ssh` client with key authentication
pub struct OpenSshRunner {
    target: SshTarget,
    ssh_binary: String,
    max_output_bytes: usize,
}

impl OpenSshRunner {
    /// Runner for `target`
    #[must_use]
    pub fn new(target: SshTarget) -> Self {
        Self {
            target,
            ssh_binary: "ssh".to_owned(),
            max_output_bytes: MAX_OUTPUT_BYTES,
        }
    }

    /// Arguments passed to `ssh` for `command`
    #[must_use]
    pub fn ssh_args(&self, command: &str) -> Vec<String> {
        vec![
            "-i".to_owned(),
            self.target.private_key_path.display().to_string(),
            "-p".to_owned(),
            self.target.port.to_string(),
            "-o".to_owned(),
            "BatchMode=yes".to_owned(),
            "-o".to_owned(),
            "StrictHostKeyChecking=accept-new".to_owned(),
            "-o".to_owned(),
            "ConnectTimeout=10".to_owned(),
            format!("{}@{}", self.target.user, self.target.host),
            "--".to_owned(),
            command.to_owned(),
        ]
    }
}

#[async_trait]
impl CommandRunner for OpenSshRunner {
    fn target(&self) -> String {
        format!("{}@{}:{}", self.target.user, self.target.host, self.target.port)
    }

    async fn run(&self, command: &str, cancellation: &CancellationToken) -> AppResult<ProcessOutput> {
        let mut child = Command::new(&self.ssh_binary);
        child.args(self.ssh_args(command));
        let output = run_captured(child, "ssh", cancellation, self.max_output_bytes).await?;
        // 255 is ssh's own failure status (connection, auth), not the remote command's
        if output.exit_code == Some(255) && output.stdout.is_empty() {
            return Err(AppError::external_service(
                "ssh",
                output.stderr.lines().next().unwrap_or("connection failed").to_owned(),
            ));
        }
        Ok(output)
    }
}

/// `run_command` handler
pub struct RunCommandTool {
    runner: Arc<dyn CommandRunner>,
}

impl RunCommandTool {
    /// Tool over `runner`
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl ToolHandler for RunCommandTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(
            TOOL_RUN_COMMAND,
            "Run a shell command on the organization's server and return its output and exit code",
            "ssh",
        )
        .with_action(Action::Execute)
        .with_input_schema(json!({
            "type": "object",
            "properties": {
                "command": {"type": "string", "minLength": 1, "description": "Shell command line"},
                "organization_id": {"type": "string", "description": "Target organization (UUID)"}
            },
            "required": ["command"]
        }))
        .with_output_schema(json!({
            "type": "object",
            "properties": {
                "stdout": {"type": "string"},
                "stderr": {"type": "string"},
                "exitCode": {"type": ["integer", "null"]},
                "truncated": {"type": "boolean"}
            },
            "required": ["stdout", "stderr", "exitCode", "truncated"]
        }))
    }

    async fn call(&self, ctx: &RequestContext, arguments: Value) -> AppResult<ToolOutput> {
        let command = arguments
            .get("command")
            .and_then(Value::as_str)
            .ok_or_else(|| AppError::missing_field("command"))?;

        let target = self.runner.target();
        info!(request_id = %ctx.request_id, target = %target, "Running command");
        let output = self.runner.run(command, &ctx.cancellation).await?;

        let payload = json!({
            "stdout": output.stdout,
            "stderr": output.stderr,
            "exitCode": output.exit_code,
            "truncated": output.truncated,
        });
        Ok(ToolOutput::structured(payload)
            .with_audit_values(json!({ "exit_code": output.exit_code }))
            .annotate("exit_code", json!(output.exit_code))
            .annotate("target", json!(target))
            .partial(output.truncated))
    }
}
