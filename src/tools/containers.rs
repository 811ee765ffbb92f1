// ABOUTME: get_container_logs tool reading the tail of a container's log through a container runtime
// ABOUTME: ContainerRuntime trait with a docker CLI implementation; truncated output is a partial result
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nixopus

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use super::process::{run_captured, ProcessOutput};
use super::traits::{ToolDescriptor, ToolHandler, ToolOutput};
use crate::errors::{AppError, AppResult};
use crate::mcp::context::RequestContext;
use nixopus_core::constants::limits::{DEFAULT_LOG_TAIL_LINES, MAX_LOG_TAIL_LINES, MAX_OUTPUT_BYTES};
use nixopus_core::constants::protocol::TOOL_GET_CONTAINER_LOGS;
use nixopus_core::models::Action;

/// Which log lines to fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogQuery {
    /// Container name or id
    pub container: String,
    /// Number of lines from the end
    pub tail: u32,
    /// Only lines after this timestamp or relative duration (`10m`)
    pub since: Option<String>,
    /// Prefix lines with timestamps
    pub timestamps: bool,
}

impl LogQuery {
    /// Build a query from validated tool arguments
    ///
    /// # Errors
    ///
    /// `INVALID_INPUT` for a container reference that is not a plain name or id
    pub fn from_arguments(arguments: &Value) -> AppResult<Self> {
        let container = arguments
            .get("container_id")
            .and_then(Value::as_str)
            .map(str::trim)
            .ok_or_else(|| AppError::missing_field("container_id"))?;
        if !container_ref_pattern().is_some_and(|re| re.is_match(container)) {
            return Err(AppError::invalid_input(format!(
                "'{container}' is not a valid container name or id"
            )));
        }

        let tail = arguments
            .get("tail")
            .and_then(Value::as_u64)
            .map_or(DEFAULT_LOG_TAIL_LINES, |n| {
                n.clamp(1, u64::from(MAX_LOG_TAIL_LINES)) as u32
            });

        Ok(Self {
            container: container.to_owned(),
            tail,
            since: arguments
                .get("since")
                .and_then(Value::as_str)
                .map(str::to_owned),
            timestamps: arguments
                .get("timestamps")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        })
    }
}

fn container_ref_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.-]{0,127}$").ok())
        .as_ref()
}

/// Reads container logs
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Fetch logs matching `query`
    async fn logs(&self, query: &LogQuery, cancellation: &CancellationToken) -> AppResult<ProcessOutput>;
}

/// `docker logs` through the docker CLI
pub struct DockerCli {
    binary: String,
    max_output_bytes: usize,
}

impl DockerCli {
    /// Runtime invoking `binary`
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            max_output_bytes: MAX_OUTPUT_BYTES,
        }
    }

    /// Arguments passed to the docker CLI for `query`
    #[must_use]
    pub fn logs_args(query: &LogQuery) -> Vec<String> {
        let mut args = vec![
            "logs".to_owned(),
            "--tail".to_owned(),
            query.tail.to_string(),
        ];
        if let Some(since) = &query.since {
            args.push("--since".to_owned());
            args.push(since.clone());
        }
        if query.timestamps {
            args.push("--timestamps".to_owned());
        }
        args.push("--".to_owned());
        args.push(query.container.clone());
        args
    }
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn logs(&self, query: &LogQuery, cancellation: &CancellationToken) -> AppResult<ProcessOutput> {
        let mut command = Command::new(&self.binary);
        command.args(Self::logs_args(query));
        let output = run_captured(command, "docker", cancellation, self.max_output_bytes).await?;

        if output.success() {
            return Ok(output);
        }
        let reason = output.stderr.lines().next().unwrap_or("docker logs failed");
        if reason.contains("No such container") {
            Err(AppError::invalid_input(format!(
                "container '{}' not found",
                query.container
            )))
        } else {
            Err(AppError::external_service("docker", reason.to_owned()))
        }
    }
}

/// `get_container_logs` handler
pub struct ContainerLogsTool {
    runtime: Arc<dyn ContainerRuntime>,
}

impl ContainerLogsTool {
    /// Tool over `runtime`
    #[must_use]
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self { runtime }
    }
}

#[async_trait]
impl ToolHandler for ContainerLogsTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(
            TOOL_GET_CONTAINER_LOGS,
            "Fetch the most recent log lines of a container",
            "container",
        )
        .with_action(Action::Read)
        .with_input_schema(json!({
            "type": "object",
            "properties": {
                "container_id": {"type": "string", "minLength": 1},
                "tail": {"type": "integer", "minimum": 1, "maximum": MAX_LOG_TAIL_LINES},
                "since": {"type": "string"},
                "timestamps": {"type": "boolean"},
                "organization_id": {"type": "string"}
            },
            "required": ["container_id"]
        }))
        .with_output_schema(json!({
            "type": "object",
            "properties": {
                "containerId": {"type": "string"},
                "stdout": {"type": "string"},
                "stderr": {"type": "string"},
                "lineCount": {"type": "integer"},
                "truncated": {"type": "boolean"}
            },
            "required": ["containerId", "stdout", "stderr", "truncated"]
        }))
    }

    async fn call(&self, ctx: &RequestContext, arguments: Value) -> AppResult<ToolOutput> {
        let query = LogQuery::from_arguments(&arguments)?;
        let output = self.runtime.logs(&query, &ctx.cancellation).await?;
        let line_count = output.stdout.lines().count() + output.stderr.lines().count();

        Ok(ToolOutput::structured(json!({
            "containerId": query.container,
            "stdout": output.stdout,
            "stderr": output.stderr,
            "lineCount": line_count,
            "truncated": output.truncated,
        }))
        .annotate("container_id", json!(query.container))
        .annotate("tail", json!(query.tail))
        .partial(output.truncated))
    }
}
