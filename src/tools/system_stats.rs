// ABOUTME: get_system_stats tool reporting load, memory, uptime, CPU count and root disk usage
// ABOUTME: SystemStatsSource trait with a /proc plus df implementation
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nixopus

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::process::run_captured;
use super::traits::{ToolDescriptor, ToolHandler, ToolOutput};
use crate::errors::{AppError, AppResult};
use crate::mcp::context::RequestContext;
use nixopus_core::constants::protocol::TOOL_GET_SYSTEM_STATS;
use nixopus_core::models::Action;

/// 1, 5 and 15 minute load averages
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoadAverage {
    /// Last minute
    pub one: f64,
    /// Last five minutes
    pub five: f64,
    /// Last fifteen minutes
    pub fifteen: f64,
}

/// Memory usage in bytes
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStats {
    /// Installed memory
    pub total_bytes: u64,
    /// Memory available to new processes
    pub available_bytes: u64,
    /// `total - available`
    pub used_bytes: u64,
    /// Used share in percent
    pub used_percent: f64,
}

/// Filesystem usage in bytes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiskStats {
    /// Mount point
    pub mount: String,
    /// Size of the filesystem
    pub total_bytes: u64,
    /// Used space
    pub used_bytes: u64,
    /// Free space for unprivileged users
    pub available_bytes: u64,
    /// Used share in percent
    pub used_percent: f64,
}

/// Snapshot returned by `get_system_stats`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStats {
    /// Host name
    pub hostname: String,
    /// Seconds since boot
    pub uptime_secs: f64,
    /// Online CPUs
    pub cpu_count: usize,
    /// Load averages
    pub load_average: LoadAverage,
    /// Memory usage
    pub memory: MemoryStats,
    /// Root filesystem usage; absent when `df` is unavailable
    pub disk: Option<DiskStats>,
}

/// Collects a [`SystemStats`] snapshot
#[async_trait]
pub trait SystemStatsSource: Send + Sync {
    /// Take a snapshot
    async fn collect(&self, cancellation: &CancellationToken) -> AppResult<SystemStats>;
}

/// Reads `/proc` and runs `df`
pub struct ProcStatsSource {
    proc_root: PathBuf,
    df_binary: String,
    mount: String,
}

impl Default for ProcStatsSource {
    fn default() -> Self {
        Self {
            proc_root: PathBuf::from("/proc"),
            df_binary: "df".to_owned(),
            mount: "/".to_owned(),
        }
    }
}

impl ProcStatsSource {
    /// Source reading a different proc tree
    #[must_use]
    pub fn with_proc_root(mut self, proc_root: impl Into<PathBuf>) -> Self {
        self.proc_root = proc_root.into();
        self
    }

    async fn read(&self, relative: &str) -> AppResult<String> {
        let path = self.proc_root.join(relative);
        tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| AppError::internal(format!("failed to read {}: {e}", path.display())))
    }

    async fn disk(&self, cancellation: &CancellationToken) -> Option<DiskStats> {
        let mut command = Command::new(&self.df_binary);
        command.args(["-P", "-B1", &self.mount]);
        match run_captured(command, "df", cancellation, 64 * 1024).await {
            Ok(output) if output.success() => parse_df(&output.stdout),
            Ok(output) => {
                warn!(stderr = %output.stderr.trim(), "df failed");
                None
            }
            Err(e) => {
                warn!(error = %e, "df unavailable");
                None
            }
        }
    }
}

#[async_trait]
impl SystemStatsSource for ProcStatsSource {
    async fn collect(&self, cancellation: &CancellationToken) -> AppResult<SystemStats> {
        let load_average = parse_loadavg(&self.read("loadavg").await?)?;
        let memory = parse_meminfo(&self.read("meminfo").await?)?;
        let uptime_secs = parse_uptime(&self.read("uptime").await?)?;
        let cpu_count = match self.read("cpuinfo").await {
            Ok(cpuinfo) => count_processors(&cpuinfo),
            Err(_) => 0,
        };
        let cpu_count = if cpu_count == 0 {
            std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
        } else {
            cpu_count
        };
        let hostname = self
            .read("sys/kernel/hostname")
            .await
            .map(|h| h.trim().to_owned())
            .unwrap_or_default();

        Ok(SystemStats {
            hostname,
            uptime_secs,
            cpu_count,
            load_average,
            memory,
            disk: self.disk(cancellation).await,
        })
    }
}

fn malformed(file: &str) -> AppError {
    AppError::internal(format!("unexpected format of /proc/{file}"))
}

/// Parse `/proc/loadavg`
///
/// # Errors
///
/// `INTERNAL` when the first three fields are not numbers
pub fn parse_loadavg(text: &str) -> AppResult<LoadAverage> {
    let mut fields = text.split_whitespace().map(str::parse::<f64>);
    let mut next = || {
        fields
            .next()
            .and_then(Result::ok)
            .ok_or_else(|| malformed("loadavg"))
    };
    Ok(LoadAverage {
        one: next()?,
        five: next()?,
        fifteen: next()?,
    })
}

/// Parse `/proc/meminfo`
///
/// # Errors
///
/// `INTERNAL` when `MemTotal` is missing
pub fn parse_meminfo(text: &str) -> AppResult<MemoryStats> {
    let field = |name: &str| -> Option<u64> {
        text.lines()
            .find_map(|line| line.strip_prefix(name)?.strip_prefix(':'))
            .and_then(|rest| rest.split_whitespace().next())
            .and_then(|kb| kb.parse::<u64>().ok())
            .map(|kb| kb * 1024)
    };
    let total_bytes = field("MemTotal").ok_or_else(|| malformed("meminfo"))?;
    let available_bytes = field("MemAvailable")
        .or_else(|| field("MemFree"))
        .unwrap_or(0)
        .min(total_bytes);
    let used_bytes = total_bytes - available_bytes;
    Ok(MemoryStats {
        total_bytes,
        available_bytes,
        used_bytes,
        used_percent: percent(used_bytes, total_bytes),
    })
}

/// Parse `/proc/uptime`
///
/// # Errors
///
/// `INTERNAL` when the first field is not a number
pub fn parse_uptime(text: &str) -> AppResult<f64> {
    text.split_whitespace()
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| malformed("uptime"))
}

fn count_processors(cpuinfo: &str) -> usize {
    cpuinfo
        .lines()
        .filter(|line| line.split(':').next().is_some_and(|key| key.trim() == "processor"))
        .count()
}

/// Parse `df -P -B1` output
#[must_use]
pub fn parse_df(text: &str) -> Option<DiskStats> {
    let fields: Vec<&str> = text.lines().nth(1)?.split_whitespace().collect();
    if fields.len() < 6 {
        return None;
    }
    let total_bytes: u64 = fields[1].parse().ok()?;
    let used_bytes: u64 = fields[2].parse().ok()?;
    let available_bytes: u64 = fields[3].parse().ok()?;
    Some(DiskStats {
        mount: fields[5..].join(" "),
        total_bytes,
        used_bytes,
        available_bytes,
        used_percent: percent(used_bytes, used_bytes + available_bytes),
    })
}

fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    ((part as f64 / whole as f64) * 10_000.0).round() / 100.0
}

/// `get_system_stats` handler
pub struct SystemStatsTool {
    source: Arc<dyn SystemStatsSource>,
}

impl SystemStatsTool {
    /// Tool over `source`
    #[must_use]
    pub fn new(source: Arc<dyn SystemStatsSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl ToolHandler for SystemStatsTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(
            TOOL_GET_SYSTEM_STATS,
            "Report load average, memory, uptime, CPU count and root disk usage of the server",
            "dashboard",
        )
        .with_action(Action::Read)
        .with_input_schema(json!({
            "type": "object",
            "properties": {
                "organization_id": {"type": "string"}
            }
        }))
        .with_output_schema(json!({
            "type": "object",
            "required": ["hostname", "uptimeSecs", "cpuCount", "loadAverage", "memory"]
        }))
    }

    async fn call(&self, ctx: &RequestContext, _arguments: Value) -> AppResult<ToolOutput> {
        let stats = self.source.collect(&ctx.cancellation).await?;
        Ok(ToolOutput::structured(serde_json::to_value(&stats)?))
    }
}
