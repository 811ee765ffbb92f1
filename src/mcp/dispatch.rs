// ABOUTME: Tool dispatch loop turning tools/call parameters into CallToolResults
// ABOUTME: Allocates request ids, bounds concurrency and deadlines, maps errors into the envelope
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nixopus

//! # Tool Dispatch
//!
//! [`ToolDispatcher::dispatch`] never fails: every outcome becomes a
//! [`CallToolResult`]. Errors become `isError = true` with a single text block
//! holding `{kind, message, requestId}`; the raw error of an `INTERNAL` failure
//! is logged at `ERROR` under the same request id and never sent to the client.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::errors::{AppError, AppResult, ErrorEnvelope, ErrorKind};
use crate::logging::AppLogger;
use crate::mcp::context::{CallEnvelope, CallScope};
use crate::mcp::schema::{CallToolParams, CallToolResult};
use crate::tools::registry::ToolRegistry;
use nixopus_core::constants::limits::{
    DEFAULT_MAX_CONCURRENT_CALLS, DEFAULT_TOOL_TIMEOUT_SECS, SHUTDOWN_GRACE_SECS,
};

/// Dispatch limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Deadline of a call whose tool declares none
    pub default_timeout: Duration,
    /// Calls running at once; further calls wait for a permit
    pub max_concurrent_calls: usize,
    /// How long shutdown waits for in-flight calls
    pub shutdown_grace: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(DEFAULT_TOOL_TIMEOUT_SECS),
            max_concurrent_calls: DEFAULT_MAX_CONCURRENT_CALLS,
            shutdown_grace: Duration::from_secs(SHUTDOWN_GRACE_SECS),
        }
    }
}

/// Runs tool calls against the registry
pub struct ToolDispatcher {
    registry: Arc<ToolRegistry>,
    config: DispatchConfig,
    permits: Arc<Semaphore>,
    in_flight: DashMap<Uuid, Instant>,
    shutdown: CancellationToken,
    internal_errors: AtomicU64,
}

/// Removes a request id from the in-flight set
struct InFlight<'a> {
    set: &'a DashMap<Uuid, Instant>,
    request_id: Uuid,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.set.remove(&self.request_id);
    }
}

impl ToolDispatcher {
    /// Dispatcher over a finished registry
    #[must_use]
    pub fn new(registry: Arc<ToolRegistry>, config: DispatchConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_calls.max(1)));
        Self {
            registry,
            config,
            permits,
            in_flight: DashMap::new(),
            shutdown: CancellationToken::new(),
            internal_errors: AtomicU64::new(0),
        }
    }

    /// The registry calls are dispatched to
    #[must_use]
    pub const fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Dispatch limits
    #[must_use]
    pub const fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// New cancellation token for one call; fires on its own or on shutdown
    #[must_use]
    pub fn call_token(&self) -> CancellationToken {
        self.shutdown.child_token()
    }

    /// Cancel every running and future call
    pub fn begin_shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Calls currently running
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Calls that ended in an `INTERNAL` error since startup
    #[must_use]
    pub fn internal_errors(&self) -> u64 {
        self.internal_errors.load(Ordering::Relaxed)
    }

    /// Run one `tools/call`
    pub async fn dispatch(
        &self,
        params: CallToolParams,
        cancellation: CancellationToken,
    ) -> CallToolResult {
        let started = Instant::now();
        let request_id = self.allocate_request_id();
        let _in_flight = InFlight {
            set: &self.in_flight,
            request_id,
        };
        let tool_name = params.name.clone();

        let outcome = self.run(request_id, params, cancellation).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(result) => {
                AppLogger::log_mcp_tool_call(&tool_name, "success", duration_ms);
                result
            }
            Err(e) => {
                self.report_failure(&tool_name, request_id, &e, duration_ms);
                CallToolResult::failure(&ErrorEnvelope::from_error(&e, request_id))
            }
        }
    }

    async fn run(
        &self,
        request_id: Uuid,
        params: CallToolParams,
        cancellation: CancellationToken,
    ) -> AppResult<CallToolResult> {
        let envelope = CallEnvelope::from_params(params)?;
        let tool = self.registry.lookup(&envelope.tool_name)?;

        let timeout = tool
            .descriptor()
            .timeout
            .unwrap_or(self.config.default_timeout);
        let scope = CallScope::new(request_id, &envelope, timeout, cancellation);

        let _permit = tokio::select! {
            biased;
            () = scope.cancellation.cancelled() => {
                return Err(AppError::cancelled("call cancelled while queued"));
            }
            () = tokio::time::sleep_until(scope.deadline) => {
                return Err(AppError::deadline("no execution slot before the deadline"));
            }
            permit = Arc::clone(&self.permits).acquire_owned() => {
                permit.map_err(|_| AppError::cancelled("server is shutting down"))?
            }
        };

        let output = tool.call(&scope, envelope).await?;
        Ok(CallToolResult::success(output.content, output.structured))
    }

    /// Fresh v4 id that no running call holds
    fn allocate_request_id(&self) -> Uuid {
        loop {
            let candidate = Uuid::new_v4();
            if let dashmap::mapref::entry::Entry::Vacant(slot) = self.in_flight.entry(candidate) {
                slot.insert(Instant::now());
                return candidate;
            }
        }
    }

    fn report_failure(&self, tool_name: &str, request_id: Uuid, e: &AppError, duration_ms: u64) {
        let kind = e.kind();
        AppLogger::log_mcp_tool_call(tool_name, kind.as_str(), duration_ms);
        match kind {
            ErrorKind::Internal => {
                self.internal_errors.fetch_add(1, Ordering::Relaxed);
                error!(
                    request_id = %request_id,
                    tool_name = %tool_name,
                    code = ?e.code,
                    error = %e,
                    source = ?e.source,
                    "Tool call failed with internal error"
                );
            }
            ErrorKind::Deadline | ErrorKind::Cancelled => {
                warn!(request_id = %request_id, tool_name = %tool_name, error = %e, "Tool call did not complete");
            }
            _ => {
                info!(request_id = %request_id, tool_name = %tool_name, kind = kind.as_str(), "Tool call rejected");
            }
        }
    }
}
