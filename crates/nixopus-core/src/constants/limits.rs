// ABOUTME: Dispatch limits for tool deadlines, concurrency and downstream call timeouts
// ABOUTME: Defaults for the stdio dispatch loop and the cache/database access path
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nixopus

/// Default per-tool-call deadline in seconds
pub const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 30;

/// Global bound on concurrently executing tool calls
pub const DEFAULT_MAX_CONCURRENT_CALLS: usize = 128;

/// Timeout for an individual cache or database call in seconds
pub const BACKEND_CALL_TIMEOUT_SECS: u64 = 5;

/// Timeout for session verification calls in seconds
pub const SESSION_VERIFY_TIMEOUT_SECS: u64 = 5;

/// Grace period for in-flight calls to finish after shutdown is signalled
pub const SHUTDOWN_GRACE_SECS: u64 = 5;

/// Maximum bytes of command or log output returned to the client
pub const MAX_OUTPUT_BYTES: usize = 256 * 1024;

/// Default number of log lines returned by `get_container_logs`
pub const DEFAULT_LOG_TAIL_LINES: u32 = 200;

/// Upper bound on requested log lines
pub const MAX_LOG_TAIL_LINES: u32 = 5_000;
