// ABOUTME: MCP protocol identifiers, metadata keys and built-in tool names
// ABOUTME: Single place for wire-level strings shared by transport, dispatch and tools
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nixopus

/// MCP protocol revision advertised during `initialize`
pub const MCP_PROTOCOL_VERSION: &str = "2025-06-18";

/// Server name advertised during `initialize`
pub const SERVER_NAME: &str = "nixopus-mcp-server";

/// Call metadata key carrying the bearer credential
pub const META_AUTH_TOKEN: &str = "auth_token";

/// Call metadata / argument key carrying the target organization
pub const META_ORGANIZATION_ID: &str = "organization_id";

/// Call metadata key carrying the caller's network address
pub const META_CLIENT_ADDRESS: &str = "client_address";

/// Call metadata key carrying the caller's user agent
pub const META_USER_AGENT: &str = "user_agent";

/// Tool name: host statistics
pub const TOOL_GET_SYSTEM_STATS: &str = "get_system_stats";

/// Tool name: container log retrieval
pub const TOOL_GET_CONTAINER_LOGS: &str = "get_container_logs";

/// Tool name: remote command execution
pub const TOOL_RUN_COMMAND: &str = "run_command";
