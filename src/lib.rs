// ABOUTME: Library entry point of the Nixopus MCP tool server
// ABOUTME: Authenticated, authorized and audited tool execution over a stdio JSON-RPC transport
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nixopus

#![deny(unsafe_code)]

//! # Nixopus MCP Server
//!
//! Runs MCP tools with the identity, organization and permissions of the
//! calling user. Every call passes the same chain:
//!
//! ```text
//! stdio -> dispatch -> identity -> organization -> membership -> RBAC
//!       -> audit-open -> handler -> audit-close -> response
//! ```
//!
//! ## Architecture
//!
//! - **identity**: session credential to [`nixopus_core::models::Principal`]
//! - **authz**: membership and permission snapshots over a two-tier cache
//! - **audit**: batched, back-pressured audit log writer
//! - **middleware**: the chain composed around each handler at registration
//! - **mcp**: request context, dispatch loop and stdio transport
//! - **tools**: `get_system_stats`, `get_container_logs`, `run_command`
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use nixopus_mcp_server::config::ServerConfig;
//! use nixopus_mcp_server::errors::AppResult;
//!
//! fn main() -> AppResult<()> {
//!     let config = ServerConfig::from_env()?;
//!     println!("audit batch size: {}", config.audit.batch_size);
//!     Ok(())
//! }
//! ```

/// Asynchronous audit sink with redaction
pub mod audit;

/// Membership and permission cache
pub mod authz;

/// Two-tier cache with single-flight
pub mod cache;

/// Environment-driven configuration for the binaries
pub mod config;

/// Postgres-backed directories and audit writer
pub mod database;

/// Error types
pub mod errors;

/// Session verification and principal resolution
pub mod identity;

/// JSON-RPC 2.0 message types
pub mod jsonrpc;

/// Structured logging
pub mod logging;

/// MCP request context, dispatch and transport
pub mod mcp;

/// Middleware chain composed around tool handlers
pub mod middleware;

/// Tool handlers and the registry
pub mod tools;
