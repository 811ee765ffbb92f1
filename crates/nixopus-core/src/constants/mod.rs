// ABOUTME: Constants module with domain-separated organization
// ABOUTME: Pure data constants for caching, auditing, dispatch limits and tool names
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nixopus

//! Constants module
//!
//! Constants are grouped into logical domains rather than being in a single large file.

/// Cache TTLs, key prefixes and Redis tuning
pub mod cache;
/// Audit queue sizing and flush cadence
pub mod audit;
/// Dispatch deadlines, concurrency and timeouts
pub mod limits;
/// MCP protocol identifiers and built-in tool names
pub mod protocol;
