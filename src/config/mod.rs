// ABOUTME: Configuration module for environment-driven server settings
// ABOUTME: Only binaries read the environment; components receive typed config structs
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nixopus

//! Configuration loading.
//!
//! Everything under this module is binary-facing: `ServerConfig::from_env` is
//! called once in `main`, and the resulting typed sections are injected into the
//! cache, identity, audit and dispatch layers.

/// Redis connection settings and cache configuration loading
pub mod cache;
/// Top-level server configuration
pub mod server;

pub use cache::RedisConnectionConfig;
pub use server::ServerConfig;

use std::env;
use std::str::FromStr;

/// Parse an environment variable, falling back to `default` when unset or malformed
pub(crate) fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Read an optional, non-empty environment variable
pub(crate) fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}
