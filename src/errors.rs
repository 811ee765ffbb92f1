// ABOUTME: Error types of the server crate, re-exported from the core crate
// ABOUTME: AppError/ErrorCode internally, ErrorKind and ErrorEnvelope at the MCP boundary
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nixopus

//! # Unified Error Handling
//!
//! See [`nixopus_core::errors`]. Server-side conversions for driver errors live
//! next to the code that produces them.

pub use nixopus_core::errors::{
    AppError, AppResult, AuthError, AuthErrorKind, ErrorCode, ErrorContext, ErrorEnvelope,
    ErrorKind, ToolError,
};
