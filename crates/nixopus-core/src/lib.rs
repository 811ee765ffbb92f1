// ABOUTME: Core types and constants for the Nixopus MCP tool server
// ABOUTME: Foundation crate with error taxonomy, access-control models, audit records and constants
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nixopus

#![deny(unsafe_code)]

//! # Nixopus Core
//!
//! Foundation crate providing shared types and constants for the Nixopus MCP
//! tool server. This crate is designed to change infrequently, enabling
//! incremental compilation benefits in the workspace.
//!
//! ## Modules
//!
//! - **errors**: `AppError`, `ErrorCode`, the client-visible `ErrorKind` taxonomy and the error envelope
//! - **models**: principals, RBAC actions and permission sets, audit records
//! - **constants**: cache TTLs and key prefixes, audit queue tuning, dispatch limits

/// Unified error handling with stable client-visible error kinds
pub mod errors;

/// Application constants organized by domain
pub mod constants;

/// Core data models (Principal, Action, `PermissionSet`, `AuditRecord`)
pub mod models;
