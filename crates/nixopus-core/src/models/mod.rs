// ABOUTME: Core data models shared by the identity, authorization and audit layers
// ABOUTME: Principals, RBAC actions and permission snapshots, audit records
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nixopus

/// Authenticated identity and organization membership
pub mod principal;
/// RBAC actions, action sets and per-organization permission snapshots
pub mod permission;
/// Append-only audit records
pub mod audit;

pub use audit::{AuditAction, AuditRecord, AuditStatus};
pub use permission::{Action, ActionSet, PermissionSet};
pub use principal::{Membership, Principal};
