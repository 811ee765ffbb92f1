// ABOUTME: Persistence seams for users, memberships, permissions, feature flags and audit rows
// ABOUTME: Traits are consumed by the identity, authorization and audit layers; Postgres implements them
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nixopus

//! Persistent store access.
//!
//! The tool server reads users, memberships, role permissions and feature
//! flags that the API server owns, and appends to `audit_logs`. Each concern
//! is a separate trait so tests can substitute in-memory fakes.

/// `PostgreSQL` implementation of the store traits
pub mod postgres;

pub use postgres::PostgresStore;

use async_trait::async_trait;
use uuid::Uuid;

use crate::errors::AppResult;
use nixopus_core::models::{AuditRecord, Membership, PermissionSet, Principal};

/// Read access to the user table
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Find a user by login email (case-insensitive)
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails
    async fn find_by_email(&self, email: &str) -> AppResult<Option<Principal>>;
}

/// Read access to organization memberships and role grants
#[async_trait]
pub trait AccessDirectory: Send + Sync {
    /// Active membership of a user in an organization
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails
    async fn membership(
        &self,
        user_id: Uuid,
        organization_id: Uuid,
    ) -> AppResult<Option<Membership>>;

    /// Permissions granted to a user in an organization through their role
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails
    async fn permissions(&self, user_id: Uuid, organization_id: Uuid) -> AppResult<PermissionSet>;
}

/// Append-only sink for audit rows
#[async_trait]
pub trait AuditWriter: Send + Sync {
    /// Insert a batch of records in one statement
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails; no record of the batch is written
    async fn write_batch(&self, records: &[AuditRecord]) -> AppResult<()>;
}

/// Per-organization feature flags
#[async_trait]
pub trait FeatureFlagStore: Send + Sync {
    /// Whether `feature` is enabled for the organization. A missing row means enabled.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails
    async fn is_enabled(&self, organization_id: Uuid, feature: &str) -> AppResult<bool>;
}
