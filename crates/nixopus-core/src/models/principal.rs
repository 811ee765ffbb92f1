// ABOUTME: Principal and membership models resolved per tool call
// ABOUTME: Principals are cached by email; memberships are cached per (user, organization)
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nixopus

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An authenticated user as seen by the tool server.
///
/// Materialized for every call and never persisted by the server; the cached
/// JSON form under `user:<email>` uses the same camelCase field names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    /// User id (matches the session subject)
    pub user_id: Uuid,
    /// Login email
    pub email: String,
    /// Display name
    pub display_name: String,
    /// Organization used when a call names none
    pub primary_org_id: Option<Uuid>,
}

/// A user's membership in one organization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    /// Member user id
    pub user_id: Uuid,
    /// Organization id
    pub organization_id: Uuid,
    /// Role assigned within the organization
    pub role_id: Uuid,
    /// When the user joined
    pub joined_at: DateTime<Utc>,
}
