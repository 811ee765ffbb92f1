// ABOUTME: Audit record model for the append-only audit_logs table
// ABOUTME: One record per tool invocation, keyed by its request id
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nixopus

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::permission::Action;

/// Action column of an audit record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditAction {
    /// Resource created
    Create,
    /// Resource read
    Read,
    /// Resource updated
    Update,
    /// Resource deleted
    Delete,
    /// Tool access (reads and executions through the tool server)
    Access,
}

impl AuditAction {
    /// Column value
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Read => "read",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Access => "access",
        }
    }

    /// Audit action recorded for a tool requiring `action`
    #[must_use]
    pub const fn for_tool(action: Action) -> Self {
        match action {
            Action::Read | Action::Execute => Self::Access,
            Action::Create => Self::Create,
            Action::Update => Self::Update,
            Action::Delete => Self::Delete,
        }
    }
}

/// Outcome stored in the record's metadata under `status`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditStatus {
    /// Handler completed
    Success,
    /// Handler completed with an incomplete payload
    Partial,
    /// Rejected by membership, feature or RBAC checks
    Denied,
    /// Failed validation, deadline or handler error
    Error,
    /// Cancelled before completion
    Cancelled,
}

impl AuditStatus {
    /// Metadata value
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Partial => "partial",
            Self::Denied => "denied",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        }
    }
}

/// One row of `audit_logs`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Row id
    pub id: Uuid,
    /// Acting user
    pub user_id: Uuid,
    /// Target organization; absent when the organization could not be resolved
    pub organization_id: Option<Uuid>,
    /// Action column
    pub action: AuditAction,
    /// Resource family (`dashboard`, `ssh`, `container`, ...)
    pub resource_type: String,
    /// Specific resource, when the tool targets one
    pub resource_id: Option<Uuid>,
    /// State before the call
    pub old_values: Option<Value>,
    /// State after the call
    pub new_values: Option<Value>,
    /// Outcome
    pub status: AuditStatus,
    /// Redacted call details, error kind and tool-specific facts
    pub metadata: Value,
    /// Caller address, when the client supplied one
    pub ip_address: Option<String>,
    /// Caller user agent, when the client supplied one
    pub user_agent: Option<String>,
    /// Tool invocation id
    pub request_id: Uuid,
    /// Time the invocation started
    pub created_at: DateTime<Utc>,
}

impl AuditRecord {
    /// Metadata persisted for this record, with `status` merged in
    #[must_use]
    pub fn persisted_metadata(&self) -> Value {
        let mut metadata = match &self.metadata {
            Value::Object(map) => map.clone(),
            Value::Null => serde_json::Map::new(),
            other => {
                let mut map = serde_json::Map::new();
                map.insert("details".to_owned(), other.clone());
                map
            }
        };
        metadata.insert(
            "status".to_owned(),
            Value::String(self.status.as_str().to_owned()),
        );
        Value::Object(metadata)
    }
}
