// ABOUTME: Unified error handling with internal error codes and client-visible error kinds
// ABOUTME: Every failure collapses to one of seven stable kinds at the MCP boundary
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nixopus

//! # Unified Error Handling System
//!
//! Internally the server distinguishes many failure causes through [`ErrorCode`].
//! Clients only ever observe the coarse [`ErrorKind`] taxonomy, serialized inside an
//! [`ErrorEnvelope`] together with the request id so operators can correlate a
//! report with the `ERROR` log line that carries the full cause.

/// Authentication errors produced by the identity resolver
pub mod auth;
/// Registration-time errors produced by the tool registry
pub mod tool;

pub use auth::{AuthError, AuthErrorKind};
pub use tool::ToolError;

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Client-visible error taxonomy.
///
/// Stable across releases: clients branch on these strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Missing, expired, invalid or revoked credential
    Unauthenticated,
    /// Authenticated but not allowed (membership, RBAC, feature gate)
    Forbidden,
    /// No tool registered under the requested name
    UnknownTool,
    /// Arguments failed validation
    InvalidArgument,
    /// The call exceeded its deadline
    Deadline,
    /// The call was cancelled by the client or by shutdown
    Cancelled,
    /// Anything else; details are only in server logs
    Internal,
}

impl ErrorKind {
    /// Wire representation of this kind
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unauthenticated => "UNAUTHENTICATED",
            Self::Forbidden => "FORBIDDEN",
            Self::UnknownTool => "UNKNOWN_TOOL",
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::Deadline => "DEADLINE",
            Self::Cancelled => "CANCELLED",
            Self::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Standard error codes used throughout the application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    // Authentication (1000-1099)
    /// No credential was supplied
    #[serde(rename = "AUTH_REQUIRED")]
    AuthRequired = 1000,
    /// The session store rejected the credential
    #[serde(rename = "AUTH_INVALID")]
    AuthInvalid = 1001,
    /// The session has expired and must be refreshed
    #[serde(rename = "AUTH_EXPIRED")]
    AuthExpired = 1002,
    /// The session was revoked
    #[serde(rename = "AUTH_REVOKED")]
    AuthRevoked = 1003,

    // Authorization (1100-1199)
    /// Role does not grant the required action
    #[serde(rename = "PERMISSION_DENIED")]
    PermissionDenied = 1100,
    /// Principal is not a member of the target organization
    #[serde(rename = "NOT_A_MEMBER")]
    NotMember = 1101,
    /// Tool feature is disabled for the organization
    #[serde(rename = "FEATURE_DISABLED")]
    FeatureDisabled = 1102,

    // Tools (2000-2999)
    /// No tool with the requested name
    #[serde(rename = "TOOL_NOT_FOUND")]
    ToolNotFound = 2000,

    // Validation (3000-3999)
    /// Input failed validation
    #[serde(rename = "INVALID_INPUT")]
    InvalidInput = 3000,
    /// A required field is missing
    #[serde(rename = "MISSING_REQUIRED_FIELD")]
    MissingRequiredField = 3001,
    /// A field has the wrong shape (e.g. not a UUID)
    #[serde(rename = "INVALID_FORMAT")]
    InvalidFormat = 3002,

    // Lifecycle (4000-4999)
    /// Deadline elapsed before completion
    #[serde(rename = "DEADLINE_EXCEEDED")]
    DeadlineExceeded = 4000,
    /// Cancelled by client disconnect, explicit cancel or shutdown
    #[serde(rename = "CANCELLED")]
    Cancelled = 4001,

    // External Services (5000-5999)
    /// A downstream service (session store, docker, ssh) failed
    #[serde(rename = "EXTERNAL_SERVICE_ERROR")]
    ExternalServiceError = 5000,
    /// The remote cache tier failed
    #[serde(rename = "CACHE_ERROR")]
    CacheError = 5001,

    // Configuration (6000-6999)
    /// Invalid or missing configuration
    #[serde(rename = "CONFIG_ERROR")]
    ConfigError = 6000,

    // Internal Errors (9000-9999)
    /// Unclassified internal failure
    #[serde(rename = "INTERNAL_ERROR")]
    InternalError = 9000,
    /// Database operation failed
    #[serde(rename = "DATABASE_ERROR")]
    DatabaseError = 9001,
    /// The audit queue could not accept a record in time
    #[serde(rename = "AUDIT_UNAVAILABLE")]
    AuditUnavailable = 9002,
    /// Data serialization/deserialization failed
    #[serde(rename = "SERIALIZATION_ERROR")]
    SerializationError = 9003,
}

impl ErrorCode {
    /// Client-visible kind for this code
    #[must_use]
    pub const fn kind(self) -> ErrorKind {
        match self {
            Self::AuthRequired | Self::AuthInvalid | Self::AuthExpired | Self::AuthRevoked => {
                ErrorKind::Unauthenticated
            }
            Self::PermissionDenied | Self::NotMember | Self::FeatureDisabled => {
                ErrorKind::Forbidden
            }
            Self::ToolNotFound => ErrorKind::UnknownTool,
            Self::InvalidInput | Self::MissingRequiredField | Self::InvalidFormat => {
                ErrorKind::InvalidArgument
            }
            Self::DeadlineExceeded => ErrorKind::Deadline,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::ExternalServiceError
            | Self::CacheError
            | Self::ConfigError
            | Self::InternalError
            | Self::DatabaseError
            | Self::AuditUnavailable
            | Self::SerializationError => ErrorKind::Internal,
        }
    }

    /// Get a user-friendly description of this error
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::AuthRequired => "Authentication is required to call this tool",
            Self::AuthInvalid => "The provided credential is invalid",
            Self::AuthExpired => "The session has expired",
            Self::AuthRevoked => "The session has been revoked",
            Self::PermissionDenied => "You do not have permission to perform this action",
            Self::NotMember => "You are not a member of this organization",
            Self::FeatureDisabled => "This feature is disabled for the organization",
            Self::ToolNotFound => "The requested tool does not exist",
            Self::InvalidInput => "The provided input is invalid",
            Self::MissingRequiredField => "A required field is missing from the request",
            Self::InvalidFormat => "The data format is invalid",
            Self::DeadlineExceeded => "The operation did not complete before its deadline",
            Self::Cancelled => "The operation was cancelled",
            Self::ExternalServiceError => "An external service encountered an error",
            Self::CacheError => "Cache operation failed",
            Self::ConfigError => "Configuration error encountered",
            Self::InternalError => "An internal server error occurred",
            Self::DatabaseError => "Database operation failed",
            Self::AuditUnavailable => "The audit log is temporarily unavailable",
            Self::SerializationError => "Data serialization/deserialization failed",
        }
    }
}

/// Additional context that can be attached to errors
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorContext {
    /// Request ID for tracing
    pub request_id: Option<Uuid>,
    /// User ID if available
    pub user_id: Option<Uuid>,
    /// Resource ID if applicable
    pub resource_id: Option<String>,
    /// Additional key-value context
    pub details: serde_json::Value,
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self {
            request_id: None,
            user_id: None,
            resource_id: None,
            details: serde_json::Value::Object(serde_json::Map::new()),
        }
    }
}

/// Unified error type for the application
#[derive(Debug, Error)]
pub struct AppError {
    /// Error code
    pub code: ErrorCode,
    /// Human-readable error message
    pub message: String,
    /// Additional context
    pub context: ErrorContext,
    /// Source error for error chaining
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl AppError {
    /// Create a new `AppError` with the given code and message
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            context: ErrorContext::default(),
            source: None,
        }
    }

    /// Client-visible kind of this error
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.code.kind()
    }

    /// Add a request ID to the error context
    #[must_use]
    pub fn with_request_id(mut self, request_id: Uuid) -> Self {
        self.context.request_id = Some(request_id);
        self
    }

    /// Add a user ID to the error context
    #[must_use]
    pub fn with_user_id(mut self, user_id: Uuid) -> Self {
        self.context.user_id = Some(user_id);
        self
    }

    /// Add a resource ID to the error context
    #[must_use]
    pub fn with_resource_id(mut self, resource_id: impl Into<String>) -> Self {
        self.context.resource_id = Some(resource_id.into());
        self
    }

    /// Add details to the error context
    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.context.details = details;
        self
    }

    /// Add a source error for error chaining
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Whether this error reports an elapsed deadline
    #[must_use]
    pub fn is_deadline(&self) -> bool {
        self.code == ErrorCode::DeadlineExceeded
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code.description(), self.message)
    }
}

/// Result type alias for convenience
pub type AppResult<T> = Result<T, AppError>;

/// Convenience functions for creating common errors
impl AppError {
    /// Authentication required
    #[must_use]
    pub fn auth_required() -> Self {
        Self::new(ErrorCode::AuthRequired, "Authentication required")
    }

    /// Role does not grant the action on the resource
    pub fn permission_denied(resource: &str, action: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::PermissionDenied,
            format!("missing permission {action} on {resource}"),
        )
    }

    /// Principal is not a member of the organization
    #[must_use]
    pub fn not_member(organization_id: Uuid) -> Self {
        Self::new(
            ErrorCode::NotMember,
            format!("not a member of organization {organization_id}"),
        )
    }

    /// Feature disabled for the organization
    pub fn feature_disabled(feature: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::FeatureDisabled,
            format!("feature '{}' is disabled", feature.into()),
        )
    }

    /// Unknown tool
    pub fn tool_not_found(name: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::ToolNotFound,
            format!("unknown tool '{}'", name.into()),
        )
    }

    /// Invalid input
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    /// Missing required field
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::MissingRequiredField,
            format!("missing required field '{}'", field.into()),
        )
    }

    /// Field has the wrong format
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidFormat, message)
    }

    /// Deadline exceeded
    pub fn deadline(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::DeadlineExceeded, message)
    }

    /// Cancelled
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Cancelled, message)
    }

    /// Internal server error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    /// Database error
    pub fn database(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::DatabaseError, message)
    }

    /// Remote cache error
    pub fn cache(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::CacheError, message)
    }

    /// Audit queue could not accept a record
    pub fn audit_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::AuditUnavailable, message)
    }

    /// Configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConfigError, message)
    }

    /// External service error
    pub fn external_service(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::ExternalServiceError,
            format!("{}: {}", service.into(), message.into()),
        )
    }
}

impl From<serde_json::Error> for AppError {
    fn from(error: serde_json::Error) -> Self {
        Self::new(ErrorCode::SerializationError, error.to_string()).with_source(error)
    }
}

/// Error body returned to MCP clients inside a `CallToolResult` with `isError = true`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEnvelope {
    /// Stable error kind
    pub kind: ErrorKind,
    /// Human-readable message, free of internal details
    pub message: String,
    /// Request id for correlation with server logs and audit records
    pub request_id: Uuid,
}

impl ErrorEnvelope {
    /// Build the client-facing envelope for an error.
    ///
    /// `INTERNAL` errors expose only the generic description of their code so that
    /// database or driver text never reaches the client.
    #[must_use]
    pub fn from_error(error: &AppError, request_id: Uuid) -> Self {
        let kind = error.kind();
        let message = if kind == ErrorKind::Internal {
            error.code.description().to_owned()
        } else {
            error.message.clone()
        };
        Self {
            kind,
            message,
            request_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_auth_code_is_unauthenticated() {
        for code in [
            ErrorCode::AuthRequired,
            ErrorCode::AuthInvalid,
            ErrorCode::AuthExpired,
            ErrorCode::AuthRevoked,
        ] {
            assert_eq!(code.kind(), ErrorKind::Unauthenticated);
        }
    }

    #[test]
    fn test_storage_failures_surface_as_internal() {
        assert_eq!(ErrorCode::DatabaseError.kind(), ErrorKind::Internal);
        assert_eq!(ErrorCode::CacheError.kind(), ErrorKind::Internal);
        assert_eq!(ErrorCode::AuditUnavailable.kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_envelope_hides_internal_messages() {
        let request_id = Uuid::new_v4();
        let error = AppError::database("relation \"organization_users\" does not exist");
        let envelope = ErrorEnvelope::from_error(&error, request_id);

        assert_eq!(envelope.kind, ErrorKind::Internal);
        assert!(!envelope.message.contains("organization_users"));
        assert_eq!(envelope.request_id, request_id);
    }

    #[test]
    fn test_envelope_wire_shape() -> Result<(), serde_json::Error> {
        let request_id = Uuid::new_v4();
        let envelope = ErrorEnvelope::from_error(&AppError::auth_required(), request_id);
        let json = serde_json::to_value(&envelope)?;

        assert_eq!(json["kind"], "UNAUTHENTICATED");
        assert_eq!(json["requestId"], request_id.to_string());
        assert_eq!(json["message"], "Authentication required");
        Ok(())
    }

    #[test]
    fn test_app_error_creation() {
        let request_id = Uuid::new_v4();
        let error = AppError::invalid_input("bad")
            .with_request_id(request_id)
            .with_user_id(Uuid::new_v4());

        assert_eq!(error.code, ErrorCode::InvalidInput);
        assert_eq!(error.kind(), ErrorKind::InvalidArgument);
        assert_eq!(error.context.request_id, Some(request_id));
        assert!(error.context.user_id.is_some());
    }
}
