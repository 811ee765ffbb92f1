// ABOUTME: Authentication error types raised while resolving a bearer credential
// ABOUTME: All kinds surface as UNAUTHENTICATED; the specific kind is kept for logs and audit
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nixopus

use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{AppError, ErrorCode};

/// Why a credential was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthErrorKind {
    /// No credential in the call metadata
    Missing,
    /// Session exists but needs a refresh
    Expired,
    /// Session store does not recognise the credential, or the user record disagrees with it
    Invalid,
    /// Session was explicitly revoked
    Revoked,
}

impl AuthErrorKind {
    /// Lowercase label used in structured logs and audit metadata
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Missing => "missing",
            Self::Expired => "expired",
            Self::Invalid => "invalid",
            Self::Revoked => "revoked",
        }
    }

    const fn code(self) -> ErrorCode {
        match self {
            Self::Missing => ErrorCode::AuthRequired,
            Self::Expired => ErrorCode::AuthExpired,
            Self::Invalid => ErrorCode::AuthInvalid,
            Self::Revoked => ErrorCode::AuthRevoked,
        }
    }
}

/// Credential rejected by the identity resolver
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("authentication failed ({}): {reason}", .kind.as_str())]
pub struct AuthError {
    /// Rejection kind
    pub kind: AuthErrorKind,
    /// Operator-facing reason; never contains the credential
    pub reason: String,
}

impl AuthError {
    /// Create an error of the given kind
    pub fn new(kind: AuthErrorKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }

    /// No credential supplied
    #[must_use]
    pub fn missing() -> Self {
        Self::new(AuthErrorKind::Missing, "no auth_token in call metadata")
    }

    /// Session expired
    pub fn expired(reason: impl Into<String>) -> Self {
        Self::new(AuthErrorKind::Expired, reason)
    }

    /// Credential not recognised
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::new(AuthErrorKind::Invalid, reason)
    }

    /// Session revoked
    pub fn revoked(reason: impl Into<String>) -> Self {
        Self::new(AuthErrorKind::Revoked, reason)
    }
}

impl From<AuthError> for AppError {
    fn from(error: AuthError) -> Self {
        let code = error.kind.code();
        Self::new(code, code.description()).with_details(json!({
            "auth_kind": error.kind.as_str(),
            "reason": error.reason,
        }))
    }
}
