// ABOUTME: Registration-time error types for the tool registry
// ABOUTME: Duplicate names, unknown actions and broken schemas are fatal at startup
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nixopus

use std::error::Error;
use std::fmt;

use super::AppError;

/// Errors raised while building the tool registry.
///
/// These abort startup; none of them can occur while serving calls except
/// `NotFound`, which the dispatch loop maps to `UNKNOWN_TOOL`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    /// Tool was not found in the registry
    NotFound {
        /// Name of the requested tool
        tool_name: String,
    },
    /// A tool with the same name is already registered
    AlreadyRegistered {
        /// Name of the already-registered tool
        tool_name: String,
    },
    /// The declared action is not one the role system can grant
    UnknownAction {
        /// Name of the tool
        tool_name: String,
        /// The rejected action string
        action: String,
    },
    /// The declared input or output schema is not a valid JSON schema
    InvalidSchema {
        /// Name of the tool
        tool_name: String,
        /// Compiler message
        details: String,
    },
}

impl ToolError {
    /// Create a "not found" error
    #[must_use]
    pub fn not_found(tool_name: impl Into<String>) -> Self {
        Self::NotFound {
            tool_name: tool_name.into(),
        }
    }

    /// Create an "already registered" error
    #[must_use]
    pub fn already_registered(tool_name: impl Into<String>) -> Self {
        Self::AlreadyRegistered {
            tool_name: tool_name.into(),
        }
    }

    /// Create an "unknown action" error
    #[must_use]
    pub fn unknown_action(tool_name: impl Into<String>, action: impl Into<String>) -> Self {
        Self::UnknownAction {
            tool_name: tool_name.into(),
            action: action.into(),
        }
    }

    /// Create an "invalid schema" error
    #[must_use]
    pub fn invalid_schema(tool_name: impl Into<String>, details: impl Into<String>) -> Self {
        Self::InvalidSchema {
            tool_name: tool_name.into(),
            details: details.into(),
        }
    }

    /// Get the tool name associated with this error
    #[must_use]
    pub fn tool_name(&self) -> &str {
        match self {
            Self::NotFound { tool_name }
            | Self::AlreadyRegistered { tool_name }
            | Self::UnknownAction { tool_name, .. }
            | Self::InvalidSchema { tool_name, .. } => tool_name,
        }
    }
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { tool_name } => write!(f, "Tool '{tool_name}' not found"),
            Self::AlreadyRegistered { tool_name } => {
                write!(f, "Tool '{tool_name}' is already registered")
            }
            Self::UnknownAction { tool_name, action } => {
                write!(f, "Tool '{tool_name}' declares unknown action '{action}'")
            }
            Self::InvalidSchema { tool_name, details } => {
                write!(f, "Tool '{tool_name}' has an invalid schema: {details}")
            }
        }
    }
}

impl Error for ToolError {}

impl From<ToolError> for AppError {
    fn from(error: ToolError) -> Self {
        match error {
            ToolError::NotFound { ref tool_name } => Self::tool_not_found(tool_name.clone()),
            other => Self::config(other.to_string()),
        }
    }
}
