// ABOUTME: MCP message structures for initialize, tools/list and tools/call
// ABOUTME: Content blocks, call results and tool listings as they appear on the wire
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nixopus

//! MCP Protocol Schema Definitions

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::ErrorEnvelope;
use nixopus_core::constants::protocol::{MCP_PROTOCOL_VERSION, SERVER_NAME};

/// Server Information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    /// Server name
    pub name: String,
    /// Server version
    pub version: String,
}

/// Tool listing entry returned by `tools/list`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSchema {
    /// Unique tool name
    pub name: String,
    /// Human-readable description
    pub description: String,
    /// JSON Schema of the arguments
    pub input_schema: Value,
    /// JSON Schema of `structuredContent`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
}

/// Parameters of `tools/call`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallToolParams {
    /// Tool name
    pub name: String,
    /// Tool arguments; absent means `{}`
    #[serde(default)]
    pub arguments: Option<Value>,
    /// Call metadata (`auth_token`, `organization_id`, ...)
    #[serde(rename = "_meta", alias = "meta", default)]
    pub meta: Option<Map<String, Value>>,
}

/// Content block of a tool result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Content {
    /// Plain text
    Text {
        /// Text body
        text: String,
    },
    /// Base64 image
    Image {
        /// Base64 data
        data: String,
        /// MIME type
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    /// Base64 audio
    Audio {
        /// Base64 data
        data: String,
        /// MIME type
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
}

impl Content {
    /// Text block
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }
}

/// Result of `tools/call`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResult {
    /// Content blocks
    pub content: Vec<Content>,
    /// Machine-readable payload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<Value>,
    /// Whether the call failed
    pub is_error: bool,
}

impl CallToolResult {
    /// Successful result
    #[must_use]
    pub const fn success(content: Vec<Content>, structured_content: Option<Value>) -> Self {
        Self {
            content,
            structured_content,
            is_error: false,
        }
    }

    /// Failed result carrying a single text block with the JSON error envelope
    #[must_use]
    pub fn failure(envelope: &ErrorEnvelope) -> Self {
        let text = serde_json::to_string(envelope).unwrap_or_else(|_| {
            format!(
                r#"{{"kind":"{}","message":"serialization failed","requestId":"{}"}}"#,
                envelope.kind, envelope.request_id
            )
        });
        Self {
            content: vec![Content::text(text)],
            structured_content: None,
            is_error: true,
        }
    }

    /// Parse the error envelope back out of a failed result
    #[must_use]
    pub fn error_envelope(&self) -> Option<ErrorEnvelope> {
        if !self.is_error {
            return None;
        }
        self.content.iter().find_map(|block| match block {
            Content::Text { text } => serde_json::from_str(text).ok(),
            _ => None,
        })
    }
}

/// `initialize` result
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    /// Negotiated protocol version
    pub protocol_version: String,
    /// Server identification
    pub server_info: ServerInfo,
    /// Advertised capabilities
    pub capabilities: Value,
    /// Usage instructions for the client
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

impl InitializeResult {
    /// Result for this server, echoing the client's version when it sent one
    #[must_use]
    pub fn for_client(requested_version: Option<&str>) -> Self {
        Self {
            protocol_version: requested_version
                .unwrap_or(MCP_PROTOCOL_VERSION)
                .to_owned(),
            server_info: ServerInfo {
                name: SERVER_NAME.to_owned(),
                version: env!("CARGO_PKG_VERSION").to_owned(),
            },
            capabilities: serde_json::json!({ "tools": { "listChanged": false } }),
            instructions: Some(
                "Pass the session token in _meta.auth_token and the target organization in \
                 arguments.organization_id or _meta.organization_id."
                    .to_owned(),
            ),
        }
    }
}
