// ABOUTME: JSON-RPC method routing for the MCP stdio server
// ABOUTME: Answers initialize, ping and tools/list inline and hands tools/call to the dispatcher
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nixopus

use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::jsonrpc::{error_codes, JsonRpcRequest, JsonRpcResponse, JSONRPC_VERSION};
use crate::mcp::schema::{CallToolParams, InitializeResult};
use crate::tools::registry::ToolRegistry;

/// What the transport should do with one inbound message
#[derive(Debug)]
pub enum Routed {
    /// Write this response
    Respond(JsonRpcResponse),
    /// Run a tool call and answer `id` with its result
    Call {
        /// JSON-RPC id to answer
        id: Value,
        /// Parsed call parameters
        params: CallToolParams,
    },
    /// Cancel the in-flight call whose JSON-RPC id renders as this key
    Cancel(String),
    /// Notification needing no action
    Ignore,
}

/// Key under which an in-flight call is tracked for cancellation
#[must_use]
pub fn call_key(id: &Value) -> String {
    id.to_string()
}

/// Route one parsed message
#[must_use]
pub fn route(request: JsonRpcRequest, registry: &ToolRegistry) -> Routed {
    if request.jsonrpc != JSONRPC_VERSION {
        return Routed::Respond(JsonRpcResponse::error(
            request.id,
            error_codes::INVALID_REQUEST,
            format!("unsupported jsonrpc version '{}'", request.jsonrpc),
        ));
    }

    let Some(id) = request.id else {
        return route_notification(&request.method, request.params.as_ref());
    };

    match request.method.as_str() {
        "initialize" => {
            let requested = request
                .params
                .as_ref()
                .and_then(|p| p.get("protocolVersion"))
                .and_then(Value::as_str);
            let result = InitializeResult::for_client(requested);
            respond_with(id, &result)
        }
        "ping" => Routed::Respond(JsonRpcResponse::success(Some(id), json!({}))),
        "tools/list" => respond_with(id, &json!({ "tools": registry.schemas() })),
        "tools/call" => {
            match serde_json::from_value::<CallToolParams>(request.params.unwrap_or(Value::Null)) {
                Ok(params) => Routed::Call { id, params },
                Err(e) => Routed::Respond(JsonRpcResponse::error(
                    Some(id),
                    error_codes::INVALID_PARAMS,
                    format!("invalid tools/call params: {e}"),
                )),
            }
        }
        other => {
            debug!(method = %other, "Unknown MCP method");
            Routed::Respond(JsonRpcResponse::error(
                Some(id),
                error_codes::METHOD_NOT_FOUND,
                format!("method '{other}' not found"),
            ))
        }
    }
}

fn route_notification(method: &str, params: Option<&Value>) -> Routed {
    match method {
        "notifications/cancelled" => params
            .and_then(|p| p.get("requestId"))
            .map_or(Routed::Ignore, |id| Routed::Cancel(call_key(id))),
        "notifications/initialized" => Routed::Ignore,
        other => {
            debug!(method = %other, "Ignoring notification");
            Routed::Ignore
        }
    }
}

fn respond_with(id: Value, result: &impl serde::Serialize) -> Routed {
    match serde_json::to_value(result) {
        Ok(value) => Routed::Respond(JsonRpcResponse::success(Some(id), value)),
        Err(e) => {
            warn!(error = %e, "Failed to serialize response");
            Routed::Respond(JsonRpcResponse::error(
                Some(id),
                error_codes::INTERNAL_ERROR,
                "response serialization failed",
            ))
        }
    }
}
