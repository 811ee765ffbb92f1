// ABOUTME: MCP server runtime: wire schema, request context, dispatch loop and stdio transport
// ABOUTME: Composes the registry, middleware chain and audit sink into a serving process
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nixopus

/// Per-call envelopes and the request context handed to handlers
pub mod context;
/// Tool dispatch with deadlines, concurrency bound and error envelopes
pub mod dispatch;
/// JSON-RPC method routing
pub mod request_processor;
/// Services injected into the middleware chain
pub mod resources;
/// MCP wire structures
pub mod schema;
/// Newline-delimited JSON-RPC transport
pub mod transport;

pub use context::{CallEnvelope, CallScope, RequestContext};
pub use dispatch::{DispatchConfig, ToolDispatcher};
pub use resources::Services;
pub use transport::McpServer;
