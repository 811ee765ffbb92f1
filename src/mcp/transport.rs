// ABOUTME: Newline-delimited JSON-RPC transport over stdin/stdout or any async byte stream
// ABOUTME: Spawns a task per tool call, routes cancellations and drains calls on EOF or shutdown
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nixopus

//! # Stdio Transport
//!
//! One reader loop, one writer task, one task per `tools/call`. stdout carries
//! only JSON-RPC documents, one per line; logs go to stderr.
//!
//! When the input ends (client disconnect) or `stop` fires, every in-flight
//! call is cancelled, the server waits up to the shutdown grace for them to
//! finish, and the audit queue is flushed before [`McpServer::serve`] returns.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::audit::AuditSink;
use crate::errors::{AppError, AppResult};
use crate::jsonrpc::{error_codes, JsonRpcRequest, JsonRpcResponse};
use crate::mcp::dispatch::ToolDispatcher;
use crate::mcp::request_processor::{call_key, route, Routed};

const OUTBOUND_BUFFER: usize = 256;

/// MCP server bound to a dispatcher and the audit sink it drains on exit
pub struct McpServer {
    dispatcher: Arc<ToolDispatcher>,
    audit: AuditSink,
    pending: Arc<DashMap<String, CancellationToken>>,
}

impl McpServer {
    /// Server over `dispatcher`
    #[must_use]
    pub fn new(dispatcher: Arc<ToolDispatcher>, audit: AuditSink) -> Self {
        Self {
            dispatcher,
            audit,
            pending: Arc::new(DashMap::new()),
        }
    }

    /// Serve on the process's stdin and stdout
    ///
    /// # Errors
    ///
    /// Returns an error when stdin cannot be read
    pub async fn serve_stdio(&self, stop: CancellationToken) -> AppResult<()> {
        self.serve(tokio::io::stdin(), tokio::io::stdout(), stop)
            .await
    }

    /// Serve until `reader` ends or `stop` fires
    ///
    /// # Errors
    ///
    /// Returns an error when reading the input fails
    pub async fn serve<R, W>(&self, reader: R, writer: W, stop: CancellationToken) -> AppResult<()>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<JsonRpcResponse>(OUTBOUND_BUFFER);
        let writer_task = tokio::spawn(write_responses(writer, rx));
        let mut calls = JoinSet::new();
        let mut lines = BufReader::new(reader).lines();

        info!("MCP transport ready");
        let read_result = loop {
            let line = tokio::select! {
                biased;
                () = stop.cancelled() => {
                    info!("Shutdown requested");
                    break Ok(());
                }
                line = lines.next_line() => line,
            };

            match line {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    self.handle_line(&line, &tx, &mut calls).await;
                }
                Ok(None) => {
                    info!("Client disconnected");
                    break Ok(());
                }
                Err(e) => {
                    error!(error = %e, "Failed to read from transport");
                    break Err(AppError::internal(format!("transport read failed: {e}")));
                }
            }
            // Reap finished calls so the set does not grow without bound
            while calls.try_join_next().is_some() {}
        };

        self.drain(&mut calls).await;
        drop(tx);
        if let Err(e) = writer_task.await {
            error!(error = %e, "Response writer terminated abnormally");
        }
        self.audit.flush().await;
        read_result
    }

    async fn handle_line(
        &self,
        line: &str,
        tx: &mpsc::Sender<JsonRpcResponse>,
        calls: &mut JoinSet<()>,
    ) {
        let request = match serde_json::from_str::<serde_json::Value>(line) {
            Err(e) => {
                warn!(error = %e, "Invalid JSON on transport");
                send(tx, JsonRpcResponse::error(None, error_codes::PARSE_ERROR, "Parse error")).await;
                return;
            }
            Ok(value) => {
                let id = value.get("id").cloned();
                match serde_json::from_value::<JsonRpcRequest>(value) {
                    Ok(request) => request,
                    Err(e) => {
                        send(
                            tx,
                            JsonRpcResponse::error(
                                id,
                                error_codes::INVALID_REQUEST,
                                format!("Invalid request: {e}"),
                            ),
                        )
                        .await;
                        return;
                    }
                }
            }
        };

        match route(request, self.dispatcher.registry()) {
            Routed::Respond(response) => send(tx, response).await,
            Routed::Call { id, params } => {
                let key = call_key(&id);
                let token = self.dispatcher.call_token();
                let duplicate = match self.pending.entry(key.clone()) {
                    Entry::Occupied(_) => true,
                    Entry::Vacant(slot) => {
                        slot.insert(token.clone());
                        false
                    }
                };
                if duplicate {
                    warn!(call = %key, "Rejecting call that reuses an in-flight id");
                    send(
                        tx,
                        JsonRpcResponse::error(
                            Some(id),
                            error_codes::INVALID_REQUEST,
                            "Request id is already in flight",
                        ),
                    )
                    .await;
                    return;
                }

                let dispatcher = Arc::clone(&self.dispatcher);
                let pending = Arc::clone(&self.pending);
                let tx = tx.clone();
                calls.spawn(async move {
                    let result = dispatcher.dispatch(params, token).await;
                    pending.remove(&key);
                    let response = match serde_json::to_value(&result) {
                        Ok(value) => JsonRpcResponse::success(Some(id), value),
                        Err(e) => JsonRpcResponse::error(
                            Some(id),
                            error_codes::INTERNAL_ERROR,
                            format!("result serialization failed: {e}"),
                        ),
                    };
                    send(&tx, response).await;
                });
            }
            Routed::Cancel(key) => {
                if let Some((_, token)) = self.pending.remove(&key) {
                    debug!(call = %key, "Cancelling call on client request");
                    token.cancel();
                }
            }
            Routed::Ignore => {}
        }
    }

    /// Cancel in-flight calls and wait for them up to the shutdown grace
    async fn drain(&self, calls: &mut JoinSet<()>) {
        self.dispatcher.begin_shutdown();
        if calls.is_empty() {
            return;
        }
        let grace = self.dispatcher.config().shutdown_grace;
        info!(in_flight = calls.len(), grace_ms = grace.as_millis() as u64, "Waiting for in-flight calls");

        let waited = tokio::time::timeout(grace, async {
            while let Some(joined) = calls.join_next().await {
                if let Err(e) = joined {
                    error!(error = %e, "Tool call task failed");
                }
            }
        })
        .await;

        if waited.is_err() {
            warn!(remaining = calls.len(), "Aborting calls that outlived the shutdown grace");
            calls.shutdown().await;
        }
    }
}

async fn send(tx: &mpsc::Sender<JsonRpcResponse>, response: JsonRpcResponse) {
    if tx.send(response).await.is_err() {
        debug!("Response dropped, writer is gone");
    }
}

async fn write_responses<W>(mut writer: W, mut rx: mpsc::Receiver<JsonRpcResponse>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(response) = rx.recv().await {
        let mut line = match serde_json::to_string(&response) {
            Ok(line) => line,
            Err(e) => {
                error!(error = %e, "Failed to serialize response");
                continue;
            }
        };
        line.push('\n');
        if let Err(e) = writer.write_all(line.as_bytes()).await {
            warn!(error = %e, "Client output closed");
            return;
        }
        if let Err(e) = writer.flush().await {
            warn!(error = %e, "Client output closed");
            return;
        }
    }
}
