// ABOUTME: Tests of the newline-delimited JSON-RPC transport over in-memory pipes
// ABOUTME: Covers handshake, listing, calls, client cancellation, parse errors and disconnect
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nixopus

mod common;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use common::{Harness, ScriptedRunner, VALID_SESSION};
use nixopus_core::models::{Action, AuditStatus, PermissionSet};
use nixopus_mcp_server::mcp::McpServer;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Client end of a running server
struct Session {
    input: Option<DuplexStream>,
    output: Lines<BufReader<DuplexStream>>,
    server: JoinHandle<nixopus_mcp_server::errors::AppResult<()>>,
    stop: CancellationToken,
}

impl Session {
    fn start(h: &Harness, runner: Arc<ScriptedRunner>) -> Result<Self> {
        let dispatcher = Arc::new(h.dispatcher(runner)?);
        let server = McpServer::new(dispatcher, h.audit.clone());
        let (client_in, server_in) = tokio::io::duplex(64 * 1024);
        let (server_out, client_out) = tokio::io::duplex(64 * 1024);
        let stop = CancellationToken::new();
        let server_stop = stop.clone();
        let server = tokio::spawn(async move { server.serve(server_in, server_out, server_stop).await });
        Ok(Self {
            input: Some(client_in),
            output: BufReader::new(client_out).lines(),
            server,
            stop,
        })
    }

    async fn send_raw(&mut self, line: &str) -> Result<()> {
        let input = self.input.as_mut().ok_or_else(|| anyhow!("input closed"))?;
        input.write_all(line.as_bytes()).await?;
        input.write_all(b"\n").await?;
        Ok(())
    }

    async fn send(&mut self, message: &Value) -> Result<()> {
        self.send_raw(&serde_json::to_string(message)?).await
    }

    async fn recv(&mut self) -> Result<Value> {
        let line = tokio::time::timeout(Duration::from_secs(5), self.output.next_line())
            .await
            .context("no response within 5s")??
            .ok_or_else(|| anyhow!("server closed its output"))?;
        Ok(serde_json::from_str(&line)?)
    }

    /// Read `count` responses and index them by id
    async fn recv_by_id(&mut self, count: usize) -> Result<HashMap<String, Value>> {
        let mut responses = HashMap::new();
        for _ in 0..count {
            let response = self.recv().await?;
            responses.insert(response["id"].to_string(), response);
        }
        Ok(responses)
    }

    fn close_input(&mut self) {
        self.input = None;
    }
}

fn tool_call(id: u64, name: &str, arguments: &Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": "tools/call",
        "params": {
            "name": name,
            "arguments": arguments,
            "_meta": {"auth_token": VALID_SESSION}
        }
    })
}

fn ssh_grant() -> PermissionSet {
    PermissionSet::new()
        .with("dashboard", Action::Read)
        .with("ssh", Action::Execute)
}

#[tokio::test]
async fn test_initialize_list_and_call() -> Result<()> {
    let h = Harness::new();
    let mut session = Session::start(&h, Arc::new(ScriptedRunner::new("", 0)))?;

    session
        .send(&json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {"protocolVersion": "2025-06-18"}}))
        .await?;
    let init = session.recv().await?;
    assert_eq!(init["id"], 1);
    assert!(init["result"]["serverInfo"]["name"].is_string());

    session
        .send(&json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))
        .await?;
    session
        .send(&json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"}))
        .await?;
    let list = session.recv().await?;
    let names: Vec<&str> = list["result"]["tools"]
        .as_array()
        .ok_or_else(|| anyhow!("tools is not an array"))?
        .iter()
        .filter_map(|t| t["name"].as_str())
        .collect();
    assert!(names.contains(&"get_system_stats"));
    assert!(names.contains(&"run_command"));

    session
        .send(&tool_call(3, "echo", &json!({"message": "over the wire"})))
        .await?;
    let call = session.recv().await?;
    assert_eq!(call["id"], 3);
    assert_eq!(call["result"]["isError"], false);
    assert_eq!(call["result"]["structuredContent"]["message"], "over the wire");

    session.close_input();
    session.server.await??;
    assert_eq!(h.audit_writer.rows().len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_protocol_errors() -> Result<()> {
    let h = Harness::new();
    let mut session = Session::start(&h, Arc::new(ScriptedRunner::new("", 0)))?;

    session.send_raw("{not json").await?;
    let parse = session.recv().await?;
    assert_eq!(parse["error"]["code"], -32700);
    assert!(parse["id"].is_null());

    session
        .send(&json!({"jsonrpc": "2.0", "id": 7, "method": "resources/list"}))
        .await?;
    assert_eq!(session.recv().await?["error"]["code"], -32601);

    session
        .send(&json!({"jsonrpc": "2.0", "id": 8, "method": "tools/call", "params": {"arguments": {}}}))
        .await?;
    assert_eq!(session.recv().await?["error"]["code"], -32602);

    session
        .send(&json!({"jsonrpc": "1.0", "id": 9, "method": "ping"}))
        .await?;
    assert_eq!(session.recv().await?["error"]["code"], -32600);

    // Tool-level failures are results, not protocol errors
    session
        .send(&tool_call(10, "no_such_tool", &json!({})))
        .await?;
    let unknown = session.recv().await?;
    assert_eq!(unknown["result"]["isError"], true);
    let text = unknown["result"]["content"][0]["text"]
        .as_str()
        .ok_or_else(|| anyhow!("no text block"))?;
    let envelope: Value = serde_json::from_str(text)?;
    assert_eq!(envelope["kind"], "UNKNOWN_TOOL");
    assert!(envelope["requestId"].is_string());

    session.stop.cancel();
    session.server.await??;
    Ok(())
}

#[tokio::test]
async fn test_cancelled_notification_stops_one_call() -> Result<()> {
    let h = Harness::new();
    h.grant(ssh_grant());
    let runner = Arc::new(ScriptedRunner::new("", 0).taking(Duration::from_secs(60)));
    let mut session = Session::start(&h, runner)?;

    session
        .send(&tool_call(21, "run_command", &json!({"command": "sleep 60"})))
        .await?;
    session
        .send(&tool_call(22, "echo", &json!({"message": "still here"})))
        .await?;
    let echo = session.recv().await?;
    assert_eq!(echo["id"], 22);

    session
        .send(&json!({
            "jsonrpc": "2.0",
            "method": "notifications/cancelled",
            "params": {"requestId": 21, "reason": "user aborted"}
        }))
        .await?;
    let cancelled = session.recv().await?;
    assert_eq!(cancelled["id"], 21);
    assert_eq!(cancelled["result"]["isError"], true);

    session.close_input();
    session.server.await??;
    let statuses: Vec<AuditStatus> = h.audit_writer.rows().iter().map(|r| r.status).collect();
    assert!(statuses.contains(&AuditStatus::Cancelled));
    assert!(statuses.contains(&AuditStatus::Success));
    Ok(())
}

#[tokio::test]
async fn test_disconnect_cancels_in_flight_calls() -> Result<()> {
    let h = Harness::new();
    h.grant(ssh_grant());
    let runner = Arc::new(ScriptedRunner::new("", 0).taking(Duration::from_secs(60)));
    let mut session = Session::start(&h, runner)?;

    session
        .send(&tool_call(31, "run_command", &json!({"command": "sleep 60"})))
        .await?;
    session
        .send(&tool_call(32, "run_command", &json!({"command": "sleep 60"})))
        .await?;
    tokio::time::sleep(Duration::from_millis(200)).await;

    session.close_input();
    let responses = session.recv_by_id(2).await?;
    for id in ["31", "32"] {
        let response = responses
            .get(id)
            .ok_or_else(|| anyhow!("no response for call {id}"))?;
        assert_eq!(response["result"]["isError"], true);
    }

    tokio::time::timeout(Duration::from_secs(2), &mut session.server)
        .await
        .context("server did not stop after disconnect")???;

    // The transport flushed audit before returning
    let rows = h.audit_writer.rows();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| r.status == AuditStatus::Cancelled));
    Ok(())
}

#[tokio::test]
async fn test_reused_in_flight_id_is_rejected() -> Result<()> {
    let h = Harness::new();
    h.grant(ssh_grant());
    let runner = Arc::new(ScriptedRunner::new("", 0).taking(Duration::from_secs(60)));
    let mut session = Session::start(&h, runner)?;

    session
        .send(&tool_call(41, "run_command", &json!({"command": "sleep 60"})))
        .await?;
    session
        .send(&tool_call(41, "echo", &json!({"message": "same id"})))
        .await?;
    let rejected = session.recv().await?;
    assert_eq!(rejected["id"], 41);
    assert_eq!(rejected["error"]["code"], -32600);

    // The original call is still reachable by its id
    session
        .send(&json!({
            "jsonrpc": "2.0",
            "method": "notifications/cancelled",
            "params": {"requestId": 41}
        }))
        .await?;
    let cancelled = session.recv().await?;
    assert_eq!(cancelled["id"], 41);
    assert_eq!(cancelled["result"]["isError"], true);

    session.close_input();
    session.server.await??;
    let rows = h.audit_writer.rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, AuditStatus::Cancelled);
    Ok(())
}
