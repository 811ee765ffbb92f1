// ABOUTME: MCP client bridge that spawns the tool server and injects the caller's session token
// ABOUTME: Forwards stdin/stdout line by line, adding AUTH_TOKEN to every tools/call `_meta`
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nixopus

use std::env;
use std::process::Stdio;

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;

#[derive(Debug, Clone)]
struct Config {
    server_path: String,
    auth_token: Option<String>,
}

impl Config {
    fn from_env() -> Result<Self> {
        let server_path =
            env::var("MCP_SERVER_PATH").context("MCP_SERVER_PATH environment variable is required")?;
        let auth_token = env::var("AUTH_TOKEN").ok().filter(|t| !t.trim().is_empty());
        if auth_token.is_none() {
            eprintln!("AUTH_TOKEN is not set; tool calls will be rejected as unauthenticated");
        }
        Ok(Self {
            server_path,
            auth_token,
        })
    }
}

/// Add `_meta.auth_token` to a `tools/call` request; other messages pass through
fn inject_token(mut message: Value, token: &str) -> Value {
    if message.get("method").and_then(Value::as_str) != Some("tools/call") {
        return message;
    }
    let Some(request) = message.as_object_mut() else {
        return message;
    };
    let params = request
        .entry("params")
        .or_insert_with(|| Value::Object(Map::new()));
    if let Some(params) = params.as_object_mut() {
        let meta = params
            .entry("_meta")
            .or_insert_with(|| Value::Object(Map::new()));
        if let Some(meta) = meta.as_object_mut() {
            meta.entry("auth_token")
                .or_insert_with(|| Value::String(token.to_owned()));
        }
    }
    message
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    let mut child = Command::new(&config.server_path)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("failed to start MCP server at {}", config.server_path))?;

    let mut server_stdin = child.stdin.take().context("server stdin unavailable")?;
    let server_stdout = child.stdout.take().context("server stdout unavailable")?;

    let downstream = tokio::spawn(async move {
        let mut lines = BufReader::new(server_stdout).lines();
        let mut stdout = tokio::io::stdout();
        while let Some(line) = lines.next_line().await? {
            stdout.write_all(line.as_bytes()).await?;
            stdout.write_all(b"\n").await?;
            stdout.flush().await?;
        }
        Ok::<(), std::io::Error>(())
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let forwarded = match (&config.auth_token, serde_json::from_str::<Value>(&line)) {
            (Some(token), Ok(message)) => serde_json::to_string(&inject_token(message, token))?,
            // The server answers malformed input with a parse error
            _ => line,
        };
        server_stdin.write_all(forwarded.as_bytes()).await?;
        server_stdin.write_all(b"\n").await?;
        server_stdin.flush().await?;
    }

    // EOF: closing the server's stdin makes it cancel in-flight calls and exit
    drop(server_stdin);
    let status = child.wait().await.context("failed to wait for MCP server")?;
    downstream.await??;
    if !status.success() {
        anyhow::bail!("MCP server exited with {status}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_token_injected_into_tool_calls_only() {
        let call = inject_token(
            json!({"jsonrpc": "2.0", "id": 1, "method": "tools/call", "params": {"name": "get_system_stats"}}),
            "valid-session-A",
        );
        assert_eq!(call["params"]["_meta"]["auth_token"], "valid-session-A");

        let list = inject_token(
            json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"}),
            "valid-session-A",
        );
        assert!(list.get("params").is_none());
    }

    #[test]
    fn test_existing_token_is_kept() {
        let call = inject_token(
            json!({"method": "tools/call", "params": {"name": "x", "_meta": {"auth_token": "mine"}}}),
            "env-token",
        );
        assert_eq!(call["params"]["_meta"]["auth_token"], "mine");
    }
}
