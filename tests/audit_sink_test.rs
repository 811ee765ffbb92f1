// ABOUTME: Integration tests for the batched audit sink
// ABOUTME: Covers read-first eviction, mutation back-pressure, retries, redaction and drop-closing
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nixopus

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use common::{Harness, RecordingAuditWriter};
use nixopus_core::models::{Action, AuditAction, AuditStatus};
use nixopus_mcp_server::audit::{AuditConfig, AuditOrigin, AuditSink};
use nixopus_mcp_server::errors::{AppError, ErrorCode};
use serde_json::json;

/// Queue that is never flushed by the worker on its own
fn held_config(queue_capacity: usize) -> AuditConfig {
    AuditConfig {
        queue_capacity,
        batch_size: 100,
        flush_interval: Duration::from_secs(3600),
        backpressure_timeout: Duration::from_millis(50),
    }
}

#[tokio::test]
async fn test_closed_record_carries_outcome() -> Result<()> {
    let h = Harness::new();
    let ctx = h.request_context("echo", Action::Read)?;

    let mut handle = h
        .audit
        .open(&ctx, AuditAction::Access, "dashboard", None, None)
        .await?;
    handle.annotate("arguments", &json!({"message": "hi"}));
    handle.close(AuditStatus::Success, Some(json!({"ok": true})), None);

    let rows = h.audit_rows().await;
    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert_eq!(row.request_id, ctx.request_id);
    assert_eq!(row.user_id, h.user.user_id);
    assert_eq!(row.organization_id, Some(h.org1));
    assert_eq!(row.action, AuditAction::Access);
    assert_eq!(row.resource_type, "dashboard");
    assert_eq!(row.status, AuditStatus::Success);
    assert_eq!(row.new_values, Some(json!({"ok": true})));
    assert_eq!(row.metadata["tool"], "echo");
    assert_eq!(row.metadata["arguments"]["message"], "hi");
    assert!(row.metadata["duration_ms"].is_u64());
    Ok(())
}

#[tokio::test]
async fn test_secrets_are_redacted_from_metadata() -> Result<()> {
    let h = Harness::new();
    let ctx = h.request_context("run_command", Action::Execute)?;

    let mut handle = h
        .audit
        .open(&ctx, AuditAction::Access, "ssh", None, None)
        .await?;
    handle.annotate(
        "arguments",
        &json!({"command": "deploy", "password": "hunter2", "api_key": "sk-live-123"}),
    );
    handle.close(AuditStatus::Success, None, None);

    let rows = h.audit_rows().await;
    let arguments = &rows[0].metadata["arguments"];
    assert_eq!(arguments["command"], "deploy");
    assert_ne!(arguments["password"], "hunter2");
    assert_ne!(arguments["api_key"], "sk-live-123");
    Ok(())
}

#[tokio::test]
async fn test_dropped_handle_records_cancellation() -> Result<()> {
    let h = Harness::new();
    let ctx = h.request_context("echo", Action::Read)?;

    let handle = h
        .audit
        .open(&ctx, AuditAction::Access, "dashboard", None, None)
        .await?;
    drop(handle);

    let rows = h.audit_rows().await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, AuditStatus::Cancelled);
    assert_eq!(rows[0].metadata["error"]["kind"], "CANCELLED");
    Ok(())
}

#[tokio::test]
async fn test_read_records_are_evicted_oldest_first() -> Result<()> {
    let h = Harness::with_audit_config(held_config(2));

    let mut request_ids = Vec::new();
    for _ in 0..3 {
        let ctx = h.request_context("echo", Action::Read)?;
        request_ids.push(ctx.request_id);
        h.audit
            .open(&ctx, AuditAction::Access, "dashboard", None, None)
            .await?
            .close(AuditStatus::Success, None, None);
    }
    assert_eq!(h.audit.stats().dropped, 1);
    assert_eq!(h.audit.pending(), 2);

    let rows = h.audit_rows().await;
    let written: Vec<_> = rows.iter().map(|r| r.request_id).collect();
    assert_eq!(written, request_ids[1..]);
    Ok(())
}

#[tokio::test]
async fn test_mutation_waits_for_space_then_fails() -> Result<()> {
    let h = Harness::with_audit_config(held_config(2));

    let first = h.request_context("run_command", Action::Execute)?;
    let second = h.request_context("run_command", Action::Execute)?;
    let a = h
        .audit
        .open(&first, AuditAction::Access, "ssh", None, None)
        .await?;
    let b = h
        .audit
        .open(&second, AuditAction::Access, "ssh", None, None)
        .await?;

    let third = h.request_context("run_command", Action::Execute)?;
    let err = h
        .audit
        .open(&third, AuditAction::Access, "ssh", None, None)
        .await
        .err()
        .ok_or_else(|| anyhow!("opened past capacity"))?;
    assert_eq!(err.code, ErrorCode::AuditUnavailable);

    a.close(AuditStatus::Success, None, None);
    b.close(AuditStatus::Success, None, None);
    h.audit.flush().await;

    let fourth = h.request_context("run_command", Action::Execute)?;
    h.audit
        .open(&fourth, AuditAction::Access, "ssh", None, None)
        .await?
        .close(AuditStatus::Success, None, None);

    let rows = h.audit_rows().await;
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|r| r.request_id != third.request_id));
    assert_eq!(h.audit.stats().dropped, 0);
    Ok(())
}

#[tokio::test]
async fn test_mutation_evicts_queued_read_records() -> Result<()> {
    let h = Harness::with_audit_config(held_config(1));

    let read = h.request_context("echo", Action::Read)?;
    h.audit
        .open(&read, AuditAction::Access, "dashboard", None, None)
        .await?
        .close(AuditStatus::Success, None, None);

    let mutation = h.request_context("run_command", Action::Execute)?;
    h.audit
        .open(&mutation, AuditAction::Access, "ssh", None, None)
        .await?
        .close(AuditStatus::Success, None, None);

    let rows = h.audit_rows().await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].request_id, mutation.request_id);
    assert_eq!(h.audit.stats().dropped, 1);
    Ok(())
}

#[tokio::test]
async fn test_mutation_open_unblocks_when_worker_drains() -> Result<()> {
    let h = Harness::with_audit_config(AuditConfig {
        queue_capacity: 1,
        batch_size: 1,
        flush_interval: Duration::from_millis(10),
        backpressure_timeout: Duration::from_secs(2),
    });

    let first = h.request_context("run_command", Action::Execute)?;
    h.audit
        .open(&first, AuditAction::Access, "ssh", None, None)
        .await?
        .close(AuditStatus::Success, None, None);

    // Space frees once the worker takes the first record
    let second = h.request_context("run_command", Action::Execute)?;
    h.audit
        .open(&second, AuditAction::Access, "ssh", None, None)
        .await?
        .close(AuditStatus::Success, None, None);

    assert_eq!(h.audit_rows().await.len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_failed_batches_are_retried() -> Result<()> {
    common::init_test_logging();
    let writer = Arc::new(RecordingAuditWriter::default());
    writer.failures_left.store(2, Ordering::SeqCst);
    let sink = AuditSink::start(writer.clone(), common::fast_audit_config());
    let h = Harness::new();
    let ctx = h.request_context("echo", Action::Read)?;

    sink.open(&ctx, AuditAction::Access, "dashboard", None, None)
        .await?
        .close(AuditStatus::Success, None, None);
    sink.shutdown().await;

    assert_eq!(writer.rows().len(), 1);
    let stats = sink.stats();
    assert_eq!(stats.written, 1);
    assert_eq!(stats.failed_batches, 0);
    Ok(())
}

#[tokio::test]
async fn test_rejection_records_error_details() -> Result<()> {
    let h = Harness::new();
    let ctx = h.request_context("run_command", Action::Execute)?;
    let error = AppError::permission_denied("ssh", Action::Execute);

    h.audit
        .record_rejection(
            &AuditOrigin::from(&ctx),
            AuditAction::Access,
            "ssh",
            AuditStatus::Denied,
            &error,
            Some(&json!({"command": "ls"})),
        )
        .await;

    let rows = h.audit_rows().await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, AuditStatus::Denied);
    assert_eq!(rows[0].metadata["error"]["kind"], "FORBIDDEN");
    assert_eq!(rows[0].metadata["arguments"]["command"], "ls");
    Ok(())
}
