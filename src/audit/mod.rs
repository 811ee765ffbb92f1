// ABOUTME: Asynchronous batched audit sink with mutation back-pressure
// ABOUTME: Handles open a record per tool call and enqueue it on close; a worker batches inserts
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nixopus

//! # Audit Sink
//!
//! Every tool call that got past identity resolution produces exactly one
//! `audit_logs` row, keyed by its request id. [`AuditSink::open`] captures who,
//! where and what; [`AuditHandle::close`] fills in the outcome and enqueues the
//! row. A handle dropped without being closed (the call was cancelled or its
//! task aborted) still enqueues a `cancelled` row.
//!
//! Records of calls whose required action can mutate state reserve their queue
//! slot at open time. When the queue is full, open waits up to the configured
//! back-pressure timeout and then fails, so no mutation runs unaudited. Read
//! records never wait; on overflow the oldest read records are dropped first.

/// Bounded queue with reservation and eviction
pub mod queue;
/// Secret redaction for audit metadata
pub mod redaction;

pub use queue::AuditStats;

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::database::AuditWriter;
use crate::errors::{AppError, AppResult, ErrorEnvelope};
use crate::mcp::context::RequestContext;
use nixopus_core::constants::audit::{
    DEFAULT_BACKPRESSURE_TIMEOUT_MS, DEFAULT_BATCH_SIZE, DEFAULT_FLUSH_INTERVAL_MS,
    DEFAULT_QUEUE_CAPACITY, WRITE_ATTEMPTS, WRITE_RETRY_DELAY_MS,
};
use nixopus_core::models::{AuditAction, AuditRecord, AuditStatus};
use queue::{AuditQueue, Reservation};
use redaction::{redact_text, redact_value, RedactionConfig};

/// Audit queue and batching configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Maximum queued plus reserved records
    pub queue_capacity: usize,
    /// Records per insert
    pub batch_size: usize,
    /// Maximum time a record waits before being flushed
    pub flush_interval: Duration,
    /// How long a mutation call waits for queue space
    pub backpressure_timeout: Duration,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            batch_size: DEFAULT_BATCH_SIZE,
            flush_interval: Duration::from_millis(DEFAULT_FLUSH_INTERVAL_MS),
            backpressure_timeout: Duration::from_millis(DEFAULT_BACKPRESSURE_TIMEOUT_MS),
        }
    }
}

/// Who and where a record is about, independent of how far the call got
#[derive(Debug, Clone)]
pub struct AuditOrigin {
    /// Tool invocation id
    pub request_id: Uuid,
    /// Acting user
    pub user_id: Uuid,
    /// Target organization, when it could be resolved
    pub organization_id: Option<Uuid>,
    /// Tool name
    pub tool_name: String,
    /// Whether the tool's required action can mutate state
    pub mutation: bool,
    /// Caller address
    pub ip_address: Option<String>,
    /// Caller user agent
    pub user_agent: Option<String>,
    /// Call start
    pub started_at: DateTime<Utc>,
}

impl From<&RequestContext> for AuditOrigin {
    fn from(ctx: &RequestContext) -> Self {
        Self {
            request_id: ctx.request_id,
            user_id: ctx.principal.user_id,
            organization_id: Some(ctx.organization_id),
            tool_name: ctx.tool_name.clone(),
            mutation: ctx.required_action.is_mutation(),
            ip_address: ctx.client_address.clone(),
            user_agent: ctx.user_agent.clone(),
            started_at: ctx.started_at,
        }
    }
}

struct SinkInner {
    queue: Arc<AuditQueue>,
    writer: Arc<dyn AuditWriter>,
    config: AuditConfig,
    redaction: RedactionConfig,
    shutdown: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
    flush_lock: tokio::sync::Mutex<()>,
}

/// Handle to the audit pipeline; cheap to clone
#[derive(Clone)]
pub struct AuditSink {
    inner: Arc<SinkInner>,
}

impl AuditSink {
    /// Start the sink and its flush worker on the current runtime
    #[must_use]
    pub fn start(writer: Arc<dyn AuditWriter>, config: AuditConfig) -> Self {
        let inner = Arc::new(SinkInner {
            queue: AuditQueue::new(config.queue_capacity),
            writer,
            config,
            redaction: RedactionConfig::default(),
            shutdown: CancellationToken::new(),
            worker: Mutex::new(None),
            flush_lock: tokio::sync::Mutex::new(()),
        });

        let worker = tokio::spawn(run_worker(Arc::clone(&inner)));
        *inner.worker.lock().unwrap_or_else(PoisonError::into_inner) = Some(worker);

        info!(
            capacity = inner.config.queue_capacity,
            batch_size = inner.config.batch_size,
            flush_interval_ms = inner.config.flush_interval.as_millis() as u64,
            "Audit sink started"
        );
        Self { inner }
    }

    /// Open the audit record of a call that passed authorization.
    ///
    /// # Errors
    ///
    /// Returns `AUDIT_UNAVAILABLE` (client kind `INTERNAL`) when the call can
    /// mutate state and no queue space frees up within the back-pressure timeout
    pub async fn open(
        &self,
        ctx: &RequestContext,
        action: AuditAction,
        resource: &str,
        resource_id: Option<Uuid>,
        old_values: Option<Value>,
    ) -> AppResult<AuditHandle> {
        let origin = AuditOrigin::from(ctx);
        let reservation = if origin.mutation {
            Some(
                self.inner
                    .queue
                    .reserve(self.inner.config.backpressure_timeout)
                    .await?,
            )
        } else {
            None
        };

        let old_values = old_values.map(|v| redact_value(&v, &self.inner.redaction));
        let record = self.build_record(&origin, action, resource, resource_id, old_values);
        debug!(request_id = %origin.request_id, "Audit record opened");

        Ok(AuditHandle {
            sink: self.clone(),
            record: Some(record),
            reservation,
        })
    }

    /// Record a call rejected before its handler ran (membership, feature,
    /// RBAC or organization resolution failure)
    pub async fn record_rejection(
        &self,
        origin: &AuditOrigin,
        action: AuditAction,
        resource: &str,
        status: AuditStatus,
        error: &AppError,
        arguments: Option<&Value>,
    ) {
        let mut record = self.build_record(origin, action, resource, None, None);
        record.status = status;
        if let Some(arguments) = arguments {
            self.insert_metadata(&mut record, "arguments", arguments);
        }
        self.attach_error(&mut record, error);

        if origin.mutation {
            match self
                .inner
                .queue
                .reserve(self.inner.config.backpressure_timeout)
                .await
            {
                Ok(reservation) => {
                    self.inner.queue.push_reserved(reservation, record);
                    return;
                }
                Err(e) => {
                    error!(request_id = %origin.request_id, error = %e, "No audit queue space for rejection record");
                }
            }
        }
        self.inner.queue.push_droppable(record);
    }

    /// Current queue counters
    #[must_use]
    pub fn stats(&self) -> AuditStats {
        self.inner.queue.stats()
    }

    /// Records waiting to be written
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.queue.len()
    }

    /// Write everything queued so far and wait for in-progress batches
    pub async fn flush(&self) {
        flush_all(&self.inner).await;
    }

    /// Stop the worker after a final flush
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let worker = self
            .inner
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                error!(error = %e, "Audit worker terminated abnormally");
            }
        }
        // Records enqueued by calls that finished during shutdown
        flush_all(&self.inner).await;
        info!(stats = ?self.stats(), "Audit sink stopped");
    }

    fn build_record(
        &self,
        origin: &AuditOrigin,
        action: AuditAction,
        resource: &str,
        resource_id: Option<Uuid>,
        old_values: Option<Value>,
    ) -> AuditRecord {
        AuditRecord {
            id: Uuid::new_v4(),
            user_id: origin.user_id,
            organization_id: origin.organization_id,
            action,
            resource_type: resource.to_owned(),
            resource_id,
            old_values,
            new_values: None,
            status: AuditStatus::Error,
            metadata: json!({ "tool": origin.tool_name }),
            ip_address: origin.ip_address.clone(),
            user_agent: origin
                .user_agent
                .as_deref()
                .map(|ua| redact_text(ua, &self.inner.redaction)),
            request_id: origin.request_id,
            created_at: origin.started_at,
        }
    }

    fn insert_metadata(&self, record: &mut AuditRecord, key: &str, value: &Value) {
        let redacted = redact_value(value, &self.inner.redaction);
        if let Value::Object(map) = &mut record.metadata {
            map.insert(key.to_owned(), redacted);
        } else {
            let mut map = Map::new();
            map.insert(key.to_owned(), redacted);
            record.metadata = Value::Object(map);
        }
    }

    fn attach_error(&self, record: &mut AuditRecord, error: &AppError) {
        let envelope = ErrorEnvelope::from_error(error, record.request_id);
        let mut details = json!({
            "kind": envelope.kind,
            "code": error.code,
            "message": redact_text(&error.message, &self.inner.redaction),
        });
        if let Some(auth_kind) = error.context.details.get("auth_kind") {
            details["auth_kind"] = auth_kind.clone();
        }
        self.insert_metadata(record, "error", &details);
    }

    fn enqueue(&self, record: AuditRecord, reservation: Option<Reservation>) {
        match reservation {
            Some(reservation) => self.inner.queue.push_reserved(reservation, record),
            None => self.inner.queue.push_droppable(record),
        }
    }
}

/// An open audit record; enqueued on [`Self::close`] or on drop
pub struct AuditHandle {
    sink: AuditSink,
    record: Option<AuditRecord>,
    reservation: Option<Reservation>,
}

impl AuditHandle {
    /// Request id of the record
    #[must_use]
    pub fn request_id(&self) -> Option<Uuid> {
        self.record.as_ref().map(|r| r.request_id)
    }

    /// Attach a redacted metadata entry
    pub fn annotate(&mut self, key: &str, value: &Value) {
        if let Some(record) = self.record.as_mut() {
            self.sink.insert_metadata(record, key, value);
        }
    }

    /// Complete the record with its outcome and enqueue it
    pub fn close(mut self, status: AuditStatus, new_values: Option<Value>, error: Option<&AppError>) {
        let Some(mut record) = self.record.take() else {
            return;
        };
        record.status = status;
        record.new_values = new_values.map(|v| redact_value(&v, &self.sink.inner.redaction));
        if let Some(error) = error {
            self.sink.attach_error(&mut record, error);
        }
        self.finish(record);
    }

    fn finish(&mut self, mut record: AuditRecord) {
        let elapsed = Utc::now()
            .signed_duration_since(record.created_at)
            .num_milliseconds()
            .max(0);
        self.sink
            .insert_metadata(&mut record, "duration_ms", &json!(elapsed));
        self.sink.enqueue(record, self.reservation.take());
    }
}

impl Drop for AuditHandle {
    fn drop(&mut self) {
        if let Some(mut record) = self.record.take() {
            record.status = AuditStatus::Cancelled;
            let error = AppError::cancelled("call ended before completion");
            self.sink.attach_error(&mut record, &error);
            warn!(request_id = %record.request_id, "Audit record closed by drop");
            self.finish(record);
        }
    }
}

async fn run_worker(inner: Arc<SinkInner>) {
    let mut ticker = tokio::time::interval(inner.config.flush_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = inner.shutdown.cancelled() => break,
            _ = ticker.tick() => {}
            () = inner.queue.wait_ready() => {
                if inner.queue.len() < inner.config.batch_size {
                    continue;
                }
            }
        }
        flush_all(&inner).await;
    }

    flush_all(&inner).await;
    debug!("Audit worker stopped");
}

/// Drain the queue in batches until it is empty
async fn flush_all(inner: &SinkInner) {
    let _guard = inner.flush_lock.lock().await;
    loop {
        let batch = inner.queue.drain(inner.config.batch_size.max(1));
        if batch.is_empty() {
            return;
        }
        write_with_retry(inner, &batch).await;
    }
}

async fn write_with_retry(inner: &SinkInner, batch: &[AuditRecord]) {
    for attempt in 1..=WRITE_ATTEMPTS {
        match inner.writer.write_batch(batch).await {
            Ok(()) => {
                inner.queue.record_written(batch.len());
                return;
            }
            Err(e) if attempt < WRITE_ATTEMPTS => {
                warn!(attempt, records = batch.len(), error = %e, "Audit batch write failed, retrying");
                tokio::time::sleep(Duration::from_millis(
                    WRITE_RETRY_DELAY_MS * u64::from(attempt),
                ))
                .await;
            }
            Err(e) => {
                inner.queue.record_failed_batch(batch.len());
                let request_ids: Vec<String> =
                    batch.iter().map(|r| r.request_id.to_string()).collect();
                error!(
                    records = batch.len(),
                    request_ids = ?request_ids,
                    error = %e,
                    "Audit batch write failed permanently"
                );
            }
        }
    }
}
