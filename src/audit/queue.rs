// ABOUTME: Bounded audit queue with reserved slots for mutation records and read-first eviction
// ABOUTME: Mutation records wait for space; read records are dropped oldest-first on overflow
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nixopus

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Notify;
use tracing::warn;

use crate::errors::{AppError, AppResult};
use nixopus_core::models::AuditRecord;

/// Counters exposed through [`super::AuditSink::stats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AuditStats {
    /// Records accepted into the queue
    pub enqueued: u64,
    /// Records persisted by the writer
    pub written: u64,
    /// Read-class records discarded on overflow
    pub dropped: u64,
    /// Batches that exhausted their write attempts
    pub failed_batches: u64,
    /// Records lost with failed batches
    pub lost: u64,
}

#[derive(Default)]
struct Counters {
    enqueued: AtomicU64,
    written: AtomicU64,
    dropped: AtomicU64,
    failed_batches: AtomicU64,
    lost: AtomicU64,
}

struct QueuedRecord {
    record: AuditRecord,
    protected: bool,
}

#[derive(Default)]
struct QueueState {
    entries: VecDeque<QueuedRecord>,
    reserved: usize,
}

impl QueueState {
    fn occupied(&self) -> usize {
        self.entries.len() + self.reserved
    }

    /// Remove the oldest record that may be dropped
    fn evict_oldest_droppable(&mut self) -> Option<AuditRecord> {
        let index = self.entries.iter().position(|queued| !queued.protected)?;
        self.entries.remove(index).map(|queued| queued.record)
    }
}

/// Bounded queue shared by the sink handles and the flush worker
pub(crate) struct AuditQueue {
    state: Mutex<QueueState>,
    capacity: usize,
    space: Notify,
    ready: Notify,
    counters: Counters,
}

/// A slot held for a mutation record; released if dropped unused
pub(crate) struct Reservation {
    queue: Arc<AuditQueue>,
    active: bool,
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if self.active {
            self.queue.lock().reserved -= 1;
            self.queue.space.notify_waiters();
        }
    }
}

impl AuditQueue {
    pub(crate) fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(QueueState::default()),
            capacity: capacity.max(1),
            space: Notify::new(),
            ready: Notify::new(),
            counters: Counters::default(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        // Queue state stays consistent across a panicking holder
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn note_dropped(&self, record: &AuditRecord) {
        self.counters.dropped.fetch_add(1, Ordering::Relaxed);
        warn!(
            request_id = %record.request_id,
            resource_type = %record.resource_type,
            "Audit queue full, dropped read-class audit record"
        );
    }

    fn try_reserve(&self) -> bool {
        let mut state = self.lock();
        if state.occupied() < self.capacity {
            state.reserved += 1;
            return true;
        }
        if let Some(evicted) = state.evict_oldest_droppable() {
            state.reserved += 1;
            drop(state);
            self.note_dropped(&evicted);
            return true;
        }
        false
    }

    /// Reserve a slot, waiting up to `timeout` for space
    pub(crate) async fn reserve(self: &Arc<Self>, timeout: Duration) -> AppResult<Reservation> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.space.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.try_reserve() {
                return Ok(Reservation {
                    queue: Arc::clone(self),
                    active: true,
                });
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                if self.try_reserve() {
                    return Ok(Reservation {
                        queue: Arc::clone(self),
                        active: true,
                    });
                }
                return Err(AppError::audit_unavailable(format!(
                    "no audit queue space within {}ms",
                    timeout.as_millis()
                )));
            }
        }
    }

    /// Enqueue a protected record into its reserved slot
    pub(crate) fn push_reserved(&self, mut reservation: Reservation, record: AuditRecord) {
        reservation.active = false;
        {
            let mut state = self.lock();
            state.reserved -= 1;
            state.entries.push_back(QueuedRecord {
                record,
                protected: true,
            });
        }
        self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
        self.ready.notify_one();
    }

    /// Enqueue a droppable record, evicting older droppable records if full
    pub(crate) fn push_droppable(&self, record: AuditRecord) {
        let mut state = self.lock();
        let evicted = if state.occupied() < self.capacity {
            None
        } else {
            match state.evict_oldest_droppable() {
                Some(evicted) => Some(evicted),
                None => {
                    drop(state);
                    self.note_dropped(&record);
                    return;
                }
            }
        };
        state.entries.push_back(QueuedRecord {
            record,
            protected: false,
        });
        drop(state);

        if let Some(evicted) = evicted {
            self.note_dropped(&evicted);
        }
        self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
        self.ready.notify_one();
    }

    /// Take up to `max` records from the head of the queue
    pub(crate) fn drain(&self, max: usize) -> Vec<AuditRecord> {
        let batch: Vec<AuditRecord> = {
            let mut state = self.lock();
            let take = max.min(state.entries.len());
            state.entries.drain(..take).map(|queued| queued.record).collect()
        };
        if !batch.is_empty() {
            self.space.notify_waiters();
        }
        batch
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub(crate) async fn wait_ready(&self) {
        self.ready.notified().await;
    }

    pub(crate) fn record_written(&self, count: usize) {
        self.counters
            .written
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_failed_batch(&self, count: usize) {
        self.counters.failed_batches.fetch_add(1, Ordering::Relaxed);
        self.counters.lost.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn stats(&self) -> AuditStats {
        AuditStats {
            enqueued: self.counters.enqueued.load(Ordering::Relaxed),
            written: self.counters.written.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            failed_batches: self.counters.failed_batches.load(Ordering::Relaxed),
            lost: self.counters.lost.load(Ordering::Relaxed),
        }
    }
}
