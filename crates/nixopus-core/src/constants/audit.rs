// ABOUTME: Audit sink constants for queue capacity, batch size and flush cadence
// ABOUTME: Values chosen so reads never stall tool calls while mutations keep their audit guarantee
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nixopus

/// Records written per insert batch
pub const DEFAULT_BATCH_SIZE: usize = 64;

/// Maximum time a record waits in the queue before a flush
pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 200;

/// Bounded queue capacity (records)
pub const DEFAULT_QUEUE_CAPACITY: usize = 4_096;

/// Maximum time a mutation waits for queue space
pub const DEFAULT_BACKPRESSURE_TIMEOUT_MS: u64 = 2_000;

/// Attempts made to persist a batch before it is reported lost
pub const WRITE_ATTEMPTS: u32 = 3;

/// Delay between batch write attempts in milliseconds
pub const WRITE_RETRY_DELAY_MS: u64 = 100;

/// Placeholder written in place of redacted values
pub const REDACTED_PLACEHOLDER: &str = "[REDACTED]";
