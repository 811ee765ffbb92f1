// ABOUTME: Single-flight coalescing of concurrent cache misses on the same key
// ABOUTME: One leader fetches from the backend; concurrent callers await its result
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nixopus

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::OnceCell;

use crate::errors::{AppError, AppResult, ErrorCode};

/// Error shared between the callers of one flight
#[derive(Debug, Clone)]
struct FlightError {
    code: ErrorCode,
    message: String,
}

impl From<AppError> for FlightError {
    fn from(error: AppError) -> Self {
        Self {
            code: error.code,
            message: error.message,
        }
    }
}

impl From<FlightError> for AppError {
    fn from(error: FlightError) -> Self {
        Self::new(error.code, error.message)
    }
}

type Flight<V> = Arc<OnceCell<Result<V, FlightError>>>;

/// Collapses concurrent fetches for the same key into one backend call.
///
/// A flight lives only while its fetch is running. Once settled it is removed,
/// so the next miss after an invalidation always starts a fresh fetch. If the
/// leading caller is cancelled mid-fetch, one of the waiters takes over.
pub struct SingleFlight<V> {
    flights: DashMap<String, Flight<V>>,
}

impl<V> Default for SingleFlight<V> {
    fn default() -> Self {
        Self {
            flights: DashMap::new(),
        }
    }
}

impl<V: Clone + Send + Sync> SingleFlight<V> {
    /// Create an empty flight table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `fetch` for `key` unless a flight for `key` is already running, in
    /// which case wait for that flight and return its outcome.
    ///
    /// # Errors
    ///
    /// Returns the error produced by the flight's fetch
    pub async fn run<F, Fut>(&self, key: &str, fetch: F) -> AppResult<V>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = AppResult<V>> + Send,
    {
        let flight = Arc::clone(self.flights.entry(key.to_owned()).or_default().value());

        let outcome = flight
            .get_or_init(move || async move { fetch().await.map_err(FlightError::from) })
            .await
            .clone();

        self.flights
            .remove_if(key, |_, current| Arc::ptr_eq(current, &flight));

        outcome.map_err(AppError::from)
    }

    /// Detach any running flight for `key`; later callers start a new fetch
    pub fn forget(&self, key: &str) {
        self.flights.remove(key);
    }

    /// Detach every running flight whose key satisfies `predicate`
    pub fn forget_matching(&self, predicate: impl Fn(&str) -> bool) {
        self.flights.retain(|key, _| !predicate(key));
    }

    /// Number of flights currently running
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.flights.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_concurrent_callers_share_one_fetch() -> AppResult<()> {
        let flights = Arc::new(SingleFlight::<u32>::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let flights = Arc::clone(&flights);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                flights
                    .run("rbac:u:o", || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(7)
                    })
                    .await
            }));
        }

        for handle in handles {
            let value = handle
                .await
                .map_err(|e| AppError::internal(e.to_string()))??;
            assert_eq!(value, 7);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(flights.in_flight(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_errors_are_shared_and_not_cached() {
        let flights = SingleFlight::<u32>::new();

        let first = flights
            .run("k", || async { Err(AppError::database("connection reset")) })
            .await;
        assert!(matches!(first, Err(ref e) if e.code == ErrorCode::DatabaseError));

        let second = flights.run("k", || async { Ok(1) }).await;
        assert_eq!(second.ok(), Some(1));
    }
}
