//! Operation lifecycle status and the external store of record.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

/// Lifecycle status reported to the external status store. The store itself
/// is authoritative; this crate only drives transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationStatus {
    Pending,
    InProgress,
    Succeeded,
    Failed,
    Cancelled,
    Unknown,
}

impl OperationStatus {
    /// The wire name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::InProgress => "IN_PROGRESS",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure talking to the status store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("status store: {message}")]
pub struct StatusStoreError {
    pub message: String,
}

impl StatusStoreError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

/// The external service of record for operation lifecycle status.
///
/// Updates are assumed idempotent; the same id may be set to the same status
/// more than once. Implementations are shared across workers and must be
/// concurrency-safe.
#[async_trait]
pub trait StatusStore: Send + Sync {
    async fn update_status(
        &self,
        operation_id: &str,
        status: OperationStatus,
    ) -> Result<(), StatusStoreError>;
}

/// In-memory status store for tests: records every call and can be scripted
/// to fail the next N updates.
#[derive(Debug, Default)]
pub struct InMemoryStatusStore {
    state: Mutex<StoreState>,
}

#[derive(Debug, Default)]
struct StoreState {
    calls: Vec<(String, OperationStatus)>,
    updates: Vec<(String, OperationStatus)>,
    fail_next: usize,
}

impl InMemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` updates with a transient error.
    pub fn fail_next(&self, count: usize) {
        self.lock().fail_next = count;
    }

    /// Every attempted update, including the scripted failures.
    pub fn calls(&self) -> Vec<(String, OperationStatus)> {
        self.lock().calls.clone()
    }

    /// Updates that were accepted, in order.
    pub fn updates(&self) -> Vec<(String, OperationStatus)> {
        self.lock().updates.clone()
    }

    /// Accepted statuses for a single operation, in order.
    pub fn updates_for(&self, operation_id: &str) -> Vec<OperationStatus> {
        self.lock()
            .updates
            .iter()
            .filter(|(id, _)| id == operation_id)
            .map(|(_, status)| *status)
            .collect()
    }

    /// The most recently accepted status for an operation.
    pub fn latest(&self, operation_id: &str) -> Option<OperationStatus> {
        self.updates_for(operation_id).last().copied()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl StatusStore for InMemoryStatusStore {
    async fn update_status(
        &self,
        operation_id: &str,
        status: OperationStatus,
    ) -> Result<(), StatusStoreError> {
        let mut state = self.lock();
        state.calls.push((operation_id.to_owned(), status));
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(StatusStoreError::new("scripted failure"));
        }
        state.updates.push((operation_id.to_owned(), status));
        Ok(())
    }
}
