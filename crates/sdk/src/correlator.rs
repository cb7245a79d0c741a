//! Request correlator: matches inbound responses to in-flight requests.
//!
//! Each pending request owns a single-use `oneshot::Sender`.  Whoever removes
//! the entry from the table (a response, the deadline, or a connection close)
//! is the only party able to settle it, so a request is resolved exactly once.
//! The table lock is held only for insert/remove, never across I/O.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::types::{ClientError, CloseReason};

/// Settlement of a single request.
pub type Outcome = Result<Value, ClientError>;

struct PendingRequest {
    created_at: Instant,
    tx: oneshot::Sender<Outcome>,
}

/// Table of in-flight requests keyed by correlation id.
#[derive(Default)]
pub struct Correlator {
    pending: Mutex<HashMap<String, PendingRequest>>,
    unmatched: AtomicU64,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `id` with a deadline `timeout` from now.
    ///
    /// Must be called before the request is written so a fast response can
    /// never race ahead of its entry.
    pub fn register(self: &Arc<Self>, id: impl Into<String>, timeout: Duration) -> PendingResponse {
        let id = id.into();
        let (tx, rx) = oneshot::channel();
        let created_at = Instant::now();

        let prev = self
            .pending
            .lock()
            .insert(id.clone(), PendingRequest { created_at, tx });
        debug_assert!(prev.is_none(), "correlation id collision: {id}");

        PendingResponse {
            id,
            deadline: created_at + timeout,
            timeout,
            rx,
            correlator: Arc::clone(self),
        }
    }

    /// Settle the request `id` with `outcome`.
    ///
    /// Returns `false` when no such request is pending (late, duplicate, or
    /// unsolicited); the message is counted and otherwise ignored.
    pub fn complete(&self, id: &str, outcome: Outcome) -> bool {
        let entry = self.pending.lock().remove(id);
        match entry {
            Some(pending) => {
                tracing::trace!(
                    request_id = %id,
                    elapsed_ms = pending.created_at.elapsed().as_millis() as u64,
                    "request settled"
                );
                let _ = pending.tx.send(outcome);
                true
            }
            None => {
                self.unmatched.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(request_id = %id, "response for unknown request");
                false
            }
        }
    }

    /// Fail every pending request with `ConnectionClosed(reason)`.
    /// Returns the number of requests failed.
    pub fn fail_all(&self, reason: CloseReason) -> usize {
        let drained: Vec<(String, PendingRequest)> = self.pending.lock().drain().collect();
        let count = drained.len();

        for (_, pending) in drained {
            let _ = pending.tx.send(Err(ClientError::ConnectionClosed(reason)));
        }

        if count > 0 {
            tracing::warn!(
                failed_requests = count,
                reason = %reason,
                "failed in-flight requests"
            );
        }
        count
    }

    /// Number of pending (in-flight) requests.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Number of inbound responses that matched nothing.
    pub fn unmatched_count(&self) -> u64 {
        self.unmatched.load(Ordering::Relaxed)
    }

    fn take(&self, id: &str) -> Option<PendingRequest> {
        self.pending.lock().remove(id)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Waiter
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Handle to one pending request.
///
/// Dropping it without awaiting removes the entry, so an abandoned request
/// never lingers in the table.
pub struct PendingResponse {
    id: String,
    deadline: Instant,
    timeout: Duration,
    rx: oneshot::Receiver<Outcome>,
    correlator: Arc<Correlator>,
}

impl PendingResponse {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Instant at which [`wait`](Self::wait) gives up.
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Wait for the response, the deadline, or a connection close.
    pub async fn wait(mut self) -> Outcome {
        match tokio::time::timeout_at(self.deadline, &mut self.rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(ClientError::Shutdown),
            Err(_) => {
                if self.correlator.take(&self.id).is_some() {
                    tracing::debug!(
                        request_id = %self.id,
                        timeout_ms = self.timeout.as_millis() as u64,
                        "request timed out"
                    );
                    return Err(ClientError::RequestTimeout {
                        id: self.id.clone(),
                        after: self.timeout,
                    });
                }
                // A resolver removed the entry just before the deadline; its
                // outcome is already on the way.
                match (&mut self.rx).await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(ClientError::Shutdown),
                }
            }
        }
    }
}

impl Drop for PendingResponse {
    fn drop(&mut self) {
        self.correlator.take(&self.id);
    }
}
