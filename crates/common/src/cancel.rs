//! Cooperative cancellation.
//!
//! A [`CancellationToken`] is observed at suspension points and never
//! preempts work in flight. Running operations are tracked by ID in a
//! [`CancellationCoordinator`]; once an operation finishes its ID is simply
//! unknown, and cancelling it is a no-op.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

/// A cancellation flag shared between an operation and its controller.
#[derive(Clone, Default)]
pub struct CancellationToken {
    inner: Arc<TokenInner>,
}

#[derive(Default)]
struct TokenInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Returns `true` only for the call that flipped the flag.
    pub fn cancel(&self) -> bool {
        let first = !self.inner.cancelled.swap(true, Ordering::SeqCst);
        if first {
            self.inner.notify.notify_waiters();
        }
        first
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once the token is cancelled.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    /// Sleep for `duration`, waking early on cancellation.
    ///
    /// Returns `false` when the sleep was cut short.
    pub async fn sleep(&self, duration: std::time::Duration) -> bool {
        if duration.is_zero() {
            return !self.is_cancelled();
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => !self.is_cancelled(),
            _ = self.cancelled() => false,
        }
    }
}

impl fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Identifier of a registered operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OperationId(u64);

impl OperationId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op-{}", self.0)
    }
}

/// What kind of work an operation performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Import,
    Upgrade,
    Render,
}

#[derive(Debug)]
struct ActiveOperation {
    kind: OperationKind,
    token: CancellationToken,
}

/// Registry of running operations and their cancellation tokens.
#[derive(Debug, Default)]
pub struct CancellationCoordinator {
    next_id: AtomicU64,
    active: Mutex<HashMap<OperationId, ActiveOperation>>,
}

impl CancellationCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new operation and hand out its token.
    pub fn register(&self, kind: OperationKind) -> (OperationId, CancellationToken) {
        let id = OperationId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let token = CancellationToken::new();
        self.lock().insert(
            id,
            ActiveOperation {
                kind,
                token: token.clone(),
            },
        );
        tracing::debug!(%id, ?kind, "Operation registered");
        (id, token)
    }

    /// Cancel a running operation.
    ///
    /// Returns `false` if the operation already finished, was already
    /// cancelled, or was never registered.
    pub fn cancel(&self, id: OperationId) -> bool {
        let token = self.lock().get(&id).map(|op| op.token.clone());
        Self::request(id, token)
    }

    /// Cancel `id` only if it was registered as `kind`.
    pub fn cancel_as(&self, id: OperationId, kind: OperationKind) -> bool {
        let token = self
            .lock()
            .get(&id)
            .filter(|op| op.kind == kind)
            .map(|op| op.token.clone());
        Self::request(id, token)
    }

    fn request(id: OperationId, token: Option<CancellationToken>) -> bool {
        match token {
            Some(token) => {
                let first = token.cancel();
                if first {
                    tracing::info!(%id, "Operation cancellation requested");
                }
                first
            }
            None => false,
        }
    }

    /// Cancel every running operation of one kind. Returns how many were newly cancelled.
    pub fn cancel_kind(&self, kind: OperationKind) -> usize {
        let tokens: Vec<(OperationId, CancellationToken)> = self
            .lock()
            .iter()
            .filter(|(_, op)| op.kind == kind)
            .map(|(id, op)| (*id, op.token.clone()))
            .collect();

        let mut cancelled = 0;
        for (id, token) in tokens {
            if token.cancel() {
                tracing::info!(%id, ?kind, "Operation cancellation requested");
                cancelled += 1;
            }
        }
        cancelled
    }

    /// Mark an operation as finished and forget it.
    pub fn finish(&self, id: OperationId) {
        if self.lock().remove(&id).is_some() {
            tracing::debug!(%id, "Operation finished");
        }
    }

    /// Whether the operation is still registered.
    pub fn is_active(&self, id: OperationId) -> bool {
        self.lock().contains_key(&id)
    }

    /// Number of registered operations.
    pub fn active_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<OperationId, ActiveOperation>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
