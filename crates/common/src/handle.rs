//! Handles to operations running on the tokio runtime.

use tokio::task::JoinHandle;

use crate::cancel::OperationId;
use crate::error::{LapseError, LapseResult};

/// A spawned operation, identified by its registry ID.
///
/// Dropping the handle detaches the task; cancel it through the
/// coordinator instead.
#[derive(Debug)]
pub struct OperationHandle<T> {
    id: OperationId,
    join: JoinHandle<T>,
}

impl<T> OperationHandle<T> {
    pub fn new(id: OperationId, join: JoinHandle<T>) -> Self {
        Self { id, join }
    }

    pub fn id(&self) -> OperationId {
        self.id
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the terminal result.
    pub async fn wait(self) -> LapseResult<T> {
        self.join.await.map_err(|e| {
            LapseError::Other(anyhow::anyhow!("operation {} did not complete: {e}", self.id))
        })
    }
}
