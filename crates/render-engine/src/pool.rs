//! Reusable frame buffers.
//!
//! Every frame the engine touches is checked out of a [`BufferPool`] sized to
//! the working resolution and handed back when the frame has been written,
//! so peak frame memory is `capacity` buffers plus those in use.

use lapse_common::RenderResult;
use serde::Serialize;

use crate::frame::{frame_len, FrameBuffer};

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub retained: usize,
    pub retained_bytes: usize,
    pub allocations: u64,
    pub reuses: u64,
    pub dropped_on_return: u64,
    pub trims: u64,
}

/// Bounded pool of equally sized frame buffers.
#[derive(Debug)]
pub struct BufferPool {
    width: u32,
    height: u32,
    capacity: usize,
    free: Vec<FrameBuffer>,
    stats: PoolStats,
}

impl BufferPool {
    pub fn new(width: u32, height: u32, capacity: usize) -> Self {
        Self {
            width,
            height,
            capacity,
            free: Vec::with_capacity(capacity),
            stats: PoolStats::default(),
        }
    }

    /// Take a buffer, allocating when none is free.
    ///
    /// Contents of a reused buffer are unspecified.
    pub fn checkout(&mut self) -> RenderResult<FrameBuffer> {
        if let Some(buffer) = self.free.pop() {
            self.stats.reuses += 1;
            self.sync_retained();
            return Ok(buffer);
        }
        let buffer = FrameBuffer::try_new(self.width, self.height)?;
        self.stats.allocations += 1;
        Ok(buffer)
    }

    /// Return a buffer. It is dropped if the pool is full or the size differs.
    pub fn give_back(&mut self, buffer: FrameBuffer) {
        if self.free.len() >= self.capacity || buffer.dimensions() != (self.width, self.height) {
            self.stats.dropped_on_return += 1;
            return;
        }
        self.free.push(buffer);
        self.sync_retained();
    }

    /// Release every retained buffer.
    pub fn trim(&mut self) {
        if self.free.is_empty() {
            return;
        }
        tracing::debug!(released = self.free.len(), "Trimming frame buffer pool");
        self.free.clear();
        self.free.shrink_to_fit();
        self.stats.trims += 1;
        self.sync_retained();
    }

    pub fn stats(&self) -> PoolStats {
        self.stats.clone()
    }

    fn sync_retained(&mut self) {
        self.stats.retained = self.free.len();
        self.stats.retained_bytes =
            self.free.len() * frame_len(self.width, self.height).unwrap_or(0);
    }
}
