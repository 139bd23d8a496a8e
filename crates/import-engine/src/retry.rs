//! Bounded retry bookkeeping for failed fetches.

use std::collections::VecDeque;

use lapse_common::ImportError;
use lapse_photo_model::SourceAssetRef;

/// An asset whose fetch failed, with the number of failed attempts so far.
#[derive(Debug, Clone)]
pub struct RetryEntry {
    pub asset: SourceAssetRef,
    /// Position of the asset in the import input.
    pub index: usize,
    pub attempts: u32,
    pub last_error: ImportError,
}

impl RetryEntry {
    pub fn record_failure(&mut self, error: ImportError) {
        self.attempts += 1;
        self.last_error = error;
    }
}

/// FIFO of failed fetches. No entry ever holds more than `max_attempts` failures.
#[derive(Debug)]
pub struct RetryQueue {
    max_attempts: u32,
    entries: VecDeque<RetryEntry>,
}

impl RetryQueue {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            entries: VecDeque::new(),
        }
    }

    /// Queue an asset after its first failed fetch.
    pub fn push(&mut self, asset: SourceAssetRef, index: usize, error: ImportError) {
        self.entries.push_back(RetryEntry {
            asset,
            index,
            attempts: 1,
            last_error: error,
        });
    }

    pub fn pop(&mut self) -> Option<RetryEntry> {
        self.entries.pop_front()
    }

    /// Whether an entry has used up its attempts.
    pub fn is_exhausted(&self, entry: &RetryEntry) -> bool {
        entry.attempts >= self.max_attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RetryEntry> {
        self.entries.iter()
    }
}
