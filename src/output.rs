//! Bounded, newest-first collection of recent results.

use crate::image::{AssetType, GenerationResult, ProviderId, Style};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use uuid::Uuid;

/// Number of results kept when no capacity is given.
pub const DEFAULT_OUTPUT_CAPACITY: usize = 6;

/// A stored result, ready for display or insertion.
#[derive(Debug, Clone, Serialize)]
pub struct OutputEntry {
    pub id: Uuid,
    pub image_ref: String,
    pub prompt: String,
    pub style: Style,
    pub asset_type: AssetType,
    pub provider: ProviderId,
    pub is_fallback: bool,
    pub created_at: DateTime<Utc>,
}

impl OutputEntry {
    /// Wraps a successful result; results without an image are skipped.
    fn from_result(result: &GenerationResult) -> Option<Self> {
        if !result.success {
            return None;
        }
        let image_ref = result.image_ref.clone()?;
        Some(Self {
            id: Uuid::new_v4(),
            image_ref,
            prompt: result.prompt.clone(),
            style: result.style,
            asset_type: result.asset_type,
            provider: result.provider,
            is_fallback: result.is_fallback,
            created_at: Utc::now(),
        })
    }
}

/// Fixed-capacity buffer; the oldest entries are evicted first.
///
/// Process-lifetime state only. Callers serialize mutation (the
/// orchestrator keeps it behind a mutex).
#[derive(Debug, Clone)]
pub struct OutputBuffer {
    entries: VecDeque<OutputEntry>,
    capacity: usize,
}

impl Default for OutputBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_OUTPUT_CAPACITY)
    }
}

impl OutputBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Inserts a batch in order, so its last result ends up newest.
    /// Returns how many entries were stored.
    pub fn push(&mut self, results: &[GenerationResult]) -> usize {
        let mut stored = 0;
        for entry in results.iter().filter_map(OutputEntry::from_result) {
            self.entries.push_front(entry);
            stored += 1;
        }
        self.evict_overflow();
        stored
    }

    /// Drops the oldest entries beyond capacity; returns how many were dropped.
    pub fn evict_overflow(&mut self) -> usize {
        let overflow = self.entries.len().saturating_sub(self.capacity);
        self.entries.truncate(self.capacity);
        overflow
    }

    /// Entries, newest first.
    pub fn list(&self) -> Vec<OutputEntry> {
        self.entries.iter().cloned().collect()
    }
}
