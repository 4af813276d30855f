//! # Fetch Errors
//!
//! Terminal segment failures, the per-block error reports children send
//! upward, and the mergeable code histogram they accumulate into.

use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

// ─── Error Histogram ────────────────────────────────────────────────────────

/// Per-block error codes → occurrence counts. Codes are opaque transport
/// values; ordered map keeps the export deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ErrorHistogram {
    counts: BTreeMap<u16, u32>,
}

impl ErrorHistogram {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one occurrence of `code`.
    pub fn record(&mut self, code: u16) {
        *self.counts.entry(code).or_insert(0) += 1;
    }

    /// Fold another histogram into this one.
    pub fn merge(&mut self, other: &ErrorHistogram) {
        for (&code, &count) in &other.counts {
            *self.counts.entry(code).or_insert(0) += count;
        }
    }

    /// Occurrences of a single code.
    pub fn count(&self, code: u16) -> u32 {
        self.counts.get(&code).copied().unwrap_or(0)
    }

    /// Total occurrences across all codes.
    pub fn total(&self) -> u64 {
        self.counts.values().map(|&c| c as u64).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u16, u32)> + '_ {
        self.counts.iter().map(|(&code, &count)| (code, count))
    }
}

// ─── Block-Level Errors ─────────────────────────────────────────────────────

/// Why a child block fetch gave up, reported to its segment.
#[derive(Debug, Clone)]
pub struct BlockError {
    /// Transport-level error code, opaque to the segment.
    pub code: u16,
    /// Whether the block is permanently unavailable (authoritative negative
    /// result) rather than a drained retry budget.
    pub fatal: bool,
    /// Histogram the child accumulated across its own retries, if any.
    pub counts: Option<ErrorHistogram>,
}

impl BlockError {
    /// Retry budget drained; the block may still exist.
    pub fn exhausted(code: u16) -> Self {
        BlockError {
            code,
            fatal: false,
            counts: None,
        }
    }

    /// The block is permanently unavailable.
    pub fn permanent(code: u16) -> Self {
        BlockError {
            code,
            fatal: true,
            counts: None,
        }
    }

    pub fn with_counts(mut self, counts: ErrorHistogram) -> Self {
        self.counts = Some(counts);
        self
    }
}

// ─── Segment-Level Errors ───────────────────────────────────────────────────

/// Terminal segment failures surfaced to the owner.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The key array itself was unusable, or child setup failed outright.
    #[error("invalid split segment: {0}")]
    InvalidUri(String),
    /// Segment metadata names something that cannot appear here.
    #[error("invalid split metadata: {0}")]
    InvalidMetadata(String),
    /// Blob storage failed while decoding.
    #[error("storage failure while decoding segment: {0}")]
    Bucket(String),
    /// Too many blocks failed for a decode to ever succeed.
    #[error("split segment unrecoverable after {} block failures", .0.total())]
    Splitfile(ErrorHistogram),
    /// Externally requested termination.
    #[error("segment cancelled")]
    Cancelled,
}
