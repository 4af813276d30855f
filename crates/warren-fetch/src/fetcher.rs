//! # Block Fetchers
//!
//! The per-block retrieval transport, consumed behind traits. A segment
//! creates one fetcher per key; fetchers report back through the segment's
//! `on_success`/`on_failure`, identified by their token.

use anyhow::Result;

use crate::key::BlockKey;

/// Identifies a child fetch within its segment: data blocks occupy indices
/// `0..K`, check blocks `K..K+M`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockToken(pub usize);

impl BlockToken {
    pub fn index(self) -> usize {
        self.0
    }
}

/// A single-block fetch in flight.
pub trait BlockFetcher: Send {
    /// Begin (or resume) the fetch.
    fn schedule(&mut self);

    /// Best-effort cancellation. Completion callbacks racing past it must be
    /// harmless — the segment's slot guards absorb them.
    fn cancel(&mut self);

    /// Retrieval attempts made so far. Zero means the fetch never ran.
    fn retry_count(&self) -> u32;

    fn token(&self) -> BlockToken;
}

/// Creates child fetchers for a segment.
pub trait BlockFetcherProvider: Send + Sync {
    fn create(
        &self,
        key: &BlockKey,
        token: BlockToken,
        is_data: bool,
        recursion_level: u32,
        max_retries: u32,
    ) -> Result<Box<dyn BlockFetcher>>;
}
