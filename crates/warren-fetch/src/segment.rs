//! # Split Segment
//!
//! Coordinates the fetch of one erasure-coded segment: K data blocks plus M
//! check blocks, any K of which reconstruct the original. Child fetches run
//! concurrently; their completion callbacks mutate the segment under its
//! lock; the decode runs on a detached worker once a quorum arrives.
//!
//! ```text
//!   schedule ──▶ fetching ──fetched ≥ K──▶ decoding ──▶ finished (data)
//!                   │                          │
//!             failures > M, cancel       storage error
//!                   └───────▶ finished (failure) ◀──────┘
//! ```
//!
//! Both `started_decode` and `finished` are monotone; late callbacks that
//! lose a cancellation race observe them (or an already-vacated key slot)
//! and return without effect. The owner hears `segment_finished` exactly
//! once, strictly after `finished` is observable.

use serde::Serialize;
use std::io::{self, Write};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tracing::{debug, warn};

use crate::bucket::{Bucket, BucketFactory};
use crate::codec::SplitType;
use crate::decoder;
use crate::error::{BlockError, ErrorHistogram, FetchError};
use crate::fetcher::{BlockFetcher, BlockFetcherProvider, BlockToken};
use crate::heal::{HealQueue, HealRng};
use crate::key::BlockKey;

// ─── Configuration ──────────────────────────────────────────────────────────

/// Fetch tuning parameters.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Erasure block size in bytes.
    pub block_size: usize,
    /// Retry budget handed to each child fetcher.
    pub max_retries: u32,
}

impl Default for FetchConfig {
    fn default() -> Self {
        FetchConfig {
            block_size: crate::codec::BLOCK_SIZE,
            max_retries: 3,
        }
    }
}

// ─── Parameters & Context ───────────────────────────────────────────────────

/// Geometry and metadata for one segment.
#[derive(Debug, Clone)]
pub struct SegmentParams {
    pub split: SplitType,
    pub data_keys: Vec<BlockKey>,
    pub check_keys: Vec<BlockKey>,
    /// Recursion depth of the enclosing fetch.
    pub recursion_level: u32,
    /// Variable-length blocks push children one level deeper; fixed-size
    /// splits reset children to level 0.
    pub variable_block_size: bool,
}

impl SegmentParams {
    /// Build params from raw segment metadata. The split-type field is the
    /// one piece parsed here; an unknown value is a metadata error before
    /// any segment exists.
    pub fn from_metadata(
        raw_split: u16,
        data_keys: Vec<BlockKey>,
        check_keys: Vec<BlockKey>,
        recursion_level: u32,
        variable_block_size: bool,
    ) -> Result<SegmentParams, FetchError> {
        Ok(SegmentParams {
            split: SplitType::from_metadata(raw_split)?,
            data_keys,
            check_keys,
            recursion_level,
            variable_block_size,
        })
    }
}

/// Shared collaborators handed to every segment.
#[derive(Clone)]
pub struct FetchContext {
    pub buckets: Arc<dyn BucketFactory>,
    pub fetchers: Arc<dyn BlockFetcherProvider>,
    pub heal: Arc<dyn HealQueue>,
    pub rng: Arc<dyn HealRng>,
    pub config: FetchConfig,
}

/// Upward notification target. Invoked exactly once per segment, after
/// `finished` is observable.
pub trait SegmentOwner: Send + Sync {
    fn segment_finished(&self, segment: &SplitSegment);
}

/// Serializable view of the segment's counters.
#[derive(Debug, Clone, Serialize)]
pub struct SegmentSnapshot {
    pub fetched: usize,
    pub failed: usize,
    pub fatally_failed: usize,
    pub started_decode: bool,
    pub finished: bool,
}

// ─── Inner State ────────────────────────────────────────────────────────────

/// Everything moved to the decode worker at the quorum transition.
pub(crate) struct DecodeInput {
    pub(crate) data: Vec<Option<Box<dyn Bucket>>>,
    pub(crate) check: Vec<Option<Box<dyn Bucket>>>,
    /// Attempt counts snapshotted from the children, indexed by token.
    pub(crate) retry_counts: Vec<u32>,
}

struct SegmentInner {
    // Key slots are vacated when their block is delivered or fails for good;
    // a vacated slot is the double-delivery and cancellation-race guard.
    data_keys: Vec<Option<BlockKey>>,
    check_keys: Vec<Option<BlockKey>>,
    data_blocks: Vec<Option<Box<dyn Bucket>>>,
    check_blocks: Vec<Option<Box<dyn Bucket>>>,
    /// Child fetchers, arena-indexed by block token.
    children: Vec<Option<Box<dyn BlockFetcher>>>,
    fetched: usize,
    failed: usize,
    fatally_failed: usize,
    started_decode: bool,
    finished: bool,
    failure: Option<FetchError>,
    errors: ErrorHistogram,
    decoded: Option<Box<dyn Bucket>>,
}

impl SegmentInner {
    /// Clear the key slot for `index`. False when already vacated (duplicate
    /// or post-cancel delivery) or out of range.
    fn vacate(&mut self, index: usize, k: usize) -> bool {
        let slot = if index < k {
            self.data_keys.get_mut(index)
        } else {
            self.check_keys.get_mut(index - k)
        };
        match slot {
            Some(slot) if slot.is_some() => {
                *slot = None;
                true
            }
            _ => false,
        }
    }

    /// Cancel every child still holding a handle — both block arrays live in
    /// the one token-indexed arena.
    fn cancel_children(&mut self) {
        for child in self.children.iter_mut().flatten() {
            child.cancel();
        }
    }

    /// Terminal failure transition. False when the segment already finished.
    fn fail_locked(&mut self, err: FetchError) -> bool {
        if self.finished {
            return false;
        }
        self.finished = true;
        self.failure = Some(err);
        self.cancel_children();
        self.children.clear();
        true
    }
}

// ─── Segment ────────────────────────────────────────────────────────────────

/// One redundant split-file segment fetch.
pub struct SplitSegment {
    split: SplitType,
    k: usize,
    m: usize,
    /// Blocks needed before decode can start (K for both split types).
    min_fetched: usize,
    recursion_level: u32,
    variable_block_size: bool,
    /// Pristine key copy for the heal pass — the working slots get vacated.
    keys: Vec<BlockKey>,
    ctx: FetchContext,
    owner: Weak<dyn SegmentOwner>,
    inner: Mutex<SegmentInner>,
}

impl SplitSegment {
    pub fn new(params: SegmentParams, ctx: FetchContext, owner: Weak<dyn SegmentOwner>) -> Arc<Self> {
        let k = params.data_keys.len();
        let m = params.check_keys.len();
        let inner = SegmentInner {
            data_keys: params.data_keys.iter().cloned().map(Some).collect(),
            check_keys: params.check_keys.iter().cloned().map(Some).collect(),
            data_blocks: (0..k).map(|_| None).collect(),
            check_blocks: (0..m).map(|_| None).collect(),
            children: Vec::new(),
            fetched: 0,
            failed: 0,
            fatally_failed: 0,
            started_decode: false,
            finished: false,
            failure: None,
            errors: ErrorHistogram::new(),
            decoded: None,
        };
        let mut keys = params.data_keys;
        keys.extend(params.check_keys);
        Arc::new(SplitSegment {
            split: params.split,
            k,
            m,
            min_fetched: k,
            recursion_level: params.recursion_level,
            variable_block_size: params.variable_block_size,
            keys,
            ctx,
            owner,
            inner: Mutex::new(inner),
        })
    }

    /// Validate the key arrays and launch the K+M child fetches.
    ///
    /// Unsupported key variants fail the segment with `InvalidMetadata`; a
    /// malformed key array or any child setup error fails it with
    /// `InvalidUri`. Either way the owner is notified.
    pub fn schedule(self: &Arc<Self>) -> Result<(), FetchError> {
        if self.k == 0 {
            return Err(self.fail(FetchError::InvalidUri(
                "split segment has no data keys".into(),
            )));
        }
        if self.split == SplitType::NonRedundant && self.m != 0 {
            return Err(self.fail(FetchError::InvalidUri(
                "non-redundant segment carries check keys".into(),
            )));
        }
        if self.split.is_redundant() && self.k + self.m > 256 {
            return Err(self.fail(FetchError::InvalidUri(
                "segment geometry exceeds codec capacity".into(),
            )));
        }
        if self.keys.iter().any(|key| key.is_updatable()) {
            return Err(self.fail(FetchError::InvalidMetadata(
                "updatable key inside a split segment".into(),
            )));
        }

        let child_level = if self.variable_block_size {
            self.recursion_level + 1
        } else {
            0
        };

        let mut children: Vec<Option<Box<dyn BlockFetcher>>> = Vec::with_capacity(self.k + self.m);
        for (index, key) in self.keys.iter().enumerate() {
            let created = self.ctx.fetchers.create(
                key,
                BlockToken(index),
                index < self.k,
                child_level,
                self.ctx.config.max_retries,
            );
            match created {
                Ok(child) => children.push(Some(child)),
                Err(err) => {
                    return Err(self.fail(FetchError::InvalidUri(format!(
                        "block fetcher setup failed: {err}"
                    ))));
                }
            }
        }
        for child in children.iter_mut().flatten() {
            child.schedule();
        }

        let mut inner = self.lock_inner();
        if inner.started_decode || inner.finished {
            // Completions raced ahead of us, or the segment was cancelled
            // while the children were being built.
            for child in children.iter_mut().flatten() {
                child.cancel();
            }
            return match &inner.failure {
                Some(err) => Err(err.clone()),
                None => Ok(()),
            };
        }
        inner.children = children;
        Ok(())
    }

    /// A child delivered its block.
    pub fn on_success(self: &Arc<Self>, token: BlockToken, block: Box<dyn Bucket>) {
        let input = {
            let mut inner = self.lock_inner();
            if inner.finished || inner.started_decode {
                debug!(index = token.index(), "late success discarded");
                return;
            }
            let index = token.index();
            if index >= self.k + self.m {
                warn!(index, "success for unknown block token");
                return;
            }
            if !inner.vacate(index, self.k) {
                debug!(index, "duplicate delivery for vacated slot");
                return;
            }
            if index < self.k {
                inner.data_blocks[index] = Some(block);
            } else {
                inner.check_blocks[index - self.k] = Some(block);
            }
            inner.fetched += 1;

            if inner.fetched >= self.min_fetched {
                inner.started_decode = true;
                inner.cancel_children();
                Some(self.take_decode_input(&mut inner))
            } else {
                None
            }
        };

        if let Some(input) = input {
            decoder::spawn_decode(Arc::clone(self), input);
        }
    }

    /// A child gave up on its block.
    pub fn on_failure(&self, token: BlockToken, err: BlockError) {
        let notify = {
            let mut inner = self.lock_inner();
            if inner.finished || inner.started_decode {
                debug!(index = token.index(), "late failure discarded");
                return;
            }
            let index = token.index();
            if index >= self.k + self.m {
                warn!(index, "failure for unknown block token");
                return;
            }
            if !inner.vacate(index, self.k) {
                debug!(index, "duplicate failure for vacated slot");
                return;
            }
            if err.fatal {
                inner.fatally_failed += 1;
            } else {
                inner.failed += 1;
            }
            inner.errors.record(err.code);
            if let Some(counts) = &err.counts {
                inner.errors.merge(counts);
            }

            // With fewer than K fetchable blocks left, decode can never run.
            let tolerable = self.m; // K + M − min_fetched
            if inner.failed + inner.fatally_failed > tolerable {
                let err = FetchError::Splitfile(inner.errors.clone());
                inner.fail_locked(err)
            } else {
                false
            }
        };
        if notify {
            self.notify_owner();
        }
    }

    /// Externally requested termination. Idempotent.
    pub fn cancel(&self) {
        self.fail(FetchError::Cancelled);
    }

    // ─── Accessors ───────────────────────────────────────────────────────

    pub fn is_finished(&self) -> bool {
        self.lock_inner().finished
    }

    pub fn failure(&self) -> Option<FetchError> {
        self.lock_inner().failure.clone()
    }

    pub fn fetched_count(&self) -> usize {
        self.lock_inner().fetched
    }

    pub fn error_histogram(&self) -> ErrorHistogram {
        self.lock_inner().errors.clone()
    }

    /// Size of the decoded payload, once finished successfully.
    pub fn decoded_len(&self) -> Option<u64> {
        self.lock_inner().decoded.as_ref().map(|b| b.len())
    }

    /// Stream the decoded payload into `sink`, up to `limit` bytes
    /// (`None` = everything). Errors before a successful decode.
    pub fn write_decoded_to(&self, sink: &mut dyn Write, limit: Option<u64>) -> io::Result<u64> {
        let inner = self.lock_inner();
        let Some(bucket) = inner.decoded.as_ref() else {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                "segment has no decoded data",
            ));
        };
        bucket.copy_to(sink, limit)
    }

    /// Child fetches still running. A lower bound only.
    pub fn running_blocks(&self) -> usize {
        0
    }

    pub fn snapshot(&self) -> SegmentSnapshot {
        let inner = self.lock_inner();
        SegmentSnapshot {
            fetched: inner.fetched,
            failed: inner.failed,
            fatally_failed: inner.fatally_failed,
            started_decode: inner.started_decode,
            finished: inner.finished,
        }
    }

    pub fn split_type(&self) -> SplitType {
        self.split
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn m(&self) -> usize {
        self.m
    }

    pub fn recursion_level(&self) -> u32 {
        self.recursion_level
    }

    // ─── Crate Internals ─────────────────────────────────────────────────

    pub(crate) fn ctx(&self) -> &FetchContext {
        &self.ctx
    }

    pub(crate) fn key_at(&self, index: usize) -> &BlockKey {
        &self.keys[index]
    }

    /// Publish a successful decode: terminal state first, owner second.
    /// False when a failure won the race — the output is discarded.
    pub(crate) fn publish_decoded(&self, output: Box<dyn Bucket>) -> bool {
        let published = {
            let mut inner = self.lock_inner();
            if inner.finished {
                false
            } else {
                inner.decoded = Some(output);
                inner.finished = true;
                true
            }
        };
        if published {
            self.notify_owner();
        }
        published
    }

    /// Terminal failure; notifies the owner when this call won the
    /// transition. Returns the error for caller convenience.
    pub(crate) fn fail(&self, err: FetchError) -> FetchError {
        let notify = {
            let mut inner = self.lock_inner();
            inner.fail_locked(err.clone())
        };
        if notify {
            self.notify_owner();
        }
        err
    }

    fn take_decode_input(&self, inner: &mut SegmentInner) -> DecodeInput {
        let retry_counts = (0..self.k + self.m)
            .map(|index| {
                inner
                    .children
                    .get(index)
                    .and_then(|child| child.as_ref())
                    .map_or(0, |child| child.retry_count())
            })
            .collect();
        inner.children.clear();
        DecodeInput {
            data: std::mem::take(&mut inner.data_blocks),
            check: std::mem::take(&mut inner.check_blocks),
            retry_counts,
        }
    }

    /// Never called under the lock — the owner may immediately turn around
    /// and query the segment.
    fn notify_owner(&self) {
        match self.owner.upgrade() {
            Some(owner) => owner.segment_finished(self),
            None => debug!("segment finished with no owner left to notify"),
        }
    }

    fn lock_inner(&self) -> MutexGuard<'_, SegmentInner> {
        self.inner.lock().expect("segment state lock poisoned")
    }
}
