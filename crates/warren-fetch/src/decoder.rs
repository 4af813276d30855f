//! # Decoder Driver
//!
//! Runs the erasure reconstruction off the segment lock on a detached worker
//! thread, assembles the decoded payload, publishes the terminal state, and
//! finishes with the best-effort heal pass. The ordering in [`run`] is
//! load-bearing: `finished` must be observable before the owner is notified,
//! or the owner could see a live segment and drop the notification.

use std::io;
use std::sync::Arc;
use std::thread;

use tracing::{debug, warn};

use crate::bucket::{Bucket, BucketFactory};
use crate::codec::{codec_for, ErasureCodec};
use crate::error::FetchError;
use crate::heal::HEAL_UNTRIED_ONE_IN;
use crate::segment::{DecodeInput, SplitSegment};

/// Spawn the decode worker for a segment that just reached quorum. The
/// thread is detached — process shutdown does not wait for it.
pub(crate) fn spawn_decode(segment: Arc<SplitSegment>, input: DecodeInput) {
    thread::Builder::new()
        .name("warren-decode".into())
        .spawn(move || run(segment, input))
        .expect("failed to spawn decode worker");
}

fn run(segment: Arc<SplitSegment>, mut input: DecodeInput) {
    let k = segment.k();
    let block_size = segment.ctx().config.block_size;
    let factory = segment.ctx().buckets.clone();

    // Which slots never saw a successful fetch — decode fills the data side
    // in a moment, so snapshot first. These are the heal candidates.
    let never_fetched: Vec<bool> = input
        .data
        .iter()
        .chain(input.check.iter())
        .map(|slot| slot.is_none())
        .collect();

    let codec = codec_for(segment.split_type(), k, segment.m());

    // 1. Reconstruct missing data blocks. Non-redundant splits skip this.
    if let Some(codec) = codec.as_deref() {
        if let Err(err) = codec.decode(&mut input.data, &mut input.check, block_size, factory.as_ref()) {
            warn!(error = %err, "erasure decode failed");
            segment.fail(FetchError::Bucket(err.to_string()));
            return;
        }
    }

    // 2. Concatenate the data blocks in index order.
    let output = match assemble(&input.data, factory.as_ref(), block_size, k) {
        Ok(bucket) => bucket,
        Err(err) => {
            warn!(error = %err, "could not assemble decoded payload");
            segment.fail(FetchError::Bucket(err.to_string()));
            return;
        }
    };

    // 3. Terminal state becomes observable before the owner hears about it.
    if !segment.publish_decoded(output) {
        debug!("segment already failed; discarding decoded payload");
        return;
    }

    // 4. Best-effort healing. Nothing here can fail the finished segment.
    heal_pass(&segment, input, &never_fetched, codec.as_deref());

    // Block references drop with `input` when the worker returns.
}

/// Concatenate `data[0..k)` into a fresh output bucket.
fn assemble(
    data: &[Option<Box<dyn Bucket>>],
    factory: &dyn BucketFactory,
    block_size: usize,
    k: usize,
) -> io::Result<Box<dyn Bucket>> {
    let mut output = factory.make_bucket(Some((k * block_size) as u64))?;
    for (index, slot) in data.iter().enumerate() {
        let Some(block) = slot else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("data block {index} still missing after decode"),
            ));
        };
        let bytes = block.read_all()?;
        output.write_all(&bytes)?;
    }
    Ok(output)
}

/// Offer reconstructed blocks back to the network. A block whose fetcher
/// actually ran is always offered; one whose fetch never started goes out
/// with probability 1/5.
fn heal_pass(
    segment: &SplitSegment,
    mut input: DecodeInput,
    never_fetched: &[bool],
    codec: Option<&dyn ErasureCodec>,
) {
    let ctx = segment.ctx();

    // Re-encode missing check blocks so they can be offered too. Decode does
    // not guarantee them filled.
    if let Some(codec) = codec {
        if let Err(err) = codec.encode(
            &input.data,
            &mut input.check,
            ctx.config.block_size,
            ctx.buckets.as_ref(),
        ) {
            warn!(error = %err, "check re-encode failed; healing data blocks only");
        }
    }

    let k = segment.k();
    for (index, &missing) in never_fetched.iter().enumerate() {
        if !missing {
            continue;
        }
        let tried = input.retry_counts.get(index).copied().unwrap_or(0) > 0;
        if !tried && ctx.rng.uniform(HEAL_UNTRIED_ONE_IN) != 0 {
            continue;
        }
        let slot = if index < k {
            input.data[index].as_ref()
        } else {
            input.check[index - k].as_ref()
        };
        let Some(block) = slot else {
            debug!(index, "missing block never reconstructed; cannot heal");
            continue;
        };
        match block.read_all() {
            Ok(bytes) => ctx.heal.queue_heal(segment.key_at(index).clone(), bytes),
            Err(err) => debug!(index, error = %err, "could not read block for heal"),
        }
    }
}
