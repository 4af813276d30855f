//! # Healing
//!
//! Opportunistic re-insertion of blocks the fetch had to reconstruct. A
//! block whose fetcher actually tried and failed is always offered back to
//! the network; a block that was never tried (its fetch got cancelled at
//! quorum) is offered with probability 1/5, keeping the background insert
//! load proportional to observed scarcity.
//!
//! The insertion service itself is out of scope — the handoff is
//! fire-and-forget.

use bytes::Bytes;
use rand::RngExt;
use tracing::trace;

use crate::key::BlockKey;

/// One-in-N chance an untried block is re-inserted.
pub const HEAL_UNTRIED_ONE_IN: u32 = 5;

/// Fire-and-forget handoff to the insertion service.
pub trait HealQueue: Send + Sync {
    fn queue_heal(&self, key: BlockKey, block: Bytes);
}

/// Uniform integer source behind the probabilistic heal decision.
pub trait HealRng: Send + Sync {
    /// Uniform draw in `0..n`.
    fn uniform(&self, n: u32) -> u32;
}

// ─── Default Implementations ────────────────────────────────────────────────

/// `rand`-backed draw.
#[derive(Debug, Default, Clone)]
pub struct ThreadLocalRng;

impl HealRng for ThreadLocalRng {
    fn uniform(&self, n: u32) -> u32 {
        rand::rng().random_range(0..n)
    }
}

/// Heal queue for nodes with no insertion service wired up.
#[derive(Debug, Default, Clone)]
pub struct DiscardHealQueue;

impl HealQueue for DiscardHealQueue {
    fn queue_heal(&self, _key: BlockKey, block: Bytes) {
        trace!(len = block.len(), "no insertion service; heal dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thread_local_draw_stays_in_range() {
        let rng = ThreadLocalRng;
        for _ in 0..100 {
            assert!(rng.uniform(HEAL_UNTRIED_ONE_IN) < HEAL_UNTRIED_ONE_IN);
        }
    }
}
