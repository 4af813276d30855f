//! # Retransmit Cache
//!
//! Payloads of sent packets, held until the peer acknowledges them so a
//! resend request can be answered from memory. The cache doubles as the
//! sliding-window bound: sequence `N` may not be sent while `N − 256` is
//! still cached.
//!
//! The cache is purely in-memory; nothing survives a restart.

use bytes::Bytes;
use std::collections::HashMap;

/// Sliding window width: maximum unacked packets in flight per session.
pub const WINDOW: u32 = 256;

/// Map of sequence number → sent payload, with cheap lowest/highest bounds.
///
/// When non-empty, both bounds are members and every member lies within
/// them. Normal use populates the cache with monotonically increasing
/// sequences, but arbitrary insert orders are tolerated.
pub struct RetransmitCache {
    entries: HashMap<u32, Bytes>,
    lowest: Option<u32>,
    highest: Option<u32>,
}

impl RetransmitCache {
    pub fn new() -> Self {
        RetransmitCache {
            entries: HashMap::new(),
            lowest: None,
            highest: None,
        }
    }

    /// Record a sent payload awaiting acknowledgement.
    pub fn insert(&mut self, seq: u32, payload: Bytes) {
        self.entries.insert(seq, payload);
        self.highest = Some(self.highest.map_or(seq, |h| h.max(seq)));
        self.lowest = Some(self.lowest.map_or(seq, |l| l.min(seq)));
    }

    /// Evict a sequence (ack or explicit drop). Returns whether it was held.
    ///
    /// A vacated bound advances past non-members toward the other bound until
    /// a member is found; emptying the cache resets both bounds.
    pub fn remove(&mut self, seq: u32) -> bool {
        if self.entries.remove(&seq).is_none() {
            return false;
        }
        if self.entries.is_empty() {
            self.lowest = None;
            self.highest = None;
            return true;
        }
        if self.lowest == Some(seq) {
            let hi = self
                .highest
                .expect("non-empty retransmit cache lost its upper bound");
            let mut cur = seq + 1;
            loop {
                if self.entries.contains_key(&cur) {
                    break;
                }
                assert!(cur < hi, "retransmit cache bounds lost every member");
                cur += 1;
            }
            self.lowest = Some(cur);
        }
        if self.highest == Some(seq) {
            let lo = self
                .lowest
                .expect("non-empty retransmit cache lost its lower bound");
            let mut cur = seq - 1;
            loop {
                if self.entries.contains_key(&cur) {
                    break;
                }
                assert!(cur > lo, "retransmit cache bounds lost every member");
                cur -= 1;
            }
            self.highest = Some(cur);
        }
        true
    }

    pub fn contains(&self, seq: u32) -> bool {
        self.entries.contains_key(&seq)
    }

    /// Payload of a cached sequence, for answering a resend request.
    pub fn get(&self, seq: u32) -> Option<&Bytes> {
        self.entries.get(&seq)
    }

    /// Lowest cached sequence; `None` when empty.
    pub fn lowest(&self) -> Option<u32> {
        self.lowest
    }

    /// Highest cached sequence; `None` when empty.
    pub fn highest(&self) -> Option<u32> {
        self.highest
    }

    /// Whether sending `next_seq` would exceed the sliding window, i.e.
    /// `next_seq − 256` is still awaiting an ack.
    pub fn window_full(&self, next_seq: u32) -> bool {
        match next_seq.checked_sub(WINDOW) {
            Some(blocking) => self.contains(blocking),
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for RetransmitCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(tag: u8) -> Bytes {
        Bytes::from(vec![tag; 8])
    }

    #[test]
    fn empty_cache_has_no_bounds() {
        let cache = RetransmitCache::new();
        assert_eq!(cache.lowest(), None);
        assert_eq!(cache.highest(), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn insert_tracks_bounds() {
        let mut cache = RetransmitCache::new();
        cache.insert(5, payload(5));
        assert_eq!(cache.lowest(), Some(5));
        assert_eq!(cache.highest(), Some(5));

        cache.insert(9, payload(9));
        cache.insert(7, payload(7));
        assert_eq!(cache.lowest(), Some(5));
        assert_eq!(cache.highest(), Some(9));
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn insert_below_lowest_moves_lower_bound() {
        let mut cache = RetransmitCache::new();
        cache.insert(10, payload(1));
        cache.insert(3, payload(2));
        assert_eq!(cache.lowest(), Some(3));
        assert_eq!(cache.highest(), Some(10));
    }

    #[test]
    fn remove_advances_vacated_bounds() {
        let mut cache = RetransmitCache::new();
        for seq in [2u32, 5, 9] {
            cache.insert(seq, payload(seq as u8));
        }

        assert!(cache.remove(2));
        assert_eq!(cache.lowest(), Some(5));

        assert!(cache.remove(9));
        assert_eq!(cache.highest(), Some(5));

        assert!(cache.remove(5));
        assert_eq!(cache.lowest(), None);
        assert_eq!(cache.highest(), None);
    }

    #[test]
    fn remove_unknown_is_a_no_op() {
        let mut cache = RetransmitCache::new();
        cache.insert(1, payload(1));
        assert!(!cache.remove(42));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.lowest(), Some(1));
    }

    #[test]
    fn bounds_are_always_members() {
        let mut cache = RetransmitCache::new();
        for seq in 0..20u32 {
            cache.insert(seq, payload(seq as u8));
        }
        // Remove from the middle out, checking the invariant each step.
        for seq in [10u32, 0, 19, 1, 18, 5, 15] {
            cache.remove(seq);
            if !cache.is_empty() {
                let lo = cache.lowest().unwrap();
                let hi = cache.highest().unwrap();
                assert!(cache.contains(lo), "lowest {lo} must be a member");
                assert!(cache.contains(hi), "highest {hi} must be a member");
                assert!(lo <= hi);
            }
        }
    }

    #[test]
    fn window_full_at_exactly_256() {
        let mut cache = RetransmitCache::new();
        cache.insert(0, payload(0));
        assert!(!cache.window_full(255));
        assert!(cache.window_full(256), "seq 256 blocked while 0 unacked");
        assert!(!cache.window_full(257));

        cache.remove(0);
        assert!(!cache.window_full(256));
    }

    #[test]
    fn window_never_blocks_low_sequences() {
        let cache = RetransmitCache::new();
        // seq < 256 has no predecessor a window width below it
        assert!(!cache.window_full(0));
        assert!(!cache.window_full(255));
    }
}
