//! # Peer Session
//!
//! Per-remote-node reliability state: retransmit cache, ack queue, and
//! resend-request queue behind one facade, keyed by the peer's keyspace
//! location and transport address.
//!
//! ```text
//!   inbound datagram ──▶ packet_received(seq) ──▶ ack queued + gaps filled
//!   inbound ack      ──▶ ack_received(seq)    ──▶ cache eviction
//!   outbound path    ──▶ sent(seq, payload)   ──▶ cached until acked
//!                        control_batch(now)   ──▶ piggybacked acks/resends
//! ```
//!
//! The session itself has no failure states — it is a queuing substrate.
//! When shared with a flusher thread, wrap it in a `Mutex` and perform every
//! operation under that lock.

use bytes::Bytes;
use std::sync::{Arc, Mutex};

use crate::ack_queue::AckQueue;
use crate::cache::{RetransmitCache, WINDOW};
use crate::clock::Millis;
use crate::resend_queue::ResendRequestQueue;
use crate::stats::PeerStats;

// ─── Location ───────────────────────────────────────────────────────────────

/// A point in the circular normalized keyspace `[0, 1)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Location(f64);

impl Location {
    /// Validates the keyspace range; `None` for values outside `[0, 1)`.
    pub fn new(value: f64) -> Option<Location> {
        (0.0..1.0).contains(&value).then_some(Location(value))
    }

    pub fn value(self) -> f64 {
        self.0
    }

    /// Circular distance: the shorter way around the ring.
    pub fn distance(self, other: Location) -> f64 {
        let d = (self.0 - other.0).abs();
        d.min(1.0 - d)
    }
}

/// Resolvable datagram endpoint of the remote node.
pub type PeerAddress = std::net::SocketAddr;

// ─── Configuration ──────────────────────────────────────────────────────────

/// Session tuning parameters.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Maximum acks piggybacked on a single outbound packet.
    pub max_acks_per_packet: usize,
    /// Maximum resend requests piggybacked on a single outbound packet.
    pub max_resends_per_packet: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            max_acks_per_packet: 64,
            max_resends_per_packet: 64,
        }
    }
}

// ─── Control Batch ──────────────────────────────────────────────────────────

/// Control items drained for one outbound packet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControlBatch {
    /// Sequences being acknowledged, oldest first.
    pub acks: Vec<u32>,
    /// Sequences whose retransmission we are requesting.
    pub resend_requests: Vec<u32>,
}

impl ControlBatch {
    pub fn is_empty(&self) -> bool {
        self.acks.is_empty() && self.resend_requests.is_empty()
    }
}

// ─── Errors ─────────────────────────────────────────────────────────────────

/// Busy indicator: the sliding window is full. The send becomes possible
/// again once the blocking sequence is acked (or dropped).
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("sliding window full: seq {seq} blocked until seq {blocking} is acked")]
pub struct WindowFull {
    pub seq: u32,
    pub blocking: u32,
}

// ─── Session ────────────────────────────────────────────────────────────────

/// Reliability state for one remote peer.
///
/// Location and address are fixed at handshake; replacing either means a new
/// session.
pub struct PeerSession {
    location: Location,
    address: PeerAddress,
    cache: RetransmitCache,
    acks: AckQueue,
    resends: ResendRequestQueue,
    last_received_seq: Option<u32>,
    config: SessionConfig,
    stats: PeerStats,
}

/// A session shared with its flusher thread.
pub type SharedSession = Arc<Mutex<PeerSession>>;

impl PeerSession {
    pub fn new(location: Location, address: PeerAddress) -> Self {
        Self::with_config(location, address, SessionConfig::default())
    }

    pub fn with_config(location: Location, address: PeerAddress, config: SessionConfig) -> Self {
        PeerSession {
            location,
            address,
            cache: RetransmitCache::new(),
            acks: AckQueue::new(),
            resends: ResendRequestQueue::new(),
            last_received_seq: None,
            config,
            stats: PeerStats::new(),
        }
    }

    /// Whether `seq` fits in the sliding window right now.
    pub fn can_send(&self, seq: u32) -> bool {
        !self.cache.window_full(seq)
    }

    /// Record a sent payload. Returns the busy indicator when `seq − 256` is
    /// still unacked; progress resumes on the ack that evicts it.
    pub fn sent(&mut self, seq: u32, payload: Bytes) -> Result<(), WindowFull> {
        if let Some(blocking) = seq.checked_sub(WINDOW) {
            if self.cache.contains(blocking) {
                return Err(WindowFull { seq, blocking });
            }
        }
        self.cache.insert(seq, payload);
        self.stats.packets_sent += 1;
        Ok(())
    }

    /// The peer acknowledged `seq`. Idempotent; commutes across distinct
    /// sequences.
    pub fn ack_received(&mut self, seq: u32) -> bool {
        let evicted = self.cache.remove(seq);
        if evicted {
            self.stats.acks_received += 1;
        }
        evicted
    }

    /// A packet arrived from the peer.
    ///
    /// Always queues an ack. A sequence below the newest seen is a requested
    /// retransmission catching up and clears its resend request; a repeat of
    /// the newest is acked and nothing else; a sequence ahead queues a resend
    /// request for every gap it skipped.
    pub fn packet_received(&mut self, seq: u32, now: Millis) {
        self.stats.packets_received += 1;
        self.acks.enqueue(seq, now);

        match self.last_received_seq {
            Some(last) if seq < last => {
                if self.resends.remove(seq) {
                    self.stats.retransmissions_received += 1;
                } else {
                    self.stats.duplicates += 1;
                }
            }
            Some(last) if seq == last => {
                self.stats.duplicates += 1;
            }
            _ => {
                let first_gap = self.last_received_seq.map_or(0, |last| last + 1);
                for gap in first_gap..seq {
                    if self.resends.enqueue(gap, now) {
                        self.stats.resend_requests_queued += 1;
                    }
                }
                self.last_received_seq = Some(seq);
            }
        }
    }

    /// Earliest deadline at which a queued control item justifies emitting an
    /// otherwise-empty packet. `None` when nothing is pending.
    pub fn next_urgent_at(&self) -> Option<Millis> {
        match (self.acks.next_urgent(), self.resends.next_urgent()) {
            (Some(a), Some(r)) => Some(a.min(r)),
            (a, r) => a.or(r),
        }
    }

    /// Evict a cached payload under memory pressure without treating it as
    /// acked. The peer will never get a retransmission of it.
    pub fn drop_cached(&mut self, seq: u32) -> bool {
        let evicted = self.cache.remove(seq);
        if evicted {
            self.stats.cache_drops += 1;
        }
        evicted
    }

    /// Drain control items for one outbound packet: queued acks (capped) and
    /// every resend request whose backoff has expired, which is marked sent.
    pub fn control_batch(&mut self, now: Millis) -> ControlBatch {
        let acks = self.acks.drain_for_send(self.config.max_acks_per_packet);

        let mut resend_requests = self.resends.due_now(now);
        resend_requests.truncate(self.config.max_resends_per_packet);
        for &seq in &resend_requests {
            self.resends.mark_sent(seq, now);
        }

        self.stats.acks_sent += acks.len() as u64;
        self.stats.resend_requests_sent += resend_requests.len() as u64;
        ControlBatch {
            acks,
            resend_requests,
        }
    }

    // ─── Accessors ───────────────────────────────────────────────────────

    pub fn location(&self) -> Location {
        self.location
    }

    pub fn address(&self) -> PeerAddress {
        self.address
    }

    /// Newest sequence seen from the peer; `None` before the first packet.
    pub fn last_received_seq(&self) -> Option<u32> {
        self.last_received_seq
    }

    /// Read-only view of the retransmit cache.
    pub fn cache(&self) -> &RetransmitCache {
        &self.cache
    }

    /// Number of resend requests currently outstanding.
    pub fn pending_resend_requests(&self) -> usize {
        self.resends.len()
    }

    /// Number of acks currently queued.
    pub fn pending_acks(&self) -> usize {
        self.acks.len()
    }

    pub fn stats(&self) -> &PeerStats {
        &self.stats
    }
}
