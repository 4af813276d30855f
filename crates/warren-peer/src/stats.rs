//! # Session Statistics
//!
//! Per-session counters, serializable for export alongside node telemetry.

use serde::Serialize;

/// Counters for one peer session.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PeerStats {
    /// Payload packets recorded in the retransmit cache.
    pub packets_sent: u64,
    /// Packets received from the peer (including duplicates).
    pub packets_received: u64,
    /// Acks received that evicted a cached payload.
    pub acks_received: u64,
    /// Acks handed to outbound packets.
    pub acks_sent: u64,
    /// Duplicate receipts of the most recent sequence.
    pub duplicates: u64,
    /// Requested retransmissions that arrived.
    pub retransmissions_received: u64,
    /// Gap-detected resend requests queued.
    pub resend_requests_queued: u64,
    /// Resend requests actually sent (including re-sends after backoff).
    pub resend_requests_sent: u64,
    /// Cached payloads evicted under memory pressure, never acked.
    pub cache_drops: u64,
}

impl PeerStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fraction of sent packets already acknowledged.
    pub fn ack_ratio(&self) -> f64 {
        if self.packets_sent == 0 {
            0.0
        } else {
            self.acks_received as f64 / self.packets_sent as f64
        }
    }

    /// Fraction of received packets that were duplicates.
    pub fn duplicate_ratio(&self) -> f64 {
        if self.packets_received == 0 {
            0.0
        } else {
            self.duplicates as f64 / self.packets_received as f64
        }
    }
}
