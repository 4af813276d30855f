//! # Resend-Request Queue
//!
//! Outbound "please resend sequence N" requests produced by gap detection.
//! A request is immediately sendable when created; once sent it backs off
//! 500 ms before it may go out again, each deadline followed by a 200 ms
//! urgency window. The request disappears the moment the missing packet
//! arrives.

use crate::clock::Millis;

/// Minimum spacing between consecutive requests for the same sequence.
pub const RESEND_BACKOFF_MS: Millis = 500;

/// How long past its active deadline a request may wait before it turns
/// urgent.
pub const RESEND_URGENCY_MS: Millis = 200;

/// One outstanding resend request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResendRequestItem {
    pub seq: u32,
    /// Earliest instant this request may go out (0 = immediately).
    pub active_at: Millis,
    /// Deadline after which this request justifies an empty packet.
    pub urgent_at: Millis,
}

/// Insertion-ordered queue of resend requests with per-item backoff.
/// Stays small: gaps never outnumber the 256-wide receive window.
pub struct ResendRequestQueue {
    items: Vec<ResendRequestItem>,
}

impl ResendRequestQueue {
    pub fn new() -> Self {
        ResendRequestQueue { items: Vec::new() }
    }

    /// Queue a request for a missing sequence. Duplicates are silently
    /// dropped; returns whether the queue changed.
    pub fn enqueue(&mut self, seq: u32, now: Millis) -> bool {
        if self.contains(seq) {
            return false;
        }
        self.items.push(ResendRequestItem {
            seq,
            active_at: 0,
            urgent_at: now + RESEND_URGENCY_MS,
        });
        true
    }

    /// Drop the request for `seq` — the missing packet arrived.
    pub fn remove(&mut self, seq: u32) -> bool {
        let before = self.items.len();
        self.items.retain(|item| item.seq != seq);
        self.items.len() != before
    }

    /// Sequences whose requests may go out now, in insertion order.
    pub fn due_now(&self, now: Millis) -> Vec<u32> {
        self.items
            .iter()
            .filter(|item| item.active_at <= now)
            .map(|item| item.seq)
            .collect()
    }

    /// Record that a request for `seq` was just sent: back off 500 ms and
    /// push the urgency deadline past the new active instant.
    pub fn mark_sent(&mut self, seq: u32, now: Millis) {
        if let Some(item) = self.items.iter_mut().find(|item| item.seq == seq) {
            item.active_at = now + RESEND_BACKOFF_MS;
            item.urgent_at = item.active_at + RESEND_URGENCY_MS;
        }
    }

    /// Earliest urgency deadline across all requests. A scan, not the front:
    /// `mark_sent` reorders deadlines.
    pub fn next_urgent(&self) -> Option<Millis> {
        self.items.iter().map(|item| item.urgent_at).min()
    }

    pub fn contains(&self, seq: u32) -> bool {
        self.items.iter().any(|item| item.seq == seq)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl Default for ResendRequestQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enqueue_is_idempotent() {
        let mut q = ResendRequestQueue::new();
        assert!(q.enqueue(7, 0));
        assert!(!q.enqueue(7, 50));
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn fresh_request_is_immediately_due() {
        let mut q = ResendRequestQueue::new();
        q.enqueue(7, 0);
        assert_eq!(q.due_now(0), vec![7]);
    }

    #[test]
    fn mark_sent_backs_off_exactly_500ms() {
        let mut q = ResendRequestQueue::new();
        q.enqueue(7, 0);
        q.mark_sent(7, 0);
        assert!(q.due_now(499).is_empty());
        assert_eq!(q.due_now(500), vec![7]);
    }

    #[test]
    fn remove_on_arrival() {
        let mut q = ResendRequestQueue::new();
        q.enqueue(7, 0);
        q.mark_sent(7, 0);
        assert!(q.remove(7));
        assert!(q.due_now(10_000).is_empty());
        assert!(!q.remove(7));
    }

    #[test]
    fn due_now_preserves_insertion_order() {
        let mut q = ResendRequestQueue::new();
        q.enqueue(9, 0);
        q.enqueue(3, 0);
        q.enqueue(6, 0);
        assert_eq!(q.due_now(0), vec![9, 3, 6]);
    }

    #[test]
    fn next_urgent_scans_past_resent_items() {
        let mut q = ResendRequestQueue::new();
        q.enqueue(1, 0); // urgent at 200
        q.enqueue(2, 0); // urgent at 200
        q.mark_sent(1, 100); // urgent at 800
        assert_eq!(q.next_urgent(), Some(RESEND_URGENCY_MS));
        q.mark_sent(2, 100);
        assert_eq!(q.next_urgent(), Some(100 + RESEND_BACKOFF_MS + RESEND_URGENCY_MS));
    }
}
