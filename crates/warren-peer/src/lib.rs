//! # warren-peer
//!
//! Per-peer reliable datagram layer for the Warren overlay network.
//!
//! Layers acknowledgements, gap detection, resend requests, and a fixed
//! 256-packet sliding window atop an unreliable datagram transport. Pure
//! state machines — socket I/O, packet encryption, and overlay routing
//! live elsewhere and feed sequence numbers in.
//!
//! ## Crate structure
//!
//! - [`clock`] — monotonic millisecond urgency clock
//! - [`cache`] — retransmit cache with sliding-window bounds
//! - [`ack_queue`] — acknowledgements owed to the peer
//! - [`resend_queue`] — "please resend" requests with backoff
//! - [`session`] — per-peer state combining the above
//! - [`flusher`] — urgency-driven emission of otherwise-empty control packets
//! - [`stats`] — per-session counters

pub mod ack_queue;
pub mod cache;
pub mod clock;
pub mod flusher;
pub mod resend_queue;
pub mod session;
pub mod stats;
