//! # warren-fetch
//!
//! Redundant split-file fetch segment for the Warren overlay network.
//!
//! A split file is partitioned into `K` data blocks plus `M` erasure-coded
//! check blocks such that any `K` of the `K + M` reconstruct the original.
//! This crate coordinates the per-block fetches, decodes once a quorum
//! arrives, tolerates partial failure, and opportunistically re-inserts
//! missing blocks to heal the network. Block retrieval transport, URI
//! parsing, and durable storage stay behind traits.
//!
//! ## Crate structure
//!
//! - [`key`] — parsed content-key variants
//! - [`bucket`] — blob handles behind the storage backend
//! - [`codec`] — split types and the erasure codec seam
//! - [`fetcher`] — per-block retrieval seam
//! - [`segment`] — the fetch coordinator state machine
//! - [`heal`] — re-insertion handoff and the probabilistic draw
//! - [`error`] — fetch failures and the per-block error histogram

pub mod bucket;
pub mod codec;
pub mod error;
pub mod fetcher;
pub mod heal;
pub mod key;
pub mod segment;

mod decoder;
