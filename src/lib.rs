/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A layered stack of distributed abstractions for crash-stop process
//! networks: reliable point-to-point links over an unreliable datagram
//! transport, best-effort / uniform-reliable / FIFO broadcast on top of
//! them, and lattice agreement (round-based set-valued consensus) on top of
//! best-effort broadcast.
//!
//! Each layer is defined purely in terms of the guarantees of the layer
//! below it:
//! - [link]: retransmission + acknowledgment + deduplication turn the lossy
//!   transport into exactly-once delivery between process pairs.
//! - [broadcast]: fan-out over the links (best-effort), majority-witnessed
//!   delivery that survives author crashes (uniform reliable), and
//!   per-author in-order delivery (FIFO).
//! - [lattice]: per-round proposals refined through ack/nack exchanges until
//!   a majority acknowledges one attempt.
//!
//! The transport ([transport::Transport]) and the stable-storage event log
//! ([journal::Journal]) are pluggable; the crate assumes processes fail only
//! by crashing and the network only by losing, duplicating, or reordering
//! datagrams.
//!
//! [process::BroadcastSpec] and [process::AgreementSpec] assemble and start
//! complete stacks with the builder pattern.

pub mod broadcast;

pub mod config;

pub(crate) mod event_bus;

pub mod events;

pub mod journal;

pub mod lattice;

pub mod link;

pub mod logging;

pub mod messages;

pub mod process;

#[cfg(test)]
pub(crate) mod test_util;

pub mod transport;

pub mod types;
