/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The broadcast hierarchy: best-effort, uniform-reliable, and FIFO
//! broadcast, each defined purely in terms of the layer below it.
//!
//! Layers compose by delegation. Every layer owns (an `Arc` of) the layer
//! beneath it and registers itself as that layer's upper [MessageSink];
//! deliveries climb the stack sink by sink until they reach the terminal
//! sink installed by the assembled process. Sends flow the other way:
//! `broadcast` calls delegate down until [BestEffortBroadcast] fans the
//! frame out over the link manager.
//!
//! ## Wire format
//!
//! A broadcast frame is carried as a reliable-link payload:
//! `[author: u64 LE][seq: u32 LE][payload bytes]`.

pub mod beb;

pub mod urb;

pub mod fifo;

use std::mem;
use std::sync::Arc;

use crate::messages::{DeserializeError, MAX_MSG_PAYLOAD_SIZE};
use crate::types::{ProcessId, Sequence};

/// Identity of a broadcast message: the author's sequence number plus the
/// author itself. `(seq, author)` is unique across the whole system because
/// a single author owns its counter. Orders by `seq` first, then `author`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BroadcastId {
    pub seq: Sequence,
    pub author: ProcessId,
}

/// A message travelling through the broadcast stack. `sender` is the process
/// that physically relayed this copy; under echoing it may differ from
/// `id.author`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BroadcastMessage {
    pub id: BroadcastId,
    pub sender: ProcessId,
    pub payload: Vec<u8>,
}

/// Size of the fixed prefix of a broadcast frame.
pub(crate) const BROADCAST_PREFIX_SIZE: usize = mem::size_of::<u64>() + mem::size_of::<u32>();

/// Largest payload a broadcast frame can carry after the link and broadcast
/// prefixes are subtracted from the transport's maximum datagram size.
pub const MAX_BROADCAST_PAYLOAD_SIZE: usize = MAX_MSG_PAYLOAD_SIZE - BROADCAST_PREFIX_SIZE;

const _: () = assert!(MAX_MSG_PAYLOAD_SIZE > BROADCAST_PREFIX_SIZE);

/// Receives messages a lower layer has decided are deliverable. Implemented
/// by wrapper layers and by the terminal sink of an assembled stack.
pub trait MessageSink: Send + Sync {
    fn on_deliver(&self, msg: BroadcastMessage);
}

/// A broadcast layer a [FifoBroadcast](fifo::FifoBroadcast) (or any other
/// wrapper) can sit on: it can author broadcasts and accept an upper sink to
/// deliver into.
pub trait Relay: Send + Sync {
    /// Broadcast a payload authored by the local process; returns the
    /// sequence number assigned to it.
    fn broadcast(&self, payload: &[u8]) -> Sequence;

    /// Install the wrapper that deliveries should climb into.
    fn set_upper(&self, upper: Arc<dyn MessageSink>);

    fn start(&self);

    fn stop(&self);
}

pub(crate) fn serialize(msg: &BroadcastMessage) -> Vec<u8> {
    let mut buf = Vec::with_capacity(BROADCAST_PREFIX_SIZE + msg.payload.len());
    buf.extend_from_slice(&msg.id.author.to_le_bytes());
    buf.extend_from_slice(&msg.id.seq.to_le_bytes());
    buf.extend_from_slice(&msg.payload);
    buf
}

pub(crate) fn parse(sender: ProcessId, bytes: &[u8]) -> Result<BroadcastMessage, DeserializeError> {
    if bytes.len() < BROADCAST_PREFIX_SIZE {
        return Err(DeserializeError);
    }
    let author = u64::from_le_bytes(bytes[..8].try_into().unwrap());
    let seq = u32::from_le_bytes(bytes[8..BROADCAST_PREFIX_SIZE].try_into().unwrap());
    Ok(BroadcastMessage {
        id: BroadcastId {
            seq: Sequence::new(seq),
            author: ProcessId::new(author),
        },
        sender,
        payload: bytes[BROADCAST_PREFIX_SIZE..].to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_roundtrip_preserves_author_not_sender() {
        let msg = BroadcastMessage {
            id: BroadcastId {
                seq: Sequence::new(9),
                author: ProcessId::new(4),
            },
            sender: ProcessId::new(4),
            payload: b"payload".to_vec(),
        };
        let frame = serialize(&msg);
        // A relayed copy keeps the author but takes the relaying sender.
        let parsed = parse(ProcessId::new(2), &frame).unwrap();
        assert_eq!(parsed.id, msg.id);
        assert_eq!(parsed.sender, ProcessId::new(2));
        assert_eq!(parsed.payload, msg.payload);
    }

    #[test]
    fn runt_frame_is_rejected() {
        assert!(parse(ProcessId::new(1), &[0u8; BROADCAST_PREFIX_SIZE - 1]).is_err());
    }

    #[test]
    fn ids_order_by_seq_then_author() {
        let id = |seq, author| BroadcastId {
            seq: Sequence::new(seq),
            author: ProcessId::new(author),
        };
        assert!(id(1, 9) < id(2, 1));
        assert!(id(2, 1) < id(2, 2));
        assert_eq!(id(3, 3), id(3, 3));
    }
}
