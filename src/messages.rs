/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Wire formats of the link layer.
//!
//! Two frame kinds travel on a reliable link:
//! - Data: `[message id: u64 LE][payload bytes]`.
//! - Ack: `[6-byte ack marker][message id: u64 LE]`, 14 bytes total.
//!
//! A datagram is an ack iff it is exactly [ACK_SIZE] bytes long and starts
//! with [ACK_MARKER]. Data frames carry their payload as raw trailing bytes;
//! the payload length is whatever the datagram length says it is.

use std::mem;

use crate::transport::MAX_DATAGRAM_SIZE;
use crate::types::MessageId;

/// Marker distinguishing ack frames from data frames.
pub(crate) const ACK_MARKER: [u8; 6] = *b"ACK\0\0\0";

/// Total size of an ack frame.
pub(crate) const ACK_SIZE: usize = ACK_MARKER.len() + mem::size_of::<u64>();

/// Size of the fixed prefix of a data frame.
pub(crate) const MSG_PREFIX_SIZE: usize = mem::size_of::<u64>();

/// Largest payload a single data frame can carry.
pub(crate) const MAX_MSG_PAYLOAD_SIZE: usize = MAX_DATAGRAM_SIZE - MSG_PREFIX_SIZE;

const _: () = assert!(MAX_DATAGRAM_SIZE > MSG_PREFIX_SIZE);
const _: () = assert!(MAX_DATAGRAM_SIZE > ACK_SIZE);

/// A message accepted by a reliable link for delivery to its peer. Identity
/// is the `id` alone, scoped to the sending link; immutable once created.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkMessage {
    pub id: MessageId,
    pub payload: Vec<u8>,
}

/// A parsed inbound link datagram.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum LinkFrame {
    Data(LinkMessage),
    Ack(MessageId),
}

/// Failed to make sense of inbound bytes. The receive path drops the frame
/// silently; the network is unreliable, not adversarial.
#[derive(Debug)]
pub struct DeserializeError;

pub(crate) fn serialize_data(id: MessageId, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(MSG_PREFIX_SIZE + payload.len());
    buf.extend_from_slice(&id.to_le_bytes());
    buf.extend_from_slice(payload);
    buf
}

pub(crate) fn serialize_ack(id: MessageId) -> [u8; ACK_SIZE] {
    let mut buf = [0u8; ACK_SIZE];
    buf[..ACK_MARKER.len()].copy_from_slice(&ACK_MARKER);
    buf[ACK_MARKER.len()..].copy_from_slice(&id.to_le_bytes());
    buf
}

pub(crate) fn parse(datagram: &[u8]) -> Result<LinkFrame, DeserializeError> {
    if datagram.len() == ACK_SIZE && datagram[..ACK_MARKER.len()] == ACK_MARKER {
        let id = u64::from_le_bytes(datagram[ACK_MARKER.len()..].try_into().unwrap());
        return Ok(LinkFrame::Ack(MessageId::new(id)));
    }

    if datagram.len() < MSG_PREFIX_SIZE {
        return Err(DeserializeError);
    }
    let id = u64::from_le_bytes(datagram[..MSG_PREFIX_SIZE].try_into().unwrap());
    Ok(LinkFrame::Data(LinkMessage {
        id: MessageId::new(id),
        payload: datagram[MSG_PREFIX_SIZE..].to_vec(),
    }))
}
