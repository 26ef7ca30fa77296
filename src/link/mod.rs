/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The reliable point-to-point delivery primitive.
//!
//! A [ReliableLink] connects the local process to exactly one peer over the
//! unreliable transport and turns at-least-once retransmission into
//! exactly-once delivery:
//! - the send side keeps every message in a to-send set and re-transmits the
//!   whole set periodically; only a matching acknowledgment removes a
//!   message from the set,
//! - the receive side records delivered ids and re-acknowledges duplicates
//!   without re-delivering them,
//! - acknowledgments are themselves sent unreliably, so the pending ack set
//!   is flushed-and-retained every interval until the peer has been quiet
//!   for the quiescence timeout.
//!
//! A permanently crashed peer causes its link to retransmit forever unless
//! the link is stopped; this is a liveness cost accepted by the crash-stop
//! model, not a safety problem.

pub mod manager;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::{Arc, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::messages::{self, LinkFrame, LinkMessage, MAX_MSG_PAYLOAD_SIZE};
use crate::transport::Transport;
use crate::types::{MessageId, ProcessId};

/// One endpoint of a reliable channel to a single fixed peer. All state is
/// internally synchronized; the link is shared between the poller thread and
/// its two background sender threads.
pub struct ReliableLink {
    peer: ProcessId,
    next_id: AtomicU64,
    to_send: RwLock<BTreeMap<MessageId, Vec<u8>>>,
    acks_to_send: RwLock<BTreeSet<MessageId>>,
    delivered: RwLock<HashMap<MessageId, Instant>>,
    last_data_at: RwLock<Option<Instant>>,
}

/// What an inbound datagram amounted to, as seen by the manager.
pub(crate) enum Inbound {
    /// First sight of a data message: deliver it upward.
    Deliver(LinkMessage),
    /// An acknowledgment settled a pending message.
    AckSettled(MessageId),
    /// Duplicate data (re-acknowledged), stale ack, or garbage.
    Nothing,
}

impl ReliableLink {
    pub fn new(peer: ProcessId) -> ReliableLink {
        ReliableLink {
            peer,
            next_id: AtomicU64::new(1),
            to_send: RwLock::new(BTreeMap::new()),
            acks_to_send: RwLock::new(BTreeSet::new()),
            delivered: RwLock::new(HashMap::new()),
            last_data_at: RwLock::new(None),
        }
    }

    pub fn peer(&self) -> ProcessId {
        self.peer
    }

    /// Enqueue a payload for delivery to the peer and return its id
    /// immediately. Transmission happens on the background loop; the message
    /// stays in the to-send set until the peer acknowledges it.
    pub fn send(&self, payload: &[u8]) -> MessageId {
        debug_assert!(payload.len() <= MAX_MSG_PAYLOAD_SIZE);

        let id = MessageId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let frame = messages::serialize_data(id, payload);
        self.to_send.write().unwrap().insert(id, frame);
        id
    }

    /// Handle one inbound datagram from the peer. Called from the poller
    /// thread only.
    pub(crate) fn on_datagram(&self, datagram: &[u8]) -> Inbound {
        let frame = match messages::parse(datagram) {
            Ok(frame) => frame,
            Err(_) => return Inbound::Nothing,
        };

        match frame {
            LinkFrame::Ack(id) => {
                // Idempotent: duplicated acks find nothing left to remove.
                if self.to_send.write().unwrap().remove(&id).is_some() {
                    Inbound::AckSettled(id)
                } else {
                    Inbound::Nothing
                }
            }
            LinkFrame::Data(msg) => {
                *self.last_data_at.write().unwrap() = Some(Instant::now());
                self.acks_to_send.write().unwrap().insert(msg.id);

                let first_sight = {
                    let mut delivered = self.delivered.write().unwrap();
                    match delivered.entry(msg.id) {
                        std::collections::hash_map::Entry::Vacant(entry) => {
                            entry.insert(Instant::now());
                            true
                        }
                        std::collections::hash_map::Entry::Occupied(_) => false,
                    }
                };

                if first_sight {
                    Inbound::Deliver(msg)
                } else {
                    Inbound::Nothing
                }
            }
        }
    }

    fn has_gone_quiet(&self, quiescence_timeout: Duration) -> bool {
        match *self.last_data_at.read().unwrap() {
            Some(at) => at.elapsed() >= quiescence_timeout,
            None => true,
        }
    }
}

/// Spawn the link's retransmission loop: every interval, send every frame
/// still awaiting an acknowledgment. Frames are snapshotted under the read
/// lock and sent after it is released.
pub(crate) fn start_retransmitting<T: Transport>(
    link: Arc<ReliableLink>,
    mut transport: T,
    interval: Duration,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown_signal.recv_timeout(interval) {
            Ok(()) => return,
            Err(RecvTimeoutError::Timeout) => (),
            Err(RecvTimeoutError::Disconnected) => {
                panic!("Retransmit thread disconnected from main thread")
            }
        }

        let frames: Vec<Vec<u8>> = link.to_send.read().unwrap().values().cloned().collect();
        for frame in frames {
            transport.send(link.peer, &frame);
        }
    })
}

/// Spawn the link's acknowledgment loop: every interval, re-send every
/// pending ack (flush-and-retain, so lost acks are repaired by the next
/// pass). Once the peer has produced no new data for the quiescence timeout
/// the set is cleared and flushing pauses; a duplicate data frame re-arms it.
pub(crate) fn start_acking<T: Transport>(
    link: Arc<ReliableLink>,
    mut transport: T,
    interval: Duration,
    quiescence_timeout: Duration,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown_signal.recv_timeout(interval) {
            Ok(()) => return,
            Err(RecvTimeoutError::Timeout) => (),
            Err(RecvTimeoutError::Disconnected) => {
                panic!("Ack thread disconnected from main thread")
            }
        }

        if link.has_gone_quiet(quiescence_timeout) {
            link.acks_to_send.write().unwrap().clear();
            continue;
        }

        let acks: Vec<MessageId> = link.acks_to_send.read().unwrap().iter().copied().collect();
        for id in acks {
            transport.send(link.peer, &messages::serialize_ack(id));
        }
    })
}
