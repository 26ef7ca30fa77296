/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Best-effort broadcast: send over every peer's reliable link, deliver on
//! first receipt. The base of every stack; it owns the link manager and the
//! process-wide sequence counter.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, RwLock, Weak};
use std::time::SystemTime;

use crate::broadcast::{self, BroadcastId, BroadcastMessage, MessageSink, Relay};
use crate::config::Configuration;
use crate::events::{BroadcastEvent, Event};
use crate::journal::Journal;
use crate::link::manager::LinkManager;
use crate::transport::Transport;
use crate::types::{ProcessId, Sequence};

pub struct BestEffortBroadcast<T: Transport> {
    me: ProcessId,
    manager: LinkManager<T>,
    next_seq: AtomicU32,
    /// First-receipt filter, consulted only when this instance is terminal.
    /// A wrapping layer sees every relayed copy and does its own counting.
    delivered: RwLock<HashSet<BroadcastId>>,
    deliver_to_upper_layer: bool,
    upper: RwLock<Option<Arc<dyn MessageSink>>>,
    journal: Option<Arc<dyn Journal>>,
    event_publisher: Option<Sender<Event>>,
}

impl<T: Transport> BestEffortBroadcast<T> {
    /// Create a best-effort broadcast instance and wire it into its own link
    /// manager. With `deliver_to_upper_layer` set, every notification is
    /// passed raw to the upper sink (a wrapper layer will decide when a
    /// message is deliverable); without it, this instance is terminal and
    /// delivers each distinct message id exactly once.
    ///
    /// `journal` is consulted for `b {seq}` send records; stacks whose sends
    /// are protocol-internal (lattice agreement) pass `None`.
    pub fn new(
        config: Configuration,
        transport: T,
        journal: Option<Arc<dyn Journal>>,
        event_publisher: Option<Sender<Event>>,
        deliver_to_upper_layer: bool,
    ) -> Arc<BestEffortBroadcast<T>> {
        let me = config.me;
        let manager = LinkManager::new(config, transport, event_publisher.clone());
        let beb = Arc::new(BestEffortBroadcast {
            me,
            manager,
            next_seq: AtomicU32::new(1),
            delivered: RwLock::new(HashSet::new()),
            deliver_to_upper_layer,
            upper: RwLock::new(None),
            journal,
            event_publisher,
        });

        let weak: Weak<BestEffortBroadcast<T>> = Arc::downgrade(&beb);
        beb.manager.set_deliver(move |sender, link_msg| {
            let beb = match weak.upgrade() {
                Some(beb) => beb,
                None => return,
            };
            // Unparseable frames are dropped without ceremony.
            if let Ok(msg) = broadcast::parse(sender, &link_msg.payload) {
                beb.notify(msg)
            }
        });

        beb
    }

    /// Send a unicast carrying a broadcast-framed payload to a single peer.
    /// Used by the agreement layer for its point-to-point replies.
    pub(crate) fn send_to(&self, peer: ProcessId, payload: &[u8]) {
        let seq = Sequence::new(self.next_seq.fetch_add(1, Ordering::Relaxed));
        let msg = BroadcastMessage {
            id: BroadcastId { seq, author: self.me },
            sender: self.me,
            payload: payload.to_vec(),
        };
        self.manager.send(peer, &broadcast::serialize(&msg));
    }

    /// Fan a message out over every peer's link without assigning a new
    /// sequence number. Used by the uniform layer to echo.
    pub(crate) fn relay(&self, msg: &BroadcastMessage) {
        self.manager.send_to_all(&broadcast::serialize(msg));
    }

    fn notify(&self, msg: BroadcastMessage) {
        if self.deliver_to_upper_layer {
            let upper = self.upper.read().unwrap().clone();
            if let Some(upper) = upper {
                upper.on_deliver(msg)
            }
        } else {
            let first_receipt = self.delivered.write().unwrap().insert(msg.id);
            if first_receipt {
                let upper = self.upper.read().unwrap().clone();
                if let Some(upper) = upper {
                    upper.on_deliver(msg)
                }
            }
        }
    }
}

impl<T: Transport> Relay for BestEffortBroadcast<T> {
    fn broadcast(&self, payload: &[u8]) -> Sequence {
        let seq = Sequence::new(self.next_seq.fetch_add(1, Ordering::Relaxed));
        let msg = BroadcastMessage {
            id: BroadcastId { seq, author: self.me },
            sender: self.me,
            payload: payload.to_vec(),
        };

        if let Some(journal) = &self.journal {
            journal.append(&format!("b {}", seq));
        }
        Event::publish(
            &self.event_publisher,
            Event::Broadcast(BroadcastEvent {
                timestamp: SystemTime::now(),
                id: msg.id,
                payload: msg.payload.clone(),
            }),
        );

        self.relay(&msg);
        // Local loopback: the author observes its own message through the
        // same notify path as everyone else, with sender = self.
        self.notify(msg);
        seq
    }

    fn set_upper(&self, upper: Arc<dyn MessageSink>) {
        *self.upper.write().unwrap() = Some(upper);
    }

    fn start(&self) {
        self.manager.start()
    }

    fn stop(&self) {
        self.manager.stop();
        if let Some(journal) = &self.journal {
            journal.flush();
        }
    }
}
