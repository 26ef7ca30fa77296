/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Uniform reliable broadcast: a message is delivered only once a majority
//! of processes are known to hold a copy, so a delivered message cannot
//! vanish from the majority's view even if its author crashes mid-broadcast.
//!
//! Every first-seen message is echoed (re-fanned-out) before anything else;
//! the set of processes a copy has been seen from is the evidence that the
//! message has spread. Strictly more than half suffices against a
//! minority-crash adversary.

use std::collections::{HashMap, HashSet};
use std::sync::mpsc::Sender;
use std::sync::{Arc, RwLock};

use crate::broadcast::beb::BestEffortBroadcast;
use crate::broadcast::{BroadcastId, BroadcastMessage, MessageSink, Relay};
use crate::config::{is_majority, Configuration};
use crate::events::Event;
use crate::journal::Journal;
use crate::transport::Transport;
use crate::types::{ProcessId, Sequence};

pub struct UniformReliableBroadcast<T: Transport> {
    me: ProcessId,
    num_processes: usize,
    beb: Arc<BestEffortBroadcast<T>>,
    /// Per message id: the processes a copy of it has been seen from.
    acks: RwLock<HashMap<BroadcastId, HashSet<ProcessId>>>,
    echoed: RwLock<HashSet<BroadcastId>>,
    delivered: RwLock<HashSet<BroadcastId>>,
    upper: RwLock<Option<Arc<dyn MessageSink>>>,
}

impl<T: Transport> UniformReliableBroadcast<T> {
    pub fn new(
        config: Configuration,
        transport: T,
        journal: Option<Arc<dyn Journal>>,
        event_publisher: Option<Sender<Event>>,
    ) -> Arc<UniformReliableBroadcast<T>> {
        let me = config.me;
        let num_processes = config.num_processes();
        let beb = BestEffortBroadcast::new(config, transport, journal, event_publisher, true);
        let urb = Arc::new(UniformReliableBroadcast {
            me,
            num_processes,
            beb: beb.clone(),
            acks: RwLock::new(HashMap::new()),
            echoed: RwLock::new(HashSet::new()),
            delivered: RwLock::new(HashSet::new()),
            upper: RwLock::new(None),
        });
        beb.set_upper(urb.clone());
        urb
    }
}

impl<T: Transport> MessageSink for UniformReliableBroadcast<T> {
    fn on_deliver(&self, msg: BroadcastMessage) {
        let id = msg.id;

        // The relaying sender evidently holds a copy.
        self.acks
            .write()
            .unwrap()
            .entry(id)
            .or_default()
            .insert(msg.sender);

        // Echo on first sight, before anything else. Our own messages were
        // already fanned out to every peer by the original broadcast, so for
        // those the mark alone is enough.
        let first_sight = self.echoed.write().unwrap().insert(id);
        if first_sight {
            if id.author != self.me {
                self.beb.relay(&BroadcastMessage {
                    id,
                    sender: self.me,
                    payload: msg.payload.clone(),
                });
            }
            // We hold a copy now too.
            self.acks
                .write()
                .unwrap()
                .entry(id)
                .or_default()
                .insert(self.me);
        }

        let ack_count = self
            .acks
            .read()
            .unwrap()
            .get(&id)
            .map(|holders| holders.len())
            .unwrap_or(0);
        if is_majority(ack_count, self.num_processes) {
            // Later echoes are still recorded above, but deliver only once.
            let newly_delivered = self.delivered.write().unwrap().insert(id);
            if newly_delivered {
                let upper = self.upper.read().unwrap().clone();
                if let Some(upper) = upper {
                    upper.on_deliver(msg)
                }
            }
        }
    }
}

impl<T: Transport> Relay for UniformReliableBroadcast<T> {
    fn broadcast(&self, payload: &[u8]) -> Sequence {
        self.beb.broadcast(payload)
    }

    fn set_upper(&self, upper: Arc<dyn MessageSink>) {
        *self.upper.write().unwrap() = Some(upper);
    }

    fn start(&self) {
        self.beb.start()
    }

    fn stop(&self) {
        self.beb.stop()
    }
}
