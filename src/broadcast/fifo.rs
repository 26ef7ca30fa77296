/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! FIFO broadcast: per-author in-order delivery on top of any relay.
//!
//! One more level of asynchrony than the relay beneath it: instead of
//! passing a message up right away, it is held until every lower sequence
//! number from the same author has been delivered. A single generic
//! component serves both the best-effort-backed and the uniform-backed
//! variants.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use crate::broadcast::{BroadcastMessage, MessageSink, Relay};
use crate::types::{ProcessId, Sequence};

/// Reorder state for one observed author. Every seq below `next` has been
/// delivered exactly once; `pending` holds only seqs `>= next`.
struct PeerState {
    next: Sequence,
    pending: BTreeMap<Sequence, BroadcastMessage>,
}

impl Default for PeerState {
    fn default() -> PeerState {
        PeerState {
            next: Sequence::new(1),
            pending: BTreeMap::new(),
        }
    }
}

pub struct FifoBroadcast<R: Relay> {
    relay: Arc<R>,
    peer_state: RwLock<HashMap<ProcessId, PeerState>>,
    upper: RwLock<Option<Arc<dyn MessageSink>>>,
}

impl<R: Relay + 'static> FifoBroadcast<R> {
    /// Wrap a relay. The relay's upper sink is taken over by the new
    /// instance; deliveries climb from the relay into the FIFO buffer and
    /// out of it in per-author sequence order.
    pub fn new(relay: Arc<R>) -> Arc<FifoBroadcast<R>> {
        let fifo = Arc::new(FifoBroadcast {
            relay: relay.clone(),
            peer_state: RwLock::new(HashMap::new()),
            upper: RwLock::new(None),
        });
        relay.set_upper(fifo.clone());
        fifo
    }
}

impl<R: Relay> MessageSink for FifoBroadcast<R> {
    fn on_deliver(&self, msg: BroadcastMessage) {
        // Buffer, then drain the author's run of consecutive seqs. The drain
        // stops at the first gap; other authors are unaffected.
        let ready: Vec<BroadcastMessage> = {
            let mut peer_state = self.peer_state.write().unwrap();
            let state = peer_state.entry(msg.id.author).or_default();
            state.pending.insert(msg.id.seq, msg);

            let mut ready = Vec::new();
            while let Some(next_msg) = state.pending.remove(&state.next) {
                ready.push(next_msg);
                state.next += 1;
            }
            ready
        };

        if ready.is_empty() {
            return;
        }
        let upper = self.upper.read().unwrap().clone();
        if let Some(upper) = upper {
            for msg in ready {
                upper.on_deliver(msg)
            }
        }
    }
}

impl<R: Relay> Relay for FifoBroadcast<R> {
    fn broadcast(&self, payload: &[u8]) -> Sequence {
        self.relay.broadcast(payload)
    }

    fn set_upper(&self, upper: Arc<dyn MessageSink>) {
        *self.upper.write().unwrap() = Some(upper);
    }

    fn start(&self) {
        self.relay.start()
    }

    fn stop(&self) {
        self.relay.stop()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::broadcast::BroadcastId;

    /// A relay that does nothing; messages are fed to the FIFO directly.
    struct NullRelay;

    impl Relay for NullRelay {
        fn broadcast(&self, _: &[u8]) -> Sequence {
            Sequence::new(1)
        }
        fn set_upper(&self, _: Arc<dyn MessageSink>) {}
        fn start(&self) {}
        fn stop(&self) {}
    }

    struct Collector(Mutex<Vec<BroadcastId>>);

    impl MessageSink for Collector {
        fn on_deliver(&self, msg: BroadcastMessage) {
            self.0.lock().unwrap().push(msg.id)
        }
    }

    fn msg(author: u64, seq: u32) -> BroadcastMessage {
        BroadcastMessage {
            id: BroadcastId {
                seq: Sequence::new(seq),
                author: ProcessId::new(author),
            },
            sender: ProcessId::new(author),
            payload: Vec::new(),
        }
    }

    fn harness() -> (Arc<FifoBroadcast<NullRelay>>, Arc<Collector>) {
        let fifo = FifoBroadcast::new(Arc::new(NullRelay));
        let collector = Arc::new(Collector(Mutex::new(Vec::new())));
        fifo.set_upper(collector.clone());
        (fifo, collector)
    }

    #[test]
    fn out_of_order_arrivals_are_delivered_in_order() {
        let (fifo, collector) = harness();
        for seq in [1, 3, 2] {
            fifo.on_deliver(msg(1, seq));
        }
        let delivered: Vec<u32> = collector.0.lock().unwrap().iter().map(|id| id.seq.int()).collect();
        assert_eq!(delivered, vec![1, 2, 3]);
    }

    #[test]
    fn delivery_stops_at_the_first_gap() {
        let (fifo, collector) = harness();
        for seq in [2, 4, 5] {
            fifo.on_deliver(msg(1, seq));
        }
        assert!(collector.0.lock().unwrap().is_empty());

        fifo.on_deliver(msg(1, 1));
        let delivered: Vec<u32> = collector.0.lock().unwrap().iter().map(|id| id.seq.int()).collect();
        // 3 is still missing: 4 and 5 stay pending.
        assert_eq!(delivered, vec![1, 2]);
    }

    #[test]
    fn authors_do_not_block_each_other() {
        let (fifo, collector) = harness();
        fifo.on_deliver(msg(1, 2));
        fifo.on_deliver(msg(2, 1));
        let delivered: Vec<(u64, u32)> = collector
            .0
            .lock()
            .unwrap()
            .iter()
            .map(|id| (id.author.int(), id.seq.int()))
            .collect();
        assert_eq!(delivered, vec![(2, 1)]);
    }
}
