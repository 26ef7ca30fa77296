use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::{Arc, Mutex};

use lattice_rs::transport::Transport;
use lattice_rs::types::ProcessId;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// A mock transport which passes datagrams between processes of one test
/// using channels. Lossless and ordered by itself; wrap it in
/// [FaultyTransport] to get an adversarial network.
#[derive(Clone)]
pub(crate) struct ChannelTransport {
    me: ProcessId,
    all_peers: HashMap<ProcessId, Sender<(ProcessId, Vec<u8>)>>,
    inbox: Arc<Mutex<Receiver<(ProcessId, Vec<u8>)>>>,
}

impl Transport for ChannelTransport {
    fn send(&mut self, peer: ProcessId, datagram: &[u8]) {
        if let Some(peer) = self.all_peers.get(&peer) {
            let _ = peer.send((self.me, datagram.to_vec()));
        }
    }

    fn recv(&mut self) -> Option<(ProcessId, Vec<u8>)> {
        match self.inbox.lock().unwrap().try_recv() {
            Ok(datagram) => Some(datagram),
            Err(TryRecvError::Empty) => None,
            // Peers that stopped dropped their senders; nothing more will
            // arrive, which is indistinguishable from a crashed process.
            Err(TryRecvError::Disconnected) => None,
        }
    }
}

/// One connected [ChannelTransport] per process id `1..=num_processes`.
pub(crate) fn mock_transports(num_processes: u64) -> Vec<ChannelTransport> {
    let mut all_peers = HashMap::new();
    let ids_and_inboxes: Vec<(ProcessId, Receiver<(ProcessId, Vec<u8>)>)> = (1..=num_processes)
        .map(ProcessId::new)
        .map(|id| {
            let (sender, receiver) = mpsc::channel();
            all_peers.insert(id, sender);
            (id, receiver)
        })
        .collect();

    ids_and_inboxes
        .into_iter()
        .map(|(me, inbox)| ChannelTransport {
            me,
            all_peers: all_peers.clone(),
            inbox: Arc::new(Mutex::new(inbox)),
        })
        .collect()
}

/// Wraps a [ChannelTransport] and injects the full unreliable-network
/// repertoire: datagrams are dropped, duplicated, and held back (reordered)
/// at the given probabilities. Retransmission at the link layer must absorb
/// all of it.
#[derive(Clone)]
pub(crate) struct FaultyTransport {
    inner: ChannelTransport,
    drop_probability: f64,
    duplicate_probability: f64,
    holdback_probability: f64,
    held_back: Arc<Mutex<Option<(ProcessId, Vec<u8>)>>>,
    rng: StdRng,
}

impl FaultyTransport {
    pub(crate) fn new(
        inner: ChannelTransport,
        drop_probability: f64,
        duplicate_probability: f64,
        holdback_probability: f64,
        seed: u64,
    ) -> FaultyTransport {
        FaultyTransport {
            inner,
            drop_probability,
            duplicate_probability,
            holdback_probability,
            held_back: Arc::new(Mutex::new(None)),
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Transport for FaultyTransport {
    fn send(&mut self, peer: ProcessId, datagram: &[u8]) {
        let previously_held = self.held_back.lock().unwrap().take();

        if self.rng.gen_bool(self.drop_probability) {
            // Lost in transit; a held-back datagram still goes out below.
        } else if self.rng.gen_bool(self.holdback_probability) {
            // Overtaken by whatever is sent next.
            *self.held_back.lock().unwrap() = Some((peer, datagram.to_vec()));
        } else {
            self.inner.send(peer, datagram);
            if self.rng.gen_bool(self.duplicate_probability) {
                self.inner.send(peer, datagram);
            }
        }

        if let Some((held_peer, held_datagram)) = previously_held {
            self.inner.send(held_peer, &held_datagram);
        }
    }

    fn recv(&mut self) -> Option<(ProcessId, Vec<u8>)> {
        self.inner.recv()
    }
}

/// Wraps a [ChannelTransport] and silently discards every datagram addressed
/// to one of the `unreachable` processes. Used to force delivery through
/// echo paths.
#[derive(Clone)]
pub(crate) struct PartitionedTransport {
    inner: ChannelTransport,
    unreachable: Vec<ProcessId>,
}

impl PartitionedTransport {
    pub(crate) fn new(inner: ChannelTransport, unreachable: Vec<ProcessId>) -> PartitionedTransport {
        PartitionedTransport { inner, unreachable }
    }
}

impl Transport for PartitionedTransport {
    fn send(&mut self, peer: ProcessId, datagram: &[u8]) {
        if self.unreachable.contains(&peer) {
            return;
        }
        self.inner.send(peer, datagram);
    }

    fn recv(&mut self) -> Option<(ProcessId, Vec<u8>)> {
        self.inner.recv()
    }
}
