//! In-crate helpers for unit tests: a transport that records every send
//! instead of delivering it, and decoders to inspect what a layer put on
//! the wire.

use std::sync::{Arc, Mutex};

use crate::broadcast::{self, BroadcastMessage};
use crate::config::Configuration;
use crate::journal::Journal;
use crate::messages::{self, LinkFrame};
use crate::transport::Transport;
use crate::types::ProcessId;

/// Records outbound datagrams; never receives anything.
#[derive(Clone)]
pub(crate) struct RecordingTransport {
    pub(crate) sent: Arc<Mutex<Vec<(ProcessId, Vec<u8>)>>>,
}

impl RecordingTransport {
    pub(crate) fn new() -> RecordingTransport {
        RecordingTransport {
            sent: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// The broadcast messages enqueued so far, decoded from the recorded
    /// link frames, with the datagram's destination alongside.
    pub(crate) fn sent_broadcasts(&self, sender: ProcessId) -> Vec<(ProcessId, BroadcastMessage)> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter_map(|(dest, datagram)| match messages::parse(datagram) {
                Ok(LinkFrame::Data(link_msg)) => broadcast::parse(sender, &link_msg.payload)
                    .ok()
                    .map(|msg| (*dest, msg)),
                _ => None,
            })
            .collect()
    }
}

impl Transport for RecordingTransport {
    fn send(&mut self, peer: ProcessId, datagram: &[u8]) {
        self.sent.lock().unwrap().push((peer, datagram.to_vec()));
    }

    fn recv(&mut self) -> Option<(ProcessId, Vec<u8>)> {
        None
    }
}

/// A journal that remembers its lines in memory.
pub(crate) struct MemoryJournal {
    pub(crate) lines: Mutex<Vec<String>>,
}

impl MemoryJournal {
    pub(crate) fn new() -> Arc<MemoryJournal> {
        Arc::new(MemoryJournal {
            lines: Mutex::new(Vec::new()),
        })
    }
}

impl Journal for MemoryJournal {
    fn append(&self, line: &str) {
        self.lines.lock().unwrap().push(line.to_string())
    }

    fn flush(&self) {}
}

pub(crate) fn configuration(me: u64, num_processes: u64) -> Configuration {
    Configuration::builder()
        .me(ProcessId::new(me))
        .processes((1..=num_processes).map(ProcessId::new).collect())
        .log_events(false)
        .build()
}
