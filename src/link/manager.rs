/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Fan-out of the reliable link primitive across the whole roster.
//!
//! A [LinkManager] owns one [ReliableLink] per peer, the poller thread that
//! feeds them, and their background sender threads. Everything received on
//! any link funnels into a single deliver callback, installed by the layer
//! above before `start`.
//!
//! [BasicLinks] is the point-to-point facade for users who want reliable
//! links without any broadcast layer on top.

use std::collections::HashMap;
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};
use std::time::SystemTime;

use crate::config::Configuration;
use crate::events::{Event, ReceiveAckEvent, SendMessageEvent};
use crate::journal::Journal;
use crate::link::{self, Inbound, ReliableLink};
use crate::messages::LinkMessage;
use crate::transport::{start_polling, Transport};
use crate::types::{MessageId, ProcessId};

/// The single upcall surface out of the link layer. Invoked from the poller
/// thread, once per distinct message id per link.
pub type DeliverFn = Arc<dyn Fn(ProcessId, LinkMessage) + Send + Sync>;

pub struct LinkManager<T: Transport> {
    config: Configuration,
    // The transport itself is cloned once per background thread; the copy
    // kept here is only touched under lock at `start`.
    transport: Mutex<T>,
    links: Arc<RwLock<HashMap<ProcessId, Arc<ReliableLink>>>>,
    deliver: Arc<RwLock<Option<DeliverFn>>>,
    event_publisher: Option<Sender<Event>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    shutdown_signals: Mutex<Vec<Sender<()>>>,
}

impl<T: Transport> LinkManager<T> {
    /// Create a manager with one link per peer in the configuration's
    /// roster. No threads run until [start](Self::start).
    pub fn new(
        config: Configuration,
        transport: T,
        event_publisher: Option<Sender<Event>>,
    ) -> LinkManager<T> {
        let links = config
            .peers()
            .map(|peer| (peer, Arc::new(ReliableLink::new(peer))))
            .collect();

        LinkManager {
            config,
            transport: Mutex::new(transport),
            links: Arc::new(RwLock::new(links)),
            deliver: Arc::new(RwLock::new(None)),
            event_publisher,
            threads: Mutex::new(Vec::new()),
            shutdown_signals: Mutex::new(Vec::new()),
        }
    }

    /// Install the deliver callback. Must be called before [start](Self::start);
    /// datagrams arriving while no callback is installed are dropped.
    pub fn set_deliver(&self, deliver: impl Fn(ProcessId, LinkMessage) + Send + Sync + 'static) {
        *self.deliver.write().unwrap() = Some(Arc::new(deliver));
    }

    /// Enqueue a payload on the link to `peer`. Returns `None` if `peer` is
    /// not in the roster.
    pub fn send(&self, peer: ProcessId, payload: &[u8]) -> Option<MessageId> {
        let link = self.links.read().unwrap().get(&peer).cloned()?;
        let id = link.send(payload);
        Event::publish(
            &self.event_publisher,
            Event::SendMessage(SendMessageEvent {
                timestamp: SystemTime::now(),
                peer,
                id,
            }),
        );
        Some(id)
    }

    /// Enqueue the same payload on every peer's link.
    pub fn send_to_all(&self, payload: &[u8]) {
        let links: Vec<Arc<ReliableLink>> =
            self.links.read().unwrap().values().cloned().collect();
        for link in links {
            let id = link.send(payload);
            Event::publish(
                &self.event_publisher,
                Event::SendMessage(SendMessageEvent {
                    timestamp: SystemTime::now(),
                    peer: link.peer(),
                    id,
                }),
            );
        }
    }

    /// Start the poller thread and every link's background sender threads.
    pub fn start(&self) {
        let mut threads = self.threads.lock().unwrap();
        let mut shutdown_signals = self.shutdown_signals.lock().unwrap();
        if !threads.is_empty() {
            return;
        }

        let (poller_shutdown, poller_shutdown_receiver) = mpsc::channel();
        let transport = self.transport.lock().unwrap().clone();
        let links = self.links.clone();
        let deliver = self.deliver.clone();
        let event_publisher = self.event_publisher.clone();
        let dispatch = move |source: ProcessId, datagram: Vec<u8>| {
            let link = links.read().unwrap().get(&source).cloned();
            let link = match link {
                Some(link) => link,
                // Not in the roster: drop.
                None => return,
            };

            match link.on_datagram(&datagram) {
                Inbound::Deliver(msg) => {
                    let handler = deliver.read().unwrap().clone();
                    if let Some(handler) = handler {
                        handler(source, msg)
                    }
                }
                Inbound::AckSettled(id) => Event::publish(
                    &event_publisher,
                    Event::ReceiveAck(ReceiveAckEvent {
                        timestamp: SystemTime::now(),
                        peer: source,
                        id,
                    }),
                ),
                Inbound::Nothing => (),
            }
        };
        threads.push(start_polling(
            transport.clone(),
            dispatch,
            poller_shutdown_receiver,
        ));
        shutdown_signals.push(poller_shutdown);

        for link in self.links.read().unwrap().values() {
            let (retransmit_shutdown, retransmit_shutdown_receiver) = mpsc::channel();
            threads.push(link::start_retransmitting(
                link.clone(),
                transport.clone(),
                self.config.retransmit_interval,
                retransmit_shutdown_receiver,
            ));
            shutdown_signals.push(retransmit_shutdown);

            let (ack_shutdown, ack_shutdown_receiver) = mpsc::channel();
            threads.push(link::start_acking(
                link.clone(),
                transport.clone(),
                self.config.ack_flush_interval,
                self.config.ack_quiescence_timeout,
                ack_shutdown_receiver,
            ));
            shutdown_signals.push(ack_shutdown);
        }
    }

    /// Stop and join every owned thread. Waits out the configured grace
    /// period first so outstanding acknowledgments can still be exchanged.
    pub fn stop(&self) {
        let mut threads = self.threads.lock().unwrap();
        let mut shutdown_signals = self.shutdown_signals.lock().unwrap();
        if threads.is_empty() {
            return;
        }

        thread::sleep(self.config.stop_grace_period);

        for shutdown in shutdown_signals.drain(..) {
            let _ = shutdown.send(());
        }
        for thread in threads.drain(..) {
            let _ = thread.join();
        }
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }
}

/// Reliable point-to-point messaging without any broadcast layer: the
/// thinnest process-facing surface over a [LinkManager]. Sends and
/// deliveries are recorded in the journal (`b {id}` / `d {sender} {id}`).
pub struct BasicLinks<T: Transport> {
    manager: LinkManager<T>,
    journal: Arc<dyn Journal>,
}

impl<T: Transport> BasicLinks<T> {
    pub fn new(
        config: Configuration,
        transport: T,
        journal: Arc<dyn Journal>,
        on_deliver: impl Fn(ProcessId, LinkMessage) + Send + Sync + 'static,
    ) -> BasicLinks<T> {
        let manager = LinkManager::new(config, transport, None);
        let deliver_journal = journal.clone();
        manager.set_deliver(move |sender, msg| {
            deliver_journal.append(&format!("d {} {}", sender, msg.id));
            on_deliver(sender, msg)
        });
        BasicLinks { manager, journal }
    }

    /// Send a payload to one peer; returns the assigned message id, or
    /// `None` if `peer` is not in the roster.
    pub fn send(&self, peer: ProcessId, payload: &[u8]) -> Option<MessageId> {
        let id = self.manager.send(peer, payload)?;
        self.journal.append(&format!("b {}", id));
        Some(id)
    }

    pub fn start(&self) {
        self.manager.start()
    }

    pub fn stop(&self) {
        self.manager.stop();
        self.journal.flush();
    }
}
