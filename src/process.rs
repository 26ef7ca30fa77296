/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Methods to build and run an assembled protocol stack.
//!
//! Two stacks are offered:
//! - [BroadcastSpec] assembles a broadcast pipeline in one of four
//!   [modes](BroadcastMode) and starts it as a [BroadcastProcess];
//! - [AgreementSpec] assembles lattice agreement over best-effort broadcast
//!   and starts it as an [AgreementProcess].
//!
//! Both use the builder pattern:
//!
//! ```ignore
//! let process =
//!     BroadcastSpec::builder()
//!     .configuration(configuration)
//!     .transport(transport)
//!     .journal(journal)
//!     .mode(BroadcastMode::UniformFifo)
//!     .on_deliver(|deliver| { ... })
//!     .build()
//!     .start();
//!
//! process.broadcast(b"payload");
//! ```
//!
//! Dropping a process handle stops and joins every background thread it
//! owns. Layers can also be assembled by hand from [crate::broadcast] and
//! [crate::lattice] when a custom composition is needed.

use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::SystemTime;

use typed_builder::TypedBuilder;

use crate::broadcast::beb::BestEffortBroadcast;
use crate::broadcast::fifo::FifoBroadcast;
use crate::broadcast::urb::UniformReliableBroadcast;
use crate::broadcast::{BroadcastMessage, MessageSink, Relay};
use crate::config::Configuration;
use crate::event_bus::{start_event_bus, EventHandlers, HandlerPtr};
use crate::events::{DecideEvent, DeliverEvent, Event};
use crate::journal::Journal;
use crate::lattice::LatticeAgreement;
use crate::transport::Transport;
use crate::types::{Round, Sequence};

/// Which guarantees the assembled broadcast pipeline provides.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BroadcastMode {
    /// Deliver on first receipt; no ordering, no agreement.
    BestEffort,
    /// Deliver once a majority holds a copy.
    Uniform,
    /// Per-author FIFO order over best-effort broadcast.
    BestEffortFifo,
    /// Per-author FIFO order over uniform reliable broadcast.
    UniformFifo,
}

/// The terminal sink of an assembled stack: journals each delivery and
/// publishes it as a [DeliverEvent].
struct DeliverySink {
    journal: Arc<dyn Journal>,
    event_publisher: Option<Sender<Event>>,
}

impl MessageSink for DeliverySink {
    fn on_deliver(&self, msg: BroadcastMessage) {
        self.journal
            .append(&format!("d {} {}", msg.id.author, msg.id.seq));
        Event::publish(
            &self.event_publisher,
            Event::Deliver(DeliverEvent {
                timestamp: SystemTime::now(),
                id: msg.id,
                payload: msg.payload,
            }),
        );
    }
}

/// Stores all necessary parameters and trait implementations required to run
/// a broadcast process.
#[derive(TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [BroadcastSpec]. On the builder call the following methods to construct a valid [BroadcastSpec].

    Required:
    - `.configuration(...)`
    - `.transport(...)`
    - `.journal(...)`
    - `.mode(...)`

    Optional:
    - `.on_deliver(...)`
"))]
pub struct BroadcastSpec<T: Transport> {
    #[builder(setter(doc = "Set the [configuration](Configuration), which contains the necessary parameters to run a process. Required."))]
    configuration: Configuration,
    #[builder(setter(doc = "Set the implementation of peer-to-peer datagram networking. The argument must implement the [Transport](crate::transport::Transport) trait. Required."))]
    transport: T,
    #[builder(setter(doc = "Set the append-only event log. The argument must implement the [Journal](crate::journal::Journal) trait. Required."))]
    journal: Arc<dyn Journal>,
    #[builder(setter(doc = "Set the delivery guarantee the assembled pipeline provides. Required."))]
    mode: BroadcastMode,
    #[builder(default, setter(transform = |handler: impl Fn(&DeliverEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<DeliverEvent>),
    doc = "Register a handler closure to be invoked after a message is delivered. Optional."))]
    on_deliver: Option<HandlerPtr<DeliverEvent>>,
}

impl<T: Transport> BroadcastSpec<T> {
    /// Starts all threads associated with running the broadcast pipeline,
    /// and returns the handle to them in a [BroadcastProcess] struct.
    pub fn start(self) -> BroadcastProcess {
        let log_events = self.configuration.log_events;
        let event_handlers = EventHandlers::new(log_events, self.on_deliver, None);
        let (event_publisher, event_subscriber) = if !event_handlers.is_empty() {
            Some(mpsc::channel()).unzip()
        } else {
            (None, None)
        };

        let sink = Arc::new(DeliverySink {
            journal: self.journal.clone(),
            event_publisher: event_publisher.clone(),
        });

        let stack: Arc<dyn Relay> = match self.mode {
            BroadcastMode::BestEffort => {
                let beb = BestEffortBroadcast::new(
                    self.configuration,
                    self.transport,
                    Some(self.journal),
                    event_publisher,
                    false,
                );
                beb.set_upper(sink);
                beb
            }
            BroadcastMode::Uniform => {
                let urb = UniformReliableBroadcast::new(
                    self.configuration,
                    self.transport,
                    Some(self.journal),
                    event_publisher,
                );
                urb.set_upper(sink);
                urb
            }
            BroadcastMode::BestEffortFifo => {
                let beb = BestEffortBroadcast::new(
                    self.configuration,
                    self.transport,
                    Some(self.journal),
                    event_publisher,
                    true,
                );
                let fifo = FifoBroadcast::new(beb);
                fifo.set_upper(sink);
                fifo
            }
            BroadcastMode::UniformFifo => {
                let urb = UniformReliableBroadcast::new(
                    self.configuration,
                    self.transport,
                    Some(self.journal),
                    event_publisher,
                );
                let fifo = FifoBroadcast::new(urb);
                fifo.set_upper(sink);
                fifo
            }
        };

        let (event_bus, event_bus_shutdown) = if !event_handlers.is_empty() {
            let (shutdown, shutdown_receiver) = mpsc::channel();
            let bus = start_event_bus(
                event_handlers,
                event_subscriber.unwrap(), // Safety: should be Some(...).
                shutdown_receiver,
            );
            (Some(bus), Some(shutdown))
        } else {
            (None, None)
        };

        stack.start();

        BroadcastProcess {
            stack,
            event_bus: Mutex::new(event_bus),
            event_bus_shutdown,
        }
    }
}

/// A handle to the background threads of a broadcast process. When this
/// value is dropped, all background threads are gracefully shut down.
pub struct BroadcastProcess {
    stack: Arc<dyn Relay>,
    event_bus: Mutex<Option<JoinHandle<()>>>,
    event_bus_shutdown: Option<Sender<()>>,
}

impl BroadcastProcess {
    /// Broadcast a payload to every process; returns the sequence number
    /// assigned to it. Fire-and-forget: delivery is observed through the
    /// `on_deliver` handler and the journal.
    pub fn broadcast(&self, payload: &[u8]) -> Sequence {
        self.stack.broadcast(payload)
    }

    pub fn stop(&self) {
        // The stack feeds the event bus; stop it first so no event is
        // published into a torn-down channel.
        self.stack.stop();
        if let Some(shutdown) = &self.event_bus_shutdown {
            let _ = shutdown.send(());
        }
        if let Some(bus) = self.event_bus.lock().unwrap().take() {
            let _ = bus.join();
        }
    }
}

impl Drop for BroadcastProcess {
    fn drop(&mut self) {
        self.stop()
    }
}

/// Stores all necessary parameters and trait implementations required to run
/// an agreement process.
#[derive(TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building an [AgreementSpec]. On the builder call the following methods to construct a valid [AgreementSpec].

    Required:
    - `.configuration(...)`
    - `.transport(...)`
    - `.journal(...)`

    Optional:
    - `.on_decide(...)`
"))]
pub struct AgreementSpec<T: Transport> {
    #[builder(setter(doc = "Set the [configuration](Configuration), which contains the necessary parameters to run a process. Required."))]
    configuration: Configuration,
    #[builder(setter(doc = "Set the implementation of peer-to-peer datagram networking. The argument must implement the [Transport](crate::transport::Transport) trait. Required."))]
    transport: T,
    #[builder(setter(doc = "Set the append-only event log. The argument must implement the [Journal](crate::journal::Journal) trait. Required."))]
    journal: Arc<dyn Journal>,
    #[builder(default, setter(transform = |handler: impl Fn(&DecideEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<DecideEvent>),
    doc = "Register a handler closure to be invoked after a round decides. Optional."))]
    on_decide: Option<HandlerPtr<DecideEvent>>,
}

impl<T: Transport> AgreementSpec<T> {
    /// Starts all threads associated with running lattice agreement, and
    /// returns the handle to them in an [AgreementProcess] struct.
    pub fn start(self) -> AgreementProcess<T> {
        let log_events = self.configuration.log_events;
        let event_handlers = EventHandlers::new(log_events, None, self.on_decide);
        let (event_publisher, event_subscriber) = if !event_handlers.is_empty() {
            Some(mpsc::channel()).unzip()
        } else {
            (None, None)
        };

        let agreement = LatticeAgreement::new(
            self.configuration,
            self.transport,
            self.journal,
            event_publisher,
        );

        let (event_bus, event_bus_shutdown) = if !event_handlers.is_empty() {
            let (shutdown, shutdown_receiver) = mpsc::channel();
            let bus = start_event_bus(
                event_handlers,
                event_subscriber.unwrap(), // Safety: should be Some(...).
                shutdown_receiver,
            );
            (Some(bus), Some(shutdown))
        } else {
            (None, None)
        };

        agreement.start();

        AgreementProcess {
            agreement,
            event_bus: Mutex::new(event_bus),
            event_bus_shutdown,
        }
    }
}

/// A handle to the background threads of an agreement process. When this
/// value is dropped, all background threads are gracefully shut down.
pub struct AgreementProcess<T: Transport> {
    agreement: Arc<LatticeAgreement<T>>,
    event_bus: Mutex<Option<JoinHandle<()>>>,
    event_bus_shutdown: Option<Sender<()>>,
}

impl<T: Transport> AgreementProcess<T> {
    /// Enqueue a candidate value set for the next round. Fire-and-forget:
    /// the decision is observed through the `on_decide` handler and the
    /// journal.
    pub fn propose(&self, values: Vec<u32>) {
        self.agreement.propose(values)
    }

    /// The decided value set of a round, if that round has decided.
    pub fn decided(&self, round: Round) -> Option<Vec<u32>> {
        self.agreement.decided(round)
    }

    pub fn stop(&self) {
        self.agreement.stop();
        if let Some(shutdown) = &self.event_bus_shutdown {
            let _ = shutdown.send(());
        }
        if let Some(bus) = self.event_bus.lock().unwrap().take() {
            let _ = bus.join();
        }
    }
}

impl<T: Transport> Drop for AgreementProcess<T> {
    fn drop(&mut self) {
        self.stop()
    }
}
