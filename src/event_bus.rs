use std::sync::mpsc::Receiver;
use std::sync::mpsc::TryRecvError;
use std::thread;
use std::thread::JoinHandle;

use crate::events::*;
use crate::logging::Logger;

pub(crate) type HandlerPtr<T> = Box<dyn Fn(&T) + Send>;

pub(crate) struct EventHandlers {
    pub(crate) send_message_handlers: Vec<HandlerPtr<SendMessageEvent>>,
    pub(crate) receive_ack_handlers: Vec<HandlerPtr<ReceiveAckEvent>>,
    pub(crate) broadcast_handlers: Vec<HandlerPtr<BroadcastEvent>>,
    pub(crate) deliver_handlers: Vec<HandlerPtr<DeliverEvent>>,
    pub(crate) propose_handlers: Vec<HandlerPtr<ProposeEvent>>,
    pub(crate) decide_handlers: Vec<HandlerPtr<DecideEvent>>,
}

impl EventHandlers {
    pub(crate) fn new(
        log_events: bool,
        on_deliver: Option<HandlerPtr<DeliverEvent>>,
        on_decide: Option<HandlerPtr<DecideEvent>>,
    ) -> EventHandlers {
        let mut handlers = EventHandlers {
            send_message_handlers: Vec::new(),
            receive_ack_handlers: Vec::new(),
            broadcast_handlers: Vec::new(),
            deliver_handlers: Vec::new(),
            propose_handlers: Vec::new(),
            decide_handlers: Vec::new(),
        };

        if log_events {
            handlers.send_message_handlers.push(SendMessageEvent::get_logger());
            handlers.receive_ack_handlers.push(ReceiveAckEvent::get_logger());
            handlers.broadcast_handlers.push(BroadcastEvent::get_logger());
            handlers.deliver_handlers.push(DeliverEvent::get_logger());
            handlers.propose_handlers.push(ProposeEvent::get_logger());
            handlers.decide_handlers.push(DecideEvent::get_logger());
        }

        if let Some(handler) = on_deliver {
            handlers.deliver_handlers.push(handler);
        }
        if let Some(handler) = on_decide {
            handlers.decide_handlers.push(handler);
        }

        handlers
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.send_message_handlers.is_empty()
            && self.receive_ack_handlers.is_empty()
            && self.broadcast_handlers.is_empty()
            && self.deliver_handlers.is_empty()
            && self.propose_handlers.is_empty()
            && self.decide_handlers.is_empty()
    }

    pub(crate) fn fire_handlers(&self, event: Event) {
        match event {
            Event::SendMessage(send_message_event) => self
                .send_message_handlers
                .iter()
                .for_each(|handler| handler(&send_message_event)),

            Event::ReceiveAck(receive_ack_event) => self
                .receive_ack_handlers
                .iter()
                .for_each(|handler| handler(&receive_ack_event)),

            Event::Broadcast(broadcast_event) => self
                .broadcast_handlers
                .iter()
                .for_each(|handler| handler(&broadcast_event)),

            Event::Deliver(deliver_event) => self
                .deliver_handlers
                .iter()
                .for_each(|handler| handler(&deliver_event)),

            Event::Propose(propose_event) => self
                .propose_handlers
                .iter()
                .for_each(|handler| handler(&propose_event)),

            Event::Decide(decide_event) => self
                .decide_handlers
                .iter()
                .for_each(|handler| handler(&decide_event)),
        }
    }
}

pub(crate) fn start_event_bus(
    event_handlers: EventHandlers,
    event_subscriber: Receiver<Event>,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) => return,
            Err(TryRecvError::Empty) => (),
            Err(TryRecvError::Disconnected) => {
                panic!("event_bus thread disconnected from main thread")
            }
        }

        match event_subscriber.try_recv() {
            Ok(event) => event_handlers.fire_handlers(event),
            Err(TryRecvError::Empty) => thread::yield_now(),
            // The publishing side closes only after this thread is told to
            // shut down; drain whatever is left and wait for the signal.
            Err(TryRecvError::Disconnected) => thread::yield_now(),
        }
    })
}
