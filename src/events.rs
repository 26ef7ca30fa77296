//! Definitions of protocol events for event handling and logging.
//! Note: an event for a given action indicates that the action has been completed.

use std::sync::mpsc::Sender;
use std::time::SystemTime;

use crate::broadcast::BroadcastId;
use crate::types::{MessageId, ProcessId, ProposalNumber, Round};

pub enum Event {
    // Link-layer events.
    SendMessage(SendMessageEvent),
    ReceiveAck(ReceiveAckEvent),
    // Broadcast-layer events.
    Broadcast(BroadcastEvent),
    Deliver(DeliverEvent),
    // Agreement events.
    Propose(ProposeEvent),
    Decide(DecideEvent),
}

impl Event {
    pub(crate) fn publish(event_publisher: &Option<Sender<Event>>, event: Event) {
        if let Some(event_publisher) = event_publisher {
            let _ = event_publisher.send(event);
        }
    }
}

/// A message was accepted by a reliable link for delivery to `peer`.
pub struct SendMessageEvent {
    pub timestamp: SystemTime,
    pub peer: ProcessId,
    pub id: MessageId,
}

/// An acknowledgment from `peer` settled the message with the given id.
pub struct ReceiveAckEvent {
    pub timestamp: SystemTime,
    pub peer: ProcessId,
    pub id: MessageId,
}

/// The local process broadcast a new message.
pub struct BroadcastEvent {
    pub timestamp: SystemTime,
    pub id: BroadcastId,
    pub payload: Vec<u8>,
}

/// A broadcast message became eligible and was delivered to the application.
pub struct DeliverEvent {
    pub timestamp: SystemTime,
    pub id: BroadcastId,
    pub payload: Vec<u8>,
}

/// The local process started (or revised) a proposal for a round.
pub struct ProposeEvent {
    pub timestamp: SystemTime,
    pub round: Round,
    pub number: ProposalNumber,
    pub values: Vec<u32>,
}

/// A round reached its decision.
pub struct DecideEvent {
    pub timestamp: SystemTime,
    pub round: Round,
    pub values: Vec<u32>,
}
