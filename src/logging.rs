/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions that log out events.
//!
//! The logs defined in this module are printed if the user enabled them via
//! the [configuration](crate::config::Configuration).
//!
//! The stack logs using the [log](https://docs.rs/log/latest/log/) crate. To
//! get these messages printed onto a terminal, either set up a logging
//! implementation yourself or call [init_logger].
//!
//! ## Log message format
//!
//! Log messages are CSVs (Comma Separated Values) with at least two values.
//! The first two values are always:
//! 1. The name of the [event](crate::events) in PascalCase (defined in this
//!    module as constants).
//! 2. The time the event was emitted (as number of seconds since the Unix
//!    Epoch).
//!
//! The rest of the values differ depending on the kind of event. For example,
//! the following snippet is how a [Deliver](crate::events::DeliverEvent)
//! event is printed:
//!
//! ```text
//! Deliver, 1701329264, 3, 17, aGVsbG8
//! ```
//!
//! In the snippet:
//! - The third value is the id of the message's author.
//! - The fourth value is the message's sequence number.
//! - The fifth value is the first seven characters of the Base64 encoding of
//!   the message payload.

use std::io;
use std::sync::Once;
use std::thread;
use std::time::SystemTime;

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use log::LevelFilter;

use crate::events::*;

// Names of each event in PascalCase for printing:
pub const SEND_MESSAGE: &str = "SendMessage";
pub const RECEIVE_ACK: &str = "ReceiveAck";
pub const BROADCAST: &str = "Broadcast";
pub const DELIVER: &str = "Deliver";
pub const PROPOSE: &str = "Propose";
pub const DECIDE: &str = "Decide";

/// Implemented by event types. Used to get a closure that logs the event.
pub(crate) trait Logger {
    /// Returns a pointer to the default logging handler for a given event type.
    fn get_logger() -> Box<dyn Fn(&Self) + Send>;
}

impl Logger for SendMessageEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |send_message_event: &SendMessageEvent| {
            log::debug!(
                "{}, {}, {}, {}",
                SEND_MESSAGE,
                secs_since_unix_epoch(send_message_event.timestamp),
                send_message_event.peer,
                send_message_event.id,
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReceiveAckEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |receive_ack_event: &ReceiveAckEvent| {
            log::debug!(
                "{}, {}, {}, {}",
                RECEIVE_ACK,
                secs_since_unix_epoch(receive_ack_event.timestamp),
                receive_ack_event.peer,
                receive_ack_event.id,
            )
        };
        Box::new(logger)
    }
}

impl Logger for BroadcastEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |broadcast_event: &BroadcastEvent| {
            log::info!(
                "{}, {}, {}, {}",
                BROADCAST,
                secs_since_unix_epoch(broadcast_event.timestamp),
                broadcast_event.id.seq,
                first_seven_base64_chars(&broadcast_event.payload),
            )
        };
        Box::new(logger)
    }
}

impl Logger for DeliverEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |deliver_event: &DeliverEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                DELIVER,
                secs_since_unix_epoch(deliver_event.timestamp),
                deliver_event.id.author,
                deliver_event.id.seq,
                first_seven_base64_chars(&deliver_event.payload),
            )
        };
        Box::new(logger)
    }
}

impl Logger for ProposeEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |propose_event: &ProposeEvent| {
            log::info!(
                "{}, {}, {}, {}, {:?}",
                PROPOSE,
                secs_since_unix_epoch(propose_event.timestamp),
                propose_event.round,
                propose_event.number,
                propose_event.values,
            )
        };
        Box::new(logger)
    }
}

impl Logger for DecideEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |decide_event: &DecideEvent| {
            log::info!(
                "{}, {}, {}, {:?}",
                DECIDE,
                secs_since_unix_epoch(decide_event.timestamp),
                decide_event.round,
                decide_event.values,
            )
        };
        Box::new(logger)
    }
}

static LOGGER_INIT: Once = Once::new();

/// Set up a stdout logger that prints all log messages at `level` and above.
/// Safe to call more than once; only the first call has an effect.
pub fn init_logger(level: LevelFilter) {
    LOGGER_INIT.call_once(|| {
        fern::Dispatch::new()
            .format(|out, message, record| {
                out.finish(format_args!(
                    "[{:?}][{}] {}",
                    thread::current().id(),
                    record.level(),
                    message
                ))
            })
            .level(level)
            .chain(io::stdout())
            .apply()
            .unwrap();
    })
}

// Get a more readable representation of a bytesequence by base64-encoding it and taking the first 7 characters.
fn first_seven_base64_chars(bytes: &[u8]) -> String {
    let encoded = STANDARD_NO_PAD.encode(bytes);
    if encoded.len() > 7 {
        encoded[0..7].to_string()
    } else {
        encoded
    }
}

fn secs_since_unix_epoch(timestamp: SystemTime) -> u64 {
    timestamp
        .duration_since(SystemTime::UNIX_EPOCH)
        .expect("Event occured before the Unix Epoch.")
        .as_secs()
}
