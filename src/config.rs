/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! User-defined parameters shared by every layer of the stack.
//!
//! The timing defaults are calibrated for a LAN-like setting: the quiescence
//! timeout is the retransmit interval plus the ack flush interval plus a
//! 100 ms network and processing allowance, so a link keeps re-acknowledging
//! for as long as its peer can still plausibly be retransmitting.
//!
//! ## Log Events
//!
//! The stack logs using the [log](https://docs.rs/log/latest/log/) crate. To
//! get these messages printed onto a terminal or to a file, set up a logging
//! implementation, e.g. with [`crate::logging::init_logger`].

use std::time::Duration;

use typed_builder::TypedBuilder;

use crate::types::ProcessId;

/// How often un-acknowledged messages are retransmitted.
pub const DEFAULT_RETRANSMIT_INTERVAL: Duration = Duration::from_millis(250);

/// How often the pending acknowledgment set is flushed to the peer.
pub const DEFAULT_ACK_FLUSH_INTERVAL: Duration = Duration::from_millis(250);

/// How long after the last inbound data frame a link keeps re-sending
/// acknowledgments before going quiescent.
pub const DEFAULT_ACK_QUIESCENCE_TIMEOUT: Duration = Duration::from_millis(600);

/// How long `stop` waits before tearing background threads down, so that
/// in-flight acknowledgments can still be exchanged.
pub const DEFAULT_STOP_GRACE_PERIOD: Duration = Duration::from_millis(250);

/// Stores the user-defined parameters required to run a process, that is:
/// 1. The process' own [id](ProcessId).
/// 2. The full roster of participating processes (the local id included).
/// 3. The link-layer timing knobs, which default to the constants above.
/// 4. The "Log Events" flag; if set to `true`, protocol events are printed
///    through the `log` facade.
#[derive(Clone, TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [Configuration]. On the builder call the following methods to construct a valid [Configuration].

    Required:
    - `.me(...)`
    - `.processes(...)`
    - `.log_events(...)`
"))]
pub struct Configuration {
    #[builder(setter(doc = "Set the local process' id. Required."))]
    pub me: ProcessId,
    #[builder(setter(doc = "Set the ids of all participating processes, the local one included. Required."))]
    pub processes: Vec<ProcessId>,
    #[builder(default = DEFAULT_RETRANSMIT_INTERVAL, setter(doc = "Set the retransmission interval for unacknowledged messages. Optional."))]
    pub retransmit_interval: Duration,
    #[builder(default = DEFAULT_ACK_FLUSH_INTERVAL, setter(doc = "Set the flush interval for pending acknowledgments. Optional."))]
    pub ack_flush_interval: Duration,
    #[builder(default = DEFAULT_ACK_QUIESCENCE_TIMEOUT, setter(doc = "Set how long acknowledgments keep being re-sent after the peer goes quiet. Optional."))]
    pub ack_quiescence_timeout: Duration,
    #[builder(default = DEFAULT_STOP_GRACE_PERIOD, setter(doc = "Set the grace period `stop` waits before joining background threads. Optional."))]
    pub stop_grace_period: Duration,
    #[builder(setter(doc = "Enable logging? Required."))]
    pub log_events: bool,
}

impl Configuration {
    /// Ids of every process other than the local one, i.e. the peers a link
    /// must be maintained to.
    pub fn peers(&self) -> impl Iterator<Item = ProcessId> + '_ {
        let me = self.me;
        self.processes.iter().copied().filter(move |p| *p != me)
    }

    /// Total number of participating processes.
    pub fn num_processes(&self) -> usize {
        self.processes.len()
    }
}

/// The standard "strictly more than half" rule: `count` processes form a
/// majority of `num_processes` participants.
pub fn is_majority(count: usize, num_processes: usize) -> bool {
    count * 2 > num_processes
}
