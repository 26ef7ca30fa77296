/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! [Trait definition](Transport) for pluggable datagram transports, and the
//! poller thread that moves inbound datagrams into the link layer.
//!
//! The transport is assumed to be unreliable: datagrams may be lost,
//! duplicated, and reordered arbitrarily. Every guarantee above it is built
//! by the [link layer](crate::link). Peers are addressed by [ProcessId];
//! mapping ids to concrete network addresses is the transport
//! implementation's concern.

use std::sync::mpsc::{Receiver, TryRecvError};
use std::thread::{self, JoinHandle};

use crate::types::ProcessId;

/// The largest datagram a [Transport] must accept in a single `send` call.
/// Matches the maximum UDP payload over IPv4. Every frame the stack produces
/// fits inside this bound.
pub const MAX_DATAGRAM_SIZE: usize = 65507;

pub trait Transport: Clone + Send + 'static {
    /// Send a datagram to the specified peer without blocking. Delivery is
    /// best-effort; the caller owns retransmission.
    fn send(&mut self, peer: ProcessId, datagram: &[u8]);

    /// Receive a datagram from any peer. Returns immediately with a `None`
    /// if no datagram is available now.
    fn recv(&mut self) -> Option<(ProcessId, Vec<u8>)>;
}

/// Spawn the poller thread, which polls the transport for datagrams and
/// dispatches each one synchronously to the owning link.
pub(crate) fn start_polling<T: Transport, F>(
    mut transport: T,
    dispatch: F,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()>
where
    F: Fn(ProcessId, Vec<u8>) + Send + 'static,
{
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) => return,
            Err(TryRecvError::Empty) => (),
            Err(TryRecvError::Disconnected) => {
                panic!("Poller thread disconnected from main thread")
            }
        }

        if let Some((source, datagram)) = transport.recv() {
            dispatch(source, datagram);
        } else {
            thread::yield_now()
        }
    })
}
