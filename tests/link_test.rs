//! Link-layer integration test: payloads sent over an adversarial network
//! (loss, duplication, reordering) are delivered to the peer exactly once
//! per message id.

mod common;

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use common::journal::MemoryJournal;
use common::transport::{mock_transports, FaultyTransport};
use common::{setup_logger, test_configuration, wait_until};
use lattice_rs::link::manager::BasicLinks;
use lattice_rs::types::{MessageId, ProcessId};

#[test]
fn delivers_exactly_once_over_a_faulty_network() {
    setup_logger();

    let num_messages: usize = 30;

    let mut transports = mock_transports(2).into_iter();
    let transport_1 = FaultyTransport::new(transports.next().unwrap(), 0.25, 0.25, 0.2, 7);
    let transport_2 = FaultyTransport::new(transports.next().unwrap(), 0.25, 0.25, 0.2, 11);

    let journal_1 = MemoryJournal::new();
    let journal_2 = MemoryJournal::new();

    let received: Arc<Mutex<Vec<(MessageId, Vec<u8>)>>> = Arc::new(Mutex::new(Vec::new()));
    let received_in_handler = received.clone();
    let links_2 = BasicLinks::new(
        test_configuration(2, 2),
        transport_2,
        journal_2.clone(),
        move |_, msg| {
            received_in_handler
                .lock()
                .unwrap()
                .push((msg.id, msg.payload))
        },
    );
    let links_1 = BasicLinks::new(test_configuration(1, 2), transport_1, journal_1.clone(), |_, _| {});

    links_1.start();
    links_2.start();

    for i in 0..num_messages {
        links_1
            .send(ProcessId::new(2), format!("payload-{}", i).as_bytes())
            .unwrap();
    }

    wait_until(Duration::from_secs(10), "every message is delivered", || {
        received.lock().unwrap().len() >= num_messages
    });
    // Give duplicates (which would be a bug) a chance to show up.
    thread::sleep(Duration::from_millis(300));

    let received = received.lock().unwrap();
    assert_eq!(received.len(), num_messages);

    let ids: HashSet<u64> = received.iter().map(|(id, _)| id.int()).collect();
    assert_eq!(ids, (1..=num_messages as u64).collect::<HashSet<u64>>());
    // Message ids were assigned in send order, so id k carries payload k - 1.
    for (id, payload) in received.iter() {
        assert_eq!(payload, format!("payload-{}", id.int() - 1).as_bytes());
    }

    links_1.stop();
    links_2.stop();

    // The journals agree: 30 sends on one side, 30 distinct deliveries on
    // the other.
    assert_eq!(journal_1.lines().len(), num_messages);
    let deliveries: Vec<String> = journal_2
        .lines()
        .into_iter()
        .filter(|line| line.starts_with("d "))
        .collect();
    assert_eq!(deliveries.len(), num_messages);
}
