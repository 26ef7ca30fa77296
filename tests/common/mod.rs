pub(crate) mod journal;

pub(crate) mod transport;

use std::time::{Duration, Instant};

use lattice_rs::config::Configuration;
use lattice_rs::types::ProcessId;
use log::LevelFilter;

/// Set up a logger that prints protocol events at Info and above.
pub(crate) fn setup_logger() {
    lattice_rs::logging::init_logger(LevelFilter::Info)
}

/// A configuration with short timings so that tests converge quickly.
pub(crate) fn test_configuration(me: u64, num_processes: u64) -> Configuration {
    Configuration::builder()
        .me(ProcessId::new(me))
        .processes((1..=num_processes).map(ProcessId::new).collect())
        .retransmit_interval(Duration::from_millis(20))
        .ack_flush_interval(Duration::from_millis(20))
        .ack_quiescence_timeout(Duration::from_millis(120))
        .stop_grace_period(Duration::from_millis(60))
        .log_events(true)
        .build()
}

/// Poll `condition` every 10 ms until it holds, panicking after `timeout`.
pub(crate) fn wait_until(timeout: Duration, what: &str, condition: impl Fn() -> bool) {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    panic!("timed out after {:?} waiting until {}", timeout, what);
}
