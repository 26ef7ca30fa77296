use std::sync::{Arc, Mutex};

use lattice_rs::journal::Journal;

/// A journal that keeps its lines in memory, so tests can assert on what the
/// stack recorded. Never leaves any artifacts.
pub(crate) struct MemoryJournal {
    lines: Mutex<Vec<String>>,
}

impl MemoryJournal {
    pub(crate) fn new() -> Arc<MemoryJournal> {
        Arc::new(MemoryJournal {
            lines: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }
}

impl Journal for MemoryJournal {
    fn append(&self, line: &str) {
        self.lines.lock().unwrap().push(line.to_string())
    }

    fn flush(&self) {}
}
