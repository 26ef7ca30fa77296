/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! [Trait definition](Journal) for the append-only event log, and a
//! file-backed implementation.
//!
//! The journal is the stack's record of externally observable protocol
//! events: one line per broadcast send (`b {seq}`), one per delivery
//! (`d {author} {seq}`), and one per agreement decision (the decided values,
//! space-separated). The stack only ever appends; it never reads the journal
//! back.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// An append-only, thread-safe, line-oriented writer. Implementations must
/// tolerate appends from multiple threads.
pub trait Journal: Send + Sync {
    /// Append one line to the journal. The line must not contain a newline.
    fn append(&self, line: &str);

    /// Force buffered lines out to stable storage. Called once on `stop`.
    fn flush(&self);
}

/// A [Journal] that appends to a file through a buffered writer.
pub struct FileJournal {
    file: Mutex<BufWriter<File>>,
}

impl FileJournal {
    pub fn create(path: impl AsRef<Path>) -> std::io::Result<Arc<FileJournal>> {
        let file = File::create(path)?;
        Ok(Arc::new(FileJournal {
            file: Mutex::new(BufWriter::new(file)),
        }))
    }
}

impl Journal for FileJournal {
    fn append(&self, line: &str) {
        let mut file = self.file.lock().unwrap();
        // A full disk is not recoverable at this layer; drop the line rather
        // than poison every thread that logs.
        let _ = writeln!(file, "{}", line);
    }

    fn flush(&self) {
        let _ = self.file.lock().unwrap().flush();
    }
}

impl Drop for FileJournal {
    fn drop(&mut self) {
        self.flush()
    }
}
