//! Files with asynchronous post-ingestion work still outstanding.

use dashmap::DashSet;

/// Concurrent set of file IDs currently being processed.
///
/// The creating thread calls [`start`](Self::start) and the consumer calls
/// [`end`](Self::end); callers need no external locking.
#[derive(Debug, Default)]
pub struct ProcessingRegistry {
    in_flight: DashSet<String>,
}

impl ProcessingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&self, file_id: &str) {
        self.in_flight.insert(file_id.to_string());
    }

    pub fn end(&self, file_id: &str) {
        self.in_flight.remove(file_id);
    }

    pub fn is_processing(&self, file_id: &str) -> bool {
        self.in_flight.contains(file_id)
    }

    pub fn len(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.in_flight.is_empty()
    }
}
