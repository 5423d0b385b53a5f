//! Shared batch buffer
//!
//! The only in-process shared mutable state of the pipeline. One lock guards
//! push, length check and drain, so a size-triggered flush and a timer flush
//! always see disjoint snapshots. The lock is never held across I/O: callers
//! get the snapshot back and persist it themselves.

use parking_lot::Mutex;

use crate::db::UsageEvent;

pub struct BatchBuffer {
    events: Mutex<Vec<UsageEvent>>,
    batch_size: usize,
}

impl BatchBuffer {
    pub fn new(batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            events: Mutex::new(Vec::with_capacity(batch_size)),
            batch_size,
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Append one event. When the buffer reaches `batch_size` it is drained
    /// in the same critical section and the snapshot is returned for flushing.
    pub fn append(&self, event: UsageEvent) -> Option<Vec<UsageEvent>> {
        let mut events = self.events.lock();
        events.push(event);
        if events.len() >= self.batch_size {
            Some(std::mem::replace(&mut *events, Vec::with_capacity(self.batch_size)))
        } else {
            None
        }
    }

    /// Take everything buffered so far; `None` when empty
    pub fn drain(&self) -> Option<Vec<UsageEvent>> {
        let mut events = self.events.lock();
        if events.is_empty() {
            None
        } else {
            Some(std::mem::replace(&mut *events, Vec::with_capacity(self.batch_size)))
        }
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
