//! In-memory batch accumulator with a size-threshold trigger
//!
//! The accumulator owns the pending event sequence and the size half of the
//! dual flush policy. The time half (the recurring interval) stays in the
//! consumer loop, which re-arms it on every flush.

use super::types::CounterEvent;

/// Ordered, append-only sequence of pending counter events
///
/// Lives between two flushes and is always drained to empty, never
/// partially.
#[derive(Debug)]
pub struct BatchAccumulator {
    events: Vec<CounterEvent>,
    size_threshold: usize,
}

impl BatchAccumulator {
    pub fn new(size_threshold: usize) -> Self {
        Self {
            events: Vec::with_capacity(size_threshold),
            size_threshold,
        }
    }

    /// Append one event; returns true when the size threshold is reached
    /// and the batch should flush immediately.
    pub fn append(&mut self, event: CounterEvent) -> bool {
        self.events.push(event);
        self.events.len() >= self.size_threshold
    }

    /// Take the whole pending sequence, leaving the accumulator empty.
    pub fn drain(&mut self) -> Vec<CounterEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
