//! Named timed events on the monotonic clock.
//!
//! A small ordered queue: events fire by deadline, ties break in insertion
//! order, and cancellation by name removes every matching event. The owning
//! task feeds [`TimerQueue::next_deadline`] into its select loop and drains
//! [`TimerQueue::pop_due`] when the deadline passes.

use tokio::time::Instant;

#[derive(Debug)]
struct Entry<T> {
    at: Instant,
    seq: u64,
    name: String,
    event: T,
}

/// Ordered queue of named timed events.
#[derive(Debug)]
pub struct TimerQueue<T> {
    entries: Vec<Entry<T>>,
    seq: u64,
}

impl<T> Default for TimerQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TimerQueue<T> {
    /// Create an empty queue.
    pub fn new() -> Self {
        TimerQueue {
            entries: Vec::new(),
            seq: 0,
        }
    }

    /// Schedule `event` to fire at `at` under `name`.
    pub fn add_event(&mut self, at: Instant, name: impl Into<String>, event: T) {
        let seq = self.seq;
        self.seq += 1;
        self.entries.push(Entry {
            at,
            seq,
            name: name.into(),
            event,
        });
    }

    /// Remove every event scheduled under `name`; returns how many.
    pub fn cancel(&mut self, name: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| e.name != name);
        before - self.entries.len()
    }

    /// The earliest pending deadline, if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.iter().map(|e| e.at).min()
    }

    /// Remove and return all events due at `now`, ordered by deadline then
    /// insertion.
    pub fn pop_due(&mut self, now: Instant) -> Vec<T> {
        let mut due: Vec<Entry<T>> = Vec::new();
        let mut i = 0;
        while i < self.entries.len() {
            if self.entries[i].at <= now {
                due.push(self.entries.swap_remove(i));
            } else {
                i += 1;
            }
        }
        due.sort_by_key(|e| (e.at, e.seq));
        due.into_iter().map(|e| e.event).collect()
    }

    /// Number of pending events.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is scheduled.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop all pending events.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
