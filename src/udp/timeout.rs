//! Timeouts and a queue for them.

use std::cmp;
use std::collections::BinaryHeap;
use std::time::Instant;

//------------ Timeout -------------------------------------------------------

/// A value together with the moment it expires.
///
/// Ordering is reversed so that the binary heap, a max-heap, keeps the
/// earliest deadline on top.
struct Timeout<T>(Instant, T);

impl<T> PartialOrd for Timeout<T> {
    fn partial_cmp(&self, other: &Self) -> Option<cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Timeout<T> {
    fn cmp(&self, other: &Self) -> cmp::Ordering {
        other.0.cmp(&self.0)
    }
}

impl<T> PartialEq for Timeout<T> {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq(&other.0)
    }
}

impl<T> Eq for Timeout<T> {}

//------------ TimeoutQueue --------------------------------------------------

/// A queue for values that time out.
///
/// Values are never removed early. Whoever owns the queue has to skip
/// values that have become irrelevant when they are popped, or drop them
/// from the head via [`clean_head`][Self::clean_head].
pub struct TimeoutQueue<T>(BinaryHeap<Timeout<T>>);

impl<T> TimeoutQueue<T> {
    /// Creates a new timeout queue.
    pub fn new() -> Self {
        TimeoutQueue(BinaryHeap::new())
    }

    /// Returns whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the number of values in the queue.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Adds a new value and its deadline to the queue.
    pub fn push(&mut self, deadline: Instant, t: T) {
        self.0.push(Timeout(deadline, t))
    }

    /// Returns the first item whose deadline has been reached by `now`.
    pub fn pop_expired(&mut self, now: Instant) -> Option<T> {
        match self.0.peek() {
            Some(top) if top.0 <= now => self.0.pop().map(|x| x.1),
            _ => None,
        }
    }

    /// Returns the time of the next deadline or `None` if empty.
    pub fn next_timeout(&self) -> Option<Instant> {
        self.0.peek().map(|x| x.0)
    }

    /// Drops values from the head of the queue for as long as `stale`
    /// says they are of no interest anymore.
    pub fn clean_head<F: Fn(&T) -> bool>(&mut self, stale: F) {
        while let Some(top) = self.0.peek() {
            if !stale(&top.1) {
                break;
            }
            self.0.pop();
        }
    }
}

impl<T> Default for TimeoutQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

//============ Tests =========================================================
