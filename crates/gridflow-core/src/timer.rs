//! One-shot deadline scheduling.
//!
//! The engine defers work (push aggregation flushes) to a point in time, but a
//! library cannot assume an event loop. [`DeadlineQueue`] keeps armed
//! deadlines; the host asks [`DeadlineQueue::next_deadline`] how long to sleep
//! and calls [`DeadlineQueue::take_expired`] with the current instant. Tests
//! inject synthetic instants the same way.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Instant;

use parking_lot::Mutex;
use slotmap::{new_key_type, SlotMap};

use crate::error::{Result, TimerError};

new_key_type! {
    /// A unique identifier for an armed deadline.
    pub struct TimerId;
}

/// An entry in the deadline queue (min-heap by fire time).
#[derive(Debug, Clone, Copy)]
struct QueueEntry {
    id: TimerId,
    fire_time: Instant,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.fire_time == other.fire_time
    }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse order for min-heap (BinaryHeap is max-heap by default).
        other.fire_time.cmp(&self.fire_time)
    }
}

#[derive(Default)]
struct Inner {
    /// All armed deadlines. A deadline stays here until it expires or is
    /// canceled; the heap may contain stale entries for canceled ids.
    armed: SlotMap<TimerId, Instant>,
    queue: BinaryHeap<QueueEntry>,
}

/// A registry of one-shot deadlines with host-injected time.
///
/// Unlike a timer wheel running on its own thread, `DeadlineQueue` never reads
/// the clock: every query takes `now` explicitly, so the owner decides when
/// time passes. This keeps deferred work deterministic under test.
pub struct DeadlineQueue {
    inner: Mutex<Inner>,
}

impl DeadlineQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Arm a one-shot deadline.
    ///
    /// Returns the id that [`take_expired`](Self::take_expired) will report
    /// once `deadline` is reached.
    pub fn start(&self, deadline: Instant) -> TimerId {
        let mut inner = self.inner.lock();
        let id = inner.armed.insert(deadline);
        inner.queue.push(QueueEntry {
            id,
            fire_time: deadline,
        });
        id
    }

    /// Cancel an armed deadline.
    ///
    /// Returns an error if the id already fired or was never armed.
    pub fn cancel(&self, id: TimerId) -> Result<()> {
        if self.inner.lock().armed.remove(id).is_some() {
            Ok(())
        } else {
            Err(TimerError::InvalidTimerId.into())
        }
    }

    /// Whether the deadline is still armed.
    pub fn is_armed(&self, id: TimerId) -> bool {
        self.inner.lock().armed.contains_key(id)
    }

    /// The earliest armed deadline, if any.
    ///
    /// The host sleeps until this instant before calling
    /// [`take_expired`](Self::take_expired) again.
    pub fn next_deadline(&self) -> Option<Instant> {
        let mut inner = self.inner.lock();
        // Drop stale entries for canceled ids from the front of the heap.
        while let Some(entry) = inner.queue.peek() {
            if inner.armed.contains_key(entry.id) {
                return Some(entry.fire_time);
            }
            inner.queue.pop();
        }
        None
    }

    /// Remove and return every deadline that has fired at `now`.
    ///
    /// Expired ids are returned in fire-time order.
    pub fn take_expired(&self, now: Instant) -> Vec<TimerId> {
        let mut inner = self.inner.lock();
        let mut fired = Vec::new();

        while let Some(entry) = inner.queue.peek() {
            if entry.fire_time > now {
                break;
            }
            let entry = *entry;
            inner.queue.pop();

            if inner.armed.remove(entry.id).is_some() {
                tracing::trace!(
                    target: crate::logging::targets::TIMER,
                    id = ?entry.id,
                    "deadline fired"
                );
                fired.push(entry.id);
            }
        }

        fired
    }

    /// Number of armed deadlines.
    pub fn armed_count(&self) -> usize {
        self.inner.lock().armed.len()
    }
}

impl Default for DeadlineQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_expires_in_order() {
        let queue = DeadlineQueue::new();
        let now = Instant::now();

        let late = queue.start(now + Duration::from_millis(200));
        let early = queue.start(now + Duration::from_millis(50));

        assert_eq!(queue.take_expired(now), Vec::<TimerId>::new());
        assert_eq!(queue.next_deadline(), Some(now + Duration::from_millis(50)));

        let fired = queue.take_expired(now + Duration::from_millis(300));
        assert_eq!(fired, vec![early, late]);
        assert_eq!(queue.armed_count(), 0);
        assert_eq!(queue.next_deadline(), None);
    }

    #[test]
    fn test_cancel() {
        let queue = DeadlineQueue::new();
        let now = Instant::now();

        let id = queue.start(now + Duration::from_millis(10));
        assert!(queue.is_armed(id));
        assert!(queue.cancel(id).is_ok());
        assert!(!queue.is_armed(id));

        // Canceled deadline never fires and is skipped by next_deadline.
        assert_eq!(queue.next_deadline(), None);
        assert!(queue.take_expired(now + Duration::from_secs(1)).is_empty());

        // Second cancel is an error.
        assert!(queue.cancel(id).is_err());
    }

    #[test]
    fn test_exact_deadline_fires() {
        let queue = DeadlineQueue::new();
        let now = Instant::now();
        let at = now + Duration::from_millis(100);

        let id = queue.start(at);
        assert!(queue.take_expired(at - Duration::from_millis(1)).is_empty());
        assert_eq!(queue.take_expired(at), vec![id]);
    }
}
