//! Bounded drop-oldest event queue.
//!
//! The receive loop is the producer and must never block, so a full queue
//! evicts its oldest entry to make room. The application is the single
//! consumer: [`EventReceiver::recv`] parks only the caller while the queue is
//! empty and yields `None` once the queue has been stopped and drained.
//! [`EventSender::resume`] re-opens a stopped queue after a reconnect.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

/// Default capacity used by [`crate::websocket::WebSocketConfig`].
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

/// Creates a new queue pair holding at most `capacity` items (minimum 1).
#[must_use]
pub fn event_queue<T>(capacity: usize) -> (EventSender<T>, EventReceiver<T>) {
    let shared = Arc::new(Shared {
        ring: Mutex::new(Ring {
            items: VecDeque::with_capacity(capacity.clamp(1, 4096)),
            stopped: false,
            dropped: 0,
        }),
        notify: Notify::new(),
        capacity: capacity.max(1),
    });

    (
        EventSender {
            shared: Arc::clone(&shared),
        },
        EventReceiver { shared },
    )
}

struct Ring<T> {
    items: VecDeque<T>,
    stopped: bool,
    dropped: u64,
}

struct Shared<T> {
    ring: Mutex<Ring<T>>,
    notify: Notify,
    capacity: usize,
}

impl<T> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, Ring<T>> {
        self.ring.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Producer half. Cloning yields another handle to the same queue.
pub struct EventSender<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for EventSender<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> EventSender<T> {
    /// Enqueue `item`, returning the evicted oldest item when the queue was full.
    pub fn push(&self, item: T) -> Option<T> {
        let evicted = {
            let mut ring = self.shared.lock();
            let evicted = if ring.items.len() >= self.shared.capacity {
                ring.dropped += 1;
                ring.items.pop_front()
            } else {
                None
            };
            ring.items.push_back(item);
            evicted
        };
        self.shared.notify.notify_one();
        evicted
    }

    /// Mark the queue stopped. Buffered items stay readable.
    pub fn stop(&self) {
        self.shared.lock().stopped = true;
        self.shared.notify.notify_one();
    }

    /// Re-open a stopped queue.
    pub fn resume(&self) {
        self.shared.lock().stopped = false;
    }

    /// Drop everything buffered.
    pub fn clear(&self) {
        self.shared.lock().items.clear();
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.shared.lock().stopped
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.lock().items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Total items evicted by overflow since creation.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.shared.lock().dropped
    }
}

/// Consumer half.
pub struct EventReceiver<T> {
    shared: Arc<Shared<T>>,
}

impl<T> EventReceiver<T> {
    /// Wait for the next item. `None` once stopped and drained.
    pub async fn recv(&self) -> Option<T> {
        loop {
            let notified = self.shared.notify.notified();
            {
                let mut ring = self.shared.lock();
                if let Some(item) = ring.items.pop_front() {
                    return Some(item);
                }
                if ring.stopped {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Pop without waiting.
    pub fn try_recv(&self) -> Option<T> {
        self.shared.lock().items.pop_front()
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.shared.lock().stopped
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.lock().items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.shared.lock().dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready_eq, task};

    #[test]
    fn test_drop_oldest_on_overflow() {
        let (tx, rx) = event_queue(3);
        for i in 0..3 {
            assert_eq!(tx.push(i), None);
        }
        assert_eq!(tx.push(3), Some(0));
        assert_eq!(tx.push(4), Some(1));

        assert_eq!(rx.dropped(), 2);
        assert_eq!(rx.len(), 3);
        let drained: Vec<_> = std::iter::from_fn(|| rx.try_recv()).collect();
        assert_eq!(drained, vec![2, 3, 4]);
    }

    #[test]
    fn test_zero_capacity_holds_one() {
        let (tx, rx) = event_queue(0);
        assert_eq!(tx.capacity(), 1);
        tx.push("a");
        assert_eq!(tx.push("b"), Some("a"));
        assert_eq!(rx.try_recv(), Some("b"));
    }

    #[test]
    fn test_consumer_parks_until_push() {
        let (tx, rx) = event_queue(4);
        let mut recv = task::spawn(rx.recv());
        assert_pending!(recv.poll());

        tx.push(7);
        assert!(recv.is_woken());
        assert_ready_eq!(recv.poll(), Some(7));
    }

    #[test]
    fn test_stop_wakes_waiter_and_ends_after_drain() {
        let (tx, rx) = event_queue(4);
        {
            let mut recv = task::spawn(rx.recv());
            assert_pending!(recv.poll());
            tx.stop();
            assert!(recv.is_woken());
            assert_ready_eq!(recv.poll(), None);
        }

        tx.push(1);
        let mut recv = task::spawn(rx.recv());
        assert_ready_eq!(recv.poll(), Some(1));
        let mut recv = task::spawn(rx.recv());
        assert_ready_eq!(recv.poll(), None);
    }

    #[tokio::test]
    async fn test_resume_after_stop() {
        let (tx, rx) = event_queue(4);
        tx.stop();
        assert_eq!(rx.recv().await, None);
        assert!(rx.is_stopped());

        tx.resume();
        let producer = tx.clone();
        let handle = tokio::spawn(async move {
            producer.push("reconnected");
        });
        assert_eq!(rx.recv().await, Some("reconnected"));
        handle.await.unwrap();
    }
}
