//! Blocking iteration over observable values
//!
//! Bridges the push-based [`Observable`] to a pull-based consumer on another
//! thread:
//! - Blocking: `recv()`, `for value in iter`
//! - Non-blocking: `try_recv()`, `try_iter()`
//! - Timeout: `recv_timeout()`, `timeout_iter()`

use std::sync::mpsc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::observable::{Observable, Subscription};

/// Blocking iterator over the values an [`Observable`] emits
///
/// The first value is whatever the observable replays on subscribe (the
/// current state for store selectors). The iterator ends once the source
/// completes, e.g. after the store is destroyed. Dropping it unsubscribes.
///
/// # Example
///
/// ```rust,ignore
/// let names = query.select_entity_field(Id::from(1), "name");
/// for name in names.changes().timeout_iter(Duration::from_secs(1)) {
///     println!("name is now {name:?}");
/// }
/// ```
pub struct ChangeIterator<T> {
    rx: Mutex<mpsc::Receiver<T>>,
    subscription: Subscription,
}

impl<T> ChangeIterator<T> {
    /// Block until the next value is available
    ///
    /// Returns `None` once the source has completed.
    pub fn recv(&self) -> Option<T> {
        self.rx.lock().recv().ok()
    }

    /// Block until the next value or timeout expires
    pub fn recv_timeout(&self, timeout: Duration) -> Option<T> {
        self.rx.lock().recv_timeout(timeout).ok()
    }

    /// Try to receive a value without blocking
    pub fn try_recv(&self) -> Option<T> {
        self.rx.lock().try_recv().ok()
    }

    /// Non-blocking iterator over the values already queued
    pub fn try_iter(&self) -> TryIter<'_, T> {
        TryIter { inner: self }
    }

    /// Blocking iterator that stops after `timeout` passes without a value
    pub fn timeout_iter(&self, timeout: Duration) -> TimeoutIter<'_, T> {
        TimeoutIter {
            inner: self,
            timeout,
        }
    }

    /// Whether the underlying subscription has been closed
    pub fn is_closed(&self) -> bool {
        self.subscription.is_closed()
    }
}

impl<T> Iterator for ChangeIterator<T> {
    type Item = T;

    fn next(&mut self) -> Option<Self::Item> {
        self.recv()
    }
}

/// Non-blocking iterator over currently queued values
pub struct TryIter<'a, T> {
    inner: &'a ChangeIterator<T>,
}

impl<T> Iterator for TryIter<'_, T> {
    type Item = T;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.try_recv()
    }
}

/// Blocking iterator with timeout
pub struct TimeoutIter<'a, T> {
    inner: &'a ChangeIterator<T>,
    timeout: Duration,
}

impl<T> Iterator for TimeoutIter<'_, T> {
    type Item = T;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.recv_timeout(self.timeout)
    }
}

impl<T: Clone + Send + 'static> Observable<T> {
    /// Subscribe through a channel and iterate the values on any thread
    pub fn changes(&self) -> ChangeIterator<T> {
        let (tx, rx) = mpsc::channel();
        let subscription = self.subscribe(move |value: &T| {
            // Receiver gone means the iterator is being dropped
            let _ = tx.send(value.clone());
        });
        ChangeIterator {
            rx: Mutex::new(rx),
            subscription,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::observable::Subject;
    use std::thread;
    use std::time::{Duration, Instant};

    #[test]
    fn test_first_value_is_current() {
        let subject = Subject::new(7);
        let changes = subject.observable().changes();
        assert_eq!(changes.try_recv(), Some(7));
        assert_eq!(changes.try_recv(), None);
    }

    #[test]
    fn test_try_iter_drains_queue() {
        let subject = Subject::new(0);
        let changes = subject.observable().changes();
        subject.next(1);
        subject.next(2);
        let values: Vec<_> = changes.try_iter().collect();
        assert_eq!(values, vec![0, 1, 2]);
    }

    #[test]
    fn test_recv_timeout_expires() {
        let subject = Subject::new(0);
        let changes = subject.observable().changes();
        changes.try_recv();

        let start = Instant::now();
        assert!(changes.recv_timeout(Duration::from_millis(20)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_cross_thread_delivery() {
        let subject = Subject::new(0);
        let changes = subject.observable().changes();
        let producer = subject.clone();

        let handle = thread::spawn(move || {
            for v in 1..=3 {
                producer.next(v);
            }
        });
        handle.join().unwrap();

        let values: Vec<_> = changes.timeout_iter(Duration::from_millis(50)).collect();
        assert_eq!(values, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_ends_on_complete() {
        let subject = Subject::new(0);
        let mut changes = subject.observable().changes();
        subject.complete();
        assert_eq!(changes.next(), Some(0));
        assert_eq!(changes.next(), None);
        assert!(changes.is_closed());
    }

    #[test]
    fn test_drop_unsubscribes() {
        let subject = Subject::new(0);
        let changes = subject.observable().changes();
        assert_eq!(subject.observer_count(), 1);
        drop(changes);
        assert_eq!(subject.observer_count(), 0);
    }
}
