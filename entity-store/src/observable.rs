//! Push-based observation primitives
//!
//! A [`Subject`] holds a current value and a list of callbacks. Calling
//! [`Subject::next`] replaces the value and invokes every callback on the
//! calling thread before returning. An [`Observable`] is a cold, composable
//! view over a subject: `map`, `filter` and `distinct_until_changed` wrap the
//! subscriber's callback, and each subscription gets its own operator state.
//!
//! # Re-entrancy
//!
//! Callbacks may mutate the store they observe. A `next` issued while the
//! subject is already delivering is queued and drained, in call order, by the
//! outermost `next`. The subject lock is never held while callbacks run.
//!
//! ```text
//! next(a) ──► deliver a to [cb1, cb2]
//!                         └─ cb2 calls next(b) ──► queued
//!         ──► deliver b to [cb1, cb2]
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

/// Boxed subscriber callback
pub type Callback<T> = Box<dyn FnMut(&T) + Send>;

type SharedCallback<T> = Arc<Mutex<Callback<T>>>;

// ============================================================================
// Subscription
// ============================================================================

/// Handle to a live subscription
///
/// Dropping the handle cancels the subscription; keep it alive for as long as
/// updates are wanted, or call [`Subscription::detach`] to keep the callback
/// registered for the lifetime of the source.
#[must_use = "dropping a Subscription cancels it"]
pub struct Subscription {
    teardown: Option<Box<dyn FnOnce() + Send>>,
    closed: Arc<AtomicBool>,
}

impl Subscription {
    fn new(closed: Arc<AtomicBool>, teardown: impl FnOnce() + Send + 'static) -> Self {
        Self {
            teardown: Some(Box::new(teardown)),
            closed,
        }
    }

    fn closed() -> Self {
        Self {
            teardown: None,
            closed: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Stop receiving values
    pub fn unsubscribe(mut self) {
        self.cancel();
    }

    /// Whether the subscription was cancelled or its source completed
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Keep the callback registered without holding the handle
    pub fn detach(mut self) {
        self.teardown = None;
    }

    /// A detached handle has no teardown and leaves `closed` alone
    fn cancel(&mut self) {
        if let Some(teardown) = self.teardown.take() {
            self.closed.store(true, Ordering::Release);
            teardown();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("closed", &self.is_closed())
            .finish()
    }
}

// ============================================================================
// Subject
// ============================================================================

struct Observer<T> {
    id: u64,
    /// Sequence number of the last value this observer already saw when it
    /// registered; queued values at or below it are skipped
    since: u64,
    callback: SharedCallback<T>,
    closed: Arc<AtomicBool>,
}

struct SubjectState<T> {
    current: T,
    seq: u64,
    observers: Vec<Observer<T>>,
    queue: VecDeque<(u64, T)>,
    emitting: bool,
    completed: bool,
    next_id: u64,
}

/// Resets the delivery flag if a callback panics mid-drain
struct EmitGuard<'a, T> {
    state: &'a Mutex<SubjectState<T>>,
}

impl<T> Drop for EmitGuard<'_, T> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            let mut state = self.state.lock();
            state.emitting = false;
            state.queue.clear();
        }
    }
}

/// Behaviour subject: a current value plus synchronous fan-out
///
/// Clones share the same value and subscriber list.
pub struct Subject<T> {
    state: Arc<Mutex<SubjectState<T>>>,
}

impl<T: Clone + Send + 'static> Subject<T> {
    /// Create a subject holding `initial`
    pub fn new(initial: T) -> Self {
        Self {
            state: Arc::new(Mutex::new(SubjectState {
                current: initial,
                seq: 0,
                observers: Vec::new(),
                queue: VecDeque::new(),
                emitting: false,
                completed: false,
                next_id: 0,
            })),
        }
    }

    /// The latest value, including values still queued for delivery
    pub fn value(&self) -> T {
        self.state.lock().current.clone()
    }

    /// Replace the value and notify every subscriber
    ///
    /// A no-op once the subject has completed.
    pub fn next(&self, value: T) {
        self.next_if(value, |_| true);
    }

    /// Replace the value only if `accept` holds for the current one
    ///
    /// `accept` runs under the subject's lock, so the check and the write
    /// cannot interleave with another `next`. It must not touch this subject.
    /// Returns whether the value was replaced.
    pub fn next_if(&self, value: T, accept: impl FnOnce(&T) -> bool) -> bool {
        {
            let mut state = self.state.lock();
            if state.completed || !accept(&state.current) {
                return false;
            }
            state.seq += 1;
            let seq = state.seq;
            state.current = value.clone();
            state.queue.push_back((seq, value));
            if state.emitting {
                return true;
            }
            state.emitting = true;
        }
        self.drain();
        true
    }

    fn drain(&self) {
        let _guard = EmitGuard { state: &self.state };
        loop {
            let (value, observers) = {
                let mut state = self.state.lock();
                match state.queue.pop_front() {
                    Some((seq, value)) => {
                        let observers: Vec<_> = state
                            .observers
                            .iter()
                            .filter(|o| o.since < seq)
                            .map(|o| (Arc::clone(&o.callback), Arc::clone(&o.closed)))
                            .collect();
                        (value, observers)
                    }
                    None => {
                        state.emitting = false;
                        return;
                    }
                }
            };
            for (callback, closed) in observers {
                if closed.load(Ordering::Acquire) {
                    continue;
                }
                (callback.lock())(&value);
            }
        }
    }

    /// Register a callback; it is invoked immediately with the current value
    pub fn subscribe(&self, f: impl FnMut(&T) + Send + 'static) -> Subscription {
        self.subscribe_boxed(Box::new(f))
    }

    fn subscribe_boxed(&self, callback: Callback<T>) -> Subscription {
        let closed = Arc::new(AtomicBool::new(false));
        let callback: SharedCallback<T> = Arc::new(Mutex::new(callback));

        let (id, current, was_emitting) = {
            let mut state = self.state.lock();
            if state.completed {
                return Subscription::closed();
            }
            let id = state.next_id;
            state.next_id += 1;
            let since = state.seq;
            state.observers.push(Observer {
                id,
                since,
                callback: Arc::clone(&callback),
                closed: Arc::clone(&closed),
            });
            let was_emitting = state.emitting;
            state.emitting = true;
            (id, state.current.clone(), was_emitting)
        };

        if was_emitting {
            (callback.lock())(&current);
        } else {
            {
                let _guard = EmitGuard { state: &self.state };
                (callback.lock())(&current);
            }
            self.drain();
        }

        let weak: Weak<Mutex<SubjectState<T>>> = Arc::downgrade(&self.state);
        Subscription::new(closed, move || {
            if let Some(state) = weak.upgrade() {
                state.lock().observers.retain(|o| o.id != id);
            }
        })
    }

    /// Stop all delivery and drop every subscriber
    ///
    /// Outstanding [`Subscription`]s report `is_closed()`, further `next`
    /// calls are ignored and new subscriptions are closed on arrival.
    pub fn complete(&self) {
        let observers = {
            let mut state = self.state.lock();
            state.completed = true;
            state.queue.clear();
            std::mem::take(&mut state.observers)
        };
        for observer in &observers {
            observer.closed.store(true, Ordering::Release);
        }
        // Callbacks (and whatever they capture) are dropped outside the lock
        drop(observers);
    }

    /// Whether [`Subject::complete`] has been called
    pub fn is_completed(&self) -> bool {
        self.state.lock().completed
    }

    /// Number of registered subscribers
    pub fn observer_count(&self) -> usize {
        self.state.lock().observers.len()
    }

    /// A cold observable over this subject
    pub fn observable(&self) -> Observable<T> {
        let subject = self.clone();
        Observable::new(move |callback| subject.subscribe_boxed(callback))
    }
}

impl<T> Clone for Subject<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Subject<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Subject")
            .field("current", &state.current)
            .field("observers", &state.observers.len())
            .field("completed", &state.completed)
            .finish()
    }
}

// ============================================================================
// Observable
// ============================================================================

type SubscribeFn<T> = dyn Fn(Callback<T>) -> Subscription + Send + Sync;

/// Cold, composable stream of values
///
/// Nothing runs until [`Observable::subscribe`] is called; each subscription
/// runs the operator chain independently.
pub struct Observable<T> {
    subscribe_fn: Arc<SubscribeFn<T>>,
}

impl<T: Clone + Send + 'static> Observable<T> {
    /// Build an observable from a subscribe function
    pub fn new(f: impl Fn(Callback<T>) -> Subscription + Send + Sync + 'static) -> Self {
        Self {
            subscribe_fn: Arc::new(f),
        }
    }

    /// Receive every value, starting with the current one
    pub fn subscribe(&self, f: impl FnMut(&T) + Send + 'static) -> Subscription {
        (self.subscribe_fn)(Box::new(f))
    }

    /// Project each value
    pub fn map<U, F>(&self, f: F) -> Observable<U>
    where
        U: Clone + Send + 'static,
        F: Fn(&T) -> U + Send + Sync + 'static,
    {
        let source = self.clone();
        let f = Arc::new(f);
        Observable::new(move |mut callback: Callback<U>| {
            let f = Arc::clone(&f);
            source.subscribe(move |value| callback(&f(value)))
        })
    }

    /// Drop values failing the predicate
    pub fn filter<F>(&self, predicate: F) -> Observable<T>
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        let source = self.clone();
        let predicate = Arc::new(predicate);
        Observable::new(move |mut callback: Callback<T>| {
            let predicate = Arc::clone(&predicate);
            source.subscribe(move |value| {
                if predicate(value) {
                    callback(value);
                }
            })
        })
    }

    /// Suppress values equal to the previous delivered one under `eq`
    pub fn distinct_until_changed_by<F>(&self, eq: F) -> Observable<T>
    where
        F: Fn(&T, &T) -> bool + Send + Sync + 'static,
    {
        let source = self.clone();
        let eq = Arc::new(eq);
        Observable::new(move |mut callback: Callback<T>| {
            let eq = Arc::clone(&eq);
            let mut last: Option<T> = None;
            source.subscribe(move |value| {
                if last.as_ref().is_some_and(|prev| eq(prev, value)) {
                    return;
                }
                last = Some(value.clone());
                callback(value);
            })
        })
    }

    /// Suppress values equal to the previous delivered one
    pub fn distinct_until_changed(&self) -> Observable<T>
    where
        T: PartialEq,
    {
        self.distinct_until_changed_by(|a, b| a == b)
    }

    /// The value a new subscriber would receive first, if any
    pub fn snapshot(&self) -> Option<T> {
        let slot = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&slot);
        let subscription = self.subscribe(move |value| {
            let mut sink = sink.lock();
            if sink.is_none() {
                *sink = Some(value.clone());
            }
        });
        drop(subscription);
        let value = slot.lock().take();
        value
    }
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            subscribe_fn: Arc::clone(&self.subscribe_fn),
        }
    }
}

impl<T> fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Observable(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder<T: Clone + Send + 'static>() -> (Arc<Mutex<Vec<T>>>, impl FnMut(&T) + Send + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |v: &T| sink.lock().push(v.clone()))
    }

    #[test]
    fn test_subject_replays_current_then_pushes() {
        let subject = Subject::new(1);
        let (seen, cb) = recorder::<i32>();
        let _sub = subject.subscribe(cb);
        subject.next(2);
        subject.next(3);
        assert_eq!(*seen.lock(), vec![1, 2, 3]);
        assert_eq!(subject.value(), 3);
    }

    #[test]
    fn test_unsubscribe_and_drop_cancel() {
        let subject = Subject::new(0);
        let (seen, cb) = recorder::<i32>();
        let sub = subject.subscribe(cb);
        assert_eq!(subject.observer_count(), 1);
        sub.unsubscribe();
        subject.next(1);
        assert_eq!(*seen.lock(), vec![0]);
        assert_eq!(subject.observer_count(), 0);

        {
            let _scoped = subject.subscribe(|_| {});
            assert_eq!(subject.observer_count(), 1);
        }
        assert_eq!(subject.observer_count(), 0);
    }

    #[test]
    fn test_detach_keeps_callback() {
        let subject = Subject::new(0);
        let (seen, cb) = recorder::<i32>();
        subject.subscribe(cb).detach();
        subject.next(1);
        subject.next(2);
        assert_eq!(*seen.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn test_next_if_checks_current_value() {
        let subject = Subject::new(1);
        let (seen, cb) = recorder::<i32>();
        let _sub = subject.subscribe(cb);
        assert!(!subject.next_if(5, |current| *current > 1));
        assert!(subject.next_if(2, |current| *current == 1));
        assert_eq!(*seen.lock(), vec![1, 2]);
    }

    #[test]
    fn test_complete_closes_everything() {
        let subject = Subject::new(0);
        let (seen, cb) = recorder::<i32>();
        let sub = subject.subscribe(cb);
        subject.complete();
        subject.next(5);
        assert!(sub.is_closed());
        assert_eq!(*seen.lock(), vec![0]);
        assert!(subject.subscribe(|_| {}).is_closed());
    }

    #[test]
    fn test_reentrant_next_is_queued_in_order() {
        let subject = Subject::new(0);
        let inner = subject.clone();
        let _feedback = subject.subscribe(move |v| {
            if *v == 1 {
                inner.next(2);
            }
        });
        let (seen, cb) = recorder::<i32>();
        let _sub = subject.subscribe(cb);
        subject.next(1);
        assert_eq!(*seen.lock(), vec![0, 1, 2]);
        assert_eq!(subject.value(), 2);
    }

    #[test]
    fn test_subscribe_during_delivery_skips_older_values() {
        let subject = Subject::new(0);
        let (seen, cb) = recorder::<i32>();
        let late = Arc::new(Mutex::new(Some(cb)));
        let holder: Arc<Mutex<Vec<Subscription>>> = Arc::new(Mutex::new(Vec::new()));
        let source = subject.clone();
        let subs = Arc::clone(&holder);
        let _trigger = subject.subscribe(move |v| {
            if *v == 1 {
                if let Some(cb) = late.lock().take() {
                    subs.lock().push(source.subscribe(cb));
                }
            }
        });
        subject.next(1);
        subject.next(2);
        assert_eq!(*seen.lock(), vec![1, 2]);
    }

    #[test]
    fn test_map_filter_distinct() {
        let subject = Subject::new(1);
        let (seen, cb) = recorder::<i32>();
        let _sub = subject
            .observable()
            .map(|v| v / 10)
            .distinct_until_changed()
            .filter(|v| *v != 2)
            .subscribe(cb);
        for v in [5, 12, 15, 23, 31] {
            subject.next(v);
        }
        assert_eq!(*seen.lock(), vec![0, 1, 3]);
    }

    #[test]
    fn test_each_subscription_has_own_state() {
        let subject = Subject::new(1);
        let distinct = subject.observable().distinct_until_changed();
        let (a, cb_a) = recorder::<i32>();
        let _sa = distinct.subscribe(cb_a);
        subject.next(1);
        let (b, cb_b) = recorder::<i32>();
        let _sb = distinct.subscribe(cb_b);
        assert_eq!(*a.lock(), vec![1]);
        assert_eq!(*b.lock(), vec![1]);
    }

    #[test]
    fn test_snapshot() {
        let subject = Subject::new("x".to_string());
        assert_eq!(subject.observable().snapshot(), Some("x".to_string()));
        assert_eq!(subject.observer_count(), 0);
    }
}
