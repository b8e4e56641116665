//! Cache flag with a single self-expiring timer
//!
//! Setting the flag (re)arms one timer that flips it back after the
//! configured TTL; clearing it cancels the timer. At most one expiry is ever
//! pending per flag. Inside a tokio runtime the timer is a spawned task that
//! is aborted on cancel; outside one it is a sleeping thread.
//!
//! Every arming hands the expiry a [`TimerTicket`]. The expiry re-checks its
//! ticket under the flag's lock before writing, and re-arming happens under
//! the same lock, so a late expiry can never clear a freshly set flag.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tracing::{trace, warn};

use crate::observable::{Observable, Subject};

/// One arming of a [`CacheTimer`]; stale once the timer is re-armed or
/// cancelled
#[derive(Debug, Clone)]
pub(crate) struct TimerTicket {
    generation: Arc<AtomicU64>,
    armed: u64,
}

impl TimerTicket {
    pub(crate) fn is_current(&self) -> bool {
        self.generation.load(Ordering::Acquire) == self.armed
    }
}

/// Single-shot deferred callback, re-armable
pub(crate) struct CacheTimer {
    generation: Arc<AtomicU64>,
    abort_handle: Mutex<Option<AbortHandle>>,
}

impl CacheTimer {
    pub(crate) fn new() -> Self {
        Self {
            generation: Arc::new(AtomicU64::new(0)),
            abort_handle: Mutex::new(None),
        }
    }

    /// Run `on_expire` after `ttl`, replacing any pending expiry
    pub(crate) fn arm(&self, ttl: Duration, on_expire: impl FnOnce(TimerTicket) + Send + 'static) -> TimerTicket {
        self.cancel();
        let ticket = TimerTicket {
            generation: Arc::clone(&self.generation),
            armed: self.generation.fetch_add(1, Ordering::AcqRel) + 1,
        };
        let fire = {
            let ticket = ticket.clone();
            move || on_expire(ticket)
        };

        match Handle::try_current() {
            Ok(handle) => {
                let task = handle.spawn(async move {
                    tokio::time::sleep(ttl).await;
                    fire();
                });
                *self.abort_handle.lock() = Some(task.abort_handle());
                trace!(ttl_ms = ttl.as_millis() as u64, "Armed cache timer task");
            }
            Err(_) => {
                let spawned = thread::Builder::new()
                    .name("entity-store-cache".into())
                    .spawn(move || {
                        thread::sleep(ttl);
                        fire();
                    });
                match spawned {
                    Ok(_) => trace!(ttl_ms = ttl.as_millis() as u64, "Armed cache timer thread"),
                    Err(e) => warn!(error = %e, "Failed to spawn cache timer thread"),
                }
            }
        }
        ticket
    }

    /// Drop the pending expiry, if any
    pub(crate) fn cancel(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        if let Some(handle) = self.abort_handle.lock().take() {
            handle.abort();
            trace!("Cancelled cache timer");
        }
    }

    #[cfg(test)]
    fn ticket(&self) -> TimerTicket {
        TimerTicket {
            generation: Arc::clone(&self.generation),
            armed: self.generation.load(Ordering::Acquire),
        }
    }
}

impl Drop for CacheTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Clear `subject` if `ticket` still names the pending expiry
fn expire(subject: &Subject<bool>, ticket: &TimerTicket, store: &str) -> bool {
    let expired = subject.next_if(false, |current| *current && ticket.is_current());
    if expired {
        trace!(store, "Cache expired");
    } else {
        trace!(store, generation = ticket.armed, "Stale cache timer ignored");
    }
    expired
}

/// Observable cache flag backed by a [`CacheTimer`]
pub(crate) struct CacheFlag {
    subject: Subject<bool>,
    timer: CacheTimer,
    ttl: Option<Duration>,
}

impl CacheFlag {
    pub(crate) fn new(ttl: Option<Duration>) -> Self {
        Self {
            subject: Subject::new(false),
            timer: CacheTimer::new(),
            ttl,
        }
    }

    pub(crate) fn get(&self) -> bool {
        self.subject.value()
    }

    /// Set the flag; a no-op when no TTL is configured
    ///
    /// The timer is (re)armed or cancelled under the flag's lock, even when
    /// the value itself does not change.
    pub(crate) fn set(&self, store: &str, value: bool) {
        let Some(ttl) = self.ttl else {
            trace!(store, "Caching disabled; ignoring set_has_cache");
            return;
        };
        self.subject.next_if(value, |current| {
            if value {
                let subject = self.subject.clone();
                let name = store.to_string();
                self.timer.arm(ttl, move |ticket| {
                    expire(&subject, &ticket, &name);
                });
            } else {
                self.timer.cancel();
            }
            *current != value
        });
    }

    pub(crate) fn observable(&self) -> Observable<bool> {
        self.subject.observable().distinct_until_changed()
    }

    pub(crate) fn close(&self) {
        self.timer.cancel();
        self.subject.complete();
    }

    pub(crate) fn reset(&self) {
        self.subject.next_if(false, |current| {
            self.timer.cancel();
            *current
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_expires_without_runtime() {
        let flag = CacheFlag::new(Some(Duration::from_millis(10)));
        flag.set("test", true);
        assert!(flag.get());
        thread::sleep(Duration::from_millis(40));
        assert!(!flag.get());
    }

    #[test]
    fn test_rearm_extends_expiry() {
        let flag = CacheFlag::new(Some(Duration::from_millis(30)));
        flag.set("test", true);
        thread::sleep(Duration::from_millis(20));
        flag.set("test", true);
        thread::sleep(Duration::from_millis(20));
        assert!(flag.get(), "first timer must have been superseded");
        thread::sleep(Duration::from_millis(40));
        assert!(!flag.get());
    }

    #[test]
    fn test_clear_cancels_timer() {
        let flag = CacheFlag::new(Some(Duration::from_millis(10)));
        flag.set("test", true);
        flag.set("test", false);
        assert!(!flag.get());
        thread::sleep(Duration::from_millis(30));
        assert!(!flag.get());
    }

    #[test]
    fn test_disabled_without_ttl() {
        let flag = CacheFlag::new(None);
        flag.set("test", true);
        assert!(!flag.get());
    }

    #[test]
    fn test_rearm_invalidates_earlier_ticket() {
        let timer = CacheTimer::new();
        let first = timer.arm(Duration::from_secs(60), |_| {});
        let second = timer.arm(Duration::from_secs(60), |_| {});
        assert!(!first.is_current());
        assert!(second.is_current());
        timer.cancel();
        assert!(!second.is_current());
    }

    #[test]
    fn test_late_expiry_keeps_rearmed_flag() {
        let flag = CacheFlag::new(Some(Duration::from_secs(60)));
        flag.set("test", true);
        let superseded = flag.timer.ticket();

        // The earlier expiry wakes up only after the flag was set again
        flag.set("test", true);
        assert!(!expire(&flag.subject, &superseded, "test"));
        assert!(flag.get());

        let pending = flag.timer.ticket();
        assert!(expire(&flag.subject, &pending, "test"));
        assert!(!flag.get());
    }

    #[test]
    fn test_concurrent_rearm_never_leaves_flag_cleared() {
        let flag = Arc::new(CacheFlag::new(Some(Duration::from_secs(60))));
        for _ in 0..50 {
            flag.set("test", true);
            let superseded = flag.timer.ticket();
            let racer = {
                let flag = Arc::clone(&flag);
                thread::spawn(move || expire(&flag.subject, &superseded, "test"))
            };
            flag.set("test", true);
            racer.join().unwrap();
            assert!(flag.get());
        }
    }

    #[tokio::test]
    async fn test_flag_expires_on_runtime() {
        let flag = CacheFlag::new(Some(Duration::from_millis(10)));
        flag.set("test", true);
        assert!(flag.get());
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!flag.get());
    }
}
