//! Level-triggered cancellation, observable from any thread.
//!
//! A [`CancellationToken`] starts unset and transitions to set exactly
//! once. Subscribers registered before the transition run synchronously,
//! on whichever thread calls [`CancellationToken::cancel`], the moment the
//! transition happens; subscribers registered afterward run immediately
//! inline. This is the primitive `Pool::dispose` uses to guarantee it has
//! "waited for subscribers of the cancellation registration to run"
//! before returning (§4.4).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crossbeam_channel::{Receiver, Sender};

type Subscriber = Box<dyn FnOnce() + Send>;

struct Inner {
    cancelled: AtomicBool,
    subscribers: Mutex<Vec<Subscriber>>,
    /// Dropped on cancellation, so any thread blocked in a `select!` on
    /// [`CancellationToken::wait_channel`] wakes with `Disconnected`.
    wake_sender: Mutex<Option<Sender<()>>>,
    wake_receiver: Receiver<()>,
}

/// A cloneable, level-triggered cancellation signal.
#[derive(Clone)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

impl CancellationToken {
    /// Creates a fresh, unset token.
    pub fn new() -> Self {
        let (wake_sender, wake_receiver) = crossbeam_channel::bounded(0);
        CancellationToken {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                subscribers: Mutex::new(Vec::new()),
                wake_sender: Mutex::new(Some(wake_sender)),
                wake_receiver,
            }),
        }
    }

    /// Returns `true` once this token has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// A receiver that becomes disconnected the moment this token is
    /// cancelled — for `select!`-ing a blocking wait against cancellation
    /// instead of polling `is_cancelled`.
    pub fn wait_channel(&self) -> Receiver<()> {
        self.inner.wake_receiver.clone()
    }

    /// Sets the token. Idempotent: only the call that actually performs
    /// the one-way transition runs the registered subscribers, and it runs
    /// them all before returning.
    pub fn cancel(&self) {
        if self
            .inner
            .cancelled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.inner.wake_sender.lock().unwrap().take();
            let subscribers = std::mem::take(&mut *self.inner.subscribers.lock().unwrap());
            for subscriber in subscribers {
                subscriber();
            }
        }
    }

    /// Registers a callback to run when the token is cancelled. If the
    /// token is already cancelled, runs it immediately instead.
    pub fn register<F>(&self, subscriber: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_cancelled() {
            subscriber();
            return;
        }
        let mut subscribers = self.inner.subscribers.lock().unwrap();
        // Re-check under the lock: cancel() may have run between the
        // is_cancelled() load above and taking this lock.
        if self.is_cancelled() {
            drop(subscribers);
            subscriber();
            return;
        }
        subscribers.push(Box::new(subscriber));
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// A work item's view of the pool's cancellation state. It cannot cancel
/// the pool; it can only observe whether the pool has been cancelled.
#[derive(Clone)]
pub struct CancelHandle {
    token: CancellationToken,
}

impl CancelHandle {
    pub(crate) fn new(token: CancellationToken) -> Self {
        CancelHandle { token }
    }

    /// The framework never interrupts a running work item; this is the
    /// item's own responsibility to poll (§5).
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn cancel_is_one_way_and_idempotent() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn subscribers_registered_before_cancel_run_exactly_once() {
        let token = CancellationToken::new();
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..5 {
            let count = count.clone();
            token.register(move || {
                count.fetch_add(1, Ordering::SeqCst);
            });
        }
        token.cancel();
        token.cancel();
        assert_eq!(count.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn subscribers_registered_after_cancel_run_immediately() {
        let token = CancellationToken::new();
        token.cancel();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        token.register(move || {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cancel_handle_reflects_token_state() {
        let token = CancellationToken::new();
        let handle = CancelHandle::new(token.clone());
        assert!(!handle.is_cancelled());
        token.cancel();
        assert!(handle.is_cancelled());
    }
}
