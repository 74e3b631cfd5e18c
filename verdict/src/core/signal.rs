//! Cancellation handles shared between a test and its in-flight body.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use tokio::sync::Notify;

/// One-shot cancellation flag observable from async test bodies.
///
/// Clones share the same flag. Once canceled a signal stays canceled;
/// resetting a test installs a fresh signal instead.
#[derive(Clone, Default)]
pub struct CancelSignal {
    inner: Rc<SignalInner>,
}

#[derive(Default)]
struct SignalInner {
    canceled: Cell<bool>,
    notify: Notify,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        if !self.inner.canceled.replace(true) {
            self.inner.notify.notify_waiters();
        }
    }

    pub fn is_canceled(&self) -> bool {
        self.inner.canceled.get()
    }

    /// Resolves once the signal is canceled. Returns immediately if it already is.
    pub async fn canceled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_canceled() {
                return;
            }
            notified.await;
        }
    }

    pub fn same_signal(&self, other: &CancelSignal) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for CancelSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelSignal")
            .field("canceled", &self.is_canceled())
            .finish()
    }
}

/// Pending delay owned by a debounce isolate.
///
/// Clearing the timer wakes the waiting body so it can give up instead of
/// running a superseded test.
#[derive(Debug, Clone, Default)]
pub struct DebounceTimer {
    signal: CancelSignal,
}

impl DebounceTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&self) {
        self.signal.cancel();
    }

    pub fn is_cleared(&self) -> bool {
        self.signal.is_canceled()
    }

    pub async fn cleared(&self) {
        self.signal.canceled().await;
    }
}
