//! AbortController and AbortSignal
//!
//! Cooperative request cancellation. The controller side aborts; any number
//! of signal clones can poll `is_aborted` or await `aborted()`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use smol::channel::{self, Receiver, Sender};

/// Cancellation controller
#[derive(Debug, Clone, Default)]
pub struct AbortController {
    signal: AbortSignal,
}

impl AbortController {
    /// Create a new abort controller
    pub fn new() -> Self {
        Self {
            signal: AbortSignal::new(),
        }
    }

    /// Get the associated signal
    pub fn signal(&self) -> &AbortSignal {
        &self.signal
    }

    /// Abort with optional reason; later calls are ignored
    pub fn abort(&self, reason: Option<&str>) {
        self.signal.abort(reason);
    }
}

/// Cancellation state shared between a controller and its requests
#[derive(Debug, Clone)]
pub struct AbortSignal {
    inner: Arc<AbortSignalInner>,
}

#[derive(Debug)]
struct AbortSignalInner {
    aborted: AtomicBool,
    reason: Mutex<Option<String>>,
    // Never carries a message; closing it wakes every waiter.
    notify: Sender<()>,
    closed: Receiver<()>,
}

impl Default for AbortSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl AbortSignal {
    fn new() -> Self {
        let (notify, closed) = channel::bounded(1);
        Self {
            inner: Arc::new(AbortSignalInner {
                aborted: AtomicBool::new(false),
                reason: Mutex::new(None),
                notify,
                closed,
            }),
        }
    }

    /// Create an already-aborted signal
    pub fn aborted_with(reason: Option<&str>) -> Self {
        let signal = Self::new();
        signal.abort(reason);
        signal
    }

    /// Check if aborted
    pub fn is_aborted(&self) -> bool {
        self.inner.aborted.load(Ordering::Acquire)
    }

    /// Abort reason, if one was given
    pub fn reason(&self) -> Option<String> {
        self.inner
            .reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Resolve once the signal is aborted
    pub async fn aborted(&self) {
        if self.is_aborted() {
            return;
        }
        // Nothing is ever sent; `recv` only returns once the channel closes.
        let _ = self.inner.closed.recv().await;
    }

    fn abort(&self, reason: Option<&str>) {
        if self.inner.aborted.swap(true, Ordering::AcqRel) {
            return;
        }
        *self.inner.reason.lock().unwrap_or_else(PoisonError::into_inner) =
            reason.map(str::to_string);
        self.inner.notify.close();
        tracing::trace!(reason = ?reason, "abort signalled");
    }
}
