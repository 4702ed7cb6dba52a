//! Per-session ESC cancellation state.
//!
//! Lifecycle: `idle → armed → triggered | cleared`. The model gateway arms
//! the state for the duration of one request through [`EscState::arm`]; a
//! second arm while one [`EscWaiter`] is alive is refused. UIs call
//! [`EscState::trigger`] from any task.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct EscInner {
    triggered: AtomicBool,
    armed: AtomicBool,
    payload: Mutex<Option<Value>>,
    notify: Notify,
}

/// Cheap to clone; all clones observe the same state.
#[derive(Debug, Clone, Default)]
pub struct EscState {
    inner: Arc<EscInner>,
}

impl EscState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark ESC as pressed and wake the armed waiter, if any.
    pub fn trigger(&self, payload: Option<Value>) {
        if let Ok(mut slot) = self.inner.payload.lock() {
            *slot = payload;
        }
        self.inner.triggered.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_triggered(&self) -> bool {
        self.inner.triggered.load(Ordering::SeqCst)
    }

    pub fn is_armed(&self) -> bool {
        self.inner.armed.load(Ordering::SeqCst)
    }

    pub fn payload(&self) -> Option<Value> {
        self.inner.payload.lock().ok().and_then(|slot| slot.clone())
    }

    /// Clear the trigger and its payload.
    pub fn reset(&self) {
        self.inner.triggered.store(false, Ordering::SeqCst);
        if let Ok(mut slot) = self.inner.payload.lock() {
            *slot = None;
        }
    }

    /// Arm the single waiter. Returns `None` if a waiter is already armed.
    pub fn arm(&self) -> Option<EscWaiter> {
        self.inner
            .armed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| EscWaiter {
                state: self.clone(),
            })
    }
}

/// The armed side of an [`EscState`]. Disarms on drop.
#[derive(Debug)]
pub struct EscWaiter {
    state: EscState,
}

impl EscWaiter {
    /// Resolve with the trigger payload once ESC fires. Resolves immediately
    /// if it already fired.
    pub async fn wait(&self) -> Option<Value> {
        loop {
            let notified = self.state.inner.notify.notified();
            if self.state.is_triggered() {
                return self.state.payload();
            }
            notified.await;
        }
    }
}

impl Drop for EscWaiter {
    fn drop(&mut self) {
        self.state.inner.armed.store(false, Ordering::SeqCst);
    }
}
