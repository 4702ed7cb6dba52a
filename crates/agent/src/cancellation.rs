//! Registry of cancellable in-flight operations.
//!
//! Each outstanding model request registers one handle for its lifetime.
//! The most recent registration is on top; [`CancellationRegistry::cancel_active`]
//! cancels it. Handles unregister themselves on drop.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

#[derive(Debug)]
struct Entry {
    id: u64,
    description: String,
    token: CancellationToken,
}

#[derive(Debug, Default)]
struct RegistryInner {
    next_id: AtomicU64,
    stack: Mutex<Vec<Entry>>,
}

/// Shared registry; clones refer to the same stack.
#[derive(Debug, Clone, Default)]
pub struct CancellationRegistry {
    inner: Arc<RegistryInner>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an operation. Keep the returned handle alive for as long as
    /// the operation runs.
    pub fn register(&self, description: impl Into<String>) -> CancellationRegistration {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let token = CancellationToken::new();
        let description = description.into();

        if let Ok(mut stack) = self.inner.stack.lock() {
            stack.push(Entry {
                id,
                description: description.clone(),
                token: token.clone(),
            });
        }

        CancellationRegistration {
            id,
            description,
            token,
            registry: self.clone(),
        }
    }

    /// Cancel the most recent registration. Returns `false` if none is active.
    pub fn cancel_active(&self) -> bool {
        let entry = self.inner.stack.lock().ok().and_then(|mut stack| stack.pop());
        match entry {
            Some(entry) => {
                tracing::debug!(operation = %entry.description, "Canceling active operation");
                entry.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Descriptions of the registered operations, oldest first.
    pub fn active(&self) -> Vec<String> {
        self.inner
            .stack
            .lock()
            .map(|stack| stack.iter().map(|e| e.description.clone()).collect())
            .unwrap_or_default()
    }

    fn remove(&self, id: u64) {
        if let Ok(mut stack) = self.inner.stack.lock() {
            stack.retain(|entry| entry.id != id);
        }
    }
}

/// Handle for one registered operation.
#[derive(Debug)]
pub struct CancellationRegistration {
    id: u64,
    description: String,
    token: CancellationToken,
    registry: CancellationRegistry,
}

impl CancellationRegistration {
    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_canceled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancel this operation. Returns `false` if it was already canceled.
    pub fn cancel(&self) -> bool {
        if self.token.is_cancelled() {
            return false;
        }
        self.token.cancel();
        self.registry.remove(self.id);
        true
    }

    pub fn unregister(self) {
        drop(self);
    }
}

impl Drop for CancellationRegistration {
    fn drop(&mut self) {
        self.registry.remove(self.id);
    }
}
