//! Named locks and batch counters.
//!
//! Every key maps to one async mutex. The value behind the mutex is the
//! key's event counter, so "lock the batch id" and "adjust its counter" are
//! the same critical section. Locks are released by dropping the guard.
//!
//! A `Locker` is an explicit instance, shared behind an `Arc`; tests build
//! their own to stay isolated.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, warn};

type Slot = Arc<AsyncMutex<u64>>;

/// Table of named locks, keyed by arbitrary strings (prepid, batch id, ...).
#[derive(Default)]
pub struct Locker {
    slots: Mutex<HashMap<String, Slot>>,
}

impl Locker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle to the lock for `key`, created on first use.
    pub fn lock(&self, key: &str) -> NamedLock {
        let mut slots = self.slots.lock().unwrap_or_else(|p| p.into_inner());
        let slot = slots
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(0)))
            .clone();
        NamedLock {
            key: key.to_string(),
            slot,
        }
    }

    /// Increment the counter for `key` inside its lock. Returns the new value.
    pub async fn increment(&self, key: &str) -> u64 {
        let mut guard = self.lock(key).acquire().await;
        *guard.guard += 1;
        debug!(key, events = *guard.guard, "batch counter incremented");
        *guard.guard
    }

    /// Decrement the counter for `key` inside its lock. Never goes below zero.
    pub async fn decrement(&self, key: &str) -> u64 {
        let mut guard = self.lock(key).acquire().await;
        decrement_slot(key, &mut guard.guard);
        *guard.guard
    }

    /// Current counter value, read under the lock.
    pub async fn events(&self, key: &str) -> u64 {
        *self.lock(key).acquire().await.guard
    }

    /// Increment the counter for `key` and return a ticket that decrements it.
    pub async fn begin_batch(&self, key: &str) -> BatchTicket {
        self.increment(key).await;
        BatchTicket {
            lock: Some(self.lock(key)),
        }
    }
}

fn decrement_slot(key: &str, events: &mut u64) {
    if *events == 0 {
        warn!(key, "batch counter decremented below zero, clamping");
    } else {
        *events -= 1;
        debug!(key, events = *events, "batch counter decremented");
    }
}

/// A handle to one named lock. Cloning shares the same underlying lock.
#[derive(Clone)]
pub struct NamedLock {
    key: String,
    slot: Slot,
}

impl NamedLock {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Non-blocking acquisition. `None` means someone else holds it.
    pub fn try_acquire(&self) -> Option<LockGuard> {
        self.slot
            .clone()
            .try_lock_owned()
            .ok()
            .map(|guard| LockGuard {
                key: self.key.clone(),
                guard,
            })
    }

    /// Wait until the lock is free, then take it.
    pub async fn acquire(&self) -> LockGuard {
        let guard = self.slot.clone().lock_owned().await;
        LockGuard {
            key: self.key.clone(),
            guard,
        }
    }

    pub fn is_held(&self) -> bool {
        self.slot.try_lock().is_err()
    }
}

impl std::fmt::Debug for NamedLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamedLock")
            .field("key", &self.key)
            .field("held", &self.is_held())
            .finish()
    }
}

/// Proof of holding a named lock. Dropping it releases the lock.
pub struct LockGuard {
    key: String,
    guard: OwnedMutexGuard<u64>,
}

impl LockGuard {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Release explicitly; equivalent to dropping.
    pub fn release(self) {
        debug!(key = %self.key, "lock released");
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard").field("key", &self.key).finish()
    }
}

/// One in-flight injection counted against a batch.
///
/// Call [`BatchTicket::release`] on every normal path. If the ticket is
/// dropped without it (a panic unwinding through the job), the decrement is
/// scheduled on the runtime instead.
pub struct BatchTicket {
    lock: Option<NamedLock>,
}

impl BatchTicket {
    pub fn key(&self) -> &str {
        self.lock.as_ref().map(NamedLock::key).unwrap_or_default()
    }

    pub async fn release(mut self) {
        if let Some(lock) = self.lock.take() {
            let mut guard = lock.acquire().await;
            decrement_slot(&lock.key, &mut guard.guard);
        }
    }
}

impl Drop for BatchTicket {
    fn drop(&mut self) {
        let Some(lock) = self.lock.take() else {
            return;
        };
        warn!(key = %lock.key, "batch ticket dropped without release");
        if let Some(mut guard) = lock.try_acquire() {
            decrement_slot(&lock.key, &mut guard.guard);
        } else if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let mut guard = lock.acquire().await;
                decrement_slot(&lock.key, &mut guard.guard);
            });
        }
    }
}
