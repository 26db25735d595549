//! Process-wide mutual exclusion over the device management tree.
//!
//! Sessions and tree access through the façade both mutate the engine's
//! tree; exactly one of them may do so at a time. Waiters block on a
//! condition variable with a deadline instead of polling.
//!
//! A guard that is never dropped leaves the tree locked. If the holding
//! process dies the lock is only cleared by restarting it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::{Condvar, Mutex};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LockOwner {
    Session,
    TreeAccess,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LockHolder {
    pub owner: LockOwner,
    pub acquired_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct DmtLock {
    holder: Mutex<Option<LockHolder>>,
    released: Condvar,
}

impl DmtLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lock, waiting at most `max_wait` for the current holder.
    ///
    /// Returns `false` if the deadline passed. A wait too long to express as
    /// an `Instant` has no deadline. Callers that get `true` must pair it
    /// with exactly one [`DmtLock::release`].
    pub fn try_acquire(&self, owner: LockOwner, max_wait: Duration) -> bool {
        let deadline = Instant::now().checked_add(max_wait);
        let mut holder = self.holder.lock();
        while holder.is_some() {
            let Some(deadline) = deadline else {
                self.released.wait(&mut holder);
                continue;
            };
            if self.released.wait_until(&mut holder, deadline).timed_out() && holder.is_some() {
                tracing::warn!("[dmt] {:?} gave up waiting after {:?}", owner, max_wait);
                return false;
            }
        }
        *holder = Some(LockHolder {
            owner,
            acquired_at: Utc::now(),
        });
        tracing::debug!("[dmt] locked by {:?}", owner);
        true
    }

    /// Scoped variant of [`DmtLock::try_acquire`]; the guard releases on drop.
    pub fn acquire_guard(self: &Arc<Self>, owner: LockOwner, max_wait: Duration) -> Option<DmtGuard> {
        if self.try_acquire(owner, max_wait) {
            Some(DmtGuard {
                lock: Arc::clone(self),
            })
        } else {
            None
        }
    }

    /// Release the lock. Releasing an unlocked tree is a no-op.
    pub fn release(&self) {
        let mut holder = self.holder.lock();
        if let Some(prev) = holder.take() {
            tracing::debug!("[dmt] released by {:?}", prev.owner);
            self.released.notify_all();
        }
    }

    pub fn is_locked(&self) -> bool {
        self.holder.lock().is_some()
    }

    pub fn holder(&self) -> Option<LockHolder> {
        *self.holder.lock()
    }
}

/// Held lock. Dropping it releases the tree.
#[derive(Debug)]
pub struct DmtGuard {
    lock: Arc<DmtLock>,
}

impl Drop for DmtGuard {
    fn drop(&mut self) {
        self.lock.release();
    }
}
