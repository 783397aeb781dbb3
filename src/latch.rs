//! Single-slot handoff between one signaling and one waiting thread.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct Slot {
    set: bool,
    interrupted: bool,
}

/// A binary semaphore: `signal` sets the slot, a wait consumes it.
///
/// At most one signal is pending at any time, so signaling twice before a
/// wait delivers once. A waiter can be released early with
/// [`BinaryLatch::interrupt`], but a pending signal always wins over an
/// interrupt.
#[derive(Debug, Default)]
pub struct BinaryLatch {
    slot: Mutex<Slot>,
    cond: Condvar,
}

impl BinaryLatch {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn signal(&self) {
        let mut slot = self.lock();
        if !slot.set {
            slot.set = true;
            self.cond.notify_one();
        }
    }

    /// Cancels the current (or next) wait unless a signal is pending.
    pub fn interrupt(&self) {
        let mut slot = self.lock();
        slot.interrupted = true;
        self.cond.notify_all();
    }

    /// Peeks at the slot without consuming it.
    pub fn is_set(&self) -> bool {
        self.lock().set
    }

    /// Blocks until signaled. Returns false only when interrupted.
    pub fn wait(&self) -> bool {
        let mut slot = self.lock();
        loop {
            if let Some(consumed) = Self::take(&mut slot) {
                return consumed;
            }
            slot = self
                .cond
                .wait(slot)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Blocks until signaled or until `timeout` elapses on the monotonic
    /// clock. A zero timeout polls once.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = match Instant::now().checked_add(timeout) {
            Some(deadline) => deadline,
            None => return self.wait(),
        };
        let mut slot = self.lock();
        loop {
            if let Some(consumed) = Self::take(&mut slot) {
                return consumed;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            slot = self
                .cond
                .wait_timeout(slot, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    // Some(true) consumed a signal, Some(false) consumed an interrupt.
    fn take(slot: &mut Slot) -> Option<bool> {
        if slot.set {
            slot.set = false;
            slot.interrupted = false;
            Some(true)
        } else if slot.interrupted {
            slot.interrupted = false;
            Some(false)
        } else {
            None
        }
    }
}
