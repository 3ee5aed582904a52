//! Async mutual exclusion with a FIFO waiter queue and acquisition timeouts.
//!
//! [`Lock`] guards a critical section rather than a value. Acquisition is
//! immediate when the lock is free; otherwise the caller joins a FIFO queue.
//! Releasing hands the lock directly to the head of the queue without ever
//! marking it free, so a late arrival cannot overtake a waiter.
//!
//! The lock is **not** reentrant: acquiring it twice from the same task
//! without releasing in between deadlocks that task.
//!
//! # Cancellation
//!
//! A waiter that times out, or whose `acquire` future is dropped, removes
//! itself from the queue. If the hand-off raced with the cancellation, the
//! waiter passes the lock on to the next in line, so the lock never leaks.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::{HuginnError, Result};

#[derive(Default)]
struct LockState {
    held: bool,
    next_waiter: u64,
    waiters: VecDeque<Waiter>,
}

struct Waiter {
    id: u64,
    grant: oneshot::Sender<()>,
}

impl LockState {
    /// Hand the lock to the first live waiter, or mark it free.
    fn release(&mut self) {
        while let Some(waiter) = self.waiters.pop_front() {
            if waiter.grant.send(()).is_ok() {
                return;
            }
        }
        self.held = false;
    }

    /// Remove a queued waiter. Returns `false` if it was already granted.
    fn withdraw(&mut self, id: u64) -> bool {
        match self.waiters.iter().position(|w| w.id == id) {
            Some(pos) => {
                self.waiters.remove(pos);
                true
            }
            None => false,
        }
    }
}

/// FIFO async lock. Cloning yields another handle to the same lock.
#[derive(Clone, Default)]
pub struct Lock {
    state: Arc<Mutex<LockState>>,
}

impl Lock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock, waiting at most `timeout` if it is held.
    ///
    /// Returns [`HuginnError::LockTimeout`] if the timeout elapses first.
    /// The current holder is unaffected by a waiter timing out.
    pub async fn acquire(&self, timeout: Option<Duration>) -> Result<LockGuard> {
        let (id, rx) = {
            let mut state = self.state.lock();
            if !state.held {
                state.held = true;
                return Ok(self.guard());
            }
            let id = state.next_waiter;
            state.next_waiter += 1;
            let (tx, rx) = oneshot::channel();
            state.waiters.push_back(Waiter { id, grant: tx });
            (id, rx)
        };

        let mut pending = PendingWaiter {
            lock: self,
            id,
            rx,
            settled: false,
        };

        match timeout {
            None => {
                // the sender stays queued until the hand-off, so this
                // cannot observe a dropped sender
                let _ = (&mut pending.rx).await;
            }
            Some(after) => {
                if tokio::time::timeout(after, &mut pending.rx).await.is_err()
                    && self.state.lock().withdraw(id)
                {
                    pending.settled = true;
                    return Err(HuginnError::LockTimeout { after });
                }
            }
        }

        pending.settled = true;
        Ok(self.guard())
    }

    /// Run `f` while holding the lock.
    ///
    /// The lock is released when `f` completes, whether it returns `Ok`,
    /// returns `Err`, or panics.
    pub async fn with_lock<F, Fut, T>(&self, timeout: Option<Duration>, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let _guard = self.acquire(timeout).await?;
        f().await
    }

    /// Wrap `f` so every call runs under this lock.
    pub fn synchronize<F>(&self, timeout: Option<Duration>, f: F) -> Synchronized<F> {
        Synchronized {
            lock: self.clone(),
            timeout,
            f,
        }
    }

    /// Whether the lock is currently held.
    pub fn is_locked(&self) -> bool {
        self.state.lock().held
    }

    /// Number of callers queued behind the holder.
    pub fn waiting(&self) -> usize {
        self.state.lock().waiters.len()
    }

    fn guard(&self) -> LockGuard {
        LockGuard {
            state: Arc::clone(&self.state),
        }
    }
}

/// Tracks a queued waiter so a dropped `acquire` future cleans up.
struct PendingWaiter<'a> {
    lock: &'a Lock,
    id: u64,
    rx: oneshot::Receiver<()>,
    settled: bool,
}

impl Drop for PendingWaiter<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let mut state = self.lock.state.lock();
        if !state.withdraw(self.id) {
            // granted while being cancelled: pass it on
            state.release();
        }
    }
}

/// Proof of holding a [`Lock`]. Releases on drop.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct LockGuard {
    state: Arc<Mutex<LockState>>,
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard").finish_non_exhaustive()
    }
}

impl LockGuard {
    /// Release the lock explicitly.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.state.lock().release();
    }
}

/// A function bound to a [`Lock`]; see [`Lock::synchronize`].
pub struct Synchronized<F> {
    lock: Lock,
    timeout: Option<Duration>,
    f: F,
}

impl<F> Synchronized<F> {
    /// Call the wrapped function under the lock.
    pub async fn call<A, Fut, T>(&self, arg: A) -> Result<T>
    where
        F: Fn(A) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.lock.with_lock(self.timeout, || (self.f)(arg)).await
    }

    /// The lock calls are serialized through.
    pub fn lock(&self) -> &Lock {
        &self.lock
    }
}
