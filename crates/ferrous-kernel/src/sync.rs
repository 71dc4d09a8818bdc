//! Sleeping synchronization primitives.
//!
//! [`Semaphore`] is the foundation: [`Lock`] is a binary semaphore with an
//! owner and priority donation, and [`Condvar`] parks each waiter on a
//! private semaphore. Every wait queue is ordered by the *current* priority
//! of its threads, re-derived at wake time so donations made after a thread
//! was queued are honored.

pub mod condvar;
pub mod lock;
pub mod semaphore;
pub mod spinlock;

pub use condvar::Condvar;
pub use lock::Lock;
pub use semaphore::Semaphore;
pub use spinlock::{SpinLock, SpinLockGuard};

use crate::thread::{self, ThreadManager};
use crate::types::{Priority, ThreadHandle, PRI_MIN};
use std::cmp::Ordering;
use std::collections::VecDeque;

fn priority_of(tm: &ThreadManager, handle: ThreadHandle) -> Priority {
    tm.threads.get(&handle).map_or(PRI_MIN, |tcb| tcb.priority)
}

/// Orders threads by current priority, highest first. Equal priorities
/// compare equal.
pub(crate) fn by_priority(tm: &ThreadManager, a: ThreadHandle, b: ThreadHandle) -> Ordering {
    priority_of(tm, b).cmp(&priority_of(tm, a))
}

/// Inserts `handle` behind every waiter of greater or equal priority.
pub(crate) fn insert_by_priority(waiters: &mut VecDeque<ThreadHandle>, handle: ThreadHandle) {
    thread::with_manager(|tm| {
        let pos = waiters
            .iter()
            .position(|&w| by_priority(tm, handle, w) == Ordering::Less)
            .unwrap_or(waiters.len());
        waiters.insert(pos, handle);
    });
}

/// Stable-sorts `waiters` so the highest current priority is at the front.
pub(crate) fn sort_by_priority<W>(
    waiters: &mut VecDeque<W>,
    handle_of: impl Fn(&W) -> ThreadHandle,
) {
    thread::with_manager(|tm| {
        waiters
            .make_contiguous()
            .sort_by(|a, b| by_priority(tm, handle_of(a), handle_of(b)));
    });
}
