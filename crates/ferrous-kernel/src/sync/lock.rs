//! Non-recursive lock with priority donation.
//!
//! A lock is a semaphore with an initial value of 1 plus an owner: only the
//! thread that acquired it may release it. When a thread blocks on a held
//! lock it donates its priority to the holder, and transitively along the
//! chain of holders that are themselves blocked, so a low-priority holder
//! cannot stall a high-priority waiter behind medium-priority work.
//!
//! The blocking relation is kept in the thread table: a blocked thread
//! records the [`LockId`] it waits on (`blocking_on`) and the holder it found
//! (`blocked_by`), and the holder lists it in `donors`. A thread waits on at
//! most one lock at a time, so following `blocked_by` walks a simple path.

use crate::interrupt::{self, IntrGuard};
use crate::sync::{Semaphore, SpinLock};
use crate::thread::{self, ThreadManager};
use crate::types::{LockId, ThreadHandle};
use log::debug;

pub struct Lock {
    id: LockId,
    holder: SpinLock<Option<ThreadHandle>>,
    semaphore: Semaphore,
}

impl Default for Lock {
    fn default() -> Self {
        Self::new()
    }
}

impl Lock {
    pub fn new() -> Self {
        Self {
            id: LockId::allocate(),
            holder: SpinLock::new(None),
            semaphore: Semaphore::new(1),
        }
    }

    pub fn id(&self) -> LockId {
        self.id
    }

    fn holder(&self) -> Option<ThreadHandle> {
        *self.holder.lock()
    }

    /// Acquires the lock, sleeping until it is available.
    ///
    /// If another thread holds it, the caller donates its priority along the
    /// chain of holders first. Acquiring a lock the caller already holds is a
    /// fatal error, as is calling this from an interrupt handler.
    pub fn acquire(&self) {
        assert!(
            !interrupt::context(),
            "Lock::acquire called from interrupt context"
        );
        assert!(
            !self.held_by_current_thread(),
            "{} already held by the current thread",
            self.id
        );
        let me = thread::current();

        let _intr = IntrGuard::new();
        if let Some(holder) = self.holder() {
            thread::with_manager(|tm| donate(tm, me, holder, self.id));
        }
        self.semaphore.down();
        *self.holder.lock() = Some(me);
    }

    /// Takes the lock only if it is free. Never sleeps.
    pub fn try_acquire(&self) -> bool {
        assert!(
            !self.held_by_current_thread(),
            "{} already held by the current thread",
            self.id
        );
        let acquired = self.semaphore.try_down();
        if acquired {
            *self.holder.lock() = Some(thread::current());
        }
        acquired
    }

    /// Releases the lock and gives back the priority donated through it.
    ///
    /// Donations owed to other locks the caller still holds are kept.
    pub fn release(&self) {
        assert!(
            self.held_by_current_thread(),
            "{} released by a thread that does not hold it",
            self.id
        );
        let me = thread::current();

        // Revoke before `up`: a woken donor may block on another lock before
        // this thread runs again.
        {
            let _intr = IntrGuard::new();
            *self.holder.lock() = None;
            thread::with_manager(|tm| revoke(tm, me, self.id));
        }
        self.semaphore.up();
    }

    pub fn held_by_current_thread(&self) -> bool {
        self.holder() == Some(thread::current())
    }
}

/// Records `donor` as blocked on `lock` held by `holder` and pushes its
/// priority down the blocking chain.
fn donate(tm: &mut ThreadManager, donor: ThreadHandle, holder: ThreadHandle, lock: LockId) {
    // A holder that exited without releasing can never hand the lock over.
    let Some(holder_tcb) = tm.threads.get_mut(&holder) else {
        return;
    };
    if !holder_tcb.donors.contains(&donor) {
        holder_tcb.donors.push(donor);
    }

    let tcb = tm.tcb_mut(donor);
    tcb.blocking_on = Some(lock);
    tcb.blocked_by = Some(holder);

    // A blocker never runs below the threads blocked on it, so the walk can
    // stop at the first link that needs no raise.
    let mut walker = donor;
    while let Some(blocker) = tm.tcb(walker).blocked_by {
        let priority = tm.tcb(walker).priority;
        let walker_name = tm.tcb(walker).name.clone();
        let Some(next) = tm.threads.get_mut(&blocker) else {
            break;
        };
        if priority <= next.priority {
            break;
        }
        debug!(
            "'{}' donates priority {} to '{}' (was {})",
            walker_name, priority, next.name, next.priority
        );
        next.priority = priority;
        walker = blocker;
    }
}

/// Drops the donors that were waiting on `lock` and recomputes `holder`'s
/// effective priority from the donations that remain.
fn revoke(tm: &mut ThreadManager, holder: ThreadHandle, lock: LockId) {
    let donors = std::mem::take(&mut tm.tcb_mut(holder).donors);
    let mut remaining = Vec::with_capacity(donors.len());
    for donor in donors {
        match tm.threads.get_mut(&donor) {
            Some(tcb) if tcb.blocking_on == Some(lock) => {
                tcb.blocking_on = None;
                tcb.blocked_by = None;
            }
            Some(_) => remaining.push(donor),
            None => {}
        }
    }
    tm.tcb_mut(holder).donors = remaining;

    let donated = tm.donated_priority(holder);
    let tcb = tm.tcb_mut(holder);
    match donated {
        Some(priority) if priority > tcb.base_priority => {
            tcb.priority = priority;
            debug!("'{}' keeps donated priority {}", tcb.name, priority);
        }
        _ => {
            if tcb.priority != tcb.base_priority {
                debug!(
                    "'{}' returns to base priority {}",
                    tcb.name, tcb.base_priority
                );
            }
            tcb.priority = tcb.base_priority;
        }
    }
}
