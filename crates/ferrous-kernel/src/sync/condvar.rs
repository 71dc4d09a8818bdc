//! Condition variable with Mesa semantics.
//!
//! Signalling is not atomic with the waiter's wakeup: by the time a waiter
//! reacquires the lock the condition may no longer hold, so callers re-check
//! it in a loop.

use crate::interrupt::{self, IntrGuard};
use crate::sync::{self, Lock, Semaphore, SpinLock};
use crate::thread;
use crate::types::ThreadHandle;
use log::trace;
use std::collections::VecDeque;
use std::sync::Arc;

/// One waiting thread, parked on its own semaphore.
struct Waiter {
    thread: ThreadHandle,
    semaphore: Semaphore,
}

pub struct Condvar {
    waiters: SpinLock<VecDeque<Arc<Waiter>>>,
}

impl Default for Condvar {
    fn default() -> Self {
        Self::new()
    }
}

impl Condvar {
    pub fn new() -> Self {
        Self {
            waiters: SpinLock::new(VecDeque::new()),
        }
    }

    /// Atomically releases `lock` and sleeps until signalled, then
    /// reacquires `lock` before returning.
    pub fn wait(&self, lock: &Lock) {
        assert!(
            !interrupt::context(),
            "Condvar::wait called from interrupt context"
        );
        assert!(
            lock.held_by_current_thread(),
            "Condvar::wait without holding {}",
            lock.id()
        );

        let waiter = Arc::new(Waiter {
            thread: thread::current(),
            semaphore: Semaphore::new(0),
        });
        {
            let _intr = IntrGuard::new();
            self.waiters.lock().push_back(Arc::clone(&waiter));
        }

        lock.release();
        waiter.semaphore.down();
        lock.acquire();
    }

    /// Wakes the waiter with the highest current priority, if any.
    pub fn signal(&self, lock: &Lock) {
        self.check_signaller(lock, "signal");
        if let Some(waiter) = self.pop_highest() {
            trace!("condvar signals {}", waiter.thread);
            waiter.semaphore.up();
        }
    }

    /// Wakes every waiter, highest priority first.
    pub fn broadcast(&self, lock: &Lock) {
        self.check_signaller(lock, "broadcast");
        while let Some(waiter) = self.pop_highest() {
            trace!("condvar broadcast wakes {}", waiter.thread);
            waiter.semaphore.up();
        }
    }

    pub fn waiters_len(&self) -> usize {
        self.waiters.lock().len()
    }

    fn check_signaller(&self, lock: &Lock, op: &str) {
        assert!(
            !interrupt::context(),
            "Condvar::{} called from interrupt context",
            op
        );
        assert!(
            lock.held_by_current_thread(),
            "Condvar::{} without holding {}",
            op,
            lock.id()
        );
    }

    fn pop_highest(&self) -> Option<Arc<Waiter>> {
        let _intr = IntrGuard::new();
        let mut waiters = self.waiters.lock();
        sync::sort_by_priority(&mut *waiters, |waiter| waiter.thread);
        waiters.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{boot, boot_err, EventLog};
    use crate::KernelError;

    #[test]
    fn broadcast_wakes_in_priority_order() {
        let log = EventLog::new();
        let l = log.clone();
        boot(5, move || {
            let lock = Arc::new(Lock::new());
            let cond = Arc::new(Condvar::new());
            for prio in [10u8, 30, 20] {
                let (lk, cv, l) = (Arc::clone(&lock), Arc::clone(&cond), l.clone());
                thread::spawn(&format!("w{}", prio), prio, move || {
                    lk.acquire();
                    cv.wait(&lk);
                    l.push(format!("w{}", prio));
                    lk.release();
                })
                .unwrap();
            }
            assert_eq!(cond.waiters_len(), 3);

            lock.acquire();
            cond.broadcast(&lock);
            assert_eq!(cond.waiters_len(), 0);
            assert_eq!(thread::get_priority(), 30);
            lock.release();
            assert_eq!(thread::get_priority(), 5);
        });
        assert_eq!(log.take(), ["w30", "w20", "w10"]);
    }

    #[test]
    fn signal_wakes_one_waiter() {
        let log = EventLog::new();
        let l = log.clone();
        boot(5, move || {
            let lock = Arc::new(Lock::new());
            let cond = Arc::new(Condvar::new());
            for prio in [10u8, 20] {
                let (lk, cv, l) = (Arc::clone(&lock), Arc::clone(&cond), l.clone());
                thread::spawn(&format!("w{}", prio), prio, move || {
                    lk.acquire();
                    cv.wait(&lk);
                    l.push(format!("w{}", prio));
                    lk.release();
                })
                .unwrap();
            }

            lock.acquire();
            cond.signal(&lock);
            lock.release();
            assert_eq!(l.snapshot(), ["w20"]);
            assert_eq!(cond.waiters_len(), 1);

            lock.acquire();
            cond.signal(&lock);
            cond.signal(&lock);
            lock.release();
        });
        assert_eq!(log.take(), ["w20", "w10"]);
    }

    #[test]
    fn waiter_rechecks_condition_after_wakeup() {
        let log = EventLog::new();
        let l = log.clone();
        boot(5, move || {
            let lock = Arc::new(Lock::new());
            let cond = Arc::new(Condvar::new());
            let items = Arc::new(SpinLock::new(Vec::<u32>::new()));

            let (lk, cv, it, lc) = (
                Arc::clone(&lock),
                Arc::clone(&cond),
                Arc::clone(&items),
                l.clone(),
            );
            thread::spawn("consumer", 10, move || {
                lk.acquire();
                let mut wakeups = 0;
                let item = loop {
                    if let Some(item) = it.lock().pop() {
                        break item;
                    }
                    if wakeups > 0 {
                        lc.push("spurious");
                    }
                    cv.wait(&lk);
                    wakeups += 1;
                };
                lc.push(format!("consumed {}", item));
                lk.release();
            })
            .unwrap();

            lock.acquire();
            cond.signal(&lock);
            lock.release();

            lock.acquire();
            items.lock().push(7);
            cond.signal(&lock);
            lock.release();
        });
        assert_eq!(log.take(), ["spurious", "consumed 7"]);
    }

    #[test]
    fn signal_without_lock_is_fatal() {
        let err = boot_err(31, || {
            let lock = Lock::new();
            let cond = Condvar::new();
            cond.signal(&lock);
        });
        match err {
            KernelError::Panic { message, .. } => assert!(message.contains("without holding")),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn wait_without_lock_is_fatal() {
        let err = boot_err(31, || {
            let lock = Lock::new();
            let cond = Condvar::new();
            cond.wait(&lock);
        });
        match err {
            KernelError::Panic { message, .. } => assert!(message.contains("Condvar::wait")),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn queue_updates_restore_interrupt_level() {
        boot(5, || {
            let lock = Arc::new(Lock::new());
            let cond = Arc::new(Condvar::new());
            let (lk, cv) = (Arc::clone(&lock), Arc::clone(&cond));
            thread::spawn("waiter", 10, move || {
                lk.acquire();
                cv.wait(&lk);
                assert_eq!(interrupt::get_level(), interrupt::IntrLevel::On);
                lk.release();
            })
            .unwrap();

            lock.acquire();
            cond.signal(&lock);
            assert_eq!(interrupt::get_level(), interrupt::IntrLevel::On);
            lock.release();
            assert_eq!(cond.waiters_len(), 0);
        });
    }

    #[test]
    fn signal_with_no_waiters_is_noop() {
        boot(31, || {
            let lock = Lock::new();
            let cond = Condvar::new();
            lock.acquire();
            cond.signal(&lock);
            cond.broadcast(&lock);
            lock.release();
            assert_eq!(cond.waiters_len(), 0);
        });
    }
}
