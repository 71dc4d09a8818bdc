//! Counting semaphore.
//!
//! A nonnegative counter with two atomic operations:
//!
//! - [`down`](Semaphore::down) ("P"): wait for the value to become positive,
//!   then decrement it.
//! - [`up`](Semaphore::up) ("V"): increment the value and wake the waiter
//!   with the highest current priority, if any.

use crate::interrupt::{self, IntrGuard};
use crate::sync::{self, SpinLock};
use crate::thread;
use crate::types::ThreadHandle;
use log::trace;
use std::collections::VecDeque;

struct SemaphoreState {
    value: u32,
    waiters: VecDeque<ThreadHandle>,
}

/// A counting semaphore whose waiters wake in priority order.
///
/// Waiters refer to the semaphore by identity, so it is neither `Clone` nor
/// `Copy`; share it behind a reference or an `Arc`.
pub struct Semaphore {
    state: SpinLock<SemaphoreState>,
}

impl Semaphore {
    pub fn new(value: u32) -> Self {
        Self {
            state: SpinLock::new(SemaphoreState {
                value,
                waiters: VecDeque::new(),
            }),
        }
    }

    /// Waits for the value to become positive, then decrements it.
    ///
    /// May sleep for an unbounded time. Must not be called from an interrupt
    /// handler.
    pub fn down(&self) {
        assert!(
            !interrupt::context(),
            "Semaphore::down called from interrupt context"
        );
        let me = thread::current();

        let _intr = IntrGuard::new();
        loop {
            {
                let mut state = self.state.lock();
                if state.value > 0 {
                    state.value -= 1;
                    return;
                }
                sync::insert_by_priority(&mut state.waiters, me);
            }
            thread::block();
        }
    }

    /// Decrements the value if it is positive. Never sleeps, so it may be
    /// called from an interrupt handler.
    pub fn try_down(&self) -> bool {
        let _intr = IntrGuard::new();
        let mut state = self.state.lock();
        if state.value > 0 {
            state.value -= 1;
            true
        } else {
            false
        }
    }

    /// Increments the value and wakes the highest-priority waiter.
    ///
    /// Outside interrupt context the caller yields right away so a woken
    /// thread of higher priority runs first. From a handler the yield is
    /// deferred to interrupt return.
    pub fn up(&self) {
        let intr = IntrGuard::new();
        let woken = {
            let mut state = self.state.lock();
            state.value = match state.value.checked_add(1) {
                Some(value) => value,
                None => panic!("semaphore value overflow"),
            };
            if state.waiters.is_empty() {
                None
            } else {
                sync::sort_by_priority(&mut state.waiters, |&h| h);
                state.waiters.pop_front()
            }
        };
        if let Some(handle) = woken {
            trace!("semaphore up wakes {}", handle);
            thread::unblock(handle);
        }
        drop(intr);

        if interrupt::context() {
            thread::yield_if_outranked();
        } else {
            thread::yield_now();
        }
    }

    /// Current value of the counter.
    pub fn value(&self) -> u32 {
        self.state.lock().value
    }
}
