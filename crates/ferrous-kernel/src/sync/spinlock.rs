use std::ops::{Deref, DerefMut};
use std::sync::{Mutex, MutexGuard, TryLockError};

/// Short-held lock over a primitive's internal state.
///
/// On the simulated uniprocessor only one thread runs at a time, so this is
/// never contended in practice. It exists so the state is sound to share
/// between the host threads that back kernel threads. Never hold it across a
/// block or a yield.
pub struct SpinLock<T> {
    data: Mutex<T>,
}

impl<T> SpinLock<T> {
    pub const fn new(data: T) -> Self {
        Self {
            data: Mutex::new(data),
        }
    }

    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        loop {
            match self.data.try_lock() {
                Ok(guard) => return SpinLockGuard { guard },
                Err(TryLockError::Poisoned(poisoned)) => {
                    return SpinLockGuard {
                        guard: poisoned.into_inner(),
                    }
                }
                Err(TryLockError::WouldBlock) => std::hint::spin_loop(),
            }
        }
    }
}

impl<T: Default> Default for SpinLock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

pub struct SpinLockGuard<'a, T> {
    guard: MutexGuard<'a, T>,
}

impl<T> Deref for SpinLockGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}
