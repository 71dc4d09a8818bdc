//! Serialized file-system access.
//!
//! The file system is not reentrant, so every call into it runs under one
//! lock shared by all threads of a booted kernel.

use crate::sync::Lock;

#[derive(Default)]
pub struct FsLock {
    lock: Lock,
}

impl FsLock {
    pub fn new() -> Self {
        Self { lock: Lock::new() }
    }

    /// Runs `f` while holding the file-system lock.
    pub fn with<R>(&self, f: impl FnOnce() -> R) -> R {
        self.lock.acquire();
        let result = f();
        self.lock.release();
        result
    }

    pub fn lock(&self) -> &Lock {
        &self.lock
    }
}
