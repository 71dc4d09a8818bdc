use crate::interrupt::IntrLevel;
use crate::types::{LockId, Priority, ThreadHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    Ready,
    Running,
    Blocked,
}

pub struct ThreadControlBlock {
    pub handle: ThreadHandle,
    pub name: String,
    pub state: ThreadState,
    /// Effective priority, including donations.
    pub priority: Priority,
    /// Priority assigned by the scheduler, unaffected by donation.
    pub base_priority: Priority,
    /// Lock this thread is blocked trying to acquire.
    pub blocking_on: Option<LockId>,
    /// Holder of `blocking_on` at the time this thread blocked.
    pub blocked_by: Option<ThreadHandle>,
    /// Threads blocked on locks this thread holds.
    pub donors: Vec<ThreadHandle>,
    /// Interrupt level to restore when this thread is switched back in.
    pub saved_intr_level: IntrLevel,
}

impl ThreadControlBlock {
    pub fn new(handle: ThreadHandle, name: &str, priority: Priority) -> Self {
        Self {
            handle,
            name: name.to_string(),
            state: ThreadState::Ready,
            priority,
            base_priority: priority,
            blocking_on: None,
            blocked_by: None,
            donors: Vec::new(),
            saved_intr_level: IntrLevel::On,
        }
    }

    pub fn info(&self) -> ThreadInfo {
        ThreadInfo {
            handle: self.handle,
            name: self.name.clone(),
            state: self.state,
            priority: self.priority,
            base_priority: self.base_priority,
            blocking_on: self.blocking_on,
            blocked_by: self.blocked_by,
            donors: self.donors.clone(),
        }
    }
}

/// Point-in-time copy of a thread's scheduling fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadInfo {
    pub handle: ThreadHandle,
    pub name: String,
    pub state: ThreadState,
    pub priority: Priority,
    pub base_priority: Priority,
    pub blocking_on: Option<LockId>,
    pub blocked_by: Option<ThreadHandle>,
    pub donors: Vec<ThreadHandle>,
}
