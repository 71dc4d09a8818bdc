pub mod scheduler;
pub mod tcb;

use crate::error::KernelError;
use crate::interrupt::IntrLevel;
use crate::types::{Priority, ThreadHandle, PRI_MAX, PRI_MIN};
use log::{debug, trace, warn};
use scheduler::{PriorityScheduler, Scheduler};
use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

pub use tcb::{ThreadControlBlock, ThreadInfo, ThreadState};

/// Why the CPU stopped handing out time slices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Halt {
    Finished,
    Deadlock { blocked: Vec<String> },
    Panic { thread: String, message: String },
}

/// Unwind payload used to retire parked threads once the CPU halts.
struct Shutdown;

pub struct ThreadManager {
    pub threads: HashMap<ThreadHandle, ThreadControlBlock>,
    pub scheduler: Box<dyn Scheduler>,
    pub current_thread: Option<ThreadHandle>,
    pub next_handle: u32,
    pub(crate) intr_level: IntrLevel,
    pub(crate) in_interrupt: bool,
    pub(crate) yield_on_return: bool,
    pub(crate) halt: Option<Halt>,
}

impl Default for ThreadManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreadManager {
    pub fn new() -> Self {
        Self {
            threads: HashMap::new(),
            scheduler: Box::new(PriorityScheduler::new()),
            current_thread: None,
            next_handle: 1,
            intr_level: IntrLevel::On,
            in_interrupt: false,
            yield_on_return: false,
            halt: None,
        }
    }

    pub fn tcb(&self, handle: ThreadHandle) -> &ThreadControlBlock {
        match self.threads.get(&handle) {
            Some(tcb) => tcb,
            None => panic!("unknown thread: {}", handle),
        }
    }

    pub fn tcb_mut(&mut self, handle: ThreadHandle) -> &mut ThreadControlBlock {
        match self.threads.get_mut(&handle) {
            Some(tcb) => tcb,
            None => panic!("unknown thread: {}", handle),
        }
    }

    pub fn create_thread(&mut self, name: &str, priority: Priority) -> ThreadHandle {
        let handle = match ThreadHandle::new(self.next_handle) {
            Some(handle) => handle,
            None => panic!("thread handle space exhausted"),
        };
        self.next_handle += 1;

        self.threads
            .insert(handle, ThreadControlBlock::new(handle, name, priority));
        self.scheduler.enqueue(handle);
        debug!("created thread '{}' ({}) at priority {}", name, handle, priority);
        handle
    }

    pub fn wake_thread(&mut self, handle: ThreadHandle) {
        let tcb = self.tcb_mut(handle);
        assert_eq!(
            tcb.state,
            ThreadState::Blocked,
            "unblock of thread '{}' which is not blocked",
            tcb.name
        );
        tcb.state = ThreadState::Ready;
        trace!("thread '{}' ready at priority {}", tcb.name, tcb.priority);
        self.scheduler.enqueue(handle);
    }

    /// Whether a ready thread would preempt the running one.
    pub fn outranked(&self) -> bool {
        let Some(current) = self.current_thread else {
            return false;
        };
        let running = self.tcb(current).priority;
        self.scheduler
            .highest_priority(&self.threads)
            .is_some_and(|ready| ready > running)
    }

    /// Maximum priority among `handle`'s donors.
    pub fn donated_priority(&self, handle: ThreadHandle) -> Option<Priority> {
        self.tcb(handle)
            .donors
            .iter()
            .filter_map(|donor| self.threads.get(donor))
            .map(|donor| donor.priority)
            .max()
    }

    fn switch_out(&mut self, outgoing: ThreadHandle) {
        let level = self.intr_level;
        if let Some(tcb) = self.threads.get_mut(&outgoing) {
            tcb.saved_intr_level = level;
        }
        self.dispatch_next();
    }

    fn dispatch_next(&mut self) {
        match self.scheduler.schedule(&self.threads) {
            Some(next) => {
                let tcb = self.tcb_mut(next);
                tcb.state = ThreadState::Running;
                let level = tcb.saved_intr_level;
                trace!("switching to '{}' at priority {}", tcb.name, tcb.priority);
                self.intr_level = level;
                self.current_thread = Some(next);
            }
            None => {
                self.current_thread = None;
                if self.halt.is_some() {
                    return;
                }
                if self.threads.is_empty() {
                    self.halt = Some(Halt::Finished);
                } else {
                    let mut blocked: Vec<String> =
                        self.threads.values().map(|t| t.name.clone()).collect();
                    blocked.sort();
                    warn!("no thread ready to run, blocked: {:?}", blocked);
                    self.halt = Some(Halt::Deadlock { blocked });
                }
            }
        }
    }
}

/// The simulated uniprocessor: one thread table, one running thread.
///
/// Every kernel thread is backed by a host thread, but a host thread only
/// executes while its handle is `current_thread`. All others are parked on
/// `cpu` until they are switched in.
pub(crate) struct Machine {
    manager: Mutex<ThreadManager>,
    cpu: Condvar,
    hosts: Mutex<Vec<JoinHandle<()>>>,
}

impl Machine {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            manager: Mutex::new(ThreadManager::new()),
            cpu: Condvar::new(),
            hosts: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, ThreadManager> {
        self.manager.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait_for_cpu<'a>(
        &'a self,
        me: ThreadHandle,
        mut tm: MutexGuard<'a, ThreadManager>,
    ) -> MutexGuard<'a, ThreadManager> {
        loop {
            if tm.halt.is_some() {
                drop(tm);
                panic::resume_unwind(Box::new(Shutdown));
            }
            if tm.current_thread == Some(me) {
                return tm;
            }
            tm = self.cpu.wait(tm).unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Gives the CPU away and returns once `me` is running again.
    fn switch<'a>(
        &'a self,
        mut tm: MutexGuard<'a, ThreadManager>,
        me: ThreadHandle,
    ) -> MutexGuard<'a, ThreadManager> {
        tm.switch_out(me);
        self.cpu.notify_all();
        self.wait_for_cpu(me, tm)
    }

    pub(crate) fn spawn_thread(
        self: &Arc<Self>,
        name: &str,
        priority: Priority,
        body: Box<dyn FnOnce() + Send>,
    ) -> Result<ThreadHandle, KernelError> {
        assert!(
            (PRI_MIN..=PRI_MAX).contains(&priority),
            "priority {} out of range",
            priority
        );
        let handle = self.lock().create_thread(name, priority);

        let machine = Arc::clone(self);
        let spawned = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || machine.thread_entry(handle, body));

        match spawned {
            Ok(join) => {
                self.hosts
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(join);
                Ok(handle)
            }
            Err(err) => {
                let mut tm = self.lock();
                tm.scheduler.dequeue(handle);
                tm.threads.remove(&handle);
                Err(KernelError::Spawn(err))
            }
        }
    }

    fn thread_entry(self: Arc<Self>, handle: ThreadHandle, body: Box<dyn FnOnce() + Send>) {
        CURRENT.with(|cur| {
            *cur.borrow_mut() = Some(Running {
                machine: Arc::clone(&self),
                handle,
            })
        });

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            drop(self.wait_for_cpu(handle, self.lock()));
            body();
        }));

        match outcome {
            Ok(()) => self.exit(handle),
            Err(payload) if payload.is::<Shutdown>() => {}
            Err(payload) => self.record_panic(handle, payload.as_ref()),
        }

        CURRENT.with(|cur| cur.borrow_mut().take());
    }

    fn exit(&self, handle: ThreadHandle) {
        let mut tm = self.lock();
        if let Some(tcb) = tm.threads.remove(&handle) {
            debug!("thread '{}' exiting", tcb.name);
        }
        tm.dispatch_next();
        self.cpu.notify_all();
    }

    fn record_panic(&self, handle: ThreadHandle, payload: &(dyn Any + Send)) {
        let message = if let Some(msg) = payload.downcast_ref::<&str>() {
            msg.to_string()
        } else if let Some(msg) = payload.downcast_ref::<String>() {
            msg.clone()
        } else {
            "unknown panic payload".to_string()
        };

        let mut tm = self.lock();
        let thread = tm
            .threads
            .get(&handle)
            .map(|tcb| tcb.name.clone())
            .unwrap_or_else(|| handle.to_string());
        warn!("kernel panic in thread '{}': {}", thread, message);
        if tm.halt.is_none() {
            tm.halt = Some(Halt::Panic { thread, message });
        }
        tm.current_thread = None;
        self.cpu.notify_all();
    }

    /// Hands the CPU to the best ready thread if nothing is running yet.
    pub(crate) fn start(&self) {
        let mut tm = self.lock();
        if tm.current_thread.is_none() {
            tm.dispatch_next();
        }
        self.cpu.notify_all();
    }

    pub(crate) fn wait_halt(&self) -> Halt {
        let mut tm = self.lock();
        loop {
            if let Some(halt) = tm.halt.clone() {
                return halt;
            }
            tm = self.cpu.wait(tm).unwrap_or_else(PoisonError::into_inner);
        }
    }

    pub(crate) fn join_hosts(&self) {
        let hosts = std::mem::take(&mut *self.hosts.lock().unwrap_or_else(PoisonError::into_inner));
        for host in hosts {
            if host.join().is_err() {
                warn!("host thread terminated abnormally");
            }
        }
    }
}

struct Running {
    machine: Arc<Machine>,
    handle: ThreadHandle,
}

thread_local! {
    static CURRENT: RefCell<Option<Running>> = const { RefCell::new(None) };
}

fn running() -> (Arc<Machine>, ThreadHandle) {
    CURRENT.with(|cur| match cur.borrow().as_ref() {
        Some(running) => (Arc::clone(&running.machine), running.handle),
        None => panic!("not running on a kernel thread"),
    })
}

/// Runs `f` with exclusive access to the thread table.
///
/// `f` must not block, yield or re-enter the thread table.
pub(crate) fn with_manager<R>(f: impl FnOnce(&mut ThreadManager) -> R) -> R {
    let (machine, _) = running();
    let mut tm = machine.lock();
    f(&mut tm)
}

/// Handle of the running thread. Inside an interrupt handler this is the
/// interrupted thread.
pub fn current() -> ThreadHandle {
    CURRENT.with(|cur| match cur.borrow().as_ref() {
        Some(running) => running.handle,
        None => panic!("not running on a kernel thread"),
    })
}

/// Creates a ready thread running `f`. If it outranks the caller, it runs
/// before `spawn` returns.
pub fn spawn<F>(name: &str, priority: Priority, f: F) -> Result<ThreadHandle, KernelError>
where
    F: FnOnce() + Send + 'static,
{
    let (machine, _) = running();
    let handle = machine.spawn_thread(name, priority, Box::new(f))?;
    yield_if_outranked();
    Ok(handle)
}

/// Puts the running thread to sleep until [`unblock`] is called on it.
///
/// Interrupts must be disabled, and this may not be called from an
/// interrupt handler.
pub fn block() {
    let (machine, me) = running();
    let mut tm = machine.lock();
    assert!(!tm.in_interrupt, "thread::block called from interrupt context");
    assert_eq!(
        tm.intr_level,
        IntrLevel::Off,
        "thread::block called with interrupts enabled"
    );
    let tcb = tm.tcb_mut(me);
    tcb.state = ThreadState::Blocked;
    trace!("thread '{}' blocked", tcb.name);
    drop(machine.switch(tm, me));
}

/// Moves a blocked thread to the ready queue. Does not preempt the caller.
pub fn unblock(handle: ThreadHandle) {
    with_manager(|tm| tm.wake_thread(handle));
}

/// Gives up the CPU; the caller stays ready and may be picked again at once.
pub fn yield_now() {
    let (machine, me) = running();
    let mut tm = machine.lock();
    assert!(
        !tm.in_interrupt,
        "thread::yield_now called from interrupt context"
    );
    tm.tcb_mut(me).state = ThreadState::Ready;
    tm.scheduler.enqueue(me);
    drop(machine.switch(tm, me));
}

/// Yields if a ready thread has a higher priority than the running one.
/// From an interrupt handler the yield is deferred to interrupt return.
pub fn yield_if_outranked() {
    let should_yield = with_manager(|tm| {
        if !tm.outranked() {
            return false;
        }
        if tm.in_interrupt {
            tm.yield_on_return = true;
            return false;
        }
        true
    });
    if should_yield {
        yield_now();
    }
}

/// Effective priority of the running thread.
pub fn get_priority() -> Priority {
    let me = current();
    with_manager(|tm| tm.tcb(me).priority)
}

/// Sets the running thread's base priority. Donations still in effect keep
/// the effective priority raised.
pub fn set_priority(priority: Priority) {
    assert!(
        (PRI_MIN..=PRI_MAX).contains(&priority),
        "priority {} out of range",
        priority
    );
    let me = current();
    with_manager(|tm| {
        let donated = tm.donated_priority(me);
        let tcb = tm.tcb_mut(me);
        tcb.base_priority = priority;
        tcb.priority = donated.map_or(priority, |d| d.max(priority));
        debug!(
            "thread '{}' base priority {} (effective {})",
            tcb.name, tcb.base_priority, tcb.priority
        );
    });
    yield_if_outranked();
}

/// Snapshot of a thread's scheduling state, `None` once it has exited.
pub fn info(handle: ThreadHandle) -> Option<ThreadInfo> {
    with_manager(|tm| tm.threads.get(&handle).map(ThreadControlBlock::info))
}

/// Name of the running thread.
pub fn name() -> String {
    let me = current();
    with_manager(|tm| tm.tcb(me).name.clone())
}
