pub mod error;
pub mod fs;
pub mod interrupt;
pub mod selftest;
pub mod sync;
pub mod thread;
pub mod types;

pub use crate::error::KernelError;
pub use crate::sync::{Condvar, Lock, Semaphore};
pub use crate::types::{LockId, Priority, ThreadHandle, PRI_DEFAULT, PRI_MAX, PRI_MIN};

use log::info;
use std::sync::Arc;
use thread::{Halt, Machine};

/// Boot parameters for the first kernel thread.
#[derive(Debug, Clone)]
pub struct KernelConfig {
    pub main_name: String,
    pub main_priority: Priority,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            main_name: "main".to_string(),
            main_priority: PRI_DEFAULT,
        }
    }
}

pub struct Kernel {
    config: KernelConfig,
    machine: Arc<Machine>,
}

impl Kernel {
    pub fn new(config: KernelConfig) -> Self {
        Self {
            config,
            machine: Machine::new(),
        }
    }

    /// Boots the CPU with `main` as its first thread and runs until every
    /// thread has exited.
    ///
    /// Returns an error if the threads still alive are all blocked, or if a
    /// kernel thread panicked.
    pub fn run<F>(self, main: F) -> Result<(), KernelError>
    where
        F: FnOnce() + Send + 'static,
    {
        info!(
            "booting with '{}' at priority {}",
            self.config.main_name, self.config.main_priority
        );
        self.machine.spawn_thread(
            &self.config.main_name,
            self.config.main_priority,
            Box::new(main),
        )?;
        self.machine.start();

        let halt = self.machine.wait_halt();
        self.machine.join_hosts();

        match halt {
            Halt::Finished => {
                info!("all threads finished");
                Ok(())
            }
            Halt::Deadlock { blocked } => Err(KernelError::Deadlock { blocked }),
            Halt::Panic { thread, message } => Err(KernelError::Panic { thread, message }),
        }
    }
}

/// Runs `main` on a kernel booted with the default configuration.
pub fn run<F>(main: F) -> Result<(), KernelError>
where
    F: FnOnce() + Send + 'static,
{
    Kernel::new(KernelConfig::default()).run(main)
}
