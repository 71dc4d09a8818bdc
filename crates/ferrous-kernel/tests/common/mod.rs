use ferrous_kernel::{Kernel, KernelConfig, KernelError, Priority};
use std::sync::{Arc, Mutex};

fn kernel(priority: Priority) -> Kernel {
    let _ = env_logger::builder().is_test(true).try_init();
    Kernel::new(KernelConfig {
        main_priority: priority,
        ..KernelConfig::default()
    })
}

pub fn boot<F: FnOnce() + Send + 'static>(priority: Priority, main: F) {
    if let Err(err) = kernel(priority).run(main) {
        panic!("kernel halted abnormally: {}", err);
    }
}

pub fn boot_err<F: FnOnce() + Send + 'static>(priority: Priority, main: F) -> KernelError {
    match kernel(priority).run(main) {
        Ok(()) => panic!("kernel halted cleanly"),
        Err(err) => err,
    }
}

#[derive(Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.0.lock().unwrap())
    }
}
