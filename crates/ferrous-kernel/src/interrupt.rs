//! Interrupt level control for the simulated CPU.
//!
//! Masking interrupts is the only exclusion primitive beneath the
//! synchronization core: with interrupts off, nothing can preempt the running
//! thread or run a handler that touches a wait queue. Interrupts are
//! delivered synchronously through [`raise`], which runs the handler on the
//! current thread in interrupt context.

use crate::thread;
use log::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntrLevel {
    On,
    Off,
}

pub fn get_level() -> IntrLevel {
    thread::with_manager(|tm| tm.intr_level)
}

/// Sets the interrupt level, returning the previous one.
pub fn set_level(level: IntrLevel) -> IntrLevel {
    match level {
        IntrLevel::On => enable(),
        IntrLevel::Off => disable(),
    }
}

pub fn enable() -> IntrLevel {
    thread::with_manager(|tm| {
        assert!(
            !tm.in_interrupt,
            "interrupts enabled inside an interrupt handler"
        );
        std::mem::replace(&mut tm.intr_level, IntrLevel::On)
    })
}

pub fn disable() -> IntrLevel {
    thread::with_manager(|tm| std::mem::replace(&mut tm.intr_level, IntrLevel::Off))
}

/// True while an interrupt handler is running.
pub fn context() -> bool {
    thread::with_manager(|tm| tm.in_interrupt)
}

/// Asks for the interrupted thread to yield once the handler returns.
pub fn yield_on_return() {
    thread::with_manager(|tm| {
        assert!(tm.in_interrupt, "yield_on_return outside interrupt context");
        tm.yield_on_return = true;
    });
}

/// Delivers an interrupt: runs `handler` in interrupt context with
/// interrupts off, then yields if the handler asked for it.
pub fn raise<F: FnOnce()>(name: &str, handler: F) {
    thread::with_manager(|tm| {
        assert!(!tm.in_interrupt, "nested interrupt '{}'", name);
        assert_eq!(
            tm.intr_level,
            IntrLevel::On,
            "interrupt '{}' raised while interrupts are masked",
            name
        );
        tm.in_interrupt = true;
        tm.intr_level = IntrLevel::Off;
        tm.yield_on_return = false;
    });
    trace!("entering interrupt '{}'", name);

    handler();

    let must_yield = thread::with_manager(|tm| {
        tm.in_interrupt = false;
        tm.intr_level = IntrLevel::On;
        std::mem::take(&mut tm.yield_on_return)
    });
    trace!("leaving interrupt '{}'", name);
    if must_yield {
        thread::yield_now();
    }
}

/// Disables interrupts for its lifetime and restores the previous level on
/// drop.
pub struct IntrGuard {
    old: IntrLevel,
}

impl IntrGuard {
    pub fn new() -> Self {
        Self { old: disable() }
    }

    pub fn was_enabled(&self) -> bool {
        self.old == IntrLevel::On
    }
}

impl Default for IntrGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for IntrGuard {
    fn drop(&mut self) {
        // A parked thread retired by a halted CPU unwinds through here.
        if !std::thread::panicking() {
            set_level(self.old);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{boot, boot_err};
    use crate::KernelError;

    #[test]
    fn disable_returns_previous_level() {
        boot(31, || {
            assert_eq!(get_level(), IntrLevel::On);
            let old = disable();
            assert_eq!(old, IntrLevel::On);
            assert_eq!(disable(), IntrLevel::Off);
            set_level(old);
            assert_eq!(get_level(), IntrLevel::On);
        });
    }

    #[test]
    fn guard_restores_level() {
        boot(31, || {
            {
                let guard = IntrGuard::new();
                assert!(guard.was_enabled());
                assert_eq!(get_level(), IntrLevel::Off);
                {
                    let inner = IntrGuard::new();
                    assert!(!inner.was_enabled());
                }
                assert_eq!(get_level(), IntrLevel::Off);
            }
            assert_eq!(get_level(), IntrLevel::On);
        });
    }

    #[test]
    fn level_is_saved_across_switches() {
        boot(10, || {
            let _guard = IntrGuard::new();
            thread::spawn("other", 20, || {
                assert_eq!(get_level(), IntrLevel::On);
            })
            .unwrap();
            thread::yield_now();
            assert_eq!(get_level(), IntrLevel::Off);
        });
    }

    #[test]
    fn handler_runs_in_interrupt_context() {
        boot(31, || {
            assert!(!context());
            raise("timer", || {
                assert!(context());
                assert_eq!(get_level(), IntrLevel::Off);
            });
            assert!(!context());
            assert_eq!(get_level(), IntrLevel::On);
        });
    }

    #[test]
    fn raise_with_interrupts_masked_is_fatal() {
        let err = boot_err(31, || {
            let _guard = IntrGuard::new();
            raise("timer", || {});
        });
        match err {
            KernelError::Panic { message, .. } => assert!(message.contains("masked"), "{}", message),
            other => panic!("unexpected error: {}", other),
        }
    }
}
