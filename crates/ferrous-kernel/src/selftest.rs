//! Built-in self tests, each booting its own kernel.
//!
//! A failed check inside a kernel thread is a kernel panic, so a suite
//! reports failure as [`KernelError::Panic`].

use crate::sync::{Condvar, Lock, Semaphore, SpinLock};
use crate::types::{Priority, PRI_DEFAULT, PRI_MAX, PRI_MIN};
use crate::{thread, Kernel, KernelConfig, KernelError};
use log::info;
use std::sync::Arc;

const ROUNDS: usize = 10;

fn start<F: FnOnce() + Send + 'static>(name: &str, priority: Priority, f: F) {
    if let Err(err) = thread::spawn(name, priority, f) {
        panic!("cannot start '{}': {}", name, err);
    }
}

/// Ping-pongs control between two threads through a pair of semaphores.
pub fn sema(config: KernelConfig) -> Result<(), KernelError> {
    info!("testing semaphores");
    Kernel::new(config).run(|| {
        let pair = Arc::new([Semaphore::new(0), Semaphore::new(0)]);
        let helper = Arc::clone(&pair);
        start("sema-test", PRI_DEFAULT, move || {
            for _ in 0..ROUNDS {
                helper[0].down();
                helper[1].up();
            }
        });

        for _ in 0..ROUNDS {
            pair[0].up();
            pair[1].down();
        }
        assert_eq!(pair[0].value(), 0);
        assert_eq!(pair[1].value(), 0);
    })?;
    info!("semaphores done");
    Ok(())
}

/// Two threads of rising priority donate to the main thread through one
/// lock, then run in priority order once it is released.
pub fn donation(config: KernelConfig) -> Result<(), KernelError> {
    info!("testing priority donation");
    Kernel::new(config).run(|| {
        if thread::get_priority() > PRI_MAX - 2 {
            thread::set_priority(PRI_DEFAULT);
        }
        let base = thread::get_priority();
        let lock = Arc::new(Lock::new());
        let order = Arc::new(SpinLock::new(Vec::new()));

        lock.acquire();
        for step in 1..=2 {
            let (lk, ord) = (Arc::clone(&lock), Arc::clone(&order));
            let name = format!("acquire{}", step);
            start(&name, base + step, move || {
                lk.acquire();
                ord.lock().push(thread::get_priority());
                lk.release();
            });
            assert_eq!(
                thread::get_priority(),
                base + step,
                "main should have priority {}",
                base + step
            );
        }
        lock.release();

        assert_eq!(*order.lock(), [base + 2, base + 1]);
        assert_eq!(thread::get_priority(), base);
    })?;
    info!("priority donation done");
    Ok(())
}

/// Waiters of mixed priority are signalled one at a time and must wake
/// highest first.
pub fn condvar(config: KernelConfig) -> Result<(), KernelError> {
    info!("testing condition variables");
    Kernel::new(config).run(|| {
        thread::set_priority(PRI_MIN);
        let lock = Arc::new(Lock::new());
        let cond = Arc::new(Condvar::new());
        let woken: Arc<SpinLock<Vec<Priority>>> = Arc::new(SpinLock::new(Vec::new()));

        for i in 0..ROUNDS {
            let priority = PRI_DEFAULT - ((i + 7) % ROUNDS) as Priority - 1;
            let (lk, cv, wk) = (Arc::clone(&lock), Arc::clone(&cond), Arc::clone(&woken));
            start(&format!("priority {}", priority), priority, move || {
                lk.acquire();
                cv.wait(&lk);
                wk.lock().push(priority);
                lk.release();
            });
        }
        assert_eq!(cond.waiters_len(), ROUNDS);

        for _ in 0..ROUNDS {
            lock.acquire();
            cond.signal(&lock);
            lock.release();
        }

        let woken = woken.lock();
        assert_eq!(woken.len(), ROUNDS);
        assert!(
            woken.windows(2).all(|pair| pair[0] > pair[1]),
            "waiters woke out of priority order: {:?}",
            *woken
        );
    })?;
    info!("condition variables done");
    Ok(())
}

/// Runs every suite, stopping at the first failure.
pub fn all(config: KernelConfig) -> Result<(), KernelError> {
    sema(config.clone())?;
    donation(config.clone())?;
    condvar(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(main_priority: Priority) -> KernelConfig {
        let _ = env_logger::builder().is_test(true).try_init();
        KernelConfig {
            main_priority,
            ..KernelConfig::default()
        }
    }

    #[test]
    fn suites_pass_at_default_priority() {
        all(config(PRI_DEFAULT)).unwrap();
    }

    #[test]
    fn donation_suite_handles_top_priority() {
        donation(config(PRI_MAX)).unwrap();
    }

    #[test]
    fn suites_pass_at_lowest_priority() {
        all(config(PRI_MIN)).unwrap();
    }
}
