use crate::thread::tcb::ThreadControlBlock;
use crate::types::{Priority, ThreadHandle};
use std::collections::{HashMap, VecDeque};

pub trait Scheduler: Send {
    /// Select next thread to run
    fn schedule(&mut self, threads: &HashMap<ThreadHandle, ThreadControlBlock>)
        -> Option<ThreadHandle>;

    /// Add thread to ready queue
    fn enqueue(&mut self, thread: ThreadHandle);

    /// Remove thread from ready queue (e.g. if blocked or terminated)
    fn dequeue(&mut self, thread: ThreadHandle) -> bool;

    /// Priority of the thread `schedule` would pick next
    fn highest_priority(
        &self,
        threads: &HashMap<ThreadHandle, ThreadControlBlock>,
    ) -> Option<Priority>;
}

/// Strict-priority ready queue.
///
/// Priorities are read at pick time, so donations made while a thread sits in
/// the queue are honored. Threads of equal priority run in FIFO order.
pub struct PriorityScheduler {
    ready_queue: VecDeque<ThreadHandle>,
}

impl Default for PriorityScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl PriorityScheduler {
    pub fn new() -> Self {
        Self {
            ready_queue: VecDeque::new(),
        }
    }

    fn best_position(
        &self,
        threads: &HashMap<ThreadHandle, ThreadControlBlock>,
    ) -> Option<(usize, Priority)> {
        let mut best: Option<(usize, Priority)> = None;
        for (pos, handle) in self.ready_queue.iter().enumerate() {
            let Some(tcb) = threads.get(handle) else {
                continue;
            };
            // Strictly greater keeps the earliest of equal priorities.
            if best.map_or(true, |(_, p)| tcb.priority > p) {
                best = Some((pos, tcb.priority));
            }
        }
        best
    }
}

impl Scheduler for PriorityScheduler {
    fn schedule(
        &mut self,
        threads: &HashMap<ThreadHandle, ThreadControlBlock>,
    ) -> Option<ThreadHandle> {
        let (pos, _) = self.best_position(threads)?;
        self.ready_queue.remove(pos)
    }

    fn enqueue(&mut self, thread: ThreadHandle) {
        self.ready_queue.push_back(thread);
    }

    fn dequeue(&mut self, thread: ThreadHandle) -> bool {
        if let Some(pos) = self.ready_queue.iter().position(|&h| h == thread) {
            self.ready_queue.remove(pos);
            true
        } else {
            false
        }
    }

    fn highest_priority(
        &self,
        threads: &HashMap<ThreadHandle, ThreadControlBlock>,
    ) -> Option<Priority> {
        self.best_position(threads).map(|(_, p)| p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(entries: &[(u32, Priority)]) -> HashMap<ThreadHandle, ThreadControlBlock> {
        entries
            .iter()
            .map(|&(id, prio)| {
                let handle = ThreadHandle::new(id).unwrap();
                (handle, ThreadControlBlock::new(handle, "t", prio))
            })
            .collect()
    }

    #[test]
    fn picks_highest_priority_first() {
        let threads = table(&[(1, 10), (2, 40), (3, 20)]);
        let mut sched = PriorityScheduler::new();
        for id in 1..=3 {
            sched.enqueue(ThreadHandle::new(id).unwrap());
        }
        assert_eq!(sched.highest_priority(&threads), Some(40));
        let order: Vec<u32> = std::iter::from_fn(|| sched.schedule(&threads))
            .map(|h| h.val())
            .collect();
        assert_eq!(order, vec![2, 3, 1]);
    }

    #[test]
    fn equal_priorities_are_fifo() {
        let threads = table(&[(1, 5), (2, 5), (3, 5)]);
        let mut sched = PriorityScheduler::new();
        for id in [3, 1, 2] {
            sched.enqueue(ThreadHandle::new(id).unwrap());
        }
        let order: Vec<u32> = std::iter::from_fn(|| sched.schedule(&threads))
            .map(|h| h.val())
            .collect();
        assert_eq!(order, vec![3, 1, 2]);
    }

    #[test]
    fn priority_is_read_at_pick_time() {
        let mut threads = table(&[(1, 5), (2, 7)]);
        let mut sched = PriorityScheduler::new();
        sched.enqueue(ThreadHandle::new(1).unwrap());
        sched.enqueue(ThreadHandle::new(2).unwrap());
        threads
            .get_mut(&ThreadHandle::new(1).unwrap())
            .unwrap()
            .priority = 9;
        assert_eq!(sched.schedule(&threads).map(|h| h.val()), Some(1));
    }

    #[test]
    fn dequeue_removes_thread() {
        let threads = table(&[(1, 5)]);
        let mut sched = PriorityScheduler::new();
        let h = ThreadHandle::new(1).unwrap();
        sched.enqueue(h);
        assert!(sched.dequeue(h));
        assert!(!sched.dequeue(h));
        assert_eq!(sched.schedule(&threads), None);
    }
}
