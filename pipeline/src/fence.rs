//! Scheduler fences.
//!
//! A fence carries the host-queue tick observed when it was queued;
//! signaling is a comparison against the scheduler's free-through tick.
//! Stubbed fences always report signaled. A fence with a guest address
//! additionally asks the collaborator to write the payload on signal.

use crate::traits::Scheduler;
use std::sync::Arc;

pub struct Fence<S: Scheduler> {
    scheduler: Arc<S>,
    payload: u32,
    address: Option<u64>,
    is_stubbed: bool,
    wait_tick: u64,
}

impl<S: Scheduler> Fence<S> {
    pub fn new(scheduler: Arc<S>, payload: u32, is_stubbed: bool) -> Fence<S> {
        Fence {
            scheduler,
            payload,
            address: None,
            is_stubbed,
            wait_tick: 0,
        }
    }

    pub fn with_address(
        scheduler: Arc<S>,
        address: u64,
        payload: u32,
        is_stubbed: bool,
    ) -> Fence<S> {
        Fence {
            scheduler,
            payload,
            address: Some(address),
            is_stubbed,
            wait_tick: 0,
        }
    }

    pub fn payload(&self) -> u32 {
        self.payload
    }

    pub fn address(&self) -> Option<u64> {
        self.address
    }

    /// Records the current tick and flushes the queue behind it.
    pub fn queue(&mut self) {
        if self.is_stubbed {
            return;
        }
        self.wait_tick = self.scheduler.current_tick();
        self.scheduler.flush();
    }

    pub fn is_signaled(&self) -> bool {
        if self.is_stubbed {
            return true;
        }
        self.scheduler.is_free(self.wait_tick)
    }

    pub fn wait(&self) {
        if self.is_stubbed {
            return;
        }
        self.scheduler.wait(self.wait_tick);
    }

    pub fn wait_tick(&self) -> u64 {
        self.wait_tick
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct TestScheduler {
        tick: AtomicU64,
        free_tick: AtomicU64,
    }

    impl TestScheduler {
        fn new() -> TestScheduler {
            TestScheduler {
                tick: AtomicU64::new(1),
                free_tick: AtomicU64::new(0),
            }
        }

        fn advance(&self) {
            self.tick.fetch_add(1, Ordering::SeqCst);
        }

        fn retire_all(&self) {
            self.free_tick
                .store(self.tick.load(Ordering::SeqCst), Ordering::SeqCst);
        }
    }

    impl Scheduler for TestScheduler {
        fn current_tick(&self) -> u64 {
            self.tick.load(Ordering::SeqCst)
        }
        fn is_free(&self, tick: u64) -> bool {
            self.free_tick.load(Ordering::SeqCst) >= tick
        }
        fn wait(&self, _tick: u64) {}
        fn flush(&self) {}
    }

    #[test]
    fn stubbed_fence_is_always_signaled() {
        let scheduler = Arc::new(TestScheduler::new());
        let fence = Fence::new(scheduler, 1, true);
        assert!(fence.is_signaled());
    }

    #[test]
    fn ticks_are_monotonic_across_queues() {
        let scheduler = Arc::new(TestScheduler::new());
        let mut first = Fence::new(Arc::clone(&scheduler), 1, false);
        first.queue();
        scheduler.advance();
        let mut second = Fence::new(Arc::clone(&scheduler), 2, false);
        second.queue();
        assert!(first.wait_tick() <= second.wait_tick());
    }

    #[test]
    fn signal_is_sticky() {
        let scheduler = Arc::new(TestScheduler::new());
        let mut fence = Fence::new(Arc::clone(&scheduler), 1, false);
        fence.queue();
        assert!(!fence.is_signaled());
        scheduler.retire_all();
        assert!(fence.is_signaled());
        // Later queue activity must not unsignal an observed fence.
        scheduler.advance();
        assert!(fence.is_signaled());
    }
}
