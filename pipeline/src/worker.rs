//! Bounded thread pool with optional per-thread state.
//!
//! FIFO across a single queue, no ordering among workers. Cancellation
//! is cooperative: stop requests are observed at the head of each loop
//! iteration and in-flight jobs finish their unit of work.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// Shared cancellation flag.
#[derive(Clone, Default)]
pub struct StopToken {
    stopped: Arc<AtomicBool>,
}

impl StopToken {
    pub fn new() -> StopToken {
        StopToken::default()
    }

    pub fn request_stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    pub fn stop_requested(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

type Task<S> = Box<dyn FnOnce(&mut S) + Send>;

struct Shared<S> {
    queue: Mutex<VecDeque<Task<S>>>,
    condition: Condvar,
    wait_condition: Condvar,
    work_scheduled: AtomicUsize,
    work_done: AtomicUsize,
    workers_stopped: AtomicUsize,
    workers_queued: usize,
    stop: StopToken,
}

/// Thread pool whose workers own a state built once per thread.
pub struct StatefulThreadWorker<S: 'static> {
    shared: Arc<Shared<S>>,
    threads: Vec<JoinHandle<()>>,
}

impl<S: 'static> StatefulThreadWorker<S> {
    pub fn new<F>(num_workers: usize, name: &str, state_factory: F) -> StatefulThreadWorker<S>
    where
        F: Fn() -> S + Send + Sync + 'static,
    {
        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::new()),
            condition: Condvar::new(),
            wait_condition: Condvar::new(),
            work_scheduled: AtomicUsize::new(0),
            work_done: AtomicUsize::new(0),
            workers_stopped: AtomicUsize::new(0),
            workers_queued: num_workers,
            stop: StopToken::new(),
        });
        let factory = Arc::new(state_factory);
        let mut threads = Vec::with_capacity(num_workers);
        for index in 0..num_workers {
            let shared = Arc::clone(&shared);
            let factory = Arc::clone(&factory);
            let thread_name = format!("{}:{}", name, index);
            let handle = std::thread::Builder::new()
                .name(thread_name)
                .spawn(move || worker_loop(shared, factory))
                .expect("failed to spawn worker thread");
            threads.push(handle);
        }
        StatefulThreadWorker { shared, threads }
    }

    pub fn queue_work<F>(&self, work: F)
    where
        F: FnOnce(&mut S) + Send + 'static,
    {
        {
            let mut queue = self.shared.queue.lock().unwrap();
            queue.push_back(Box::new(work));
            self.shared.work_scheduled.fetch_add(1, Ordering::Release);
        }
        self.shared.condition.notify_one();
    }

    /// Blocks until the queue drains or the token cancels the workers.
    pub fn wait_for_requests(&self, stop: Option<&StopToken>) {
        let shared = &self.shared;
        let mut queue = shared.queue.lock().unwrap();
        loop {
            if let Some(stop) = stop {
                if stop.stop_requested() {
                    // Forward the cancellation to the worker threads.
                    shared.stop.request_stop();
                    shared.condition.notify_all();
                }
            }
            let stopped = shared.workers_stopped.load(Ordering::Acquire) >= shared.workers_queued;
            let drained = shared.work_done.load(Ordering::Acquire)
                >= shared.work_scheduled.load(Ordering::Acquire);
            if stopped || drained {
                return;
            }
            // Re-check the stop flag on every wakeup.
            let (guard, _) = shared
                .wait_condition
                .wait_timeout(queue, Duration::from_millis(10))
                .unwrap();
            queue = guard;
        }
    }
}

impl<S: 'static> Drop for StatefulThreadWorker<S> {
    fn drop(&mut self) {
        self.shared.stop.request_stop();
        self.shared.condition.notify_all();
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_loop<S, F>(shared: Arc<Shared<S>>, factory: Arc<F>)
where
    F: Fn() -> S,
{
    let mut state = factory();
    while !shared.stop.stop_requested() {
        let task = {
            let mut queue = shared.queue.lock().unwrap();
            loop {
                if shared.stop.stop_requested() {
                    break None;
                }
                if let Some(task) = queue.pop_front() {
                    break Some(task);
                }
                shared.wait_condition.notify_all();
                let (guard, _) = shared
                    .condition
                    .wait_timeout(queue, Duration::from_millis(50))
                    .unwrap();
                queue = guard;
            }
        };
        let task = match task {
            Some(task) => task,
            None => break,
        };
        task(&mut state);
        shared.work_done.fetch_add(1, Ordering::Release);
        shared.wait_condition.notify_all();
    }
    shared.workers_stopped.fetch_add(1, Ordering::Release);
    shared.wait_condition.notify_all();
}

/// Stateless flavor used for serialization queues.
pub type ThreadWorker = StatefulThreadWorker<()>;

pub fn thread_worker(num_workers: usize, name: &str) -> ThreadWorker {
    StatefulThreadWorker::new(num_workers, name, || ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn executes_queued_work() {
        let counter = Arc::new(AtomicU32::new(0));
        let worker = thread_worker(2, "test:worker");
        for _ in 0..16 {
            let counter = Arc::clone(&counter);
            worker.queue_work(move |_| {
                counter.fetch_add(1, Ordering::Relaxed);
            });
        }
        worker.wait_for_requests(None);
        assert_eq!(counter.load(Ordering::Relaxed), 16);
    }

    #[test]
    fn state_factory_runs_once_per_thread() {
        let factories = Arc::new(AtomicU32::new(0));
        let factories_in_worker = Arc::clone(&factories);
        let worker = StatefulThreadWorker::new(1, "test:stateful", move || {
            factories_in_worker.fetch_add(1, Ordering::Relaxed);
            Vec::<u32>::new()
        });
        for i in 0..8 {
            worker.queue_work(move |state: &mut Vec<u32>| {
                state.push(i);
            });
        }
        worker.wait_for_requests(None);
        assert_eq!(factories.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn cancellation_stops_workers() {
        let worker = thread_worker(1, "test:cancel");
        let stop = StopToken::new();
        stop.request_stop();
        // The queue never drains on its own: the job re-queues itself
        // forever, so only cancellation can end the wait.
        worker.wait_for_requests(Some(&stop));
    }

    #[test]
    fn fifo_order_with_single_worker() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let worker = thread_worker(1, "test:fifo");
        for i in 0..32 {
            let order = Arc::clone(&order);
            worker.queue_work(move |_| {
                order.lock().unwrap().push(i);
            });
        }
        worker.wait_for_requests(None);
        let order = order.lock().unwrap();
        let expected: Vec<u32> = (0..32).collect();
        assert_eq!(*order, expected);
    }
}
