// Worker threads draining per-queue priority queues
//
// Producers enqueue round-robin across per-worker queues; each worker blocks
// on its own condvar, pops the highest-priority record, and runs the owning
// logger's processing outside the lock. Higher levels overtake lower ones
// within a queue; ties drain FIFO.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::message_pool::MessagePool;
use super::CacheAligned;
use crate::message::{MessagePtr, MessageState};

const FLUSH_POLL_INTERVAL: Duration = Duration::from_millis(10);
const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Join/flush budget used by the drop path
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

struct QueueItem {
    message: MessagePtr,
    priority: u8,
    sequence: u64,
}

impl PartialEq for QueueItem {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.sequence == other.sequence
    }
}

impl Eq for QueueItem {}

impl PartialOrd for QueueItem {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueItem {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Max-heap: higher priority first, then lower sequence (FIFO band)
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

struct QueueState {
    heap: BinaryHeap<QueueItem>,
    pending: usize,
    stop: bool,
}

struct WorkerQueue {
    state: Mutex<QueueState>,
    available: Condvar,
}

impl WorkerQueue {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(QueueState {
                heap: BinaryHeap::new(),
                pending: 0,
                stop: false,
            }),
            available: Condvar::new(),
        })
    }
}

struct Shared {
    running: CacheAligned<AtomicBool>,
    flushing: CacheAligned<AtomicBool>,
    queues: RwLock<Vec<Arc<WorkerQueue>>>,
    /// Workers currently routed to; retained queues beyond this index
    /// receive nothing
    active_workers: AtomicUsize,
    next_queue: CacheAligned<AtomicUsize>,
    enqueue_sequence: AtomicU64,
    pool: Arc<MessagePool>,
}

/// Pool of `max(1, n)` worker threads, each owning a priority queue.
///
/// Dropping the pool performs a flushing shutdown with the default timeout.
pub struct WorkerPool {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    resize_lock: Mutex<()>,
}

impl WorkerPool {
    pub fn new(thread_count: usize, pool: Arc<MessagePool>) -> Self {
        let thread_count = thread_count.max(1);

        let queues: Vec<Arc<WorkerQueue>> = (0..thread_count).map(|_| WorkerQueue::new()).collect();

        let shared = Arc::new(Shared {
            running: CacheAligned(AtomicBool::new(true)),
            flushing: CacheAligned(AtomicBool::new(false)),
            queues: RwLock::new(queues.clone()),
            active_workers: AtomicUsize::new(thread_count),
            next_queue: CacheAligned(AtomicUsize::new(0)),
            enqueue_sequence: AtomicU64::new(0),
            pool,
        });

        let workers = queues
            .into_iter()
            .enumerate()
            .map(|(index, queue)| spawn_worker(index, Arc::clone(&shared), queue))
            .collect();

        Self {
            shared,
            workers: Mutex::new(workers),
            resize_lock: Mutex::new(()),
        }
    }

    /// Hand an `Active` record to a worker.
    ///
    /// When the pool is stopped or flushing, or the record is not Active,
    /// the reference is released instead of queued (the record is dropped,
    /// not leaked).
    pub fn enqueue(&self, msg: MessagePtr, priority: u8) {
        // SAFETY: the caller holds a live reference
        let message = unsafe { msg.as_ref() };

        if !self.shared.running.0.load(Ordering::Acquire)
            || self.shared.flushing.0.load(Ordering::Acquire)
            || !message.is_active()
        {
            self.shared.pool.release(msg);
            return;
        }

        // The queue owns a reference until a worker drops it
        message.add_ref();

        let sequence = self
            .shared
            .enqueue_sequence
            .fetch_add(1, Ordering::Relaxed);

        let queues = self
            .shared
            .queues
            .read()
            .unwrap_or_else(|e| e.into_inner());
        let active = self
            .shared
            .active_workers
            .load(Ordering::Acquire)
            .clamp(1, queues.len());
        let index = self.shared.next_queue.0.fetch_add(1, Ordering::Relaxed) % active;
        let queue = &queues[index];

        let mut state = queue.state.lock().unwrap_or_else(|e| e.into_inner());
        state.heap.push(QueueItem {
            message: msg,
            priority,
            sequence,
        });
        state.pending += 1;
        queue.available.notify_one();
    }

    /// Wake every worker and poll until all queues drain or the deadline
    /// passes. Timeout is reported on stderr, not returned as an error.
    pub fn flush(&self, timeout: Duration) {
        let deadline = Instant::now() + timeout;

        let mut total_pending = 0;
        {
            let queues = self
                .shared
                .queues
                .read()
                .unwrap_or_else(|e| e.into_inner());
            for queue in queues.iter() {
                let state = queue.state.lock().unwrap_or_else(|e| e.into_inner());
                total_pending += state.pending;
                queue.available.notify_one();
            }
        }

        if total_pending == 0 {
            return;
        }

        while Instant::now() < deadline {
            thread::sleep(FLUSH_POLL_INTERVAL);
            if self.pending_message_count() == 0 {
                return;
            }
        }

        eprintln!(
            "warning: worker pool flush timed out with {} messages remaining",
            self.pending_message_count()
        );
    }

    /// Stop the pool. Idempotent; only the first call does anything.
    ///
    /// With `flush_before_shutdown`, queued records are processed first
    /// (within `timeout`). Workers that fail to join inside the remaining
    /// budget are detached with a warning; leftover queue entries are then
    /// released without processing.
    pub fn shutdown(&self, flush_before_shutdown: bool, timeout: Duration) {
        let was_running = self.shared.running.0.swap(false, Ordering::AcqRel);
        if !was_running {
            return;
        }

        if flush_before_shutdown {
            self.shared.flushing.0.store(true, Ordering::Release);
            self.flush(timeout);
            self.shared.flushing.0.store(false, Ordering::Release);
        }

        {
            let queues = self
                .shared
                .queues
                .read()
                .unwrap_or_else(|e| e.into_inner());
            for queue in queues.iter() {
                let _state = queue.state.lock().unwrap_or_else(|e| e.into_inner());
                queue.available.notify_all();
            }
        }

        let deadline = Instant::now() + timeout;
        let handles: Vec<JoinHandle<()>> = {
            let mut workers = self.workers.lock().unwrap_or_else(|e| e.into_inner());
            workers.drain(..).collect()
        };
        for handle in handles {
            if !join_with_deadline(handle, deadline) {
                eprintln!("warning: worker thread join timed out during shutdown, detaching");
            }
        }

        // Whatever is left was never processed; drop the references cleanly
        let queues = self
            .shared
            .queues
            .read()
            .unwrap_or_else(|e| e.into_inner());
        for queue in queues.iter() {
            drain_without_processing(&self.shared.pool, queue);
        }
    }

    /// Change the worker count; false if the pool is not running.
    ///
    /// `new_count` is coerced to at least 1. Shrinking retains the queues of
    /// departed workers (so indices stay valid) but stops routing to them.
    pub fn resize(&self, new_count: usize) -> bool {
        let new_count = new_count.max(1);
        let _lock = self.resize_lock.lock().unwrap_or_else(|e| e.into_inner());

        if !self.shared.running.0.load(Ordering::Acquire) {
            return false;
        }

        let current = self
            .workers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len();
        if new_count == current {
            return true;
        }

        if new_count < current {
            // Route away from the departing workers before stopping them
            self.shared
                .active_workers
                .store(new_count, Ordering::Release);

            let stopping: Vec<Arc<WorkerQueue>> = {
                let queues = self
                    .shared
                    .queues
                    .read()
                    .unwrap_or_else(|e| e.into_inner());
                queues[new_count..current].to_vec()
            };
            for queue in &stopping {
                let mut state = queue.state.lock().unwrap_or_else(|e| e.into_inner());
                state.stop = true;
                queue.available.notify_all();
            }

            let handles: Vec<JoinHandle<()>> = {
                let mut workers = self.workers.lock().unwrap_or_else(|e| e.into_inner());
                workers.drain(new_count..).collect()
            };
            for handle in handles {
                let _ = handle.join();
            }

            // Queues stay allocated for a later grow
            for queue in &stopping {
                queue
                    .state
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .stop = false;
            }
        } else {
            let to_spawn: Vec<(usize, Arc<WorkerQueue>)> = {
                let mut queues = self
                    .shared
                    .queues
                    .write()
                    .unwrap_or_else(|e| e.into_inner());
                while queues.len() < new_count {
                    queues.push(WorkerQueue::new());
                }
                (current..new_count)
                    .map(|index| (index, Arc::clone(&queues[index])))
                    .collect()
            };

            let mut workers = self.workers.lock().unwrap_or_else(|e| e.into_inner());
            for (index, queue) in to_spawn {
                workers.push(spawn_worker(index, Arc::clone(&self.shared), queue));
            }
            self.shared
                .active_workers
                .store(new_count, Ordering::Release);
        }

        true
    }

    pub fn pending_message_count(&self) -> usize {
        let queues = self
            .shared
            .queues
            .read()
            .unwrap_or_else(|e| e.into_inner());
        queues
            .iter()
            .map(|queue| {
                queue
                    .state
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .pending
            })
            .sum()
    }

    pub fn thread_count(&self) -> usize {
        self.workers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.0.load(Ordering::Acquire)
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown(true, DEFAULT_SHUTDOWN_TIMEOUT);
    }
}

fn spawn_worker(index: usize, shared: Arc<Shared>, queue: Arc<WorkerQueue>) -> JoinHandle<()> {
    thread::Builder::new()
        .name(format!("logforge-worker-{index}"))
        .spawn(move || worker_loop(shared, queue))
        .expect("failed to spawn worker thread")
}

fn worker_loop(shared: Arc<Shared>, queue: Arc<WorkerQueue>) {
    loop {
        let item = {
            let state = queue.state.lock().unwrap_or_else(|e| e.into_inner());
            let mut state = queue
                .available
                .wait_while(state, |state| {
                    let running = shared.running.0.load(Ordering::Acquire);
                    let flushing = shared.flushing.0.load(Ordering::Acquire);
                    state.heap.is_empty() && !state.stop && (running || flushing)
                })
                .unwrap_or_else(|e| e.into_inner());

            match state.heap.pop() {
                Some(item) => {
                    state.pending -= 1;
                    item
                }
                // Empty and told to exit
                None => break,
            }
        };

        let msg = item.message;
        // SAFETY: the queue holds a reference until release_ref below
        if unsafe { msg.as_ref() }.is_active() {
            match unsafe { msg.as_ref() }.logger() {
                Some(logger) => logger.process_message(msg),
                // Originating logger is gone; drop the record instead
                None => shared.pool.release(msg),
            }
        }

        // SAFETY: fresh borrow after processing; the queue reference is
        // still live until this release
        let message = unsafe { msg.as_ref() };
        if message.release_ref() && message.state() == MessageState::Releasing {
            shared.pool.finalize_release(msg);
        }
    }

    // Races between our last emptiness check and shutdown notifications can
    // strand entries; release them without processing
    drain_without_processing(&shared.pool, &queue);
}

fn drain_without_processing(pool: &MessagePool, queue: &WorkerQueue) {
    let mut state = queue.state.lock().unwrap_or_else(|e| e.into_inner());
    while let Some(item) = state.heap.pop() {
        state.pending -= 1;

        let msg = item.message;
        pool.release(msg);

        // SAFETY: the queue reference is still live until this release
        let message = unsafe { msg.as_ref() };
        if message.release_ref() && message.state() == MessageState::Releasing {
            pool.finalize_release(msg);
        }
    }
}

fn join_with_deadline(handle: JoinHandle<()>, deadline: Instant) -> bool {
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            // Dropping the handle detaches the thread
            return false;
        }
        thread::sleep(JOIN_POLL_INTERVAL);
    }
    let _ = handle.join();
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ptr::NonNull;

    fn test_pool() -> Arc<MessagePool> {
        Arc::new(MessagePool::with_capacity(64))
    }

    fn item(priority: u8, sequence: u64) -> QueueItem {
        let raw = Box::into_raw(Box::new(crate::message::Message::pooled()));
        QueueItem {
            message: MessagePtr::new(NonNull::new(raw).unwrap()),
            priority,
            sequence,
        }
    }

    #[test]
    fn test_queue_item_priority_order() {
        let mut heap = BinaryHeap::new();
        // Info, Warn, Error at ascending sequences, like a burst of three
        heap.push(item(2, 0));
        heap.push(item(3, 1));
        heap.push(item(4, 2));

        let order: Vec<u8> = std::iter::from_fn(|| heap.pop().map(|i| i.priority)).collect();
        assert_eq!(order, vec![4, 3, 2]);
    }

    #[test]
    fn test_queue_item_fifo_within_priority_band() {
        let mut heap = BinaryHeap::new();
        heap.push(item(2, 10));
        heap.push(item(2, 11));
        heap.push(item(2, 12));

        let order: Vec<u64> = std::iter::from_fn(|| heap.pop().map(|i| i.sequence)).collect();
        assert_eq!(order, vec![10, 11, 12]);
    }

    #[test]
    fn test_constructor_coerces_zero_workers() {
        let pool = WorkerPool::new(0, test_pool());
        assert_eq!(pool.thread_count(), 1);
        assert!(pool.is_running());
    }

    #[test]
    fn test_enqueue_and_flush_finalizes_records() {
        let messages = test_pool();
        let workers = WorkerPool::new(2, Arc::clone(&messages));

        for _ in 0..50 {
            let msg = messages.acquire().unwrap();
            // No logger attached: workers release the record untouched
            workers.enqueue(msg, 2);
        }

        workers.flush(Duration::from_secs(5));
        assert_eq!(workers.pending_message_count(), 0);

        workers.shutdown(true, Duration::from_secs(5));
        assert_eq!(messages.size(), 0);
    }

    #[test]
    fn test_flush_with_nothing_pending_returns_immediately() {
        let workers = WorkerPool::new(1, test_pool());
        let start = Instant::now();
        workers.flush(Duration::from_secs(5));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let messages = test_pool();
        let workers = WorkerPool::new(1, Arc::clone(&messages));

        workers.shutdown(true, Duration::from_secs(5));
        assert!(!workers.is_running());
        workers.shutdown(true, Duration::from_secs(5));
        assert!(!workers.is_running());
    }

    #[test]
    fn test_enqueue_after_shutdown_releases_record() {
        let messages = test_pool();
        let workers = WorkerPool::new(1, Arc::clone(&messages));
        workers.shutdown(false, Duration::from_secs(5));

        let msg = messages.acquire().unwrap();
        workers.enqueue(msg, 4);

        // SAFETY: reading state after release
        assert_eq!(
            unsafe { msg.as_ref() }.state(),
            MessageState::Pooled
        );
        assert_eq!(messages.size(), 0);
    }

    #[test]
    fn test_resize_grow_and_shrink() {
        let messages = test_pool();
        let workers = WorkerPool::new(2, Arc::clone(&messages));

        assert!(workers.resize(4));
        assert_eq!(workers.thread_count(), 4);

        assert!(workers.resize(1));
        assert_eq!(workers.thread_count(), 1);

        // Still operational after shrinking
        let msg = messages.acquire().unwrap();
        workers.enqueue(msg, 2);
        workers.flush(Duration::from_secs(5));
        assert_eq!(messages.size(), 0);

        assert!(workers.resize(0));
        assert_eq!(workers.thread_count(), 1);
    }

    #[test]
    fn test_resize_rejected_after_shutdown() {
        let workers = WorkerPool::new(1, test_pool());
        workers.shutdown(false, Duration::from_secs(5));
        assert!(!workers.resize(4));
    }

    #[test]
    fn test_concurrent_producers_all_records_finalized() {
        let messages = test_pool();
        let workers = Arc::new(WorkerPool::new(2, Arc::clone(&messages)));

        let mut producers = vec![];
        for _ in 0..4 {
            let messages = Arc::clone(&messages);
            let workers = Arc::clone(&workers);
            producers.push(thread::spawn(move || {
                for _ in 0..250 {
                    let msg = loop {
                        match messages.acquire() {
                            Some(msg) => break msg,
                            None => thread::yield_now(),
                        }
                    };
                    workers.enqueue(msg, 2);
                }
            }));
        }
        for producer in producers {
            producer.join().unwrap();
        }

        workers.flush(Duration::from_secs(10));
        workers.shutdown(true, Duration::from_secs(10));
        assert_eq!(messages.size(), 0);
    }
}
