//! Optional worker pool for moving non-tick-critical work off the
//! simulation thread.
//!
//! When enabled, tasks go to a bounded queue drained by worker threads; a
//! full queue makes the submitting thread run the task itself instead of
//! blocking or dropping it. When disabled, every submission runs
//! synchronously on the caller. Enable/disable transitions are serialized.

use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::{Mutex, RwLock};
use tracing::info;

use crate::config::OffloadConfig;

type Task = Box<dyn FnOnce() + Send + 'static>;

/// Poll interval while waiting out the shutdown grace period.
const DRAIN_POLL: Duration = Duration::from_millis(10);

#[derive(Debug, Default)]
struct Counters {
    submitted: AtomicU64,
    completed: AtomicU64,
    caller_ran: AtomicU64,
}

/// Delayed task ordered by due time for the scheduler heap.
struct ScheduledTask {
    due: Instant,
    seq: u64,
    task: Task,
}

impl PartialEq for ScheduledTask {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for ScheduledTask {}

impl PartialOrd for ScheduledTask {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledTask {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // BinaryHeap is a max-heap; invert so the earliest due time wins
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct WorkerPool {
    sender: Sender<Task>,
    schedule_sender: Sender<ScheduledTask>,
    workers: Vec<JoinHandle<()>>,
    scheduler: Option<JoinHandle<()>>,
    force_stop: Arc<AtomicBool>,
    thread_count: usize,
}

/// Worker pool that can be switched on and off at runtime.
pub struct TaskOffloader {
    queue_capacity: usize,
    shutdown_grace: Duration,
    /// Held for the whole duration of enable/disable so transitions never
    /// overlap.
    transition: Mutex<()>,
    pool: RwLock<Option<WorkerPool>>,
    counters: Arc<Counters>,
    schedule_seq: AtomicU64,
}

impl TaskOffloader {
    pub fn new(config: &OffloadConfig) -> Self {
        let offloader = Self {
            queue_capacity: config.queue_capacity,
            shutdown_grace: Duration::from_secs(config.shutdown_grace_secs),
            transition: Mutex::new(()),
            pool: RwLock::new(None),
            counters: Arc::new(Counters::default()),
            schedule_seq: AtomicU64::new(0),
        };
        if config.enabled {
            offloader.enable(config.threads);
        }
        offloader
    }

    /// Spin up the worker pool. No-op when already enabled.
    ///
    /// `threads == 0` means one worker per available CPU core.
    pub fn enable(&self, threads: usize) {
        let _transition = self.transition.lock();
        if self.pool.read().is_some() {
            return;
        }

        let thread_count = if threads > 0 {
            threads
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        };

        let (sender, receiver) = bounded::<Task>(self.queue_capacity);
        let force_stop = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(thread_count);
        for index in 0..thread_count {
            let receiver: Receiver<Task> = receiver.clone();
            let force_stop = force_stop.clone();
            let counters = self.counters.clone();
            let handle = std::thread::Builder::new()
                .name(format!("tickshed-worker-{index}"))
                .spawn(move || {
                    while let Ok(task) = receiver.recv() {
                        if !force_stop.load(Ordering::Relaxed) {
                            task();
                        }
                        counters.completed.fetch_add(1, Ordering::Relaxed);
                    }
                })
                .expect("failed to spawn worker thread");
            workers.push(handle);
        }

        let (schedule_sender, schedule_receiver) = bounded::<ScheduledTask>(self.queue_capacity);
        let scheduler = {
            let worker_sender = sender.clone();
            let counters = self.counters.clone();
            std::thread::Builder::new()
                .name("tickshed-scheduler".to_string())
                .spawn(move || run_scheduler(schedule_receiver, worker_sender, counters))
                .expect("failed to spawn scheduler thread")
        };

        *self.pool.write() = Some(WorkerPool {
            sender,
            schedule_sender,
            workers,
            scheduler: Some(scheduler),
            force_stop,
            thread_count,
        });

        info!("task offloading enabled with {} threads", thread_count);
    }

    /// Shut the pool down: stop accepting work, give in-flight and queued
    /// tasks the grace period, then discard whatever is still queued.
    pub fn disable(&self) {
        let _transition = self.transition.lock();
        let Some(mut pool) = self.pool.write().take() else {
            return;
        };

        // Closing the channels lets workers drain the queue and exit
        drop(pool.sender);
        drop(pool.schedule_sender);

        let deadline = Instant::now() + self.shutdown_grace;
        loop {
            let all_done = pool.workers.iter().all(|w| w.is_finished())
                && pool.scheduler.as_ref().map_or(true, |s| s.is_finished());
            if all_done {
                break;
            }
            if Instant::now() >= deadline {
                // Grace expired: remaining queued tasks are skipped, not run
                pool.force_stop.store(true, Ordering::Relaxed);
                break;
            }
            std::thread::sleep(DRAIN_POLL);
        }

        for worker in pool.workers.drain(..) {
            let _ = worker.join();
        }
        if let Some(scheduler) = pool.scheduler.take() {
            let _ = scheduler.join();
        }

        info!("task offloading disabled");
    }

    pub fn is_enabled(&self) -> bool {
        self.pool.read().is_some()
    }

    /// Run `task` on a worker, or on the calling thread when the pool is
    /// disabled or its queue is full.
    pub fn submit(&self, task: impl FnOnce() + Send + 'static) {
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);

        let sender = self.pool.read().as_ref().map(|p| p.sender.clone());
        match sender {
            Some(sender) => match sender.try_send(Box::new(task)) {
                Ok(()) => {}
                Err(TrySendError::Full(task)) | Err(TrySendError::Disconnected(task)) => {
                    self.counters.caller_ran.fetch_add(1, Ordering::Relaxed);
                    task();
                    self.counters.completed.fetch_add(1, Ordering::Relaxed);
                }
            },
            None => {
                task();
                self.counters.completed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Like [`submit`](Self::submit), delivering the task's result through
    /// a channel. Synchronous fallbacks complete before this returns.
    pub fn submit_with_result<R: Send + 'static>(
        &self,
        task: impl FnOnce() -> R + Send + 'static,
    ) -> Receiver<R> {
        let (tx, rx) = bounded(1);
        self.submit(move || {
            let _ = tx.send(task());
        });
        rx
    }

    /// Run `task` after `delay`. When the pool is disabled the task runs
    /// immediately on the calling thread instead of being delayed.
    pub fn schedule(&self, delay: Duration, task: impl FnOnce() + Send + 'static) {
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);

        let sender = self.pool.read().as_ref().map(|p| p.schedule_sender.clone());
        let entry = ScheduledTask {
            due: Instant::now() + delay,
            seq: self.schedule_seq.fetch_add(1, Ordering::Relaxed),
            task: Box::new(task),
        };
        match sender {
            Some(sender) => {
                if let Err(err) = sender.try_send(entry) {
                    let entry = match err {
                        TrySendError::Full(entry) | TrySendError::Disconnected(entry) => entry,
                    };
                    self.counters.caller_ran.fetch_add(1, Ordering::Relaxed);
                    (entry.task)();
                    self.counters.completed.fetch_add(1, Ordering::Relaxed);
                }
            }
            None => {
                (entry.task)();
                self.counters.completed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn thread_count(&self) -> usize {
        self.pool.read().as_ref().map_or(0, |p| p.thread_count)
    }

    pub fn total_submitted(&self) -> u64 {
        self.counters.submitted.load(Ordering::Relaxed)
    }

    pub fn total_completed(&self) -> u64 {
        self.counters.completed.load(Ordering::Relaxed)
    }

    /// Tasks that overflowed onto their submitting thread.
    pub fn total_caller_ran(&self) -> u64 {
        self.counters.caller_ran.load(Ordering::Relaxed)
    }

    pub fn active_tasks(&self) -> u64 {
        self.total_submitted()
            .saturating_sub(self.total_completed())
    }

    /// One-line status for logs.
    pub fn status(&self) -> String {
        if let Some(pool) = self.pool.read().as_ref() {
            format!(
                "enabled ({} threads, {} active, {} completed)",
                pool.thread_count,
                self.active_tasks(),
                self.total_completed()
            )
        } else {
            "disabled".to_string()
        }
    }
}

impl Drop for TaskOffloader {
    fn drop(&mut self) {
        self.disable();
    }
}

fn run_scheduler(
    receiver: Receiver<ScheduledTask>,
    worker_sender: Sender<Task>,
    counters: Arc<Counters>,
) {
    let mut heap: BinaryHeap<ScheduledTask> = BinaryHeap::new();
    loop {
        let timeout = heap
            .peek()
            .map(|entry| entry.due.saturating_duration_since(Instant::now()))
            .unwrap_or(Duration::from_millis(250));

        match receiver.recv_timeout(timeout) {
            Ok(entry) => heap.push(entry),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        while heap
            .peek()
            .is_some_and(|entry| entry.due <= Instant::now())
        {
            let entry = heap.pop().expect("peeked entry");
            match worker_sender.try_send(entry.task) {
                Ok(()) => {}
                Err(TrySendError::Full(task)) | Err(TrySendError::Disconnected(task)) => {
                    // The scheduler is the submitter here, so it runs over-
                    // flow work itself like any other caller
                    counters.caller_ran.fetch_add(1, Ordering::Relaxed);
                    task();
                    counters.completed.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }
    // Anything still on the heap is discarded with the pool
}
