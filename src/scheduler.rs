//! Deferred execution.
//!
//! The promise core never runs a callback inline: it hands every callback to
//! a [`Scheduler`] together with the [`ContextId`] that registered it.
use crate::context::{self, ContextId};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::task::Waker;
use std::thread;
use std::time::Duration;

/// A unit of deferred work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// The one service the promise core needs from its host.
pub trait Scheduler: Send + Sync {
    /// Queues `task` to run once, later, on `context`.
    ///
    /// If `context` no longer exists the task may be dropped.
    fn schedule(&self, context: ContextId, task: Task);

    /// Runs work queued for `context` from the calling thread, blocking up to
    /// `timeout` for the first task. Returns the number of tasks run.
    ///
    /// Schedulers that run tasks on their own threads keep the default,
    /// which only sleeps.
    fn pump(&self, context: ContextId, timeout: Duration) -> usize {
        let _ = context;
        thread::sleep(timeout);
        0
    }

    /// Wakes `waker` the next time a task is queued for `context`.
    fn watch(&self, context: ContextId, waker: Waker) {
        let _ = (context, waker);
    }
}

struct Queue {
    sender: Sender<Task>,
    receiver: Receiver<Task>,
    watchers: Mutex<Vec<Waker>>,
}

impl Queue {
    fn new() -> Self {
        let (sender, receiver) = unbounded();
        Queue {
            sender,
            receiver,
            watchers: Mutex::new(Vec::new()),
        }
    }
}

/// Default scheduler: one FIFO queue per context, drained by whoever pumps
/// that context (usually `Promise::wait` or an `.await`).
///
/// Queues of exited threads are swept on the next `schedule`, `pump` or
/// `watch`, and the tasks still in them are dropped unrun.
#[derive(Default)]
pub struct EventLoop {
    queues: Mutex<HashMap<ContextId, Arc<Queue>>>,
    // `context::retirements()` as of the last sweep
    swept: AtomicU64,
}

impl EventLoop {
    pub fn new() -> Self {
        Self::default()
    }

    fn queue(&self, context: ContextId) -> Option<Arc<Queue>> {
        let (queue, retired) = {
            let mut queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
            let retired = self.sweep(&mut queues);
            let queue = context
                .is_alive()
                .then(|| queues.entry(context).or_insert_with(|| Arc::new(Queue::new())).clone());
            (queue, retired)
        };
        // Dropping a task may settle a promise, which schedules again, so
        // this happens with the map unlocked.
        for (context, queue) in retired {
            let dropped = queue.receiver.try_iter().count();
            if dropped > 0 {
                log::debug!("dropped {} task(s) of retired context {}", dropped, context);
            }
        }
        queue
    }

    fn sweep(&self, queues: &mut HashMap<ContextId, Arc<Queue>>) -> Vec<(ContextId, Arc<Queue>)> {
        let retirements = context::retirements();
        if self.swept.swap(retirements, Ordering::SeqCst) == retirements {
            return Vec::new();
        }
        let dead: Vec<ContextId> = queues.keys().copied().filter(|context| !context.is_alive()).collect();
        dead.into_iter()
            .filter_map(|context| queues.remove(&context).map(|queue| (context, queue)))
            .collect()
    }

    /// Number of tasks waiting for `context`.
    pub fn pending(&self, context: ContextId) -> usize {
        self.queues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&context)
            .map_or(0, |queue| queue.receiver.len())
    }

    /// Runs every task already queued for the calling thread.
    pub fn run_pending(&self) -> usize {
        self.pump(ContextId::current(), Duration::ZERO)
    }
}

impl Scheduler for EventLoop {
    fn schedule(&self, context: ContextId, task: Task) {
        let Some(queue) = self.queue(context) else {
            log::debug!("dropping task for retired context {}", context);
            return;
        };
        if queue.sender.send(task).is_err() {
            log::debug!("dropping task for closed context {}", context);
            return;
        }
        let watchers = std::mem::take(&mut *queue.watchers.lock().unwrap_or_else(PoisonError::into_inner));
        for waker in watchers {
            waker.wake();
        }
    }

    fn pump(&self, context: ContextId, timeout: Duration) -> usize {
        let Some(queue) = self.queue(context) else {
            return 0;
        };
        let mut ran = 0;
        if !timeout.is_zero() {
            match queue.receiver.recv_timeout(timeout) {
                Ok(task) => {
                    task();
                    ran += 1;
                }
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => return 0,
            }
        }
        // Only what is queued right now; tasks queued by these tasks wait for
        // the next pump.
        for _ in 0..queue.receiver.len() {
            match queue.receiver.try_recv() {
                Ok(task) => {
                    task();
                    ran += 1;
                }
                Err(_) => break,
            }
        }
        log::trace!("pumped {} task(s) on {}", ran, context);
        ran
    }

    fn watch(&self, context: ContextId, waker: Waker) {
        if let Some(queue) = self.queue(context) {
            queue
                .watchers
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(waker.clone());
            // A task sent before the push above would not have seen the waker.
            if !queue.receiver.is_empty() {
                waker.wake();
            }
        }
    }
}

/// A single FIFO shared by every context, drained explicitly by the test
/// driver. Contexts are recorded but not honoured.
#[derive(Default)]
pub struct ManualScheduler {
    queue: Mutex<VecDeque<(ContextId, Task)>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs the oldest task. Returns false when the queue is empty.
    pub fn run_one(&self) -> bool {
        let next = self.queue.lock().unwrap_or_else(PoisonError::into_inner).pop_front();
        match next {
            Some((_, task)) => {
                task();
                true
            }
            None => false,
        }
    }

    /// Runs tasks until the queue is empty, including the ones queued along
    /// the way.
    pub fn run_all(&self) -> usize {
        let mut ran = 0;
        while self.run_one() {
            ran += 1;
        }
        ran
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, context: ContextId, task: Task) {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back((context, task));
    }

    fn pump(&self, _context: ContextId, _timeout: Duration) -> usize {
        self.run_all()
    }
}
