//! Timer service used by `delay` and `timeout`.
use crate::scheduler::Task;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Mutex, OnceLock, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

pub trait Timer: Send + Sync {
    /// Runs `task` once `delay` has elapsed. The task may run on any thread
    /// and must not block.
    fn schedule_after(&self, delay: Duration, task: Task);
}

// Stands in for deadlines `Instant` cannot represent; such timers never fire.
const FAR_FUTURE: Duration = Duration::from_secs(60 * 60 * 24 * 365 * 30);

enum TimerCommand {
    Schedule { id: u64, when: Instant, task: Task },
}

/// Default timer: one lazily spawned thread keeping a min-heap of deadlines.
pub struct TimerThread {
    name: String,
    commands: OnceLock<Sender<TimerCommand>>,
    next_id: Mutex<u64>,
}

impl TimerThread {
    pub fn new() -> Self {
        Self::named("promise-timer")
    }

    pub fn named(name: impl Into<String>) -> Self {
        TimerThread {
            name: name.into(),
            commands: OnceLock::new(),
            next_id: Mutex::new(0),
        }
    }

    fn commands(&self) -> &Sender<TimerCommand> {
        self.commands.get_or_init(|| {
            let (cmd_tx, cmd_rx) = unbounded::<TimerCommand>();
            let spawned = thread::Builder::new()
                .name(self.name.clone())
                .spawn(move || run_timer_loop(cmd_rx));
            match spawned {
                Ok(_) => log::debug!("timer thread '{}' started", self.name),
                // Every schedule then fails to send and the tasks are dropped,
                // which rejects the waiting promises as abandoned.
                Err(e) => log::warn!("failed to spawn timer thread '{}': {e}", self.name),
            }
            cmd_tx
        })
    }
}

impl Default for TimerThread {
    fn default() -> Self {
        Self::new()
    }
}

impl Timer for TimerThread {
    fn schedule_after(&self, delay: Duration, task: Task) {
        let id = {
            let mut next = self.next_id.lock().unwrap_or_else(PoisonError::into_inner);
            *next += 1;
            *next
        };
        let now = Instant::now();
        let Some(when) = now.checked_add(delay).or_else(|| now.checked_add(FAR_FUTURE)) else {
            log::warn!("timer {id} has no representable deadline, dropping it");
            return;
        };
        if let Err(e) = self.commands().send(TimerCommand::Schedule { id, when, task }) {
            log::debug!("timer thread gone, dropping timer {id}");
            drop(e);
        }
    }
}

fn run_timer_loop(cmd_rx: Receiver<TimerCommand>) {
    // min-heap of (deadline, id)
    let mut heap: BinaryHeap<Reverse<(Instant, u64)>> = BinaryHeap::new();
    let mut tasks: HashMap<u64, Task> = HashMap::new();

    loop {
        let now = Instant::now();
        while let Some(Reverse((when, id))) = heap.peek().copied() {
            if when > now {
                break;
            }
            heap.pop();
            if let Some(task) = tasks.remove(&id) {
                if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
                    log::warn!("timer task {id} panicked");
                }
            }
        }

        let command = match heap.peek() {
            Some(Reverse((when, _))) => match cmd_rx.recv_timeout(when.saturating_duration_since(Instant::now())) {
                Ok(command) => command,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            },
            // no timers scheduled: block until a command arrives
            None => match cmd_rx.recv() {
                Ok(command) => command,
                Err(_) => break,
            },
        };
        match command {
            TimerCommand::Schedule { id, when, task } => {
                heap.push(Reverse((when, id)));
                tasks.insert(id, task);
            }
        }
    }
    log::debug!("timer thread exiting with {} pending timer(s)", tasks.len());
}
