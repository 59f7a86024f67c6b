use crossbeam_channel::unbounded;
use futures::executor::block_on;
use promise_chain::{all, join, ContextId, Error, ManualScheduler, Producer, Promise, Runtime, Task, Timer};
use std::future::IntoFuture;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

// Initialize logger for this integration test binary so `RUST_LOG` is honored.
#[ctor::ctor]
fn __init_test_logger() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default()).is_test(true).try_init();
}

#[test]
fn test_handler_runs_on_registering_thread() {
    let (op, p) = Producer::<i32>::new();
    let here = ContextId::current();
    let ran_on = Arc::new(Mutex::new(None));
    let slot = ran_on.clone();
    let next = p.then(move |v| {
        *slot.lock().unwrap() = Some(ContextId::current());
        v * 2
    });
    let settler = thread::spawn(move || op.resolve(21));
    assert_eq!(next.wait().unwrap(), 42);
    settler.join().expect("The settler thread has panicked");
    assert_eq!(*ran_on.lock().unwrap(), Some(here));
}

#[test]
fn test_worker_threads_chain_and_wait() {
    let (op, source) = Producer::<u32>::new();
    let workers: Vec<_> = (1..=4)
        .map(|n| {
            let source = source.clone();
            thread::spawn(move || {
                let here = ContextId::current();
                source
                    .then(move |v| {
                        assert_eq!(ContextId::current(), here);
                        v * n
                    })
                    .wait()
                    .unwrap()
            })
        })
        .collect();
    thread::sleep(Duration::from_millis(20));
    op.resolve(10);
    let results: Vec<u32> = workers
        .into_iter()
        .map(|w| w.join().expect("The worker thread has panicked"))
        .collect();
    assert_eq!(results, vec![10, 20, 30, 40]);
}

#[test]
fn test_handlers_of_exited_thread_are_dropped() {
    let (op, source) = Producer::<i32>::new();
    let orphan = thread::spawn(move || source.then(|v| v + 1))
        .join()
        .expect("The registering thread has panicked");
    op.resolve(1);
    assert_eq!(orphan.wait().unwrap_err().downcast::<Error>(), Some(Error::ProducerDropped));
}

#[test]
fn test_queued_handlers_of_exited_thread_are_dropped() {
    let (op, source) = Producer::<i32>::new();
    let (next_tx, next_rx) = unbounded();
    let (exit_tx, exit_rx) = unbounded::<()>();
    let worker = thread::spawn(move || {
        next_tx.send(source.then(|v| v + 1)).unwrap();
        // Alive while the handler is queued, gone before anyone pumps it.
        exit_rx.recv().unwrap();
    });
    let next = next_rx.recv().unwrap();
    op.resolve(1);
    exit_tx.send(()).unwrap();
    worker.join().expect("The worker thread has panicked");

    let outcome = next.timeout(Duration::from_millis(300)).wait();
    assert_eq!(outcome.unwrap_err().downcast::<Error>(), Some(Error::ProducerDropped));
}

#[test]
fn test_await_from_several_threads() {
    let (op, p) = Producer::<String>::new();
    let waiters: Vec<_> = (0..3)
        .map(|_| {
            let p = p.clone();
            thread::spawn(move || block_on(p.then(|s| s.len()).into_future()).unwrap())
        })
        .collect();
    op.resolve(String::from("hello"));
    for waiter in waiters {
        assert_eq!(waiter.join().expect("The waiter thread has panicked"), 5);
    }
}

#[test]
fn test_manual_scheduler_drives_everything() {
    let scheduler = Arc::new(ManualScheduler::new());
    let runtime = Runtime::builder().scheduler(scheduler.clone()).build();
    let _guard = runtime.enter();

    let p = Promise::resolve(1).then(|v| v + 1).and_then(|v| Promise::resolve(v * 10));
    assert!(p.is_pending());
    assert!(scheduler.run_one());
    assert!(p.is_pending());
    scheduler.run_all();
    assert_eq!(p.outcome().unwrap().unwrap(), 20);
    assert!(scheduler.is_empty());
}

#[test]
fn test_downstream_inherits_runtime_of_source() {
    let scheduler = Arc::new(ManualScheduler::new());
    let runtime = Runtime::builder().scheduler(scheduler.clone()).build();
    let source = {
        let _guard = runtime.enter();
        Promise::resolve(3)
    };
    // Registered outside the guard, still queued on the source's scheduler.
    let next = source.then(|v| v * 3);
    assert_eq!(scheduler.len(), 1);
    scheduler.run_all();
    assert_eq!(next.outcome().unwrap().unwrap(), 9);
}

#[test]
fn test_combinators_inherit_runtime_of_inputs() {
    let scheduler = Arc::new(ManualScheduler::new());
    let runtime = Runtime::builder().scheduler(scheduler.clone()).build();
    let (number, word, numbers) = {
        let _guard = runtime.enter();
        (
            Promise::resolve(1),
            Promise::resolve(String::from("a")),
            Promise::resolve(vec![1, 2, 3]),
        )
    };

    // Everything below is created outside the guard.
    let limit = Duration::from_millis(200);
    assert_eq!(all(vec![number.clone()]).timeout(limit).wait().unwrap(), vec![1]);
    assert_eq!(
        join((number, word)).timeout(limit).wait().unwrap(),
        (1, String::from("a"))
    );
    let folded = numbers
        .map(|v, _| Ok::<_, String>(v * 10))
        .filter(|v, _| Ok::<_, String>(*v > 10))
        .each(|_, _| ())
        .map_values(|v, i| v + i as i32)
        .reduce(|acc, v, _| Ok::<_, String>(acc + v), 0);
    assert_eq!(folded.timeout(limit).wait().unwrap(), 20 + 31);
    assert!(scheduler.is_empty());
}

#[test]
fn test_resolver_panic_escapes_without_catching() {
    let runtime = Runtime::builder().catch_panics(false).build();
    let _guard = runtime.enter();
    let escaped = std::panic::catch_unwind(|| Promise::<i32>::new(|_, _| panic!("boom")));
    assert!(escaped.is_err());
}

/// Runs timer tasks immediately, whatever the delay.
struct ImmediateTimer {
    requested: Mutex<Vec<Duration>>,
}

impl Timer for ImmediateTimer {
    fn schedule_after(&self, delay: Duration, task: Task) {
        self.requested.lock().unwrap().push(delay);
        task();
    }
}

#[test]
fn test_custom_timer_is_used_by_delay_and_timeout() {
    let timer = Arc::new(ImmediateTimer {
        requested: Mutex::new(Vec::new()),
    });
    let runtime = Runtime::builder()
        .timer(timer.clone())
        .wait_slice(Duration::from_millis(1))
        .build();
    let _guard = runtime.enter();

    let start = Instant::now();
    let delayed = Promise::resolve(5).delay(Duration::from_secs(3600));
    assert_eq!(delayed.wait().unwrap(), 5);
    assert!(start.elapsed() < Duration::from_secs(60));

    let (_op, never) = Producer::<i32>::new();
    let timed_out = never.timeout(Duration::from_secs(3600));
    assert_eq!(timed_out.wait().unwrap_err().downcast::<Error>(), Some(Error::Timeout));

    assert_eq!(
        *timer.requested.lock().unwrap(),
        vec![Duration::from_secs(3600), Duration::from_secs(3600)]
    );
}
