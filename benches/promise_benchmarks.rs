use criterion::{criterion_group, criterion_main, Criterion};
use promise_chain::{all, join, reduce, ManualScheduler, Producer, Promise, Runtime};
use std::hint::black_box;
use std::sync::Arc;

// cargo bench --profile dev

// Initialize logger for benchmark so `RUST_LOG` is honored.
#[ctor::ctor]
fn __init_bench_logger() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default()).try_init();
}

fn benchmark_promise_operations(c: &mut Criterion) {
    // Resolve and wait, through the default event loop
    c.bench_function("promise_basic_resolution", |b| {
        b.iter(|| {
            let p = Promise::resolve(black_box(42)).then(|v| v * 2);
            black_box(p.wait().unwrap());
        })
    });

    c.bench_function("promise_chaining", |b| {
        b.iter(|| {
            let p = Promise::resolve(black_box(1))
                .then(|x| x + 1)
                .then(|x| x * 2)
                .then(|x| x - 3)
                .then(|x| x / 2);
            black_box(p.wait().unwrap());
        })
    });

    c.bench_function("promise_rejection_catch", |b| {
        b.iter(|| {
            let p = Promise::<String>::reject(String::from("error")).fail(|e: String| format!("caught: {e}"));
            black_box(p.wait().unwrap());
        })
    });

    c.bench_function("promise_all_multiple", |b| {
        b.iter(|| {
            let promises: Vec<Promise<usize>> = (0..16).map(Promise::resolve).collect();
            black_box(all(promises).wait().unwrap());
        })
    });

    c.bench_function("promise_join_spread", |b| {
        b.iter(|| {
            let p = join((Promise::resolve(1_u8), Promise::resolve(String::from("a")), Promise::resolve(2.5_f64)))
                .spread(|a, s, f| s.len() + a as usize + f as usize);
            black_box(p.wait().unwrap());
        })
    });

    c.bench_function("promise_reduce_sequential", |b| {
        b.iter(|| {
            let p = reduce(0..32, |acc: u64, v: u64, _| Promise::resolve(acc + v), 0);
            black_box(p.wait().unwrap());
        })
    });

    c.bench_function("promise_cross_thread_settlement", |b| {
        b.iter(|| {
            let (op, p) = Producer::<u64>::new();
            let settler = std::thread::spawn(move || op.resolve(7));
            black_box(p.then(|v| v + 1).wait().unwrap());
            settler.join().expect("The settler thread has panicked");
        })
    });

    // Dispatch overhead alone, without any thread or channel in the way
    let scheduler = Arc::new(ManualScheduler::new());
    let runtime = Runtime::builder().scheduler(scheduler.clone()).build();
    c.bench_function("promise_manual_dispatch", |b| {
        let _guard = runtime.enter();
        b.iter(|| {
            let p = Promise::resolve(black_box(3)).then(|v| v + 1).finally(|| ());
            scheduler.run_all();
            black_box(p.outcome());
        })
    });
}

criterion_group!(benches, benchmark_promise_operations);
criterion_main!(benches);
