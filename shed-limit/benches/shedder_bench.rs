use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::Barrier;
use std::thread;
use std::time::Duration;
use std::time::Instant;

use criterion::BenchmarkId;
use criterion::Criterion;
use criterion::black_box;
use criterion::criterion_group;
use criterion::criterion_main;

use shed_limit::AdaptiveShedder;
use shed_limit::BucketedWindow;
use shed_limit::NopShedder;
use shed_limit::Shedder;
use shed_limit::ShedderConfig;

fn admit_and_pass<S: Shedder + ?Sized>(shedder: &S) {
    if let Ok(promise) = shedder.allow() {
        promise.pass();
    }
}

fn bench_single_shedder<S: Shedder + ?Sized>(group_name: &str, c: &mut Criterion, shedder: Arc<S>) {
    let mut group = c.benchmark_group(group_name);

    group.bench_function("single-threaded", |b| {
        b.iter(|| admit_and_pass(black_box(shedder.as_ref())))
    });

    group.finish();
}

fn bench_parallel_shedder<S: Shedder + ?Sized + 'static>(
    group_name: &str,
    c: &mut Criterion,
    shedder: Arc<S>,
) {
    let mut group = c.benchmark_group(group_name);

    for threads in [2, 4, 8].iter() {
        let num_threads = *threads;
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}-threads", num_threads)),
            &num_threads,
            |b, &n| {
                b.iter_custom(|iters| {
                    let barrier = Arc::new(Barrier::new(n + 1));
                    let mut handles = Vec::with_capacity(n);

                    for _ in 0..n {
                        let s = Arc::clone(&shedder);
                        let bar = Arc::clone(&barrier);
                        let iters_per_thread = iters / n as u64;

                        handles.push(thread::spawn(move || {
                            bar.wait(); // Wait for the start signal
                            for _ in 0..iters_per_thread {
                                admit_and_pass(black_box(s.as_ref()));
                            }
                        }));
                    }

                    // Synchronize the start across all threads
                    barrier.wait();
                    let start = Instant::now();

                    for handle in handles {
                        let _ = handle.join();
                    }

                    start.elapsed()
                });
            },
        );
    }
    group.finish();
}

fn bench_window(c: &mut Criterion) {
    let window = BucketedWindow::new(
        NonZeroUsize::new(50).unwrap(),
        Duration::from_millis(100),
        true,
    );
    let mut group = c.benchmark_group("BucketedWindow");

    group.bench_function("add", |b| b.iter(|| window.add(black_box(1.0))));
    group.bench_function("reduce", |b| {
        b.iter(|| {
            let mut max = 0.0_f64;
            window.reduce(|bucket| max = max.max(bucket.sum()));
            black_box(max)
        })
    });

    group.finish();
}

fn run_all_benches(c: &mut Criterion) {
    // Calm: the early exit, no window access
    let calm = Arc::new(
        AdaptiveShedder::new(ShedderConfig::default().with_cpu_sampler(|| -> Option<u64> {
            Some(100)
        }))
        .unwrap(),
    );

    // Hot: every decision reads both windows
    let hot = Arc::new(
        AdaptiveShedder::new(ShedderConfig::default().with_cpu_sampler(|| -> Option<u64> {
            Some(1000)
        }))
        .unwrap(),
    );

    let nop = Arc::new(NopShedder);

    bench_single_shedder("Adaptive-Calm", c, Arc::clone(&calm));
    bench_parallel_shedder("Adaptive-Calm", c, calm);

    bench_single_shedder("Adaptive-Hot", c, Arc::clone(&hot));
    bench_parallel_shedder("Adaptive-Hot", c, hot.clone());

    bench_single_shedder("Nop", c, Arc::clone(&nop));

    // The overhead of Arc<dyn Shedder>
    let dynamic: Arc<dyn Shedder> = hot;
    bench_single_shedder("Dynamic-Adaptive-Hot", c, dynamic);

    bench_window(c);
}

criterion_group!(benches, run_all_benches);
criterion_main!(benches);
