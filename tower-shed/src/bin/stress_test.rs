use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::Instant;

use hdrhistogram::Histogram;
use rand::Rng;
use shed_limit::AdaptiveShedder;
use shed_limit::AdmissionStat;
use shed_limit::NopShedder;
use shed_limit::Shedder;
use shed_limit::ShedderConfig;
use tokio::sync::Barrier;
use tokio::task::JoinSet;
use tokio::time::sleep;
use tower::BoxError;
use tower::Layer;
use tower::Service;
use tower::ServiceExt;
use tower::service_fn;
use tower_shed::AdaptiveShedLayer;
use tower_shed::ManagedShedLayer;
use tower_shed::ShedError;
use tracing_subscriber::EnvFilter;

// Requests the simulated host can serve before its CPU saturates
const CAPACITY: u64 = 2_000;

/// A host whose CPU load grows with the number of requests it is working on.
#[derive(Clone, Default)]
struct SimulatedHost {
    in_flight: Arc<AtomicU64>,
}

impl SimulatedHost {
    fn cpu_usage(&self) -> Option<u64> {
        let in_flight = self.in_flight.load(Ordering::Relaxed);
        Some((in_flight * 1000 / CAPACITY).min(1000))
    }

    async fn handle(self, _req: ()) -> Result<&'static str, BoxError> {
        let in_flight = self.in_flight.fetch_add(1, Ordering::Relaxed) + 1;
        // Work slows down as the host gets busier
        let jitter = rand::rng().random_range(0..50);
        let latency = 50 + in_flight * 200 / CAPACITY + jitter;
        sleep(Duration::from_millis(latency)).await;
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
        Ok("success")
    }
}

#[derive(Default)]
struct RejectionCounter {
    timeouts: usize,
    sheds: usize,
    inner: usize,
    unknown: usize,
}

async fn run_load_test<S>(name: &str, svc: S, total_reqs: usize)
where
    S: Service<(), Response = &'static str, Error = BoxError> + Clone + Send + 'static,
    S::Future: Send,
{
    let mut hist_elapsed = Histogram::<u64>::new_with_bounds(1, 60_000_000, 3).unwrap();

    let mut tasks = JoinSet::new();
    let mut rejections = RejectionCounter::default();

    let start = Instant::now();

    let barrier = Arc::new(Barrier::new(total_reqs));

    for _ in 0..total_reqs {
        let mut local_svc = svc.clone();
        let bar = barrier.clone();
        tasks.spawn(async move {
            bar.wait().await;
            let req_start = Instant::now();
            let res = match local_svc.ready().await {
                Ok(ready_svc) => ready_svc.call(()).await,
                Err(e) => Err(e),
            };
            (res, req_start.elapsed())
        });
    }

    let mut success_count = 0;

    while let Some(task) = tasks.join_next().await {
        let (res, elapsed) = task.expect("Task panicked");
        match res {
            Ok(_) => {
                success_count += 1;
                hist_elapsed.record(elapsed.as_micros() as u64).unwrap();
            }
            Err(e) => match e.downcast_ref::<ShedError>() {
                Some(ShedError::Timeout) => rejections.timeouts += 1,
                Some(ShedError::Overloaded) => rejections.sheds += 1,
                Some(ShedError::Inner(_)) => rejections.inner += 1,
                None => rejections.unknown += 1,
            },
        }
    }

    let total_duration = start.elapsed();
    let throughput = total_reqs as f64 / total_duration.as_secs_f64();
    let goodput = success_count as f64 / total_duration.as_secs_f64();

    println!("--- {} ---", name);
    println!("Total Duration:  {:.2?}", total_duration);
    println!("Success/Total:   {}/{}", success_count, total_reqs);
    println!("Total Rate:      {:.2} req/sec", throughput);
    println!("Success Rate:    {:.2} req/sec (Goodput)", goodput);

    if success_count > 0 {
        println!("P50 (Elapsed):   {}µs", hist_elapsed.value_at_quantile(0.5));
        println!(
            "P99 (Elapsed):   {}µs",
            hist_elapsed.value_at_quantile(0.99)
        );
    }

    let total_errors =
        rejections.timeouts + rejections.sheds + rejections.inner + rejections.unknown;
    println!("Errors:          {}", total_errors);
    if total_errors > 0 {
        println!("  └─ Timeouts:   {}", rejections.timeouts);
        println!("  └─ LoadSheds:  {}", rejections.sheds);
        if rejections.inner > 0 {
            println!("  └─ Inner:      {}", rejections.inner);
        }
        if rejections.unknown > 0 {
            println!("  └─ Unknown:    {}", rejections.unknown);
        }
    }
    println!();
}

fn adaptive_shedder(name: &str, host: &SimulatedHost) -> Result<Arc<dyn Shedder>, BoxError> {
    let host = host.clone();
    let config = ShedderConfig::default()
        .with_name(name)
        .with_window(Duration::from_secs(5), 50)
        .with_cpu_threshold(900)
        .with_cpu_sampler(move || host.cpu_usage());
    Ok(Arc::new(AdaptiveShedder::new(config)?))
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let timeout = Duration::from_millis(550);
    let total_reqs = 10_000;

    // 1. Unprotected baseline
    let host = SimulatedHost::default();
    let shedder: Arc<dyn Shedder> = Arc::new(NopShedder);
    let svc = AdaptiveShedLayer::new(shedder).layer(service_fn({
        let host = host.clone();
        move |req| host.clone().handle(req)
    }));
    run_load_test("Raw Nop", svc, total_reqs).await;

    // 2. Raw adaptive shedding
    let host = SimulatedHost::default();
    let shedder = adaptive_shedder("raw", &host)?;
    let svc = AdaptiveShedLayer::new(shedder).layer(service_fn({
        let host = host.clone();
        move |req| host.clone().handle(req)
    }));
    run_load_test("Raw Adaptive", svc, total_reqs).await;

    // 3. Managed adaptive shedding, with periodic statistics
    let host = SimulatedHost::default();
    let shedder = adaptive_shedder("managed", &host)?;
    let stat = Arc::new(
        AdmissionStat::new("managed")
            .with_interval(Duration::from_secs(1))
            .with_logging(true),
    );
    let reporter = stat.spawn_reporter();
    let svc = ManagedShedLayer::new(shedder, timeout)
        .with_stat(Arc::clone(&stat))
        .layer(service_fn({
            let host = host.clone();
            move |req| host.clone().handle(req)
        }));
    run_load_test("Managed Adaptive", svc, total_reqs).await;
    reporter.abort();

    Ok(())
}
