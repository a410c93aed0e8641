use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicI64;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use parking_lot::Mutex;
use quanta::Clock;
use quanta::Instant;

use crate::Alerter;
use crate::BucketedWindow;
use crate::ConfigError;
use crate::CpuSampler;
use crate::ServiceOverloaded;
use crate::Shedder;
use crate::ShedderConfig;
use crate::cpu::MAX_CPU_USAGE;

/// How long a shedder stays sensitive after dropping a request.
pub const COOL_OFF: Duration = Duration::from_secs(1);

/// Latency assumed, in milliseconds, until a request has passed.
const DEFAULT_MIN_RT: f64 = 1000.0;
const FLYING_BETA: f64 = 0.9;

/// A CPU aware, adaptive admission controller.
///
/// Requests are dropped only when the CPU is at or above the threshold (or a drop
/// happened within the last [`COOL_OFF`]) *and* both the current and the smoothed number
/// of requests in flight exceed what the service has recently proven it can sustain:
///
/// `max_flight = max_pass * buckets_per_second * min_rt / 1000`
///
/// where `max_pass` is the best number of passed requests in a bucket and `min_rt` the
/// best average response time of a bucket, in milliseconds.
///
/// Cloning is cheap and every clone shares the same state.
#[derive(Debug, Clone)]
pub struct AdaptiveShedder {
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    cpu_threshold: u64,
    buckets_per_second: f64,
    flying: AtomicI64,
    /// Moving average of `flying`, only updated when a request completes
    avg_flying: Mutex<f64>,
    /// Nanos from anchor of the last drop
    drop_time: AtomicU64,
    dropped_recently: AtomicBool,
    pass_window: BucketedWindow,
    rt_window: BucketedWindow,
    cpu_sampler: Arc<dyn CpuSampler>,
    alerter: Option<Arc<Alerter>>,
    clock: Clock,
    anchor: Instant,
}

impl fmt::Debug for Inner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdaptiveShedder")
            .field("name", &self.name)
            .field("cpu_threshold", &self.cpu_threshold)
            .field("flying", &self.flying.load(Ordering::Relaxed))
            .field("dropped_recently", &self.dropped_recently.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// A point in time view of a shedder's estimates.
#[derive(Debug, Clone, PartialEq)]
pub struct ShedderSnapshot {
    pub flying: i64,
    pub avg_flying: f64,
    pub max_pass: u64,
    /// Milliseconds
    pub min_rt: f64,
    pub max_flight: u64,
    pub hot: bool,
}

impl AdaptiveShedder {
    /// Creates a shedder from `config`.
    ///
    /// The `enabled` flag is not consulted here; use [`crate::new_shedder`] to honour it.
    pub fn new(config: ShedderConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::build(config))
    }

    // `config` must already be validated
    pub(crate) fn build(config: ShedderConfig) -> Self {
        let bucket_count = NonZeroUsize::new(config.bucket_count).unwrap_or(NonZeroUsize::MIN);
        let bucket_duration = config.bucket_duration();
        let buckets_per_second =
            Duration::from_secs(1).as_nanos() as f64 / bucket_duration.as_nanos() as f64;
        let anchor = config.clock.now();

        Self {
            inner: Arc::new(Inner {
                cpu_threshold: config.cpu_threshold,
                buckets_per_second,
                flying: AtomicI64::new(0),
                avg_flying: Mutex::new(0.0),
                drop_time: AtomicU64::new(0),
                dropped_recently: AtomicBool::new(false),
                pass_window: BucketedWindow::with_clock(
                    bucket_count,
                    bucket_duration,
                    true,
                    config.clock.clone(),
                ),
                rt_window: BucketedWindow::with_clock(
                    bucket_count,
                    bucket_duration,
                    true,
                    config.clock.clone(),
                ),
                cpu_sampler: config.cpu_sampler,
                alerter: config.alerter,
                name: config.name,
                clock: config.clock,
                anchor,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Current estimates, for diagnostics.
    pub fn snapshot(&self) -> ShedderSnapshot {
        let inner = &self.inner;
        let max_pass = inner.max_pass();
        let min_rt = inner.min_rt();
        ShedderSnapshot {
            flying: inner.flying.load(Ordering::Acquire),
            avg_flying: inner.avg_flying(),
            max_pass,
            min_rt,
            max_flight: inner.max_flight(max_pass, min_rt),
            hot: inner.still_hot(inner.now_ns()),
        }
    }
}

impl Shedder for AdaptiveShedder {
    fn allow(&self) -> Result<Promise, ServiceOverloaded> {
        let inner = &self.inner;
        let now = inner.now_ns();

        if inner.should_drop(now) {
            inner.drop_time.store(now, Ordering::Release);
            inner.dropped_recently.store(true, Ordering::Release);
            return Err(ServiceOverloaded);
        }

        inner.add_flying(1);
        Ok(Promise {
            pending: Some(Pending {
                shedder: Arc::clone(inner),
                start_ns: now,
            }),
        })
    }
}

impl Inner {
    #[inline]
    fn now_ns(&self) -> u64 {
        self.clock.now().duration_since(self.anchor).as_nanos() as u64
    }

    fn avg_flying(&self) -> f64 {
        *self.avg_flying.lock()
    }

    fn add_flying(&self, delta: i64) {
        let flying = self.flying.fetch_add(delta, Ordering::AcqRel) + delta;
        // Only smooth on completion: admission raises `flying` at once, while the average
        // (our perceived load) decays slowly.
        if delta < 0 {
            let mut avg = self.avg_flying.lock();
            *avg = *avg * FLYING_BETA + flying as f64 * (1.0 - FLYING_BETA);
        }
    }

    fn cpu_usage(&self) -> Option<u64> {
        self.cpu_sampler
            .cpu_usage()
            .map(|usage| usage.min(MAX_CPU_USAGE))
    }

    fn still_hot(&self, now: u64) -> bool {
        if !self.dropped_recently.load(Ordering::Acquire) {
            return false;
        }

        let drop_time = self.drop_time.load(Ordering::Acquire);
        let hot = now.saturating_sub(drop_time) < COOL_OFF.as_nanos() as u64;
        if !hot {
            self.dropped_recently.store(false, Ordering::Release);
        }
        hot
    }

    fn max_pass(&self) -> u64 {
        let mut result = 1.0_f64;
        self.pass_window.reduce(|b| {
            if b.sum() > result {
                result = b.sum();
            }
        });
        result as u64
    }

    fn min_rt(&self) -> f64 {
        let mut result = DEFAULT_MIN_RT;
        self.rt_window.reduce(|b| {
            if b.count() == 0 {
                return;
            }
            let avg = (b.sum() / b.count() as f64).round();
            if avg < result {
                result = avg;
            }
        });
        result
    }

    fn max_flight(&self, max_pass: u64, min_rt: f64) -> u64 {
        // requests per second * best latency in seconds
        let flight = max_pass as f64 * self.buckets_per_second * min_rt / 1000.0;
        (flight.floor() as u64).max(1)
    }

    fn should_drop(&self, now: u64) -> bool {
        let cpu = self.cpu_usage();
        let overloaded = matches!(cpu, Some(usage) if usage >= self.cpu_threshold);
        let hot = self.still_hot(now);
        if !overloaded && !hot {
            return false;
        }

        let flying = self.flying.load(Ordering::Acquire);
        let avg_flying = self.avg_flying();
        let max_pass = self.max_pass();
        let min_rt = self.min_rt();
        let max_flight = self.max_flight(max_pass, min_rt) as f64;
        if avg_flying <= max_flight || flying as f64 <= max_flight {
            return false;
        }

        tracing::warn!(
            shedder = %self.name,
            cpu = ?cpu,
            max_pass,
            min_rt,
            hot,
            flying,
            avg_flying,
            "dropreq"
        );
        if let Some(alerter) = &self.alerter {
            let cpu = match cpu {
                Some(usage) => usage.to_string(),
                None => String::from("unknown"),
            };
            alerter.report(&format!(
                "({}) dropreq, cpu: {}, maxPass: {}, minRt: {:.2}, hot: {}, flying: {}, avgFlying: {:.2}",
                self.name,
                cpu,
                max_pass,
                min_rt,
                hot,
                flying,
                avg_flying
            ));
        }
        true
    }

    fn record_pass(&self, start_ns: u64) {
        let elapsed_ns = self.now_ns().saturating_sub(start_ns);
        let rt_ms = (elapsed_ns as f64 / 1_000_000.0).ceil();
        self.add_flying(-1);
        self.rt_window.add(rt_ms);
        self.pass_window.add(1.0);
    }
}

/// The completion handle of an admitted request.
///
/// Resolve it exactly once: [`Promise::pass`] when the work succeeded,
/// [`Promise::fail`] when it did not. A promise dropped without being resolved counts as
/// a failure, so a request abandoned on timeout or cancellation cannot leak its
/// in-flight slot.
#[must_use = "a promise must be resolved with `pass` or `fail`"]
#[derive(Debug)]
pub struct Promise {
    pending: Option<Pending>,
}

#[derive(Debug)]
struct Pending {
    shedder: Arc<Inner>,
    start_ns: u64,
}

impl Promise {
    /// A promise that records nothing when resolved.
    pub(crate) fn noop() -> Self {
        Self { pending: None }
    }

    /// The work succeeded: record its latency and count it as passed.
    pub fn pass(mut self) {
        if let Some(pending) = self.pending.take() {
            pending.shedder.record_pass(pending.start_ns);
        }
    }

    /// The work failed: release the in-flight slot without recording a sample.
    ///
    /// A failure is no evidence that the service could take more load.
    pub fn fail(mut self) {
        if let Some(pending) = self.pending.take() {
            pending.shedder.add_flying(-1);
        }
    }
}

impl Drop for Promise {
    fn drop(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.shedder.add_flying(-1);
        }
    }
}
