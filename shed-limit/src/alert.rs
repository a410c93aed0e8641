use std::fmt;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use parking_lot::Mutex;
use quanta::Clock;
use quanta::Instant;

const DEFAULT_MIN_INTERVAL: Duration = Duration::from_secs(5 * 60);

type Sink = Box<dyn Fn(&str) + Send + Sync>;

/// Forwards operator alerts to a sink, at most once per `min_interval`.
///
/// During sustained overload a shedder drops many requests per second. Only the first
/// alert of each interval reaches the sink; the others are counted and the count is
/// prepended to the next alert that gets through.
pub struct Alerter {
    sink: Sink,
    source: Option<String>,
    min_interval_ns: u64,
    /// Nanos from anchor of the last delivered alert
    last: Mutex<Option<u64>>,
    dropped: AtomicU64,
    clock: Clock,
    anchor: Instant,
}

impl fmt::Debug for Alerter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Alerter")
            .field("source", &self.source)
            .field("min_interval_ns", &self.min_interval_ns)
            .field("dropped", &self.dropped.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Alerter {
    pub fn new<F>(sink: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        let clock = Clock::new();
        let anchor = clock.now();
        Self {
            sink: Box::new(sink),
            source: None,
            min_interval_ns: DEFAULT_MIN_INTERVAL.as_nanos() as u64,
            last: Mutex::new(None),
            dropped: AtomicU64::new(0),
            clock,
            anchor,
        }
    }

    /// Set the minimum time between two alerts reaching the sink.
    pub fn with_min_interval(mut self, min_interval: Duration) -> Self {
        self.min_interval_ns = min_interval.as_nanos() as u64;
        self
    }

    /// Label every alert with the service or cluster it came from.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.anchor = clock.now();
        self.clock = clock;
        self
    }

    /// Sends `msg` to the sink unless an alert was delivered too recently.
    ///
    /// Returns `true` if the sink was called.
    pub fn report(&self, msg: &str) -> bool {
        let now = self.clock.now().duration_since(self.anchor).as_nanos() as u64;
        {
            let mut last = self.last.lock();
            if let Some(previous) = *last
                && now.saturating_sub(previous) < self.min_interval_ns
            {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                return false;
            }
            *last = Some(now);
        }

        let mut alert = String::new();
        if let Some(source) = &self.source {
            alert.push_str(&format!("source: {source}\n"));
        }
        let dropped = self.dropped.swap(0, Ordering::AcqRel);
        if dropped > 0 {
            alert.push_str(&format!("dropped: {dropped}\n"));
        }
        alert.push_str(msg.trim());

        (self.sink)(&alert);
        true
    }
}
