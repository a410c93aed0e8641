use std::fmt;
use std::sync::Arc;
use std::sync::Weak;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio::time::MissedTickBehavior;

use crate::CpuSampler;

const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Admission counters of one interval.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatSnapshot {
    pub total: u64,
    pub pass: u64,
    pub drop: u64,
}

/// Counts admission outcomes and periodically logs them.
///
/// Purely observational: nothing in the decision path reads these counters. Create one
/// per shedder group and share it with `Arc`.
pub struct AdmissionStat {
    name: String,
    total: AtomicU64,
    pass: AtomicU64,
    drop: AtomicU64,
    interval: Duration,
    logging: bool,
    cpu_sampler: Option<Arc<dyn CpuSampler>>,
}

impl fmt::Debug for AdmissionStat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdmissionStat")
            .field("name", &self.name)
            .field("total", &self.total.load(Ordering::Relaxed))
            .field("pass", &self.pass.load(Ordering::Relaxed))
            .field("drop", &self.drop.load(Ordering::Relaxed))
            .field("interval", &self.interval)
            .field("logging", &self.logging)
            .finish_non_exhaustive()
    }
}

impl AdmissionStat {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            total: AtomicU64::new(0),
            pass: AtomicU64::new(0),
            drop: AtomicU64::new(0),
            interval: DEFAULT_INTERVAL,
            logging: true,
            cpu_sampler: None,
        }
    }

    /// Set how often the counters are reported and reset.
    ///
    /// Intervals shorter than one millisecond are raised to one millisecond.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval.max(MIN_INTERVAL);
        self
    }

    /// Turn the periodic log line on or off. Counting is not affected.
    pub fn with_logging(mut self, logging: bool) -> Self {
        self.logging = logging;
        self
    }

    /// Include the CPU load in each report.
    pub fn with_cpu_sampler(mut self, sampler: Arc<dyn CpuSampler>) -> Self {
        self.cpu_sampler = Some(sampler);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn incr_total(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn incr_pass(&self) {
        self.pass.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn incr_drop(&self) {
        self.drop.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the counters and resets them to zero.
    pub fn take(&self) -> StatSnapshot {
        StatSnapshot {
            total: self.total.swap(0, Ordering::AcqRel),
            pass: self.pass.swap(0, Ordering::AcqRel),
            drop: self.drop.swap(0, Ordering::AcqRel),
        }
    }

    /// Takes the counters and logs them, unless logging is off.
    pub fn report(&self) -> StatSnapshot {
        let snapshot = self.take();
        if !self.logging {
            return snapshot;
        }

        let cpu = self
            .cpu_sampler
            .as_ref()
            .and_then(|sampler| sampler.cpu_usage());
        let StatSnapshot { total, pass, drop } = snapshot;
        if drop == 0 {
            tracing::info!(
                shedder = %self.name,
                interval = ?self.interval,
                cpu = ?cpu,
                total,
                pass,
                drop,
                "shedding_stat"
            );
        } else {
            tracing::warn!(
                shedder = %self.name,
                interval = ?self.interval,
                cpu = ?cpu,
                total,
                pass,
                drop,
                "shedding_stat_drop"
            );
        }
        snapshot
    }

    /// Reports the counters every interval on the current Tokio runtime.
    ///
    /// The task ends by itself once the last `Arc` to this stat is dropped.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn spawn_reporter(self: &Arc<Self>) -> JoinHandle<()> {
        let interval = self.interval;
        let stat: Weak<Self> = Arc::downgrade(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(stat) = stat.upgrade() else {
                    break;
                };
                stat.report();
            }
        })
    }
}
