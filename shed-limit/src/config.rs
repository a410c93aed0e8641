use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use quanta::Clock;

use crate::Alerter;
use crate::CpuSampler;
use crate::SystemCpuSampler;
use crate::cpu::MAX_CPU_USAGE;

const DEFAULT_CPU_THRESHOLD: u64 = 900;
const DEFAULT_WINDOW: Duration = Duration::from_secs(5);
const DEFAULT_BUCKET_COUNT: usize = 50;

/// Reasons why a shedder configuration cannot be used.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("window must be longer than zero")]
    ZeroWindow,

    #[error("bucket count must be at least one")]
    ZeroBuckets,

    /// Each bucket must last at least one nanosecond.
    #[error("window of {window:?} is too short for {buckets} buckets")]
    BucketTooShort { window: Duration, buckets: usize },

    /// The threshold is a per-mille CPU load.
    #[error("cpu threshold {0} is outside 0..=1000")]
    CpuThresholdOutOfRange(u64),
}

/// Construction time settings of an adaptive shedder.
///
/// ```rust
/// use std::time::Duration;
/// use shed_limit::ShedderConfig;
///
/// let config = ShedderConfig::default()
///     .with_name("checkout")
///     .with_cpu_threshold(800)
///     .with_window(Duration::from_secs(10), 100);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Clone)]
pub struct ShedderConfig {
    /// When `false`, shedders built from this config admit everything.
    pub enabled: bool,
    /// CPU load, in per-mille, at or above which the system counts as overloaded.
    pub cpu_threshold: u64,
    /// Span of history used to estimate throughput and latency.
    pub window: Duration,
    /// Number of buckets the window is divided into.
    pub bucket_count: usize,
    /// Name used in logs and alerts.
    pub name: String,
    pub(crate) cpu_sampler: Arc<dyn CpuSampler>,
    pub(crate) clock: Clock,
    pub(crate) alerter: Option<Arc<Alerter>>,
}

impl fmt::Debug for ShedderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShedderConfig")
            .field("enabled", &self.enabled)
            .field("cpu_threshold", &self.cpu_threshold)
            .field("window", &self.window)
            .field("bucket_count", &self.bucket_count)
            .field("name", &self.name)
            .field("alerter", &self.alerter)
            .finish_non_exhaustive()
    }
}

impl Default for ShedderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cpu_threshold: DEFAULT_CPU_THRESHOLD,
            window: DEFAULT_WINDOW,
            bucket_count: DEFAULT_BUCKET_COUNT,
            name: String::from("default"),
            cpu_sampler: Arc::new(SystemCpuSampler::new()),
            clock: Clock::new(),
            alerter: None,
        }
    }
}

impl ShedderConfig {
    /// Turn shedding on or off.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_cpu_threshold(mut self, cpu_threshold: u64) -> Self {
        self.cpu_threshold = cpu_threshold;
        self
    }

    /// Set the history window and how many buckets it is divided into.
    pub fn with_window(mut self, window: Duration, bucket_count: usize) -> Self {
        self.window = window;
        self.bucket_count = bucket_count;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Replace the host CPU sampler.
    pub fn with_cpu_sampler<S>(mut self, sampler: S) -> Self
    where
        S: CpuSampler + 'static,
    {
        self.cpu_sampler = Arc::new(sampler);
        self
    }

    /// Share an existing sampler between several configurations.
    pub fn with_shared_cpu_sampler(mut self, sampler: Arc<dyn CpuSampler>) -> Self {
        self.cpu_sampler = sampler;
        self
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Send an alert through `alerter` whenever a request is dropped.
    pub fn with_alerter(mut self, alerter: Arc<Alerter>) -> Self {
        self.alerter = Some(alerter);
        self
    }

    pub fn cpu_sampler(&self) -> &Arc<dyn CpuSampler> {
        &self.cpu_sampler
    }

    /// Duration of a single bucket.
    pub fn bucket_duration(&self) -> Duration {
        match u32::try_from(self.bucket_count) {
            Ok(buckets) if buckets > 0 => self.window / buckets,
            _ => Duration::ZERO,
        }
    }

    /// Checks that the settings describe a usable shedder.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cpu_threshold > MAX_CPU_USAGE {
            return Err(ConfigError::CpuThresholdOutOfRange(self.cpu_threshold));
        }
        if self.window.is_zero() {
            return Err(ConfigError::ZeroWindow);
        }
        if self.bucket_count == 0 {
            return Err(ConfigError::ZeroBuckets);
        }
        if self.bucket_duration().is_zero() {
            return Err(ConfigError::BucketTooShort {
                window: self.window,
                buckets: self.bucket_count,
            });
        }
        Ok(())
    }
}
