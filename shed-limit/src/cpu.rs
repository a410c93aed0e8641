use std::fmt;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use parking_lot::Mutex;
use quanta::Clock;
use quanta::Instant;
use sysinfo::System;

/// Highest value a sampler may report: 100% of every core.
pub(crate) const MAX_CPU_USAGE: u64 = 1000;

const REFRESH_INTERVAL: Duration = Duration::from_millis(250);
const BETA: f64 = 0.95;
// `refreshed_at` before the first refresh
const NEVER: u64 = u64::MAX;

/// A source of the current CPU load, in per-mille (`0..=1000`).
///
/// Samplers are called on every admission decision, so they must be cheap and must
/// never block. Returning `None` means the load is unknown; the shedder then treats
/// the system as not overloaded.
pub trait CpuSampler: Send + Sync {
    fn cpu_usage(&self) -> Option<u64>;
}

impl<F> CpuSampler for F
where
    F: Fn() -> Option<u64> + Send + Sync,
{
    fn cpu_usage(&self) -> Option<u64> {
        self()
    }
}

/// Samples the host CPU load through `sysinfo`.
///
/// The load is refreshed at most every 250ms and smoothed with a moving average. A
/// caller that arrives while another thread is refreshing gets the cached value.
///
/// Construction is cheap: the `sysinfo` handle is only created by the first sample.
pub struct SystemCpuSampler {
    system: Mutex<Option<System>>,
    /// Smoothed usage in per-mille
    usage: AtomicU64,
    /// Nanos from anchor of the last refresh
    refreshed_at: AtomicU64,
    clock: Clock,
    anchor: Instant,
}

impl fmt::Debug for SystemCpuSampler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemCpuSampler")
            .field("usage", &self.usage.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for SystemCpuSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemCpuSampler {
    pub fn new() -> Self {
        let clock = Clock::new();
        let anchor = clock.now();
        Self {
            system: Mutex::new(None),
            usage: AtomicU64::new(0),
            refreshed_at: AtomicU64::new(NEVER),
            clock,
            anchor,
        }
    }

    fn refresh(&self, now: u64) {
        let Some(mut guard) = self.system.try_lock() else {
            return;
        };
        if guard.is_none() {
            // The first refresh only establishes a baseline
            let mut system = System::new();
            system.refresh_cpu_usage();
            *guard = Some(system);
            self.refreshed_at.store(now, Ordering::Release);
            return;
        }
        let Some(system) = guard.as_mut() else {
            return;
        };
        system.refresh_cpu_usage();
        let current = system.global_cpu_usage();
        if current.is_finite() {
            // sysinfo reports a percentage
            let current = (f64::from(current) * 10.0).clamp(0.0, MAX_CPU_USAGE as f64);
            let previous = self.usage.load(Ordering::Acquire) as f64;
            let smoothed = previous * BETA + current * (1.0 - BETA);
            self.usage.store(smoothed.round() as u64, Ordering::Release);
        }
        self.refreshed_at.store(now, Ordering::Release);
    }
}

impl CpuSampler for SystemCpuSampler {
    fn cpu_usage(&self) -> Option<u64> {
        if !sysinfo::IS_SUPPORTED_SYSTEM {
            return None;
        }

        let now = self.clock.now().duration_since(self.anchor).as_nanos() as u64;
        let last = self.refreshed_at.load(Ordering::Acquire);
        if last == NEVER || now.saturating_sub(last) >= REFRESH_INTERVAL.as_nanos() as u64 {
            self.refresh(now);
        }
        Some(self.usage.load(Ordering::Acquire))
    }
}
