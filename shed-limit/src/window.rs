use std::num::NonZeroUsize;
use std::time::Duration;

use parking_lot::Mutex;
use quanta::Clock;
use quanta::Instant;

/// The aggregate of every value added during one bucket period.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Bucket {
    sum: f64,
    count: u64,
}

impl Bucket {
    /// Running total of the values added to this bucket.
    pub fn sum(&self) -> f64 {
        self.sum
    }

    /// Number of values added to this bucket.
    pub fn count(&self) -> u64 {
        self.count
    }

    fn add(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
    }

    fn reset(&mut self) {
        self.sum = 0.0;
        self.count = 0;
    }
}

/// A rolling window made of a fixed ring of time buckets.
///
/// The window covers `bucket_count * bucket_duration`. Buckets that age out of the
/// window are cleared lazily, the next time the window is touched, so an idle window
/// never holds stale data.
#[derive(Debug)]
pub struct BucketedWindow {
    state: Mutex<WindowState>,
    bucket_ns: u64,
    ignore_current: bool,
    clock: Clock,
    anchor: Instant,
}

#[derive(Debug)]
struct WindowState {
    buckets: Vec<Bucket>,
    /// Index of the bucket currently accepting writes
    offset: usize,
    /// Start (nanos from anchor) of the current bucket, always on a bucket boundary
    last_ns: u64,
}

impl WindowState {
    fn rotate(&mut self, now_ns: u64, bucket_ns: u64) {
        let elapsed = now_ns.saturating_sub(self.last_ns) / bucket_ns;
        if elapsed == 0 {
            return;
        }

        let size = self.buckets.len();
        if elapsed >= size as u64 {
            // The whole window is stale
            self.buckets.iter_mut().for_each(Bucket::reset);
        } else {
            for i in 1..=elapsed as usize {
                self.buckets[(self.offset + i) % size].reset();
            }
        }

        self.offset = (self.offset + (elapsed % size as u64) as usize) % size;
        // Advance by whole buckets to avoid drift
        self.last_ns += elapsed * bucket_ns;
    }
}

impl BucketedWindow {
    pub fn new(bucket_count: NonZeroUsize, bucket_duration: Duration, ignore_current: bool) -> Self {
        Self::with_clock(bucket_count, bucket_duration, ignore_current, Clock::new())
    }

    pub fn with_clock(
        bucket_count: NonZeroUsize,
        bucket_duration: Duration,
        ignore_current: bool,
        clock: Clock,
    ) -> Self {
        let anchor = clock.now();
        Self {
            state: Mutex::new(WindowState {
                buckets: vec![Bucket::default(); bucket_count.get()],
                offset: 0,
                last_ns: 0,
            }),
            bucket_ns: (bucket_duration.as_nanos() as u64).max(1),
            ignore_current,
            clock,
            anchor,
        }
    }

    /// Adds `value` to the bucket currently accepting writes.
    pub fn add(&self, value: f64) {
        let now = self.now_ns();
        let mut state = self.state.lock();
        state.rotate(now, self.bucket_ns);
        let offset = state.offset;
        state.buckets[offset].add(value);
    }

    /// Visits the buckets of the window, oldest first.
    ///
    /// When the window was built with `ignore_current`, the bucket still being written to
    /// is skipped because its partial data would skew the result.
    pub fn reduce<F>(&self, mut f: F)
    where
        F: FnMut(&Bucket),
    {
        let now = self.now_ns();
        let mut state = self.state.lock();
        state.rotate(now, self.bucket_ns);

        let size = state.buckets.len();
        let visible = if self.ignore_current { size - 1 } else { size };
        for i in 1..=visible {
            f(&state.buckets[(state.offset + i) % size]);
        }
    }

    #[inline]
    fn now_ns(&self) -> u64 {
        self.clock.now().duration_since(self.anchor).as_nanos() as u64
    }
}
