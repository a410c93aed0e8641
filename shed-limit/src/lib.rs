//! # shed-limit
//!
//! `shed-limit` provides adaptive, CPU aware admission control (load shedding).
//!
//! ## Core Philosophy
//!
//! A fixed rate limit has to be tuned by hand and is wrong as soon as the workload
//! changes. `shed-limit` instead watches what the process has proven it can sustain:
//! the best recent throughput and the best recent latency give a Little's Law bound on
//! concurrency. Requests are only shed when the CPU is hot *and* the number of requests
//! in flight exceeds that bound.
//!
//! ## Key Concepts
//!
//! * **Promise**: every admitted request holds a [`Promise`] which must be resolved with
//!   [`Promise::pass`] or [`Promise::fail`]. Dropping an unresolved promise fails it.
//! * **Cool-off**: after a drop the shedder stays sensitive for one second, even if the
//!   CPU sample recovers, so admission does not oscillate.
//! * **Fail Open**: a missing CPU sample counts as "not overloaded".
//! * **Shedder Trait**: a unified interface for the adaptive and the no-op shedder.
//!
//! ## Example
//!
//! ```rust
//! use shed_limit::AdaptiveShedder;
//! use shed_limit::Shedder;
//! use shed_limit::ShedderConfig;
//!
//! let config = ShedderConfig::default().with_cpu_sampler(|| Some(300));
//! let shedder = AdaptiveShedder::new(config).unwrap();
//!
//! if let Ok(promise) = shedder.allow() {
//!     // Do the work, then report the outcome
//!     promise.pass();
//! }
//! ```

use std::fmt::Debug;
use std::sync::Arc;

mod adaptive;
mod alert;
mod config;
mod cpu;
mod nop;
mod pool;
mod stat;
mod window;

pub use adaptive::AdaptiveShedder;
pub use adaptive::COOL_OFF;
pub use adaptive::Promise;
pub use adaptive::ShedderSnapshot;
pub use alert::Alerter;
pub use config::ConfigError;
pub use config::ShedderConfig;
pub use cpu::CpuSampler;
pub use cpu::SystemCpuSampler;
pub use nop::NopShedder;
pub use pool::ShedderPool;
pub use stat::AdmissionStat;
pub use stat::StatSnapshot;
pub use window::Bucket;
pub use window::BucketedWindow;

/// The only error a shedder ever returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("service overloaded")]
pub struct ServiceOverloaded;

/// The core trait for all admission controllers.
///
/// Shedders must be `Send` and `Sync` so that one instance can be shared by every
/// request handling thread via `Arc`.
pub trait Shedder: Debug + Send + Sync {
    /// Decides whether a request may proceed.
    ///
    /// This method never blocks on I/O and never panics.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceOverloaded`] if the request must be rejected. The caller should
    /// not do the work and should answer with a "service unavailable" class outcome.
    fn allow(&self) -> Result<Promise, ServiceOverloaded>;
}

/// Builds the shedder described by `config`.
///
/// Returns a [`NopShedder`] when shedding is disabled, otherwise an
/// [`AdaptiveShedder`].
pub fn new_shedder(config: ShedderConfig) -> Result<Arc<dyn Shedder>, ConfigError> {
    config.validate()?;
    Ok(build_shedder(config))
}

// `config` must already be validated
fn build_shedder(config: ShedderConfig) -> Arc<dyn Shedder> {
    if config.enabled {
        Arc::new(AdaptiveShedder::build(config))
    } else {
        Arc::new(NopShedder)
    }
}
