use crate::Promise;
use crate::ServiceOverloaded;
use crate::Shedder;

/// A shedder that admits every request.
///
/// Used when shedding is disabled, so that callers keep a single code path.
#[derive(Debug, Clone, Copy, Default)]
pub struct NopShedder;

impl Shedder for NopShedder {
    #[inline]
    fn allow(&self) -> Result<Promise, ServiceOverloaded> {
        Ok(Promise::noop())
    }
}
