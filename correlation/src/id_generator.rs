//! Id generation.

use crate::error::CorrelationError;
use crate::trace_context::{SpanId, TraceId};
use rand::{rngs, Rng, SeedableRng};
use std::cell::RefCell;
use std::fmt;

/// How often an all-zero id is re-rolled before the source is declared
/// broken.
const MAX_ATTEMPTS: usize = 8;

/// Interface for generating trace and span ids.
///
/// The default [`RandomIdGenerator`] draws from an OS-seeded generator; tests
/// that need deterministic ids can supply their own implementation through
/// [`ContextBuilder::with_id_generator`].
///
/// [`ContextBuilder::with_id_generator`]: crate::ContextBuilder::with_id_generator
pub trait IdGenerator: Send + Sync + fmt::Debug {
    /// Generate a new `TraceId`.
    fn new_trace_id(&self) -> TraceId;

    /// Generate a new `SpanId`.
    fn new_span_id(&self) -> SpanId;
}

/// Default [`IdGenerator`] implementation.
///
/// Generates trace and span ids using a per-thread random number generator
/// seeded from the operating system, so ids never repeat across process
/// instances.
#[derive(Clone, Debug, Default)]
pub struct RandomIdGenerator {
    _private: (),
}

impl IdGenerator for RandomIdGenerator {
    fn new_trace_id(&self) -> TraceId {
        CURRENT_RNG.with(|rng| TraceId::from(rng.borrow_mut().random::<u128>()))
    }

    fn new_span_id(&self) -> SpanId {
        CURRENT_RNG.with(|rng| SpanId::from(rng.borrow_mut().random::<u64>()))
    }
}

thread_local! {
    /// Store random number generator for each thread
    static CURRENT_RNG: RefCell<rngs::SmallRng> = RefCell::new(rngs::SmallRng::from_os_rng());
}

/// Draw a trace id, re-rolling the all-zero value.
pub(crate) fn non_zero_trace_id(
    generator: &dyn IdGenerator,
) -> Result<TraceId, CorrelationError> {
    for _ in 0..MAX_ATTEMPTS {
        let id = generator.new_trace_id();
        if id.is_valid() {
            return Ok(id);
        }
        crate::corr_warn!(name: "IdGenerator.ZeroTraceId");
    }
    Err(CorrelationError::IdGeneration {
        attempts: MAX_ATTEMPTS,
    })
}

/// Draw a span id, re-rolling the all-zero value.
pub(crate) fn non_zero_span_id(generator: &dyn IdGenerator) -> Result<SpanId, CorrelationError> {
    for _ in 0..MAX_ATTEMPTS {
        let id = generator.new_span_id();
        if id.is_valid() {
            return Ok(id);
        }
        crate::corr_warn!(name: "IdGenerator.ZeroSpanId");
    }
    Err(CorrelationError::IdGeneration {
        attempts: MAX_ATTEMPTS,
    })
}

#[cfg(any(test, feature = "testing"))]
pub use sequential::SequentialIdGenerator;

#[cfg(any(test, feature = "testing"))]
mod sequential {
    use super::IdGenerator;
    use crate::trace_context::{SpanId, TraceId};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    /// [`IdGenerator`] that increments a counter for each new id, for
    /// predictable ids in tests.
    #[derive(Clone, Debug)]
    pub struct SequentialIdGenerator(Arc<AtomicU64>);

    impl SequentialIdGenerator {
        /// Create a new generator starting at 1.
        pub fn new() -> Self {
            Self::default()
        }
    }

    impl Default for SequentialIdGenerator {
        fn default() -> Self {
            Self(Arc::new(AtomicU64::new(1)))
        }
    }

    impl IdGenerator for SequentialIdGenerator {
        fn new_trace_id(&self) -> TraceId {
            TraceId::from(self.0.fetch_add(1, Ordering::SeqCst) as u128)
        }

        fn new_span_id(&self) -> SpanId {
            SpanId::from(self.0.fetch_add(1, Ordering::SeqCst))
        }
    }
}
