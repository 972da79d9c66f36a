//! Correlation of distributed operations across process boundaries.
//!
//! This crate propagates operation identity (trace id, span id, parentage,
//! sampling flag) between services, and binds telemetry items to that
//! identity. Two wire encodings are supported side by side: the
//! [W3C Trace Context] `traceparent` header and the legacy hierarchical
//! `Request-Id` header, so fleets that mix both generations of services keep
//! a single coherent trace.
//!
//! ## Core pieces
//!
//! - [`CorrelationContext`]: the frozen record of the current operation,
//!   with strict W3C and lenient legacy codecs.
//! - [`Carrier`]: an immutable request-scoped value bag passed explicitly
//!   through instrumented code; attaching a context derives a new carrier.
//! - [`CorrelationPropagator`]: extraction with W3C-then-legacy preference
//!   and dual-header injection.
//! - [`telemetry`]: request/dependency items, the [`TelemetryClient`] seam
//!   to the transmission channel, and the tag-binding rules.
//! - [`start_span`] / [`with_span`] / [`start_operation`]: explicit span
//!   primitives for in-process units of work.
//!
//! HTTP server middleware and client instrumentation built on these
//! primitives live in the companion `correlation-http` crate.
//!
//! ## Example
//!
//! ```
//! use correlation::{Carrier, CorrelationContext, CorrelationPropagator};
//! use std::collections::HashMap;
//!
//! // Inbound: decode whatever the upstream sent.
//! let mut headers: HashMap<String, String> = HashMap::new();
//! headers.insert(
//!     "traceparent".to_string(),
//!     "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01".to_string(),
//! );
//! let propagator = CorrelationPropagator::new();
//! let parent = propagator.extract(&headers).unwrap();
//!
//! // Work happens below the caller: derive a child and attach it.
//! let child = parent.new_child(Some("GET /orders")).unwrap();
//! let carrier = Carrier::new().with_correlation(child.clone());
//!
//! // Outbound: both headers are always written together.
//! let mut outbound: HashMap<String, String> = HashMap::new();
//! propagator.inject(carrier.correlation().unwrap(), &mut outbound);
//! assert!(outbound.contains_key("traceparent"));
//! assert!(outbound.contains_key("request-id"));
//! assert_eq!(child.trace_id(), parent.trace_id());
//! ```
//!
//! [W3C Trace Context]: https://www.w3.org/TR/trace-context/

#![warn(missing_docs, missing_debug_implementations, unreachable_pub)]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod carrier;
mod context;
mod error;
mod id_generator;
#[macro_use]
mod internal_logging;
pub mod propagation;
mod span;
pub mod telemetry;
#[cfg(any(test, feature = "testing"))]
#[cfg_attr(docsrs, doc(cfg(feature = "testing")))]
pub mod testing;
mod trace_context;

pub use carrier::Carrier;
pub use context::{ContextBuilder, CorrelationContext};
pub use error::{CorrelationError, PropagationError};
pub use id_generator::{IdGenerator, RandomIdGenerator};
#[cfg(any(test, feature = "testing"))]
pub use id_generator::SequentialIdGenerator;
pub use propagation::CorrelationPropagator;
pub use span::{start_operation, start_span, with_span, Operation, Span};
pub use telemetry::TelemetryClient;
pub use trace_context::{
    is_valid_span_id, is_valid_trace_id, SpanId, TraceFlags, TraceId,
};

/// Re-exports for the logging macros; not part of the public API.
#[doc(hidden)]
#[cfg(feature = "internal-logs")]
pub mod _private {
    pub use tracing::{debug, warn};
}
