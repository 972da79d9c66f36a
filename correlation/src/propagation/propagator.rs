//! The combined two-format propagator.

use super::{Extractor, Injector, REQUEST_ID_HEADER, TRACEPARENT_HEADER, TRACESTATE_HEADER};
use crate::context::CorrelationContext;

// Canonical capitalization for injection; extraction is case-insensitive.
const REQUEST_ID_CANONICAL: &str = "Request-Id";

/// Propagates [`CorrelationContext`]s in both supported wire formats.
///
/// On extraction the W3C `traceparent` header wins when present and
/// well-formed; a missing or malformed one falls through to the legacy
/// `Request-Id` header, whose parsing never fails. On injection BOTH headers
/// are always written together; that invariant is what lets fleets mixing
/// W3C-aware and legacy-only services interoperate.
#[derive(Clone, Debug, Default)]
pub struct CorrelationPropagator {
    _private: (),
}

impl CorrelationPropagator {
    /// Create a new `CorrelationPropagator`.
    pub fn new() -> Self {
        CorrelationPropagator { _private: () }
    }

    /// Extract a correlation context from inbound headers.
    ///
    /// Empty header values count as absent. Returns `None` only when both
    /// headers are absent or empty; minting a root for that case is the
    /// caller's job.
    pub fn extract(&self, extractor: &dyn Extractor) -> Option<CorrelationContext> {
        let traceparent = extractor.get(TRACEPARENT_HEADER).unwrap_or("").trim();
        if !traceparent.is_empty() {
            match CorrelationContext::from_traceparent(traceparent) {
                Ok(context) => {
                    // tracestate is read tolerantly and its content ignored;
                    // nothing in it can block extraction.
                    let _ = extractor.get(TRACESTATE_HEADER);
                    return Some(context);
                }
                Err(error) => {
                    crate::corr_debug!(
                        name: "CorrelationPropagator.MalformedTraceParent",
                        reason = format!("{error}")
                    );
                }
            }
        }

        let request_id = extractor.get(REQUEST_ID_HEADER).unwrap_or("").trim();
        if request_id.is_empty() {
            return None;
        }
        match CorrelationContext::from_request_id(request_id) {
            Ok(context) => Some(context),
            Err(error) => {
                // Only reachable when the random source is exhausted.
                crate::corr_warn!(
                    name: "CorrelationPropagator.ExtractFailed",
                    reason = format!("{error}")
                );
                None
            }
        }
    }

    /// Inject the context into outbound headers, always writing both
    /// `traceparent` and `Request-Id`.
    pub fn inject(&self, context: &CorrelationContext, injector: &mut dyn Injector) {
        injector.set(TRACEPARENT_HEADER, context.to_traceparent());
        injector.set(REQUEST_ID_CANONICAL, context.to_request_id());
    }

    /// Set correlation headers on a response.
    ///
    /// Responses carry `Request-Id` for legacy client-side correlation; W3C
    /// clients do not need `traceparent` on responses.
    pub fn inject_response(&self, context: &CorrelationContext, injector: &mut dyn Injector) {
        injector.set(REQUEST_ID_CANONICAL, context.to_request_id());
    }

    /// The header names this propagator reads and writes.
    pub fn fields(&self) -> impl Iterator<Item = &'static str> {
        [TRACEPARENT_HEADER, TRACESTATE_HEADER, REQUEST_ID_HEADER].into_iter()
    }
}
