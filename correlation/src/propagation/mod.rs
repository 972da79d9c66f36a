//! Reading and writing correlation state across process boundaries.
//!
//! Propagators encode and decode the correlation context to and from
//! messages exchanged by applications, through the [`Injector`] and
//! [`Extractor`] interfaces. Each wire format lives on
//! [`CorrelationContext`] itself; the [`CorrelationPropagator`] applies the
//! format-preference and dual-header rules across both formats.
//!
//! [`CorrelationContext`]: crate::CorrelationContext

use std::collections::HashMap;

mod propagator;

pub use propagator::CorrelationPropagator;

/// The W3C TraceContext header, carried on requests and optionally on
/// responses.
pub const TRACEPARENT_HEADER: &str = "traceparent";

/// The W3C companion header. Its content is tolerated and ignored; a
/// malformed value never prevents extraction.
pub const TRACESTATE_HEADER: &str = "tracestate";

/// The legacy hierarchical header, carried on requests and responses for
/// compatibility with older receivers.
pub const REQUEST_ID_HEADER: &str = "request-id";

/// Injector provides an interface for adding fields to an underlying
/// struct like `HashMap`.
pub trait Injector {
    /// Add a key and value to the underlying data.
    fn set(&mut self, key: &str, value: String);
}

/// Extractor provides an interface for reading fields from an underlying
/// struct like `HashMap`.
///
/// Lookups are case-insensitive; implementations normalize keys.
pub trait Extractor {
    /// Get a value for a key from the underlying data.
    fn get(&self, key: &str) -> Option<&str>;

    /// Collect all the keys from the underlying data.
    fn keys(&self) -> Vec<&str>;
}

impl<S: std::hash::BuildHasher> Injector for HashMap<String, String, S> {
    /// Set a key and value in the HashMap.
    fn set(&mut self, key: &str, value: String) {
        self.insert(key.to_lowercase(), value);
    }
}

impl<S: std::hash::BuildHasher> Extractor for HashMap<String, String, S> {
    /// Get a value for a key from the HashMap.
    fn get(&self, key: &str) -> Option<&str> {
        self.get(&key.to_lowercase()).map(|v| v.as_str())
    }

    /// Collect all the keys from the HashMap.
    fn keys(&self) -> Vec<&str> {
        self.keys().map(|k| k.as_str()).collect::<Vec<_>>()
    }
}
