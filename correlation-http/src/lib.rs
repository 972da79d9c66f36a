//! HTTP boundary for correlation-context propagation: header carriers over
//! [`http::HeaderMap`], a transport seam for outbound requests, server
//! middleware, and instrumented clients.
//!
//! The concurrency model is plain threads: handlers and transports are
//! synchronous, and nothing here assumes an async runtime.

#![warn(missing_docs, missing_debug_implementations, unreachable_pub)]

use std::fmt::Debug;

#[doc(no_inline)]
pub use bytes::Bytes;
#[doc(no_inline)]
pub use http::{Request, Response};

use correlation::propagation::{Extractor, Injector};

pub mod client;
mod sanitize;
pub mod server;

pub use client::{ClientConfig, InstrumentedClient};
pub use server::{Handler, ServerConfig, ServerInstrumentation};

/// Helper for injecting correlation headers into HTTP requests and
/// responses.
#[derive(Debug)]
pub struct HeaderInjector<'a>(pub &'a mut http::HeaderMap);

impl Injector for HeaderInjector<'_> {
    /// Set a key and value in the HeaderMap. Does nothing if the key or
    /// value are not valid inputs.
    fn set(&mut self, key: &str, value: String) {
        if let Ok(name) = http::header::HeaderName::from_bytes(key.as_bytes()) {
            if let Ok(val) = http::header::HeaderValue::from_str(&value) {
                self.0.insert(name, val);
            }
        }
    }
}

/// Helper for extracting correlation headers from HTTP requests.
#[derive(Debug)]
pub struct HeaderExtractor<'a>(pub &'a http::HeaderMap);

impl Extractor for HeaderExtractor<'_> {
    /// Get a value for a key from the HeaderMap. If the value is not valid
    /// ASCII, returns None.
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|value| value.to_str().ok())
    }

    /// Collect all the keys from the HeaderMap.
    fn keys(&self) -> Vec<&str> {
        self.0
            .keys()
            .map(|value| value.as_str())
            .collect::<Vec<_>>()
    }
}

/// Error produced by an [`HttpClient`] transport.
pub type HttpError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A minimal interface for dispatching HTTP requests.
///
/// Implementations bring their own connection handling; the instrumentation
/// layered on top only needs a blocking call that either yields a response
/// or a transport error. Cancellation of the surrounding request surfaces
/// here as whatever error the transport reports.
pub trait HttpClient: Debug + Send + Sync {
    /// Send the request, returning the response including status code and
    /// body.
    ///
    /// Returns an error if the server cannot be reached or the exchange
    /// could not be completed, e.g. because of a timeout or a loss of
    /// connection.
    fn send(&self, request: Request<Bytes>) -> Result<Response<Bytes>, HttpError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_headers_get() {
        let mut carrier = http::HeaderMap::new();
        HeaderInjector(&mut carrier).set("Request-Id", "|abc.def.".to_string());

        assert_eq!(
            HeaderExtractor(&carrier).get("REQUEST-ID"),
            Some("|abc.def."),
            "case insensitive extraction"
        )
    }

    #[test]
    fn http_headers_keys() {
        let mut carrier = http::HeaderMap::new();
        HeaderInjector(&mut carrier).set("traceparent", "value1".to_string());
        HeaderInjector(&mut carrier).set("Request-Id", "value2".to_string());

        let extractor = HeaderExtractor(&carrier);
        let got = extractor.keys();
        assert_eq!(got.len(), 2);
        assert!(got.contains(&"traceparent"));
        assert!(got.contains(&"request-id"));
    }

    #[test]
    fn invalid_header_values_are_dropped() {
        let mut carrier = http::HeaderMap::new();
        HeaderInjector(&mut carrier).set("bad name", "value".to_string());
        HeaderInjector(&mut carrier).set("name", "bad\nvalue".to_string());

        assert!(carrier.is_empty());
    }
}
