//! In-memory telemetry client for testing instrumented code.

use crate::telemetry::{DependencyTelemetry, RequestTelemetry, TelemetryClient};
use std::sync::Mutex;

/// A [`TelemetryClient`] that stores everything it is handed, for
/// assertions in tests.
///
/// # Examples
///
/// ```
/// use correlation::testing::CapturingClient;
/// use correlation::Carrier;
/// use std::sync::Arc;
///
/// let client = Arc::new(CapturingClient::default());
/// let carrier = Carrier::new().with_telemetry_client(client.clone());
///
/// let (scoped, span) = correlation::start_span(&carrier, "work").unwrap();
/// span.finish(&scoped, true, Default::default());
///
/// assert_eq!(client.dependencies().len(), 1);
/// ```
#[derive(Debug, Default)]
pub struct CapturingClient {
    requests: Mutex<Vec<RequestTelemetry>>,
    dependencies: Mutex<Vec<DependencyTelemetry>>,
}

impl CapturingClient {
    /// Create an empty client.
    pub fn new() -> Self {
        CapturingClient::default()
    }

    /// All request items tracked so far.
    pub fn requests(&self) -> Vec<RequestTelemetry> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// All dependency items tracked so far.
    pub fn dependencies(&self) -> Vec<DependencyTelemetry> {
        self.dependencies
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl TelemetryClient for CapturingClient {
    fn track_request(&self, item: RequestTelemetry) {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(item);
    }

    fn track_dependency(&self, item: DependencyTelemetry) {
        self.dependencies
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(item);
    }
}
