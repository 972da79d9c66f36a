//! Outbound instrumentation: inject correlation headers and record
//! dependency telemetry around an [`HttpClient`].

use crate::sanitize::{sanitize_url, DEFAULT_SENSITIVE_PARAMS};
use crate::{HeaderInjector, HttpClient, HttpError};
use bytes::Bytes;
use correlation::telemetry::{DependencyTelemetry, TelemetryClient};
use correlation::{Carrier, CorrelationContext, CorrelationPropagator};
use http::{Request, Response, Uri};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

const DEPENDENCY_TYPE_HTTP: &str = "Http";

/// Configuration for [`InstrumentedClient`].
#[derive(Clone)]
pub struct ClientConfig {
    sanitize_url: bool,
    sensitive_query_params: HashSet<String>,
    telemetry_client: Option<Arc<dyn TelemetryClient>>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            sanitize_url: true,
            sensitive_query_params: DEFAULT_SENSITIVE_PARAMS
                .iter()
                .map(|name| name.to_string())
                .collect(),
            telemetry_client: None,
        }
    }
}

impl ClientConfig {
    /// Create a config with URL sanitization on and the default sensitive
    /// parameter set.
    pub fn new() -> Self {
        ClientConfig::default()
    }

    /// Emit dependency telemetry through the given client instead of the one
    /// found on the carrier.
    pub fn with_telemetry_client(mut self, client: Arc<dyn TelemetryClient>) -> Self {
        self.telemetry_client = Some(client);
        self
    }

    /// Turn URL sanitization on or off for the dependency `data` field.
    pub fn with_sanitize_url(mut self, sanitize: bool) -> Self {
        self.sanitize_url = sanitize;
        self
    }

    /// Replace the set of query-parameter names whose values are redacted.
    ///
    /// Names are matched case-insensitively; entries are lowercased here.
    pub fn with_sensitive_query_params<I, S>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.sensitive_query_params = params
            .into_iter()
            .map(|name| name.as_ref().to_lowercase())
            .collect();
        self
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("sanitize_url", &self.sanitize_url)
            .field("sensitive_query_params", &self.sensitive_query_params.len())
            .field("telemetry_client", &self.telemetry_client.is_some())
            .finish()
    }
}

/// An [`HttpClient`] wrapper that correlates and records every outbound
/// call.
///
/// Each send derives a child of the carrier's context (or mints a root when
/// the carrier has none), injects both the `traceparent` and `Request-Id`
/// headers with the child's ids, and records a `Http` dependency item once
/// the exchange finishes. The transport's result is returned unchanged;
/// telemetry never alters the outcome the application sees.
#[derive(Debug)]
pub struct InstrumentedClient<C> {
    inner: C,
    config: ClientConfig,
    propagator: CorrelationPropagator,
}

impl<C: HttpClient> InstrumentedClient<C> {
    /// Wrap a transport with default configuration.
    pub fn new(inner: C) -> Self {
        Self::with_config(inner, ClientConfig::default())
    }

    /// Wrap a transport with the given configuration.
    pub fn with_config(inner: C, config: ClientConfig) -> Self {
        InstrumentedClient {
            inner,
            config,
            propagator: CorrelationPropagator::new(),
        }
    }

    /// Send a request under the carrier's correlation context.
    pub fn send(
        &self,
        carrier: &Carrier,
        mut request: Request<Bytes>,
    ) -> Result<Response<Bytes>, HttpError> {
        let name = format!("{} {}", request.method(), request.uri().path());

        let context = match carrier.correlation() {
            Some(parent) => parent.new_child(Some(&name)),
            None => CorrelationContext::new_root(Some(&name)),
        };
        let context = match context {
            Ok(context) => context,
            Err(error) => {
                correlation::corr_warn!(
                    name: "InstrumentedClient.ContextUnavailable",
                    reason = format!("{error}")
                );
                // Degrade to an uninstrumented send.
                return self.inner.send(request);
            }
        };

        self.propagator
            .inject(&context, &mut HeaderInjector(request.headers_mut()));

        let target = host_of(request.uri());
        let data = if self.config.sanitize_url {
            sanitize_url(&request.uri().to_string(), &self.config.sensitive_query_params)
        } else {
            request.uri().to_string()
        };

        let start = Instant::now();
        let outcome = self.inner.send(request);
        let duration = start.elapsed();

        let telemetry_client = self
            .config
            .telemetry_client
            .clone()
            .or_else(|| carrier.telemetry_client().cloned());
        if let Some(telemetry_client) = telemetry_client {
            let (result_code, success) = match &outcome {
                Ok(response) => (
                    response.status().as_str().to_string(),
                    response.status().as_u16() < 400,
                ),
                // No response reached us, so there is no status to report.
                Err(_) => ("0".to_string(), false),
            };
            telemetry_client.track_dependency(DependencyTelemetry::from_context(
                &context,
                &name,
                DEPENDENCY_TYPE_HTTP,
                target,
                data,
                duration,
                result_code,
                success,
            ));
        }

        outcome
    }
}

fn host_of(uri: &Uri) -> String {
    match uri.host() {
        Some(host) => host.to_string(),
        None => uri.scheme_str().unwrap_or_default().to_string(),
    }
}
