//! Server middleware: correlate inbound requests and emit request telemetry.

use crate::{HeaderExtractor, HeaderInjector};
use bytes::Bytes;
use correlation::telemetry::{Properties, RequestTelemetry, TelemetryClient};
use correlation::{Carrier, CorrelationContext, CorrelationPropagator};
use http::{Request, Response};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

type GetClient =
    dyn Fn(&Request<Bytes>) -> Option<Arc<dyn TelemetryClient>> + Send + Sync + 'static;

/// An inbound request handler.
///
/// The carrier holds the request's correlation context (and telemetry
/// client, when one is configured), so code below the handler can read it
/// without parameter threading.
pub trait Handler: Send + Sync {
    /// Serve one request.
    fn serve(&self, request: Request<Bytes>, carrier: &Carrier) -> Response<Bytes>;
}

impl<F> Handler for F
where
    F: Fn(Request<Bytes>, &Carrier) -> Response<Bytes> + Send + Sync,
{
    fn serve(&self, request: Request<Bytes>, carrier: &Carrier) -> Response<Bytes> {
        self(request, carrier)
    }
}

/// Configuration for [`ServerInstrumentation`].
#[derive(Clone, Default)]
pub struct ServerConfig {
    get_client: Option<Arc<GetClient>>,
}

impl ServerConfig {
    /// Create a config that propagates correlation but emits no request
    /// telemetry.
    pub fn new() -> Self {
        ServerConfig::default()
    }

    /// Emit request telemetry through the given client.
    pub fn with_telemetry_client(self, client: Arc<dyn TelemetryClient>) -> Self {
        self.with_get_client(move |_| Some(client.clone()))
    }

    /// Choose a telemetry client per request.
    ///
    /// Returning `None` disables request telemetry for that request;
    /// correlation headers are still propagated.
    pub fn with_get_client(
        mut self,
        get_client: impl Fn(&Request<Bytes>) -> Option<Arc<dyn TelemetryClient>>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.get_client = Some(Arc::new(get_client));
        self
    }
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("get_client", &self.get_client.is_some())
            .finish()
    }
}

/// Middleware wrapping a [`Handler`] with correlation and request telemetry.
///
/// For every request it extracts the inbound correlation context (W3C first,
/// then legacy) and derives a child for the handler to run under; the span id
/// visible to telemetry emitted inside the handler is distinct from the one
/// the upstream peer injected, which is what identifies this server's
/// contribution to the trace. It stamps `Request-Id` on the response and
/// emits a request item covering status and duration when a telemetry client
/// is configured. A panicking handler is recorded as a failed request and
/// the panic re-raised.
#[derive(Debug)]
pub struct ServerInstrumentation<H> {
    handler: H,
    config: ServerConfig,
    propagator: CorrelationPropagator,
}

impl<H: Handler> ServerInstrumentation<H> {
    /// Wrap a handler with default configuration.
    pub fn new(handler: H) -> Self {
        Self::with_config(handler, ServerConfig::default())
    }

    /// Wrap a handler with the given configuration.
    pub fn with_config(handler: H, config: ServerConfig) -> Self {
        ServerInstrumentation {
            handler,
            config,
            propagator: CorrelationPropagator::new(),
        }
    }

    /// Serve one request through the wrapped handler.
    pub fn serve(&self, request: Request<Bytes>) -> Response<Bytes> {
        let start = Instant::now();
        let operation_name = format!("{} {}", request.method(), request.uri().path());

        let parent = self.propagator.extract(&HeaderExtractor(request.headers()));
        // The handler executes below the caller in the trace, so it always
        // gets a child of whatever arrived, never the inbound context itself.
        let context = match &parent {
            Some(parent) => parent.new_child(Some(&operation_name)),
            None => CorrelationContext::new_root(Some(&operation_name)),
        };
        let context = match context {
            Ok(context) => context,
            Err(error) => {
                correlation::corr_warn!(
                    name: "ServerInstrumentation.ContextUnavailable",
                    reason = format!("{error}")
                );
                // Degrade to serving the request uninstrumented.
                return self.handler.serve(request, &Carrier::new());
            }
        };

        let client = self
            .config
            .get_client
            .as_ref()
            .and_then(|get_client| get_client(&request));

        let mut carrier = Carrier::new().with_correlation(context.clone());
        if let Some(client) = &client {
            carrier = carrier.with_telemetry_client(client.clone());
        }

        let url = request.uri().to_string();
        let outcome =
            panic::catch_unwind(AssertUnwindSafe(|| self.handler.serve(request, &carrier)));
        let duration = start.elapsed();

        match outcome {
            Ok(mut response) => {
                self.propagator
                    .inject_response(&context, &mut HeaderInjector(response.headers_mut()));

                if let Some(client) = client {
                    let status = response.status();
                    let mut item = RequestTelemetry::from_context(
                        &context,
                        &operation_name,
                        &url,
                        duration,
                        status.as_str(),
                        status.as_u16() < 400,
                    );
                    let mut properties = Properties::new();
                    properties
                        .insert("bytesSent".to_string(), response.body().len().to_string());
                    item.properties = properties;
                    client.track_request(item);
                }
                response
            }
            Err(cause) => {
                if let Some(client) = client {
                    let item = RequestTelemetry::from_context(
                        &context,
                        &operation_name,
                        &url,
                        duration,
                        "500",
                        false,
                    );
                    client.track_request(item);
                }
                panic::resume_unwind(cause)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use correlation::telemetry::{OPERATION_ID, OPERATION_PARENT_ID};
    use correlation::testing::CapturingClient;
    use correlation::{SpanId, TraceId};
    use http::StatusCode;
    use std::sync::Mutex;

    fn request(headers: &[(&str, &str)]) -> Request<Bytes> {
        let mut builder = Request::builder().method("GET").uri("http://svc/orders");
        for (key, value) in headers {
            builder = builder.header(*key, *value);
        }
        builder.body(Bytes::new()).unwrap()
    }

    fn capture_context() -> (
        Arc<Mutex<Option<CorrelationContext>>>,
        impl Fn(Request<Bytes>, &Carrier) -> Response<Bytes> + Send + Sync,
    ) {
        let seen = Arc::new(Mutex::new(None));
        let sink = seen.clone();
        let handler = move |_request: Request<Bytes>, carrier: &Carrier| {
            *sink.lock().unwrap() = carrier.correlation().cloned();
            Response::builder()
                .status(StatusCode::OK)
                .body(Bytes::from_static(b"ok"))
                .unwrap()
        };
        (seen, handler)
    }

    #[test]
    fn handler_runs_under_child_of_inbound_context() {
        let (seen, handler) = capture_context();
        let server = ServerInstrumentation::new(handler);

        server.serve(request(&[(
            "traceparent",
            "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01",
        )]));

        let context = seen.lock().unwrap().clone().unwrap();
        assert_eq!(
            context.trace_id(),
            TraceId::from_hex("4bf92f3577b34da6a3ce929d0e0e4736").unwrap()
        );
        assert_eq!(
            context.parent_span_id(),
            Some(SpanId::from_hex("00f067aa0ba902b7").unwrap())
        );
        assert_ne!(
            context.span_id(),
            SpanId::from_hex("00f067aa0ba902b7").unwrap()
        );
        assert!(context.is_sampled());
    }

    #[test]
    fn missing_headers_mint_a_root() {
        let (seen, handler) = capture_context();
        let server = ServerInstrumentation::new(handler);

        server.serve(request(&[]));

        let context = seen.lock().unwrap().clone().unwrap();
        assert!(context.trace_id().is_valid());
        assert_eq!(context.parent_span_id(), None);
        assert_eq!(context.operation_name(), Some("GET /orders"));
    }

    #[test]
    fn response_carries_request_id() {
        let (_seen, handler) = capture_context();
        let server = ServerInstrumentation::new(handler);

        let response = server.serve(request(&[(
            "request-id",
            "|abcdef0123456789abcdef0123456789.abcdef0123456789.",
        )]));

        let request_id = response.headers().get("request-id").unwrap().to_str().unwrap();
        assert!(request_id.starts_with("|abcdef0123456789abcdef0123456789."));
    }

    #[test]
    fn request_telemetry_reflects_status_and_context() {
        let client = Arc::new(CapturingClient::default());
        let handler = |_request: Request<Bytes>, _carrier: &Carrier| {
            Response::builder()
                .status(StatusCode::NOT_FOUND)
                .body(Bytes::from_static(b"missing"))
                .unwrap()
        };
        let server = ServerInstrumentation::with_config(
            handler,
            ServerConfig::new().with_telemetry_client(client.clone()),
        );

        server.serve(request(&[(
            "traceparent",
            "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01",
        )]));

        let items = client.requests();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].response_code, "404");
        assert!(!items[0].success);
        assert_eq!(items[0].name, "GET /orders");
        assert_eq!(
            items[0].tags[OPERATION_ID],
            "4bf92f3577b34da6a3ce929d0e0e4736"
        );
        assert_eq!(items[0].tags[OPERATION_PARENT_ID], "00f067aa0ba902b7");
        assert_eq!(items[0].properties["bytesSent"], "7");
    }

    #[test]
    fn panicking_handler_is_recorded_and_re_raised() {
        let client = Arc::new(CapturingClient::default());
        let handler =
            |_request: Request<Bytes>, _carrier: &Carrier| -> Response<Bytes> { panic!("boom") };
        let server = ServerInstrumentation::with_config(
            handler,
            ServerConfig::new().with_telemetry_client(client.clone()),
        );

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| server.serve(request(&[]))));
        assert!(outcome.is_err());

        let items = client.requests();
        assert_eq!(items.len(), 1);
        assert!(!items[0].success);
        assert_eq!(items[0].response_code, "500");
    }

    #[test]
    fn get_client_hook_can_disable_telemetry() {
        let client = Arc::new(CapturingClient::default());
        let hook_client = client.clone();
        let (_seen, handler) = capture_context();
        let server = ServerInstrumentation::with_config(
            handler,
            ServerConfig::new().with_get_client(move |request| {
                (request.uri().path() != "/orders").then(|| {
                    hook_client.clone() as Arc<dyn TelemetryClient>
                })
            }),
        );

        server.serve(request(&[]));
        assert!(client.requests().is_empty());
    }
}
