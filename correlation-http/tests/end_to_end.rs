//! Exercises the full ingress to egress path: server middleware extracting
//! inbound headers, a handler making an outbound call through the
//! instrumented client, and the telemetry both sides emit.

use bytes::Bytes;
use correlation::telemetry::{OPERATION_ID, OPERATION_PARENT_ID};
use correlation::testing::CapturingClient;
use correlation::{Carrier, CorrelationContext, SpanId, TraceId};
use correlation_http::{
    HttpClient, HttpError, InstrumentedClient, ServerConfig, ServerInstrumentation,
};
use http::{Request, Response, StatusCode};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

#[derive(Debug, Default)]
struct RecordingTransport {
    fail: bool,
    delay: Option<Duration>,
    seen: Mutex<Vec<http::HeaderMap>>,
}

impl RecordingTransport {
    fn headers(&self) -> Vec<http::HeaderMap> {
        self.seen.lock().unwrap().clone()
    }
}

impl HttpClient for RecordingTransport {
    fn send(&self, request: Request<Bytes>) -> Result<Response<Bytes>, HttpError> {
        self.seen.lock().unwrap().push(request.headers().clone());
        if let Some(delay) = self.delay {
            thread::sleep(delay);
        }
        if self.fail {
            return Err("connection reset".into());
        }
        Ok(Response::builder()
            .status(StatusCode::OK)
            .body(Bytes::new())
            .unwrap())
    }
}

fn inbound(headers: &[(&str, &str)]) -> Request<Bytes> {
    let mut builder = Request::builder().method("GET").uri("http://svc/orders");
    for (key, value) in headers {
        builder = builder.header(*key, *value);
    }
    builder.body(Bytes::new()).unwrap()
}

fn ok_response() -> Response<Bytes> {
    Response::builder()
        .status(StatusCode::OK)
        .body(Bytes::new())
        .unwrap()
}

/// A handler that forwards every request downstream through an instrumented
/// client sharing one transport.
fn forwarding_stack(
    transport: Arc<RecordingTransport>,
    telemetry: Arc<CapturingClient>,
) -> ServerInstrumentation<impl Fn(Request<Bytes>, &Carrier) -> Response<Bytes> + Send + Sync> {
    #[derive(Debug)]
    struct Shared(Arc<RecordingTransport>);
    impl HttpClient for Shared {
        fn send(&self, request: Request<Bytes>) -> Result<Response<Bytes>, HttpError> {
            self.0.send(request)
        }
    }

    let client = InstrumentedClient::new(Shared(transport));
    let handler = move |_request: Request<Bytes>, carrier: &Carrier| {
        let downstream = Request::builder()
            .method("GET")
            .uri("http://downstream/items")
            .body(Bytes::new())
            .unwrap();
        let _ = client.send(carrier, downstream);
        ok_response()
    };
    ServerInstrumentation::with_config(
        handler,
        ServerConfig::new().with_telemetry_client(telemetry),
    )
}

#[test]
fn w3c_ingress_flows_through_to_egress() {
    let transport = Arc::new(RecordingTransport::default());
    let telemetry = Arc::new(CapturingClient::default());
    let server = forwarding_stack(transport.clone(), telemetry.clone());

    let response = server.serve(inbound(&[(
        "traceparent",
        "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01",
    )]));
    assert_eq!(response.status(), StatusCode::OK);

    // The outbound hop carries the same trace with a span minted here.
    let headers = transport.headers();
    let outbound =
        CorrelationContext::from_traceparent(headers[0].get("traceparent").unwrap().to_str().unwrap())
            .unwrap();
    assert_eq!(
        outbound.trace_id(),
        TraceId::from_hex("4bf92f3577b34da6a3ce929d0e0e4736").unwrap()
    );
    assert_ne!(
        outbound.span_id(),
        SpanId::from_hex("00f067aa0ba902b7").unwrap()
    );
    assert!(outbound.is_sampled());

    // Both the request and its downstream dependency land in one operation.
    let requests = telemetry.requests();
    let dependencies = telemetry.dependencies();
    assert_eq!(requests.len(), 1);
    assert_eq!(dependencies.len(), 1);
    assert_eq!(
        requests[0].tags[OPERATION_ID],
        "4bf92f3577b34da6a3ce929d0e0e4736"
    );
    assert_eq!(
        dependencies[0].tags[OPERATION_ID],
        "4bf92f3577b34da6a3ce929d0e0e4736"
    );
    assert_eq!(requests[0].tags[OPERATION_PARENT_ID], "00f067aa0ba902b7");
    // The dependency hangs off the server's span.
    assert_eq!(dependencies[0].tags[OPERATION_PARENT_ID], requests[0].id);
}

#[test]
fn legacy_ingress_is_honored_and_echoed() {
    let transport = Arc::new(RecordingTransport::default());
    let telemetry = Arc::new(CapturingClient::default());
    let server = forwarding_stack(transport, telemetry.clone());

    let response = server.serve(inbound(&[(
        "request-id",
        "|abcdef0123456789abcdef0123456789.00f067aa0ba902b7.",
    )]));

    let echoed = response
        .headers()
        .get("request-id")
        .unwrap()
        .to_str()
        .unwrap();
    assert!(echoed.starts_with("|abcdef0123456789abcdef0123456789."));
    assert_eq!(
        telemetry.requests()[0].tags[OPERATION_ID],
        "abcdef0123456789abcdef0123456789"
    );
}

#[test]
fn malformed_traceparent_falls_back_to_legacy() {
    let transport = Arc::new(RecordingTransport::default());
    let telemetry = Arc::new(CapturingClient::default());
    let server = forwarding_stack(transport, telemetry.clone());

    server.serve(inbound(&[
        ("traceparent", "00-GARBAGE-00f067aa0ba902b7-01"),
        (
            "request-id",
            "|abcdef0123456789abcdef0123456789.00f067aa0ba902b7.",
        ),
    ]));

    assert_eq!(
        telemetry.requests()[0].tags[OPERATION_ID],
        "abcdef0123456789abcdef0123456789"
    );
}

#[test]
fn egress_carries_both_header_formats() {
    let transport = Arc::new(RecordingTransport::default());
    let telemetry = Arc::new(CapturingClient::default());
    let server = forwarding_stack(transport.clone(), telemetry);

    server.serve(inbound(&[]));

    let headers = transport.headers();
    let traceparent = headers[0].get("traceparent").unwrap().to_str().unwrap();
    let request_id = headers[0].get("request-id").unwrap().to_str().unwrap();

    let outbound = CorrelationContext::from_traceparent(traceparent).unwrap();
    assert_eq!(
        request_id,
        format!("|{}.{}.", outbound.trace_id(), outbound.span_id())
    );
}

#[test]
fn failed_downstream_call_records_a_failed_dependency() {
    let telemetry = Arc::new(CapturingClient::default());
    let transport = Arc::new(RecordingTransport {
        fail: true,
        delay: Some(Duration::from_millis(5)),
        ..RecordingTransport::default()
    });
    let server = forwarding_stack(transport, telemetry.clone());

    server.serve(inbound(&[]));

    let dependencies = telemetry.dependencies();
    assert_eq!(dependencies.len(), 1);
    assert!(!dependencies[0].success);
    assert_eq!(dependencies[0].result_code, "0");
    assert!(dependencies[0].duration >= Duration::from_millis(5));
    // The server itself still answered normally.
    assert!(telemetry.requests()[0].success);
}
