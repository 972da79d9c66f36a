//! Span primitives: explicit begin/finish pairs for units of work.

use crate::carrier::Carrier;
use crate::context::CorrelationContext;
use crate::error::CorrelationError;
use crate::telemetry::{DependencyTelemetry, Properties, RequestTelemetry};
use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;

const INPROC_TYPE: &str = "InProc";

/// A started unit of work, finished by emitting a dependency item.
///
/// Created by [`start_span`]; the caller decides success and supplies any
/// extra properties at finish time.
#[derive(Debug)]
pub struct Span {
    context: CorrelationContext,
    name: String,
    start: Instant,
}

/// A started server-side operation, finished by emitting a request item.
///
/// Same shape as [`Span`], used when the span IS the operation being served
/// rather than work performed on behalf of one.
#[derive(Debug)]
pub struct Operation {
    context: CorrelationContext,
    name: String,
    start: Instant,
}

/// Start a span under the carrier's current context.
///
/// Derives a child of the ambient context (or a root when there is none),
/// attaches it, and returns the derived carrier for the work to run under
/// along with the span handle. The input carrier is unchanged.
pub fn start_span(carrier: &Carrier, name: &str) -> Result<(Carrier, Span), CorrelationError> {
    let context = match carrier.correlation() {
        Some(parent) => parent.new_child(Some(name))?,
        None => CorrelationContext::new_root(Some(name))?,
    };
    let span = Span {
        context: context.clone(),
        name: name.to_string(),
        start: Instant::now(),
    };
    Ok((carrier.with_correlation(context), span))
}

/// Start an operation under the carrier's current context.
pub fn start_operation(
    carrier: &Carrier,
    name: &str,
) -> Result<(Carrier, Operation), CorrelationError> {
    let context = match carrier.correlation() {
        Some(parent) => parent.new_child(Some(name))?,
        None => CorrelationContext::new_root(Some(name))?,
    };
    let operation = Operation {
        context: context.clone(),
        name: name.to_string(),
        start: Instant::now(),
    };
    Ok((carrier.with_correlation(context), operation))
}

impl Span {
    /// The context the span's work runs under.
    pub fn context(&self) -> &CorrelationContext {
        &self.context
    }

    /// Finish the span, emitting an in-process dependency item through the
    /// carrier's telemetry client.
    ///
    /// Emission is best-effort: without a client on the carrier this is a
    /// no-op.
    pub fn finish(self, carrier: &Carrier, success: bool, properties: Properties) {
        let Some(client) = carrier.telemetry_client() else {
            return;
        };
        let mut item = DependencyTelemetry::from_context(
            &self.context,
            &self.name,
            INPROC_TYPE,
            "",
            "",
            self.start.elapsed(),
            "",
            success,
        );
        item.properties = properties;
        client.track_dependency(item);
    }
}

impl Operation {
    /// The context the operation's work runs under.
    pub fn context(&self) -> &CorrelationContext {
        &self.context
    }

    /// Finish the operation, emitting a request item through the carrier's
    /// telemetry client.
    pub fn finish(self, carrier: &Carrier, success: bool, properties: Properties) {
        let Some(client) = carrier.telemetry_client() else {
            return;
        };
        let response_code = if success { "200" } else { "500" };
        let mut item = RequestTelemetry::from_context(
            &self.context,
            &self.name,
            "",
            self.start.elapsed(),
            response_code,
            success,
        );
        item.properties = properties;
        client.track_request(item);
    }
}

/// Run `f` under a started span, finishing it on return.
///
/// A panic inside `f` finishes the span with `success = false` and is then
/// re-raised, so the surrounding runtime's crash handling is preserved.
pub fn with_span<T>(
    carrier: &Carrier,
    name: &str,
    f: impl FnOnce(&Carrier) -> T,
) -> Result<T, CorrelationError> {
    let (scoped, span) = start_span(carrier, name)?;
    match panic::catch_unwind(AssertUnwindSafe(|| f(&scoped))) {
        Ok(value) => {
            span.finish(&scoped, true, Properties::new());
            Ok(value)
        }
        Err(cause) => {
            span.finish(&scoped, false, Properties::new());
            panic::resume_unwind(cause)
        }
    }
}
