//! Telemetry items and the rules binding them to the ambient correlation
//! context.
//!
//! Only the shape the correlation core populates lives here: names, ids,
//! durations, outcome fields, and the operation tags. Serializing items onto
//! the wire and shipping them is the transmission channel's concern, reached
//! through the [`TelemetryClient`] trait.

use crate::carrier::Carrier;
use crate::context::CorrelationContext;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Tag key grouping all telemetry of one trace; holds the trace id.
pub const OPERATION_ID: &str = "OperationId";

/// Tag key linking an item to the span during which it was emitted.
pub const OPERATION_PARENT_ID: &str = "OperationParentId";

/// Tag key carrying the logical operation name.
pub const OPERATION_NAME: &str = "OperationName";

/// Correlation tags attached to an envelope.
pub type ContextTags = HashMap<&'static str, String>;

/// Free-form custom properties attached to an item.
pub type Properties = HashMap<String, String>;

/// Build the operation tags for an item emitted under the given carrier.
///
/// With an ambient context, the operation id is the trace id and the parent
/// is the current span. Without one, the operation id is a freshly minted
/// UUID (legacy code paths expect UUID-shaped operation ids when nothing is
/// being correlated) and parent and name are omitted.
pub fn operation_tags(carrier: &Carrier) -> ContextTags {
    let mut tags = ContextTags::new();
    match carrier.correlation() {
        Some(context) => {
            tags.insert(OPERATION_ID, context.trace_id().to_string());
            tags.insert(OPERATION_PARENT_ID, context.span_id().to_string());
            if let Some(name) = context.operation_name() {
                tags.insert(OPERATION_NAME, name.to_string());
            }
        }
        None => {
            tags.insert(OPERATION_ID, Uuid::new_v4().to_string());
        }
    }
    tags
}

fn span_tags(context: &CorrelationContext) -> ContextTags {
    let mut tags = ContextTags::new();
    tags.insert(OPERATION_ID, context.trace_id().to_string());
    if let Some(parent) = context.parent_span_id() {
        tags.insert(OPERATION_PARENT_ID, parent.to_string());
    }
    if let Some(name) = context.operation_name() {
        tags.insert(OPERATION_NAME, name.to_string());
    }
    tags
}

/// A record describing a call this service served.
#[derive(Clone, Debug, Default)]
pub struct RequestTelemetry {
    /// Identifier of the request; the span id when built from a context.
    pub id: String,
    /// Logical name, conventionally `METHOD path`.
    pub name: String,
    /// The request URL.
    pub url: String,
    /// Wall-clock time spent serving the request.
    pub duration: Duration,
    /// HTTP status as a decimal string.
    pub response_code: String,
    /// Whether the request is considered successful.
    pub success: bool,
    /// Custom properties.
    pub properties: Properties,
    /// Correlation tags.
    pub tags: ContextTags,
}

impl RequestTelemetry {
    /// Build a request item representing the span of the given context.
    ///
    /// The item's own id is the context's span id, so the item corresponds
    /// to the span itself rather than being a child of it; the parent tag is
    /// the context's parent span.
    pub fn from_context(
        context: &CorrelationContext,
        name: impl Into<String>,
        url: impl Into<String>,
        duration: Duration,
        response_code: impl Into<String>,
        success: bool,
    ) -> Self {
        RequestTelemetry {
            id: context.span_id().to_string(),
            name: name.into(),
            url: url.into(),
            duration,
            response_code: response_code.into(),
            success,
            properties: Properties::new(),
            tags: span_tags(context),
        }
    }

    /// Build a request item bound to whatever the carrier holds.
    pub fn from_carrier(
        carrier: &Carrier,
        name: impl Into<String>,
        url: impl Into<String>,
        duration: Duration,
        response_code: impl Into<String>,
        success: bool,
    ) -> Self {
        match carrier.correlation() {
            Some(context) => {
                Self::from_context(context, name, url, duration, response_code, success)
            }
            None => RequestTelemetry {
                id: String::new(),
                name: name.into(),
                url: url.into(),
                duration,
                response_code: response_code.into(),
                success,
                properties: Properties::new(),
                tags: operation_tags(carrier),
            },
        }
    }
}

/// A record describing a call this service made to another.
#[derive(Clone, Debug, Default)]
pub struct DependencyTelemetry {
    /// Identifier of the dependency call; the span id when built from a
    /// context.
    pub id: String,
    /// Logical name, conventionally `METHOD path`.
    pub name: String,
    /// Kind of dependency, e.g. `Http` or `InProc`.
    pub dependency_type: String,
    /// The site of the dependency, conventionally the host.
    pub target: String,
    /// Command or URL issued; sanitized before it lands here.
    pub data: String,
    /// Wall-clock time spent on the call.
    pub duration: Duration,
    /// Status code as a decimal string; `"0"` for transport failures.
    pub result_code: String,
    /// Whether the call is considered successful.
    pub success: bool,
    /// Custom properties.
    pub properties: Properties,
    /// Correlation tags.
    pub tags: ContextTags,
}

impl DependencyTelemetry {
    /// Build a dependency item representing the span of the given context.
    ///
    /// As with [`RequestTelemetry::from_context`], the item's id is the
    /// context's span id and the parent tag is the context's parent; for an
    /// outbound call made under a caller's span, that renders the dependency
    /// as belonging to the caller.
    #[allow(clippy::too_many_arguments)]
    pub fn from_context(
        context: &CorrelationContext,
        name: impl Into<String>,
        dependency_type: impl Into<String>,
        target: impl Into<String>,
        data: impl Into<String>,
        duration: Duration,
        result_code: impl Into<String>,
        success: bool,
    ) -> Self {
        DependencyTelemetry {
            id: context.span_id().to_string(),
            name: name.into(),
            dependency_type: dependency_type.into(),
            target: target.into(),
            data: data.into(),
            duration,
            result_code: result_code.into(),
            success,
            properties: Properties::new(),
            tags: span_tags(context),
        }
    }
}

/// Destination for finished telemetry items.
///
/// Implementations own queueing and transmission. Emission through this
/// trait is fire-and-forget: it must not block, and failures (queue full,
/// transport down) stay inside the implementation; they are never
/// propagated to instrumented code.
pub trait TelemetryClient: fmt::Debug + Send + Sync {
    /// Record a served request.
    fn track_request(&self, item: RequestTelemetry);

    /// Record a call made to another service.
    fn track_dependency(&self, item: DependencyTelemetry);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextBuilder;

    #[test]
    fn tags_under_context() {
        let context = ContextBuilder::new()
            .with_operation_name("GET /users")
            .build()
            .unwrap();
        let carrier = Carrier::new().with_correlation(context.clone());

        let tags = operation_tags(&carrier);
        assert_eq!(tags[OPERATION_ID], context.trace_id().to_string());
        assert_eq!(tags[OPERATION_PARENT_ID], context.span_id().to_string());
        assert_eq!(tags[OPERATION_NAME], "GET /users");
    }

    #[test]
    fn tags_without_context_fall_back_to_uuid() {
        let tags = operation_tags(&Carrier::new());

        let operation_id = &tags[OPERATION_ID];
        assert!(Uuid::parse_str(operation_id).is_ok(), "{operation_id}");
        assert!(!tags.contains_key(OPERATION_PARENT_ID));
        assert!(!tags.contains_key(OPERATION_NAME));
    }

    #[test]
    fn operation_name_omitted_when_empty() {
        let context = ContextBuilder::new().build().unwrap();
        let carrier = Carrier::new().with_correlation(context);

        assert!(!operation_tags(&carrier).contains_key(OPERATION_NAME));
    }

    #[test]
    fn request_item_without_context_gets_uuid_operation_id() {
        let item = RequestTelemetry::from_carrier(
            &Carrier::new(),
            "GET /",
            "http://localhost/",
            Duration::from_millis(1),
            "200",
            true,
        );

        assert!(Uuid::parse_str(&item.tags[OPERATION_ID]).is_ok());
        assert!(!item.tags.contains_key(OPERATION_PARENT_ID));
        assert!(item.id.is_empty());
    }

    #[test]
    fn request_item_corresponds_to_its_span() {
        let parent = CorrelationContext::new_root(Some("GET /")).unwrap();
        let child = parent.new_child(Some("GET /")).unwrap();

        let item = RequestTelemetry::from_context(
            &child,
            "GET /",
            "http://localhost/",
            Duration::from_millis(12),
            "200",
            true,
        );

        assert_eq!(item.id, child.span_id().to_string());
        assert_eq!(item.tags[OPERATION_ID], child.trace_id().to_string());
        assert_eq!(
            item.tags[OPERATION_PARENT_ID],
            parent.span_id().to_string()
        );
    }

    #[test]
    fn dependency_item_belongs_to_the_caller_span() {
        let caller = CorrelationContext::new_root(Some("GET /")).unwrap();
        let outbound = caller.new_child(None).unwrap();

        let item = DependencyTelemetry::from_context(
            &outbound,
            "GET /v1",
            "Http",
            "api.example.com",
            "https://api.example.com/v1",
            Duration::from_millis(3),
            "200",
            true,
        );

        assert_eq!(item.id, outbound.span_id().to_string());
        assert_eq!(item.tags[OPERATION_PARENT_ID], caller.span_id().to_string());
    }
}
