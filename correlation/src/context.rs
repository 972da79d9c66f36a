//! The correlation context: the in-memory record of the current operation.

use crate::carrier::Carrier;
use crate::error::{CorrelationError, PropagationError};
use crate::id_generator::{non_zero_span_id, non_zero_trace_id, IdGenerator, RandomIdGenerator};
use crate::trace_context::{is_valid_trace_id, SpanId, TraceFlags, TraceId};

const SUPPORTED_VERSION: &str = "00";

/// In-memory record of the current operation's identity within a trace.
///
/// A context is frozen once constructed: derivation ([`new_child`]) and
/// attachment ([`Carrier::with_correlation`]) always produce fresh values,
/// never mutate one that has already been published. This is what makes
/// sharing a context by reference across threads safe without locking.
///
/// Two wire encodings are supported: the W3C `traceparent` form
/// (`00-<trace>-<span>-<flags>`) and the legacy hierarchical `Request-Id`
/// form (`|<trace>.<span>.`). A context extracted from a legacy header keeps
/// the upstream string verbatim in [`legacy_request_id`] so it can be
/// reproduced on egress.
///
/// [`new_child`]: CorrelationContext::new_child
/// [`legacy_request_id`]: CorrelationContext::legacy_request_id
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CorrelationContext {
    trace_id: TraceId,
    span_id: SpanId,
    parent_span_id: Option<SpanId>,
    trace_flags: TraceFlags,
    operation_name: Option<String>,
    legacy_request_id: Option<String>,
}

impl CorrelationContext {
    /// Start a new trace with a fresh trace id and span id.
    ///
    /// Fails only if the random source keeps producing all-zero ids.
    pub fn new_root(operation_name: Option<&str>) -> Result<Self, CorrelationError> {
        Self::root_with_generator(&RandomIdGenerator::default(), operation_name)
    }

    pub(crate) fn root_with_generator(
        generator: &dyn IdGenerator,
        operation_name: Option<&str>,
    ) -> Result<Self, CorrelationError> {
        Ok(CorrelationContext {
            trace_id: non_zero_trace_id(generator)?,
            span_id: non_zero_span_id(generator)?,
            parent_span_id: None,
            trace_flags: TraceFlags::default(),
            operation_name: operation_name.map(str::to_string),
            legacy_request_id: None,
        })
    }

    /// Derive a child context for a new unit of work below this one.
    ///
    /// The child shares this context's trace id and flags, gets a freshly
    /// generated span id, and records this context's span id as its parent.
    /// The operation name comes from the caller, not the parent; the legacy
    /// request id is not inherited (the child is a new span, so reproducing
    /// the upstream string for it would be wrong).
    pub fn new_child(&self, operation_name: Option<&str>) -> Result<Self, CorrelationError> {
        self.child_with_generator(&RandomIdGenerator::default(), operation_name)
    }

    pub(crate) fn child_with_generator(
        &self,
        generator: &dyn IdGenerator,
        operation_name: Option<&str>,
    ) -> Result<Self, CorrelationError> {
        Ok(CorrelationContext {
            trace_id: self.trace_id,
            span_id: non_zero_span_id(generator)?,
            parent_span_id: Some(self.span_id),
            trace_flags: self.trace_flags,
            operation_name: operation_name.map(str::to_string),
            legacy_request_id: None,
        })
    }

    /// The trace id shared by every span of this operation.
    ///
    /// This is also the operation id used to group telemetry.
    pub fn trace_id(&self) -> TraceId {
        self.trace_id
    }

    /// The id of the current span.
    pub fn span_id(&self) -> SpanId {
        self.span_id
    }

    /// The id of the parent span, or `None` for a root.
    pub fn parent_span_id(&self) -> Option<SpanId> {
        self.parent_span_id
    }

    /// Flags propagated with the trace.
    pub fn trace_flags(&self) -> TraceFlags {
        self.trace_flags
    }

    /// Returns `true` if the `sampled` trace flag is set.
    pub fn is_sampled(&self) -> bool {
        self.trace_flags.is_sampled()
    }

    /// Label of the logical unit of work, when one was assigned.
    pub fn operation_name(&self) -> Option<&str> {
        self.operation_name.as_deref()
    }

    /// The hierarchical string received from a legacy-format upstream,
    /// retained verbatim.
    pub fn legacy_request_id(&self) -> Option<&str> {
        self.legacy_request_id.as_deref()
    }

    /// Render the W3C `traceparent` form: `00-<trace>-<span>-<flags>`.
    pub fn to_traceparent(&self) -> String {
        format!(
            "{}-{}-{}-{:02x}",
            SUPPORTED_VERSION, self.trace_id, self.span_id, self.trace_flags
        )
    }

    /// Parse a W3C `traceparent` header value.
    ///
    /// Strict by design: exactly four dash-separated fields, version exactly
    /// `00` (future versions must not be accepted here), lowercase hex ids of
    /// exact length, neither id all zeros. The returned context carries the
    /// wire span id and an empty parent; only bit 0 of the flags is
    /// interpreted but the full byte is preserved.
    pub fn from_traceparent(header: &str) -> Result<Self, PropagationError> {
        let parts = header.trim().split('-').collect::<Vec<&str>>();
        if parts.len() != 4 {
            return Err(PropagationError::FieldCount(parts.len()));
        }
        if parts[0] != SUPPORTED_VERSION {
            return Err(PropagationError::UnsupportedVersion(parts[0].to_string()));
        }

        let trace_id =
            TraceId::from_hex(parts[1]).map_err(|_| PropagationError::InvalidTraceId)?;
        let span_id = SpanId::from_hex(parts[2]).map_err(|_| PropagationError::InvalidSpanId)?;

        if parts[3].len() != 2
            || !parts[3]
                .bytes()
                .all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
        {
            return Err(PropagationError::InvalidTraceFlags);
        }
        let flags = u8::from_str_radix(parts[3], 16)
            .map_err(|_| PropagationError::InvalidTraceFlags)?;

        Ok(CorrelationContext {
            trace_id,
            span_id,
            parent_span_id: None,
            trace_flags: TraceFlags::new(flags),
            operation_name: None,
            legacy_request_id: None,
        })
    }

    /// Render the legacy `Request-Id` form: `|<trace>.<span>.`.
    ///
    /// If an upstream-chosen hierarchy was received, it is emitted verbatim
    /// instead, preserving round-trip fidelity.
    pub fn to_request_id(&self) -> String {
        match &self.legacy_request_id {
            Some(id) => id.clone(),
            None => format!("|{}.{}.", self.trace_id, self.span_id),
        }
    }

    /// Parse a legacy `Request-Id` header value.
    ///
    /// Lenient by policy, because upstream-generated strings in production
    /// are heterogeneous: a single leading `|` is stripped, the substring up
    /// to the first `.` is the trace root, and its leading 32 hex characters
    /// become the trace id. Anything else gets a freshly minted trace id
    /// rather than an error. The span id is always fresh, the parent empty,
    /// the flags zero, and the input is retained verbatim for egress.
    ///
    /// Tightening this parser breaks compatibility with existing upstreams;
    /// the only failure mode is exhaustion of the random source.
    pub fn from_request_id(header: &str) -> Result<Self, CorrelationError> {
        Self::request_id_with_generator(&RandomIdGenerator::default(), header)
    }

    pub(crate) fn request_id_with_generator(
        generator: &dyn IdGenerator,
        header: &str,
    ) -> Result<Self, CorrelationError> {
        let stripped = header.strip_prefix('|').unwrap_or(header);
        let root = stripped.split('.').next().unwrap_or("");

        let trace_id = match root.get(..32) {
            Some(head) if is_valid_trace_id(head) => {
                TraceId::from_hex(head).map_err(|_| PropagationError::InvalidTraceId)?
            }
            _ => {
                crate::corr_debug!(name: "CorrelationContext.LegacyTraceRootUnusable");
                non_zero_trace_id(generator)?
            }
        };

        Ok(CorrelationContext {
            trace_id,
            span_id: non_zero_span_id(generator)?,
            parent_span_id: None,
            trace_flags: TraceFlags::default(),
            operation_name: None,
            legacy_request_id: (!header.is_empty()).then(|| header.to_string()),
        })
    }
}

/// Mutable local scratch space for assembling a [`CorrelationContext`].
///
/// A builder is single-threaded by contract; once [`build`] freezes it into a
/// context, the result is shareable.
///
/// [`build`]: ContextBuilder::build
///
/// # Examples
///
/// ```
/// use correlation::ContextBuilder;
///
/// let cx = ContextBuilder::new()
///     .with_operation_name("GET /checkout")
///     .with_sampled(true)
///     .build()
///     .unwrap();
///
/// assert!(cx.is_sampled());
/// assert_eq!(cx.operation_name(), Some("GET /checkout"));
/// ```
#[derive(Debug, Default)]
pub struct ContextBuilder<'a> {
    trace_id: Option<TraceId>,
    span_id: Option<SpanId>,
    parent_span_id: Option<SpanId>,
    trace_flags: TraceFlags,
    sampled: Option<bool>,
    operation_name: Option<String>,
    id_generator: Option<&'a dyn IdGenerator>,
}

impl<'a> ContextBuilder<'a> {
    /// Create a builder with nothing assigned; unset ids are generated at
    /// build time.
    pub fn new() -> Self {
        ContextBuilder::default()
    }

    /// Assign the operation name.
    pub fn with_operation_name(mut self, name: impl Into<String>) -> Self {
        self.operation_name = Some(name.into());
        self
    }

    /// Set or clear the `sampled` bit of the trace flags.
    ///
    /// An explicit setting wins over flags inherited from a carrier's parent
    /// context in [`build_with_carrier`].
    ///
    /// [`build_with_carrier`]: ContextBuilder::build_with_carrier
    pub fn with_sampled(mut self, sampled: bool) -> Self {
        self.sampled = Some(sampled);
        self
    }

    /// Use an explicit trace id instead of a generated one.
    pub fn with_trace_id(mut self, trace_id: TraceId) -> Self {
        self.trace_id = Some(trace_id);
        self
    }

    /// Use an explicit span id instead of a generated one.
    pub fn with_span_id(mut self, span_id: SpanId) -> Self {
        self.span_id = Some(span_id);
        self
    }

    /// Record a parent span id.
    pub fn with_parent_span_id(mut self, parent_span_id: SpanId) -> Self {
        self.parent_span_id = Some(parent_span_id);
        self
    }

    /// Generate any unset ids from the given source instead of the default
    /// random one.
    pub fn with_id_generator(mut self, generator: &'a dyn IdGenerator) -> Self {
        self.id_generator = Some(generator);
        self
    }

    /// Freeze the builder into a context, generating any unset ids.
    pub fn build(self) -> Result<CorrelationContext, CorrelationError> {
        let default_generator = RandomIdGenerator::default();
        let generator: &dyn IdGenerator = self.id_generator.unwrap_or(&default_generator);

        // An explicit sampling choice is applied last, over any inherited
        // flag bits.
        let trace_flags = match self.sampled {
            Some(sampled) => self.trace_flags.with_sampled(sampled),
            None => self.trace_flags,
        };

        Ok(CorrelationContext {
            trace_id: match self.trace_id {
                Some(id) => id,
                None => non_zero_trace_id(generator)?,
            },
            span_id: match self.span_id {
                Some(id) => id,
                None => non_zero_span_id(generator)?,
            },
            parent_span_id: self.parent_span_id,
            trace_flags,
            operation_name: self.operation_name,
            legacy_request_id: None,
        })
    }

    /// Build a context scoped under the carrier's current one and attach it.
    ///
    /// When the carrier already holds a context, the result is a child of it
    /// (trace id, flags, and parentage inherited unless explicitly
    /// overridden); otherwise a root. Returns the derived carrier along with
    /// the context; the original carrier is unchanged.
    pub fn build_with_carrier(
        mut self,
        carrier: &Carrier,
    ) -> Result<(Carrier, CorrelationContext), CorrelationError> {
        if let Some(parent) = carrier.correlation() {
            if self.trace_id.is_none() {
                self.trace_id = Some(parent.trace_id());
            }
            if self.parent_span_id.is_none() {
                self.parent_span_id = Some(parent.span_id());
            }
            self.trace_flags = self.trace_flags | parent.trace_flags();
        }
        let context = self.build()?;
        Ok((carrier.with_correlation(context.clone()), context))
    }
}
