//! The request-scoped value bag that carries the correlation context.

use crate::context::CorrelationContext;
use crate::telemetry::TelemetryClient;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::hash::{BuildHasherDefault, Hasher};
use std::sync::Arc;

/// An immutable, request-scoped collection of values.
///
/// A `Carrier` is passed explicitly as the first argument to every
/// instrumented API, so callees can read the current correlation context
/// without parameter threading and without thread-local globals (which break
/// under fan-out). Write operations derive a new carrier containing the
/// original values plus the new one; the original is never mutated, which
/// makes concurrent reads safe with no locking and keeps a carrier correct
/// when cloned across task boundaries.
///
/// # Examples
///
/// ```
/// use correlation::{Carrier, CorrelationContext};
///
/// let cx = CorrelationContext::new_root(Some("GET /")).unwrap();
/// let carrier = Carrier::new().with_correlation(cx.clone());
///
/// assert_eq!(carrier.correlation(), Some(&cx));
/// assert_eq!(Carrier::new().correlation(), None);
/// ```
#[derive(Clone, Default)]
pub struct Carrier {
    correlation: Option<Arc<CorrelationContext>>,
    entries: Option<Arc<EntryMap>>,
}

type EntryMap = HashMap<TypeId, Arc<dyn Any + Sync + Send>, BuildHasherDefault<IdHasher>>;

struct ClientEntry(Arc<dyn TelemetryClient>);

impl Carrier {
    /// Creates an empty `Carrier`.
    ///
    /// Allocates nothing until a value is attached.
    pub fn new() -> Self {
        Carrier::default()
    }

    /// The most recently attached correlation context, if any.
    pub fn correlation(&self) -> Option<&CorrelationContext> {
        self.correlation.as_deref()
    }

    /// Returns a derived carrier holding the given correlation context.
    pub fn with_correlation(&self, context: CorrelationContext) -> Self {
        Carrier {
            correlation: Some(Arc::new(context)),
            entries: self.entries.clone(),
        }
    }

    /// Returns a derived carrier holding a telemetry client for span
    /// primitives and instrumented code to emit through.
    pub fn with_telemetry_client(&self, client: Arc<dyn TelemetryClient>) -> Self {
        self.with_value(ClientEntry(client))
    }

    /// The attached telemetry client, if any.
    pub fn telemetry_client(&self) -> Option<&Arc<dyn TelemetryClient>> {
        self.get::<ClientEntry>().map(|entry| &entry.0)
    }

    /// Returns a reference to the entry for the corresponding value type.
    pub fn get<T: 'static>(&self) -> Option<&T> {
        self.entries
            .as_ref()?
            .get(&TypeId::of::<T>())?
            .downcast_ref()
    }

    /// Returns a derived carrier with the new value included.
    ///
    /// Use application-specific types to avoid unintentionally overwriting
    /// existing state of the same type.
    pub fn with_value<T: 'static + Send + Sync>(&self, value: T) -> Self {
        let entries = if let Some(current_entries) = &self.entries {
            let mut inner_entries = (**current_entries).clone();
            inner_entries.insert(TypeId::of::<T>(), Arc::new(value));
            Some(Arc::new(inner_entries))
        } else {
            let mut entries = EntryMap::default();
            entries.insert(TypeId::of::<T>(), Arc::new(value));
            Some(Arc::new(entries))
        };
        Carrier {
            correlation: self.correlation.clone(),
            entries,
        }
    }
}

impl fmt::Debug for Carrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut dbg = f.debug_struct("Carrier");
        match &self.correlation {
            Some(cx) => dbg.field("correlation", cx),
            None => dbg.field("correlation", &"None"),
        };
        dbg.field(
            "entries",
            &self.entries.as_ref().map_or(0, |entries| entries.len()),
        )
        .finish()
    }
}

/// With TypeIds as keys there's no need to hash them; they are already
/// hashes coming from the compiler. The IdHasher holds the u64 of the TypeId
/// and returns it instead of doing any bit fiddling.
#[derive(Clone, Default, Debug)]
struct IdHasher(u64);

impl Hasher for IdHasher {
    fn write(&mut self, _: &[u8]) {
        unreachable!("TypeId calls write_u64");
    }

    #[inline]
    fn write_u64(&mut self, id: u64) {
        self.0 = id;
    }

    #[inline]
    fn finish(&self) -> u64 {
        self.0
    }
}
