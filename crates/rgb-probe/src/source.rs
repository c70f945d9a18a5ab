//! Typed tick sources registered per host type.

use std::any::{Any, TypeId};

use hashbrown::HashMap;
use parking_lot::RwLock;

/// A typed reader for a known host shape.
///
/// Registered sources bypass name probing entirely for their host type.
pub trait TickSource: Send + Sync + 'static {
    /// Read the tick count, or `None` if this host instance cannot provide one.
    fn tick_count(&self, host: &dyn Any) -> Option<i64>;
}

impl<F> TickSource for F
where
    F: Fn(&dyn Any) -> Option<i64> + Send + Sync + 'static,
{
    fn tick_count(&self, host: &dyn Any) -> Option<i64> {
        self(host)
    }
}

/// Registry of typed tick sources keyed by host type.
#[derive(Default)]
pub struct TickSources {
    by_type: RwLock<HashMap<TypeId, Box<dyn TickSource>>>,
}

impl TickSources {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a reader for host type `H`, replacing any previous one.
    pub fn register<H, F>(&self, read: F)
    where
        H: Any,
        F: Fn(&H) -> Option<i64> + Send + Sync + 'static,
    {
        let source = move |host: &dyn Any| host.downcast_ref::<H>().and_then(&read);
        self.by_type
            .write()
            .insert(TypeId::of::<H>(), Box::new(source));
    }

    /// Whether a source is registered for `H`.
    #[must_use]
    pub fn contains<H: Any>(&self) -> bool {
        self.by_type.read().contains_key(&TypeId::of::<H>())
    }

    /// Read the tick count of `host` through its registered source.
    ///
    /// Returns `None` when no source is registered for `H` or the source
    /// declined.
    pub fn tick_count<H: Any>(&self, host: &H) -> Option<i64> {
        let by_type = self.by_type.read();
        let source = by_type.get(&TypeId::of::<H>())?;
        source.tick_count(host)
    }

    /// Number of registered sources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_type.read().len()
    }

    /// Whether no source is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_type.read().is_empty()
    }
}

impl core::fmt::Debug for TickSources {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TickSources")
            .field("len", &self.len())
            .finish()
    }
}
