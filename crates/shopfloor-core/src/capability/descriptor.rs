//! Capability implementation descriptors.
//!
//! A descriptor identifies one concrete implementation of a capability
//! interface plus its selection hints. Selection hints are ordinary fields
//! set at registration time, never discovered by runtime introspection.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// An instantiated capability implementation. Callers downcast to the
/// concrete handle type behind the capability interface.
pub type CapabilityInstance = Arc<dyn Any + Send + Sync>;

type FactoryFn = dyn Fn() -> anyhow::Result<CapabilityInstance> + Send + Sync;
type EnabledFn = dyn Fn() -> bool + Send + Sync;

/// One concrete implementation of a capability interface.
///
/// Descriptors are immutable after discovery; the registry holds them as a
/// set and never mutates one.
#[derive(Clone)]
pub struct CapabilityDescriptor {
    id: String,
    capability: String,
    version: Option<semver::Version>,
    factory: Arc<FactoryFn>,
    enabled: Arc<EnabledFn>,
    exclude_first: bool,
    fallback: bool,
}

impl CapabilityDescriptor {
    /// Creates a descriptor with a raw factory producing an untyped
    /// instance.
    pub fn new<F>(id: impl Into<String>, capability: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> anyhow::Result<CapabilityInstance> + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            capability: capability.into(),
            version: None,
            factory: Arc::new(factory),
            enabled: Arc::new(|| true),
            exclude_first: false,
            fallback: false,
        }
    }

    /// Creates a descriptor from a typed factory; the produced value is
    /// wrapped for downcast-based access.
    pub fn from_fn<T, F>(id: impl Into<String>, capability: impl Into<String>, factory: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn() -> anyhow::Result<T> + Send + Sync + 'static,
    {
        Self::new(id, capability, move || {
            factory().map(|value| Arc::new(value) as CapabilityInstance)
        })
    }

    /// Sets the implementation version, used for diagnostics.
    pub fn with_version(mut self, version: semver::Version) -> Self {
        self.version = Some(version);
        self
    }

    /// Lowers selection priority. Test and fallback implementations carry
    /// this so they never silently shadow a production implementation.
    pub fn with_exclude_first(mut self, exclude_first: bool) -> Self {
        self.exclude_first = exclude_first;
        self
    }

    /// Marks the descriptor as the fallback, selected only when no other
    /// enabled candidate exists.
    pub fn with_fallback(mut self, fallback: bool) -> Self {
        self.fallback = fallback;
        self
    }

    /// Installs a capability-specific "is this applicable on this host"
    /// predicate. The default predicate always returns true.
    pub fn with_enabled<F>(mut self, enabled: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.enabled = Arc::new(enabled);
        self
    }

    /// Unique implementation id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Capability interface this implementation provides.
    pub fn capability(&self) -> &str {
        &self.capability
    }

    /// Implementation version, if declared.
    pub fn version(&self) -> Option<&semver::Version> {
        self.version.as_ref()
    }

    /// Whether this descriptor has lowered selection priority.
    pub fn is_exclude_first(&self) -> bool {
        self.exclude_first
    }

    /// Whether this descriptor is the fallback implementation.
    pub fn is_fallback(&self) -> bool {
        self.fallback
    }

    /// Evaluates the applicability predicate.
    pub fn is_enabled(&self) -> bool {
        (self.enabled)()
    }

    /// Produces a new instance of the implementation.
    pub fn create(&self) -> anyhow::Result<CapabilityInstance> {
        (self.factory)()
    }
}

impl fmt::Debug for CapabilityDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityDescriptor")
            .field("id", &self.id)
            .field("capability", &self.capability)
            .field("version", &self.version)
            .field("exclude_first", &self.exclude_first)
            .field("fallback", &self.fallback)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_flags_default_off() {
        let d = CapabilityDescriptor::from_fn("yaml-basic", "yaml-codec", || Ok(42_u32));
        assert!(!d.is_exclude_first());
        assert!(!d.is_fallback());
        assert!(d.is_enabled());
        assert_eq!(d.capability(), "yaml-codec");
    }

    #[test]
    fn typed_factory_round_trips_through_downcast() {
        let d = CapabilityDescriptor::from_fn("yaml-basic", "yaml-codec", || Ok(7_u32));
        let instance = d.create().unwrap();
        let value = instance.downcast::<u32>().unwrap();
        assert_eq!(*value, 7);
    }

    #[test]
    fn enabled_predicate_is_invoked() {
        let d = CapabilityDescriptor::from_fn("probe", "transport", || Ok(()))
            .with_enabled(|| false);
        assert!(!d.is_enabled());
    }
}
