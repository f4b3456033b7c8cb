//! Capability registry: discovery and deterministic selection of exactly one
//! implementation per capability interface.
//!
//! The registry is an explicit object with a defined construction/teardown
//! lifecycle, created once per process or test context. It is safe under
//! concurrent `resolve` calls from worker threads: resolution is a pure read
//! over a snapshot of the descriptor set, while registration and overrides
//! take the exclusive write side.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::capability::descriptor::{CapabilityDescriptor, CapabilityInstance};
use crate::capability::manifest;
use crate::capability::plugin::{PluginInfo, PluginRecord};
use crate::error::LoaderError;
use crate::loader::IndexedLoader;

/// Maps a manifest-declared implementation id to its descriptor. In a full
/// deployment the binding comes from the plugin's own registration export;
/// tests and embedded setups supply a closure.
pub type DescriptorResolver<'a> = dyn Fn(&str, &str) -> Option<CapabilityDescriptor> + 'a;

struct Resolved {
    descriptor_id: String,
    instance: CapabilityInstance,
}

#[derive(Default)]
struct Inner {
    /// Platform built-in descriptors, in registration order.
    builtin: Vec<CapabilityDescriptor>,
    /// Plugin layers, in registration order.
    plugins: Vec<PluginRecord>,
    /// Explicit overrides; these always win over the selection algorithm.
    overrides: HashMap<String, CapabilityInstance>,
    /// Instances produced by earlier resolutions; invalidated on any
    /// descriptor-set mutation so a stale selection is never returned.
    resolved: HashMap<String, Resolved>,
}

impl Inner {
    fn discover(&self, capability: &str) -> Vec<CapabilityDescriptor> {
        let mut found: Vec<CapabilityDescriptor> = Vec::new();
        let candidates = self.builtin.iter().chain(
            self.plugins
                .iter()
                .flat_map(|record| record.descriptors().iter()),
        );
        for descriptor in candidates {
            if descriptor.capability() != capability {
                continue;
            }
            if found.iter().any(|known| known.id() == descriptor.id()) {
                continue;
            }
            found.push(descriptor.clone());
        }
        found
    }

    /// Descriptor answering to `id`: a direct descriptor-id match first,
    /// then a plugin record matching by primary or secondary id.
    fn find_by_id(&self, capability: &str, id: &str) -> Option<CapabilityDescriptor> {
        let discovered = self.discover(capability);
        if let Some(descriptor) = discovered.iter().find(|d| d.id() == id) {
            return Some(descriptor.clone());
        }
        self.plugins
            .iter()
            .filter(|record| record.matches_id(id))
            .flat_map(|record| record.descriptors().iter())
            .find(|d| d.capability() == capability)
            .cloned()
    }
}

/// Registry of capability implementations across builtin descriptors and
/// loaded plugin layers.
#[derive(Default)]
pub struct CapabilityRegistry {
    inner: RwLock<Inner>,
}

impl CapabilityRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a platform built-in descriptor.
    pub fn register_builtin(&self, descriptor: CapabilityDescriptor) {
        let mut inner = self.inner.write();
        inner.resolved.remove(descriptor.capability());
        inner.builtin.push(descriptor);
    }

    /// Registers a plugin layer's contributed descriptors. A record with an
    /// already-registered id replaces the previous one.
    pub fn register_plugin(&self, record: PluginRecord) {
        let mut inner = self.inner.write();
        if let Some(pos) = inner.plugins.iter().position(|p| p.id() == record.id()) {
            warn!(plugin = record.id(), "plugin re-registered, replacing");
            inner.plugins[pos] = record;
        } else {
            info!(
                plugin = record.id(),
                descriptors = record.descriptors().len(),
                "plugin registered"
            );
            inner.plugins.push(record);
        }
        inner.resolved.clear();
    }

    /// Removes a plugin layer. The next `resolve` re-runs selection; the
    /// caller decides whether to close the returned record's loader.
    pub fn unregister_plugin(&self, id: &str) -> Option<PluginRecord> {
        let mut inner = self.inner.write();
        let pos = inner.plugins.iter().position(|p| p.id() == id)?;
        let record = inner.plugins.remove(pos);
        inner.resolved.clear();
        info!(plugin = id, "plugin unregistered");
        Some(record)
    }

    /// Scans a plugin layer's capability manifests through its loader and
    /// registers the resulting record. `resolver` binds each
    /// `(capability, implementation id)` pair to a descriptor; unbound ids
    /// are logged and skipped.
    pub fn scan_plugin(
        &self,
        id: impl Into<String>,
        loader: Arc<IndexedLoader>,
        capabilities: &[&str],
        resolver: &DescriptorResolver<'_>,
    ) -> Result<(), LoaderError> {
        let id = id.into();
        let mut descriptors = Vec::new();
        for &capability in capabilities {
            for impl_id in manifest::scan_loader(&loader, capability)? {
                match resolver(capability, &impl_id) {
                    Some(descriptor) => descriptors.push(descriptor),
                    None => warn!(
                        plugin = %id,
                        capability,
                        implementation = %impl_id,
                        "manifest id has no bound descriptor, skipping"
                    ),
                }
            }
        }
        let mut record = PluginRecord::new(id, descriptors).with_loader(loader.clone());
        if let Some(info) = PluginInfo::from_loader(&loader)? {
            record = record.with_info(info);
        }
        self.register_plugin(record);
        Ok(())
    }

    /// All descriptors declaring `capability`, builtin first, then plugin
    /// layers in registration order, deduplicated by id (first wins).
    pub fn discover(&self, capability: &str) -> Vec<CapabilityDescriptor> {
        self.inner.read().discover(capability)
    }

    /// Resolves exactly one implementation of `capability`, or `None` when
    /// the capability is unavailable. "Unavailable" is a valid business
    /// outcome; whether it is fatal belongs to the caller.
    pub fn resolve(&self, capability: &str) -> Option<CapabilityInstance> {
        let selected = {
            let inner = self.inner.read();
            if let Some(instance) = inner.overrides.get(capability) {
                return Some(instance.clone());
            }
            if let Some(resolved) = inner.resolved.get(capability) {
                return Some(resolved.instance.clone());
            }
            select(&inner.discover(capability))?.clone()
        };
        // instantiate outside the lock; factories may be arbitrarily slow
        let instance = match selected.create() {
            Ok(instance) => instance,
            Err(e) => {
                warn!(
                    capability,
                    implementation = selected.id(),
                    error = %e,
                    "capability factory failed, treating capability as unavailable"
                );
                return None;
            }
        };
        let mut inner = self.inner.write();
        if let Some(instance) = inner.overrides.get(capability) {
            return Some(instance.clone());
        }
        let resolved = inner
            .resolved
            .entry(capability.to_string())
            .or_insert(Resolved {
                descriptor_id: selected.id().to_string(),
                instance,
            });
        Some(resolved.instance.clone())
    }

    /// Resolves a specific implementation by id, falling back to the default
    /// selection when no descriptor answers to `id`. Id-pinned lookups are
    /// instantiated per call, not memoized.
    pub fn resolve_with_id(&self, capability: &str, id: &str) -> Option<CapabilityInstance> {
        let selected = {
            let inner = self.inner.read();
            if let Some(instance) = inner.overrides.get(capability) {
                return Some(instance.clone());
            }
            inner.find_by_id(capability, id)
        };
        match selected {
            Some(descriptor) => match descriptor.create() {
                Ok(instance) => Some(instance),
                Err(e) => {
                    warn!(capability, implementation = id, error = %e, "capability factory failed");
                    None
                }
            },
            None => {
                debug!(capability, id, "no implementation for id, using default selection");
                self.resolve(capability)
            }
        }
    }

    /// Resolves and downcasts to the concrete handle type.
    pub fn resolve_as<T: Send + Sync + 'static>(&self, capability: &str) -> Option<Arc<T>> {
        self.resolve(capability)?.downcast::<T>().ok()
    }

    /// Pins an explicit instance: `resolve` returns it instead of running
    /// the selection algorithm, regardless of later registrations, until
    /// cleared. Escape hatch for tests and controlled deployments.
    pub fn set_instance(&self, capability: impl Into<String>, instance: CapabilityInstance) {
        let capability = capability.into();
        let mut inner = self.inner.write();
        inner.resolved.remove(&capability);
        inner.overrides.insert(capability, instance);
    }

    /// Removes an explicit override, re-enabling algorithmic selection.
    pub fn clear_instance(&self, capability: &str) {
        self.inner.write().overrides.remove(capability);
    }

    /// Ids of the registered plugin layers, in registration order.
    pub fn plugin_ids(&self) -> Vec<String> {
        self.inner
            .read()
            .plugins
            .iter()
            .map(|p| p.id().to_string())
            .collect()
    }

    /// Id of the implementation currently resolved for `capability`, if any
    /// resolution happened since the last descriptor-set mutation.
    pub fn resolved_id(&self, capability: &str) -> Option<String> {
        self.inner
            .read()
            .resolved
            .get(capability)
            .map(|r| r.descriptor_id.clone())
    }

    /// Tears the registry down: closes every plugin loader and drops all
    /// descriptors, overrides, and resolved instances.
    pub fn shutdown(&self) {
        let mut inner = self.inner.write();
        for record in &inner.plugins {
            record.close();
        }
        inner.plugins.clear();
        inner.builtin.clear();
        inner.overrides.clear();
        inner.resolved.clear();
    }
}

/// Ordered selection over discovered descriptors:
/// enabled plain candidates first, then enabled `exclude_first` ones, then
/// the fallback descriptor. Ties break deterministically to the first by
/// discovery order; this is documented behavior, not an error.
fn select(candidates: &[CapabilityDescriptor]) -> Option<&CapabilityDescriptor> {
    let pick = |deprioritized: bool| {
        let mut tied = candidates
            .iter()
            .filter(|d| d.is_exclude_first() == deprioritized && !d.is_fallback())
            .filter(|d| d.is_enabled());
        let first = tied.next();
        if let (Some(first), rest @ 1..) = (first, tied.count()) {
            debug!(
                capability = first.capability(),
                selected = first.id(),
                tied = rest + 1,
                "ambiguous capability selection, taking first by discovery order"
            );
        }
        first
    };
    pick(false)
        .or_else(|| pick(true))
        .or_else(|| candidates.iter().find(|d| d.is_fallback()))
}
