//! Plugin records and metadata.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::capability::descriptor::CapabilityDescriptor;
use crate::error::LoaderError;
use crate::loader::IndexedLoader;

/// Well-known archive resource holding plugin metadata.
pub const PLUGIN_INFO_RESOURCE: &str = "plugin.json";

/// Plugin-id postfix marking the default implementation, returned by
/// id-based lookup when no other id matches.
pub const DEFAULT_ID_POSTFIX: &str = "-default";

/// Plugin metadata shipped as the `plugin.json` archive resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginInfo {
    /// Unique plugin id.
    pub id: String,
    /// Plugin version.
    #[serde(default)]
    pub version: Option<semver::Version>,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// Additional ids this plugin also answers to.
    #[serde(default)]
    pub secondary_ids: Vec<String>,
}

impl PluginInfo {
    /// Whether this plugin is the default implementation for id lookups.
    pub fn is_default(&self) -> bool {
        self.id.ends_with(DEFAULT_ID_POSTFIX)
    }

    /// Primary id followed by the secondary ids.
    pub fn all_ids(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.id.as_str()).chain(self.secondary_ids.iter().map(String::as_str))
    }

    /// Reads the metadata resource through a loader. A missing resource is
    /// not an error; a malformed one is logged and treated as missing.
    pub fn from_loader(loader: &IndexedLoader) -> Result<Option<Self>, LoaderError> {
        let Some(body) = loader.find_resource(PLUGIN_INFO_RESOURCE)? else {
            return Ok(None);
        };
        match serde_json::from_slice(&body) {
            Ok(info) => Ok(Some(info)),
            Err(e) => {
                warn!(error = %e, "malformed {} resource ignored", PLUGIN_INFO_RESOURCE);
                Ok(None)
            }
        }
    }
}

/// One loaded plugin layer: its id, the loader owning its code, and the
/// capability descriptors it contributed, in contribution order.
#[derive(Debug)]
pub struct PluginRecord {
    id: String,
    loader: Option<Arc<IndexedLoader>>,
    descriptors: Vec<CapabilityDescriptor>,
    info: Option<PluginInfo>,
}

impl PluginRecord {
    /// Creates a record from explicitly registered descriptors.
    pub fn new(id: impl Into<String>, descriptors: Vec<CapabilityDescriptor>) -> Self {
        Self {
            id: id.into(),
            loader: None,
            descriptors,
            info: None,
        }
    }

    /// Attaches the loader owning this plugin's archives.
    pub fn with_loader(mut self, loader: Arc<IndexedLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Attaches parsed `plugin.json` metadata.
    pub fn with_info(mut self, info: PluginInfo) -> Self {
        self.info = Some(info);
        self
    }

    /// Plugin id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Loader owning this plugin's code, if any.
    pub fn loader(&self) -> Option<&Arc<IndexedLoader>> {
        self.loader.as_ref()
    }

    /// Contributed descriptors, in contribution order.
    pub fn descriptors(&self) -> &[CapabilityDescriptor] {
        &self.descriptors
    }

    /// Plugin metadata, if shipped.
    pub fn info(&self) -> Option<&PluginInfo> {
        self.info.as_ref()
    }

    /// Whether this record answers to the given id, either by its primary id
    /// or a metadata secondary id.
    pub fn matches_id(&self, id: &str) -> bool {
        if self.id == id {
            return true;
        }
        self.info
            .as_ref()
            .map(|info| info.all_ids().any(|known| known == id))
            .unwrap_or(false)
    }

    /// Closes the owning loader, releasing its archive handles.
    pub fn close(&self) {
        if let Some(loader) = &self.loader {
            loader.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_postfix_and_id_matching() {
        let info: PluginInfo = serde_json::from_str(
            r#"{"id":"yaml-snake-default","version":"1.2.0","secondary_ids":["yaml"]}"#,
        )
        .unwrap();
        assert!(info.is_default());
        assert_eq!(info.version, Some(semver::Version::new(1, 2, 0)));

        let record = PluginRecord::new("yaml-snake-default", Vec::new()).with_info(info);
        assert!(record.matches_id("yaml-snake-default"));
        assert!(record.matches_id("yaml"));
        assert!(!record.matches_id("json"));
    }

    #[test]
    fn minimal_info_deserializes() {
        let info: PluginInfo = serde_json::from_str(r#"{"id":"mqtt-paho"}"#).unwrap();
        assert_eq!(info.id, "mqtt-paho");
        assert!(info.version.is_none());
        assert!(info.secondary_ids.is_empty());
        assert!(!info.is_default());
    }
}
