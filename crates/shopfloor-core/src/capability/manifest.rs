//! Capability manifest resources.
//!
//! Each plugin archive exposes a well-known resource per capability
//! interface, `capabilities/<capability-name>`, listing the implementation
//! ids it contributes. The format is append-friendly: several archives may
//! each ship their own copy, and the loader's find-all operation merges them
//! in provider order.

use tracing::debug;

use crate::error::LoaderError;
use crate::loader::IndexedLoader;

/// Resource-name prefix for capability manifests.
pub const MANIFEST_PREFIX: &str = "capabilities/";

/// Well-known manifest resource name for a capability interface.
pub fn resource_name(capability: &str) -> String {
    format!("{}{}", MANIFEST_PREFIX, capability)
}

/// Parses one manifest body: one implementation id per line, `#` comments
/// and blank lines ignored.
pub fn parse(bytes: &[u8]) -> Vec<String> {
    let text = String::from_utf8_lossy(bytes);
    let mut ids = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if !ids.iter().any(|known| known == line) {
            ids.push(line.to_string());
        }
    }
    ids
}

/// Reads every copy of the manifest for `capability` reachable through
/// `loader` and returns the declared implementation ids, deduplicated,
/// preserving provider order.
pub fn scan_loader(loader: &IndexedLoader, capability: &str) -> Result<Vec<String>, LoaderError> {
    let name = resource_name(capability);
    let mut ids = Vec::new();
    for body in loader.find_resources(&name)? {
        for id in parse(&body) {
            if !ids.iter().any(|known| known == &id) {
                ids.push(id);
            }
        }
    }
    debug!(capability, count = ids.len(), "capability manifest scanned");
    Ok(ids)
}
