//! Capability discovery and selection.
//!
//! A capability interface is an abstract contract (e.g. "transport
//! connector", "YAML codec") for which several interchangeable
//! implementations may be packaged as plugins. This module covers:
//! - descriptor metadata per implementation ([`descriptor`])
//! - the append-friendly manifest resources plugins ship ([`manifest`])
//! - loaded plugin layers and their metadata ([`plugin`])
//! - the registry resolving exactly one implementation ([`registry`])

pub mod descriptor;
pub mod manifest;
pub mod plugin;
pub mod registry;

pub use descriptor::{CapabilityDescriptor, CapabilityInstance};
pub use plugin::{PluginInfo, PluginRecord, DEFAULT_ID_POSTFIX, PLUGIN_INFO_RESOURCE};
pub use registry::{CapabilityRegistry, DescriptorResolver};
