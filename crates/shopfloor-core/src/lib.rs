//! Core plugin infrastructure for the shopfloor platform.
//!
//! shopfloor composes industrial-IoT services out of independently packaged
//! plugins selected at process start, without recompilation. This crate
//! holds the loading core:
//! - [`index`]: the archive index built by the packaging step, mapping unit
//!   and resource names to the archives providing them
//! - [`loader`]: the child-first indexed loader resolving bytes lazily from
//!   those archives
//! - [`capability`]: descriptor discovery and deterministic selection of one
//!   implementation per capability interface

pub mod capability;
pub mod error;
pub mod index;
pub mod loader;

pub use capability::{CapabilityDescriptor, CapabilityInstance, CapabilityRegistry, PluginRecord};
pub use error::{IndexError, LoaderError};
pub use index::{ArchiveIndex, ArchiveIndexBuilder, LocationId};
pub use loader::{CodeUnit, IndexedLoader};
