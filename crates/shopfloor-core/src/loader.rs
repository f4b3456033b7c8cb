//! Child-first indexed loader.
//!
//! Resolves code units and resources for names known to its [`ArchiveIndex`],
//! loading bytes lazily from the referenced archive. Resolution is
//! child-first: the loader satisfies a request from its own index before
//! delegating to its parent, so a plugin can override platform-provided
//! units of the same name.

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};
use zip::ZipArchive;

use crate::error::LoaderError;
use crate::index::{unit_name, ArchiveIndex, LocationId, UNIT_SUFFIXES};

/// A loaded code unit: the raw bytes of a position-independent module,
/// defined once per loader and cached for the loader's lifetime.
#[derive(Debug, Clone)]
pub struct CodeUnit {
    name: String,
    bytes: Vec<u8>,
    origin: PathBuf,
}

impl CodeUnit {
    /// Unit name the bytes were resolved under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Raw module bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Archive the bytes were extracted from.
    pub fn origin(&self) -> &Path {
        &self.origin
    }
}

type ArchiveHandle = Arc<Mutex<ZipArchive<File>>>;

/// Classloader-equivalent over one [`ArchiveIndex`] with an optional parent.
///
/// Archive handles are opened lazily, at most once per archive, and released
/// on [`close`](Self::close). A double-open caused by a race is idempotent:
/// the first inserted handle wins. The index itself is read-only and shared.
pub struct IndexedLoader {
    index: Arc<ArchiveIndex>,
    parent: Option<Arc<IndexedLoader>>,
    /// Base directory for relative index locations.
    base: Option<PathBuf>,
    archives: RwLock<HashMap<LocationId, ArchiveHandle>>,
    units: RwLock<HashMap<String, Arc<CodeUnit>>>,
    closed: AtomicBool,
}

impl IndexedLoader {
    /// Creates a loader over `index` with an optional parent for delegation.
    pub fn new(index: Arc<ArchiveIndex>, parent: Option<Arc<IndexedLoader>>) -> Self {
        Self::with_base(index, parent, None)
    }

    /// Creates a loader resolving relative index locations against `base`.
    pub fn with_base(
        index: Arc<ArchiveIndex>,
        parent: Option<Arc<IndexedLoader>>,
        base: Option<PathBuf>,
    ) -> Self {
        Self {
            index,
            parent,
            base,
            archives: RwLock::new(HashMap::new()),
            units: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// The index backing this loader.
    pub fn index(&self) -> &ArchiveIndex {
        &self.index
    }

    /// Number of loaders in this chain, including this one.
    pub fn depth(&self) -> usize {
        1 + self.parent.as_ref().map_or(0, |p| p.depth())
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<(), LoaderError> {
        if self.is_closed() {
            Err(LoaderError::Closed)
        } else {
            Ok(())
        }
    }

    /// Resolves a unit child-first: this loader's index before the parent.
    /// A miss everywhere yields [`LoaderError::UnitNotFound`] carrying the
    /// chain depth searched.
    pub fn load_unit(&self, name: &str) -> Result<Arc<CodeUnit>, LoaderError> {
        self.ensure_open()?;
        if let Some(unit) = self.units.read().get(name) {
            return Ok(unit.clone());
        }
        if let Some(id) = self.index.unit_location_id(name) {
            let bytes = self.read_unit_entry(id, name)?;
            let unit = Arc::new(CodeUnit {
                name: name.to_string(),
                bytes,
                origin: self.location_path(id),
            });
            debug!(unit = name, origin = %unit.origin().display(), "unit defined");
            // a concurrent definition wins; keep the first one
            let mut units = self.units.write();
            return Ok(units.entry(name.to_string()).or_insert(unit).clone());
        }
        match &self.parent {
            Some(parent) => parent.load_unit(name).map_err(|e| match e {
                LoaderError::UnitNotFound { name, depth } => {
                    LoaderError::UnitNotFound { name, depth: depth + 1 }
                }
                other => other,
            }),
            None => Err(LoaderError::UnitNotFound {
                name: name.to_string(),
                depth: 1,
            }),
        }
    }

    /// Resolves a resource to the bytes of its first registered provider,
    /// delegating to the parent when the name is not indexed here. `Ok(None)`
    /// means the resource is unknown to the whole chain.
    pub fn find_resource(&self, name: &str) -> Result<Option<Vec<u8>>, LoaderError> {
        self.ensure_open()?;
        if let Some(&id) = self.resource_ids(name).first() {
            return self.read_resource_entry(id, name).map(Some);
        }
        match &self.parent {
            Some(parent) => parent.find_resource(name),
            None => Ok(None),
        }
    }

    /// Resolves a resource from every registered provider, own locations
    /// first in registration order, then the parent's. Callers merging
    /// append-friendly descriptor files use this instead of
    /// [`find_resource`](Self::find_resource).
    pub fn find_resources(&self, name: &str) -> Result<Vec<Vec<u8>>, LoaderError> {
        self.ensure_open()?;
        let mut found = Vec::new();
        for &id in &self.resource_ids(name) {
            found.push(self.read_resource_entry(id, name)?);
        }
        if let Some(parent) = &self.parent {
            found.extend(parent.find_resources(name)?);
        }
        Ok(found)
    }

    /// Releases every opened archive handle and drops defined units.
    /// Subsequent operations fail with [`LoaderError::Closed`]; the loader
    /// never silently reopens.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.archives.write().clear();
        self.units.write().clear();
    }

    /// Resource provider ids, falling back to the unit index for names
    /// carrying a unit suffix (units are also addressable as resources).
    fn resource_ids(&self, name: &str) -> Vec<LocationId> {
        let ids = self.index.resource_location_ids(name);
        if !ids.is_empty() {
            return ids.to_vec();
        }
        unit_name(name)
            .and_then(|unit| self.index.unit_location_id(&unit))
            .into_iter()
            .collect()
    }

    fn location_path(&self, id: LocationId) -> PathBuf {
        let location = self.index.location(id);
        match &self.base {
            Some(base) if location.is_relative() => base.join(location),
            _ => location.to_path_buf(),
        }
    }

    /// Returns the lazily opened handle for an archive location.
    fn archive(&self, id: LocationId) -> Result<ArchiveHandle, LoaderError> {
        if let Some(handle) = self.archives.read().get(&id) {
            return Ok(handle.clone());
        }
        let path = self.location_path(id);
        let unavailable = |reason: String| LoaderError::ArchiveUnavailable {
            path: path.clone(),
            reason,
        };
        let file = File::open(&path).map_err(|e| unavailable(e.to_string()))?;
        let zip = ZipArchive::new(file).map_err(|e| unavailable(e.to_string()))?;
        let handle = Arc::new(Mutex::new(zip));
        let mut archives = self.archives.write();
        Ok(archives.entry(id).or_insert(handle).clone())
    }

    /// Extracts the bytes of a unit from its owning archive, trying each
    /// known unit suffix against the entry layout.
    fn read_unit_entry(&self, id: LocationId, name: &str) -> Result<Vec<u8>, LoaderError> {
        let handle = self.archive(id)?;
        let mut zip = handle.lock();
        let nested = name.replace('.', "/");
        for stem in [nested.as_str(), name] {
            for suffix in UNIT_SUFFIXES {
                let entry = format!("{}{}", stem, suffix);
                match zip.by_name(&entry) {
                    Ok(mut file) => {
                        let mut bytes = Vec::with_capacity(file.size() as usize);
                        file.read_to_end(&mut bytes).map_err(|e| {
                            LoaderError::ArchiveUnavailable {
                                path: self.location_path(id),
                                reason: e.to_string(),
                            }
                        })?;
                        return Ok(bytes);
                    }
                    Err(zip::result::ZipError::FileNotFound) => continue,
                    Err(e) => {
                        return Err(LoaderError::ArchiveUnavailable {
                            path: self.location_path(id),
                            reason: e.to_string(),
                        })
                    }
                }
            }
        }
        // indexed but absent from the archive: packaging integrity violation
        Err(LoaderError::ArchiveUnavailable {
            path: self.location_path(id),
            reason: format!("indexed unit `{}` missing from archive", name),
        })
    }

    fn read_resource_entry(&self, id: LocationId, name: &str) -> Result<Vec<u8>, LoaderError> {
        let handle = self.archive(id)?;
        let mut zip = handle.lock();
        match zip.by_name(name) {
            Ok(mut file) => {
                let mut bytes = Vec::with_capacity(file.size() as usize);
                file.read_to_end(&mut bytes)
                    .map_err(|e| LoaderError::ArchiveUnavailable {
                        path: self.location_path(id),
                        reason: e.to_string(),
                    })?;
                return Ok(bytes);
            }
            Err(zip::result::ZipError::FileNotFound) => {}
            Err(e) => {
                return Err(LoaderError::ArchiveUnavailable {
                    path: self.location_path(id),
                    reason: e.to_string(),
                })
            }
        }
        warn!(
            resource = name,
            archive = %self.location_path(id).display(),
            "indexed resource missing from archive"
        );
        Err(LoaderError::ArchiveUnavailable {
            path: self.location_path(id),
            reason: format!("indexed resource `{}` missing from archive", name),
        })
    }
}

impl std::fmt::Debug for IndexedLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexedLoader")
            .field("depth", &self.depth())
            .field("locations", &self.index.location_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}
