//! Archive index: which archive provides which code unit or resource.
//!
//! The index is produced by the packaging step, persisted next to the
//! archives it describes, and read once when a loader is constructed. It is
//! immutable after construction; all mutation happens on
//! [`ArchiveIndexBuilder`].

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::IndexError;

/// Stable numeric id of an archive location within one index.
pub type LocationId = u32;

/// File-name suffixes recognized as native code units during archive scans.
pub const UNIT_SUFFIXES: [&str; 3] = [".so", ".dylib", ".dll"];

/// First line of a persisted index, carrying the format version.
const FORMAT_HEADER: &str = "shopfloor-index 1";

/// Derives the unit name for an archive entry, or `None` if the entry is a
/// resource. `plugins/transport_mqtt.so` becomes `plugins.transport_mqtt`.
pub fn unit_name(entry: &str) -> Option<String> {
    UNIT_SUFFIXES
        .iter()
        .find_map(|suffix| entry.strip_suffix(suffix))
        .map(|stem| stem.replace('/', "."))
}

/// Mutable builder for an [`ArchiveIndex`].
///
/// Duplicate unit ownership across archives is a permitted override:
/// last write wins, and [`overwrite_count`](Self::overwrite_count) reports
/// how many entries were replaced so the packaging step can escalate.
#[derive(Debug, Default)]
pub struct ArchiveIndexBuilder {
    locations: Vec<PathBuf>,
    location_ids: HashMap<PathBuf, LocationId>,
    units: HashMap<String, LocationId>,
    resources: HashMap<String, Vec<LocationId>>,
    overwrites: usize,
}

impl ArchiveIndexBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns an archive location and returns its stable id.
    pub fn add_location(&mut self, location: impl Into<PathBuf>) -> LocationId {
        let location = location.into();
        if let Some(id) = self.location_ids.get(&location) {
            return *id;
        }
        let id = self.locations.len() as LocationId;
        self.locations.push(location.clone());
        self.location_ids.insert(location, id);
        id
    }

    /// Registers exclusive ownership of a unit name. Registering the same
    /// name again with a different location replaces the previous owner.
    pub fn add_unit(&mut self, name: impl Into<String>, location: impl Into<PathBuf>) {
        let name = name.into();
        let id = self.add_location(location);
        if let Some(previous) = self.units.insert(name.clone(), id) {
            if previous != id {
                self.overwrites += 1;
                warn!(
                    unit = %name,
                    from = %self.locations[previous as usize].display(),
                    to = %self.locations[id as usize].display(),
                    "unit ownership overwritten"
                );
            }
        }
    }

    /// Appends a provider location for a resource name. Duplicates are kept
    /// in registration order; several archives may legitimately extend the
    /// same resource by append.
    pub fn add_resource(&mut self, name: impl Into<String>, location: impl Into<PathBuf>) {
        let id = self.add_location(location);
        self.resources.entry(name.into()).or_default().push(id);
    }

    /// Scans one zip archive and registers its entries: native code units by
    /// derived unit name, every other file entry as a resource. Directory
    /// entries are skipped.
    pub fn index_archive(&mut self, archive: &Path) -> Result<(), IndexError> {
        let archive_err = |reason: String| IndexError::Archive {
            path: archive.to_path_buf(),
            reason,
        };
        let file = File::open(archive).map_err(|e| archive_err(e.to_string()))?;
        let mut zip = zip::ZipArchive::new(file).map_err(|e| archive_err(e.to_string()))?;
        for i in 0..zip.len() {
            let entry = zip.by_index(i).map_err(|e| archive_err(e.to_string()))?;
            if entry.is_dir() {
                continue;
            }
            let entry_name = entry.name().to_string();
            match unit_name(&entry_name) {
                Some(unit) => self.add_unit(unit, archive),
                None => self.add_resource(entry_name, archive),
            }
        }
        debug!(archive = %archive.display(), "archive indexed");
        Ok(())
    }

    /// Scans a sequence of archives, failing on the first error.
    pub fn index_archives<I>(&mut self, archives: I) -> Result<(), IndexError>
    where
        I: IntoIterator,
        I::Item: AsRef<Path>,
    {
        for archive in archives {
            self.index_archive(archive.as_ref())?;
        }
        Ok(())
    }

    /// Scans a sequence of archives, forwarding per-archive errors to `sink`
    /// instead of aborting the whole scan.
    pub fn index_archives_tolerant<I>(&mut self, archives: I, sink: &mut dyn FnMut(IndexError))
    where
        I: IntoIterator,
        I::Item: AsRef<Path>,
    {
        for archive in archives {
            if let Err(e) = self.index_archive(archive.as_ref()) {
                sink(e);
            }
        }
    }

    /// Rewrites location path prefixes, e.g. from the build directory to the
    /// install directory. Locations are matched textually on their string
    /// form.
    pub fn relocate(&mut self, prefix: &str, replacement: &str) {
        let mut ids = HashMap::with_capacity(self.locations.len());
        for location in &mut self.locations {
            let text = location.to_string_lossy().into_owned();
            if let Some(rest) = text.strip_prefix(prefix) {
                *location = PathBuf::from(format!("{}{}", replacement, rest));
            }
        }
        for (id, location) in self.locations.iter().enumerate() {
            ids.insert(location.clone(), id as LocationId);
        }
        self.location_ids = ids;
    }

    /// Number of unit entries replaced by a later registration.
    pub fn overwrite_count(&self) -> usize {
        self.overwrites
    }

    /// Freezes the builder into an immutable index.
    pub fn finish(self) -> ArchiveIndex {
        ArchiveIndex {
            locations: self.locations,
            units: self.units,
            resources: self.resources,
        }
    }
}

/// Immutable directory of which archive provides which unit or resource.
///
/// Safe to share across any number of loaders without synchronization.
#[derive(Debug)]
pub struct ArchiveIndex {
    locations: Vec<PathBuf>,
    units: HashMap<String, LocationId>,
    resources: HashMap<String, Vec<LocationId>>,
}

impl ArchiveIndex {
    /// Location owning the given unit name. Exact, case-sensitive lookup;
    /// `None` means "not indexed here" and must fall through to the parent
    /// loader.
    pub fn unit_location(&self, name: &str) -> Option<&Path> {
        self.units.get(name).map(|id| self.location(*id))
    }

    /// Location id owning the given unit name.
    pub fn unit_location_id(&self, name: &str) -> Option<LocationId> {
        self.units.get(name).copied()
    }

    /// Provider locations of the given resource name, in registration order.
    /// Empty for unknown names.
    pub fn resource_locations(&self, name: &str) -> Vec<&Path> {
        self.resource_location_ids(name)
            .iter()
            .map(|id| self.location(*id))
            .collect()
    }

    /// Provider location ids of the given resource name.
    pub fn resource_location_ids(&self, name: &str) -> &[LocationId] {
        self.resources.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Path of a location id.
    ///
    /// # Panics
    /// Panics if the id was not produced by this index; ids are never
    /// fabricated by callers.
    pub fn location(&self, id: LocationId) -> &Path {
        &self.locations[id as usize]
    }

    /// All known archive locations, in id order.
    pub fn locations(&self) -> &[PathBuf] {
        &self.locations
    }

    /// Known unit names, unordered.
    pub fn units(&self) -> impl Iterator<Item = &str> {
        self.units.keys().map(String::as_str)
    }

    /// Known resource names, unordered.
    pub fn resources(&self) -> impl Iterator<Item = &str> {
        self.resources.keys().map(String::as_str)
    }

    /// Number of known units.
    pub fn unit_count(&self) -> usize {
        self.units.len()
    }

    /// Number of distinct resource names.
    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    /// Number of known archive locations.
    pub fn location_count(&self) -> usize {
        self.locations.len()
    }

    /// Writes the index in its line-oriented persistent form. Units and
    /// resources are emitted in name order so the output is reproducible.
    pub fn write_to<W: Write>(&self, writer: W) -> Result<(), IndexError> {
        let mut w = BufWriter::new(writer);
        writeln!(w, "{}", FORMAT_HEADER)?;
        writeln!(w, "locations {}", self.locations.len())?;
        for (id, location) in self.locations.iter().enumerate() {
            writeln!(w, "{} {}", id, location.display())?;
        }
        let mut units: Vec<_> = self.units.iter().collect();
        units.sort_by(|a, b| a.0.cmp(b.0));
        writeln!(w, "units {}", units.len())?;
        for (name, id) in units {
            writeln!(w, "{} {}", name, id)?;
        }
        let mut resources: Vec<_> = self.resources.iter().collect();
        resources.sort_by(|a, b| a.0.cmp(b.0));
        writeln!(w, "resources {}", resources.len())?;
        for (name, ids) in resources {
            let ids: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
            writeln!(w, "{} {}", ids.join(","), name)?;
        }
        w.flush()?;
        Ok(())
    }

    /// Writes the index to a file.
    pub fn write_file(&self, path: &Path) -> Result<(), IndexError> {
        self.write_to(File::create(path)?)
    }

    /// Reads an index in its line-oriented persistent form.
    pub fn read_from<R: Read>(reader: R) -> Result<Self, IndexError> {
        Parser::new(reader).parse()
    }

    /// Reads an index from a file.
    pub fn read_file(path: &Path) -> Result<Self, IndexError> {
        Self::read_from(File::open(path)?)
    }

    /// Reads an index from a file and rewrites location prefixes, for
    /// archives that moved between packaging and installation.
    pub fn read_relocated(path: &Path, prefix: &str, replacement: &str) -> Result<Self, IndexError> {
        let index = Self::read_file(path)?;
        let mut builder = ArchiveIndexBuilder {
            locations: index.locations,
            location_ids: HashMap::new(),
            units: index.units,
            resources: index.resources,
            overwrites: 0,
        };
        builder.relocate(prefix, replacement);
        Ok(builder.finish())
    }
}

/// Line parser for the persistent index format.
struct Parser<R: Read> {
    lines: std::io::Lines<BufReader<R>>,
    line_no: usize,
}

impl<R: Read> Parser<R> {
    fn new(reader: R) -> Self {
        Self {
            lines: BufReader::new(reader).lines(),
            line_no: 0,
        }
    }

    fn malformed(&self, reason: impl Into<String>) -> IndexError {
        IndexError::Malformed {
            line: self.line_no,
            reason: reason.into(),
        }
    }

    fn next_line(&mut self) -> Result<String, IndexError> {
        self.line_no += 1;
        match self.lines.next() {
            Some(line) => Ok(line?),
            None => Err(self.malformed("unexpected end of file")),
        }
    }

    fn section(&mut self, keyword: &str) -> Result<usize, IndexError> {
        let line = self.next_line()?;
        let count = line
            .strip_prefix(keyword)
            .and_then(|rest| rest.strip_prefix(' '))
            .and_then(|count| count.parse::<usize>().ok());
        count.ok_or_else(|| self.malformed(format!("expected `{} <count>`", keyword)))
    }

    fn parse(mut self) -> Result<ArchiveIndex, IndexError> {
        let header = self.next_line()?;
        if header != FORMAT_HEADER {
            return Err(self.malformed(format!("unsupported header `{}`", header)));
        }

        let location_count = self.section("locations")?;
        let mut locations = Vec::with_capacity(location_count);
        for expected in 0..location_count {
            let line = self.next_line()?;
            let (id, path) = line
                .split_once(' ')
                .ok_or_else(|| self.malformed("expected `<id> <path>`"))?;
            if id.parse::<usize>().ok() != Some(expected) {
                return Err(self.malformed(format!("location ids must be dense, got `{}`", id)));
            }
            locations.push(PathBuf::from(path));
        }

        let check_id = |parser: &Self, id: &str| -> Result<LocationId, IndexError> {
            let id: LocationId = id
                .parse()
                .map_err(|_| parser.malformed(format!("invalid location id `{}`", id)))?;
            if id as usize >= location_count {
                return Err(parser.malformed(format!("location id {} out of range", id)));
            }
            Ok(id)
        };

        let unit_count = self.section("units")?;
        let mut units = HashMap::with_capacity(unit_count);
        for _ in 0..unit_count {
            let line = self.next_line()?;
            let (name, id) = line
                .rsplit_once(' ')
                .ok_or_else(|| self.malformed("expected `<name> <locId>`"))?;
            let id = check_id(&self, id)?;
            units.insert(name.to_string(), id);
        }

        let resource_count = self.section("resources")?;
        let mut resources = HashMap::with_capacity(resource_count);
        for _ in 0..resource_count {
            let line = self.next_line()?;
            let (ids, name) = line
                .split_once(' ')
                .ok_or_else(|| self.malformed("expected `<locIds> <name>`"))?;
            let mut parsed = Vec::new();
            for id in ids.split(',') {
                parsed.push(check_id(&self, id)?);
            }
            resources.insert(name.to_string(), parsed);
        }

        Ok(ArchiveIndex {
            locations,
            units,
            resources,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ArchiveIndex {
        let mut builder = ArchiveIndexBuilder::new();
        builder.add_unit("Foo", "loc1");
        builder.add_resource("svc.txt", "loc1");
        builder.add_resource("svc.txt", "loc2");
        builder.finish()
    }

    #[test]
    fn concrete_scenario_counts_and_lookups() {
        let index = sample();
        assert_eq!(index.unit_location("Foo"), Some(Path::new("loc1")));
        assert_eq!(
            index.resource_locations("svc.txt"),
            vec![Path::new("loc1"), Path::new("loc2")]
        );
        assert_eq!(index.unit_count(), 1);
        assert_eq!(index.resource_count(), 1);
        assert_eq!(index.location_count(), 2);
    }

    #[test]
    fn unknown_lookups_are_empty() {
        let index = sample();
        assert_eq!(index.unit_location("Bar"), None);
        assert!(index.resource_locations("other.txt").is_empty());
    }

    #[test]
    fn last_write_wins_and_is_counted() {
        let mut builder = ArchiveIndexBuilder::new();
        builder.add_unit("Foo", "loc1");
        builder.add_unit("Foo", "loc2");
        // re-registering with the same owner is not an overwrite
        builder.add_unit("Foo", "loc2");
        assert_eq!(builder.overwrite_count(), 1);
        let index = builder.finish();
        assert_eq!(index.unit_location("Foo"), Some(Path::new("loc2")));
        assert_eq!(index.unit_count(), 1);
    }

    #[test]
    fn round_trip_preserves_counts_and_lookups() {
        let index = sample();
        let mut buffer = Vec::new();
        index.write_to(&mut buffer).unwrap();
        let read = ArchiveIndex::read_from(buffer.as_slice()).unwrap();
        assert_eq!(read.unit_count(), index.unit_count());
        assert_eq!(read.resource_count(), index.resource_count());
        assert_eq!(read.location_count(), index.location_count());
        assert_eq!(read.unit_location("Foo"), Some(Path::new("loc1")));
        assert_eq!(
            read.resource_locations("svc.txt"),
            vec![Path::new("loc1"), Path::new("loc2")]
        );

        // serialization is reproducible
        let mut again = Vec::new();
        read.write_to(&mut again).unwrap();
        assert_eq!(buffer, again);
    }

    #[test]
    fn read_rejects_bad_header_and_bad_ids() {
        let err = ArchiveIndex::read_from("bogus 9\n".as_bytes()).unwrap_err();
        assert!(matches!(err, IndexError::Malformed { line: 1, .. }));

        let text = format!("{}\nlocations 1\n0 loc1\nunits 1\nFoo 7\nresources 0\n", FORMAT_HEADER);
        let err = ArchiveIndex::read_from(text.as_bytes()).unwrap_err();
        assert!(matches!(err, IndexError::Malformed { line: 5, .. }));
    }

    #[test]
    fn unit_names_derive_from_entry_paths() {
        assert_eq!(
            unit_name("plugins/transport_mqtt.so"),
            Some("plugins.transport_mqtt".to_string())
        );
        assert_eq!(unit_name("core.dylib"), Some("core".to_string()));
        assert_eq!(unit_name("capabilities/yaml-codec"), None);
    }

    #[test]
    fn relocate_rewrites_prefixes() {
        let mut builder = ArchiveIndexBuilder::new();
        builder.add_unit("Foo", "build/out/a.zip");
        builder.add_resource("svc.txt", "build/out/b.zip");
        builder.relocate("build/out", "/opt/shopfloor");
        let index = builder.finish();
        assert_eq!(index.unit_location("Foo"), Some(Path::new("/opt/shopfloor/a.zip")));
        assert_eq!(
            index.resource_locations("svc.txt"),
            vec![Path::new("/opt/shopfloor/b.zip")]
        );
    }

    #[test]
    fn tolerant_indexing_collects_errors() {
        let mut builder = ArchiveIndexBuilder::new();
        let mut errors = Vec::new();
        builder.index_archives_tolerant(["/definitely/missing.zip"], &mut |e| errors.push(e));
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], IndexError::Archive { .. }));
        assert_eq!(builder.finish().location_count(), 0);
    }
}
