//! Split-package bootstrap.
//!
//! Turns a split deployment layout (shared/common archive plus per-service
//! archives) into one running process: assemble the loader chain in listed
//! order, load the entry unit through the final loader, and hand control to
//! the delegated entry point, propagating its exit code.

use std::ffi::{c_char, c_int, CString};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use shopfloor_core::error::LoaderError;
use shopfloor_core::index::{ArchiveIndex, ArchiveIndexBuilder};
use shopfloor_core::loader::{CodeUnit, IndexedLoader};
use tracing::{debug, info};

use crate::classpath;
use crate::error::StartupError;

/// Exported symbol every entry unit must provide:
/// `shopfloor_service_main(argc, argv) -> exit code`.
pub const ENTRY_SYMBOL: &[u8] = b"shopfloor_service_main\0";

type EntryFn = unsafe extern "C" fn(c_int, *const *const c_char) -> c_int;

/// Bootstrap lifecycle. Any failure while loading transitions straight to
/// `StartupFailed` without entering `Running`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootState {
    NotStarted,
    LoadingArchives,
    EntryLoaded,
    Running,
    Exited(i32),
    StartupFailed(String),
}

/// Assembles the loader chain for a split deployment and invokes the
/// delegated entry point.
pub struct Bootstrap {
    classpath: Vec<PathBuf>,
    entry: String,
    args: Vec<String>,
    state: BootState,
    chain: Option<Arc<IndexedLoader>>,
    unit: Option<Arc<CodeUnit>>,
}

impl Bootstrap {
    /// Creates a bootstrap over an explicit, ordered archive list.
    pub fn new(classpath: Vec<PathBuf>, entry: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            classpath,
            entry: entry.into(),
            args,
            state: BootState::NotStarted,
            chain: None,
            unit: None,
        }
    }

    /// Creates a bootstrap from a classpath descriptor file, appending any
    /// archives named by the `SHOPFLOOR_PLUGINS` environment variable.
    pub fn from_descriptor(
        descriptor: &Path,
        entry: impl Into<String>,
        args: Vec<String>,
    ) -> Result<Self, StartupError> {
        let mut classpath = classpath::read_descriptor(descriptor)?;
        classpath.extend(classpath::plugins_from_env());
        Ok(Self::new(classpath, entry, args))
    }

    /// Current lifecycle state.
    pub fn state(&self) -> &BootState {
        &self.state
    }

    /// Final loader of the assembled chain, once archives are loaded.
    pub fn chain(&self) -> Option<&Arc<IndexedLoader>> {
        self.chain.as_ref()
    }

    fn fail(&mut self, error: StartupError) -> StartupError {
        self.state = BootState::StartupFailed(error.to_string());
        error
    }

    /// Verifies every archive exists and builds one loader per archive, each
    /// parented on the previous one so later archives override earlier ones
    /// under child-first resolution. A missing archive is fatal before any
    /// loader is built; there is no partial start.
    pub fn load_archives(&mut self) -> Result<(), StartupError> {
        self.state = BootState::LoadingArchives;
        for archive in &self.classpath {
            if !archive.is_file() {
                let missing = StartupError::MissingArchive { path: archive.clone() };
                return Err(self.fail(missing));
            }
        }
        let mut parent: Option<Arc<IndexedLoader>> = None;
        for archive in &self.classpath {
            let index = match load_index(archive) {
                Ok(index) => index,
                Err(e) => return Err(self.fail(e)),
            };
            let base = archive.parent().map(Path::to_path_buf);
            let loader = Arc::new(IndexedLoader::with_base(Arc::new(index), parent.take(), base));
            debug!(archive = %archive.display(), depth = loader.depth(), "loader layer added");
            parent = Some(loader);
        }
        self.chain = parent;
        Ok(())
    }

    /// Loads the entry unit through the final loader in the chain.
    pub fn load_entry(&mut self) -> Result<(), StartupError> {
        let Some(chain) = self.chain.clone() else {
            let unresolved = StartupError::EntryUnresolved {
                name: self.entry.clone(),
                depth: 0,
            };
            return Err(self.fail(unresolved));
        };
        match chain.load_unit(&self.entry) {
            Ok(unit) => {
                info!(entry = %self.entry, origin = %unit.origin().display(), "entry unit loaded");
                self.unit = Some(unit);
                self.state = BootState::EntryLoaded;
                Ok(())
            }
            Err(LoaderError::UnitNotFound { name, depth }) => {
                let unresolved = StartupError::EntryUnresolved { name, depth };
                Err(self.fail(unresolved))
            }
            Err(e) => {
                let e = StartupError::from(e);
                Err(self.fail(e))
            }
        }
    }

    /// Invokes the delegated entry point, materializing the entry unit into
    /// `scratch` first. Returns the delegated exit code and records it in
    /// the state machine.
    pub fn run(&mut self, scratch: &Path) -> Result<i32, StartupError> {
        let Some(unit) = self.unit.clone() else {
            let invocation = StartupError::EntryInvocation {
                name: self.entry.clone(),
                reason: "entry unit not loaded".to_string(),
            };
            return Err(self.fail(invocation));
        };
        let module = match materialize(&unit, scratch) {
            Ok(path) => path,
            Err(e) => return Err(self.fail(e)),
        };
        self.state = BootState::Running;
        match invoke(&self.entry, &module, &self.args) {
            Ok(code) => {
                info!(entry = %self.entry, code, "delegated entry point returned");
                self.state = BootState::Exited(code);
                Ok(code)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Runs the full sequence: load archives, load the entry unit, invoke.
    pub fn execute(&mut self, scratch: &Path) -> Result<i32, StartupError> {
        self.load_archives()?;
        self.load_entry()?;
        self.run(scratch)
    }
}

/// Loads the prebuilt sidecar index (`<stem>.idx`) when the packaging step
/// shipped one, otherwise indexes the archive on the fly.
fn load_index(archive: &Path) -> Result<ArchiveIndex, StartupError> {
    let sidecar = archive.with_extension("idx");
    if sidecar.is_file() {
        debug!(index = %sidecar.display(), "using prebuilt archive index");
        return Ok(ArchiveIndex::read_file(&sidecar)?);
    }
    let mut builder = ArchiveIndexBuilder::new();
    builder.index_archive(archive)?;
    Ok(builder.finish())
}

/// Writes the entry unit's bytes to the scratch directory as a loadable
/// module file.
fn materialize(unit: &CodeUnit, scratch: &Path) -> Result<PathBuf, StartupError> {
    let invocation = |reason: String| StartupError::EntryInvocation {
        name: unit.name().to_string(),
        reason,
    };
    std::fs::create_dir_all(scratch).map_err(|e| invocation(e.to_string()))?;
    let file_name = format!(
        "{}.{}",
        unit.name().replace('.', "_"),
        std::env::consts::DLL_EXTENSION
    );
    let path = scratch.join(file_name);
    std::fs::write(&path, unit.bytes()).map_err(|e| invocation(e.to_string()))?;
    Ok(path)
}

/// Opens the materialized module and calls its exported entry symbol with
/// argv-style pass-through arguments.
fn invoke(entry: &str, module: &Path, args: &[String]) -> Result<i32, StartupError> {
    let invocation = |reason: String| StartupError::EntryInvocation {
        name: entry.to_string(),
        reason,
    };
    let mut argv_owned = Vec::with_capacity(args.len() + 1);
    argv_owned.push(CString::new(entry).map_err(|e| invocation(e.to_string()))?);
    for arg in args {
        argv_owned.push(CString::new(arg.as_str()).map_err(|e| invocation(e.to_string()))?);
    }
    let argv: Vec<*const c_char> = argv_owned.iter().map(|a| a.as_ptr()).collect();

    // SAFETY: the module is a platform dynamic library produced by the
    // packaging step; the entry symbol has the documented C signature.
    unsafe {
        let library = libloading::Library::new(module).map_err(|e| invocation(e.to_string()))?;
        let main: libloading::Symbol<'_, EntryFn> = library
            .get(ENTRY_SYMBOL)
            .map_err(|e| invocation(e.to_string()))?;
        Ok(main(argv.len() as c_int, argv.as_ptr()))
    }
}
