//! Error types for archive indexing and plugin loading.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while building, reading, or writing an archive index.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Underlying file or stream I/O failed.
    #[error("index I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The index file did not match the expected layout.
    #[error("malformed index at line {line}: {reason}")]
    Malformed { line: usize, reason: String },

    /// An archive to be indexed could not be opened or scanned.
    #[error("cannot index archive {path}: {reason}")]
    Archive { path: PathBuf, reason: String },
}

/// Errors raised by the indexed loader.
///
/// Archive-level failures are never swallowed: an archive referenced by the
/// index that cannot be opened is a packaging-integrity violation, not a
/// normal "not found".
#[derive(Debug, Error)]
pub enum LoaderError {
    /// An archive referenced by the index cannot be opened, or an indexed
    /// entry is missing from it.
    #[error("archive unavailable: {path}: {reason}")]
    ArchiveUnavailable { path: PathBuf, reason: String },

    /// Neither this loader's index nor any parent in the chain knows the
    /// requested unit. `depth` is the number of loaders searched.
    #[error("unit not found: {name} (searched {depth} loader(s))")]
    UnitNotFound { name: String, depth: usize },

    /// Operation attempted after `close()`. Always a programming error,
    /// never silently ignored.
    #[error("loader is closed")]
    Closed,
}
