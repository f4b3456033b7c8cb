//! Bootstrap error taxonomy and exit-code mapping.

use std::path::PathBuf;

use shopfloor_core::error::{IndexError, LoaderError};
use thiserror::Error;

/// Startup failures. All of them stem from static packaging mistakes, so
/// none is retried; each maps to a dedicated exit code in the 120..=124
/// range, distinct from the delegated application's own failure codes.
#[derive(Debug, Error)]
pub enum StartupError {
    /// The classpath descriptor file is missing, unreadable, or empty.
    #[error("cannot read classpath descriptor {path}: {reason}")]
    Descriptor { path: PathBuf, reason: String },

    /// An archive listed in the classpath descriptor does not exist.
    #[error("classpath archive missing: {path}")]
    MissingArchive { path: PathBuf },

    /// The entry unit could not be resolved through the assembled chain.
    #[error("entry unit {name} not found (searched {depth} loader(s))")]
    EntryUnresolved { name: String, depth: usize },

    /// The entry unit loaded but could not be invoked.
    #[error("cannot invoke entry unit {name}: {reason}")]
    EntryInvocation { name: String, reason: String },

    /// Loader-level failure while assembling or using the chain.
    #[error(transparent)]
    Loader(#[from] LoaderError),

    /// Index-level failure while reading or building an archive index.
    #[error(transparent)]
    Index(#[from] IndexError),
}

impl StartupError {
    /// Process exit code for this failure. The whole range is reserved for
    /// startup failures so operators can tell a packaging problem from an
    /// application bug.
    pub fn exit_code(&self) -> i32 {
        match self {
            StartupError::Descriptor { .. } => 120,
            StartupError::MissingArchive { .. } => 121,
            StartupError::EntryUnresolved { .. } => 122,
            StartupError::EntryInvocation { .. } => 123,
            StartupError::Loader(_) | StartupError::Index(_) => 124,
        }
    }
}

/// Narrows a delegated exit code to the process exit range. Codes already in
/// `0..=255` pass through verbatim; anything else is truncated to its low
/// byte so a failure stays a failure, and the rare wrap to zero lands on 125
/// (the remaining code of the reserved startup range) instead of success.
pub fn process_exit_code(code: i32) -> u8 {
    match u8::try_from(code) {
        Ok(code) => code,
        Err(_) => match code as u8 {
            0 => 125,
            truncated => truncated,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_stay_in_reserved_range() {
        let errors = [
            StartupError::Descriptor {
                path: "cp".into(),
                reason: "gone".into(),
            },
            StartupError::MissingArchive { path: "a.zip".into() },
            StartupError::EntryUnresolved {
                name: "svc.main".into(),
                depth: 3,
            },
            StartupError::EntryInvocation {
                name: "svc.main".into(),
                reason: "no symbol".into(),
            },
            StartupError::Loader(LoaderError::Closed),
        ];
        for e in &errors {
            assert!((120..=124).contains(&e.exit_code()), "{:?}", e);
        }
    }

    #[test]
    fn delegated_failure_codes_never_map_to_success() {
        assert_eq!(process_exit_code(0), 0);
        assert_eq!(process_exit_code(7), 7);
        assert_eq!(process_exit_code(255), 255);
        assert_eq!(process_exit_code(-1), 255);
        assert_eq!(process_exit_code(-2), 254);
        assert_eq!(process_exit_code(256), 125);
        assert_eq!(process_exit_code(-256), 125);
        assert_eq!(process_exit_code(300), 44);
    }
}
