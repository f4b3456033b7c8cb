//! Classpath descriptor parsing.
//!
//! The packaging step generates an ordered list of archive paths, either one
//! per line or joined on a single line with a path separator. Generation may
//! emit `:`-joined forward-slash paths while a Windows host expects
//! `;`-joined backslash paths, so both separators are accepted and
//! backslashes are normalized before use. Relative paths resolve against the
//! descriptor file's directory.

use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::StartupError;

/// Environment variable listing additional plugin archives appended after
/// the descriptor's entries, separator-joined like a single-line descriptor.
pub const PLUGINS_ENV: &str = "SHOPFLOOR_PLUGINS";

/// Reads and parses a classpath descriptor file. An empty classpath is a
/// descriptor error: a split deployment without archives cannot start.
pub fn read_descriptor(path: &Path) -> Result<Vec<PathBuf>, StartupError> {
    let descriptor = |reason: String| StartupError::Descriptor {
        path: path.to_path_buf(),
        reason,
    };
    let text = std::fs::read_to_string(path).map_err(|e| descriptor(e.to_string()))?;
    let base = path.parent().unwrap_or(Path::new("."));
    let entries = parse(&text, base);
    if entries.is_empty() {
        return Err(descriptor("descriptor lists no archives".to_string()));
    }
    Ok(entries)
}

/// Parses descriptor text: non-empty, non-comment lines in order, each line
/// split on path separators when joined.
pub fn parse(text: &str, base: &Path) -> Vec<PathBuf> {
    let mut entries = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        for raw in split_joined(line) {
            entries.push(resolve(&raw, base));
        }
    }
    entries
}

/// Additional archives from [`PLUGINS_ENV`], resolved against the current
/// directory. Non-existent entries are skipped with a warning, matching the
/// tolerant handling of unpacked-plugin paths.
pub fn plugins_from_env() -> Vec<PathBuf> {
    let Ok(value) = std::env::var(PLUGINS_ENV) else {
        return Vec::new();
    };
    let mut entries = Vec::new();
    for raw in split_joined(value.trim()) {
        let path = resolve(&raw, Path::new("."));
        if path.exists() {
            entries.push(path);
        } else {
            warn!(env = PLUGINS_ENV, path = %path.display(), "ignoring missing plugin path");
        }
    }
    entries
}

/// Normalizes separators and resolves against `base`.
fn resolve(raw: &str, base: &Path) -> PathBuf {
    let normalized = PathBuf::from(raw.replace('\\', "/"));
    if normalized.is_relative() && !raw.contains(':') {
        base.join(normalized)
    } else {
        normalized
    }
}

/// Splits a separator-joined line. `;` wins when present; otherwise `:` is
/// the separator, with a lone drive letter re-attached to the segment it
/// prefixes so `C:/x` survives.
fn split_joined(line: &str) -> Vec<String> {
    if line.contains(';') {
        return line
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
    }
    let mut out = Vec::new();
    let mut segments = line.split(':');
    while let Some(segment) = segments.next() {
        let segment = segment.trim();
        if segment.len() == 1 && segment.chars().all(|c| c.is_ascii_alphabetic()) {
            if let Some(rest) = segments.next() {
                out.push(format!("{}:{}", segment, rest.trim()));
                continue;
            }
        }
        if !segment.is_empty() {
            out.push(segment.to_string());
        }
    }
    out
}
