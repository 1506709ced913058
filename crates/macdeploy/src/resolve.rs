//! Symbolic path resolution.
//!
//! Mach-O load commands reference other binaries through loader markers.
//! This module turns the one marker that occurs in practice for search
//! paths, `@executable_path`, into a concrete filesystem location relative
//! to the referencing binary. Every other marker is rejected rather than
//! guessed at.

use crate::inspect::BinaryInspector;
use crate::{Error, Result};
use std::path::{Path, PathBuf};

/// Marker resolving to the directory containing the running executable.
pub const EXECUTABLE_PATH_MARKER: &str = "@executable_path";

/// Marker resolved against the declared runtime search paths.
pub const RPATH_MARKER: &str = "@rpath";

/// Resolve a symbolic search-path entry to an absolute, normalized directory.
///
/// `@executable_path` resolves relative to `referencing_binary`'s parent
/// directory; plain absolute entries are normalized as-is.
///
/// # Errors
///
/// Returns [`Error::UnsupportedSearchPath`] for any other marker
/// (`@loader_path`, `@rpath`, relative entries): the offending binary and
/// raw entry are reported so support can be extended deliberately.
pub fn resolve_search_path<I: BinaryInspector>(
    inspector: &I,
    entry: &str,
    referencing_binary: &Path,
) -> Result<PathBuf> {
    let unsupported = || Error::UnsupportedSearchPath {
        binary: referencing_binary.to_path_buf(),
        entry: entry.to_string(),
    };

    if let Some(rest) = entry.strip_prefix(EXECUTABLE_PATH_MARKER) {
        // Require a segment boundary: "@executable_pathology" is not ours.
        if !rest.is_empty() && !rest.starts_with('/') {
            return Err(unsupported());
        }
        let parent = referencing_binary.parent().ok_or_else(|| {
            Error::Bundle(format!(
                "binary {} has no parent directory",
                referencing_binary.display()
            ))
        })?;
        let joined = parent.join(rest.trim_start_matches('/'));
        inspector.canonicalize(&joined)
    } else if entry.starts_with('@') {
        Err(unsupported())
    } else if Path::new(entry).is_absolute() {
        inspector.canonicalize(Path::new(entry))
    } else {
        // Relative rpath entries are resolved against the loader's cwd,
        // which is meaningless for a relocated bundle.
        Err(unsupported())
    }
}
