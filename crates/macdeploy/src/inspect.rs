//! Filesystem and binary introspection seam.
//!
//! The planner never touches goblin or `std::fs` directly; it goes through
//! [`BinaryInspector`], so a whole dependency graph can be described
//! in memory for tests while production uses [`MachOInspector`].

use crate::macho::BinaryDescriptor;
use crate::{Error, Result};
use std::path::{Path, PathBuf};

/// Read-only view of binaries and directories, as the planner needs them.
pub trait BinaryInspector {
    /// Read a binary's dependency metadata.
    fn inspect(&self, path: &Path) -> Result<BinaryDescriptor>;

    /// List the file names present in a search-path directory.
    fn list_library_names(&self, directory: &Path) -> Result<Vec<String>>;

    /// Normalize a path: collapse `..` segments and symlinks.
    fn canonicalize(&self, path: &Path) -> Result<PathBuf>;
}

/// Production inspector backed by goblin and `std::fs`.
pub struct MachOInspector;

impl BinaryInspector for MachOInspector {
    fn inspect(&self, path: &Path) -> Result<BinaryDescriptor> {
        BinaryDescriptor::read(path)
    }

    fn list_library_names(&self, directory: &Path) -> Result<Vec<String>> {
        let entries = std::fs::read_dir(directory).map_err(|e| Error::SearchPathUnreadable {
            directory: directory.to_path_buf(),
            source: e,
        })?;

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| Error::SearchPathUnreadable {
                directory: directory.to_path_buf(),
                source: e,
            })?;
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        // read_dir order is platform-dependent; membership checks do not
        // care, but a stable order keeps logs reproducible.
        names.sort();
        Ok(names)
    }

    fn canonicalize(&self, path: &Path) -> Result<PathBuf> {
        Ok(std::fs::canonicalize(path)?)
    }
}
