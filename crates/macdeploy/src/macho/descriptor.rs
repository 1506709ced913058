//! Mach-O dependency metadata extraction using goblin.
//!
//! A [`BinaryDescriptor`] is the structured view of one binary's declared
//! dependencies (`LC_LOAD_DYLIB` / `LC_LOAD_WEAK_DYLIB`) and runtime search
//! paths (`LC_RPATH`), in declaration order. Descriptors are immutable
//! snapshots: after a binary has been mutated it must be re-read.

use crate::{Error, Result};
use goblin::mach::load_command::CommandVariant;
use goblin::mach::{Mach, MachO};
use std::path::{Path, PathBuf};

/// Structured view of one Mach-O binary's load commands.
///
/// `loaded_libraries` holds the dependency references exactly as encoded in
/// the binary: absolute paths, `@rpath/...` references, or
/// `@executable_path/...` references. `search_paths` holds the `LC_RPATH`
/// entries, equally unresolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryDescriptor {
    path: PathBuf,
    loaded_libraries: Vec<String>,
    search_paths: Vec<String>,
}

impl BinaryDescriptor {
    /// Assemble a descriptor from already-known metadata.
    ///
    /// Used by alternative [`crate::inspect::BinaryInspector`] backends;
    /// production code goes through [`BinaryDescriptor::read`].
    pub fn new(
        path: impl Into<PathBuf>,
        loaded_libraries: Vec<String>,
        search_paths: Vec<String>,
    ) -> Self {
        Self {
            path: path.into(),
            loaded_libraries,
            search_paths,
        }
    }

    /// Read and parse a binary's dependency metadata.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnreadableBinary`] if the file cannot be read, is
    /// not a valid Mach-O, or its load commands are malformed. No partial
    /// descriptor is returned.
    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path).map_err(|e| Error::UnreadableBinary {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::parse(path, &data)
    }

    /// Parse a descriptor from raw Mach-O bytes.
    ///
    /// FAT/Universal binaries are supported; the first architecture slice
    /// governs, since the load commands we care about are identical across
    /// slices of the libraries we ship.
    pub fn parse(path: &Path, data: &[u8]) -> Result<Self> {
        let unreadable = |reason: String| Error::UnreadableBinary {
            path: path.to_path_buf(),
            reason,
        };

        let mach = Mach::parse(data).map_err(|e| unreadable(format!("not a Mach-O: {}", e)))?;

        let (loaded_libraries, search_paths) = match mach {
            Mach::Binary(macho) => Self::parse_slice(path, data, &macho)?,
            Mach::Fat(fat) => {
                let arch = fat
                    .iter_arches()
                    .next()
                    .ok_or_else(|| unreadable("empty FAT binary".into()))?
                    .map_err(|e| unreadable(format!("FAT arch: {}", e)))?;

                let offset = arch.offset as usize;
                let size = arch.size as usize;
                let slice_data = data
                    .get(offset..offset + size)
                    .ok_or_else(|| unreadable("FAT slice out of bounds".into()))?;

                let macho = MachO::parse(slice_data, 0)
                    .map_err(|e| unreadable(format!("FAT slice: {}", e)))?;
                Self::parse_slice(path, slice_data, &macho)?
            }
        };

        Ok(Self {
            path: path.to_path_buf(),
            loaded_libraries,
            search_paths,
        })
    }

    fn parse_slice(
        path: &Path,
        data: &[u8],
        macho: &MachO,
    ) -> Result<(Vec<String>, Vec<String>)> {
        let mut loaded_libraries = Vec::new();
        let mut search_paths = Vec::new();

        for lc in &macho.load_commands {
            match &lc.command {
                CommandVariant::LoadDylib(cmd) | CommandVariant::LoadWeakDylib(cmd) => {
                    let name =
                        load_command_string(path, data, lc.offset, cmd.cmdsize, cmd.dylib.name)?;
                    loaded_libraries.push(name);
                }
                CommandVariant::Rpath(cmd) => {
                    let entry =
                        load_command_string(path, data, lc.offset, cmd.cmdsize, cmd.path)?;
                    search_paths.push(entry);
                }
                _ => {}
            }
        }

        Ok((loaded_libraries, search_paths))
    }

    /// Absolute filesystem location of the inspected binary.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Dependency references in declaration order.
    pub fn loaded_libraries(&self) -> &[String] {
        &self.loaded_libraries
    }

    /// `LC_RPATH` entries in declaration order.
    pub fn search_paths(&self) -> &[String] {
        &self.search_paths
    }
}

/// Extracts a NUL-terminated load-command string.
///
/// The string lives inside the load command itself, at `str_offset` bytes
/// from the start of the command; `cmdsize` bounds it.
fn load_command_string(
    path: &Path,
    data: &[u8],
    lc_offset: usize,
    cmdsize: u32,
    str_offset: u32,
) -> Result<String> {
    let unreadable = |reason: String| Error::UnreadableBinary {
        path: path.to_path_buf(),
        reason,
    };

    let start = lc_offset + str_offset as usize;
    let end = lc_offset + cmdsize as usize;
    let region = data
        .get(start..end)
        .ok_or_else(|| unreadable("load command string out of bounds".into()))?;

    let bytes = region.split(|&b| b == 0).next().unwrap_or(&[]);
    if bytes.is_empty() {
        return Err(unreadable("empty load command string".into()));
    }

    let s = std::str::from_utf8(bytes)
        .map_err(|_| unreadable("load command string is not UTF-8".into()))?;
    Ok(s.to_string())
}
