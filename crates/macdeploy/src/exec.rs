//! Relocation plan execution.
//!
//! Applies a de-duplicated action list strictly in the order copies,
//! then rewrites, then search-path strips: every referenced file must
//! physically exist before any rewrite is attempted. Execution is
//! synchronous and sequential; any failure aborts the run, leaving the
//! bundle possibly partially modified (re-running after fixing the cause
//! is the recovery path — already-placed libraries are skipped by the
//! planner on the next run).

use crate::inspect::BinaryInspector;
use crate::plan::RelocationAction;
use crate::{Error, Result};
use std::path::Path;
use std::process::Command;

/// In-place mutation of a binary's load commands.
///
/// The production implementation is [`InstallNameTool`]; tests substitute
/// a recording editor.
pub trait LoadCommandEditor {
    /// Rewrite one embedded dependency reference.
    fn change_reference(&self, binary: &Path, old: &str, new: &str) -> Result<()>;

    /// Delete one `LC_RPATH` entry.
    fn delete_search_path(&self, binary: &Path, entry: &str) -> Result<()>;
}

/// Editor shelling out to the host's `install_name_tool`.
pub struct InstallNameTool;

impl InstallNameTool {
    fn run(&self, binary: &Path, args: &[&str]) -> Result<()> {
        let status = Command::new("install_name_tool")
            .args(args)
            .arg(binary)
            .status()
            .map_err(|e| Error::MutationFailed {
                binary: binary.to_path_buf(),
                detail: format!("failed to run install_name_tool: {}", e),
            })?;

        if status.success() {
            Ok(())
        } else {
            Err(Error::MutationFailed {
                binary: binary.to_path_buf(),
                detail: format!("install_name_tool {} exited with {}", args.join(" "), status),
            })
        }
    }
}

impl LoadCommandEditor for InstallNameTool {
    fn change_reference(&self, binary: &Path, old: &str, new: &str) -> Result<()> {
        self.run(binary, &["-change", old, new])
    }

    fn delete_search_path(&self, binary: &Path, entry: &str) -> Result<()> {
        self.run(binary, &["-delete_rpath", entry])
    }
}

/// Applies a relocation plan.
pub struct RelocationExecutor<'a, I: BinaryInspector, E: LoadCommandEditor> {
    inspector: &'a I,
    editor: &'a E,
}

impl<'a, I: BinaryInspector, E: LoadCommandEditor> RelocationExecutor<'a, I, E> {
    pub fn new(inspector: &'a I, editor: &'a E) -> Self {
        Self { inspector, editor }
    }

    /// Apply `actions`: all copies, then all rewrites, then all strips.
    ///
    /// # Errors
    ///
    /// [`Error::CopyFailed`] if a source is missing or a destination cannot
    /// be written; [`Error::MutationFailed`] for rewrite or strip failures,
    /// reported with the binary path and the exact reference being changed.
    /// All are fatal.
    pub fn execute(&self, actions: &[RelocationAction]) -> Result<()> {
        let mut copies = Vec::new();
        let mut rewrites = Vec::new();
        let mut strips = Vec::new();
        for action in actions {
            match action {
                RelocationAction::CopyLibrary { .. } => copies.push(action),
                RelocationAction::RewriteLoadPath { .. } => rewrites.push(action),
                RelocationAction::StripSearchPaths { .. } => strips.push(action),
            }
        }

        for action in copies {
            if let RelocationAction::CopyLibrary {
                source,
                destination_dir,
            } = action
            {
                self.copy_library(source, destination_dir)?;
            }
        }

        for action in rewrites {
            if let RelocationAction::RewriteLoadPath {
                library,
                old_reference,
                new_reference,
            } = action
            {
                log::info!(
                    "rewriting {:?} -> {:?} in {}",
                    old_reference,
                    new_reference,
                    library.display()
                );
                self.editor
                    .change_reference(library, old_reference, new_reference)?;
            }
        }

        for action in strips {
            if let RelocationAction::StripSearchPaths { library } = action {
                self.strip_search_paths(library)?;
            }
        }

        Ok(())
    }

    fn copy_library(&self, source: &Path, destination_dir: &Path) -> Result<()> {
        let file_name = source.file_name().ok_or_else(|| Error::CopyFailed {
            source_path: source.to_path_buf(),
            destination: destination_dir.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "no file name"),
        })?;
        let destination = destination_dir.join(file_name);

        log::info!("copying {} -> {}", source.display(), destination.display());
        std::fs::copy(source, &destination).map_err(|e| Error::CopyFailed {
            source_path: source.to_path_buf(),
            destination,
            source: e,
        })?;
        Ok(())
    }

    /// The binary is re-read to enumerate the rpaths to delete: the plan
    /// holds no descriptor snapshots, and by now the file is the copied
    /// instance inside the bundle.
    fn strip_search_paths(&self, library: &Path) -> Result<()> {
        let descriptor = self.inspector.inspect(library)?;
        for entry in descriptor.search_paths() {
            log::info!("deleting rpath {:?} of {}", entry, library.display());
            self.editor.delete_search_path(library, entry)?;
        }
        Ok(())
    }
}
