//! Error types for bundle relocation.
//!
//! Every public operation in this crate returns [`crate::Result`], which
//! uses the [`enum@Error`] type below. There is no partial-success mode:
//! any error aborts the whole run, because a half-relocated bundle is
//! unsafe to ship and hard to diagnose after the fact. Each variant
//! carries enough context (binary path, raw reference string, directories
//! consulted) for an operator to fix the inputs and re-run.

use std::path::PathBuf;
use thiserror::Error;

/// Error type for relocation planning and execution.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A binary's dependency metadata could not be obtained.
    ///
    /// The file is not a valid Mach-O, or its load commands are malformed.
    /// No partial descriptor is ever produced: an incomplete dependency
    /// list would silently yield an incomplete relocation plan.
    #[error("cannot inspect {}: {reason}", path.display())]
    UnreadableBinary { path: PathBuf, reason: String },

    /// A search-path (rpath) entry uses a marker this system does not model.
    ///
    /// Only `@executable_path` indirection and plain absolute directories
    /// are supported for `LC_RPATH` entries.
    #[error("unsupported search path entry {entry:?} declared by {}", binary.display())]
    UnsupportedSearchPath { binary: PathBuf, entry: String },

    /// A load-command reference uses an encoding this system does not model.
    #[error("cannot handle relocation of {reference:?} loaded by {}", binary.display())]
    UnsupportedReferenceKind { binary: PathBuf, reference: String },

    /// An `@rpath` reference was not found in any known search-path directory.
    #[error(
        "could not find {reference:?} needed by {} in any search path directory (consulted {searched:?})",
        binary.display()
    )]
    UnresolvedDependency {
        binary: PathBuf,
        reference: String,
        searched: Vec<PathBuf>,
    },

    /// A search-path directory could not be listed.
    #[error("cannot list search path directory {}: {source}", directory.display())]
    SearchPathUnreadable {
        directory: PathBuf,
        source: std::io::Error,
    },

    /// Copying a library into the bundle failed.
    #[error("failed to copy {} to {}: {source}", source_path.display(), destination.display())]
    CopyFailed {
        source_path: PathBuf,
        destination: PathBuf,
        source: std::io::Error,
    },

    /// Rewriting or stripping a binary's load commands failed.
    ///
    /// Reported with the exact reference being changed to aid manual
    /// recovery, since the bundle may be left partially modified.
    #[error("failed to mutate {}: {detail}", binary.display())]
    MutationFailed { binary: PathBuf, detail: String },

    /// The target application bundle violates a structural precondition.
    ///
    /// For example the main executable declares no rpath resolving to the
    /// bundle's frameworks directory.
    #[error("invalid app bundle: {0}")]
    Bundle(String),

    /// Property list parsing failed (`Contents/Info.plist`).
    #[error("plist error: {0}")]
    Plist(#[from] plist::Error),
}
