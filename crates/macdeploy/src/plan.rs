//! Relocation planning.
//!
//! The planner walks the dependency graph of one or more root binaries
//! (typically the plugins of an app bundle), classifies every discovered
//! reference, and emits an ordered, de-duplicated list of
//! [`RelocationAction`]s. This is a reachability computation, not a
//! topological one: traversal order does not matter, and the executor
//! sequences copies before rewrites regardless.
//!
//! All caches (resolved search-path directory listings, the copy-scheduled
//! set) are owned by the planner instance, so independent planning runs
//! never interfere.

use crate::bundle::AppBundleContext;
use crate::inspect::BinaryInspector;
use crate::macho::BinaryDescriptor;
use crate::resolve::{resolve_search_path, EXECUTABLE_PATH_MARKER, RPATH_MARKER};
use crate::{Error, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// One unit of relocation work.
///
/// A closed sum type: the executor matches exhaustively, so adding an
/// action kind is a compile-time-checked exercise. Actions are plan-local
/// values, de-duplicated before execution and consumed exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RelocationAction {
    /// Copy a library file into the bundle's frameworks directory.
    CopyLibrary {
        source: PathBuf,
        destination_dir: PathBuf,
    },
    /// Rewrite one embedded dependency reference of `library` in place.
    RewriteLoadPath {
        library: PathBuf,
        old_reference: String,
        new_reference: String,
    },
    /// Remove every `LC_RPATH` entry of `library`.
    ///
    /// Only issued for relocated dependency libraries, never for a root
    /// binary: a root's search paths are still needed to locate libraries
    /// legitimately placed by earlier deployment steps.
    StripSearchPaths { library: PathBuf },
}

/// A search-path directory in discovery order, with its cached listing.
struct SearchDir {
    directory: PathBuf,
    names: Vec<String>,
}

/// Graph walker producing a [`RelocationAction`] plan.
pub struct RelocationPlanner<'a, I: BinaryInspector> {
    inspector: &'a I,
    bundle: &'a AppBundleContext,
    /// Discovered search-path directories, in discovery order. Lookup ties
    /// between directories holding the same file name are broken by this
    /// order: first found wins.
    search_dirs: Vec<SearchDir>,
    known_search_dirs: HashSet<PathBuf>,
    /// Libraries already scheduled for copy. Consulted before emitting, so
    /// cyclic dependency graphs terminate without relying on deduplication.
    scheduled_copies: HashSet<PathBuf>,
    /// Everything ever pushed onto the work queue, roots included.
    queued: HashSet<PathBuf>,
    actions: Vec<RelocationAction>,
}

/// Plan the relocation of `roots` into `bundle`.
///
/// Convenience wrapper over [`RelocationPlanner`] for a single run.
pub fn create_relocation_plan<I: BinaryInspector>(
    inspector: &I,
    bundle: &AppBundleContext,
    roots: &[PathBuf],
) -> Result<Vec<RelocationAction>> {
    RelocationPlanner::new(inspector, bundle).plan(roots)
}

impl<'a, I: BinaryInspector> RelocationPlanner<'a, I> {
    pub fn new(inspector: &'a I, bundle: &'a AppBundleContext) -> Self {
        Self {
            inspector,
            bundle,
            search_dirs: Vec::new(),
            known_search_dirs: HashSet::new(),
            scheduled_copies: HashSet::new(),
            queued: HashSet::new(),
            actions: Vec::new(),
        }
    }

    /// Walk the dependency graphs of `roots` and return the de-duplicated
    /// action list. Consumes the planner: descriptors are point-in-time
    /// snapshots, so a plan must not outlive mutations made from it.
    ///
    /// # Errors
    ///
    /// Any classification or resolution failure aborts the whole run; see
    /// the crate-level error taxonomy. No partial plan is returned.
    pub fn plan(mut self, roots: &[PathBuf]) -> Result<Vec<RelocationAction>> {
        let mut queue: Vec<PathBuf> = Vec::new();
        let mut root_set: HashSet<PathBuf> = HashSet::new();

        for root in roots {
            let root = self.inspector.canonicalize(root)?;
            if self.queued.insert(root.clone()) {
                queue.push(root.clone());
            }
            root_set.insert(root);
        }

        while let Some(current) = queue.pop() {
            let descriptor = self.inspector.inspect(&current)?;
            log::debug!(
                "analyzing {} ({} libraries, {} rpaths)",
                current.display(),
                descriptor.loaded_libraries().len(),
                descriptor.search_paths().len()
            );

            self.discover_search_paths(&descriptor)?;

            let current_copied = self.scheduled_copies.contains(&current);
            for reference in descriptor.loaded_libraries() {
                self.classify(&descriptor, reference, current_copied, &mut queue)?;
            }

            // A relocated library's search paths become unnecessary, and
            // unsafe, once it lives in the flat frameworks directory. Roots
            // keep theirs.
            if !descriptor.search_paths().is_empty() && !root_set.contains(&current) {
                let library = self.relocated_instance(&descriptor, current_copied)?;
                log::info!("will strip search paths of {}", library.display());
                self.actions.push(RelocationAction::StripSearchPaths { library });
            }
        }

        Ok(dedup_actions(self.actions))
    }

    /// Resolve and cache every newly seen search-path entry of `descriptor`.
    ///
    /// Resolution is relative to the bundle's main executable, which is
    /// what `@executable_path` means once the bundle is launched.
    fn discover_search_paths(&mut self, descriptor: &BinaryDescriptor) -> Result<()> {
        for entry in descriptor.search_paths() {
            let resolved = resolve_search_path(
                self.inspector,
                entry,
                self.bundle.main_executable().path(),
            )
            .map_err(|e| match e {
                // Attribute the unsupported entry to its declaring binary.
                Error::UnsupportedSearchPath { entry, .. } => Error::UnsupportedSearchPath {
                    binary: descriptor.path().to_path_buf(),
                    entry,
                },
                other => other,
            })?;

            if self.known_search_dirs.insert(resolved.clone()) {
                let names = self.inspector.list_library_names(&resolved)?;
                log::debug!(
                    "search path {:?} -> {} ({} entries)",
                    entry,
                    resolved.display(),
                    names.len()
                );
                self.search_dirs.push(SearchDir {
                    directory: resolved,
                    names,
                });
            }
        }
        Ok(())
    }

    /// Classify one loaded-library reference of `descriptor` (see the four
    /// cases in the module docs) and schedule the resulting actions.
    fn classify(
        &mut self,
        descriptor: &BinaryDescriptor,
        reference: &str,
        current_copied: bool,
        queue: &mut Vec<PathBuf>,
    ) -> Result<()> {
        if is_system_library(reference) {
            log::debug!("ignoring system library {:?}", reference);
            return Ok(());
        }

        if let Some(rest) = strip_marker(reference, RPATH_MARKER) {
            // Frameworks are directories, so the reference can have several
            // components; the top-level name identifies them.
            let top = rest.split('/').next().unwrap_or(rest);
            if self.bundle.is_already_in_frameworks(top) {
                log::debug!("{:?} already present in frameworks", reference);
                return Ok(());
            }
            self.relocate_rpath_reference(descriptor, reference, current_copied, queue)
        } else if reference.starts_with('/') {
            self.relocate_absolute_reference(descriptor, reference, current_copied, queue)
        } else if strip_marker(reference, EXECUTABLE_PATH_MARKER).is_some() {
            // Already loadable relative to the executable; nothing to
            // rewrite, but its own dependencies still need analysis.
            let resolved = resolve_search_path(
                self.inspector,
                reference,
                self.bundle.main_executable().path(),
            )?;
            if self.queued.insert(resolved.clone()) {
                queue.push(resolved);
            }
            Ok(())
        } else {
            Err(Error::UnsupportedReferenceKind {
                binary: descriptor.path().to_path_buf(),
                reference: reference.to_string(),
            })
        }
    }

    /// An `@rpath/...` reference: find it in the discovered search-path
    /// directories, first match wins.
    fn relocate_rpath_reference(
        &mut self,
        descriptor: &BinaryDescriptor,
        reference: &str,
        current_copied: bool,
        queue: &mut Vec<PathBuf>,
    ) -> Result<()> {
        let leaf = leaf_name(reference);
        let found = self
            .search_dirs
            .iter()
            .find(|dir| dir.names.iter().any(|n| n == leaf))
            .map(|dir| dir.directory.join(leaf));

        let source = found.ok_or_else(|| Error::UnresolvedDependency {
            binary: descriptor.path().to_path_buf(),
            reference: reference.to_string(),
            searched: self
                .search_dirs
                .iter()
                .map(|d| d.directory.clone())
                .collect(),
        })?;

        log::debug!("found {:?} at {}", reference, source.display());
        self.schedule_copy(source, queue);

        // Relocation flattens the frameworks directory, so a reference
        // with intermediate components must be rewritten to point at the
        // flat name.
        let flat = format!("{}/{}", RPATH_MARKER, leaf);
        if flat != reference {
            self.schedule_rewrite(descriptor, current_copied, reference.to_string(), flat)?;
        }
        Ok(())
    }

    /// A plain absolute reference outside the bundle: copy it in and point
    /// the referencing binary at `@rpath/<file name>` instead.
    fn relocate_absolute_reference(
        &mut self,
        descriptor: &BinaryDescriptor,
        reference: &str,
        current_copied: bool,
        queue: &mut Vec<PathBuf>,
    ) -> Result<()> {
        let source = PathBuf::from(reference);
        self.schedule_copy(source, queue);

        let new_reference = format!("{}/{}", RPATH_MARKER, leaf_name(reference));
        self.schedule_rewrite(
            descriptor,
            current_copied,
            reference.to_string(),
            new_reference,
        )
    }

    /// Schedule `source` for copy into the frameworks directory and queue
    /// it for analysis, both exactly once per library.
    fn schedule_copy(&mut self, source: PathBuf, queue: &mut Vec<PathBuf>) {
        if self.scheduled_copies.insert(source.clone()) {
            log::info!(
                "will copy {} -> {}",
                source.display(),
                self.bundle.frameworks_directory().display()
            );
            self.actions.push(RelocationAction::CopyLibrary {
                source: source.clone(),
                destination_dir: self.bundle.frameworks_directory().to_path_buf(),
            });
            if self.queued.insert(source.clone()) {
                queue.push(source);
            }
        }
    }

    /// Schedule a load-path rewrite on the correct instance of the
    /// referencing binary: the copy inside the bundle when the binary was
    /// itself relocated, the original otherwise. Mutating the out-of-bundle
    /// original would corrupt files this tool does not own.
    fn schedule_rewrite(
        &mut self,
        descriptor: &BinaryDescriptor,
        current_copied: bool,
        old_reference: String,
        new_reference: String,
    ) -> Result<()> {
        let library = self.relocated_instance(descriptor, current_copied)?;
        log::info!(
            "will rewrite {:?} -> {:?} in {}",
            old_reference,
            new_reference,
            library.display()
        );
        self.actions.push(RelocationAction::RewriteLoadPath {
            library,
            old_reference,
            new_reference,
        });
        Ok(())
    }

    /// Where mutations of this binary must land: its copied-in location if
    /// it was scheduled for copy, its own path otherwise.
    fn relocated_instance(
        &self,
        descriptor: &BinaryDescriptor,
        current_copied: bool,
    ) -> Result<PathBuf> {
        if current_copied {
            let name = descriptor.path().file_name().ok_or_else(|| {
                Error::Bundle(format!(
                    "library {} has no file name",
                    descriptor.path().display()
                ))
            })?;
            Ok(self.bundle.frameworks_directory().join(name))
        } else {
            Ok(descriptor.path().to_path_buf())
        }
    }
}

/// System-provided libraries are the loader's problem, not ours.
fn is_system_library(reference: &str) -> bool {
    let path = Path::new(reference);
    path.parent() == Some(Path::new("/usr/lib")) || reference.starts_with("/System")
}

/// Strip `marker` off `reference` at a path-segment boundary.
fn strip_marker<'r>(reference: &'r str, marker: &str) -> Option<&'r str> {
    let rest = reference.strip_prefix(marker)?;
    rest.strip_prefix('/').or(if rest.is_empty() { Some("") } else { None })
}

/// Collapse identical actions, keeping first-occurrence order. The same
/// dependency can be reached through several paths in the graph.
fn dedup_actions(actions: Vec<RelocationAction>) -> Vec<RelocationAction> {
    let mut seen = HashSet::new();
    actions.into_iter().filter(|a| seen.insert(a.clone())).collect()
}

/// Final path component of a symbolic reference.
fn leaf_name(reference: &str) -> &str {
    reference.rsplit('/').next().unwrap_or(reference)
}
