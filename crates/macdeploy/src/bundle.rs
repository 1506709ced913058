//! Target application bundle context.
//!
//! [`AppBundleContext`] is the process-scoped summary of the `.app` bundle
//! being made self-contained: its main executable's descriptor, the
//! `Contents/Frameworks` directory relocated libraries land in, and the
//! set of library names an upstream deployment step already placed there.

use crate::inspect::BinaryInspector;
use crate::macho::BinaryDescriptor;
use crate::resolve::resolve_search_path;
use crate::{Error, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Process-scoped summary of the target `.app` bundle.
pub struct AppBundleContext {
    bundle_root: PathBuf,
    main_executable: BinaryDescriptor,
    frameworks_dir: PathBuf,
    names_in_frameworks: HashSet<String>,
}

impl AppBundleContext {
    /// Open a bundle and validate its structure.
    ///
    /// The main executable's name is read from `Contents/Info.plist`
    /// (`CFBundleExecutable`).
    ///
    /// # Errors
    ///
    /// Fails with [`Error::Bundle`] if the frameworks directory is missing
    /// or if no search path of the main executable resolves to it — without
    /// that rpath the loader could never find relocated libraries, so
    /// nothing this tool does would produce a working bundle.
    pub fn open<I: BinaryInspector>(inspector: &I, bundle_root: impl AsRef<Path>) -> Result<Self> {
        let bundle_root = inspector.canonicalize(bundle_root.as_ref())?;

        let executable_name = main_executable_name(&bundle_root)?;
        let executable_path = bundle_root
            .join("Contents")
            .join("MacOS")
            .join(&executable_name);
        let main_executable = inspector.inspect(&executable_path)?;

        let frameworks_dir = inspector
            .canonicalize(&bundle_root.join("Contents").join("Frameworks"))
            .map_err(|_| {
                Error::Bundle(format!(
                    "missing frameworks directory in {}",
                    bundle_root.display()
                ))
            })?;

        let mut has_frameworks_rpath = false;
        for entry in main_executable.search_paths() {
            // Entries the resolver does not support are not fatal here;
            // the planner reports them if it ever analyzes this binary.
            match resolve_search_path(inspector, entry, main_executable.path()) {
                Ok(resolved) if resolved == frameworks_dir => {
                    has_frameworks_rpath = true;
                    break;
                }
                Ok(_) => {}
                Err(e) => log::debug!("skipping main executable rpath {:?}: {}", entry, e),
            }
        }
        if !has_frameworks_rpath {
            return Err(Error::Bundle(format!(
                "no rpath of {} resolves to {}",
                main_executable.path().display(),
                frameworks_dir.display()
            )));
        }

        let names_in_frameworks = inspector
            .list_library_names(&frameworks_dir)?
            .into_iter()
            .collect();

        Ok(Self {
            bundle_root,
            main_executable,
            frameworks_dir,
            names_in_frameworks,
        })
    }

    /// Canonical bundle root (the `.app` directory).
    pub fn bundle_root(&self) -> &Path {
        &self.bundle_root
    }

    /// Descriptor of the bundle's primary executable.
    pub fn main_executable(&self) -> &BinaryDescriptor {
        &self.main_executable
    }

    /// Directory inside the bundle where relocated libraries live.
    pub fn frameworks_directory(&self) -> &Path {
        &self.frameworks_dir
    }

    /// Whether a library name was already placed in `Contents/Frameworks`
    /// by an upstream deployment step. Such libraries are never re-copied.
    pub fn is_already_in_frameworks(&self, name: &str) -> bool {
        self.names_in_frameworks.contains(name)
    }
}

/// Reads `CFBundleExecutable` out of the bundle's `Info.plist`.
fn main_executable_name(bundle_root: &Path) -> Result<String> {
    let info_plist = bundle_root.join("Contents").join("Info.plist");
    let value = plist::Value::from_file(&info_plist)?;
    value
        .as_dictionary()
        .and_then(|dict| dict.get("CFBundleExecutable"))
        .and_then(|v| v.as_string())
        .map(str::to_string)
        .ok_or_else(|| {
            Error::Bundle(format!(
                "{} has no CFBundleExecutable entry",
                info_plist.display()
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::fs;
    use std::path::Component;
    use tempfile::TempDir;

    /// In-memory inspector over a real temp directory tree: descriptors
    /// and directory listings are canned, canonicalization is lexical.
    struct FakeInspector {
        descriptors: HashMap<PathBuf, BinaryDescriptor>,
        listings: HashMap<PathBuf, Vec<String>>,
    }

    impl BinaryInspector for FakeInspector {
        fn inspect(&self, path: &Path) -> Result<BinaryDescriptor> {
            self.descriptors
                .get(&normalize(path))
                .cloned()
                .ok_or_else(|| Error::UnreadableBinary {
                    path: path.to_path_buf(),
                    reason: "no such binary".into(),
                })
        }

        fn list_library_names(&self, directory: &Path) -> Result<Vec<String>> {
            self.listings
                .get(&normalize(directory))
                .cloned()
                .ok_or_else(|| Error::SearchPathUnreadable {
                    directory: directory.to_path_buf(),
                    source: std::io::Error::from(std::io::ErrorKind::NotFound),
                })
        }

        fn canonicalize(&self, path: &Path) -> Result<PathBuf> {
            Ok(normalize(path))
        }
    }

    fn normalize(path: &Path) -> PathBuf {
        let mut out = PathBuf::new();
        for comp in path.components() {
            match comp {
                Component::ParentDir => {
                    out.pop();
                }
                Component::CurDir => {}
                other => out.push(other),
            }
        }
        out
    }

    const INFO_PLIST: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
    <key>CFBundleExecutable</key>
    <string>CloudCompare</string>
</dict>
</plist>
"#;

    fn scaffold_bundle(rpaths: Vec<String>) -> (TempDir, PathBuf, FakeInspector) {
        let tmp = TempDir::new().unwrap();
        let bundle = tmp.path().join("CloudCompare.app");
        fs::create_dir_all(bundle.join("Contents/MacOS")).unwrap();
        fs::create_dir_all(bundle.join("Contents/Frameworks")).unwrap();
        fs::write(bundle.join("Contents/Info.plist"), INFO_PLIST).unwrap();

        let exe = bundle.join("Contents/MacOS/CloudCompare");
        let mut descriptors = HashMap::new();
        descriptors.insert(
            normalize(&exe),
            BinaryDescriptor::new(&exe, vec!["/usr/lib/libSystem.B.dylib".into()], rpaths),
        );
        let mut listings = HashMap::new();
        listings.insert(
            normalize(&bundle.join("Contents/Frameworks")),
            vec!["QtCore.framework".into(), "libcc.dylib".into()],
        );

        (
            tmp,
            bundle,
            FakeInspector {
                descriptors,
                listings,
            },
        )
    }

    #[test]
    fn open_accepts_bundle_with_frameworks_rpath() {
        let (_tmp, bundle, inspector) =
            scaffold_bundle(vec!["@executable_path/../Frameworks".into()]);
        let ctx = AppBundleContext::open(&inspector, &bundle).unwrap();

        assert!(ctx.frameworks_directory().ends_with("Contents/Frameworks"));
        assert!(ctx.is_already_in_frameworks("libcc.dylib"));
        assert!(ctx.is_already_in_frameworks("QtCore.framework"));
        assert!(!ctx.is_already_in_frameworks("libpdal.dylib"));
        assert_eq!(
            ctx.main_executable().loaded_libraries(),
            ["/usr/lib/libSystem.B.dylib"]
        );
    }

    #[test]
    fn open_rejects_bundle_without_frameworks_rpath() {
        let (_tmp, bundle, inspector) = scaffold_bundle(vec!["/opt/somewhere/lib".into()]);
        let result = AppBundleContext::open(&inspector, &bundle);
        assert!(matches!(result, Err(Error::Bundle(_))));
    }

    #[test]
    fn open_tolerates_unsupported_rpaths_besides_the_frameworks_one() {
        let (_tmp, bundle, inspector) = scaffold_bundle(vec![
            "@loader_path/../lib".into(),
            "@executable_path/../Frameworks".into(),
        ]);
        assert!(AppBundleContext::open(&inspector, &bundle).is_ok());
    }

    #[test]
    fn open_requires_info_plist() {
        let (_tmp, bundle, inspector) =
            scaffold_bundle(vec!["@executable_path/../Frameworks".into()]);
        fs::remove_file(bundle.join("Contents/Info.plist")).unwrap();
        let result = AppBundleContext::open(&inspector, &bundle);
        assert!(result.is_err());
    }
}
