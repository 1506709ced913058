//! Command-line frontend for bundle relocation.
//!
//! Enumerates the plugin binaries of a macOS application bundle, plans the
//! relocation of their out-of-bundle dylib dependencies, applies the plan,
//! and optionally re-signs the bundle afterwards.

use clap::Parser;
use macdeploy_rs::{
    create_relocation_plan, AppBundleContext, InstallNameTool, MachOInspector, RelocationAction,
    RelocationExecutor,
};
use std::path::{Path, PathBuf};
use std::process::Command;
use walkdir::WalkDir;

#[derive(Parser)]
#[command(name = "macdeploy")]
#[command(about = "Makes a macOS app bundle self-contained by relocating dylib dependencies")]
struct Cli {
    /// Path to the .app bundle
    bundle: PathBuf,

    /// Directory holding the root binaries to analyze, relative to the bundle
    #[arg(long, default_value = "Contents/PlugIns/ccPlugins")]
    plugins_dir: PathBuf,

    /// Print the relocation plan without applying it
    #[arg(short = 'n', long)]
    dry_run: bool,

    /// Code-sign the bundle with this identity after relocation
    #[arg(short = 's', long)]
    sign: Option<String>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let cli = Cli::parse();

    let inspector = MachOInspector;
    let context = AppBundleContext::open(&inspector, &cli.bundle)?;

    let plugins_dir = context.bundle_root().join(&cli.plugins_dir);
    let mut roots = Vec::new();
    for entry in WalkDir::new(&plugins_dir).max_depth(1) {
        let entry = entry?;
        if entry.file_type().is_file() {
            roots.push(entry.into_path());
        }
    }
    roots.sort();
    log::info!(
        "analyzing {} root binaries under {}",
        roots.len(),
        plugins_dir.display()
    );

    let plan = create_relocation_plan(&inspector, &context, &roots)?;
    if plan.is_empty() {
        println!("bundle is already self-contained, nothing to do");
        return Ok(());
    }

    if cli.dry_run {
        for action in &plan {
            println!("{}", describe(action));
        }
        return Ok(());
    }

    RelocationExecutor::new(&inspector, &InstallNameTool).execute(&plan)?;
    println!("applied {} relocation actions", plan.len());

    if let Some(identity) = cli.sign.as_deref() {
        codesign(context.bundle_root(), identity)?;
    }

    Ok(())
}

fn describe(action: &RelocationAction) -> String {
    match action {
        RelocationAction::CopyLibrary {
            source,
            destination_dir,
        } => format!(
            "copy    {} -> {}",
            source.display(),
            destination_dir.display()
        ),
        RelocationAction::RewriteLoadPath {
            library,
            old_reference,
            new_reference,
        } => format!(
            "rewrite {}: {} -> {}",
            library.display(),
            old_reference,
            new_reference
        ),
        RelocationAction::StripSearchPaths { library } => {
            format!("strip   {}", library.display())
        }
    }
}

/// Re-sign the mutated bundle and verify the result.
fn codesign(bundle: &Path, identity: &str) -> Result<(), Box<dyn std::error::Error>> {
    let status = Command::new("codesign")
        .args([
            "--verify",
            "--force",
            "--options=runtime",
            "--timestamp",
            "--deep",
            "--sign",
            identity,
        ])
        .arg(bundle)
        .status()?;
    if !status.success() {
        return Err(format!("codesign exited with {status}").into());
    }

    let status = Command::new("codesign")
        .args(["-vvv", "--deep"])
        .arg(bundle)
        .status()?;
    if !status.success() {
        return Err(format!("codesign verification exited with {status}").into());
    }
    Ok(())
}
