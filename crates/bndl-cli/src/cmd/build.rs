//! Build command: compile bundle sources into an artifact.

use std::path::Path;

use anyhow::{Context, Result};
use bndl_core::{BindPaths, Diagnostics, Severity, bind, link_chain, validate_packages, write_bundle};
use bndl_schema::BundleSource;

/// Compile the given sources into `output`.
///
/// Returns the numeric class of the most severe error, 0 on success.
/// Every diagnostic is printed before returning; the artifact is only
/// written when no errors were reported.
pub fn build(
    sources: &[std::path::PathBuf],
    bind_paths: &[std::path::PathBuf],
    intermediate_folder: Option<&Path>,
    output: &Path,
    quiet: bool,
) -> Result<u32> {
    let (first, rest) = sources
        .split_first()
        .context("at least one bundle source is required")?;
    let mut source = BundleSource::from_file(first)
        .with_context(|| format!("Failed to load bundle source '{}'", first.display()))?;
    for path in rest {
        let fragment = BundleSource::from_file(path)
            .with_context(|| format!("Failed to load bundle source '{}'", path.display()))?;
        source.merge(fragment);
    }

    // Source directories are implicit bind paths, searched before any
    // explicitly provided ones.
    let mut paths = BindPaths::default();
    for path in sources {
        if let Some(parent) = path.parent() {
            paths.push(parent.to_path_buf());
        }
    }
    for path in bind_paths {
        paths.push(path.clone());
    }

    // The artifact is staged in the scratch directory and only moved
    // to the output path once fully written.
    let scratch;
    if let Some(folder) = intermediate_folder {
        std::fs::create_dir_all(folder)
            .with_context(|| format!("Failed to create '{}'", folder.display()))?;
        scratch = folder.to_path_buf();
    } else {
        scratch = std::env::temp_dir();
    }
    tracing::debug!(scratch = %scratch.display(), "build scratch directory");
    let file_name = output
        .file_name()
        .with_context(|| format!("Output path '{}' has no file name", output.display()))?;
    let mut staged_name = file_name.to_os_string();
    staged_name.push(".partial");
    let staged = scratch.join(staged_name);

    let mut diag = Diagnostics::new();
    let validated = validate_packages(&source, &paths, &mut diag);
    let linked = link_chain(&source, &validated, &mut diag);
    let mut bound = bind(&source, &linked, &paths, &mut diag);

    report(&diag);
    if diag.has_errors() {
        return Ok(diag.max_error_code());
    }

    write_bundle(&mut bound, &diag, &staged)
        .with_context(|| format!("Failed to write '{}'", staged.display()))?;
    // Rename fails across filesystems (the default scratch is the
    // system temp directory); fall back to a copy.
    if std::fs::rename(&staged, output).is_err() {
        std::fs::copy(&staged, output)
            .with_context(|| format!("Failed to write '{}'", output.display()))?;
        let _ = std::fs::remove_file(&staged);
    }
    if !quiet {
        println!(
            "Built '{}' ({} package(s), {} payload(s))",
            output.display(),
            bound.manifest.packages().count(),
            bound.manifest.payloads.len()
        );
    }
    Ok(0)
}

fn report(diag: &Diagnostics) {
    for message in diag.messages() {
        let label = match message.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        eprintln!("{label} BNDL{:04}: {}", message.code, message.text);
        for related in &message.related {
            eprintln!("    {related}");
        }
    }
}
