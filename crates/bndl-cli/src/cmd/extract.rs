//! Extract command: unpack a built artifact.

use std::path::Path;

use anyhow::{Context, Result, bail};
use bndl_core::extract_bundle;
use comfy_table::{Table, presets::UTF8_FULL_CONDENSED};

/// Unpack `bundle` into the two destination roots and print a summary.
pub fn extract(bundle: &Path, ba_folder: &Path, extract_folder: &Path, quiet: bool) -> Result<()> {
    std::fs::create_dir_all(ba_folder)
        .with_context(|| format!("Failed to create '{}'", ba_folder.display()))?;
    std::fs::create_dir_all(extract_folder)
        .with_context(|| format!("Failed to create '{}'", extract_folder.display()))?;

    let result = extract_bundle(bundle, ba_folder, extract_folder);
    if !result.success {
        bail!(
            "Extraction of '{}' failed: {}",
            bundle.display(),
            result.error.unwrap_or_else(|| "unknown error".to_string())
        );
    }
    let manifest = result
        .manifest
        .as_ref()
        .context("extraction succeeded without a manifest")?;

    if quiet {
        return Ok(());
    }
    println!(
        "{} v{}: {} package(s), {} payload(s)",
        manifest.info.name,
        manifest.info.version,
        manifest.packages().count(),
        manifest.payloads.len()
    );

    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_header(vec!["Payload", "Packaging", "Size", "Container"]);
    for payload in &manifest.payloads {
        table.add_row(vec![
            payload.id.to_string(),
            payload.packaging.as_str().to_string(),
            payload.file_size.to_string(),
            payload
                .container
                .as_ref()
                .map_or(String::new(), ToString::to_string),
        ]);
    }
    println!("{table}");
    Ok(())
}
