//! Inspect command: selector queries over a built artifact.

use std::path::Path;

use anyhow::{Context, Result, bail};
use bndl_core::extract_bundle;

/// Print the canonical element lines matching `selector`.
pub fn inspect(bundle: &Path, selector: &str, ba_data: bool) -> Result<()> {
    // Payloads are unpacked into a scratch directory that is dropped
    // with the query; only the documents are of interest here.
    let scratch = tempfile::tempdir().context("Failed to create scratch directory")?;
    let result = extract_bundle(
        bundle,
        &scratch.path().join("ba"),
        &scratch.path().join("files"),
    );
    if !result.success {
        bail!(
            "Could not open '{}': {}",
            bundle.display(),
            result.error.unwrap_or_else(|| "unknown error".to_string())
        );
    }

    let lines = if ba_data {
        result.select_ba_data(selector)
    } else {
        result.select_manifest(selector)
    };
    if lines.is_empty() {
        bail!("Selector '{selector}' matched nothing");
    }
    for line in lines {
        println!("{line}");
    }
    Ok(())
}
