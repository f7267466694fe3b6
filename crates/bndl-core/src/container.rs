//! Bundle artifact writing.
//!
//! The artifact is a fixed header, the framed manifest, the framed
//! bootstrapper-application data document, then the containers. Each
//! container is a concatenation of zstd-compressed payload frames; the
//! frame offsets and packed sizes are finalized into the manifest's
//! payload records before the manifest is serialized, and the header
//! carries the absolute container offsets, so a reader never scans.
//!
//! Header layout (all integers little endian):
//!
//! ```text
//! magic (4) | format version (2) | manifest len (8) | ba-data len (8)
//! | container count (4) | per container: offset (8) size (8)
//! ```

use std::io::Write as _;
use std::path::Path;

use bndl_schema::{DOCUMENT_MAGIC, DocumentError, FORMAT_VERSION, Packaging};

use crate::bind::BoundBundle;
use crate::diag::Diagnostics;

/// Compression level for payload frames.
const ZSTD_LEVEL: i32 = 3;

/// Errors writing a bundle artifact.
#[derive(thiserror::Error, Debug)]
pub enum WriteError {
    /// The diagnostics collector carries errors; nothing is written.
    #[error("Refusing to write bundle: {0} error(s) reported")]
    Refused(usize),

    /// An embedded payload has no recorded source file.
    #[error("No source file recorded for embedded payload '{0}'")]
    MissingSource(String),

    /// An I/O failure while reading a payload or writing the artifact.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A document failed to serialize.
    #[error(transparent)]
    Document(#[from] DocumentError),
}

/// Size in bytes of the fixed header for a given container count.
pub fn header_len(container_count: usize) -> u64 {
    4 + 2 + 8 + 8 + 4 + 16 * container_count as u64
}

/// Write the bound bundle to `out`.
///
/// Refuses to write anything when `diag` carries errors. Container
/// sizes and per-payload frame offsets are finalized into the bound
/// manifest as a side effect, so a subsequent in-memory inspection
/// sees the same numbers the artifact carries.
pub fn write_bundle(
    bound: &mut BoundBundle,
    diag: &Diagnostics,
    out: &Path,
) -> Result<(), WriteError> {
    if diag.has_errors() {
        let count = diag
            .messages()
            .iter()
            .filter(|m| m.severity == crate::diag::Severity::Error)
            .count();
        return Err(WriteError::Refused(count));
    }

    // Pack every container, recording frame geometry back into the
    // manifest payload records.
    let mut container_blobs: Vec<Vec<u8>> = Vec::with_capacity(bound.manifest.containers.len());
    for index in 0..bound.manifest.containers.len() {
        let container_id = bound.manifest.containers[index].id.clone();
        let mut blob = Vec::new();
        let mut count = 0u32;
        for payload in &mut bound.manifest.payloads {
            if payload.packaging != Packaging::Embedded
                || payload.container.as_ref() != Some(&container_id)
            {
                continue;
            }
            let disk = bound
                .sources
                .get(&payload.id)
                .ok_or_else(|| WriteError::MissingSource(payload.id.to_string()))?;
            let raw = std::fs::read(disk)?;
            let packed = zstd::encode_all(raw.as_slice(), ZSTD_LEVEL)?;
            payload.source_offset = Some(blob.len() as u64);
            payload.packed_size = Some(packed.len() as u64);
            blob.extend_from_slice(&packed);
            count += 1;
        }
        let layout = &mut bound.manifest.containers[index];
        layout.size = blob.len() as u64;
        layout.payload_count = count;
        container_blobs.push(blob);
    }

    let manifest_bytes = bound.manifest.encode()?;
    let ba_bytes = bound.ba_data.encode()?;

    let mut offset =
        header_len(container_blobs.len()) + manifest_bytes.len() as u64 + ba_bytes.len() as u64;
    let mut table = Vec::with_capacity(container_blobs.len());
    for blob in &container_blobs {
        table.push((offset, blob.len() as u64));
        offset += blob.len() as u64;
    }

    let mut file = std::fs::File::create(out)?;
    file.write_all(&DOCUMENT_MAGIC)?;
    file.write_all(&FORMAT_VERSION.to_le_bytes())?;
    file.write_all(&(manifest_bytes.len() as u64).to_le_bytes())?;
    file.write_all(&(ba_bytes.len() as u64).to_le_bytes())?;
    file.write_all(&(container_blobs.len() as u32).to_le_bytes())?;
    for (offset, size) in &table {
        file.write_all(&offset.to_le_bytes())?;
        file.write_all(&size.to_le_bytes())?;
    }
    file.write_all(&manifest_bytes)?;
    file.write_all(&ba_bytes)?;
    for blob in &container_blobs {
        file.write_all(blob)?;
    }
    file.flush()?;

    tracing::info!(
        artifact = %out.display(),
        bytes = offset,
        containers = container_blobs.len(),
        "wrote bundle artifact"
    );
    Ok(())
}
