//! Bundle extraction, the inverse of the bind pipeline.
//!
//! Opens a built artifact, recovers the manifest and the
//! bootstrapper-application data document, decompresses every embedded
//! payload into its destination root (UX payloads under the BA root,
//! everything else under the general root), and verifies each payload
//! against its recorded digest. Extraction reports failure through the
//! returned [`ExtractResult`] instead of propagating a panic, so a
//! caller can still inspect whatever documents were recovered.

use std::path::{Path, PathBuf};

use bndl_schema::{
    BootstrapperApplicationData, BundleManifest, DOCUMENT_MAGIC, DocumentError, ElementLine,
    FORMAT_VERSION, Packaging, PayloadHash,
};

/// Errors opening or unpacking a bundle artifact.
#[derive(thiserror::Error, Debug)]
pub enum ExtractError {
    /// The artifact is shorter than its fixed header.
    #[error("Truncated bundle artifact")]
    Truncated,

    /// The artifact does not start with the expected magic bytes.
    #[error("Not a bundle artifact (bad magic)")]
    BadMagic,

    /// The artifact was produced by an unsupported format version.
    #[error("Unsupported bundle format version {0}")]
    UnsupportedVersion(u16),

    /// An embedded document failed to decode.
    #[error(transparent)]
    Document(#[from] DocumentError),

    /// A payload's recorded geometry points outside the artifact.
    #[error("Payload '{0}' frame lies outside the artifact")]
    BadGeometry(String),

    /// A payload's content does not match its recorded digest.
    #[error("Payload '{0}' failed hash verification")]
    HashMismatch(String),

    /// An I/O failure while reading the artifact or writing payloads.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Outcome of one extraction, failure included.
#[derive(Debug, Default)]
pub struct ExtractResult {
    /// Whether every payload was recovered and verified.
    pub success: bool,
    /// The failure description when `success` is false.
    pub error: Option<String>,
    /// The recovered manifest, when decoding got that far.
    pub manifest: Option<BundleManifest>,
    /// The recovered bootstrapper-application data document.
    pub ba_data: Option<BootstrapperApplicationData>,
}

impl ExtractResult {
    fn failure(error: &ExtractError) -> Self {
        Self {
            success: false,
            error: Some(error.to_string()),
            manifest: None,
            ba_data: None,
        }
    }

    /// Query the manifest namespace with a path selector.
    ///
    /// The namespace roots are `Chain`, `Payload`, and `Container`;
    /// `Chain` may be narrowed by element name (`Chain/MsiPackage`)
    /// and any final segment may carry an attribute filter
    /// (`Payload[Id='test.msi']`). Returns canonical element lines in
    /// document order.
    pub fn select_manifest(&self, selector: &str) -> Vec<String> {
        let Some(manifest) = &self.manifest else {
            return Vec::new();
        };
        let Some(segments) = parse_selector(selector) else {
            return Vec::new();
        };
        let Some((root, rest)) = segments.split_first() else {
            return Vec::new();
        };
        let candidates: Vec<(String, String)> = match root.name.as_str() {
            "Chain" => manifest
                .chain
                .iter()
                .map(|e| (e.element_name().to_string(), e.to_element_line()))
                .collect(),
            "Payload" => manifest
                .payloads
                .iter()
                .map(|p| ("Payload".to_string(), p.to_element_line()))
                .collect(),
            "Container" => manifest
                .containers
                .iter()
                .map(|c| {
                    let line = ElementLine::new("Container")
                        .attr("Id", &c.id)
                        .attr(
                            "Type",
                            match c.kind {
                                bndl_schema::ContainerKind::Ux => "ux",
                                bndl_schema::ContainerKind::Attached => "attached",
                            },
                        )
                        .attr("Size", c.size)
                        .attr("PayloadCount", c.payload_count)
                        .finish();
                    ("Container".to_string(), line)
                })
                .collect(),
            _ => return Vec::new(),
        };
        filter_candidates(candidates, root, rest)
    }

    /// Query the bootstrapper-application data namespace.
    ///
    /// The namespace roots are `PackageProperties` and
    /// `PackageFeatureInfo`, each optionally filtered by attribute
    /// (`PackageFeatureInfo[Package='MsiA']`).
    pub fn select_ba_data(&self, selector: &str) -> Vec<String> {
        let Some(ba) = &self.ba_data else {
            return Vec::new();
        };
        let Some(segments) = parse_selector(selector) else {
            return Vec::new();
        };
        let Some((root, rest)) = segments.split_first() else {
            return Vec::new();
        };
        let candidates: Vec<(String, String)> = match root.name.as_str() {
            "PackageProperties" => ba
                .package_properties
                .iter()
                .map(|p| ("PackageProperties".to_string(), p.to_element_line()))
                .collect(),
            "PackageFeatureInfo" => ba
                .feature_infos
                .iter()
                .map(|f| ("PackageFeatureInfo".to_string(), f.to_element_line()))
                .collect(),
            _ => return Vec::new(),
        };
        filter_candidates(candidates, root, rest)
    }
}

struct Segment {
    name: String,
    filter: Option<(String, String)>,
}

fn parse_selector(selector: &str) -> Option<Vec<Segment>> {
    let mut segments = Vec::new();
    for part in selector.split('/') {
        let part = part.trim();
        if part.is_empty() {
            return None;
        }
        if let Some((name, rest)) = part.split_once('[') {
            let filter = rest.strip_suffix(']')?;
            let (attr, value) = filter.split_once('=')?;
            let value = value.strip_prefix('\'')?.strip_suffix('\'')?;
            segments.push(Segment {
                name: name.to_string(),
                filter: Some((attr.to_string(), value.to_string())),
            });
        } else {
            segments.push(Segment {
                name: part.to_string(),
                filter: None,
            });
        }
    }
    Some(segments)
}

fn filter_candidates(
    candidates: Vec<(String, String)>,
    root: &Segment,
    rest: &[Segment],
) -> Vec<String> {
    let mut out = Vec::new();
    for (element, line) in candidates {
        let narrowed = match rest {
            [] => root,
            [child] => {
                if element != child.name {
                    continue;
                }
                child
            }
            _ => continue,
        };
        if let Some((attr, value)) = &narrowed.filter
            && !line.contains(&format!(" {attr}='{value}'"))
        {
            continue;
        }
        out.push(line);
    }
    out
}

/// Extract a bundle artifact into the two destination roots.
///
/// UX payloads land under `ba_dir`, all other embedded payloads under
/// `extract_dir`, each at its declared relative file path. Download
/// payloads have no bytes in the artifact and are skipped.
pub fn extract_bundle(bundle: &Path, ba_dir: &Path, extract_dir: &Path) -> ExtractResult {
    match try_extract(bundle, ba_dir, extract_dir) {
        Ok(result) => result,
        Err(err) => {
            tracing::warn!(bundle = %bundle.display(), error = %err, "extraction failed");
            ExtractResult::failure(&err)
        }
    }
}

fn try_extract(
    bundle: &Path,
    ba_dir: &Path,
    extract_dir: &Path,
) -> Result<ExtractResult, ExtractError> {
    let bytes = std::fs::read(bundle)?;
    if bytes.len() < 26 {
        return Err(ExtractError::Truncated);
    }
    if bytes[..4] != DOCUMENT_MAGIC {
        return Err(ExtractError::BadMagic);
    }
    let version = u16::from_le_bytes([bytes[4], bytes[5]]);
    if version != FORMAT_VERSION {
        return Err(ExtractError::UnsupportedVersion(version));
    }
    let manifest_len = read_u64(&bytes, 6)? as usize;
    let ba_len = read_u64(&bytes, 14)? as usize;
    let container_count = u32::from_le_bytes(
        bytes
            .get(22..26)
            .ok_or(ExtractError::Truncated)?
            .try_into()
            .map_err(|_| ExtractError::Truncated)?,
    ) as usize;

    // Header fields are untrusted; every length is bounds-checked
    // against the artifact before use.
    let table_end = container_count
        .checked_mul(16)
        .and_then(|t| t.checked_add(26))
        .ok_or(ExtractError::Truncated)?;
    if bytes.len() < table_end {
        return Err(ExtractError::Truncated);
    }
    let mut table = Vec::with_capacity(container_count);
    let mut cursor = 26;
    for _ in 0..container_count {
        let offset = read_u64(&bytes, cursor)? as usize;
        let size = read_u64(&bytes, cursor + 8)? as usize;
        table.push((offset, size));
        cursor += 16;
    }

    let manifest_end = cursor
        .checked_add(manifest_len)
        .ok_or(ExtractError::Truncated)?;
    let ba_end = manifest_end
        .checked_add(ba_len)
        .ok_or(ExtractError::Truncated)?;
    if bytes.len() < ba_end {
        return Err(ExtractError::Truncated);
    }
    let manifest = BundleManifest::decode(&bytes[cursor..manifest_end])?;
    let ba_data = BootstrapperApplicationData::decode(&bytes[manifest_end..ba_end])?;

    for payload in &manifest.payloads {
        if payload.packaging != Packaging::Embedded {
            continue;
        }
        let id = payload.id.to_string();
        let container_index = manifest
            .containers
            .iter()
            .position(|c| Some(&c.id) == payload.container.as_ref())
            .ok_or_else(|| ExtractError::BadGeometry(id.clone()))?;
        let (container_offset, container_size) = *table
            .get(container_index)
            .ok_or_else(|| ExtractError::BadGeometry(id.clone()))?;
        let (frame_offset, packed_size) = payload
            .source_offset
            .zip(payload.packed_size)
            .ok_or_else(|| ExtractError::BadGeometry(id.clone()))?;
        let start = container_offset
            .checked_add(frame_offset as usize)
            .ok_or_else(|| ExtractError::BadGeometry(id.clone()))?;
        let end = start
            .checked_add(packed_size as usize)
            .ok_or_else(|| ExtractError::BadGeometry(id.clone()))?;
        let frame_end = (frame_offset as usize)
            .checked_add(packed_size as usize)
            .ok_or_else(|| ExtractError::BadGeometry(id.clone()))?;
        if frame_end > container_size || bytes.len() < end {
            return Err(ExtractError::BadGeometry(id));
        }

        let raw = zstd::decode_all(&bytes[start..end])
            .map_err(|_| ExtractError::HashMismatch(id.clone()))?;
        if let Some(hash) = &payload.hash
            && &PayloadHash::compute(&raw) != hash
        {
            return Err(ExtractError::HashMismatch(id));
        }

        let root = if manifest.ux.payload_refs.contains(&payload.id) {
            ba_dir
        } else {
            extract_dir
        };
        let dest = dest_path(root, &payload.file_path)
            .ok_or_else(|| ExtractError::BadGeometry(id.clone()))?;
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&dest, &raw)?;
        tracing::debug!(payload = %id, dest = %dest.display(), "extracted payload");
    }

    Ok(ExtractResult {
        success: true,
        error: None,
        manifest: Some(manifest),
        ba_data: Some(ba_data),
    })
}

fn read_u64(bytes: &[u8], at: usize) -> Result<u64, ExtractError> {
    let slice = bytes.get(at..at + 8).ok_or(ExtractError::Truncated)?;
    Ok(u64::from_le_bytes(
        slice.try_into().map_err(|_| ExtractError::Truncated)?,
    ))
}

/// Join a declared relative path under a root, rejecting traversal.
fn dest_path(root: &Path, file_path: &str) -> Option<PathBuf> {
    let relative = Path::new(file_path);
    if relative.is_absolute()
        || relative
            .components()
            .any(|c| matches!(c, std::path::Component::ParentDir))
    {
        return None;
    }
    Some(root.join(relative))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bndl_schema::BundleSource;

    use crate::bind::bind;
    use crate::container::write_bundle;
    use crate::diag::Diagnostics;
    use crate::link::link_chain;
    use crate::resolve::BindPaths;
    use crate::validate::validate_packages;

    fn build_fixture(dir: &tempfile::TempDir) -> PathBuf {
        for name in ["ba.exe", "test.msi", "lib.dll"] {
            std::fs::write(dir.path().join(name), name.as_bytes().repeat(50)).unwrap();
        }
        let paths = BindPaths::new(vec![dir.path().to_path_buf()]);
        let source = BundleSource::parse(
            r#"
[bundle]
name = "TestBundle"
version = "1.0.0"

[[ux.payload]]
source_file = "ba.exe"

[[chain]]
package = "MsiA"

[[package]]
type = "msi"
id = "MsiA"
source_file = "test.msi"
product_code = "{040011E1-F84C-4927-AD62-50A5EC19CA32}"
version = "1.0.0.0"

[[package.payload]]
source_file = "lib.dll"

[[package.feature]]
id = "ProductFeature"
size = 34
"#,
        )
        .unwrap();
        let mut diag = Diagnostics::new();
        let validated = validate_packages(&source, &paths, &mut diag);
        let linked = link_chain(&source, &validated, &mut diag);
        let mut bound = bind(&source, &linked, &paths, &mut diag);
        let out = dir.path().join("bundle.bndl");
        write_bundle(&mut bound, &diag, &out).unwrap();
        out
    }

    #[test]
    fn extraction_recovers_every_payload() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = build_fixture(&dir);
        let ba_dir = dir.path().join("ba");
        let extract_dir = dir.path().join("files");
        let result = extract_bundle(&bundle, &ba_dir, &extract_dir);
        assert!(result.success, "{:?}", result.error);

        assert_eq!(
            std::fs::read(ba_dir.join("ba.exe")).unwrap(),
            b"ba.exe".repeat(50)
        );
        assert_eq!(
            std::fs::read(extract_dir.join("test.msi")).unwrap(),
            b"test.msi".repeat(50)
        );
        assert_eq!(
            std::fs::read(extract_dir.join("lib.dll")).unwrap(),
            b"lib.dll".repeat(50)
        );
    }

    #[test]
    fn selectors_return_canonical_lines() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = build_fixture(&dir);
        let result = extract_bundle(&bundle, &dir.path().join("ba"), &dir.path().join("files"));

        let chain = result.select_manifest("Chain/MsiPackage");
        assert_eq!(chain.len(), 1);
        assert!(chain[0].starts_with("<MsiPackage Id='MsiA'"));

        let by_id = result.select_manifest("Payload[Id='test.msi']");
        assert_eq!(by_id.len(), 1);
        assert!(by_id[0].contains("Packaging='embedded'"));

        let containers = result.select_manifest("Container");
        assert_eq!(containers.len(), 2);

        let features = result.select_ba_data("PackageFeatureInfo[Package='MsiA']");
        assert_eq!(features.len(), 1);
        assert!(features[0].contains("Feature='ProductFeature'"));
    }

    #[test]
    fn whole_chain_selector_includes_boundaries() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = build_fixture(&dir);
        let result = extract_bundle(&bundle, &dir.path().join("ba"), &dir.path().join("files"));
        let chain = result.select_manifest("Chain");
        assert_eq!(chain.len(), 2);
        assert!(chain[0].starts_with("<RollbackBoundary Id='DefaultBoundary'"));
    }

    #[test]
    fn corrupted_payload_fails_verification() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = build_fixture(&dir);
        let mut bytes = std::fs::read(&bundle).unwrap();
        let len = bytes.len();
        bytes[len - 10] ^= 0xFF;
        std::fs::write(&bundle, bytes).unwrap();

        let result = extract_bundle(&bundle, &dir.path().join("ba"), &dir.path().join("files"));
        assert!(!result.success);
        assert!(result.error.unwrap().contains("hash verification"));
    }

    #[test]
    fn truncated_artifact_fails_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = build_fixture(&dir);
        let bytes = std::fs::read(&bundle).unwrap();
        std::fs::write(&bundle, &bytes[..20]).unwrap();
        let result = extract_bundle(&bundle, &dir.path().join("ba"), &dir.path().join("files"));
        assert!(!result.success);
        assert!(result.manifest.is_none());
    }

    #[test]
    fn oversized_manifest_length_fails_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let hostile = dir.path().join("hostile.bndl");
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&DOCUMENT_MAGIC);
        bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&u64::MAX.to_le_bytes()); // manifest length
        bytes.extend_from_slice(&0u64.to_le_bytes()); // ba-data length
        bytes.extend_from_slice(&0u32.to_le_bytes()); // container count
        std::fs::write(&hostile, bytes).unwrap();

        let result = extract_bundle(&hostile, &dir.path().join("ba"), &dir.path().join("files"));
        assert!(!result.success);
        assert!(result.error.unwrap().contains("Truncated"));
        assert!(result.manifest.is_none());
    }

    #[test]
    fn oversized_container_count_fails_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let hostile = dir.path().join("hostile.bndl");
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&DOCUMENT_MAGIC);
        bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&0u64.to_le_bytes());
        bytes.extend_from_slice(&0u64.to_le_bytes());
        bytes.extend_from_slice(&u32::MAX.to_le_bytes()); // container count
        std::fs::write(&hostile, bytes).unwrap();

        let result = extract_bundle(&hostile, &dir.path().join("ba"), &dir.path().join("files"));
        assert!(!result.success);
        assert!(result.error.unwrap().contains("Truncated"));
    }

    #[test]
    fn hostile_container_offset_fails_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = build_fixture(&dir);
        let mut bytes = std::fs::read(&bundle).unwrap();
        // First container-table entry: offset at 26..34.
        bytes[26..34].copy_from_slice(&u64::MAX.to_le_bytes());
        std::fs::write(&bundle, bytes).unwrap();

        let result = extract_bundle(&bundle, &dir.path().join("ba"), &dir.path().join("files"));
        assert!(!result.success);
        assert!(result.error.unwrap().contains("outside the artifact"));
    }

    #[test]
    fn non_bundle_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let bogus = dir.path().join("bogus.bin");
        std::fs::write(&bogus, vec![0u8; 64]).unwrap();
        let result = extract_bundle(&bogus, &dir.path().join("ba"), &dir.path().join("files"));
        assert!(!result.success);
        assert!(result.error.unwrap().contains("bad magic"));
    }
}
