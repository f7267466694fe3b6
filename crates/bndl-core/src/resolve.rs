//! Payload resolution.
//!
//! Validates and normalizes a single payload declaration: enforces the
//! source-attribute mutual-exclusion matrix, locates local source
//! files against the bind paths, computes size and content hash, and
//! decides the packaging mode. All violations for one declaration are
//! reported together; the matrix is order-independent.

use std::path::{Path, PathBuf};

use bndl_schema::{Packaging, PackageKind, Payload, PayloadHash, PayloadId, PayloadSource};

use crate::diag::{Diagnostics, codes};

/// Ordered search roots for authored source files.
///
/// Lookup tries a direct join against each root in declaration order,
/// then falls back to a recursive search by file name so that sources
/// referenced by bare name still resolve (first match wins).
#[derive(Debug, Clone, Default)]
pub struct BindPaths {
    roots: Vec<PathBuf>,
}

impl BindPaths {
    /// Create a search list from the given roots, in order.
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self { roots }
    }

    /// Append one more root at the end of the search order.
    pub fn push(&mut self, root: PathBuf) {
        self.roots.push(root);
    }

    /// Number of search roots.
    pub fn len(&self) -> usize {
        self.roots.len()
    }

    /// Whether no roots are configured.
    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Locate a source file, trying direct joins before a recursive
    /// file-name search.
    pub fn find(&self, source_file: &str) -> Option<PathBuf> {
        let relative = Path::new(source_file);
        if relative.is_absolute() && relative.is_file() {
            return Some(relative.to_path_buf());
        }
        for root in &self.roots {
            let candidate = root.join(relative);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
        let wanted = relative.file_name()?;
        for root in &self.roots {
            for entry in walkdir::WalkDir::new(root)
                .into_iter()
                .filter_map(Result::ok)
            {
                if entry.file_type().is_file() && entry.file_name() == wanted {
                    return Some(entry.into_path());
                }
            }
        }
        None
    }
}

/// A payload resolved against the bind paths.
#[derive(Debug, Clone)]
pub struct ResolvedPayload {
    /// The normalized payload record (container assignment still open).
    pub payload: Payload,
    /// Absolute path of the local source file, when one exists.
    pub disk_path: Option<PathBuf>,
}

/// Resolve one payload declaration.
///
/// `element` names the declaring element in diagnostics (`Payload`,
/// `MsiPackagePayload`, ...). Returns `None` after recording
/// diagnostics when the declaration is illegal or the source file
/// cannot be found.
pub fn resolve_payload(
    decl: &PayloadSource,
    element: &str,
    bind_paths: &BindPaths,
    diag: &mut Diagnostics,
) -> Option<ResolvedPayload> {
    let mut failed = false;

    // The whole matrix is evaluated before bailing so one pass reports
    // every violation on the declaration.
    if decl.source_file.is_some() {
        for (attr, present) in [
            ("Hash", decl.hash.is_some()),
            (
                "CertificatePublicKey",
                decl.certificate_public_key.is_some(),
            ),
            (
                "CertificateThumbprint",
                decl.certificate_thumbprint.is_some(),
            ),
        ] {
            if present {
                diag.error(
                    codes::ILLEGAL_ATTRIBUTE_WITH_OTHER,
                    format!(
                        "The {element}/@{attr} attribute cannot be specified when attribute \
                         SourceFile is present."
                    ),
                );
                failed = true;
            }
        }
    }

    if decl.certificate_public_key.is_some() && decl.certificate_thumbprint.is_none() {
        diag.error(
            codes::EXPECTED_ATTRIBUTE_WITH_OTHER,
            format!(
                "The {element}/@CertificateThumbprint attribute was not found; it is required \
                 when attribute CertificatePublicKey is specified."
            ),
        );
        failed = true;
    }
    if decl.certificate_thumbprint.is_some() && decl.certificate_public_key.is_none() {
        diag.error(
            codes::EXPECTED_ATTRIBUTE_WITH_OTHER,
            format!(
                "The {element}/@CertificatePublicKey attribute was not found; it is required \
                 when attribute CertificateThumbprint is specified."
            ),
        );
        failed = true;
    }

    if element == PackageKind::Msp.payload_element() && decl.hash.is_some() {
        diag.error(
            codes::UNEXPECTED_ATTRIBUTE,
            format!("The {element} element contains an unexpected attribute 'Hash'."),
        );
        failed = true;
    }

    if decl.source_file.is_none() && decl.hash.is_none() {
        diag.error(
            codes::EXPECTED_ATTRIBUTES,
            format!(
                "The {element} element's SourceFile or Hash attribute was not found; one of \
                 these is required."
            ),
        );
        failed = true;
    }
    if decl.name.is_none() && decl.source_file.is_none() {
        diag.error(
            codes::EXPECTED_ATTRIBUTES,
            format!(
                "The {element} element's Name or SourceFile attribute was not found; one of \
                 these is required."
            ),
        );
        failed = true;
    }

    if decl.hash.is_some() && decl.source_file.is_none() && decl.download_url.is_none() {
        diag.error(
            codes::EXPECTED_DOWNLOAD_URL,
            format!(
                "The {element}'s DownloadUrl attribute was not found; it is required without \
                 attribute SourceFile present."
            ),
        );
        failed = true;
    }

    if failed {
        return None;
    }

    if let Some(source_file) = &decl.source_file {
        let Some(disk_path) = bind_paths.find(source_file) else {
            diag.error(
                codes::FILE_NOT_FOUND,
                format!(
                    "The source file '{source_file}' could not be found; searched {} bind \
                     path(s).",
                    bind_paths.len()
                ),
            );
            return None;
        };

        let file_size = match std::fs::metadata(&disk_path) {
            Ok(meta) => meta.len(),
            Err(err) => {
                diag.error(
                    codes::FILE_NOT_FOUND,
                    format!("The source file '{source_file}' could not be read: {err}"),
                );
                return None;
            }
        };
        let hash = match PayloadHash::compute_file(&disk_path) {
            Ok(hash) => hash,
            Err(err) => {
                diag.error(
                    codes::FILE_NOT_FOUND,
                    format!("The source file '{source_file}' could not be hashed: {err}"),
                );
                return None;
            }
        };

        let file_path = decl
            .name
            .clone()
            .unwrap_or_else(|| file_name_of(source_file));
        let packaging = if decl.compressed == Some(false) {
            Packaging::Download
        } else {
            Packaging::Embedded
        };
        tracing::debug!(payload = %file_path, size = file_size, "resolved local payload");

        return Some(ResolvedPayload {
            payload: Payload {
                id: PayloadId::new(file_path.clone()),
                file_path,
                file_size,
                hash: Some(hash),
                packaging,
                source_path: None,
                container: None,
                download_url: decl.download_url.clone(),
                certificate_public_key: None,
                certificate_thumbprint: None,
                source_offset: None,
                packed_size: None,
            },
            disk_path: Some(disk_path),
        });
    }

    // Remote payload, verified at download time by hash or pinned
    // certificate. The matrix above guarantees a name and, when a hash
    // is given, a download URL.
    let hash = match &decl.hash {
        Some(raw) => match PayloadHash::new(raw.clone()) {
            Ok(hash) => Some(hash),
            Err(err) => {
                diag.error(
                    codes::ILLEGAL_ATTRIBUTE_VALUE,
                    format!("The {element}/@Hash attribute value is invalid: {err}"),
                );
                return None;
            }
        },
        None => None,
    };

    let file_path = decl.name.clone().unwrap_or_default();
    tracing::debug!(payload = %file_path, "resolved download payload");
    Some(ResolvedPayload {
        payload: Payload {
            id: PayloadId::new(file_path.clone()),
            file_path,
            file_size: decl.size.unwrap_or(0),
            hash,
            packaging: Packaging::Download,
            source_path: None,
            container: None,
            download_url: decl.download_url.clone(),
            certificate_public_key: decl.certificate_public_key.clone(),
            certificate_thumbprint: decl.certificate_thumbprint.clone(),
            source_offset: None,
            packed_size: None,
        },
        disk_path: None,
    })
}

fn file_name_of(source_file: &str) -> String {
    Path::new(source_file)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| source_file.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_with(files: &[(&str, &[u8])]) -> (tempfile::TempDir, BindPaths) {
        let dir = tempfile::tempdir().unwrap();
        for (name, content) in files {
            let path = dir.path().join(name);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).unwrap();
            }
            std::fs::write(path, content).unwrap();
        }
        let paths = BindPaths::new(vec![dir.path().to_path_buf()]);
        (dir, paths)
    }

    fn local(source_file: &str) -> PayloadSource {
        PayloadSource {
            source_file: Some(source_file.into()),
            ..PayloadSource::default()
        }
    }

    #[test]
    fn resolves_local_file_with_size_and_hash() {
        let (_dir, paths) = scratch_with(&[("test.msi", b"msi bytes")]);
        let mut diag = Diagnostics::new();
        let resolved = resolve_payload(&local("test.msi"), "Payload", &paths, &mut diag).unwrap();
        assert!(!diag.has_errors());
        assert_eq!(resolved.payload.file_size, 9);
        assert_eq!(
            resolved.payload.hash,
            Some(PayloadHash::compute(b"msi bytes"))
        );
        assert_eq!(resolved.payload.packaging, Packaging::Embedded);
        assert_eq!(resolved.payload.file_path, "test.msi");
    }

    #[test]
    fn source_file_and_hash_are_mutually_exclusive() {
        let (_dir, paths) = scratch_with(&[("test.exe", b"x")]);
        let mut diag = Diagnostics::new();
        let decl = PayloadSource {
            hash: Some(PayloadHash::compute(b"x").as_str().to_string()),
            ..local("test.exe")
        };
        assert!(resolve_payload(&decl, "ExePackagePayload", &paths, &mut diag).is_none());
        assert_eq!(
            diag.lines(),
            vec![
                "The ExePackagePayload/@Hash attribute cannot be specified when attribute \
                 SourceFile is present."
            ]
        );
        assert_eq!(diag.max_error_code(), codes::ILLEGAL_ATTRIBUTE_WITH_OTHER);
    }

    #[test]
    fn missing_source_file_and_hash_fails() {
        let (_dir, paths) = scratch_with(&[]);
        let mut diag = Diagnostics::new();
        let decl = PayloadSource {
            name: Some("remote.msu".into()),
            ..PayloadSource::default()
        };
        assert!(resolve_payload(&decl, "MsuPackagePayload", &paths, &mut diag).is_none());
        assert_eq!(
            diag.lines(),
            vec![
                "The MsuPackagePayload element's SourceFile or Hash attribute was not found; \
                 one of these is required."
            ]
        );
        assert_eq!(diag.max_error_code(), codes::EXPECTED_ATTRIBUTES);
    }

    #[test]
    fn missing_name_and_source_file_fails() {
        let (_dir, paths) = scratch_with(&[]);
        let mut diag = Diagnostics::new();
        let decl = PayloadSource {
            hash: Some(PayloadHash::compute(b"y").as_str().to_string()),
            download_url: Some("https://example.test/y".into()),
            ..PayloadSource::default()
        };
        assert!(resolve_payload(&decl, "MsiPackagePayload", &paths, &mut diag).is_none());
        assert_eq!(
            diag.lines(),
            vec![
                "The MsiPackagePayload element's Name or SourceFile attribute was not found; \
                 one of these is required."
            ]
        );
    }

    #[test]
    fn hash_without_download_url_fails() {
        let (_dir, paths) = scratch_with(&[]);
        let mut diag = Diagnostics::new();
        let decl = PayloadSource {
            name: Some("remote.msu".into()),
            hash: Some(PayloadHash::compute(b"z").as_str().to_string()),
            ..PayloadSource::default()
        };
        assert!(resolve_payload(&decl, "MsuPackagePayload", &paths, &mut diag).is_none());
        assert_eq!(
            diag.lines(),
            vec![
                "The MsuPackagePayload's DownloadUrl attribute was not found; it is required \
                 without attribute SourceFile present."
            ]
        );
        assert_eq!(diag.max_error_code(), codes::EXPECTED_DOWNLOAD_URL);
    }

    #[test]
    fn corrected_download_url_succeeds() {
        let (_dir, paths) = scratch_with(&[]);
        let mut diag = Diagnostics::new();
        let decl = PayloadSource {
            name: Some("remote.msu".into()),
            hash: Some(PayloadHash::compute(b"z").as_str().to_string()),
            download_url: Some("https://example.test/remote.msu".into()),
            ..PayloadSource::default()
        };
        let resolved = resolve_payload(&decl, "MsuPackagePayload", &paths, &mut diag).unwrap();
        assert!(!diag.has_errors());
        assert_eq!(resolved.payload.packaging, Packaging::Download);
        assert!(resolved.disk_path.is_none());
    }

    #[test]
    fn lone_certificate_public_key_fails() {
        let (_dir, paths) = scratch_with(&[]);
        let mut diag = Diagnostics::new();
        let decl = PayloadSource {
            name: Some("tool.exe".into()),
            certificate_public_key: Some("ABCDEF".into()),
            ..PayloadSource::default()
        };
        assert!(resolve_payload(&decl, "ExePackagePayload", &paths, &mut diag).is_none());
        assert!(diag.lines().contains(
            &"The ExePackagePayload/@CertificateThumbprint attribute was not found; it is \
              required when attribute CertificatePublicKey is specified."
                .to_string()
        ));
        assert_eq!(
            diag.max_error_code(),
            codes::EXPECTED_ATTRIBUTES // the SourceFile-or-Hash rule also fires
        );
    }

    #[test]
    fn certificate_pair_without_source_succeeds() {
        let (_dir, paths) = scratch_with(&[]);
        let mut diag = Diagnostics::new();
        let decl = PayloadSource {
            name: Some("tool.exe".into()),
            hash: Some(PayloadHash::compute(b"t").as_str().to_string()),
            download_url: Some("https://example.test/tool.exe".into()),
            certificate_public_key: Some("PK".into()),
            certificate_thumbprint: Some("TP".into()),
            ..PayloadSource::default()
        };
        let resolved = resolve_payload(&decl, "ExePackagePayload", &paths, &mut diag).unwrap();
        assert!(!diag.has_errors());
        assert_eq!(
            resolved.payload.certificate_public_key.as_deref(),
            Some("PK")
        );
    }

    #[test]
    fn source_file_with_certificate_fails() {
        let (_dir, paths) = scratch_with(&[("signed.exe", b"s")]);
        let mut diag = Diagnostics::new();
        let decl = PayloadSource {
            certificate_public_key: Some("PK".into()),
            certificate_thumbprint: Some("TP".into()),
            ..local("signed.exe")
        };
        assert!(resolve_payload(&decl, "ExePackagePayload", &paths, &mut diag).is_none());
        let lines = diag.lines();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("CertificatePublicKey"));
        assert!(lines[1].contains("CertificateThumbprint"));
    }

    #[test]
    fn msp_payload_rejects_hash_as_unexpected() {
        let (_dir, paths) = scratch_with(&[]);
        let mut diag = Diagnostics::new();
        let decl = PayloadSource {
            name: Some("patch.msp".into()),
            hash: Some(PayloadHash::compute(b"p").as_str().to_string()),
            download_url: Some("https://example.test/patch.msp".into()),
            ..PayloadSource::default()
        };
        assert!(resolve_payload(&decl, "MspPackagePayload", &paths, &mut diag).is_none());
        assert_eq!(
            diag.lines(),
            vec!["The MspPackagePayload element contains an unexpected attribute 'Hash'."]
        );
        assert_eq!(diag.max_error_code(), codes::UNEXPECTED_ATTRIBUTE);
    }

    #[test]
    fn missing_source_file_on_disk_fails() {
        let (_dir, paths) = scratch_with(&[]);
        let mut diag = Diagnostics::new();
        assert!(resolve_payload(&local("ghost.msi"), "Payload", &paths, &mut diag).is_none());
        assert_eq!(diag.max_error_code(), codes::FILE_NOT_FOUND);
    }

    #[test]
    fn bind_paths_search_in_declaration_order() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        std::fs::write(first.path().join("data.bin"), b"first").unwrap();
        std::fs::write(second.path().join("data.bin"), b"second").unwrap();
        let paths = BindPaths::new(vec![
            first.path().to_path_buf(),
            second.path().to_path_buf(),
        ]);
        let found = paths.find("data.bin").unwrap();
        assert_eq!(std::fs::read(found).unwrap(), b"first");
    }

    #[test]
    fn bind_paths_fall_back_to_recursive_search() {
        let (_dir, paths) = scratch_with(&[("nested/deep/asset.cab", b"cab")]);
        assert!(paths.find("asset.cab").is_some());
    }
}
