//! Manifest binding.
//!
//! Takes the linked chain and produces the bound artifacts-in-memory:
//! the immutable manifest, the bootstrapper-application data document,
//! and the side table mapping embedded payload ids to their source
//! files on disk. Embedded payloads are assigned to containers and
//! sequential source-path slots here; byte offsets and container sizes
//! stay open until the container writer lays the artifact out.

use std::collections::HashMap;
use std::path::PathBuf;

use bndl_schema::{
    BootstrapperApplicationData, BundleInfo, BundleManifest, BundleSource, BundleVariable,
    ChainEntry, ContainerId, ContainerKind, ContainerLayout, Packaging, PackageProperties,
    Payload, PayloadId, UxManifest,
};

use crate::diag::Diagnostics;
use crate::link::LinkedChain;
use crate::resolve::{BindPaths, resolve_payload};

/// Container id of the bootstrapper-application payload set.
pub const UX_CONTAINER: &str = "UxContainer";
/// Container id of the embedded package payloads.
pub const ATTACHED_CONTAINER: &str = "AttachedContainer";

/// The bound bundle, ready for the container writer.
#[derive(Debug, Clone)]
pub struct BoundBundle {
    /// The bound manifest.
    pub manifest: BundleManifest,
    /// The bootstrapper-application data document.
    pub ba_data: BootstrapperApplicationData,
    /// Disk locations of the embedded payloads, by payload id.
    pub sources: HashMap<PayloadId, PathBuf>,
}

/// Bind the linked chain into a manifest and its side documents.
///
/// UX payload declarations are resolved here (they never pass through
/// package validation); they are always embedded in the UX container
/// regardless of their packaging hints.
pub fn bind(
    source: &BundleSource,
    linked: &LinkedChain,
    bind_paths: &BindPaths,
    diag: &mut Diagnostics,
) -> BoundBundle {
    let mut sources = HashMap::new();
    let mut payloads: Vec<Payload> = Vec::new();
    let mut ux_refs = Vec::new();

    for decl in &source.ux.payloads {
        let Some(mut resolved) = resolve_payload(decl, "Payload", bind_paths, diag) else {
            continue;
        };
        resolved.payload.packaging = Packaging::Embedded;
        resolved.payload.container = Some(ContainerId::new(UX_CONTAINER));
        resolved.payload.source_path = Some(format!("u{}", ux_refs.len()));
        if let Some(disk) = resolved.disk_path {
            sources.insert(resolved.payload.id.clone(), disk);
        }
        ux_refs.push(resolved.payload.id.clone());
        payloads.push(resolved.payload);
    }

    let mut attached_count = 0u32;
    for resolved in &linked.payloads {
        let mut payload = resolved.payload.clone();
        if payload.packaging == Packaging::Embedded {
            payload.container = Some(ContainerId::new(ATTACHED_CONTAINER));
            payload.source_path = Some(format!("a{attached_count}"));
            attached_count += 1;
            if let Some(disk) = &resolved.disk_path {
                sources.insert(payload.id.clone(), disk.clone());
            }
        }
        payloads.push(payload);
    }

    let mut containers = vec![ContainerLayout {
        id: ContainerId::new(UX_CONTAINER),
        kind: ContainerKind::Ux,
        size: 0,
        payload_count: u32::try_from(ux_refs.len()).unwrap_or(u32::MAX),
    }];
    if attached_count > 0 {
        containers.push(ContainerLayout {
            id: ContainerId::new(ATTACHED_CONTAINER),
            kind: ContainerKind::Attached,
            size: 0,
            payload_count: attached_count,
        });
    }

    let manifest = BundleManifest {
        info: BundleInfo {
            name: source.bundle.name.clone(),
            version: source.bundle.version.clone(),
            manufacturer: source.bundle.manufacturer.clone(),
            upgrade_code: source.bundle.upgrade_code.clone(),
            variables: source
                .variables
                .iter()
                .map(|v| BundleVariable {
                    name: v.name.clone(),
                    value: v.value.clone(),
                    persisted: v.persisted,
                    hidden: v.hidden,
                })
                .collect(),
        },
        ux: UxManifest {
            payload_refs: ux_refs,
        },
        containers,
        payloads,
        chain: linked.entries.clone(),
    };

    let ba_data = derive_ba_data(&manifest, linked);

    tracing::info!(
        packages = manifest.packages().count(),
        payloads = manifest.payloads.len(),
        containers = manifest.containers.len(),
        "bound bundle manifest"
    );

    BoundBundle {
        manifest,
        ba_data,
        sources,
    }
}

fn derive_ba_data(manifest: &BundleManifest, linked: &LinkedChain) -> BootstrapperApplicationData {
    let mut package_properties = Vec::new();

    for entry in manifest.packages() {
        let base = match entry.base() {
            Some(base) => base,
            None => continue,
        };
        let refs: Vec<&Payload> = base
            .payload_refs
            .iter()
            .filter_map(|id| manifest.payload(id))
            .collect();
        let download_size = refs
            .iter()
            .filter(|p| p.packaging == Packaging::Download)
            .map(|p| p.file_size)
            .sum();
        let compressed = refs.iter().all(|p| p.packaging == Packaging::Embedded);

        let (product_code, upgrade_code, version) = match entry {
            ChainEntry::Msi(msi) => (
                Some(msi.product_code.clone()),
                msi.upgrade_code.clone(),
                Some(msi.version.clone()),
            ),
            _ => (None, None, None),
        };

        package_properties.push(PackageProperties {
            package: base.id.clone(),
            vital: base.vital,
            display_name: base.display_name.clone(),
            download_size,
            package_size: base.size,
            installed_size: base.install_size,
            package_type: entry.kind().unwrap_or(bndl_schema::PackageKind::Exe),
            permanent: base.permanent,
            log_path_variable: base.log_path_variable.clone(),
            rollback_log_path_variable: base.rollback_log_path_variable.clone(),
            compressed,
            product_code,
            upgrade_code,
            version,
            cache: base.cache,
        });
    }

    BootstrapperApplicationData {
        package_properties,
        feature_infos: linked.feature_infos.clone(),
    }
}
