//! Chain linking.
//!
//! Turns the authored chain (package references, group references,
//! rollback boundaries) plus the validated packages into the bound
//! chain: groups are expanded recursively in declaration order,
//! boundaries are threaded onto the packages they scope, cache ids
//! are derived deterministically, and MSI features are flattened into
//! standalone feature-info records for the bootstrapper-application
//! data document.

use std::collections::{HashMap, HashSet};

use bndl_schema::{
    BoundaryId, BundleSource, ChainEntry, ChainItemSource, ExePackage, MsiFeature, MsiPackage,
    MsiProperty, MspPackage, MsuPackage, PackageBase, PackageFeatureInfo, PackageId,
    PackageSource, Provides, RelatedPackage, RollbackBoundary, Version, VersionBound,
    content_fingerprint,
};

use crate::diag::{Diagnostics, codes};
use crate::resolve::ResolvedPayload;
use crate::validate::ValidatedPackage;

/// Name of the boundary inserted when the chain does not open with one.
pub const DEFAULT_BOUNDARY: &str = "DefaultBoundary";

/// The bound chain with its flattened side records.
#[derive(Debug, Clone, Default)]
pub struct LinkedChain {
    /// Chain entries in installation order, boundaries interleaved.
    pub entries: Vec<ChainEntry>,
    /// All package payloads, deduplicated by id, in first-use order.
    pub payloads: Vec<ResolvedPayload>,
    /// Flattened MSI feature records, in chain then feature order.
    pub feature_infos: Vec<PackageFeatureInfo>,
}

impl LinkedChain {
    /// Iterate the chain's package entries (boundaries skipped).
    pub fn packages(&self) -> impl Iterator<Item = &ChainEntry> {
        self.entries.iter().filter(|e| e.base().is_some())
    }
}

enum FlatItem {
    Package(PackageId),
    Boundary(BoundaryId),
}

/// Link the authored chain against the validated packages.
///
/// Linking never short-circuits; structural errors (cycles, dangling
/// references, duplicate boundaries) are all recorded before return.
pub fn link_chain(
    source: &BundleSource,
    packages: &[ValidatedPackage],
    diag: &mut Diagnostics,
) -> LinkedChain {
    let validated: HashMap<&PackageId, &ValidatedPackage> =
        packages.iter().map(|p| (p.id(), p)).collect();

    let mut flat = Vec::new();
    let mut stack = Vec::new();
    expand_items(source, &source.chain, &mut stack, &mut flat, diag);

    if !matches!(flat.first(), Some(FlatItem::Boundary(_))) {
        flat.insert(0, FlatItem::Boundary(BoundaryId::new(DEFAULT_BOUNDARY)));
    }

    let mut linked = LinkedChain::default();
    let mut seen_boundaries = HashSet::new();
    let mut cache_id_ordinals: HashMap<String, u32> = HashMap::new();
    let mut pending_forward: Option<BoundaryId> = None;
    let mut last_package_index: Option<usize> = None;

    for item in flat {
        match item {
            FlatItem::Boundary(id) => {
                if !seen_boundaries.insert(id.clone()) {
                    diag.error(
                        codes::DUPLICATE_BOUNDARY,
                        format!("The RollbackBoundary '{id}' duplicates an earlier boundary."),
                    );
                    continue;
                }
                // The boundary closes the previous scope and opens the
                // next one.
                if let Some(index) = last_package_index.take()
                    && let Some(base) = linked.entries[index].base_mut()
                {
                    base.rollback_boundary_backward = Some(id.clone());
                }
                pending_forward = Some(id.clone());
                linked
                    .entries
                    .push(ChainEntry::RollbackBoundary(RollbackBoundary { id }));
            }
            FlatItem::Package(id) => {
                let Some(package) = validated.get(&id) else {
                    // Declared but failed validation: already reported.
                    if source.package(&id).is_none() {
                        diag.error(
                            codes::UNKNOWN_REFERENCE,
                            format!("The chain references an undeclared package '{id}'."),
                        );
                    }
                    continue;
                };
                let entry = link_package(
                    package,
                    pending_forward.take(),
                    &mut cache_id_ordinals,
                    &mut linked,
                    diag,
                );
                if let Some(entry) = entry {
                    last_package_index = Some(linked.entries.len());
                    linked.entries.push(entry);
                }
            }
        }
    }

    linked
}

fn expand_items(
    source: &BundleSource,
    items: &[ChainItemSource],
    stack: &mut Vec<String>,
    out: &mut Vec<FlatItem>,
    diag: &mut Diagnostics,
) {
    for item in items {
        match item {
            ChainItemSource::Package { package } => out.push(FlatItem::Package(package.clone())),
            ChainItemSource::Boundary { rollback_boundary } => {
                out.push(FlatItem::Boundary(rollback_boundary.clone()));
            }
            ChainItemSource::Group { package_group } => {
                if stack.iter().any(|g| g == package_group) {
                    diag.error(
                        codes::GROUP_CYCLE,
                        format!(
                            "The package group '{package_group}' references itself through \
                             '{}'.",
                            stack.join("' -> '")
                        ),
                    );
                    continue;
                }
                let Some(group) = source.package_group(package_group) else {
                    diag.error(
                        codes::UNKNOWN_REFERENCE,
                        format!("The package group '{package_group}' is not defined."),
                    );
                    continue;
                };
                stack.push(package_group.clone());
                expand_items(source, &group.members, stack, out, diag);
                stack.pop();
            }
        }
    }
}

fn link_package(
    package: &ValidatedPackage,
    forward: Option<BoundaryId>,
    cache_id_ordinals: &mut HashMap<String, u32>,
    linked: &mut LinkedChain,
    diag: &mut Diagnostics,
) -> Option<ChainEntry> {
    let common = package.source.common();
    let id = common.id.clone();

    let mut payload_refs = Vec::new();
    for resolved in &package.payloads {
        merge_payload(resolved, &mut linked.payloads, diag);
        payload_refs.push(resolved.payload.id.clone());
    }
    let primary = &package.payloads[0];

    let cache_id = match &package.source {
        PackageSource::Msi(msi) => {
            let (Some(product_code), Some(version)) = (&msi.product_code, &msi.version) else {
                if msi.product_code.is_none() {
                    diag.error(
                        codes::EXPECTED_ATTRIBUTES,
                        format!(
                            "The MsiPackage/@ProductCode attribute was not found for package \
                             '{id}'; it is required."
                        ),
                    );
                }
                if msi.version.is_none() {
                    diag.error(
                        codes::EXPECTED_ATTRIBUTES,
                        format!(
                            "The MsiPackage/@Version attribute was not found for package \
                             '{id}'; it is required."
                        ),
                    );
                }
                return None;
            };
            dedup_cache_id(format!("{product_code}v{version}"), cache_id_ordinals)
        }
        _ => {
            let fingerprint = match &primary.payload.hash {
                Some(hash) => content_fingerprint(hash.as_str().as_bytes()),
                None => content_fingerprint(primary.payload.file_path.as_bytes()),
            };
            format!("{id}_{fingerprint}")
        }
    };

    let install_size = common.install_size.unwrap_or_else(|| match &package.source {
        PackageSource::Msi(msi) => msi.features.iter().filter_map(|f| f.size).sum(),
        _ => package.total_size(),
    });

    let mut provides: Vec<Provides> = common
        .provides
        .iter()
        .map(|p| Provides {
            key: p.key.clone(),
            version: p.version.clone(),
            display_name: p.display_name.clone(),
        })
        .collect();

    let related: Vec<RelatedPackage> = common
        .related
        .iter()
        .map(|r| RelatedPackage {
            id: r.id.clone(),
            min_version: r
                .min_version
                .clone()
                .map(|v| VersionBound::new(v, r.min_inclusive)),
            max_version: r
                .max_version
                .clone()
                .map(|v| VersionBound::new(v, r.max_inclusive)),
            languages: r.languages.clone(),
            lang_inclusive: r.lang_inclusive,
            only_detect: r.only_detect,
        })
        .collect();

    if let PackageSource::Msi(msi) = &package.source
        && let (Some(product_code), Some(version)) = (&msi.product_code, &msi.version)
    {
        let key = format!("{product_code}_v{version}");
        if provides.iter().all(|p| p.key != key) {
            provides.push(Provides {
                key,
                version: Some(version.clone()),
                display_name: common.display_name.clone(),
            });
        }
    }

    let base = PackageBase {
        id: id.clone(),
        cache: common.cache,
        cache_id,
        install_size,
        size: package.total_size(),
        per_machine: common.per_machine,
        permanent: common.permanent,
        vital: common.vital,
        rollback_boundary_forward: forward,
        rollback_boundary_backward: None,
        log_path_variable: Some(
            common
                .log_path_variable
                .clone()
                .unwrap_or_else(|| format!("BundleLog_{id}")),
        ),
        rollback_log_path_variable: Some(
            common
                .rollback_log_path_variable
                .clone()
                .unwrap_or_else(|| format!("BundleRollbackLog_{id}")),
        ),
        display_name: common.display_name.clone(),
        provides,
        related,
        payload_refs,
    };

    let entry = match &package.source {
        PackageSource::Msi(msi) => {
            for feature in &msi.features {
                linked.feature_infos.push(PackageFeatureInfo {
                    package: id.clone(),
                    feature: feature.id.clone(),
                    size: feature.size.unwrap_or(0),
                    display: feature.display.unwrap_or(0),
                    level: feature.level.unwrap_or(1),
                    directory: feature.directory.clone().unwrap_or_default(),
                    attributes: feature.attributes.unwrap_or(0),
                });
            }
            ChainEntry::Msi(MsiPackage {
                base,
                product_code: msi.product_code.clone().unwrap_or_default(),
                language: msi.language.clone(),
                version: msi
                    .version
                    .clone()
                    .unwrap_or_else(|| Version::new("0.0.0.0")),
                upgrade_code: msi.upgrade_code.clone(),
                features: msi
                    .features
                    .iter()
                    .map(|f| MsiFeature { id: f.id.clone() })
                    .collect(),
                properties: msi
                    .properties
                    .iter()
                    .map(|p| MsiProperty {
                        id: p.id.clone(),
                        value: p.value.clone(),
                    })
                    .collect(),
            })
        }
        PackageSource::Exe(exe) => ChainEntry::Exe(ExePackage {
            base,
            detection_type: exe.detection_type.unwrap_or_default(),
            detect_condition: exe.detect_condition.clone(),
            install_arguments: exe.install_arguments.clone(),
            repair_arguments: exe.repair_arguments.clone(),
            uninstall_arguments: exe.uninstall_arguments.clone(),
            repairable: exe.repairable,
        }),
        PackageSource::Msp(msp) => ChainEntry::Msp(MspPackage {
            base,
            patch_code: msp.patch_code.clone(),
        }),
        PackageSource::Msu(msu) => ChainEntry::Msu(MsuPackage {
            base,
            detect_condition: msu.detect_condition.clone(),
            kb: msu.kb.clone(),
        }),
    };

    tracing::debug!(package = %id, cache_id = %entry.base().map(|b| b.cache_id.clone()).unwrap_or_default(), "linked package");
    Some(entry)
}

fn dedup_cache_id(base: String, ordinals: &mut HashMap<String, u32>) -> String {
    let count = ordinals.entry(base.clone()).or_insert(0);
    *count += 1;
    if *count == 1 {
        base
    } else {
        format!("{base}_{}", *count - 1)
    }
}

fn merge_payload(
    resolved: &ResolvedPayload,
    payloads: &mut Vec<ResolvedPayload>,
    diag: &mut Diagnostics,
) {
    if let Some(existing) = payloads.iter().find(|p| p.payload.id == resolved.payload.id) {
        if existing.payload.hash != resolved.payload.hash {
            diag.error(
                codes::DUPLICATE_SYMBOL,
                format!(
                    "The payload '{}' is declared twice with differing content.",
                    resolved.payload.id
                ),
            );
        }
        return;
    }
    payloads.push(resolved.clone());
}
