//! Detection phase: probe installed state concurrently and freeze the
//! results into a snapshot for planning.

use std::sync::Arc;

use async_trait::async_trait;
use bndl_schema::{ChainEntry, PackageId, PackageKind, Version};
use tokio::task::JoinSet;

use super::{Engine, EngineError, Phase, ProgressEvent};

/// Installed state of one package.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageState {
    /// The package is not installed.
    Absent,
    /// The package is installed.
    Present,
}

/// A product discovered by a related-package probe.
#[derive(Debug, Clone)]
pub struct RelatedProduct {
    /// Identity (product/upgrade code) of the discovered product.
    pub id: String,
    /// Its installed version.
    pub version: Version,
    /// Its language, when known.
    pub language: Option<String>,
}

/// A related product that matched one of a package's detection rules.
#[derive(Debug, Clone)]
pub struct DetectedRelated {
    /// The matching product.
    pub product: RelatedProduct,
    /// Whether the matching rule is detection-only.
    pub only_detect: bool,
}

/// Frozen detection result for one package.
#[derive(Debug, Clone)]
pub struct DetectedPackage {
    /// The probed package.
    pub package: PackageId,
    /// The package kind.
    pub kind: PackageKind,
    /// Its installed state.
    pub state: PackageState,
    /// Related products that matched the package's rules.
    pub related: Vec<DetectedRelated>,
}

/// Immutable snapshot of the detection phase, in chain order.
#[derive(Debug, Clone, Default)]
pub struct DetectSnapshot {
    packages: Vec<DetectedPackage>,
}

impl DetectSnapshot {
    /// Look up one package's detection result.
    pub fn package(&self, id: &PackageId) -> Option<&DetectedPackage> {
        self.packages.iter().find(|p| &p.package == id)
    }

    /// All detection results, in chain order.
    pub fn packages(&self) -> &[DetectedPackage] {
        &self.packages
    }
}

/// Read-only access to the machine's installed state.
///
/// Probes must not mutate anything; the engine may call them
/// concurrently.
#[async_trait]
pub trait DetectProbe: Send + Sync {
    /// Determine whether the given chain package is installed.
    async fn package_state(&self, package: &ChainEntry) -> anyhow::Result<PackageState>;

    /// Enumerate installed products carrying the given identity
    /// (product or upgrade code).
    async fn related_products(&self, related_id: &str) -> anyhow::Result<Vec<RelatedProduct>>;
}

impl Engine {
    /// Run the detection phase.
    ///
    /// Packages are probed concurrently; results are frozen into a
    /// [`DetectSnapshot`] in chain order. A probe failure degrades the
    /// package to [`PackageState::Absent`] unless the package is
    /// vital, in which case detection fails as a whole.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Detect`] when a vital package cannot be
    /// probed.
    pub async fn detect(
        &self,
        probe: Arc<dyn DetectProbe>,
    ) -> Result<DetectSnapshot, EngineError> {
        self.emit(ProgressEvent::PhaseChanged(Phase::Detecting));

        let entries: Vec<ChainEntry> = self.manifest().packages().cloned().collect();
        let mut set = JoinSet::new();
        for (index, entry) in entries.into_iter().enumerate() {
            let probe = Arc::clone(&probe);
            set.spawn(async move { (index, probe_package(probe.as_ref(), &entry).await) });
        }

        let mut slots: Vec<Option<DetectedPackage>> = Vec::new();
        slots.resize_with(set.len(), || None);
        while let Some(joined) = set.join_next().await {
            // Probes never panic by contract; a panicking probe is a
            // caller bug worth surfacing loudly.
            let (index, result) = joined.unwrap_or_else(|err| std::panic::resume_unwind(err.into_panic()));
            let detected = result?;
            self.emit(ProgressEvent::PackageDetected {
                package: detected.package.clone(),
                state: detected.state,
            });
            slots[index] = Some(detected);
        }

        Ok(DetectSnapshot {
            packages: slots.into_iter().flatten().collect(),
        })
    }
}

async fn probe_package(
    probe: &dyn DetectProbe,
    entry: &ChainEntry,
) -> Result<DetectedPackage, EngineError> {
    let Some(base) = entry.base() else {
        unreachable!("boundaries are filtered before probing");
    };

    let state = match probe.package_state(entry).await {
        Ok(state) => state,
        Err(err) if base.vital => {
            return Err(EngineError::Detect {
                package: base.id.clone(),
                source: err,
            });
        }
        Err(err) => {
            tracing::warn!(
                package = %base.id,
                error = %err,
                "probe failed for non-vital package, assuming absent"
            );
            PackageState::Absent
        }
    };

    let mut related = Vec::new();
    for rule in &base.related {
        let products = match probe.related_products(&rule.id).await {
            Ok(products) => products,
            Err(err) => {
                tracing::warn!(
                    package = %base.id,
                    related = %rule.id,
                    error = %err,
                    "related-product probe failed, ignoring rule"
                );
                continue;
            }
        };
        for product in products {
            if rule.matches(&product.version, product.language.as_deref()) {
                related.push(DetectedRelated {
                    product,
                    only_detect: rule.only_detect,
                });
            }
        }
    }

    Ok(DetectedPackage {
        package: base.id.clone(),
        kind: entry.kind().unwrap_or(PackageKind::Exe),
        state,
        related,
    })
}
