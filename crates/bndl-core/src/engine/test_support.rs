//! Shared fixtures for engine tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use bndl_schema::{
    BoundaryId, BundleInfo, BundleManifest, CachePolicy, ChainEntry, DetectionType, ExePackage,
    MsiPackage, PackageBase, PackageId, RollbackBoundary, UxManifest, Version,
};

use super::detect::{DetectProbe, PackageState, RelatedProduct};
use super::execute::{ExecuteOutcome, PackageExecutor};
use super::plan::PlannedAction;

pub fn base(id: &str) -> PackageBase {
    PackageBase {
        id: PackageId::new(id),
        cache: CachePolicy::Keep,
        cache_id: format!("{id}-cache"),
        install_size: 0,
        size: 0,
        per_machine: true,
        permanent: false,
        vital: true,
        rollback_boundary_forward: None,
        rollback_boundary_backward: None,
        log_path_variable: None,
        rollback_log_path_variable: None,
        display_name: None,
        provides: Vec::new(),
        related: Vec::new(),
        payload_refs: Vec::new(),
    }
}

pub fn msi(id: &str, version: &str) -> ChainEntry {
    ChainEntry::Msi(MsiPackage {
        base: base(id),
        product_code: format!("{{{id}}}"),
        language: None,
        version: Version::new(version),
        upgrade_code: None,
        features: Vec::new(),
        properties: Vec::new(),
    })
}

pub fn exe(id: &str, repairable: bool) -> ChainEntry {
    ChainEntry::Exe(ExePackage {
        base: base(id),
        detection_type: DetectionType::Condition,
        detect_condition: Some(format!("{id}Installed")),
        install_arguments: None,
        repair_arguments: None,
        uninstall_arguments: None,
        repairable,
    })
}

pub fn boundary(id: &str) -> ChainEntry {
    ChainEntry::RollbackBoundary(RollbackBoundary {
        id: BoundaryId::new(id),
    })
}

pub fn manifest_with(chain: Vec<ChainEntry>) -> BundleManifest {
    BundleManifest {
        info: BundleInfo {
            name: "Test".into(),
            version: Version::new("1.0.0"),
            manufacturer: None,
            upgrade_code: None,
            variables: Vec::new(),
        },
        ux: UxManifest {
            payload_refs: Vec::new(),
        },
        containers: Vec::new(),
        payloads: Vec::new(),
        chain,
    }
}

/// A canned detection probe.
#[derive(Default)]
pub struct TestProbe {
    installed: HashSet<String>,
    failing: HashSet<String>,
    related: HashMap<String, Vec<RelatedProduct>>,
}

impl TestProbe {
    pub fn installed(mut self, id: &str) -> Self {
        self.installed.insert(id.to_string());
        self
    }

    pub fn failing(mut self, id: &str) -> Self {
        self.failing.insert(id.to_string());
        self
    }

    pub fn related(mut self, related_id: &str, version: &str) -> Self {
        self.related
            .entry(related_id.to_string())
            .or_default()
            .push(RelatedProduct {
                id: related_id.to_string(),
                version: Version::new(version),
                language: None,
            });
        self
    }
}

#[async_trait]
impl DetectProbe for TestProbe {
    async fn package_state(&self, package: &ChainEntry) -> anyhow::Result<PackageState> {
        let id = package
            .base()
            .map(|b| b.id.as_str().to_string())
            .unwrap_or_default();
        if self.failing.contains(&id) {
            anyhow::bail!("probe exploded for {id}");
        }
        Ok(if self.installed.contains(&id) {
            PackageState::Present
        } else {
            PackageState::Absent
        })
    }

    async fn related_products(&self, related_id: &str) -> anyhow::Result<Vec<RelatedProduct>> {
        Ok(self.related.get(related_id).cloned().unwrap_or_default())
    }
}

/// A canned executor that records every dispatched call.
#[derive(Default)]
pub struct TestExecutor {
    calls: Mutex<Vec<String>>,
    failing: HashSet<String>,
    cancelling: HashSet<String>,
    rebooting: HashSet<String>,
    failing_uninstall: HashSet<String>,
}

impl TestExecutor {
    pub fn failing(mut self, id: &str) -> Self {
        self.failing.insert(id.to_string());
        self
    }

    pub fn cancelling(mut self, id: &str) -> Self {
        self.cancelling.insert(id.to_string());
        self
    }

    pub fn rebooting(mut self, id: &str) -> Self {
        self.rebooting.insert(id.to_string());
        self
    }

    pub fn failing_uninstall(mut self, id: &str) -> Self {
        self.failing_uninstall.insert(id.to_string());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, verb: &str, action: &PlannedAction) {
        self.calls
            .lock()
            .unwrap()
            .push(format!("{verb} {}", action.package));
    }
}

#[async_trait]
impl PackageExecutor for TestExecutor {
    async fn install(&self, action: &PlannedAction) -> anyhow::Result<ExecuteOutcome> {
        self.record("install", action);
        let id = action.package.as_str();
        if self.failing.contains(id) {
            return Ok(ExecuteOutcome::Failed);
        }
        if self.cancelling.contains(id) {
            return Ok(ExecuteOutcome::UserCancelled);
        }
        if self.rebooting.contains(id) {
            return Ok(ExecuteOutcome::NeedsReboot);
        }
        Ok(ExecuteOutcome::Success)
    }

    async fn uninstall(&self, action: &PlannedAction) -> anyhow::Result<ExecuteOutcome> {
        self.record("uninstall", action);
        if self.failing_uninstall.contains(action.package.as_str()) {
            return Ok(ExecuteOutcome::Failed);
        }
        Ok(ExecuteOutcome::Success)
    }

    async fn repair(&self, action: &PlannedAction) -> anyhow::Result<ExecuteOutcome> {
        self.record("repair", action);
        Ok(ExecuteOutcome::Success)
    }
}
