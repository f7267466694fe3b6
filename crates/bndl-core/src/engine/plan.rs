//! Planning phase: derive an ordered action list from an intent and a
//! detection snapshot.

use bndl_schema::{BoundaryId, ChainEntry, PackageId, PackageKind};

use super::detect::{DetectSnapshot, PackageState};
use super::{Engine, Phase, ProgressEvent};
use crate::link::DEFAULT_BOUNDARY;

/// What the caller wants done with the bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    /// Install absent packages.
    Install,
    /// Remove installed packages.
    Uninstall,
    /// Repair installed packages, installing absent ones.
    Repair,
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Install => "install",
            Self::Uninstall => "uninstall",
            Self::Repair => "repair",
        })
    }
}

/// The operation planned for one package.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    /// Install the package.
    Install,
    /// Uninstall the package.
    Uninstall,
    /// Repair the package.
    Repair,
    /// Leave the package alone.
    Skip,
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Install => "install",
            Self::Uninstall => "uninstall",
            Self::Repair => "repair",
            Self::Skip => "skip",
        })
    }
}

/// One planned action, in execution order.
#[derive(Debug, Clone)]
pub struct PlannedAction {
    /// The acted-on package.
    pub package: PackageId,
    /// The package kind.
    pub kind: PackageKind,
    /// The planned operation.
    pub action: ActionKind,
    /// Whether a failure of this action fails the chain.
    pub vital: bool,
    /// Whether the package must never be uninstalled.
    pub permanent: bool,
    /// The boundary opening this action's recovery scope.
    pub scope: BoundaryId,
    /// The compensating operation should this action's scope roll
    /// back after the action applied.
    pub compensation: Option<ActionKind>,
}

/// The frozen result of the planning phase.
#[derive(Debug, Clone)]
pub struct Plan {
    /// The intent the plan was derived for.
    pub intent: Intent,
    /// Actions in execution order.
    pub actions: Vec<PlannedAction>,
}

impl Plan {
    /// Actions that actually dispatch (skips excluded).
    pub fn effective_actions(&self) -> impl Iterator<Item = &PlannedAction> {
        self.actions.iter().filter(|a| a.action != ActionKind::Skip)
    }
}

impl Engine {
    /// Run the planning phase.
    ///
    /// Actions come out in chain order for install and repair, in
    /// reverse chain order for uninstall. Detection-only related
    /// matches bias the decision (a newer installed product suppresses
    /// an install) but never become actions themselves.
    pub fn plan(&self, intent: Intent, snapshot: &DetectSnapshot) -> Plan {
        self.emit(ProgressEvent::PhaseChanged(Phase::Planning));

        let mut actions = Vec::new();
        let mut scope = BoundaryId::new(DEFAULT_BOUNDARY);
        for entry in &self.manifest().chain {
            if let ChainEntry::RollbackBoundary(boundary) = entry {
                scope = boundary.id.clone();
                continue;
            }
            let Some(base) = entry.base() else { continue };
            let state = snapshot
                .package(&base.id)
                .map_or(PackageState::Absent, |d| d.state);

            let action = match intent {
                Intent::Install => match state {
                    PackageState::Present => ActionKind::Skip,
                    PackageState::Absent => {
                        if newer_product_detected(entry, snapshot) {
                            ActionKind::Skip
                        } else {
                            ActionKind::Install
                        }
                    }
                },
                Intent::Uninstall => match state {
                    PackageState::Present if !base.permanent => ActionKind::Uninstall,
                    _ => ActionKind::Skip,
                },
                Intent::Repair => match state {
                    PackageState::Present => {
                        if repairable(entry) {
                            ActionKind::Repair
                        } else {
                            ActionKind::Skip
                        }
                    }
                    PackageState::Absent => ActionKind::Install,
                },
            };

            let compensation = match action {
                ActionKind::Install if !base.permanent => Some(ActionKind::Uninstall),
                _ => None,
            };

            actions.push(PlannedAction {
                package: base.id.clone(),
                kind: entry.kind().unwrap_or(PackageKind::Exe),
                action,
                vital: base.vital,
                permanent: base.permanent,
                scope: scope.clone(),
                compensation,
            });
        }

        if intent == Intent::Uninstall {
            actions.reverse();
        }

        tracing::debug!(
            intent = %intent,
            total = actions.len(),
            effective = actions.iter().filter(|a| a.action != ActionKind::Skip).count(),
            "planned chain"
        );
        Plan { intent, actions }
    }
}

/// Whether a detection-only rule found a product at least as new as
/// the package itself, which makes installing it pointless or a
/// downgrade.
fn newer_product_detected(entry: &ChainEntry, snapshot: &DetectSnapshot) -> bool {
    let Some(base) = entry.base() else {
        return false;
    };
    let Some(detected) = snapshot.package(&base.id) else {
        return false;
    };
    let package_version = match entry {
        ChainEntry::Msi(msi) => Some(&msi.version),
        _ => None,
    };
    detected.related.iter().any(|related| {
        related.only_detect
            && package_version.is_none_or(|version| &related.product.version >= version)
    })
}

fn repairable(entry: &ChainEntry) -> bool {
    match entry {
        ChainEntry::Exe(exe) => exe.repairable,
        ChainEntry::RollbackBoundary(_) => false,
        _ => true,
    }
}
