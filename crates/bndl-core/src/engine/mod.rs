//! The runtime chain-execution engine.
//!
//! Drives a bound manifest through its lifecycle: detect installed
//! state, plan an ordered action list for an intent, then execute the
//! plan through a caller-supplied package executor with rollback
//! scoped to the chain's boundaries. The phases are enforced by data
//! dependency: planning consumes a frozen [`DetectSnapshot`], and
//! execution consumes a [`Plan`], so a caller cannot run them out of
//! order.

mod detect;
mod execute;
mod plan;
#[cfg(test)]
pub(crate) mod test_support;

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use bndl_schema::{BundleManifest, PackageId};
use tokio::sync::mpsc::UnboundedSender;

pub use detect::{
    DetectProbe, DetectSnapshot, DetectedPackage, DetectedRelated, PackageState, RelatedProduct,
};
pub use execute::{ExecuteOutcome, ExecutionResult, ExecutionStatus, PackageExecutor};
pub use plan::{ActionKind, Intent, Plan, PlannedAction};

/// Lifecycle phase, reported through progress events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Probing installed state.
    Detecting,
    /// Deriving the action list.
    Planning,
    /// Dispatching actions.
    Executing,
    /// Compensating a failed scope.
    Applying,
}

/// Progress events emitted during engine phases.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// The engine entered a new phase.
    PhaseChanged(Phase),
    /// A package's installed state was determined.
    PackageDetected {
        /// The probed package.
        package: PackageId,
        /// Its detected state.
        state: PackageState,
    },
    /// An action is about to be dispatched.
    ActionStarted {
        /// The acted-on package.
        package: PackageId,
        /// The dispatched action.
        action: ActionKind,
    },
    /// An action finished.
    ActionCompleted {
        /// The acted-on package.
        package: PackageId,
        /// The dispatched action.
        action: ActionKind,
        /// The executor's outcome.
        outcome: ExecuteOutcome,
    },
    /// Compensation of the failing scope began.
    RollbackStarted {
        /// The boundary opening the failing scope.
        scope: bndl_schema::BoundaryId,
    },
}

/// Engine-level failures (executor and probe failures of non-vital
/// packages degrade instead of surfacing here).
#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    /// A vital package's state could not be determined.
    #[error("Detection failed for vital package '{package}': {source}")]
    Detect {
        /// The package whose probe failed.
        package: PackageId,
        /// The probe's failure.
        #[source]
        source: anyhow::Error,
    },
}

/// The chain-execution engine for one bound manifest.
pub struct Engine {
    manifest: BundleManifest,
    progress: Option<UnboundedSender<ProgressEvent>>,
    cancel: Arc<AtomicBool>,
}

impl Engine {
    /// Create an engine over a bound manifest.
    pub fn new(manifest: BundleManifest) -> Self {
        Self {
            manifest,
            progress: None,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Attach a progress event channel.
    #[must_use]
    pub fn with_progress(mut self, progress: UnboundedSender<ProgressEvent>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// The cancellation flag, checked between actions only; an action
    /// already dispatched always runs to completion.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// The manifest this engine drives.
    pub fn manifest(&self) -> &BundleManifest {
        &self.manifest
    }

    pub(crate) fn emit(&self, event: ProgressEvent) {
        if let Some(progress) = &self.progress {
            // A dropped receiver is not the engine's problem.
            let _ = progress.send(event);
        }
    }
}
