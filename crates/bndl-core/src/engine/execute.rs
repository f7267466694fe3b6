//! Execution phase: dispatch planned actions sequentially and recover
//! failed rollback-boundary scopes.

use std::sync::atomic::Ordering;

use async_trait::async_trait;
use bndl_schema::PackageId;

use super::plan::{ActionKind, Plan, PlannedAction};
use super::{Engine, Phase, ProgressEvent};

/// Outcome of dispatching one action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecuteOutcome {
    /// The action applied.
    Success,
    /// The action failed.
    Failed,
    /// The action applied; a reboot is needed before the result is
    /// effective.
    NeedsReboot,
    /// The user cancelled from inside the package's own UI.
    UserCancelled,
}

/// Dispatches planned actions against the machine.
///
/// The engine calls exactly one method per effective action and never
/// calls two methods concurrently.
#[async_trait]
pub trait PackageExecutor: Send + Sync {
    /// Install the package.
    async fn install(&self, action: &PlannedAction) -> anyhow::Result<ExecuteOutcome>;

    /// Uninstall the package.
    async fn uninstall(&self, action: &PlannedAction) -> anyhow::Result<ExecuteOutcome>;

    /// Repair the package.
    async fn repair(&self, action: &PlannedAction) -> anyhow::Result<ExecuteOutcome>;
}

/// Terminal status of one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStatus {
    /// Every effective action applied.
    Succeeded,
    /// A scope failed and its compensation completed.
    RolledBack,
    /// A scope failed and compensation also failed; the machine may be
    /// in a mixed state.
    Failed,
}

/// The result of the execution phase.
#[derive(Debug)]
pub struct ExecutionResult {
    /// Terminal status.
    pub status: ExecutionStatus,
    /// Packages whose actions applied (and stayed applied).
    pub applied: Vec<PackageId>,
    /// Packages compensated during rollback.
    pub compensated: Vec<PackageId>,
    /// Whether any applied action requested a reboot.
    pub reboot_required: bool,
    /// Description of the failure, when status is not `Succeeded`.
    pub failure: Option<String>,
}

impl Engine {
    /// Run the execution phase.
    ///
    /// Actions dispatch strictly sequentially in plan order. A failure
    /// of a vital action stops the chain and compensates the applied
    /// actions of the failing scope in reverse order; scopes committed
    /// earlier (closed by a later boundary) stay applied. Permanent
    /// packages are never uninstalled during compensation. The
    /// cancellation flag is honored between actions only.
    pub async fn execute(
        &self,
        plan: &Plan,
        executor: &dyn PackageExecutor,
    ) -> ExecutionResult {
        self.emit(ProgressEvent::PhaseChanged(Phase::Executing));

        let mut applied: Vec<PackageId> = Vec::new();
        let mut scope_applied: Vec<&PlannedAction> = Vec::new();
        let mut current_scope = None;
        let mut reboot_required = false;

        for action in &plan.actions {
            if current_scope.as_ref() != Some(&action.scope) {
                // Entering a new scope commits the previous one.
                current_scope = Some(action.scope.clone());
                scope_applied.clear();
            }
            if action.action == ActionKind::Skip {
                continue;
            }
            if self.cancel.load(Ordering::SeqCst) {
                return self
                    .roll_back(
                        &action.scope,
                        &scope_applied,
                        applied,
                        reboot_required,
                        "Cancelled before dispatching next action".to_string(),
                        executor,
                    )
                    .await;
            }

            self.emit(ProgressEvent::ActionStarted {
                package: action.package.clone(),
                action: action.action,
            });
            let outcome = match dispatch(executor, action).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    if !action.vital {
                        tracing::warn!(
                            package = %action.package,
                            error = %err,
                            "non-vital action failed, continuing"
                        );
                        continue;
                    }
                    return self
                        .roll_back(
                            &action.scope,
                            &scope_applied,
                            applied,
                            reboot_required,
                            format!("Package '{}' failed: {err}", action.package),
                            executor,
                        )
                        .await;
                }
            };
            self.emit(ProgressEvent::ActionCompleted {
                package: action.package.clone(),
                action: action.action,
                outcome,
            });

            match outcome {
                ExecuteOutcome::Success => {
                    applied.push(action.package.clone());
                    scope_applied.push(action);
                }
                ExecuteOutcome::NeedsReboot => {
                    reboot_required = true;
                    applied.push(action.package.clone());
                    scope_applied.push(action);
                }
                ExecuteOutcome::Failed if !action.vital => {
                    tracing::warn!(package = %action.package, "non-vital action failed, continuing");
                }
                ExecuteOutcome::Failed => {
                    return self
                        .roll_back(
                            &action.scope,
                            &scope_applied,
                            applied,
                            reboot_required,
                            format!("Package '{}' failed", action.package),
                            executor,
                        )
                        .await;
                }
                ExecuteOutcome::UserCancelled => {
                    return self
                        .roll_back(
                            &action.scope,
                            &scope_applied,
                            applied,
                            reboot_required,
                            format!("Cancelled by user during package '{}'", action.package),
                            executor,
                        )
                        .await;
                }
            }
        }

        ExecutionResult {
            status: ExecutionStatus::Succeeded,
            applied,
            compensated: Vec::new(),
            reboot_required,
            failure: None,
        }
    }

    async fn roll_back(
        &self,
        scope: &bndl_schema::BoundaryId,
        scope_applied: &[&PlannedAction],
        applied: Vec<PackageId>,
        reboot_required: bool,
        failure: String,
        executor: &dyn PackageExecutor,
    ) -> ExecutionResult {
        self.emit(ProgressEvent::PhaseChanged(Phase::Applying));
        self.emit(ProgressEvent::RollbackStarted {
            scope: scope.clone(),
        });
        tracing::warn!(scope = %scope, reason = %failure, "rolling back scope");

        let mut compensated = Vec::new();
        let mut compensation_failed = false;
        for action in scope_applied.iter().rev() {
            let Some(compensation) = action.compensation else {
                continue;
            };
            if action.permanent {
                continue;
            }
            let result = match compensation {
                ActionKind::Uninstall => executor.uninstall(action).await,
                ActionKind::Install => executor.install(action).await,
                ActionKind::Repair => executor.repair(action).await,
                ActionKind::Skip => continue,
            };
            match result {
                Ok(ExecuteOutcome::Success | ExecuteOutcome::NeedsReboot) => {
                    compensated.push(action.package.clone());
                }
                Ok(_) | Err(_) => {
                    tracing::error!(package = %action.package, "compensation failed");
                    compensation_failed = true;
                }
            }
        }

        let applied = applied
            .into_iter()
            .filter(|p| !compensated.contains(p))
            .collect();
        ExecutionResult {
            status: if compensation_failed {
                ExecutionStatus::Failed
            } else {
                ExecutionStatus::RolledBack
            },
            applied,
            compensated,
            reboot_required,
            failure: Some(failure),
        }
    }
}

async fn dispatch(
    executor: &dyn PackageExecutor,
    action: &PlannedAction,
) -> anyhow::Result<ExecuteOutcome> {
    match action.action {
        ActionKind::Install => executor.install(action).await,
        ActionKind::Uninstall => executor.uninstall(action).await,
        ActionKind::Repair => executor.repair(action).await,
        ActionKind::Skip => Ok(ExecuteOutcome::Success),
    }
}
