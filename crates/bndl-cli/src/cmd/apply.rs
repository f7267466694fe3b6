//! Apply command: run a built bundle's chain against this machine.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use bndl_core::engine::{
    DetectProbe, Engine, ExecuteOutcome, Intent, PackageExecutor, PackageState, PlannedAction,
    ProgressEvent, RelatedProduct,
};
use bndl_core::extract_bundle;
use bndl_schema::{BundleManifest, ChainEntry, DetectionType, PackageKind, Version};
use comfy_table::{Table, presets::UTF8_FULL_CONDENSED};
use serde::Deserialize;

/// Extract the bundle, detect, plan, and (unless `dry_run`) execute.
pub async fn apply(
    bundle: &Path,
    intent: Intent,
    dry_run: bool,
    state: Option<&Path>,
    quiet: bool,
) -> Result<()> {
    let scratch = tempfile::tempdir().context("Failed to create scratch directory")?;
    let ba_dir = scratch.path().join("ba");
    let extract_dir = scratch.path().join("files");
    let result = extract_bundle(bundle, &ba_dir, &extract_dir);
    if !result.success {
        bail!(
            "Could not open '{}': {}",
            bundle.display(),
            result.error.unwrap_or_else(|| "unknown error".to_string())
        );
    }
    let manifest = result
        .manifest
        .context("extraction succeeded without a manifest")?;

    let probe = match state {
        Some(path) => StateFileProbe::from_file(path)
            .with_context(|| format!("Failed to load state file '{}'", path.display()))?,
        None => StateFileProbe::default(),
    };

    let mut engine = Engine::new(manifest.clone());
    // The printer task ends when the engine (and with it the sender
    // side of the channel) is dropped.
    let printer = if quiet {
        None
    } else {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        engine = engine.with_progress(tx);
        Some(tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                print_event(&event);
            }
        }))
    };

    let snapshot = engine.detect(Arc::new(probe)).await?;
    let plan = engine.plan(intent, &snapshot);

    if !quiet || dry_run {
        let mut table = Table::new();
        table.load_preset(UTF8_FULL_CONDENSED);
        table.set_header(vec!["Package", "Type", "Action", "Scope"]);
        for action in &plan.actions {
            table.add_row(vec![
                action.package.to_string(),
                action.kind.to_string(),
                action.action.to_string(),
                action.scope.to_string(),
            ]);
        }
        println!("{table}");
    }
    if dry_run {
        drop(engine);
        if let Some(printer) = printer {
            let _ = printer.await;
        }
        return Ok(());
    }

    let executor = ProcessExecutor::new(&manifest, extract_dir);
    let outcome = engine.execute(&plan, &executor).await;
    drop(engine);
    if let Some(printer) = printer {
        let _ = printer.await;
    }

    match outcome.status {
        bndl_core::engine::ExecutionStatus::Succeeded => {
            if !quiet {
                println!("Applied {} package(s)", outcome.applied.len());
                if outcome.reboot_required {
                    println!("A reboot is required to complete the operation");
                }
            }
            Ok(())
        }
        bndl_core::engine::ExecutionStatus::RolledBack => {
            bail!(
                "Chain rolled back ({} package(s) compensated): {}",
                outcome.compensated.len(),
                outcome.failure.unwrap_or_default()
            )
        }
        bndl_core::engine::ExecutionStatus::Failed => {
            bail!(
                "Chain failed and could not be rolled back: {}",
                outcome.failure.unwrap_or_default()
            )
        }
    }
}

fn print_event(event: &ProgressEvent) {
    match event {
        ProgressEvent::PhaseChanged(phase) => tracing::info!(?phase, "phase change"),
        ProgressEvent::PackageDetected { package, state } => {
            println!("detected {package}: {state:?}");
        }
        ProgressEvent::ActionStarted { package, action } => {
            println!("{action} {package}...");
        }
        ProgressEvent::ActionCompleted {
            package,
            action,
            outcome,
        } => {
            println!("{action} {package}: {outcome:?}");
        }
        ProgressEvent::RollbackStarted { scope } => {
            println!("rolling back scope '{scope}'");
        }
    }
}

/// Installed-state records consulted during detection.
///
/// ```toml
/// installed = ["MsiA"]
/// conditions = ["ExeBInstalled"]
///
/// [[product]]
/// id = "{UPGRADE-CODE}"
/// version = "2.0.0.0"
/// language = "1033"
/// ```
#[derive(Debug, Default, Deserialize)]
pub struct StateFileProbe {
    /// Package ids (or MSI product codes) present on the machine.
    #[serde(default)]
    installed: Vec<String>,
    /// Detect-condition names that evaluate to true.
    #[serde(default)]
    conditions: Vec<String>,
    /// Installed products discoverable by related-package rules.
    #[serde(default, rename = "product")]
    products: Vec<ProductRecord>,
}

#[derive(Debug, Deserialize)]
struct ProductRecord {
    id: String,
    version: Version,
    #[serde(default)]
    language: Option<String>,
}

impl StateFileProbe {
    /// Load records from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }
}

#[async_trait]
impl DetectProbe for StateFileProbe {
    async fn package_state(&self, package: &ChainEntry) -> anyhow::Result<PackageState> {
        let installed = match package {
            ChainEntry::Msi(msi) => {
                self.installed.iter().any(|i| {
                    i == msi.base.id.as_str() || i == &msi.product_code
                })
            }
            ChainEntry::Exe(exe) => match (exe.detection_type, &exe.detect_condition) {
                (DetectionType::Condition, Some(condition)) => {
                    self.conditions.iter().any(|c| c == condition)
                        || self.installed.iter().any(|i| i == exe.base.id.as_str())
                }
                _ => false,
            },
            ChainEntry::Msu(msu) => match &msu.detect_condition {
                Some(condition) => {
                    self.conditions.iter().any(|c| c == condition)
                        || self.installed.iter().any(|i| i == msu.base.id.as_str())
                }
                None => self.installed.iter().any(|i| i == msu.base.id.as_str()),
            },
            _ => package
                .base()
                .is_some_and(|b| self.installed.iter().any(|i| i == b.id.as_str())),
        };
        Ok(if installed {
            PackageState::Present
        } else {
            PackageState::Absent
        })
    }

    async fn related_products(&self, related_id: &str) -> anyhow::Result<Vec<RelatedProduct>> {
        Ok(self
            .products
            .iter()
            .filter(|p| p.id == related_id)
            .map(|p| RelatedProduct {
                id: p.id.clone(),
                version: p.version.clone(),
                language: p.language.clone(),
            })
            .collect())
    }
}

/// Dispatches planned actions by spawning the platform installer (or
/// the package's own executable for exe packages).
pub struct ProcessExecutor {
    manifest: BundleManifest,
    extract_dir: PathBuf,
}

impl ProcessExecutor {
    /// Create an executor over payloads extracted to `extract_dir`.
    pub fn new(manifest: &BundleManifest, extract_dir: PathBuf) -> Self {
        Self {
            manifest: manifest.clone(),
            extract_dir,
        }
    }

    fn entry(&self, action: &PlannedAction) -> anyhow::Result<&ChainEntry> {
        self.manifest
            .packages()
            .find(|e| e.base().is_some_and(|b| b.id == action.package))
            .with_context(|| format!("Package '{}' is not in the manifest", action.package))
    }

    fn primary_payload_path(&self, entry: &ChainEntry) -> anyhow::Result<PathBuf> {
        let base = entry.base().context("boundary entries carry no payload")?;
        let payload_id = base
            .payload_refs
            .first()
            .with_context(|| format!("Package '{}' has no payloads", base.id))?;
        let payload = self
            .manifest
            .payload(payload_id)
            .with_context(|| format!("Payload '{payload_id}' is not in the manifest"))?;
        Ok(self.extract_dir.join(&payload.file_path))
    }

    fn command_for(
        &self,
        action: &PlannedAction,
        verb: Verb,
    ) -> anyhow::Result<tokio::process::Command> {
        let entry = self.entry(action)?;
        let path = self.primary_payload_path(entry)?;
        let mut command = match (action.kind, verb) {
            (PackageKind::Exe, _) => {
                let mut command = tokio::process::Command::new(&path);
                if let ChainEntry::Exe(exe) = entry {
                    let arguments = match verb {
                        Verb::Install => &exe.install_arguments,
                        Verb::Repair => &exe.repair_arguments,
                        Verb::Uninstall => &exe.uninstall_arguments,
                    };
                    if let Some(arguments) = arguments {
                        command.args(arguments.split_whitespace());
                    }
                }
                command
            }
            (PackageKind::Msi, Verb::Install) => msiexec(["/i".as_ref(), path.as_os_str()]),
            (PackageKind::Msi, Verb::Repair) => msiexec(["/fa".as_ref(), path.as_os_str()]),
            (PackageKind::Msi, Verb::Uninstall) => msiexec(["/x".as_ref(), path.as_os_str()]),
            (PackageKind::Msp, Verb::Uninstall) => {
                msiexec(["/uninstall".as_ref(), path.as_os_str()])
            }
            (PackageKind::Msp, _) => msiexec(["/update".as_ref(), path.as_os_str()]),
            (PackageKind::Msu, Verb::Uninstall) => {
                let mut command = tokio::process::Command::new("wusa");
                command.arg("/uninstall").arg(&path).arg("/quiet");
                command
            }
            (PackageKind::Msu, _) => {
                let mut command = tokio::process::Command::new("wusa");
                command.arg(&path).arg("/quiet");
                command
            }
        };
        command.kill_on_drop(true);
        Ok(command)
    }

    async fn run(&self, action: &PlannedAction, verb: Verb) -> anyhow::Result<ExecuteOutcome> {
        let mut command = self.command_for(action, verb)?;
        tracing::info!(package = %action.package, ?verb, "spawning installer process");
        let status = command
            .status()
            .await
            .with_context(|| format!("Failed to spawn installer for '{}'", action.package))?;
        Ok(outcome_from_status(status))
    }
}

#[derive(Debug, Clone, Copy)]
enum Verb {
    Install,
    Uninstall,
    Repair,
}

fn msiexec(args: [&std::ffi::OsStr; 2]) -> tokio::process::Command {
    let mut command = tokio::process::Command::new("msiexec");
    command.args(args).arg("/quiet").arg("/norestart");
    command
}

/// Map an installer exit status onto an engine outcome.
///
/// 3010 is the installer's reboot-required code, 1602 its
/// user-cancelled code.
fn outcome_from_status(status: std::process::ExitStatus) -> ExecuteOutcome {
    if status.success() {
        return ExecuteOutcome::Success;
    }
    match status.code() {
        Some(3010) => ExecuteOutcome::NeedsReboot,
        Some(1602) => ExecuteOutcome::UserCancelled,
        _ => ExecuteOutcome::Failed,
    }
}

#[async_trait]
impl PackageExecutor for ProcessExecutor {
    async fn install(&self, action: &PlannedAction) -> anyhow::Result<ExecuteOutcome> {
        self.run(action, Verb::Install).await
    }

    async fn uninstall(&self, action: &PlannedAction) -> anyhow::Result<ExecuteOutcome> {
        self.run(action, Verb::Uninstall).await
    }

    async fn repair(&self, action: &PlannedAction) -> anyhow::Result<ExecuteOutcome> {
        self.run(action, Verb::Repair).await
    }
}
