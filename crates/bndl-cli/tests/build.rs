//! End-to-end tests that drive the `bndl` binary through build,
//! extract, inspect, and apply.

use std::path::PathBuf;
use std::process::Command;
use tempfile::TempDir;

/// Test context that sets up a scratch directory with authored sources
/// and payload files.
struct TestContext {
    temp_dir: TempDir,
}

const VALID_BUNDLE: &str = r#"
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

[[package.feature]]
id = "ProductFeature"
size = 34
"#;

impl TestContext {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        Self { temp_dir }
    }

    fn write_source(&self, name: &str, content: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        std::fs::write(&path, content).expect("failed to write source");
        path
    }

    fn write_payload(&self, name: &str) {
        std::fs::write(self.temp_dir.path().join(name), name.as_bytes().repeat(20))
            .expect("failed to write payload");
    }

    fn bndl_cmd(&self) -> Command {
        let bin_path = env!("CARGO_BIN_EXE_bndl");
        let mut cmd = Command::new(bin_path);
        cmd.current_dir(self.temp_dir.path());
        cmd
    }

    fn build_valid(&self) -> PathBuf {
        self.write_payload("ba.exe");
        self.write_payload("test.msi");
        let source = self.write_source("bundle.toml", VALID_BUNDLE);
        let output = self.temp_dir.path().join("out.bndl");
        let result = self
            .bndl_cmd()
            .arg("build")
            .arg(&source)
            .arg("-o")
            .arg(&output)
            .output()
            .expect("failed to run bndl build");
        assert!(
            result.status.success(),
            "build failed: {}",
            String::from_utf8_lossy(&result.stderr)
        );
        output
    }
}

#[test]
fn test_help_command() {
    let ctx = TestContext::new();
    let output = ctx
        .bndl_cmd()
        .arg("--help")
        .output()
        .expect("failed to run bndl");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Usage:"));
}

#[test]
fn test_version_command() {
    let ctx = TestContext::new();
    let output = ctx
        .bndl_cmd()
        .arg("--version")
        .output()
        .expect("failed to run bndl");
    assert!(output.status.success());
}

#[test]
fn test_build_produces_artifact() {
    let ctx = TestContext::new();
    let artifact = ctx.build_valid();
    assert!(artifact.exists(), "artifact should exist after build");
    let bytes = std::fs::read(&artifact).unwrap();
    assert_eq!(&bytes[..4], b"BNDL");
}

#[test]
fn test_build_exit_code_is_the_error_class() {
    let ctx = TestContext::new();
    ctx.write_payload("test.msi");
    // ProductCode and Version missing: error class 44.
    let source = ctx.write_source(
        "broken.toml",
        r#"
[bundle]
name = "Broken"
version = "1.0"

[[chain]]
package = "MsiA"

[[package]]
type = "msi"
id = "MsiA"
source_file = "test.msi"
"#,
    );
    let output = ctx
        .bndl_cmd()
        .arg("build")
        .arg(&source)
        .arg("-o")
        .arg(ctx.temp_dir.path().join("out.bndl"))
        .output()
        .expect("failed to run bndl build");
    assert_eq!(output.status.code(), Some(44));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("error BNDL0044"));
    assert!(stderr.contains("ProductCode"));
    assert!(!ctx.temp_dir.path().join("out.bndl").exists());
}

#[test]
fn test_build_reports_every_error_before_exiting() {
    let ctx = TestContext::new();
    // Both a mutual exclusion (35) and a missing companion (10); the
    // exit code is the numeric maximum.
    let source = ctx.write_source(
        "broken.toml",
        r#"
[bundle]
name = "Broken"
version = "1.0"

[[chain]]
package = "ExeA"

[[package]]
type = "exe"
id = "ExeA"
source_file = "setup.exe"
hash = "AA"
certificate_public_key = "KEY"
"#,
    );
    ctx.write_payload("setup.exe");
    let output = ctx
        .bndl_cmd()
        .arg("build")
        .arg(&source)
        .arg("-o")
        .arg(ctx.temp_dir.path().join("out.bndl"))
        .output()
        .expect("failed to run bndl build");
    assert_eq!(output.status.code(), Some(35));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("BNDL0035"));
    assert!(stderr.contains("BNDL0010"));
}

#[test]
fn test_build_stages_through_intermediate_folder() {
    let ctx = TestContext::new();
    ctx.write_payload("ba.exe");
    ctx.write_payload("test.msi");
    let source = ctx.write_source("bundle.toml", VALID_BUNDLE);
    let scratch = ctx.temp_dir.path().join("obj");
    let output = ctx.temp_dir.path().join("out.bndl");
    let result = ctx
        .bndl_cmd()
        .arg("build")
        .arg(&source)
        .arg("--intermediate-folder")
        .arg(&scratch)
        .arg("-o")
        .arg(&output)
        .output()
        .expect("failed to run bndl build");
    assert!(
        result.status.success(),
        "{}",
        String::from_utf8_lossy(&result.stderr)
    );
    assert!(output.exists());
    // The staged copy is moved out once the artifact is complete.
    assert!(!scratch.join("out.bndl.partial").exists());
}

#[test]
fn test_extract_command() {
    let ctx = TestContext::new();
    let artifact = ctx.build_valid();
    let ba_dir = ctx.temp_dir.path().join("ba");
    let files_dir = ctx.temp_dir.path().join("files");
    let output = ctx
        .bndl_cmd()
        .arg("extract")
        .arg(&artifact)
        .arg("--ba-folder")
        .arg(&ba_dir)
        .arg("--extract-folder")
        .arg(&files_dir)
        .output()
        .expect("failed to run bndl extract");
    assert!(
        output.status.success(),
        "{}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(ba_dir.join("ba.exe").exists());
    assert!(files_dir.join("test.msi").exists());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("TestBundle v1.0.0"));
}

#[test]
fn test_inspect_command() {
    let ctx = TestContext::new();
    let artifact = ctx.build_valid();
    let output = ctx
        .bndl_cmd()
        .arg("inspect")
        .arg(&artifact)
        .arg("--selector")
        .arg("Chain/MsiPackage")
        .output()
        .expect("failed to run bndl inspect");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("<MsiPackage Id='MsiA'"));
}

#[test]
fn test_inspect_ba_data_namespace() {
    let ctx = TestContext::new();
    let artifact = ctx.build_valid();
    let output = ctx
        .bndl_cmd()
        .arg("inspect")
        .arg(&artifact)
        .arg("--ba-data")
        .arg("--selector")
        .arg("PackageFeatureInfo")
        .output()
        .expect("failed to run bndl inspect");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Feature='ProductFeature'"));
}

#[test]
fn test_inspect_rejects_non_bundle_file() {
    let ctx = TestContext::new();
    let bogus = ctx.temp_dir.path().join("bogus.bin");
    std::fs::write(&bogus, vec![0u8; 64]).unwrap();
    let output = ctx
        .bndl_cmd()
        .arg("inspect")
        .arg(&bogus)
        .output()
        .expect("failed to run bndl inspect");
    assert!(!output.status.success());
}

#[test]
fn test_apply_dry_run_prints_the_plan() {
    let ctx = TestContext::new();
    let artifact = ctx.build_valid();
    let output = ctx
        .bndl_cmd()
        .arg("apply")
        .arg(&artifact)
        .arg("--dry-run")
        .output()
        .expect("failed to run bndl apply");
    assert!(
        output.status.success(),
        "{}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("MsiA"));
    assert!(stdout.contains("install"));
}

#[test]
fn test_apply_dry_run_with_state_file_skips_installed() {
    let ctx = TestContext::new();
    let artifact = ctx.build_valid();
    let state = ctx.temp_dir.path().join("state.toml");
    std::fs::write(&state, "installed = [\"MsiA\"]\n").unwrap();
    let output = ctx
        .bndl_cmd()
        .arg("apply")
        .arg(&artifact)
        .arg("--dry-run")
        .arg("--state")
        .arg(&state)
        .output()
        .expect("failed to run bndl apply");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("skip"));
}

#[test]
fn test_completions_command() {
    let ctx = TestContext::new();
    let output = ctx
        .bndl_cmd()
        .arg("completions")
        .arg("bash")
        .output()
        .expect("failed to run bndl completions");
    assert!(output.status.success());
    assert!(!output.stdout.is_empty());
}

#[test]
fn test_fragment_sources_merge() {
    let ctx = TestContext::new();
    ctx.write_payload("ba.exe");
    ctx.write_payload("test.msi");
    ctx.write_payload("setup.exe");
    let main = ctx.write_source(
        "main.toml",
        r#"
[bundle]
name = "Merged"
version = "1.0.0"

[[chain]]
package = "MsiA"

[[chain]]
package = "ExeB"

[[package]]
type = "msi"
id = "MsiA"
source_file = "test.msi"
product_code = "{040011E1-F84C-4927-AD62-50A5EC19CA32}"
version = "1.0.0.0"
"#,
    );
    let fragment = ctx.write_source(
        "fragment.toml",
        r#"
[bundle]
name = "Fragment"
version = "0.0.0"

[[package]]
type = "exe"
id = "ExeB"
source_file = "setup.exe"
"#,
    );
    let artifact = ctx.temp_dir.path().join("merged.bndl");
    let output = ctx
        .bndl_cmd()
        .arg("build")
        .arg(&main)
        .arg(&fragment)
        .arg("-o")
        .arg(&artifact)
        .output()
        .expect("failed to run bndl build");
    assert!(
        output.status.success(),
        "{}",
        String::from_utf8_lossy(&output.stderr)
    );

    let inspect = ctx
        .bndl_cmd()
        .arg("inspect")
        .arg(&artifact)
        .arg("--selector")
        .arg("Chain/ExePackage")
        .output()
        .expect("failed to run bndl inspect");
    let stdout = String::from_utf8_lossy(&inspect.stdout);
    assert!(stdout.contains("Id='ExeB'"));
}
