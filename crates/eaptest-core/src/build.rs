//! Build pipeline for the eapol_test binary.
//!
//! Invoked only when the dependency resolver reports the binary missing or
//! incompatible. Each step is independently failable and maps to a typed
//! [`BuildError`]; any failure is fatal for the whole suite.

use crate::deps::{self, PackageManager, ToolStatus};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::info;

/// Upstream hostap repository carrying the eapol_test sources.
const HOSTAP_REPO: &str = "https://w1.fi/hostap.git";

/// Build options appended to `.config` when the defconfig omits them.
const REQUIRED_BUILD_OPTIONS: &[&str] = &[
    "CONFIG_EAPOL_TEST=y",
    "CONFIG_TLS=openssl",
    "CONFIG_TLSV11=y",
    "CONFIG_TLSV12=y",
    "CONFIG_TLSV13=y",
];

/// How much captured subprocess output to keep in an error message.
const ERROR_TAIL_LINES: usize = 10;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("toolchain install failed: {0}")]
    ToolchainInstallFailed(String),

    #[error("source fetch failed: {0}")]
    SourceFetchFailed(String),

    #[error("build failed: {0}")]
    BuildFailed(String),

    #[error("built binary failed verification: {0}")]
    VerifyFailed(String),
}

/// Compiles eapol_test from the hostap source tree.
pub struct BuildPipeline {
    package_manager: PackageManager,
    source_dir: PathBuf,
    timeout: Duration,
}

impl BuildPipeline {
    pub fn new(package_manager: PackageManager, source_dir: PathBuf, timeout: Duration) -> Self {
        Self {
            package_manager,
            source_dir,
            timeout,
        }
    }

    /// Path the compiled binary lands at.
    pub fn binary_path(&self) -> PathBuf {
        self.source_dir.join("wpa_supplicant").join("eapol_test")
    }

    /// Runs the full pipeline and returns the verified binary path.
    pub async fn run(&self) -> Result<PathBuf, BuildError> {
        self.install_toolchain().await?;
        self.fetch_source().await?;
        self.configure().map_err(|e| BuildError::BuildFailed(e.to_string()))?;
        self.compile().await?;
        self.verify().await?;
        Ok(self.binary_path())
    }

    /// Step 1: install compiler/toolchain packages. Terminal on failure,
    /// no retry.
    async fn install_toolchain(&self) -> Result<(), BuildError> {
        let packages = self.package_manager.toolchain_packages();
        let cmd = self.package_manager.install_command(packages);
        info!(manager = self.package_manager.command(), "Installing build toolchain");

        let output = run_captured(&cmd, None, self.timeout)
            .await
            .map_err(BuildError::ToolchainInstallFailed)?;
        if !output.success {
            return Err(BuildError::ToolchainInstallFailed(output.tail()));
        }
        Ok(())
    }

    /// Step 2: obtain the source tree. Idempotent: an existing checkout is
    /// reused rather than re-cloned.
    async fn fetch_source(&self) -> Result<(), BuildError> {
        if self.source_dir.join(".git").is_dir() {
            info!(dir = %self.source_dir.display(), "Reusing existing hostap checkout");
            return Ok(());
        }
        if let Some(parent) = self.source_dir.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| BuildError::SourceFetchFailed(e.to_string()))?;
        }

        info!(repo = HOSTAP_REPO, "Cloning hostap source");
        let cmd: Vec<String> = vec![
            "git".into(),
            "clone".into(),
            "--depth".into(),
            "1".into(),
            HOSTAP_REPO.into(),
            self.source_dir.display().to_string(),
        ];
        let output = run_captured(&cmd, None, self.timeout)
            .await
            .map_err(BuildError::SourceFetchFailed)?;
        if !output.success {
            return Err(BuildError::SourceFetchFailed(output.tail()));
        }
        Ok(())
    }

    /// Step 3: apply the known-good build configuration. Copies defconfig to
    /// `.config` and appends any required options the defconfig omits.
    fn configure(&self) -> std::io::Result<()> {
        let wpa_dir = self.source_dir.join("wpa_supplicant");
        let defconfig = wpa_dir.join("defconfig");
        let dot_config = wpa_dir.join(".config");

        let mut contents = std::fs::read_to_string(&defconfig)?;
        if !contents.ends_with('\n') {
            contents.push('\n');
        }
        for option in REQUIRED_BUILD_OPTIONS {
            if !contents.lines().any(|line| line.trim() == *option) {
                contents.push_str(option);
                contents.push('\n');
            }
        }
        std::fs::write(&dot_config, contents)?;
        info!(config = %dot_config.display(), "Wrote build configuration");
        Ok(())
    }

    /// Step 4: compile, bounded by the overall build timeout.
    async fn compile(&self) -> Result<(), BuildError> {
        let wpa_dir = self.source_dir.join("wpa_supplicant");
        info!(dir = %wpa_dir.display(), "Compiling eapol_test");

        let cmd: Vec<String> = vec!["make".into(), "eapol_test".into()];
        let output = run_captured(&cmd, Some(&wpa_dir), self.timeout)
            .await
            .map_err(BuildError::BuildFailed)?;
        if !output.success {
            return Err(BuildError::BuildFailed(output.tail()));
        }
        Ok(())
    }

    /// Step 5: verify the artifact with the same version probe the resolver
    /// uses. Anything short of `Present` is a verification failure.
    async fn verify(&self) -> Result<(), BuildError> {
        let binary = self.binary_path();
        let state = deps::probe_binary(&binary).await;
        match state.status {
            ToolStatus::Present => {
                info!(binary = %binary.display(), "eapol_test built and verified");
                Ok(())
            }
            ToolStatus::Missing | ToolStatus::Incompatible => Err(BuildError::VerifyFailed(
                state.detail.unwrap_or_else(|| "probe failed".to_string()),
            )),
        }
    }
}

#[derive(Debug)]
struct CapturedOutput {
    success: bool,
    stdout: String,
    stderr: String,
}

impl CapturedOutput {
    /// Last few lines of whichever stream has content, for error messages.
    fn tail(&self) -> String {
        let source = if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        };
        let lines: Vec<&str> = source.lines().collect();
        let start = lines.len().saturating_sub(ERROR_TAIL_LINES);
        lines[start..].join("\n")
    }
}

/// Runs a command to completion with captured output and a hard timeout.
async fn run_captured(
    cmd: &[String],
    cwd: Option<&Path>,
    timeout: Duration,
) -> Result<CapturedOutput, String> {
    let (program, args) = cmd
        .split_first()
        .ok_or_else(|| "empty command".to_string())?;

    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = cwd {
        command.current_dir(dir);
    }

    let output = tokio::time::timeout(timeout, command.output())
        .await
        .map_err(|_| format!("'{program}' timed out after {}s", timeout.as_secs()))?
        .map_err(|e| format!("failed to launch '{program}': {e}"))?;

    Ok(CapturedOutput {
        success: output.status.success(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configure_appends_missing_options() {
        let tmp = tempfile::tempdir().unwrap();
        let wpa_dir = tmp.path().join("wpa_supplicant");
        std::fs::create_dir_all(&wpa_dir).unwrap();
        std::fs::write(
            wpa_dir.join("defconfig"),
            "CONFIG_TLS=openssl\n# comment\nCONFIG_IEEE8021X_EAPOL=y\n",
        )
        .unwrap();

        let pipeline = BuildPipeline::new(
            PackageManager::Apt,
            tmp.path().to_path_buf(),
            Duration::from_secs(10),
        );
        pipeline.configure().unwrap();

        let config = std::fs::read_to_string(wpa_dir.join(".config")).unwrap();
        assert!(config.contains("CONFIG_EAPOL_TEST=y"));
        assert!(config.contains("CONFIG_TLSV13=y"));
        // Present options are not duplicated.
        assert_eq!(config.matches("CONFIG_TLS=openssl").count(), 1);
    }

    #[test]
    fn configure_fails_without_defconfig() {
        let tmp = tempfile::tempdir().unwrap();
        let pipeline = BuildPipeline::new(
            PackageManager::Apt,
            tmp.path().to_path_buf(),
            Duration::from_secs(10),
        );
        assert!(pipeline.configure().is_err());
    }

    #[tokio::test]
    async fn verify_fails_when_binary_absent() {
        let tmp = tempfile::tempdir().unwrap();
        let pipeline = BuildPipeline::new(
            PackageManager::Apt,
            tmp.path().to_path_buf(),
            Duration::from_secs(10),
        );
        let err = pipeline.verify().await.unwrap_err();
        assert!(matches!(err, BuildError::VerifyFailed(_)));
    }

    #[tokio::test]
    async fn run_captured_reports_timeout() {
        let cmd: Vec<String> = vec!["sleep".into(), "5".into()];
        let err = run_captured(&cmd, None, Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(err.contains("timed out"));
    }

    #[tokio::test]
    async fn run_captured_tail_prefers_stderr() {
        let cmd: Vec<String> = vec![
            "sh".into(),
            "-c".into(),
            "echo out; echo err >&2; exit 1".into(),
        ];
        let output = run_captured(&cmd, None, Duration::from_secs(5)).await.unwrap();
        assert!(!output.success);
        assert_eq!(output.tail(), "err");
    }
}
