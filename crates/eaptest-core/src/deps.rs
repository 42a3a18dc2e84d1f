//! Dependency resolution: platform detection and read-only probing of the
//! tools the suite needs.
//!
//! Nothing here installs or mutates anything; the [`build`](crate::build)
//! pipeline owns all side effects.

use crate::error::SuiteError;
use serde::Serialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Tools the build pipeline invokes directly.
pub const REQUIRED_TOOLS: &[&str] = &["git", "make", "gcc"];

/// Name of the external authentication test binary.
pub const BINARY_NAME: &str = "eapol_test";

/// Minimum functional eapol_test version (major, minor).
pub const MIN_BINARY_VERSION: (u32, u32) = (2, 9);

/// How long the version probe waits before declaring the binary unusable.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Presence/compatibility of a single tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Present,
    Missing,
    Incompatible,
}

/// Result of probing one tool. Recomputed at each invocation, never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct DependencyState {
    pub tool: String,
    pub status: ToolStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl DependencyState {
    fn present(tool: &str, detail: Option<String>) -> Self {
        Self {
            tool: tool.to_string(),
            status: ToolStatus::Present,
            detail,
        }
    }

    fn missing(tool: &str, detail: impl Into<String>) -> Self {
        Self {
            tool: tool.to_string(),
            status: ToolStatus::Missing,
            detail: Some(detail.into()),
        }
    }

    fn incompatible(tool: &str, detail: impl Into<String>) -> Self {
        Self {
            tool: tool.to_string(),
            status: ToolStatus::Incompatible,
            detail: Some(detail.into()),
        }
    }
}

/// Package managers the build pipeline knows how to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageManager {
    Apt,
    Dnf,
    Pacman,
    Brew,
}

impl PackageManager {
    pub fn command(self) -> &'static str {
        match self {
            PackageManager::Apt => "apt-get",
            PackageManager::Dnf => "dnf",
            PackageManager::Pacman => "pacman",
            PackageManager::Brew => "brew",
        }
    }

    /// Packages needed to compile eapol_test on this platform.
    pub fn toolchain_packages(self) -> &'static [&'static str] {
        match self {
            PackageManager::Apt => &["build-essential", "libssl-dev", "libnl-3-dev", "libnl-genl-3-dev"],
            PackageManager::Dnf => &["gcc", "make", "openssl-devel", "libnl3-devel"],
            PackageManager::Pacman => &["base-devel", "openssl", "libnl"],
            PackageManager::Brew => &["pkg-config", "autoconf", "automake", "libtool", "openssl"],
        }
    }

    /// Full install command for the given packages. Privilege escalation is
    /// part of the contract for system package managers; brew refuses sudo.
    pub fn install_command(self, packages: &[&str]) -> Vec<String> {
        let mut cmd: Vec<String> = match self {
            PackageManager::Apt => vec!["sudo".into(), "apt-get".into(), "install".into(), "-y".into()],
            PackageManager::Dnf => vec!["sudo".into(), "dnf".into(), "install".into(), "-y".into()],
            PackageManager::Pacman => {
                vec!["sudo".into(), "pacman".into(), "-Sy".into(), "--noconfirm".into()]
            }
            PackageManager::Brew => vec!["brew".into(), "install".into()],
        };
        cmd.extend(packages.iter().map(|p| (*p).to_string()));
        cmd
    }
}

/// Detects the host's package manager by probing PATH.
///
/// Inability to determine the platform is a distinct error, not `Missing`.
pub fn detect_package_manager() -> Result<PackageManager, SuiteError> {
    let candidates = [
        ("apt-get", PackageManager::Apt),
        ("dnf", PackageManager::Dnf),
        ("pacman", PackageManager::Pacman),
        ("brew", PackageManager::Brew),
    ];
    for (cmd, manager) in candidates {
        if find_executable(cmd).is_some() {
            return Ok(manager);
        }
    }
    Err(SuiteError::UnknownPlatform)
}

/// Probes each named tool on PATH.
pub fn resolve_tools(tools: &[&str]) -> Vec<DependencyState> {
    tools
        .iter()
        .map(|tool| match find_executable(tool) {
            Some(path) => DependencyState::present(tool, Some(path.display().to_string())),
            None => DependencyState::missing(tool, "not found on PATH"),
        })
        .collect()
}

/// Probes the authentication test binary by invoking its version flag.
///
/// A spawn failure, non-zero exit, or unparseable banner yields `Missing`;
/// a parsed version below [`MIN_BINARY_VERSION`] yields `Incompatible`.
pub async fn probe_binary(path: &Path) -> DependencyState {
    let output = tokio::time::timeout(
        PROBE_TIMEOUT,
        tokio::process::Command::new(path)
            .arg("-v")
            .kill_on_drop(true)
            .output(),
    )
    .await;

    let output = match output {
        Ok(Ok(output)) => output,
        Ok(Err(err)) => return DependencyState::missing(BINARY_NAME, format!("failed to launch: {err}")),
        Err(_) => return DependencyState::missing(BINARY_NAME, "version probe timed out"),
    };

    if !output.status.success() {
        return DependencyState::missing(
            BINARY_NAME,
            format!("version probe exited with {}", output.status),
        );
    }

    let banner = String::from_utf8_lossy(&output.stdout);
    let banner = if banner.trim().is_empty() {
        String::from_utf8_lossy(&output.stderr).into_owned()
    } else {
        banner.into_owned()
    };

    match parse_version(&banner) {
        Some(version) if version >= MIN_BINARY_VERSION => {
            DependencyState::present(BINARY_NAME, Some(format!("v{}.{}", version.0, version.1)))
        }
        Some(version) => DependencyState::incompatible(
            BINARY_NAME,
            format!(
                "v{}.{} is older than required v{}.{}",
                version.0, version.1, MIN_BINARY_VERSION.0, MIN_BINARY_VERSION.1
            ),
        ),
        None => DependencyState::missing(BINARY_NAME, "unparseable version output"),
    }
}

/// Extracts `(major, minor)` from a banner like `eapol_test v2.11`.
pub fn parse_version(banner: &str) -> Option<(u32, u32)> {
    for token in banner.split_whitespace() {
        let Some(rest) = token.strip_prefix('v') else {
            continue;
        };
        let mut parts = rest.split('.');
        let major = parts.next()?.parse::<u32>().ok()?;
        let minor = parts
            .next()
            .map(|m| {
                // Tolerate trailing junk like "11-devel".
                m.chars()
                    .take_while(char::is_ascii_digit)
                    .collect::<String>()
            })
            .and_then(|m| m.parse::<u32>().ok())
            .unwrap_or(0);
        return Some((major, minor));
    }
    None
}

/// Walks PATH looking for an executable with the given name. An explicit
/// path (containing a separator) is checked directly.
pub fn find_executable(command: &str) -> Option<PathBuf> {
    let path = Path::new(command);
    if path.components().count() > 1 {
        return if path.is_file() {
            Some(path.to_path_buf())
        } else {
            None
        };
    }

    let path_var = env::var_os("PATH")?;
    for dir in env::split_paths(&path_var) {
        let candidate = dir.join(command);
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_version_accepts_banner() {
        assert_eq!(parse_version("eapol_test v2.11"), Some((2, 11)));
        assert_eq!(parse_version("eapol_test v2.10-devel hostapd"), Some((2, 10)));
        assert_eq!(parse_version("v3.0"), Some((3, 0)));
    }

    #[test]
    fn parse_version_rejects_noise() {
        assert_eq!(parse_version("usage: eapol_test [options]"), None);
        assert_eq!(parse_version(""), None);
        assert_eq!(parse_version("version 2.11"), None);
    }

    #[test]
    fn resolve_tools_reports_missing() {
        let states = resolve_tools(&["definitely-not-a-real-tool-xyz"]);
        assert_eq!(states.len(), 1);
        assert_eq!(states[0].status, ToolStatus::Missing);
    }

    #[test]
    fn install_command_includes_packages() {
        let cmd = PackageManager::Apt.install_command(&["libssl-dev"]);
        assert_eq!(cmd[0], "sudo");
        assert!(cmd.contains(&"libssl-dev".to_string()));

        let brew = PackageManager::Brew.install_command(&["openssl"]);
        assert_eq!(brew[0], "brew");
    }

    #[cfg(unix)]
    mod probes {
        use super::super::*;
        use std::io::Write;
        use std::os::unix::fs::PermissionsExt;

        fn stub_script(dir: &Path, name: &str, body: &str) -> PathBuf {
            let path = dir.join(name);
            let mut file = std::fs::File::create(&path).unwrap();
            writeln!(file, "#!/bin/sh\n{body}").unwrap();
            let mut perms = file.metadata().unwrap().permissions();
            perms.set_mode(0o755);
            std::fs::set_permissions(&path, perms).unwrap();
            path
        }

        #[tokio::test]
        async fn probe_binary_accepts_compatible_version() {
            let tmp = tempfile::tempdir().unwrap();
            let path = stub_script(tmp.path(), "eapol_test", "echo 'eapol_test v2.11'");
            let state = probe_binary(&path).await;
            assert_eq!(state.status, ToolStatus::Present);
        }

        #[tokio::test]
        async fn probe_binary_flags_old_version() {
            let tmp = tempfile::tempdir().unwrap();
            let path = stub_script(tmp.path(), "eapol_test", "echo 'eapol_test v2.4'");
            let state = probe_binary(&path).await;
            assert_eq!(state.status, ToolStatus::Incompatible);
        }

        #[tokio::test]
        async fn probe_binary_treats_nonzero_exit_as_missing() {
            let tmp = tempfile::tempdir().unwrap();
            let path = stub_script(tmp.path(), "eapol_test", "exit 1");
            let state = probe_binary(&path).await;
            assert_eq!(state.status, ToolStatus::Missing);
        }

        #[tokio::test]
        async fn probe_binary_treats_garbage_as_missing() {
            let tmp = tempfile::tempdir().unwrap();
            let path = stub_script(tmp.path(), "eapol_test", "echo 'usage: eapol_test'");
            let state = probe_binary(&path).await;
            assert_eq!(state.status, ToolStatus::Missing);
        }

        #[tokio::test]
        async fn probe_binary_missing_file() {
            let state = probe_binary(Path::new("/nonexistent/eapol_test")).await;
            assert_eq!(state.status, ToolStatus::Missing);
        }
    }
}
