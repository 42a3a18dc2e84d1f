//! Preflight checks for validating the environment before a suite run.
//!
//! Surfaced through `eaptest doctor`: each check probes one external
//! prerequisite read-only and reports pass/warn/fail.

use crate::config::SuiteConfig;
use crate::deps::{self, BINARY_NAME, REQUIRED_TOOLS, ToolStatus};
use crate::probe::probe_server;
use async_trait::async_trait;
use serde::Serialize;

/// Status of a preflight check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
}

/// Result of a single preflight check.
#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub name: String,
    pub label: String,
    pub status: CheckStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl CheckResult {
    pub fn pass(name: &str, label: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            label: label.into(),
            status: CheckStatus::Pass,
            message: None,
        }
    }

    pub fn warn(name: &str, label: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            label: label.into(),
            status: CheckStatus::Warn,
            message: Some(message.into()),
        }
    }

    pub fn fail(name: &str, label: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            label: label.into(),
            status: CheckStatus::Fail,
            message: Some(message.into()),
        }
    }
}

/// A single preflight check.
#[async_trait]
pub trait PreflightCheck: Send + Sync {
    fn name(&self) -> &'static str;
    async fn run(&self, config: &SuiteConfig) -> CheckResult;
}

/// Aggregated preflight report.
#[derive(Debug, Clone, Serialize)]
pub struct PreflightReport {
    pub passed: bool,
    pub warnings: usize,
    pub failures: usize,
    pub checks: Vec<CheckResult>,
}

impl PreflightReport {
    fn from_results(checks: Vec<CheckResult>) -> Self {
        let warnings = checks
            .iter()
            .filter(|c| c.status == CheckStatus::Warn)
            .count();
        let failures = checks
            .iter()
            .filter(|c| c.status == CheckStatus::Fail)
            .count();
        Self {
            passed: failures == 0,
            warnings,
            failures,
            checks,
        }
    }
}

/// Runs a set of preflight checks.
pub struct PreflightRunner {
    checks: Vec<Box<dyn PreflightCheck>>,
}

impl PreflightRunner {
    pub fn default_checks() -> Self {
        Self {
            checks: vec![
                Box::new(PackageManagerCheck),
                Box::new(BuildToolsCheck),
                Box::new(BinaryCheck),
                Box::new(ServerReachableCheck),
                Box::new(EnabledTypesCheck),
            ],
        }
    }

    pub async fn run_all(&self, config: &SuiteConfig) -> PreflightReport {
        let mut results = Vec::new();
        for check in &self.checks {
            results.push(check.run(config).await);
        }
        PreflightReport::from_results(results)
    }
}

struct PackageManagerCheck;

#[async_trait]
impl PreflightCheck for PackageManagerCheck {
    fn name(&self) -> &'static str {
        "platform"
    }

    async fn run(&self, _config: &SuiteConfig) -> CheckResult {
        match deps::detect_package_manager() {
            Ok(manager) => CheckResult::pass(
                self.name(),
                format!("Package manager available ({})", manager.command()),
            ),
            Err(err) => CheckResult::fail(self.name(), "No package manager found", err.to_string()),
        }
    }
}

struct BuildToolsCheck;

#[async_trait]
impl PreflightCheck for BuildToolsCheck {
    fn name(&self) -> &'static str {
        "tools"
    }

    async fn run(&self, _config: &SuiteConfig) -> CheckResult {
        let missing: Vec<String> = deps::resolve_tools(REQUIRED_TOOLS)
            .into_iter()
            .filter(|state| state.status == ToolStatus::Missing)
            .map(|state| state.tool)
            .collect();

        if missing.is_empty() {
            CheckResult::pass(
                self.name(),
                format!("Build tools available ({})", REQUIRED_TOOLS.join(", ")),
            )
        } else {
            // Missing build tools only matter when the binary needs building,
            // so this is a warning rather than a hard failure.
            CheckResult::warn(
                self.name(),
                "Missing build tools",
                format!("Missing: {}", missing.join(", ")),
            )
        }
    }
}

struct BinaryCheck;

#[async_trait]
impl PreflightCheck for BinaryCheck {
    fn name(&self) -> &'static str {
        "binary"
    }

    async fn run(&self, config: &SuiteConfig) -> CheckResult {
        let path = config
            .execution
            .binary_path
            .clone()
            .or_else(|| deps::find_executable(BINARY_NAME));

        let Some(path) = path else {
            return CheckResult::warn(
                self.name(),
                "eapol_test not found",
                "Will be built from source on the next run",
            );
        };

        let state = deps::probe_binary(&path).await;
        match state.status {
            ToolStatus::Present => CheckResult::pass(
                self.name(),
                format!(
                    "eapol_test available ({}{})",
                    path.display(),
                    state.detail.map(|d| format!(", {d}")).unwrap_or_default()
                ),
            ),
            ToolStatus::Incompatible => CheckResult::fail(
                self.name(),
                "eapol_test is incompatible",
                state.detail.unwrap_or_default(),
            ),
            ToolStatus::Missing => CheckResult::warn(
                self.name(),
                "eapol_test failed its version probe",
                state.detail.unwrap_or_default(),
            ),
        }
    }
}

struct ServerReachableCheck;

#[async_trait]
impl PreflightCheck for ServerReachableCheck {
    fn name(&self) -> &'static str {
        "server"
    }

    async fn run(&self, config: &SuiteConfig) -> CheckResult {
        match probe_server(&config.server, config.execution.probe_timeout()).await {
            Ok(()) => CheckResult::pass(
                self.name(),
                format!(
                    "RADIUS server reachable ({}:{})",
                    config.server.address, config.server.port
                ),
            ),
            Err(err) => CheckResult::fail(self.name(), "RADIUS server unreachable", err.to_string()),
        }
    }
}

struct EnabledTypesCheck;

#[async_trait]
impl PreflightCheck for EnabledTypesCheck {
    fn name(&self) -> &'static str {
        "config"
    }

    async fn run(&self, config: &SuiteConfig) -> CheckResult {
        let enabled: Vec<&str> = config
            .specs
            .iter()
            .filter(|s| s.enabled)
            .map(|s| s.eap_type.as_str())
            .collect();
        if enabled.is_empty() {
            CheckResult::warn(
                self.name(),
                "No EAP types enabled",
                "Enable at least one type in the config file",
            )
        } else {
            CheckResult::pass(
                self.name(),
                format!("EAP types enabled: {}", enabled.join(", ")),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_counts_statuses() {
        let checks = vec![
            CheckResult::pass("a", "ok"),
            CheckResult::warn("b", "warn", "needs attention"),
            CheckResult::fail("c", "fail", "broken"),
        ];
        let report = PreflightReport::from_results(checks);
        assert_eq!(report.warnings, 1);
        assert_eq!(report.failures, 1);
        assert!(!report.passed);
    }

    #[tokio::test]
    async fn enabled_types_check_warns_on_empty_config() {
        let template = serde_json::to_string(&SuiteConfig::template()).unwrap();
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.json");
        std::fs::write(&path, template).unwrap();
        let config = SuiteConfig::load(&path).unwrap();

        let result = EnabledTypesCheck.run(&config).await;
        assert_eq!(result.status, CheckStatus::Warn);
    }

    #[tokio::test]
    async fn server_check_fails_for_closed_port() {
        let template = serde_json::to_string(&SuiteConfig::template()).unwrap();
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.json");
        std::fs::write(&path, template).unwrap();
        let mut config = SuiteConfig::load(&path).unwrap();

        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        config.server.address = "127.0.0.1".to_string();
        config.server.port = port;

        let result = ServerReachableCheck.run(&config).await;
        assert_eq!(result.status, CheckStatus::Fail);
    }
}
