//! Top-level suite driver.
//!
//! Owns the fixed run sequence: resolve the eapol_test binary (building it
//! from source when absent), probe the RADIUS server, schedule the enabled
//! runs, aggregate the results. All state lives in the [`SuiteRunner`];
//! nothing is global, so two runners never interfere.

use crate::build::BuildPipeline;
use crate::config::SuiteConfig;
use crate::deps::{self, BINARY_NAME, ToolStatus};
use crate::error::SuiteError;
use crate::executor::TestExecutor;
use crate::logs::LogManager;
use crate::probe::probe_server;
use crate::report::{RunResult, RunStatus, SuiteReport};
use crate::scheduler::Scheduler;
use chrono::Local;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Drives one full suite invocation over a validated configuration.
pub struct SuiteRunner {
    config: SuiteConfig,
    dry_run: bool,
}

impl SuiteRunner {
    pub fn new(config: SuiteConfig) -> Self {
        Self {
            config,
            dry_run: false,
        }
    }

    /// Dry-run mode validates and plans but never spawns the authentication
    /// binary or touches the network.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Runs the suite to completion. Dependency and build failures terminate
    /// in a [`SuiteReport`] carrying one ERROR result per enabled spec; only
    /// I/O faults outside any run (log directory creation) surface as errors.
    pub async fn run(&self) -> Result<SuiteReport, SuiteError> {
        let started_at = Local::now();
        let start = Instant::now();

        let specs = self.config.enabled_specs();
        if specs.is_empty() {
            warn!("No EAP types enabled; nothing to do");
            return Ok(SuiteReport::from_results(vec![], started_at, start.elapsed()));
        }

        if self.dry_run {
            return self.run_dry(specs, started_at, start).await;
        }

        let logs = Arc::new(LogManager::new(&self.config.logging)?);
        logs.append_suite(&format!(
            "suite started: {} type(s) enabled against {}:{}",
            specs.len(),
            self.config.server.address,
            self.config.server.port
        ));

        let binary = match self.ensure_binary().await {
            Ok(binary) => binary,
            Err(err @ (SuiteError::Dependency(_) | SuiteError::UnknownPlatform)) => {
                logs.append_suite(&format!("suite aborted: {err}"));
                return Ok(SuiteReport::dependency_failure(
                    &specs,
                    err.to_string(),
                    started_at,
                    start.elapsed(),
                ));
            }
            Err(err) => return Err(err),
        };
        info!(binary = %binary.display(), "Using eapol_test binary");

        if let Err(unreachable) =
            probe_server(&self.config.server, self.config.execution.probe_timeout()).await
        {
            warn!(error = %unreachable, "Reachability probe failed");
            logs.append_suite(&format!("suite aborted: {unreachable}"));
            let results = specs
                .iter()
                .map(|spec| {
                    RunResult::skipped(spec.eap_type, RunStatus::Failure, unreachable.to_string())
                })
                .collect();
            let mut report = SuiteReport::from_results(results, started_at, start.elapsed());
            report.cause = Some(unreachable.to_string());
            return Ok(report);
        }

        let executor = Arc::new(TestExecutor::new(binary, self.config.server.clone()));
        let scheduler = Scheduler::new(&self.config.execution);
        let results = scheduler
            .run(executor, specs, Arc::clone(&logs))
            .await;

        let report = SuiteReport::from_results(results, started_at, start.elapsed());
        logs.append_suite(&format!(
            "suite finished: {} passed, {} failed",
            report.passed(),
            report.failed()
        ));
        Ok(report)
    }

    /// Dry run: report the plan for each enabled type. Builds only when
    /// explicitly opted in via `dry_run_builds`.
    async fn run_dry(
        &self,
        specs: Vec<crate::config::TestSpec>,
        started_at: chrono::DateTime<Local>,
        start: Instant,
    ) -> Result<SuiteReport, SuiteError> {
        if self.config.execution.dry_run_builds {
            match self.ensure_binary().await {
                Ok(binary) => info!(binary = %binary.display(), "Dry run: binary resolved"),
                Err(err @ (SuiteError::Dependency(_) | SuiteError::UnknownPlatform)) => {
                    return Ok(SuiteReport::dependency_failure(
                        &specs,
                        err.to_string(),
                        started_at,
                        start.elapsed(),
                    ));
                }
                Err(err) => return Err(err),
            }
        }

        let results = specs
            .iter()
            .map(|spec| {
                let mode = if self.config.execution.parallel {
                    "parallel"
                } else {
                    "sequential"
                };
                info!(
                    eap_type = spec.eap_type.as_str(),
                    timeout_secs = spec.timeout_secs,
                    "Dry run: would test"
                );
                RunResult::skipped(
                    spec.eap_type,
                    RunStatus::Success,
                    format!(
                        "dry run: would authenticate against {}:{} ({mode}, {}s timeout)",
                        self.config.server.address, self.config.server.port, spec.timeout_secs
                    ),
                )
            })
            .collect();
        Ok(SuiteReport::from_results(results, started_at, start.elapsed()))
    }

    /// Resolves a usable eapol_test binary: explicit override, then PATH,
    /// then a from-source build.
    async fn ensure_binary(&self) -> Result<PathBuf, SuiteError> {
        if let Some(path) = &self.config.execution.binary_path {
            return Ok(path.clone());
        }

        if let Some(path) = deps::find_executable(BINARY_NAME) {
            let state = deps::probe_binary(&path).await;
            match state.status {
                ToolStatus::Present => return Ok(path),
                ToolStatus::Missing | ToolStatus::Incompatible => {
                    warn!(
                        binary = %path.display(),
                        detail = state.detail.as_deref().unwrap_or_default(),
                        "Installed eapol_test is unusable; building from source"
                    );
                }
            }
        } else {
            info!("eapol_test not found on PATH; building from source");
        }

        let manager = deps::detect_package_manager()?;
        let pipeline = BuildPipeline::new(
            manager,
            self.config.execution.source_dir.clone(),
            self.config.execution.build_timeout(),
        );
        Ok(pipeline.run().await?)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::{EapType, LoggingConfig, ServerTarget, TestSpec};
    use crate::report::Verdict;
    use std::io::Write as _;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    fn stub_binary(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("eapol_test_stub");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "#!/bin/sh\n{body}").unwrap();
        let mut perms = file.metadata().unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    fn spec(eap_type: EapType) -> TestSpec {
        let template = SuiteConfig::template();
        let mut spec: TestSpec =
            serde_json::from_value(template["eap_types"][eap_type.as_str()].clone()).unwrap();
        spec.eap_type = eap_type;
        spec.enabled = true;
        spec
    }

    fn config(dir: &Path, port: u16, binary: Option<PathBuf>) -> SuiteConfig {
        let mut config = SuiteConfig {
            server: ServerTarget {
                address: "127.0.0.1".to_string(),
                port,
                secret: "radsecret".to_string(),
                identity: Some("testuser".to_string()),
                password: Some("testpass".to_string()),
            },
            specs: vec![spec(EapType::Peap), spec(EapType::Md5)],
            execution: crate::config::ExecutionConfig::default(),
            logging: LoggingConfig {
                dir: dir.join("logs"),
                max_files: 20,
                max_total_bytes: 1024 * 1024,
            },
        };
        config.execution.binary_path = binary;
        config.execution.probe_timeout_secs = 2;
        config
    }

    #[tokio::test]
    async fn passing_suite_exits_zero() {
        let tmp = tempfile::tempdir().unwrap();
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let binary = stub_binary(tmp.path(), "echo SUCCESS");

        let runner = SuiteRunner::new(config(tmp.path(), port, Some(binary)));
        let report = runner.run().await.unwrap();

        assert_eq!(report.verdict, Verdict::Passed);
        assert_eq!(report.exit_code(), 0);
        assert_eq!(report.results.len(), 2);
    }

    #[tokio::test]
    async fn failing_run_exits_one() {
        let tmp = tempfile::tempdir().unwrap();
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let binary = stub_binary(tmp.path(), "echo 'authentication rejected' >&2; exit 1");

        let runner = SuiteRunner::new(config(tmp.path(), port, Some(binary)));
        let report = runner.run().await.unwrap();

        assert_eq!(report.exit_code(), 1);
        assert!(report.results.iter().all(|r| r.status == RunStatus::Failure));
    }

    #[tokio::test]
    async fn unreachable_server_fails_every_type_without_spawning() {
        let tmp = tempfile::tempdir().unwrap();
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let marker = tmp.path().join("spawned");
        let binary = stub_binary(tmp.path(), &format!("touch {}", marker.display()));

        let runner = SuiteRunner::new(config(tmp.path(), port, Some(binary)));
        let report = runner.run().await.unwrap();

        assert_eq!(report.exit_code(), 1);
        assert_eq!(report.results.len(), 2);
        assert!(report.results.iter().all(|r| r.status == RunStatus::Failure));
        assert!(report.cause.is_some());
        assert!(!marker.exists(), "binary must not run when the probe fails");
    }

    #[tokio::test]
    async fn dry_run_reports_plan_without_binary_or_network() {
        let tmp = tempfile::tempdir().unwrap();
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        // No binary at all: a dry run must still pass.
        let runner = SuiteRunner::new(config(tmp.path(), port, None)).dry_run(true);
        let report = runner.run().await.unwrap();

        assert_eq!(report.exit_code(), 0);
        assert_eq!(report.results.len(), 2);
        assert!(report
            .results
            .iter()
            .all(|r| r.message.as_deref().is_some_and(|m| m.contains("dry run"))));
        // Dry runs leave no log directory behind.
        assert!(!tmp.path().join("logs").exists());
    }

    #[tokio::test]
    async fn empty_suite_passes_vacuously() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = config(tmp.path(), 1812, None);
        for spec in &mut config.specs {
            spec.enabled = false;
        }

        let runner = SuiteRunner::new(config);
        let report = runner.run().await.unwrap();
        assert_eq!(report.exit_code(), 0);
        assert!(report.results.is_empty());
    }

    #[tokio::test]
    async fn suite_log_records_start_and_finish() {
        let tmp = tempfile::tempdir().unwrap();
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let binary = stub_binary(tmp.path(), "echo SUCCESS");

        let runner = SuiteRunner::new(config(tmp.path(), port, Some(binary)));
        runner.run().await.unwrap();

        let logs_dir = tmp.path().join("logs");
        let suite_log = std::fs::read_dir(&logs_dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .find(|e| e.file_name().to_string_lossy().starts_with("eaptest-suite-"))
            .expect("suite log exists");
        let text = std::fs::read_to_string(suite_log.path()).unwrap();
        assert!(text.contains("suite started"));
        assert!(text.contains("suite finished: 2 passed, 0 failed"));
    }
}
