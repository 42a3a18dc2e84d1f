//! Per-run results and the aggregated suite report.
//!
//! The aggregator consumes exactly one [`RunResult`] per enabled spec and
//! maps the suite outcome onto a total exit-code space: 0 success, 1 one or
//! more failed, 2 configuration error, 3 dependency error.

use crate::config::{EapType, TestSpec};
use chrono::{DateTime, Local};
use colored::Colorize;
use serde::{Serialize, Serializer};
use std::path::PathBuf;
use std::time::Duration;

/// Terminal state of one test run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Failure,
    Timeout,
    Error,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Success => "SUCCESS",
            RunStatus::Failure => "FAILURE",
            RunStatus::Timeout => "TIMEOUT",
            RunStatus::Error => "ERROR",
        }
    }
}

/// Outcome of one executor invocation. Created exactly once per run and
/// never mutated afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub eap_type: EapType,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(serialize_with = "serialize_millis", rename = "duration_ms")]
    pub duration: Duration,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl RunResult {
    /// A result for a run that never reached the executor (unreachable
    /// server, build failure, scheduling fault).
    pub fn skipped(eap_type: EapType, status: RunStatus, message: impl Into<String>) -> Self {
        Self {
            eap_type,
            status,
            exit_code: None,
            duration: Duration::ZERO,
            log_path: None,
            message: Some(message.into()),
        }
    }
}

fn serialize_millis<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

/// Suite-level verdict. The mapping to exit codes is total: every reachable
/// suite state lands on exactly one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Passed,
    Failed,
    ConfigError,
    DependencyError,
}

impl Verdict {
    pub fn exit_code(self) -> i32 {
        match self {
            Verdict::Passed => 0,
            Verdict::Failed => 1,
            Verdict::ConfigError => 2,
            Verdict::DependencyError => 3,
        }
    }
}

/// Ordered collection of run results plus suite-level timing and verdict.
#[derive(Debug, Serialize)]
pub struct SuiteReport {
    pub verdict: Verdict,
    pub results: Vec<RunResult>,
    pub started_at: DateTime<Local>,
    #[serde(serialize_with = "serialize_millis", rename = "duration_ms")]
    pub duration: Duration,
    /// Suite-fatal cause when no run could start (build failure etc.).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
}

impl SuiteReport {
    /// Aggregates completed runs. Passed only when every run succeeded;
    /// an empty suite is vacuously passing.
    pub fn from_results(
        results: Vec<RunResult>,
        started_at: DateTime<Local>,
        duration: Duration,
    ) -> Self {
        let verdict = if results.iter().all(|r| r.status == RunStatus::Success) {
            Verdict::Passed
        } else {
            Verdict::Failed
        };
        Self {
            verdict,
            results,
            started_at,
            duration,
            cause: None,
        }
    }

    /// Report for a suite blocked before any run started by a dependency or
    /// build failure. Every enabled spec still gets a RunResult, status
    /// ERROR, so no spec is silently dropped.
    pub fn dependency_failure(
        specs: &[TestSpec],
        cause: impl Into<String>,
        started_at: DateTime<Local>,
        duration: Duration,
    ) -> Self {
        let cause = cause.into();
        let results = specs
            .iter()
            .map(|spec| RunResult::skipped(spec.eap_type, RunStatus::Error, cause.clone()))
            .collect();
        Self {
            verdict: Verdict::DependencyError,
            results,
            started_at,
            duration,
            cause: Some(cause),
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.verdict.exit_code()
    }

    pub fn passed(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.status == RunStatus::Success)
            .count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.passed()
    }

    /// Human-readable summary table. Verbose mode includes each run's
    /// captured message inline.
    pub fn render_summary(&self, verbose: bool) -> String {
        let mut out = String::new();
        out.push_str("\nEAP Test Suite Summary\n");

        for result in &self.results {
            let status = match result.status {
                RunStatus::Success => result.status.as_str().green(),
                RunStatus::Failure | RunStatus::Error => result.status.as_str().red(),
                RunStatus::Timeout => result.status.as_str().yellow(),
            };
            out.push_str(&format!(
                "  {:<10} {:<18} {:>8.2}s",
                result.eap_type.method_name(),
                status,
                result.duration.as_secs_f64(),
            ));
            if let Some(log) = &result.log_path {
                out.push_str(&format!("  {}", log.display()));
            }
            out.push('\n');

            // A message is always worth a line: failures carry their cause,
            // and dry runs carry the plan on a SUCCESS result.
            if let Some(message) = &result.message {
                if verbose {
                    for line in message.lines() {
                        out.push_str(&format!("      {line}\n"));
                    }
                } else {
                    let first = message.lines().next().unwrap_or_default();
                    out.push_str(&format!("      {first}\n"));
                }
            }
        }

        if let Some(cause) = &self.cause {
            out.push_str(&format!("\n  {} {cause}\n", "suite aborted:".red().bold()));
        }

        out.push_str(&format!(
            "\n{} passed, {} failed ({} total) in {:.2}s\n",
            self.passed(),
            self.failed(),
            self.results.len(),
            self.duration.as_secs_f64(),
        ));
        out
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
