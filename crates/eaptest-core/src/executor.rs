//! Runs one authentication attempt per enabled EAP type as a bounded-time
//! subprocess and classifies the outcome.
//!
//! Each run moves through an explicit state machine:
//! `Pending -> Running -> {Success, Failure, Timeout, Error}`. The transition
//! triggers are process exit, timer expiry, and external cancellation; there
//! is no other way out of `Running`.

use crate::config::{EapType, ServerTarget, TestSpec};
use crate::logs::RunLog;
use crate::report::{RunResult, RunStatus};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

/// Marker eapol_test prints on a successful authentication. Exit code 0
/// without this marker is treated as a failure with the raw output retained.
const SUCCESS_MARKER: &str = "SUCCESS";

/// How long to wait after SIGTERM before escalating to SIGKILL.
const KILL_GRACE_PERIOD: Duration = Duration::from_secs(2);

/// How much output tail to keep as a failure message.
const MESSAGE_TAIL_LINES: usize = 8;

/// Lifecycle of a single run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Pending,
    Running,
    Done(RunStatus),
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Done(_))
    }
}

/// Executes eapol_test for one TestSpec at a time. The binary path and
/// server target are read-only shared state; the executor holds no mutable
/// state of its own and is safe to share across workers.
#[derive(Debug)]
pub struct TestExecutor {
    binary: PathBuf,
    server: ServerTarget,
}

impl TestExecutor {
    pub fn new(binary: PathBuf, server: ServerTarget) -> Self {
        Self { binary, server }
    }

    /// Runs one authentication attempt, writing raw captured output to the
    /// run's dedicated log. Never returns an error: every failure mode
    /// terminates in a typed [`RunResult`].
    pub async fn execute(&self, spec: &TestSpec, mut log: RunLog) -> RunResult {
        let started = Instant::now();
        debug!(eap = %spec.eap_type, "Preparing authentication attempt");

        // Referenced files are checked here rather than at config load so a
        // missing certificate fails this run, not the whole suite.
        if let Some(missing) = self.missing_input_file(spec) {
            let message = format!("input file not found: {}", missing.display());
            let _ = log.write_line(&message);
            return self.finish(spec, RunStatus::Failure, None, started, log, Some(message));
        }

        let conf = match self.write_network_conf(spec) {
            Ok(conf) => conf,
            Err(err) => {
                let message = format!("failed to write eapol_test config: {err}");
                let _ = log.write_line(&message);
                return self.finish(spec, RunStatus::Error, None, started, log, Some(message));
            }
        };

        let args = self.build_args(spec, conf.path());
        let _ = log.write_line(&format!(
            "$ {} {}",
            self.binary.display(),
            redact_args(&args, &self.server.secret).join(" ")
        ));

        let mut command = Command::new(&self.binary);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // The child leads its own process group so a timeout kill reaches
        // anything it spawned, not just the direct child.
        #[cfg(unix)]
        command.process_group(0);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(err) => {
                let message = format!("failed to launch {}: {err}", self.binary.display());
                let _ = log.write_line(&message);
                return self.finish(spec, RunStatus::Error, None, started, log, Some(message));
            }
        };

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let stdout_task = tokio::spawn(read_stream(stdout));
        let stderr_task = tokio::spawn(read_stream(stderr));

        let (exit_status, timed_out) = tokio::select! {
            status = child.wait() => (status.ok(), false),
            () = tokio::time::sleep(spec.timeout()) => {
                warn!(eap = %spec.eap_type, timeout_secs = spec.timeout_secs, "Run exceeded timeout, terminating");
                terminate(&mut child).await;
                // Reap so no zombie survives the orchestrator.
                (child.wait().await.ok(), true)
            }
        };

        let stdout_text = stdout_task.await.unwrap_or_default();
        let stderr_text = stderr_task.await.unwrap_or_default();
        let _ = log.write_raw(&stdout_text);
        if !stderr_text.is_empty() {
            let _ = log.write_line("--- stderr ---");
            let _ = log.write_raw(&stderr_text);
        }

        let exit_code = exit_status.as_ref().and_then(|s| s.code());
        let (status, message) = if timed_out {
            (
                RunStatus::Timeout,
                Some(format!("timed out after {}s", spec.timeout_secs)),
            )
        } else {
            classify(
                exit_status.is_some_and(|s| s.success()),
                exit_code,
                &stdout_text,
                &stderr_text,
            )
        };

        self.finish(spec, status, exit_code, started, log, message)
    }

    fn finish(
        &self,
        spec: &TestSpec,
        status: RunStatus,
        exit_code: Option<i32>,
        started: Instant,
        mut log: RunLog,
        message: Option<String>,
    ) -> RunResult {
        let duration = started.elapsed();
        let _ = log.write_line(&format!(
            "--- {} {} in {:.2}s ---",
            spec.eap_type,
            status.as_str(),
            duration.as_secs_f64()
        ));
        RunResult {
            eap_type: spec.eap_type,
            status,
            exit_code,
            duration,
            log_path: Some(log.path.clone()),
            message,
        }
    }

    /// First referenced input file that does not exist, if any.
    fn missing_input_file(&self, spec: &TestSpec) -> Option<PathBuf> {
        [
            spec.ca_cert.as_ref(),
            spec.client_cert.as_ref(),
            spec.private_key.as_ref(),
            spec.pac_file.as_ref(),
        ]
        .into_iter()
        .flatten()
        .find(|path| !path.exists())
        .cloned()
    }

    /// Renders the wpa_supplicant network block for this EAP type into a
    /// temp file consumed via `-c`.
    fn write_network_conf(&self, spec: &TestSpec) -> std::io::Result<tempfile::NamedTempFile> {
        let mut conf = tempfile::Builder::new()
            .prefix("eaptest-")
            .suffix(".conf")
            .tempfile()?;
        std::io::Write::write_all(&mut conf, render_network_conf(spec, &self.server).as_bytes())?;
        Ok(conf)
    }

    fn build_args(&self, spec: &TestSpec, conf_path: &Path) -> Vec<String> {
        let mut args = vec![
            "-c".to_string(),
            conf_path.display().to_string(),
            "-a".to_string(),
            self.server.address.clone(),
            "-p".to_string(),
            self.server.port.to_string(),
            "-s".to_string(),
            self.server.secret.clone(),
            "-r".to_string(),
            "0".to_string(),
        ];
        if let Some(identity) = spec.effective_username(&self.server) {
            args.push("-M".to_string());
            args.push(identity.to_string());
        }
        if spec.eap_type.requires_password()
            && let Some(password) = spec.effective_password(&self.server)
        {
            args.push("-P".to_string());
            args.push(password.to_string());
        }
        args
    }
}

/// Classifies a completed (non-timeout) run.
fn classify(
    success: bool,
    exit_code: Option<i32>,
    stdout: &str,
    stderr: &str,
) -> (RunStatus, Option<String>) {
    if success {
        let marker = stdout
            .lines()
            .chain(stderr.lines())
            .any(|line| line.trim() == SUCCESS_MARKER);
        if marker {
            (RunStatus::Success, None)
        } else {
            (
                RunStatus::Failure,
                Some(format!(
                    "exited 0 without success marker\n{}",
                    output_tail(stdout, stderr)
                )),
            )
        }
    } else {
        let code = exit_code.map_or_else(|| "signal".to_string(), |c| c.to_string());
        (
            RunStatus::Failure,
            Some(format!(
                "eapol_test exited with code {code}\n{}",
                output_tail(stdout, stderr)
            )),
        )
    }
}

/// Last lines of whichever stream has content, for the result message.
fn output_tail(stdout: &str, stderr: &str) -> String {
    let source = if stderr.trim().is_empty() { stdout } else { stderr };
    let lines: Vec<&str> = source.lines().collect();
    let start = lines.len().saturating_sub(MESSAGE_TAIL_LINES);
    lines[start..].join("\n")
}

/// Replaces the shared secret in a rendered argument list.
fn redact_args(args: &[String], secret: &str) -> Vec<String> {
    args.iter()
        .map(|a| if a == secret { "***".to_string() } else { a.clone() })
        .collect()
}

async fn read_stream<R: tokio::io::AsyncRead + Unpin>(stream: Option<R>) -> String {
    let Some(mut stream) = stream else {
        return String::new();
    };
    let mut buf = Vec::new();
    let _ = stream.read_to_end(&mut buf).await;
    String::from_utf8_lossy(&buf).into_owned()
}

/// Terminates a child forcefully and confirms it: SIGTERM first, then
/// SIGKILL once the grace period expires. Signals target the child's whole
/// process group so nothing it spawned survives (or keeps our pipes open).
#[cfg(unix)]
async fn terminate(child: &mut Child) {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let Some(pid) = child.id() else {
        return; // Already exited.
    };
    // Negative pid addresses the process group the child leads.
    let group = Pid::from_raw(-(pid as i32));

    debug!(pid, "Sending SIGTERM to process group");
    let _ = kill(group, Signal::SIGTERM);

    let start = Instant::now();
    while start.elapsed() < KILL_GRACE_PERIOD {
        if matches!(child.try_wait(), Ok(Some(_))) {
            // The leader is gone; sweep up any remaining group members.
            let _ = kill(group, Signal::SIGKILL);
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    debug!(pid, "Grace period expired, sending SIGKILL to process group");
    let _ = kill(group, Signal::SIGKILL);
}

#[cfg(not(unix))]
async fn terminate(child: &mut Child) {
    let _ = child.start_kill();
}

/// Renders the eapol_test network configuration for one EAP method.
fn render_network_conf(spec: &TestSpec, server: &ServerTarget) -> String {
    let mut lines = vec![
        "network={".to_string(),
        "\tkey_mgmt=WPA-EAP".to_string(),
        format!("\teap={}", spec.eap_type.method_name()),
    ];

    if let Some(identity) = spec.effective_username(server) {
        lines.push(format!("\tidentity=\"{identity}\""));
    }

    match spec.eap_type {
        EapType::Tls => {
            if let Some(ca) = &spec.ca_cert {
                lines.push(format!("\tca_cert=\"{}\"", ca.display()));
            }
            if let Some(cert) = &spec.client_cert {
                lines.push(format!("\tclient_cert=\"{}\"", cert.display()));
            }
            if let Some(key) = &spec.private_key {
                lines.push(format!("\tprivate_key=\"{}\"", key.display()));
            }
            if let Some(passwd) = &spec.private_key_password {
                lines.push(format!("\tprivate_key_passwd=\"{passwd}\""));
            }
        }
        EapType::Ttls => {
            lines.push("\tphase2=\"auth=MSCHAPV2\"".to_string());
        }
        EapType::Peap => {
            lines.push("\tphase1=\"peaplabel=0\"".to_string());
            lines.push("\tphase2=\"auth=MSCHAPV2\"".to_string());
        }
        EapType::Fast => {
            lines.push("\tphase1=\"fast_provisioning=1\"".to_string());
            if let Some(pac) = &spec.pac_file {
                lines.push(format!("\tpac_file=\"{}\"", pac.display()));
            }
        }
        EapType::Md5 | EapType::Mschapv2 => {}
    }

    if spec.eap_type.requires_password()
        && let Some(password) = spec.effective_password(server)
    {
        lines.push(format!("\tpassword=\"{password}\""));
    }

    lines.push("}".to_string());
    lines.join("\n") + "\n"
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::{LoggingConfig, SuiteConfig};
    use crate::logs::LogManager;
    use std::io::Write as _;
    use std::os::unix::fs::PermissionsExt;

    fn stub_binary(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("eapol_test_stub");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "#!/bin/sh\n{body}").unwrap();
        let mut perms = file.metadata().unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    fn server() -> ServerTarget {
        ServerTarget {
            address: "127.0.0.1".to_string(),
            port: 1812,
            secret: "radsecret".to_string(),
            identity: Some("testuser".to_string()),
            password: Some("testpass".to_string()),
        }
    }

    fn peap_spec() -> TestSpec {
        let template = SuiteConfig::template();
        let mut spec: TestSpec =
            serde_json::from_value(template["eap_types"]["peap"].clone()).unwrap();
        spec.eap_type = EapType::Peap;
        spec.enabled = true;
        spec
    }

    fn logs(dir: &Path) -> LogManager {
        LogManager::new(&LoggingConfig {
            dir: dir.join("logs"),
            max_files: 10,
            max_total_bytes: 1024 * 1024,
        })
        .unwrap()
    }

    async fn run_stub(body: &str, spec: &TestSpec) -> RunResult {
        let tmp = tempfile::tempdir().unwrap();
        let binary = stub_binary(tmp.path(), body);
        let manager = logs(tmp.path());
        let log = manager.create_run_log(spec.eap_type).unwrap();
        let executor = TestExecutor::new(binary, server());
        executor.execute(spec, log).await
    }

    #[tokio::test]
    async fn exit_zero_with_marker_is_success() {
        let result = run_stub("echo some output; echo SUCCESS", &peap_spec()).await;
        assert_eq!(result.status, RunStatus::Success);
        assert_eq!(result.exit_code, Some(0));
        assert!(result.log_path.is_some());
    }

    #[tokio::test]
    async fn exit_zero_without_marker_is_failure() {
        let result = run_stub("echo authentication did not complete", &peap_spec()).await;
        assert_eq!(result.status, RunStatus::Failure);
        assert!(result.message.unwrap().contains("without success marker"));
    }

    #[tokio::test]
    async fn nonzero_exit_is_failure_with_stderr_message() {
        let result = run_stub("echo 'shared secret mismatch' >&2; exit 1", &peap_spec()).await;
        assert_eq!(result.status, RunStatus::Failure);
        assert_eq!(result.exit_code, Some(1));
        assert!(result.message.unwrap().contains("shared secret mismatch"));
    }

    #[tokio::test]
    async fn timeout_terminates_the_subprocess() {
        let mut spec = peap_spec();
        spec.timeout_secs = 1;
        let started = Instant::now();
        let result = run_stub("trap '' TERM; sleep 30; echo SUCCESS", &spec).await;
        assert_eq!(result.status, RunStatus::Timeout);
        // SIGTERM is trapped, so the kill escalation must have fired well
        // before the stub's sleep would finish.
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn timeout_kills_the_whole_process_tree() {
        let tmp = tempfile::tempdir().unwrap();
        let pid_path = tmp.path().join("grandchild.pid");
        // The stub ignores SIGTERM and parks behind a grandchild that holds
        // our pipes open; only a group-wide kill gets rid of both.
        let body = format!(
            "trap '' TERM\nsleep 30 &\necho $! > {}\nwait",
            pid_path.display()
        );
        let binary = stub_binary(tmp.path(), &body);
        let manager = logs(tmp.path());
        let mut spec = peap_spec();
        spec.timeout_secs = 1;
        let log = manager.create_run_log(spec.eap_type).unwrap();
        let executor = TestExecutor::new(binary, server());

        let started = Instant::now();
        let result = executor.execute(&spec, log).await;
        assert_eq!(result.status, RunStatus::Timeout);
        assert!(
            started.elapsed() < Duration::from_secs(10),
            "executor blocked on an orphaned grandchild"
        );

        // SIGKILL delivery is asynchronous, and kill(pid, 0) still succeeds
        // while the orphaned grandchild sits as a zombie waiting for init to
        // reap it; poll until it is fully gone.
        let pid: i32 = std::fs::read_to_string(&pid_path)
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut alive = true;
        while alive && Instant::now() < deadline {
            alive = nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None).is_ok();
            if alive {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
        assert!(!alive, "grandchild survived the timeout kill");
    }

    #[tokio::test]
    async fn missing_binary_is_launch_error() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = logs(tmp.path());
        let spec = peap_spec();
        let log = manager.create_run_log(spec.eap_type).unwrap();
        let executor = TestExecutor::new(tmp.path().join("no-such-binary"), server());

        let result = executor.execute(&spec, log).await;
        assert_eq!(result.status, RunStatus::Error);
        assert!(result.message.unwrap().contains("failed to launch"));
    }

    #[tokio::test]
    async fn missing_certificate_fails_the_run_only() {
        let template = SuiteConfig::template();
        let mut spec: TestSpec =
            serde_json::from_value(template["eap_types"]["tls"].clone()).unwrap();
        spec.eap_type = EapType::Tls;
        spec.enabled = true;
        spec.ca_cert = Some(PathBuf::from("/nonexistent/ca.pem"));

        let result = run_stub("echo SUCCESS", &spec).await;
        assert_eq!(result.status, RunStatus::Failure);
        assert!(result.message.unwrap().contains("input file not found"));
    }

    #[test]
    fn network_conf_renders_tls_block() {
        let template = SuiteConfig::template();
        let mut spec: TestSpec =
            serde_json::from_value(template["eap_types"]["tls"].clone()).unwrap();
        spec.eap_type = EapType::Tls;

        let conf = render_network_conf(&spec, &server());
        assert!(conf.contains("eap=TLS"));
        assert!(conf.contains("client_cert=\"certs/client.pem\""));
        assert!(!conf.contains("password=\"testpass\""));
    }

    #[test]
    fn network_conf_renders_peap_phase2() {
        let conf = render_network_conf(&peap_spec(), &server());
        assert!(conf.contains("eap=PEAP"));
        assert!(conf.contains("phase2=\"auth=MSCHAPV2\""));
        assert!(conf.contains("identity=\"testuser\""));
        assert!(conf.contains("password=\"testpass\""));
    }

    #[test]
    fn secret_is_redacted_in_logged_command() {
        let args = vec!["-s".to_string(), "radsecret".to_string()];
        let redacted = redact_args(&args, "radsecret");
        assert_eq!(redacted, vec!["-s".to_string(), "***".to_string()]);
    }

    #[test]
    fn run_state_transitions_to_terminal() {
        let state = RunState::Pending;
        assert!(!state.is_terminal());
        let state = RunState::Running;
        assert!(!state.is_terminal());
        let state = RunState::Done(RunStatus::Timeout);
        assert!(state.is_terminal());
    }
}
