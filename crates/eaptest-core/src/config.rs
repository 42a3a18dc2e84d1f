//! Typed suite configuration loaded from JSON.
//!
//! The loose `{"server": ..., "eap_types": {...}}` document is parsed into
//! strongly typed structures and validated eagerly: unknown EAP type names,
//! missing per-type credential fields, and malformed server settings are all
//! rejected before any test is scheduled.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default per-type authentication timeout in seconds.
const DEFAULT_TEST_TIMEOUT_SECS: u64 = 30;

/// Upper bound on the parallel worker pool. The RADIUS server and the
/// eapol_test binary are shared contended resources, so fan-out stays small.
pub const MAX_WORKERS_CEILING: usize = 8;

/// Errors produced while loading or validating the configuration file.
///
/// All of these are suite-fatal and map to exit code 2.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(PathBuf),

    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("unknown EAP type '{0}' (expected one of: tls, ttls, peap, md5, fast, mschapv2)")]
    UnknownEapType(String),

    #[error("EAP type '{eap_type}' is missing required field '{field}'")]
    MissingField { eap_type: EapType, field: &'static str },

    #[error("invalid server configuration: {0}")]
    InvalidServer(String),

    #[error("invalid execution configuration: {0}")]
    InvalidExecution(String),
}

/// The EAP methods the suite knows how to drive through eapol_test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EapType {
    Tls,
    Ttls,
    Peap,
    Md5,
    Fast,
    Mschapv2,
}

impl EapType {
    /// Canonical ordering. Suite reports always list results in this order,
    /// regardless of JSON key order or parallel completion order.
    pub const ALL: [EapType; 6] = [
        EapType::Tls,
        EapType::Ttls,
        EapType::Peap,
        EapType::Md5,
        EapType::Fast,
        EapType::Mschapv2,
    ];

    /// Lowercase name used for config keys and log file names.
    pub fn as_str(self) -> &'static str {
        match self {
            EapType::Tls => "tls",
            EapType::Ttls => "ttls",
            EapType::Peap => "peap",
            EapType::Md5 => "md5",
            EapType::Fast => "fast",
            EapType::Mschapv2 => "mschapv2",
        }
    }

    /// Method name as it appears in a wpa_supplicant network block.
    pub fn method_name(self) -> &'static str {
        match self {
            EapType::Tls => "TLS",
            EapType::Ttls => "TTLS",
            EapType::Peap => "PEAP",
            EapType::Md5 => "MD5",
            EapType::Fast => "FAST",
            EapType::Mschapv2 => "MSCHAPV2",
        }
    }

    /// Whether the method authenticates with a username/password pair
    /// (as opposed to a client certificate).
    pub fn requires_password(self) -> bool {
        !matches!(self, EapType::Tls)
    }
}

impl fmt::Display for EapType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.method_name())
    }
}

impl FromStr for EapType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tls" => Ok(EapType::Tls),
            "ttls" => Ok(EapType::Ttls),
            "peap" => Ok(EapType::Peap),
            "md5" => Ok(EapType::Md5),
            "fast" => Ok(EapType::Fast),
            "mschapv2" => Ok(EapType::Mschapv2),
            other => Err(ConfigError::UnknownEapType(other.to_string())),
        }
    }
}

/// The RADIUS server under test. Shared read-only by all runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerTarget {
    pub address: String,
    pub port: u16,
    pub secret: String,
    /// Outer identity passed to eapol_test via `-M`.
    #[serde(default)]
    pub identity: Option<String>,
    /// Fallback password for password-based methods that do not set their own.
    #[serde(default)]
    pub password: Option<String>,
}

impl ServerTarget {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.address.trim().is_empty() {
            return Err(ConfigError::InvalidServer("address is empty".into()));
        }
        if self.port == 0 {
            return Err(ConfigError::InvalidServer("port must be non-zero".into()));
        }
        if self.secret.is_empty() {
            return Err(ConfigError::InvalidServer("shared secret is empty".into()));
        }
        Ok(())
    }
}

/// One EAP type's test definition. Immutable once loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestSpec {
    #[serde(skip)]
    pub eap_type: EapType,
    pub enabled: bool,
    #[serde(default = "default_test_timeout")]
    pub timeout_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_cert: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_cert: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key_password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pac_file: Option<PathBuf>,
}

fn default_test_timeout() -> u64 {
    DEFAULT_TEST_TIMEOUT_SECS
}

impl TestSpec {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Effective username for password methods: per-type override, falling
    /// back to the server-level identity.
    pub fn effective_username<'a>(&'a self, server: &'a ServerTarget) -> Option<&'a str> {
        self.username
            .as_deref()
            .or(server.identity.as_deref())
    }

    /// Effective password: per-type override, falling back to server-level.
    pub fn effective_password<'a>(&'a self, server: &'a ServerTarget) -> Option<&'a str> {
        self.password
            .as_deref()
            .or(server.password.as_deref())
    }

    /// Checks that every field the EAP method needs is present.
    ///
    /// Only presence is validated here; whether referenced certificate files
    /// actually exist is checked at execution time so a missing file fails
    /// that one run instead of the whole suite.
    fn validate(&self, server: &ServerTarget) -> Result<(), ConfigError> {
        if !self.enabled {
            return Ok(());
        }

        let missing = |field| ConfigError::MissingField {
            eap_type: self.eap_type,
            field,
        };

        match self.eap_type {
            EapType::Tls => {
                if self.ca_cert.is_none() {
                    return Err(missing("ca_cert"));
                }
                if self.client_cert.is_none() {
                    return Err(missing("client_cert"));
                }
                if self.private_key.is_none() {
                    return Err(missing("private_key"));
                }
            }
            EapType::Fast => {
                if self.pac_file.is_none() {
                    return Err(missing("pac_file"));
                }
                if self.effective_username(server).is_none() {
                    return Err(missing("username"));
                }
                if self.effective_password(server).is_none() {
                    return Err(missing("password"));
                }
            }
            EapType::Ttls | EapType::Peap | EapType::Md5 | EapType::Mschapv2 => {
                if self.effective_username(server).is_none() {
                    return Err(missing("username"));
                }
                if self.effective_password(server).is_none() {
                    return Err(missing("password"));
                }
            }
        }

        if self.timeout_secs == 0 {
            return Err(missing("timeout_secs"));
        }

        Ok(())
    }
}

/// Scheduling, build, and probing knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Run enabled types concurrently with a bounded worker pool.
    pub parallel: bool,
    /// Worker pool size in parallel mode, clamped to [`MAX_WORKERS_CEILING`].
    pub max_workers: usize,
    /// Reachability probe timeout in seconds.
    pub probe_timeout_secs: u64,
    /// Overall build pipeline timeout in seconds. A hung compiler or package
    /// manager must not stall the suite indefinitely.
    pub build_timeout_secs: u64,
    /// When true, dry-run mode still resolves dependencies and builds the
    /// binary if absent; when false (default) dry-run skips building entirely.
    pub dry_run_builds: bool,
    /// Explicit path to an eapol_test binary. Skips the dependency probe and
    /// the build pipeline.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub binary_path: Option<PathBuf>,
    /// Where the hostap source tree is checked out when a build is needed.
    pub source_dir: PathBuf,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            parallel: false,
            max_workers: 4,
            probe_timeout_secs: 5,
            build_timeout_secs: 900,
            dry_run_builds: false,
            binary_path: None,
            source_dir: PathBuf::from(".eaptest/hostap"),
        }
    }
}

impl ExecutionConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn build_timeout(&self) -> Duration {
        Duration::from_secs(self.build_timeout_secs)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_workers == 0 {
            return Err(ConfigError::InvalidExecution(
                "max_workers must be at least 1".into(),
            ));
        }
        if self.probe_timeout_secs == 0 {
            return Err(ConfigError::InvalidExecution(
                "probe_timeout_secs must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// Log directory layout and rotation thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub dir: PathBuf,
    /// Maximum number of `eaptest-*.log` files retained across invocations.
    pub max_files: usize,
    /// Prune oldest logs once the directory exceeds this many bytes.
    pub max_total_bytes: u64,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("logs"),
            max_files: 20,
            max_total_bytes: 5 * 1024 * 1024,
        }
    }
}

/// Raw JSON shape before validation.
#[derive(Debug, Deserialize)]
struct RawConfig {
    server: ServerTarget,
    eap_types: HashMap<String, TestSpec>,
    #[serde(default)]
    execution: ExecutionConfig,
    #[serde(default)]
    logging: LoggingConfig,
}

/// Validated suite configuration. Constructed once at startup and passed
/// read-only to every component.
#[derive(Debug, Clone)]
pub struct SuiteConfig {
    pub server: ServerTarget,
    /// All configured specs in canonical [`EapType::ALL`] order.
    pub specs: Vec<TestSpec>,
    pub execution: ExecutionConfig,
    pub logging: LoggingConfig,
}

impl SuiteConfig {
    /// Loads and validates the configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let text = fs::read_to_string(path)?;
        let raw: RawConfig = serde_json::from_str(&text)?;
        let mut config = Self::from_raw(raw)?;
        config.apply_env_overrides(|name| std::env::var(name).ok());
        Ok(config)
    }

    fn from_raw(raw: RawConfig) -> Result<Self, ConfigError> {
        raw.server.validate()?;
        raw.execution.validate()?;

        let mut by_type: HashMap<EapType, TestSpec> = HashMap::new();
        for (name, mut spec) in raw.eap_types {
            let eap_type = name.parse::<EapType>()?;
            spec.eap_type = eap_type;
            by_type.insert(eap_type, spec);
        }

        // Normalize to canonical order so report ordering is deterministic
        // regardless of JSON key order.
        let specs: Vec<TestSpec> = EapType::ALL
            .iter()
            .filter_map(|t| by_type.remove(t))
            .collect();

        for spec in &specs {
            spec.validate(&raw.server)?;
        }

        Ok(Self {
            server: raw.server,
            specs,
            execution: raw.execution,
            logging: raw.logging,
        })
    }

    /// Overrides sensitive settings from the environment, so secrets can be
    /// kept out of the config file.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(secret) = lookup("EAPTEST_SECRET") {
            self.server.secret = secret;
        }
        if let Some(password) = lookup("EAPTEST_PASSWORD") {
            self.server.password = Some(password);
        }
        if let Some(key_password) = lookup("EAPTEST_PRIVATE_KEY_PASSWORD") {
            for spec in &mut self.specs {
                if spec.eap_type == EapType::Tls {
                    spec.private_key_password = Some(key_password.clone());
                }
            }
        }
    }

    /// Specs with `enabled: true`, in canonical order.
    pub fn enabled_specs(&self) -> Vec<TestSpec> {
        self.specs.iter().filter(|s| s.enabled).cloned().collect()
    }

    pub fn spec(&self, eap_type: EapType) -> Option<&TestSpec> {
        self.specs.iter().find(|s| s.eap_type == eap_type)
    }

    /// Restricts the suite to the named types and forces them enabled.
    /// Errors if a requested type is not present in the configuration.
    pub fn select_types(&mut self, types: &[EapType]) -> Result<(), ConfigError> {
        for t in types {
            if self.spec(*t).is_none() {
                return Err(ConfigError::UnknownEapType(format!(
                    "{} is not configured",
                    t.as_str()
                )));
            }
        }
        for spec in &mut self.specs {
            spec.enabled = types.contains(&spec.eap_type);
        }
        // A spec that was disabled in the file may be missing required
        // fields; re-validate now that it is forced on.
        for spec in &self.specs {
            spec.validate(&self.server)?;
        }
        Ok(())
    }

    /// A starter configuration with every EAP type present but disabled.
    pub fn template() -> serde_json::Value {
        let mut eap_types = serde_json::Map::new();
        for t in EapType::ALL {
            let mut spec = serde_json::Map::new();
            spec.insert("enabled".into(), serde_json::Value::Bool(false));
            spec.insert("timeout_secs".into(), DEFAULT_TEST_TIMEOUT_SECS.into());
            match t {
                EapType::Tls => {
                    spec.insert("ca_cert".into(), "certs/ca.pem".into());
                    spec.insert("client_cert".into(), "certs/client.pem".into());
                    spec.insert("private_key".into(), "certs/client.key".into());
                    spec.insert("private_key_password".into(), "".into());
                }
                EapType::Fast => {
                    spec.insert("pac_file".into(), "certs/eap-fast.pac".into());
                }
                _ => {}
            }
            eap_types.insert(t.as_str().into(), serde_json::Value::Object(spec));
        }

        serde_json::json!({
            "server": {
                "address": "192.168.1.1",
                "port": 1812,
                "secret": "testing123",
                "identity": "testuser",
                "password": "testpass",
            },
            "eap_types": eap_types,
            "execution": ExecutionConfig::default(),
            "logging": LoggingConfig::default(),
        })
    }

    /// Writes the template config to `path`.
    pub fn write_template(path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let text = serde_json::to_string_pretty(&Self::template())?;
        fs::write(path, text + "\n")?;
        Ok(())
    }
}

// serde(skip) leaves eap_type at a placeholder during deserialization; give
// it a harmless default so derived Deserialize compiles.
impl Default for EapType {
    fn default() -> Self {
        EapType::Tls
    }
}
