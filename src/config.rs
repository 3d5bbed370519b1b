//! Configuration module for Vigil.
//!
//! Process settings come from environment variables with sensible
//! defaults. Check definitions come from a TOML or JSON file.

use std::collections::HashSet;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::collab::Severity;
use crate::policy::Policy;
use crate::probe::{ResourceKind, Target};

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP port for the status API, 0 disables it (default: 8080)
    pub http_port: u16,
    /// Path to the check definitions (default: "vigil.toml")
    pub config_path: PathBuf,
    /// Size of the shared worker pool (default: 16)
    pub workers: usize,
    /// How long shutdown waits for in-flight work (default: 10s)
    pub shutdown_grace: Duration,
    /// Sink events queued before new ones are dropped (default: 1024)
    pub event_buffer: usize,
    /// Events kept for the status API (default: 500)
    pub event_history: usize,
    /// Webhook endpoint for notifications; logged when unset
    pub webhook_url: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            config_path: PathBuf::from("vigil.toml"),
            workers: 16,
            shutdown_grace: Duration::from_secs(10),
            event_buffer: 1024,
            event_history: 500,
            webhook_url: None,
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = env::var(name).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(var = name, value = %raw, "ignoring unparseable environment variable");
            None
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `VIGIL_HTTP_PORT`: status API port (default: 8080)
    /// - `VIGIL_CONFIG`: check definition file (default: "vigil.toml")
    /// - `VIGIL_WORKERS`: worker pool size (default: 16)
    /// - `VIGIL_SHUTDOWN_GRACE_SECS`: shutdown grace period (default: 10)
    /// - `VIGIL_EVENT_BUFFER`: sink queue capacity (default: 1024)
    /// - `VIGIL_EVENT_HISTORY`: events kept for the status API (default: 500)
    /// - `VIGIL_WEBHOOK_URL`: notification webhook (default: unset)
    pub fn load() -> Self {
        let mut cfg = Self::default();

        if let Some(port) = parse_var("VIGIL_HTTP_PORT") {
            cfg.http_port = port;
        }
        if let Ok(path) = env::var("VIGIL_CONFIG") {
            cfg.config_path = PathBuf::from(path);
        }
        if let Some(workers) = parse_var::<usize>("VIGIL_WORKERS") {
            cfg.workers = workers.max(1);
        }
        if let Some(secs) = parse_var("VIGIL_SHUTDOWN_GRACE_SECS") {
            cfg.shutdown_grace = Duration::from_secs(secs);
        }
        if let Some(buffer) = parse_var::<usize>("VIGIL_EVENT_BUFFER") {
            cfg.event_buffer = buffer.max(1);
        }
        if let Some(history) = parse_var("VIGIL_EVENT_HISTORY") {
            cfg.event_history = history;
        }
        cfg.webhook_url = env::var("VIGIL_WEBHOOK_URL").ok().filter(|u| !u.is_empty());

        cfg
    }
}

/// Configuration error types. All of them are fatal at startup.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid check file: {0}")]
    Parse(String),
    #[error("duplicate check for target {target} with probe kind {kind}")]
    Duplicate { target: String, kind: String },
    #[error("invalid check for {target}: {reason}")]
    Invalid { target: String, reason: String },
    #[error("no checks defined")]
    Empty,
}

fn default_accept() -> Vec<u16> {
    vec![200]
}

fn default_tls_port() -> u16 {
    443
}

fn default_prefix() -> u8 {
    24
}

fn default_interface() -> String {
    "eth0".to_string()
}

fn default_severity() -> Severity {
    Severity::Critical
}

/// Upper bound for every configured duration, about a century.
pub const MAX_DURATION_SECONDS: u64 = 100 * 365 * 24 * 60 * 60;

fn default_interval() -> u64 {
    60
}

fn default_cooldown() -> u64 {
    300
}

fn default_timeout() -> u64 {
    10
}

/// Probe kind and its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProbeSpec {
    /// Target is a URL. Success iff the status is in `accept`.
    Http {
        #[serde(default = "default_accept")]
        accept: Vec<u16>,
    },
    /// Target is `host:port`.
    Tcp,
    /// Target is a host name, optionally with `:port`.
    Tls {
        #[serde(default = "default_tls_port")]
        port: u16,
        /// Validate the chain before measuring expiry.
        #[serde(default)]
        verify: bool,
    },
    Resource {
        resource: ResourceKind,
    },
    Ping,
    /// Target is a systemd unit name.
    ServiceState {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        host: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        identity_file: Option<PathBuf>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        accepted: Option<Vec<String>>,
    },
    /// Target is a namespace, or `*` for all of them.
    PodPhase {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        accepted: Option<Vec<String>>,
    },
    /// Target is a region.
    InstanceState {
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        instance_ids: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        accepted: Option<Vec<String>>,
    },
    /// Target is a file path.
    FileIntegrity {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sha256: Option<String>,
    },
    /// Target is a log file path.
    LogPattern {
        pattern: String,
    },
}

impl ProbeSpec {
    pub fn kind(&self) -> &'static str {
        match self {
            ProbeSpec::Http { .. } => "http",
            ProbeSpec::Tcp => "tcp",
            ProbeSpec::Tls { .. } => "tls",
            ProbeSpec::Resource { .. } => "resource",
            ProbeSpec::Ping => "ping",
            ProbeSpec::ServiceState { .. } => "service_state",
            ProbeSpec::PodPhase { .. } => "pod_phase",
            ProbeSpec::InstanceState { .. } => "instance_state",
            ProbeSpec::FileIntegrity { .. } => "file_integrity",
            ProbeSpec::LogPattern { .. } => "log_pattern",
        }
    }
}

/// Remediation kind and its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RemediationSpec {
    RestartService {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        service: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        host: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        identity_file: Option<PathBuf>,
    },
    Scale {
        pool: String,
        replicas: u32,
    },
    FailoverVip {
        vip: String,
        #[serde(default = "default_prefix")]
        prefix: u8,
        #[serde(default = "default_interface")]
        interface: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        host: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        identity_file: Option<PathBuf>,
    },
    EvictStale {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        bucket: Option<String>,
        retention_days: u32,
    },
    Notify {
        #[serde(default = "default_severity")]
        severity: Severity,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

impl RemediationSpec {
    pub fn kind(&self) -> &'static str {
        match self {
            RemediationSpec::RestartService { .. } => "restart_service",
            RemediationSpec::Scale { .. } => "scale",
            RemediationSpec::FailoverVip { .. } => "failover_vip",
            RemediationSpec::EvictStale { .. } => "evict_stale",
            RemediationSpec::Notify { .. } => "notify",
        }
    }
}

/// One check definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub target: Target,
    pub probe: ProbeSpec,
    #[serde(default)]
    pub policy: Policy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remediation: Option<RemediationSpec>,
    #[serde(default = "default_interval")]
    pub interval_seconds: u64,
    #[serde(default = "default_cooldown")]
    pub cooldown_seconds: u64,
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

impl CheckConfig {
    /// Display name, `kind:target` unless configured.
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("{}:{}", self.probe.kind(), self.target))
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_seconds)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: &str| ConfigError::Invalid {
            target: self.target.to_string(),
            reason: reason.to_string(),
        };

        if self.target.as_str().is_empty() {
            return Err(invalid("target must not be empty"));
        }
        if self.interval_seconds == 0 {
            return Err(invalid("interval_seconds must be positive"));
        }
        if self.timeout_seconds == 0 {
            return Err(invalid("timeout_seconds must be positive"));
        }
        for (field, value) in [
            ("interval_seconds", self.interval_seconds),
            ("cooldown_seconds", self.cooldown_seconds),
            ("timeout_seconds", self.timeout_seconds),
        ] {
            if value > MAX_DURATION_SECONDS {
                return Err(ConfigError::Invalid {
                    target: self.target.to_string(),
                    reason: format!("{} must be at most {}", field, MAX_DURATION_SECONDS),
                });
            }
        }
        if self.policy.consecutive_failures == 0 {
            return Err(invalid("consecutive_failures must be positive"));
        }
        if let Some(t) = self.policy.thresholds.iter().find(|t| !t.is_valid()) {
            return Err(ConfigError::Invalid {
                target: self.target.to_string(),
                reason: format!("threshold on {} needs exactly one of above/below", t.metric),
            });
        }
        if let ProbeSpec::Http { accept } = &self.probe {
            if accept.is_empty() {
                return Err(invalid("accept must list at least one status"));
            }
        }
        Ok(())
    }
}

/// The check definition file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckFile {
    #[serde(default)]
    pub checks: Vec<CheckConfig>,
}

impl CheckFile {
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    #[cfg(test)]
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Reject empty files, invalid checks and duplicate (target, kind) pairs.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.checks.is_empty() {
            return Err(ConfigError::Empty);
        }

        let mut seen = HashSet::new();
        for check in &self.checks {
            check.validate()?;
            if !seen.insert((check.target.clone(), check.probe.kind())) {
                return Err(ConfigError::Duplicate {
                    target: check.target.to_string(),
                    kind: check.probe.kind().to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Load and validate check definitions. `.json` files are parsed as JSON,
/// anything else as TOML.
pub fn load_checks(path: &Path) -> Result<Vec<CheckConfig>, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let file = match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("json") => CheckFile::from_json(&text)?,
        _ => CheckFile::from_toml(&text)?,
    };
    file.validate()?;

    Ok(file.checks)
}
